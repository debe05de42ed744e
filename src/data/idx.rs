//! Readers for the IDX binary format used by MNIST and its derivatives
//! (Fashion-MNIST, EMNIST, ...).
//!
//! # IDX3 image file layout
//! ```text
//! bytes  0-3:   0x00000803  (magic, big-endian)
//! bytes  4-7:   N           (number of images, big-endian u32)
//! bytes  8-11:  rows        (image height in pixels, big-endian u32)
//! bytes 12-15:  cols        (image width in pixels, big-endian u32)
//! bytes 16..:   N * rows * cols bytes, row-major, uint8
//! ```
//!
//! # IDX1 label file layout
//! ```text
//! bytes  0-3:   0x00000801  (magic, big-endian)
//! bytes  4-7:   N           (number of labels, big-endian u32)
//! bytes  8..:   N bytes, each a class index in [0, num_classes)
//! ```

use std::path::Path;

use log::{error, info};

use crate::error::{NnError, Result};
use crate::math::matrix::{Matrix, Orientation};

pub const IMAGE_MAGIC: u32 = 0x0000_0803;
pub const LABEL_MAGIC: u32 = 0x0000_0801;
pub const DEFAULT_CLASSES: usize = 10;

/// A set of single-channel images with pixel intensities scaled to [0, 1].
#[derive(Debug, Clone)]
pub struct MnistImages {
    height: usize,
    width: usize,
    images: Vec<Matrix>,
}

impl MnistImages {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<MnistImages> {
        let bytes = std::fs::read(path.as_ref()).map_err(|e| {
            NnError::Dataset(format!("unable to read {}: {e}", path.as_ref().display()))
        })?;
        MnistImages::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<MnistImages> {
        if bytes.len() < 16 {
            return Err(NnError::Dataset(format!(
                "IDX image file too short: expected at least 16 header bytes, got {}",
                bytes.len()
            )));
        }
        let magic = be_u32(bytes, 0);
        if magic != IMAGE_MAGIC {
            return Err(NnError::Dataset(format!(
                "IDX image file: magic number {magic:#010x} does not match {IMAGE_MAGIC:#010x}"
            )));
        }
        let count = be_u32(bytes, 4) as usize;
        let height = be_u32(bytes, 8) as usize;
        let width = be_u32(bytes, 12) as usize;

        let pixels = height.checked_mul(width).ok_or_else(|| {
            NnError::Dataset(format!("IDX image file: {height} x {width} overflows"))
        })?;
        let required = count
            .checked_mul(pixels)
            .and_then(|n| n.checked_add(16))
            .ok_or_else(|| NnError::Dataset("IDX image file: data length overflows".to_owned()))?;
        if bytes.len() < required {
            return Err(NnError::Dataset(format!(
                "IDX image file too short: header declares {count} images of {height} x {width} \
                 pixels ({required} bytes), but the file is only {} bytes",
                bytes.len()
            )));
        }

        let images = if pixels == 0 {
            vec![Matrix::zeros(height, width); count]
        } else {
            bytes[16..required]
                .chunks_exact(pixels)
                .map(|chunk| {
                    let data = chunk.iter().map(|&px| f64::from(px) / 255.0).collect();
                    Matrix::from_vec(height, width, data)
                })
                .collect::<Result<Vec<_>>>()?
        };
        info!("read {count} images of {height} x {width}");

        Ok(MnistImages {
            height,
            width,
            images,
        })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of pixels in one image, i.e. the rows of a flattened sample.
    pub fn image_size(&self) -> usize {
        self.height * self.width
    }

    /// The image at `index` as a `[height x width]` matrix.
    pub fn get(&self, index: usize) -> Result<&Matrix> {
        self.images.get(index).ok_or_else(|| {
            error!("MnistImages::get: invalid index provided");
            NnError::Dataset(format!("image index {index} is out of range for {} images", self.len()))
        })
    }

    /// The image at `index` as a `[height*width x 1]` column.
    pub fn get_flat(&self, index: usize) -> Result<Matrix> {
        let mut result = Matrix::zeros(self.image_size(), 1);
        self.get_flat_into(index, &mut result)?;
        Ok(result)
    }

    /// Writes the flattened image into `dest`, which must hold exactly
    /// `height*width` elements; `dest` ends up as a single column.
    pub fn get_flat_into(&self, index: usize, dest: &mut Matrix) -> Result<()> {
        let image = self.get(index)?;
        if dest.len() != self.image_size() {
            error!("MnistImages::get_flat_into: incorrect destination matrix size");
            return Err(NnError::SizeMismatch {
                op: "MnistImages::get_flat_into",
                expected: self.image_size(),
                got: dest.len(),
            });
        }
        image.copy_to(dest)?;
        dest.flatten(Orientation::Column);
        Ok(())
    }

    /// Images `start..end` as one `[height*width x (end - start)]` matrix, one
    /// image per column.
    pub fn images_from_range(&self, start: usize, end: usize) -> Result<Matrix> {
        check_range(start, end, self.len(), "MnistImages::images_from_range")?;
        let mut result = Matrix::zeros(self.image_size(), end - start);
        self.images_from_range_into(start, end, &mut result)?;
        Ok(result)
    }

    pub fn images_from_range_into(&self, start: usize, end: usize, dest: &mut Matrix) -> Result<()> {
        check_range(start, end, self.len(), "MnistImages::images_from_range_into")?;
        check_destination(dest, self.image_size(), end - start, "MnistImages::images_from_range_into")?;

        let cols = end - start;
        let out = dest.as_mut_slice();
        for (col, image) in self.images[start..end].iter().enumerate() {
            for (pixel, &value) in image.as_slice().iter().enumerate() {
                out[pixel * cols + col] = value;
            }
        }
        Ok(())
    }
}

/// Class labels, each convertible to a one-hot column.
#[derive(Debug, Clone)]
pub struct MnistLabels {
    num_classes: usize,
    labels: Vec<u8>,
}

impl MnistLabels {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<MnistLabels> {
        MnistLabels::open_with_classes(path, DEFAULT_CLASSES)
    }

    pub fn open_with_classes<P: AsRef<Path>>(path: P, num_classes: usize) -> Result<MnistLabels> {
        let bytes = std::fs::read(path.as_ref()).map_err(|e| {
            NnError::Dataset(format!("unable to read {}: {e}", path.as_ref().display()))
        })?;
        MnistLabels::from_bytes_with_classes(&bytes, num_classes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<MnistLabels> {
        MnistLabels::from_bytes_with_classes(bytes, DEFAULT_CLASSES)
    }

    pub fn from_bytes_with_classes(bytes: &[u8], num_classes: usize) -> Result<MnistLabels> {
        if num_classes < 2 {
            return Err(NnError::Dataset(format!(
                "at least 2 classes are required, got {num_classes}"
            )));
        }
        if bytes.len() < 8 {
            return Err(NnError::Dataset(format!(
                "IDX label file too short: expected at least 8 header bytes, got {}",
                bytes.len()
            )));
        }
        let magic = be_u32(bytes, 0);
        if magic != LABEL_MAGIC {
            return Err(NnError::Dataset(format!(
                "IDX label file: magic number {magic:#010x} does not match {LABEL_MAGIC:#010x}"
            )));
        }
        let count = be_u32(bytes, 4) as usize;
        let data = bytes.get(8..8 + count).ok_or_else(|| {
            NnError::Dataset(format!(
                "IDX label file too short: header declares {count} labels but the file is only {} bytes",
                bytes.len()
            ))
        })?;
        if let Some((i, &class)) = data
            .iter()
            .enumerate()
            .find(|&(_, &class)| usize::from(class) >= num_classes)
        {
            return Err(NnError::Dataset(format!(
                "IDX label at index {i}: class {class} is out of range for {num_classes} classes"
            )));
        }
        info!("read {count} labels");

        Ok(MnistLabels {
            num_classes,
            labels: data.to_vec(),
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn get(&self, index: usize) -> Result<u8> {
        self.labels.get(index).copied().ok_or_else(|| {
            error!("MnistLabels::get: invalid index provided");
            NnError::Dataset(format!("label index {index} is out of range for {} labels", self.len()))
        })
    }

    /// `[num_classes x 1]` column with a one at the label's row.
    pub fn one_hot(&self, index: usize) -> Result<Matrix> {
        let mut result = Matrix::zeros(self.num_classes, 1);
        self.one_hot_into(index, &mut result)?;
        Ok(result)
    }

    pub fn one_hot_into(&self, index: usize, dest: &mut Matrix) -> Result<()> {
        let label = self.get(index)?;
        check_destination(dest, self.num_classes, 1, "MnistLabels::one_hot_into")?;
        dest.populate(0.0);
        dest.set(usize::from(label), 0, 1.0)
    }

    /// One-hot labels `start..end`, one per column.
    pub fn labels_from_range(&self, start: usize, end: usize) -> Result<Matrix> {
        check_range(start, end, self.len(), "MnistLabels::labels_from_range")?;
        let mut result = Matrix::zeros(self.num_classes, end - start);
        self.labels_from_range_into(start, end, &mut result)?;
        Ok(result)
    }

    pub fn labels_from_range_into(&self, start: usize, end: usize, dest: &mut Matrix) -> Result<()> {
        check_range(start, end, self.len(), "MnistLabels::labels_from_range_into")?;
        check_destination(dest, self.num_classes, end - start, "MnistLabels::labels_from_range_into")?;
        dest.populate(0.0);
        for (col, &label) in self.labels[start..end].iter().enumerate() {
            dest.set(usize::from(label), col, 1.0)?;
        }
        Ok(())
    }
}

fn be_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn check_range(start: usize, end: usize, len: usize, op: &str) -> Result<()> {
    if start < end && end <= len {
        return Ok(());
    }
    error!("{op}: invalid range provided");
    Err(NnError::Dataset(format!(
        "{op}: range {start}..{end} is invalid for {len} items"
    )))
}

fn check_destination(dest: &Matrix, rows: usize, cols: usize, op: &'static str) -> Result<()> {
    if dest.shape() == (rows, cols) {
        return Ok(());
    }
    error!("{op}: destination matrix size incorrect");
    Err(NnError::DimensionMismatch {
        op,
        left_rows: rows,
        left_cols: cols,
        right_rows: dest.rows(),
        right_cols: dest.cols(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Builds an IDX3 image file of `count` images, pixel `p` of image `i`
    /// set to `(i * 10 + p) as u8`.
    pub(crate) fn image_bytes(count: u32, height: u32, width: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&IMAGE_MAGIC.to_be_bytes());
        bytes.extend_from_slice(&count.to_be_bytes());
        bytes.extend_from_slice(&height.to_be_bytes());
        bytes.extend_from_slice(&width.to_be_bytes());
        for i in 0..count {
            for p in 0..height * width {
                bytes.push((i * 10 + p) as u8);
            }
        }
        bytes
    }

    pub(crate) fn label_bytes(labels: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&LABEL_MAGIC.to_be_bytes());
        bytes.extend_from_slice(&(labels.len() as u32).to_be_bytes());
        bytes.extend_from_slice(labels);
        bytes
    }

    #[test]
    fn parses_images_and_scales_pixels() {
        let images = MnistImages::from_bytes(&image_bytes(3, 2, 2)).unwrap();
        assert_eq!(images.len(), 3);
        assert_eq!((images.height(), images.width()), (2, 2));
        let second = images.get(1).unwrap();
        assert_eq!(second.shape(), (2, 2));
        assert_abs_diff_eq!(second.get(1, 0).unwrap(), 12.0 / 255.0, epsilon = 1e-12);
        assert!(images.get(3).is_err());
    }

    #[test]
    fn rejects_bad_image_headers() {
        let mut bytes = image_bytes(2, 2, 2);
        bytes[3] = 0x01;
        assert!(MnistImages::from_bytes(&bytes).is_err());

        let short = image_bytes(2, 2, 2);
        assert!(MnistImages::from_bytes(&short[..short.len() - 1]).is_err());
        assert!(MnistImages::from_bytes(&short[..10]).is_err());
    }

    #[test]
    fn flat_images_keep_row_major_order() {
        let images = MnistImages::from_bytes(&image_bytes(2, 2, 3)).unwrap();
        let flat = images.get_flat(1).unwrap();
        assert_eq!(flat.shape(), (6, 1));
        for p in 0..6 {
            assert_abs_diff_eq!(flat.get(p, 0).unwrap(), (10 + p) as f64 / 255.0, epsilon = 1e-12);
        }

        let mut reused = Matrix::zeros(1, 6);
        images.get_flat_into(0, &mut reused).unwrap();
        assert_eq!(reused.shape(), (6, 1));
        assert!(images.get_flat_into(0, &mut Matrix::zeros(5, 1)).is_err());
    }

    #[test]
    fn image_ranges_are_half_open_columns() {
        let images = MnistImages::from_bytes(&image_bytes(4, 2, 2)).unwrap();
        let batch = images.images_from_range(1, 4).unwrap();
        assert_eq!(batch.shape(), (4, 3));
        for col in 0..3 {
            assert_eq!(batch.get_column(col).unwrap(), images.get_flat(col + 1).unwrap());
        }
        assert!(images.images_from_range(2, 2).is_err());
        assert!(images.images_from_range(0, 5).is_err());
        assert!(images
            .images_from_range_into(0, 2, &mut Matrix::zeros(4, 3))
            .is_err());
    }

    #[test]
    fn labels_become_one_hot_columns() {
        let labels = MnistLabels::from_bytes(&label_bytes(&[3, 0, 9])).unwrap();
        assert_eq!(labels.len(), 3);
        assert_eq!(labels.num_classes(), 10);
        assert_eq!(labels.get(2).unwrap(), 9);

        let one_hot = labels.one_hot(0).unwrap();
        assert_eq!(one_hot.shape(), (10, 1));
        assert_eq!(one_hot.sum(), 1.0);
        assert_eq!(one_hot.get(3, 0).unwrap(), 1.0);

        let batch = labels.labels_from_range(0, 3).unwrap();
        assert_eq!(batch.shape(), (10, 3));
        assert_eq!(batch.get(0, 1).unwrap(), 1.0);
        assert_eq!(batch.get(9, 2).unwrap(), 1.0);
        assert_eq!(batch.sum(), 3.0);
    }

    #[test]
    fn rejects_bad_labels() {
        assert!(MnistLabels::from_bytes_with_classes(&label_bytes(&[0, 4]), 4).is_err());
        assert!(MnistLabels::from_bytes_with_classes(&label_bytes(&[0]), 1).is_err());
        let mut truncated = label_bytes(&[1, 2, 3]);
        truncated.pop();
        assert!(MnistLabels::from_bytes(&truncated).is_err());

        let labels = MnistLabels::from_bytes(&label_bytes(&[1])).unwrap();
        assert!(labels.get(1).is_err());
        assert!(labels.one_hot_into(0, &mut Matrix::zeros(9, 1)).is_err());
    }
}
