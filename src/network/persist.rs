use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use log::{debug, info};

use crate::error::{NnError, Result};
use crate::layers::dense::{Layer, Slot};
use crate::loss::loss_type::CostFunction;
use crate::math::matrix::Matrix;
use crate::network::network::Network;
use crate::optim::sgd::Sgd;

/// Binary model layout, all integers and floats little-endian:
///
/// ```text
/// "FFNN"  learning_rate:f64  lambda:f64  cost:u8  layer_count:u64  neurons:u64 * layer_count
/// "WGTS"  { LAYER_BEGIN:u32  f64 * (neurons_i * neurons_{i-1})  LAYER_END:u32 }  for i in 1..layer_count
/// "BIAS"  { LAYER_BEGIN:u32  f64 * neurons_i                    LAYER_END:u32 }  for i in 1..layer_count
/// ```
const HEADER_TAG: &[u8; 4] = b"FFNN";
const WEIGHTS_TAG: &[u8; 4] = b"WGTS";
const BIASES_TAG: &[u8; 4] = b"BIAS";
const LAYER_BEGIN: u32 = 0x4C59_5242;
const LAYER_END: u32 = 0x4C59_5245;

impl Network {
    /// Writes the model to `path` in the binary format.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        info!("saved network {:?} to {}", self.layer_sizes(), path.as_ref().display());
        Ok(())
    }

    /// Reads a model previously written by [`Network::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Network> {
        let network = Network::read_from(BufReader::new(File::open(path.as_ref())?))?;
        info!("loaded network {:?} from {}", network.layer_sizes(), path.as_ref().display());
        Ok(network)
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        self.check_ready("Network::write_to")?;
        self.validate_shapes()?;

        writer.write_all(HEADER_TAG)?;
        writer.write_all(&self.learning_rate().to_le_bytes())?;
        writer.write_all(&self.lambda().to_le_bytes())?;
        writer.write_all(&[self.cost_function().code()])?;
        writer.write_all(&(self.layer_count() as u64).to_le_bytes())?;
        for neurons in self.layer_sizes() {
            writer.write_all(&(neurons as u64).to_le_bytes())?;
        }

        for (tag, slot) in [(WEIGHTS_TAG, Slot::Weights), (BIASES_TAG, Slot::Biases)] {
            writer.write_all(tag)?;
            for layer in &self.layers()[1..] {
                writer.write_all(&LAYER_BEGIN.to_le_bytes())?;
                for value in layer.get(slot)?.as_slice() {
                    writer.write_all(&value.to_le_bytes())?;
                }
                writer.write_all(&LAYER_END.to_le_bytes())?;
            }
        }
        Ok(())
    }

    pub fn read_from<R: Read>(mut reader: R) -> Result<Network> {
        expect_tag(&mut reader, HEADER_TAG)?;
        let learning_rate = f64::from_le_bytes(read_array(&mut reader)?);
        let lambda = f64::from_le_bytes(read_array(&mut reader)?);
        let [code] = read_array::<_, 1>(&mut reader)?;
        let cost = CostFunction::from_code(code)?;

        let layer_count = read_count(&mut reader, "layer count")?;
        if layer_count < 2 {
            return Err(NnError::Model(format!(
                "model declares {layer_count} layers, at least 2 are required"
            )));
        }
        let mut sizes = Vec::new();
        for _ in 0..layer_count {
            sizes.push(read_count(&mut reader, "neuron count")?);
        }
        debug!("Network::read_from: header {sizes:?}, cost {cost}");

        let mut layers: Vec<Layer> = Vec::with_capacity(sizes.len());
        let mut previous = 0;
        for &neurons in &sizes {
            layers.push(Layer::empty(neurons, previous));
            previous = neurons;
        }

        expect_tag(&mut reader, WEIGHTS_TAG)?;
        for i in 1..layers.len() {
            let weights = read_layer(&mut reader, sizes[i], sizes[i - 1], i)?;
            layers[i].write_matrix(&weights, Slot::Weights)?;
        }

        expect_tag(&mut reader, BIASES_TAG)?;
        for i in 1..layers.len() {
            let biases = read_layer(&mut reader, sizes[i], 1, i)?;
            layers[i].write_matrix(&biases, Slot::Biases)?;
        }

        Network::from_layers(layers, Sgd::new(learning_rate, lambda), cost)
    }
}

fn read_array<R: Read, const N: usize>(reader: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => NnError::Model("model file is truncated".to_owned()),
        _ => NnError::Io(e),
    })?;
    Ok(buf)
}

fn expect_tag<R: Read>(reader: &mut R, tag: &[u8; 4]) -> Result<()> {
    let found: [u8; 4] = read_array(reader)?;
    if &found != tag {
        return Err(NnError::Model(format!(
            "expected section tag {:?}, found {:?}",
            String::from_utf8_lossy(tag),
            String::from_utf8_lossy(&found)
        )));
    }
    Ok(())
}

fn read_count<R: Read>(reader: &mut R, what: &str) -> Result<usize> {
    let raw = u64::from_le_bytes(read_array(reader)?);
    usize::try_from(raw).map_err(|_| NnError::Model(format!("{what} {raw} does not fit in memory")))
}

fn read_marker<R: Read>(reader: &mut R, expected: u32, layer: usize) -> Result<()> {
    let marker = u32::from_le_bytes(read_array(reader)?);
    if marker != expected {
        return Err(NnError::Model(format!(
            "layer {layer}: expected marker {expected:#010x}, found {marker:#010x}"
        )));
    }
    Ok(())
}

/// One bracketed block of `rows * cols` values.
fn read_layer<R: Read>(reader: &mut R, rows: usize, cols: usize, layer: usize) -> Result<Matrix> {
    read_marker(reader, LAYER_BEGIN, layer)?;
    let count = rows
        .checked_mul(cols)
        .ok_or_else(|| NnError::Model(format!("layer {layer}: [{rows} x {cols}] overflows")))?;
    let mut values = Vec::new();
    for _ in 0..count {
        values.push(f64::from_le_bytes(read_array(reader)?));
    }
    read_marker(reader, LAYER_END, layer)?;
    Matrix::from_vec(rows, cols, values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use std::io::Cursor;

    fn sample() -> Network {
        Network::with_rng(
            &[3, 4, 2],
            0.25,
            1.5,
            true,
            CostFunction::CrossEntropy,
            &mut StdRng::seed_from_u64(9),
        )
        .unwrap()
    }

    fn encode(net: &Network) -> Vec<u8> {
        let mut bytes = Vec::new();
        net.write_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn header_layout() {
        let bytes = encode(&sample());
        assert_eq!(&bytes[0..4], b"FFNN");
        assert_eq!(f64::from_le_bytes(bytes[4..12].try_into().unwrap()), 0.25);
        assert_eq!(f64::from_le_bytes(bytes[12..20].try_into().unwrap()), 1.5);
        assert_eq!(bytes[20], 1);
        assert_eq!(u64::from_le_bytes(bytes[21..29].try_into().unwrap()), 3);
        assert_eq!(&bytes[53..57], b"WGTS");

        // header + weights (4*3 + 2*4 values) + biases (4 + 2 values), each
        // layer block bracketed by two u32 markers.
        let expected = 53 + 4 + (12 + 8) * 8 + 2 * 8 + 4 + (4 + 2) * 8 + 2 * 8;
        assert_eq!(bytes.len(), expected);
    }

    #[test]
    fn read_back_is_exact() {
        let net = sample();
        let loaded = Network::read_from(Cursor::new(encode(&net))).unwrap();
        assert_eq!(loaded.layer_sizes(), vec![3, 4, 2]);
        assert_eq!(loaded.cost_function(), CostFunction::CrossEntropy);
        for (a, b) in net.layers().iter().zip(loaded.layers()).skip(1) {
            assert_eq!(a.get(Slot::Weights).unwrap(), b.get(Slot::Weights).unwrap());
            assert_eq!(a.get(Slot::Biases).unwrap(), b.get(Slot::Biases).unwrap());
        }
    }

    #[test]
    fn corrupt_inputs_are_model_errors() {
        let bytes = encode(&sample());

        let mut bad_tag = bytes.clone();
        bad_tag[0] = b'X';
        assert!(matches!(Network::read_from(Cursor::new(bad_tag)), Err(NnError::Model(_))));

        let mut bad_cost = bytes.clone();
        bad_cost[20] = 9;
        assert!(matches!(Network::read_from(Cursor::new(bad_cost)), Err(NnError::Model(_))));

        let mut bad_marker = bytes.clone();
        bad_marker[57] ^= 0xFF;
        assert!(matches!(Network::read_from(Cursor::new(bad_marker)), Err(NnError::Model(_))));

        let truncated = bytes[..bytes.len() - 3].to_vec();
        assert!(matches!(Network::read_from(Cursor::new(truncated)), Err(NnError::Model(_))));
    }

    #[test]
    fn too_few_layers_are_rejected() {
        let empty: Network = serde_json::from_str(
            r#"{"layers":[],"optimizer":{"learning_rate":0.1,"lambda":0.0},"cost":"quadratic"}"#,
        )
        .unwrap();
        let mut sink = Vec::new();
        assert!(matches!(empty.write_to(&mut sink), Err(NnError::InvalidConfig(_))));
        assert!(sink.is_empty());

        for count in [0u64, 1] {
            let mut bytes = Vec::new();
            bytes.extend_from_slice(b"FFNN");
            bytes.extend_from_slice(&0.1f64.to_le_bytes());
            bytes.extend_from_slice(&0.0f64.to_le_bytes());
            bytes.push(0);
            bytes.extend_from_slice(&count.to_le_bytes());
            for _ in 0..count {
                bytes.extend_from_slice(&3u64.to_le_bytes());
            }
            bytes.extend_from_slice(b"WGTS");
            bytes.extend_from_slice(b"BIAS");
            let result = Network::read_from(Cursor::new(bytes));
            assert!(matches!(result, Err(NnError::Model(_))), "{count} layers");
        }
    }

    #[test]
    fn save_and_load_through_a_file() {
        let net = sample();
        let path = std::env::temp_dir().join(format!("ferrite-mlp-{}.bin", std::process::id()));
        net.save(&path).unwrap();
        let loaded = Network::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded.learning_rate(), 0.25);
        assert_eq!(loaded.lambda(), 1.5);
    }
}
