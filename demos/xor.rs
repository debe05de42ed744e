use ferrite_mlp::{CostFunction, Matrix, Network, Orientation, Result};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let mut network = Network::new(&[2, 3, 1], 2.0, 0.0, true, CostFunction::Quadratic)?;

    // One sample per column.
    let inputs = Matrix::from_rows(vec![
        vec![1.0, 1.0, 0.0, 0.0],
        vec![0.0, 1.0, 1.0, 0.0],
    ])?;
    let expected = Matrix::from_rows(vec![vec![1.0, 0.0, 1.0, 0.0]])?;

    let epochs = 10000;
    for epoch in 0..epochs {
        let loss = network.batch_train(&inputs, &expected, 4)?;
        if epoch % 1000 == 0 {
            println!("Epoch {epoch}: loss = {loss:.6}");
        }
    }

    // The output layer has a single neuron, so read the raw sigmoid activation
    // rather than the softmax used by `inference`.
    network.forward(&inputs)?;
    let output = network.output()?;
    for j in 0..inputs.cols() {
        let sample = inputs.get_column(j)?;
        println!(
            "Input: [{}, {}] -> Output: {:.4}",
            sample.get(0, 0)?,
            sample.get(1, 0)?,
            output.max_along(Orientation::Column, j)?
        );
    }
    Ok(())
}
