use retrograd::{Graph, Tensor};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    println!("retrograd autodiff demo: broadcast gradients");

    let mut graph = Graph::with_defaults();

    // c = a * b with b broadcast along the rows of a
    let a = graph.constant(Tensor::from_vec(
        &[2, 3],
        vec![3.0, 8.0, 2.0, 5.0, 1.0, 6.0],
    )?);
    let b = graph.constant(Tensor::from_vec(&[1, 3], vec![3.0, 2.0, 1.0])?);
    let c = graph.mul(&[a, b]).unwrap();

    println!("--- Forward pass ---");
    graph.compute(&[], &[c])?;
    println!("c = {:?}", graph.get_output(c).unwrap().values());

    println!("--- Gradient pass ---");
    graph.gradient()?;
    println!("dc/da = {:?}", graph.get_gradient(a).unwrap().values());
    println!("dc/db = {:?}", graph.get_gradient(b).unwrap().values());

    Ok(())
}
