use retrograd::{Session, Tensor};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    println!("retrograd pipeline demo: y = (x·W + b) through a session");

    let mut session = Session::new();
    let graph = session.default_graph();

    let x = graph.placeholder();
    let w = graph.constant(Tensor::random(&[3, 4])?);
    let bias = graph.constant(Tensor::random(&[1, 4])?);
    let xw = graph.matmul(false, false, x, w).unwrap();
    // The bias row broadcasts across the rows of xw.
    let y = graph.add(&[xw, bias]).unwrap();

    let input = Tensor::from_vec(&[2, 3], vec![1.0, -1.0, 0.5, 0.25, 2.0, -0.75])?;
    graph.compute(&[(x, input)], &[y])?;
    println!("y = {:?}", graph.get_output(y).unwrap().values());

    graph.gradient()?;
    println!("dy/dW = {:?}", graph.get_gradient(w).unwrap().values());
    println!("dy/dx = {:?}", graph.get_gradient(x).unwrap().values());

    Ok(())
}
