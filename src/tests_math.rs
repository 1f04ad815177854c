use crate::{Graph, Tensor};

#[test]
fn test_chained_scalar_flow() {
    let mut graph = Graph::with_defaults();

    // e = (a + b) * (b + one)
    let a = graph.scalar(2.0);
    let b = graph.scalar(1.0);
    let one = graph.scalar(1.0);
    let c = graph.add(&[a, b]).unwrap();
    let d = graph.add(&[b, one]).unwrap();
    let e = graph.mul(&[c, d]).unwrap();

    graph.compute(&[], &[e]).unwrap();
    assert_eq!(graph.get_output(e).unwrap(), Tensor::scalar(6.0));

    graph.gradient().unwrap();

    // de/da = d = 2; de/db = d + c = 5 (b reaches e through both branches)
    assert_eq!(graph.get_gradient(a).unwrap(), Tensor::scalar(2.0));
    assert_eq!(graph.get_gradient(b).unwrap(), Tensor::scalar(5.0));
    assert_eq!(graph.get_gradient(one).unwrap(), Tensor::scalar(3.0));
    assert_eq!(graph.get_gradient(e).unwrap(), Tensor::scalar(1.0));
}

#[test]
fn test_square_via_repeated_child() {
    let mut graph = Graph::with_defaults();

    // y = x * x: both positional contributions must accumulate.
    let x = graph.scalar(3.0);
    let y = graph.mul(&[x, x]).unwrap();

    graph.compute(&[], &[y]).unwrap();
    assert_eq!(graph.get_output(y).unwrap(), Tensor::scalar(9.0));

    graph.gradient().unwrap();
    assert_eq!(graph.get_gradient(x).unwrap(), Tensor::scalar(6.0));
}

#[test]
fn test_mul_gradient_with_zero_factor() {
    let mut graph = Graph::with_defaults();

    let a = graph.constant(Tensor::from_vec(&[3], vec![0.0, 2.0, 5.0]).unwrap());
    let b = graph.constant(Tensor::from_vec(&[3], vec![4.0, 0.0, 1.0]).unwrap());
    let c = graph.mul(&[a, b]).unwrap();

    graph.compute(&[], &[c]).unwrap();
    graph.gradient().unwrap();

    // Gradients stay finite when a factor is zero.
    assert_eq!(
        graph.get_gradient(a).unwrap(),
        Tensor::from_vec(&[3], vec![4.0, 0.0, 1.0]).unwrap()
    );
    assert_eq!(
        graph.get_gradient(b).unwrap(),
        Tensor::from_vec(&[3], vec![0.0, 2.0, 5.0]).unwrap()
    );
}

#[test]
fn test_deep_chain_accumulation() {
    let mut graph = Graph::with_defaults();

    // y = ((x + x) + x) + x; dy/dx = 4 through four paths.
    let x = graph.scalar(1.5);
    let mut acc = graph.add(&[x, x]).unwrap();
    acc = graph.add(&[acc, x]).unwrap();
    let y = graph.add(&[acc, x]).unwrap();

    graph.compute(&[], &[y]).unwrap();
    assert_eq!(graph.get_output(y).unwrap(), Tensor::scalar(6.0));

    graph.gradient().unwrap();
    assert_eq!(graph.get_gradient(x).unwrap(), Tensor::scalar(4.0));
}
