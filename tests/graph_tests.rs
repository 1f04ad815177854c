use retrograd::{Graph, NodeId, Session, Tensor};

fn tensor(dims: &[usize], values: Vec<f32>) -> Tensor {
    Tensor::from_vec(dims, values).unwrap()
}

#[test]
fn test_elementwise_mul_with_broadcasting() {
    let mut graph = Graph::with_defaults();
    let a = graph.constant(tensor(&[2, 3], vec![3.0, 8.0, 2.0, 5.0, 1.0, 6.0]));
    let b = graph.constant(tensor(&[1, 3], vec![3.0, 2.0, 1.0]));
    let c = graph.mul(&[a, b]).unwrap();

    graph.compute(&[], &[c]).unwrap();
    assert_eq!(
        graph.get_output(c).unwrap(),
        tensor(&[2, 3], vec![9.0, 16.0, 2.0, 15.0, 2.0, 6.0])
    );

    graph.gradient().unwrap();
    assert_eq!(
        graph.get_gradient(a).unwrap(),
        tensor(&[2, 3], vec![3.0, 2.0, 1.0, 3.0, 2.0, 1.0])
    );
    assert_eq!(
        graph.get_gradient(b).unwrap(),
        tensor(&[1, 3], vec![8.0, 9.0, 8.0])
    );
}

#[test]
fn test_elementwise_add_with_broadcasting() {
    let mut graph = Graph::with_defaults();
    let a = graph.constant(tensor(&[2, 3], vec![3.0, 8.0, 2.0, 5.0, 1.0, 6.0]));
    let b = graph.constant(tensor(&[1, 3], vec![3.0, 2.0, 1.0]));
    let c = graph.add(&[a, b]).unwrap();

    graph.compute(&[], &[c]).unwrap();
    assert_eq!(
        graph.get_output(c).unwrap(),
        tensor(&[2, 3], vec![6.0, 10.0, 3.0, 8.0, 3.0, 7.0])
    );

    graph.gradient().unwrap();
    assert_eq!(graph.get_gradient(a).unwrap(), Tensor::ones(&[2, 3]).unwrap());
    assert_eq!(
        graph.get_gradient(b).unwrap(),
        tensor(&[1, 3], vec![2.0, 2.0, 2.0])
    );
}

#[test]
fn test_matmul_untransposed() {
    let mut graph = Graph::with_defaults();
    let a = graph.constant(tensor(&[2, 3], vec![2.0, 1.0, 4.0, 0.0, 1.0, 1.0]));
    let b = graph.constant(tensor(
        &[3, 4],
        vec![6.0, 3.0, -1.0, 0.0, 1.0, 1.0, 0.0, 4.0, -2.0, 5.0, 0.0, 2.0],
    ));
    let c = graph.matmul(false, false, a, b).unwrap();

    graph.compute(&[], &[c]).unwrap();
    assert_eq!(
        graph.get_output(c).unwrap(),
        tensor(&[2, 4], vec![5.0, 27.0, -2.0, 12.0, -1.0, 6.0, 0.0, 6.0])
    );

    graph.gradient().unwrap();
    assert_eq!(
        graph.get_gradient(a).unwrap(),
        tensor(&[2, 3], vec![8.0, 6.0, 5.0, 8.0, 6.0, 5.0])
    );
    assert_eq!(
        graph.get_gradient(b).unwrap(),
        tensor(
            &[3, 4],
            vec![2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 5.0, 5.0, 5.0, 5.0]
        )
    );
}

#[test]
fn test_matmul_with_a_transposed() {
    let mut graph = Graph::with_defaults();
    // Same product as the untransposed case, with A stored transposed.
    let a_t = graph.constant(tensor(&[3, 2], vec![2.0, 0.0, 1.0, 1.0, 4.0, 1.0]));
    let b = graph.constant(tensor(
        &[3, 4],
        vec![6.0, 3.0, -1.0, 0.0, 1.0, 1.0, 0.0, 4.0, -2.0, 5.0, 0.0, 2.0],
    ));
    let c = graph.matmul(true, false, a_t, b).unwrap();

    graph.compute(&[], &[c]).unwrap();
    assert_eq!(
        graph.get_output(c).unwrap(),
        tensor(&[2, 4], vec![5.0, 27.0, -2.0, 12.0, -1.0, 6.0, 0.0, 6.0])
    );

    graph.gradient().unwrap();
    // The gradient lands in the stored (transposed) layout.
    assert_eq!(
        graph.get_gradient(a_t).unwrap(),
        tensor(&[3, 2], vec![8.0, 8.0, 6.0, 6.0, 5.0, 5.0])
    );
    assert_eq!(
        graph.get_gradient(b).unwrap(),
        tensor(
            &[3, 4],
            vec![2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 5.0, 5.0, 5.0, 5.0]
        )
    );
}

#[test]
fn test_matmul_with_b_transposed() {
    let mut graph = Graph::with_defaults();
    let a = graph.constant(tensor(&[2, 3], vec![2.0, 1.0, 4.0, 0.0, 1.0, 1.0]));
    let b_t = graph.constant(tensor(
        &[4, 3],
        vec![6.0, 1.0, -2.0, 3.0, 1.0, 5.0, -1.0, 0.0, 0.0, 0.0, 4.0, 2.0],
    ));
    let c = graph.matmul(false, true, a, b_t).unwrap();

    graph.compute(&[], &[c]).unwrap();
    assert_eq!(
        graph.get_output(c).unwrap(),
        tensor(&[2, 4], vec![5.0, 27.0, -2.0, 12.0, -1.0, 6.0, 0.0, 6.0])
    );

    graph.gradient().unwrap();
    assert_eq!(
        graph.get_gradient(a).unwrap(),
        tensor(&[2, 3], vec![8.0, 6.0, 5.0, 8.0, 6.0, 5.0])
    );
    assert_eq!(
        graph.get_gradient(b_t).unwrap(),
        tensor(
            &[4, 3],
            vec![2.0, 2.0, 5.0, 2.0, 2.0, 5.0, 2.0, 2.0, 5.0, 2.0, 2.0, 5.0]
        )
    );
}

#[test]
fn test_placeholder_binding() {
    let mut graph = Graph::with_defaults();
    let x = graph.placeholder();
    let w = graph.constant(tensor(&[2], vec![3.0, 4.0]));
    let y = graph.mul(&[x, w]).unwrap();

    graph
        .compute(&[(x, tensor(&[2], vec![1.0, 2.0]))], &[y])
        .unwrap();
    assert_eq!(graph.get_output(y).unwrap(), tensor(&[2], vec![3.0, 8.0]));

    graph.gradient().unwrap();
    assert_eq!(graph.get_gradient(x).unwrap(), tensor(&[2], vec![3.0, 4.0]));

    // Rebinding changes the result; the plan is reused.
    graph
        .compute(&[(x, tensor(&[2], vec![10.0, 10.0]))], &[y])
        .unwrap();
    assert_eq!(graph.get_output(y).unwrap(), tensor(&[2], vec![30.0, 40.0]));
}

#[test]
fn test_compute_is_idempotent() {
    let mut graph = Graph::with_defaults();
    let a = graph.scalar(2.0);
    let b = graph.scalar(3.0);
    let c = graph.mul(&[a, b]).unwrap();

    graph.compute(&[], &[c]).unwrap();
    let first = graph.get_output(c).unwrap();
    graph.compute(&[], &[c]).unwrap();
    assert_eq!(graph.get_output(c).unwrap(), first);

    // Clearing the store drops the pass results without touching the plan.
    graph.results().clear();
    assert!(graph.get_output(c).is_none());
    graph.compute(&[], &[c]).unwrap();
    assert_eq!(graph.get_output(c).unwrap(), first);
}

#[test]
fn test_commutative_child_order() {
    let run = |swap: bool| {
        let mut graph = Graph::with_defaults();
        let a = graph.constant(tensor(&[2], vec![3.0, 5.0]));
        let b = graph.constant(tensor(&[2], vec![7.0, 11.0]));
        let children = if swap { [b, a] } else { [a, b] };
        let c = graph.mul(&children).unwrap();
        graph.compute(&[], &[c]).unwrap();
        graph.gradient().unwrap();
        (
            graph.get_output(c).unwrap(),
            graph.get_gradient(a).unwrap(),
            graph.get_gradient(b).unwrap(),
        )
    };
    assert_eq!(run(false), run(true));
}

#[test]
fn test_separate_trees_in_one_graph() {
    let mut graph = Graph::with_defaults();
    let a1 = graph.constant(tensor(&[2], vec![1.0, 2.0]));
    let b1 = graph.constant(tensor(&[2], vec![3.0, 4.0]));
    let t1 = graph.add(&[a1, b1]).unwrap();

    let a2 = graph.constant(tensor(&[2], vec![10.0, 20.0]));
    let b2 = graph.constant(tensor(&[2], vec![30.0, 40.0]));
    let t2 = graph.add(&[a2, b2]).unwrap();

    graph.compute(&[], &[t1, t2]).unwrap();
    assert_eq!(graph.get_output(t1).unwrap(), tensor(&[2], vec![4.0, 6.0]));
    assert_eq!(
        graph.get_output(t2).unwrap(),
        tensor(&[2], vec![40.0, 60.0])
    );

    graph.gradient().unwrap();
    assert_eq!(graph.get_gradient(a1).unwrap(), Tensor::ones(&[2]).unwrap());
    assert_eq!(graph.get_gradient(b2).unwrap(), Tensor::ones(&[2]).unwrap());
}

#[test]
fn test_unused_nodes_sort_out() {
    let mut graph = Graph::with_defaults();
    let l1 = graph.constant(tensor(&[2], vec![1.0, 2.0]));
    let l2 = graph.constant(tensor(&[2], vec![3.0, 4.0]));
    let m1 = graph.add(&[l1, l2]).unwrap();
    let m2 = graph.mul(&[l1, l2]).unwrap();
    let m3 = graph.mul(&[m1, m2]).unwrap();
    let x = graph.add(&[m3, l1]).unwrap();
    let y = graph.mul(&[m3, l2]).unwrap();
    // Unrelated consumer of X's children; never requested.
    let z = graph.add(&[m1, l2]).unwrap();

    graph.compute(&[], &[x, y]).unwrap();

    let plan = graph.execution_plan().to_vec();
    assert_eq!(plan.len(), 7);
    assert!(!plan.contains(&z));

    let position = |id: NodeId| plan.iter().position(|&p| p == id).unwrap();

    // Leaves first, then the three intermediates, then the end nodes.
    let mut leaves = [position(l1), position(l2)];
    leaves.sort_unstable();
    assert_eq!(leaves, [0, 1]);

    let mut mids = [position(m1), position(m2), position(m3)];
    mids.sort_unstable();
    assert_eq!(mids, [2, 3, 4]);
    assert!(position(m3) > position(m1));
    assert!(position(m3) > position(m2));

    let mut ends = [position(x), position(y)];
    ends.sort_unstable();
    assert_eq!(ends, [5, 6]);

    // The unrequested node was never evaluated.
    assert!(graph.get_output(z).is_none());
    graph.gradient().unwrap();
    assert!(graph.get_gradient(z).is_none());
}

#[test]
fn test_children_precede_consumers_in_plan() {
    let mut graph = Graph::with_defaults();
    let a = graph.scalar(1.0);
    let b = graph.scalar(2.0);
    let c = graph.add(&[a, b]).unwrap();
    let d = graph.mul(&[c, a]).unwrap();
    let e = graph.add(&[d, c]).unwrap();

    graph.compute(&[], &[e]).unwrap();
    let plan = graph.execution_plan();
    let position = |id: NodeId| plan.iter().position(|&p| p == id).unwrap();
    for &(child, consumer) in &[(a, c), (b, c), (c, d), (a, d), (d, e), (c, e)] {
        assert!(position(child) < position(consumer));
    }

    // Children are kept in definition order; consumers in registration order.
    let node_c = graph.node(c).unwrap();
    assert_eq!(node_c.children, vec![a, b]);
    assert_eq!(node_c.consumers, vec![d, e]);
    assert_eq!(node_c.name(), "Add");
}

#[test]
fn test_gradients_only_for_last_cone() {
    let mut graph = Graph::with_defaults();
    let a = graph.scalar(1.0);
    let b = graph.scalar(2.0);
    let used = graph.add(&[a, b]).unwrap();
    let unused = graph.mul(&[a, b]).unwrap();

    graph.compute(&[], &[used]).unwrap();
    graph.gradient().unwrap();

    assert!(graph.get_gradient(used).is_some());
    assert!(graph.get_gradient(a).is_some());
    assert!(graph.get_gradient(unused).is_none());
}

#[test]
fn test_session_graph_management() {
    let mut session = Session::with_threads(2);

    let a = session.current_mut().scalar(1.0);
    let b = session.current_mut().scalar(2.0);
    let sum = session.current_mut().add(&[a, b]).unwrap();

    let second = session.new_graph();
    assert_eq!(session.len(), 2);
    session.set_current(second).unwrap();
    let p = session.current_mut().placeholder();
    let doubled = session.current_mut().add(&[p, p]).unwrap();

    session
        .current_mut()
        .compute(&[(p, Tensor::scalar(4.0))], &[doubled])
        .unwrap();
    assert_eq!(
        session.current().get_output(doubled).unwrap(),
        Tensor::scalar(8.0)
    );

    // The first graph still works independently.
    let first = retrograd::GraphId(0);
    session.set_current(first).unwrap();
    session.current_mut().compute(&[], &[sum]).unwrap();
    assert_eq!(
        session.current().get_output(sum).unwrap(),
        Tensor::scalar(3.0)
    );

    session.clear_all();
    assert_eq!(session.len(), 1);
    assert!(session.current().is_empty());
    assert!(session.set_current(second).is_err());
}

#[test]
fn test_nary_ops_through_the_graph() {
    let mut graph = Graph::with_defaults();
    let a = graph.scalar(2.0);
    let b = graph.scalar(3.0);
    let c = graph.scalar(4.0);
    let sum = graph.add(&[a, b, c]).unwrap();
    let product = graph.mul(&[a, b, c]).unwrap();

    graph.compute(&[], &[sum, product]).unwrap();
    assert_eq!(graph.get_output(sum).unwrap(), Tensor::scalar(9.0));
    assert_eq!(graph.get_output(product).unwrap(), Tensor::scalar(24.0));

    graph.gradient().unwrap();
    // d(sum)/da + d(product)/da = 1 + b*c = 13.
    assert_eq!(graph.get_gradient(a).unwrap(), Tensor::scalar(13.0));
    assert_eq!(graph.get_gradient(b).unwrap(), Tensor::scalar(9.0));
    assert_eq!(graph.get_gradient(c).unwrap(), Tensor::scalar(7.0));
}

#[test]
fn test_gradient_is_repeatable() {
    let mut graph = Graph::with_defaults();
    let a = graph.scalar(3.0);
    let b = graph.scalar(5.0);
    let c = graph.mul(&[a, b]).unwrap();

    graph.compute(&[], &[c]).unwrap();
    graph.gradient().unwrap();
    let first = graph.get_gradient(a).unwrap();
    graph.gradient().unwrap();
    assert_eq!(graph.get_gradient(a).unwrap(), first);
    assert_eq!(first, Tensor::scalar(5.0));
}

#[test]
fn test_wide_fanout_graph() {
    // Many independent branches off one root, merged at the end; exercises
    // concurrent dispatch across the pool.
    let mut graph = Graph::with_defaults();
    let root = graph.scalar(1.0);
    let mut branches = Vec::new();
    for i in 0..40 {
        let weight = graph.scalar(i as f32);
        let scaled = graph.mul(&[root, weight]).unwrap();
        branches.push(scaled);
    }
    let total = graph.add(&branches).unwrap();

    graph.compute(&[], &[total]).unwrap();
    let expected: f32 = (0..40).map(|i| i as f32).sum();
    assert_eq!(graph.get_output(total).unwrap(), Tensor::scalar(expected));

    graph.gradient().unwrap();
    // d(total)/d(root) = sum of all weights.
    assert_eq!(graph.get_gradient(root).unwrap(), Tensor::scalar(expected));
}

#[test]
fn test_larger_mixed_graph() {
    let mut graph = Graph::with_defaults();
    // y = (A·B + C) ⊙ D with broadcasting on the addition.
    let a = graph.constant(tensor(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]));
    let b = graph.constant(tensor(&[2, 2], vec![5.0, 6.0, 7.0, 8.0]));
    let c = graph.constant(tensor(&[1, 2], vec![1.0, -1.0]));
    let d = graph.constant(tensor(&[2, 2], vec![2.0, 2.0, 2.0, 2.0]));

    let ab = graph.matmul(false, false, a, b).unwrap();
    let sum = graph.add(&[ab, c]).unwrap();
    let y = graph.mul(&[sum, d]).unwrap();

    graph.compute(&[], &[y]).unwrap();
    // A·B = [[19, 22], [43, 50]]; +C = [[20, 21], [44, 49]]; ⊙D doubles.
    assert_eq!(
        graph.get_output(y).unwrap(),
        tensor(&[2, 2], vec![40.0, 42.0, 88.0, 98.0])
    );

    graph.gradient().unwrap();
    // d(y)/d(sum) = D = 2 everywhere, folded to C's broadcast shape.
    assert_eq!(
        graph.get_gradient(c).unwrap(),
        tensor(&[1, 2], vec![4.0, 4.0])
    );
    // d(y)/d(ab) = 2; grad(A) = 2·ones · Bᵀ.
    assert_eq!(
        graph.get_gradient(a).unwrap(),
        tensor(&[2, 2], vec![22.0, 30.0, 22.0, 30.0])
    );
}
