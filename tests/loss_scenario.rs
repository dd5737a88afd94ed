use approx::assert_abs_diff_eq;
use retrograd::ops::{log_softmax_op, nll_loss_op};
use retrograd::utils::testing::check_variable_near;
use retrograd::{check_grad, Variable};

mod common;
use common::tracked_leaf;

const IGNORE: i64 = -100;

#[test]
fn test_classification_pipeline_with_ignored_row() {
    // The last row's target is ignored, so the mean runs over two rows only.
    let x = tracked_leaf(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6], vec![3, 2]);
    let log_probs = log_softmax_op(&x).unwrap();
    let loss = nll_loss_op(&log_probs, &[1, 0, IGNORE], IGNORE).unwrap();

    assert_eq!(loss.rank(), 0);
    assert_abs_diff_eq!(loss.to_host()[0], 0.694397, epsilon = 1e-4);

    loss.backward(None).unwrap();
    check_variable_near(
        &x.grad().unwrap(),
        &[3, 2],
        &[0.237511, -0.237511, -0.262489, 0.262489, 0.0, 0.0],
        1e-4,
    );
    // The ignored row contributes nothing to either loss or gradient.
    let grad = x.grad().unwrap().to_host();
    assert_eq!(&grad[4..], &[0.0, 0.0]);
}

#[test]
fn test_loss_gradients_match_finite_differences() {
    let x = tracked_leaf(vec![0.4, -0.3, 1.1, 0.2, -0.8, 0.6], vec![3, 2]);
    let output_grad = Variable::new(vec![1.0f32], vec![]).unwrap();
    check_grad(
        |inputs| {
            let log_probs = log_softmax_op(&inputs[0])?;
            nll_loss_op(&log_probs, &[1, 0, IGNORE], IGNORE)
        },
        &[x],
        &output_grad,
        1e-3,
        1e-2,
    )
    .unwrap();
}

#[test]
fn test_repeated_backward_accumulates_loss_gradient() {
    let x = tracked_leaf(vec![0.1, 0.2], vec![1, 2]);
    let first = nll_loss_op(&log_softmax_op(&x).unwrap(), &[0], IGNORE).unwrap();
    first.backward(None).unwrap();
    let after_first = x.grad().unwrap().to_host();

    // A second, independent graph over the same leaf adds on top.
    let second = nll_loss_op(&log_softmax_op(&x).unwrap(), &[0], IGNORE).unwrap();
    second.backward(None).unwrap();
    let after_second = x.grad().unwrap().to_host();
    for (a, b) in after_first.iter().zip(after_second.iter()) {
        assert_abs_diff_eq!(2.0 * a, *b, epsilon = 1e-5);
    }
}
