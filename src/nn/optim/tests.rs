use super::*;
use crate::autograd::clear_graph;

#[test]
fn test_sgd_basic() {
    clear_graph();
    let mut param = Tensor::from_slice(&[1.0, 2.0, 3.0]).requires_grad();

    param.pow(2.0).sum().backward();
    let grad = get_grad(param.id()).expect("Should have gradient");
    assert_eq!(grad.data(), &[2.0, 4.0, 6.0]);

    let mut sgd = SGD::new(&[&param], 0.1);
    sgd.step_with_params(&mut [&mut param]);

    // [1, 2, 3] - 0.1 * [2, 4, 6]
    let expected = [0.8, 1.6, 2.4];
    for (p, e) in param.data().iter().zip(expected.iter()) {
        assert!((p - e).abs() < 1e-5, "Expected {e}, got {p}");
    }
}

#[test]
fn test_sgd_with_momentum() {
    clear_graph();
    let mut param = Tensor::from_slice(&[1.0]).requires_grad();
    let mut sgd = SGD::with_momentum(&[&param], 0.1, 0.9);

    param.pow(2.0).sum().backward();
    sgd.step_with_params(&mut [&mut param]);
    // v = 2.0, param = 1.0 - 0.2
    assert!((param.data()[0] - 0.8).abs() < 1e-5);

    clear_graph();
    param.pow(2.0).sum().backward();
    sgd.step_with_params(&mut [&mut param]);
    // grad = 1.6, v = 0.9 * 2.0 + 1.6 = 3.4, param = 0.8 - 0.34
    assert!((param.data()[0] - 0.46).abs() < 1e-5);
}

#[test]
fn test_sgd_weight_decay() {
    clear_graph();
    let mut param = Tensor::from_slice(&[1.0]).requires_grad();
    param.mul_scalar(0.0).sum().backward();

    let mut sgd = SGD::new(&[&param], 0.1).weight_decay(0.5);
    sgd.step_with_params(&mut [&mut param]);
    // g = 0 + 0.5 * 1.0
    assert!((param.data()[0] - 0.95).abs() < 1e-6);
}

#[test]
fn test_adam_first_step_is_lr_sized() {
    clear_graph();
    let mut param = Tensor::from_slice(&[1.0, -2.0]).requires_grad();
    param.pow(2.0).sum().backward();

    let mut adam = Adam::new(&[&param], 0.1);
    adam.step_with_params(&mut [&mut param]);

    // Bias-corrected first step moves each entry by ~lr against its gradient sign.
    assert!((param.data()[0] - 0.9).abs() < 1e-4);
    assert!((param.data()[1] + 1.9).abs() < 1e-4);
    assert_eq!(adam.steps(), 1);
}

#[test]
fn test_adam_converges_on_quadratic() {
    let mut param = Tensor::from_slice(&[3.0]).requires_grad();
    let mut adam = Adam::new(&[&param], 0.1);

    for _ in 0..300 {
        clear_graph();
        param.pow(2.0).sum().backward();
        adam.step_with_params(&mut [&mut param]);
    }
    assert!(param.data()[0].abs() < 0.1, "got {}", param.data()[0]);
}

#[test]
fn test_adam_state_resets_when_param_size_changes() {
    clear_graph();
    let mut small = Tensor::from_slice(&[1.0]).requires_grad();
    small.sum().backward();
    let mut adam = Adam::new(&[&small], 0.1);
    adam.step_with_params(&mut [&mut small]);

    clear_graph();
    let mut large = Tensor::from_slice(&[1.0, 1.0, 1.0]).requires_grad();
    large.sum().backward();
    adam.step_with_params(&mut [&mut large]);
    assert!(large.data().iter().all(|&v| v < 1.0));
}

#[test]
fn test_adamw_decoupled_decay_without_gradient_signal() {
    clear_graph();
    let mut param = Tensor::from_slice(&[2.0]).requires_grad();
    param.mul_scalar(0.0).sum().backward();

    let mut adamw = AdamW::new(&[&param], 0.1).weight_decay(0.5);
    adamw.step_with_params(&mut [&mut param]);
    // Zero gradient: only the decay term acts.
    assert!((param.data()[0] - 1.9).abs() < 1e-5);
}

#[test]
fn test_param_without_grad_is_untouched() {
    clear_graph();
    let mut param = Tensor::from_slice(&[1.0]).requires_grad();
    let mut adam = Adam::new(&[&param], 0.1);
    adam.step_with_params(&mut [&mut param]);
    assert_eq!(param.data(), &[1.0]);
}

#[test]
fn test_zero_grad_clears_gradients() {
    clear_graph();
    let param = Tensor::from_slice(&[1.0, 2.0]).requires_grad();
    param.sum().backward();
    assert!(get_grad(param.id()).is_some());

    let mut sgd = SGD::new(&[&param], 0.1);
    sgd.zero_grad();
    assert!(get_grad(param.id()).is_none());
}

#[test]
fn test_set_lr() {
    let param = Tensor::from_slice(&[1.0]);
    let mut opts: Vec<Box<dyn Optimizer>> = vec![
        Box::new(SGD::new(&[&param], 0.1)),
        Box::new(Adam::new(&[&param], 0.1)),
        Box::new(AdamW::new(&[&param], 0.1)),
    ];
    for opt in &mut opts {
        opt.set_lr(0.05);
        assert!((opt.lr() - 0.05).abs() < 1e-9);
    }
}
