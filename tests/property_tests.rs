//! Property-based tests using proptest.
//!
//! These tests verify invariants of quantization, pruning, and evaluation.

use nanoquant::autograd::{clear_graph, get_grad, Tensor};
use nanoquant::nn::{KLDivLoss, Linear, Sequential, WeightedLayer};
use nanoquant::pruning::{prune_count, prune_layer, PruningMethod, RepruningPolicy};
use nanoquant::quantization::{fake_quantize, init_scale, QuantGrid};
use nanoquant::training::{evaluate, Batch, Classifier, Device};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn weights_strategy(len: usize) -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-10.0f32..10.0, len)
}

fn levels_strategy() -> impl Strategy<Value = u32> {
    prop_oneof![Just(2u32), Just(4), Just(16), Just(256), 3u32..64]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Fake quantization properties
    #[test]
    fn quantized_values_lie_on_grid(w in weights_strategy(16), levels in levels_strategy(), s in 0.01f32..2.0) {
        let grid = QuantGrid::new(levels).expect("levels >= 2");
        let q = fake_quantize(&Tensor::from_slice(&w), &Tensor::scalar(s), grid);
        for &v in q.data() {
            let k = v / s;
            prop_assert!((k - k.round()).abs() < 1e-3, "{v} is not a multiple of {s}");
            prop_assert!(k >= grid.qmin() - 1e-3 && k <= grid.qmax() + 1e-3);
        }
    }

    #[test]
    fn in_range_rounding_error_is_half_step(w in weights_strategy(16), levels in levels_strategy()) {
        let grid = QuantGrid::new(levels).expect("levels >= 2");
        let weight = Tensor::from_slice(&w);
        let s = init_scale(&weight, grid);
        let q = fake_quantize(&weight, &Tensor::scalar(s), grid);
        for (&orig, &quant) in w.iter().zip(q.data()) {
            let v = orig / s;
            if v > grid.qmin() && v < grid.qmax() {
                prop_assert!((orig - quant).abs() <= s / 2.0 + 1e-4);
            }
        }
    }

    #[test]
    fn ste_weight_gradient_is_range_indicator(w in weights_strategy(12), s in 0.05f32..1.0) {
        clear_graph();
        let grid = QuantGrid::new(16).expect("valid");
        let weight = Tensor::from_slice(&w).requires_grad();
        let scale = Tensor::scalar(s).requires_grad();
        fake_quantize(&weight, &scale, grid).sum().backward();

        let dw = get_grad(weight.id()).expect("weight gradient");
        for (&orig, &g) in w.iter().zip(dw.data()) {
            let r = (orig / s).round();
            let expected = if r >= grid.qmin() && r <= grid.qmax() { 1.0 } else { 0.0 };
            prop_assert_eq!(g, expected);
        }
        prop_assert!(get_grad(scale.id()).expect("scale gradient").is_finite());
    }

    #[test]
    fn kl_divergence_is_finite_and_non_negative(a in weights_strategy(6), b in weights_strategy(6)) {
        let full = Tensor::new(&a, &[2, 3]).log_softmax();
        let quantized = Tensor::new(&b, &[2, 3]).softmax().add_scalar(1e-8);
        let loss = KLDivLoss::new().forward(&full, &quantized).item();
        prop_assert!(loss.is_finite());
        prop_assert!(loss >= 0.0);
    }

    // Pruning properties
    #[test]
    fn l1_prunes_exact_count_of_smallest(w in weights_strategy(20), amount in 0.0f32..=1.0) {
        let weight = Tensor::new(&w, &[4, 5]);
        let mut layer = Linear::from_weights(weight, None);
        let nonzero = w.iter().filter(|&&v| v != 0.0).count();
        let mut rng = StdRng::seed_from_u64(0);

        let mask = prune_layer(&mut layer, amount, PruningMethod::L1Unstructured, RepruningPolicy::Additive, &mut rng)
            .expect("prune");

        let newly = (0..w.len()).filter(|&i| !mask.is_kept(i) && w[i] != 0.0).count();
        prop_assert_eq!(newly, prune_count(amount, nonzero));

        let max_pruned = (0..w.len()).filter(|&i| !mask.is_kept(i)).map(|i| w[i].abs()).fold(0.0f32, f32::max);
        let min_kept = (0..w.len()).filter(|&i| mask.is_kept(i) && w[i] != 0.0).map(|i| w[i].abs()).fold(f32::INFINITY, f32::min);
        prop_assert!(max_pruned <= min_kept);
    }

    #[test]
    fn random_prune_count_matches(w in weights_strategy(20), amount in 0.0f32..=1.0, seed in any::<u64>()) {
        let mut layer = Linear::from_weights(Tensor::new(&w, &[4, 5]), None);
        let nonzero = w.iter().filter(|&&v| v != 0.0).count();
        let mut rng = StdRng::seed_from_u64(seed);

        prune_layer(&mut layer, amount, PruningMethod::RandomUnstructured, RepruningPolicy::Additive, &mut rng)
            .expect("prune");

        let zeros = layer.effective_weight().data().iter().filter(|&&v| v == 0.0).count();
        prop_assert_eq!(zeros, (w.len() - nonzero) + prune_count(amount, nonzero));
    }

    #[test]
    fn zero_amount_keeps_weights_bit_identical(w in weights_strategy(12)) {
        let mut layer = Linear::from_weights(Tensor::new(&w, &[3, 4]), None);
        let mut rng = StdRng::seed_from_u64(1);
        prune_layer(&mut layer, 0.0, PruningMethod::L1Unstructured, RepruningPolicy::Additive, &mut rng)
            .expect("prune");

        for (&orig, &eff) in w.iter().zip(layer.effective_weight().data()) {
            prop_assert_eq!(orig.to_bits(), eff.to_bits());
        }
    }

    // Evaluation properties
    #[test]
    fn accuracy_is_a_fraction(x in weights_strategy(12), labels in proptest::collection::vec(0u8..3, 4)) {
        let mut model = Classifier::new(Sequential::new().add_named("fc", Linear::with_seed(3, 3, Some(2))), "x");
        let labels: Vec<f32> = labels.into_iter().map(f32::from).collect();
        let mut src = vec![Batch::new()
            .with("x", Tensor::new(&x, &[4, 3]))
            .with("label", Tensor::from_slice(&labels))];

        let metrics = evaluate(&mut model, &mut src, Device::Cpu, None).expect("evaluate");
        prop_assert_eq!(metrics.examples, 4);
        prop_assert!((0.0..=1.0).contains(&metrics.accuracy));
    }
}
