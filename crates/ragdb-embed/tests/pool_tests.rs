use candle_core::{DType, Device, Tensor};
use ragdb_embed::masked_mean_l2;

#[test]
fn masked_mean_ignores_padding_and_normalizes() {
    let dev = Device::Cpu;
    // One sequence, two tokens, hidden dim 4; the second token is padding.
    let h = Tensor::from_slice(&[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0], (1, 2, 4), &dev).unwrap();
    let mask = Tensor::from_slice(&[1i64, 0i64], (1, 2), &dev).unwrap().to_dtype(DType::F32).unwrap();
    let out: Vec<Vec<f32>> = masked_mean_l2(&h, &mask).unwrap().to_vec2().unwrap();
    let norm = 30f32.sqrt();
    for (a, b) in out[0].iter().zip([1.0 / norm, 2.0 / norm, 3.0 / norm, 4.0 / norm]) {
        assert!((a - b).abs() < 1e-5, "a={a} b={b}");
    }
}

#[test]
fn masked_mean_averages_each_row_separately() {
    let dev = Device::Cpu;
    let h = Tensor::from_slice(
        &[1.0f32, 0.0, 3.0, 0.0, /* row 2 */ 0.0, 2.0, 0.0, 4.0],
        (2, 2, 2),
        &dev,
    )
    .unwrap();
    let mask = Tensor::from_slice(&[1f32, 1.0, 1.0, 1.0], (2, 2), &dev).unwrap();
    let out: Vec<Vec<f32>> = masked_mean_l2(&h, &mask).unwrap().to_vec2().unwrap();
    assert_eq!(out.len(), 2);
    // Row 1 mean is [2, 0], row 2 mean is [0, 3]; both normalize to unit axes.
    assert!((out[0][0] - 1.0).abs() < 1e-5 && out[0][1].abs() < 1e-5);
    assert!(out[1][0].abs() < 1e-5 && (out[1][1] - 1.0).abs() < 1e-5);
}

#[test]
fn masked_mean_rejects_rank_two_input() {
    let dev = Device::Cpu;
    let h = Tensor::zeros((2, 4), DType::F32, &dev).unwrap();
    let mask = Tensor::ones((2, 4), DType::F32, &dev).unwrap();
    assert!(masked_mean_l2(&h, &mask).is_err());
}
