use ndarray::{Array3, s};

use crate::errors::CompletionError;
use crate::refine::ResidualMaskRefiner;

/// 48x48的“原图”，以及在其上加了规则噪声、并在中心16x16方块加了大误差的“重建图”
fn synthetic_pair() -> (Array3<f32>, Array3<f32>) {
    let original = Array3::from_shape_fn((48, 48, 3), |(y, x, c)| {
        ((y * 5 + x * 3 + c * 40) % 200) as f32 + 20.0
    });
    let mut reconstructed = Array3::from_shape_fn((48, 48, 3), |(y, x, _)| {
        0.5 * ((x * 7 + y * 13) % 5) as f32
    });
    reconstructed += &original;
    reconstructed
        .slice_mut(s![16..32, 16..32, ..])
        .mapv_inplace(|v| v + 100.0);
    (original, reconstructed)
}

#[test]
fn test_refine_is_deterministic() {
    let (original, reconstructed) = synthetic_pair();
    let refiner = ResidualMaskRefiner::default();
    let first = refiner
        .refine(original.view(), reconstructed.view())
        .unwrap();
    let second = refiner
        .refine(original.view(), reconstructed.view())
        .unwrap();
    assert_eq!(first.shape(), &[48, 48]);
    assert!(first.iter().all(|&x| x == 0.0 || x == 1.0));
    assert_eq!(
        first.iter().map(|x| x.to_bits()).collect::<Vec<_>>(),
        second.iter().map(|x| x.to_bits()).collect::<Vec<_>>()
    );
}

#[test]
fn test_refine_masks_out_large_residual_block() {
    let (original, reconstructed) = synthetic_pair();
    let refiner = ResidualMaskRefiner {
        close_disk: 1,
        open_disk: 1,
        ..ResidualMaskRefiner::default()
    };
    let mask = refiner
        .refine(original.view(), reconstructed.view())
        .unwrap();

    // 大误差方块（去掉1像素的边）被置0
    assert!(
        mask.slice(s![17..31, 17..31]).iter().all(|&x| x == 0.0),
        "大残差区域应被掩去"
    );
    // 远离方块与图像边界处，零散的噪声点被闭运算填平
    for y in 2..46 {
        for x in 2..46 {
            let near_block = (14..34).contains(&y) && (14..34).contains(&x);
            if !near_block {
                assert_eq!(mask[[y, x]], 1.0, "像素({y}, {x})");
            }
        }
    }
}

#[test]
fn test_refine_default_disks_keep_block_center_masked() {
    let (original, reconstructed) = synthetic_pair();
    let mask = ResidualMaskRefiner::default()
        .refine(original.view(), reconstructed.view())
        .unwrap();
    assert!(mask.slice(s![20..28, 20..28]).iter().all(|&x| x == 0.0));
    assert!(mask.slice(s![4..10, 4..10]).iter().all(|&x| x == 1.0));
}

#[test]
fn test_refine_identical_images_keeps_everything() {
    // 残差全为0时delta为0，由epsilon兜底，不应出现NaN
    let image = Array3::from_shape_fn((12, 10, 3), |(y, x, c)| (y * 10 + x + c) as f32);
    let refiner = ResidualMaskRefiner::default();
    let confidence = refiner.confidence(image.view(), image.view()).unwrap();
    assert!(confidence.iter().all(|w| w.is_finite()));
    let mask = refiner.refine(image.view(), image.view()).unwrap();
    assert!(mask.iter().all(|&x| x == 1.0));
}

#[test]
fn test_refine_shape_mismatch() {
    let a = Array3::<f32>::zeros((8, 8, 3));
    let b = Array3::<f32>::zeros((8, 9, 3));
    let result = ResidualMaskRefiner::default().refine(a.view(), b.view());
    assert!(matches!(result, Err(CompletionError::ShapeMismatch { .. })));
}
