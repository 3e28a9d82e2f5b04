/*
 * @Description  : 使用桩模型的端到端补全测试
 *                 验证：损失单调不增 + 潜向量始终在单位球内 + 补零项被剔除 + 取消
 */

use latent_inpaint::completion::{CancelToken, Completer, LossVariant};
use latent_inpaint::config::CompletionConfig;
use latent_inpaint::errors::{CompletionError, Result};
use latent_inpaint::model::GenerativeModel;
use ndarray::{Array1, Array2, Array3, Array4, Axis};

const Z_DIM: usize = 8;
const SIZE: usize = 16;
const WEIGHT: f32 = 0.01;

/// 每项生成一张常数图像`0.01·Σz`；判别器恒输出0，梯度恒为常数
struct ConstantModel {
    batch_size: usize,
    loaded: bool,
}

impl GenerativeModel for ConstantModel {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn z_dim(&self) -> usize {
        Z_DIM
    }

    fn image_shape(&self) -> [usize; 3] {
        [SIZE, SIZE, 3]
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn generate(&self, z: &Array2<f32>) -> Result<Array4<f32>> {
        let values = z.sum_axis(Axis(1)) * WEIGHT;
        Ok(Array4::from_shape_fn(
            (z.nrows(), SIZE, SIZE, 3),
            |(i, _, _, _)| values[i],
        ))
    }

    fn score(&self, images: &Array4<f32>) -> Result<Array1<f32>> {
        Ok(Array1::zeros(images.len_of(Axis(0))))
    }

    fn generate_backward(
        &self,
        z: &Array2<f32>,
        _grad_images: &Array4<f32>,
    ) -> Result<Array2<f32>> {
        Ok(Array2::from_elem(z.dim(), WEIGHT))
    }

    fn score_backward(
        &self,
        images: &Array4<f32>,
        _grad_logits: &Array1<f32>,
    ) -> Result<Array4<f32>> {
        Ok(Array4::zeros(images.dim()))
    }
}

fn config(loss: LossVariant) -> CompletionConfig {
    CompletionConfig {
        mask_type: "center".to_string(),
        // 16x16的中心4x4
        center_scale: 0.375,
        n_iter: 10,
        snapshot_interval: 5,
        loss,
        seed: Some(2024),
        ..CompletionConfig::default()
    }
}

fn dark_image() -> Array3<f32> {
    Array3::from_elem((SIZE, SIZE, 3), -1.0)
}

#[test]
fn test_loss_never_increases_and_latents_stay_in_unit_ball() {
    let model = ConstantModel {
        batch_size: 2,
        loaded: true,
    };
    for variant in [LossVariant::Direct, LossVariant::Composite] {
        let mut completer = Completer::new(&model, config(variant)).unwrap();
        let (batch, real) = completer.prepare_batch(&[dark_image()]).unwrap();
        assert_eq!(real, 1);

        let mask = completer.initial_mask().unwrap();
        assert_eq!(mask.iter().filter(|&&m| m == 0.0).count(), 2 * 16);
        let mut state = completer.start_round(0, mask).unwrap();
        for row in state.z.rows() {
            assert!(row.dot(&row).sqrt() <= 1.0 + 1e-5);
        }

        let mut previous = f32::INFINITY;
        for i in 0..10 {
            let report = completer.step(&mut state, &batch, real).unwrap();
            assert_eq!(report.iteration, i);
            assert!(
                report.mean_loss <= previous + 1e-4,
                "第{i}次迭代损失上升：{previous} -> {}",
                report.mean_loss
            );
            previous = report.mean_loss;
            for row in state.z.rows() {
                assert!(row.dot(&row).sqrt() <= 1.0 + 1e-5);
            }
        }
        assert_eq!(state.iteration, 10);
        assert_eq!(state.adam.t, 10);
    }
}

#[test]
fn test_complete_end_to_end() {
    let model = ConstantModel {
        batch_size: 4,
        loaded: true,
    };
    let mut completer = Completer::new(&model, config(LossVariant::Composite)).unwrap();
    let output = completer.complete(&[dark_image(), dark_image()]).unwrap();

    assert_eq!(output.generated.shape(), &[2, SIZE, SIZE, 3]);
    assert_eq!(output.latents.shape(), &[2, Z_DIM]);
    assert_eq!(output.loss_history.len(), 10);
    assert!(output.loss_history.windows(2).all(|w| w[1] <= w[0] + 1e-4));
    // 已知区域为原图，缺失区域为生成图
    assert_eq!(output.completed[[1, 0, 0, 0]], -1.0);
    assert_eq!(output.completed[[1, 7, 7, 0]], output.generated[[1, 7, 7, 0]]);
}

#[test]
fn test_empty_and_oversized_batches() {
    let model = ConstantModel {
        batch_size: 2,
        loaded: true,
    };
    let mut completer = Completer::new(&model, config(LossVariant::Direct)).unwrap();
    assert!(matches!(
        completer.complete(&[]),
        Err(CompletionError::EmptyBatch)
    ));
    let images = vec![dark_image(); 3];
    assert!(matches!(
        completer.complete(&images),
        Err(CompletionError::InvalidConfiguration(_))
    ));
}

#[test]
fn test_model_not_loaded() {
    let model = ConstantModel {
        batch_size: 2,
        loaded: false,
    };
    assert!(matches!(
        Completer::new(&model, config(LossVariant::Direct)),
        Err(CompletionError::ModelNotLoaded)
    ));
}

#[test]
fn test_cancel_from_another_thread() {
    let model = ConstantModel {
        batch_size: 2,
        loaded: true,
    };
    let token = CancelToken::new();
    let config = CompletionConfig {
        n_iter: 1_000_000,
        snapshot_interval: 100_000,
        ..config(LossVariant::Composite)
    };
    let mut completer = Completer::new(&model, config)
        .unwrap()
        .with_cancel_token(token.clone());

    let canceller = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(50));
        token.cancel();
    });
    let output = completer.complete(&[dark_image()]).unwrap();
    canceller.join().unwrap();

    assert!(output.cancelled);
    assert_eq!(output.rounds_completed, 0);
    assert!(output.loss_history.len() < 1_000_000);
    for row in output.latents.rows() {
        assert!(row.dot(&row).sqrt() <= 1.0 + 1e-5);
    }
}
