/*
 * @Description  : 线性GAN：tanh线性生成器+线性判别器，权重以`.npy`检查点保存、载入。
 */

use std::path::Path;

use ndarray::{Array1, Array2, Array4, Axis};
use ndarray_npy::{read_npy, write_npy};
use rand::SeedableRng;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use tracing::info;

use super::GenerativeModel;
use crate::errors::{CompletionError, Result};

const G_WEIGHT_FILE: &str = "g_w.npy";
const G_BIAS_FILE: &str = "g_b.npy";
const D_WEIGHT_FILE: &str = "d_w.npy";
const D_BIAS_FILE: &str = "d_b.npy";

/// 最简单的可微GAN：
/// - 生成器：`G(z) = tanh(z·W_g + b_g)`，再重塑为`[高, 宽, 通道]`
/// - 判别器：`D(x) = flatten(x)·w_d + b_d`（输出logit）
///
/// 主要用于演示与测试补全流程；权重以`.npy`检查点的形式保存、载入。
#[derive(Debug, Clone)]
pub struct LinearGan {
    batch_size: usize,
    z_dim: usize,
    image_shape: [usize; 3],
    weights: Option<LinearGanWeights>,
}

#[derive(Debug, Clone, PartialEq)]
struct LinearGanWeights {
    /// `[z_dim, 像素数]`
    g_w: Array2<f32>,
    /// `[像素数]`
    g_b: Array1<f32>,
    /// `[像素数]`
    d_w: Array1<f32>,
    /// `[1]`
    d_b: Array1<f32>,
}

impl LinearGan {
    /// 创建尚未载入权重的模型
    pub fn new(batch_size: usize, z_dim: usize, image_shape: [usize; 3]) -> Self {
        Self {
            batch_size,
            z_dim,
            image_shape,
            weights: None,
        }
    }

    /// 以给定种子均匀随机初始化全部权重（视为已载入）
    pub fn new_random(batch_size: usize, z_dim: usize, image_shape: [usize; 3], seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let pixels = image_shape.iter().product::<usize>();
        let g_range = Uniform::from(-1.0f32..=1.0);
        let d_range = Uniform::from(-0.01f32..=0.01);
        let g_w = Array2::from_shape_simple_fn((z_dim, pixels), || g_range.sample(&mut rng));
        let g_b = Array1::from_shape_simple_fn(pixels, || 0.1 * g_range.sample(&mut rng));
        let d_w = Array1::from_shape_simple_fn(pixels, || d_range.sample(&mut rng));
        let d_b = Array1::zeros(1);
        Self {
            batch_size,
            z_dim,
            image_shape,
            weights: Some(LinearGanWeights { g_w, g_b, d_w, d_b }),
        }
    }

    fn pixel_count(&self) -> usize {
        self.image_shape.iter().product()
    }

    fn weights(&self) -> Result<&LinearGanWeights> {
        self.weights.as_ref().ok_or(CompletionError::ModelNotLoaded)
    }

    /// 从检查点目录载入权重。目录下没有检查点时返回`Ok(false)`，模型保持未载入状态
    pub fn load<P: AsRef<Path>>(&mut self, checkpoint_dir: P) -> Result<bool> {
        let dir = checkpoint_dir.as_ref();
        info!("读取检查点：{}", dir.display());
        let files = [G_WEIGHT_FILE, G_BIAS_FILE, D_WEIGHT_FILE, D_BIAS_FILE];
        if !files.iter().all(|f| dir.join(f).is_file()) {
            return Ok(false);
        }

        let g_w: Array2<f32> = read_npy(dir.join(G_WEIGHT_FILE))?;
        let g_b: Array1<f32> = read_npy(dir.join(G_BIAS_FILE))?;
        let d_w: Array1<f32> = read_npy(dir.join(D_WEIGHT_FILE))?;
        let d_b: Array1<f32> = read_npy(dir.join(D_BIAS_FILE))?;

        let pixels = self.pixel_count();
        CompletionError::check_shape(&[self.z_dim, pixels], g_w.shape())?;
        CompletionError::check_shape(&[pixels], g_b.shape())?;
        CompletionError::check_shape(&[pixels], d_w.shape())?;
        CompletionError::check_shape(&[1], d_b.shape())?;

        self.weights = Some(LinearGanWeights { g_w, g_b, d_w, d_b });
        Ok(true)
    }

    /// 将权重保存到检查点目录（目录不存在则创建）
    pub fn save<P: AsRef<Path>>(&self, checkpoint_dir: P) -> Result<()> {
        let dir = checkpoint_dir.as_ref();
        let weights = self.weights()?;
        std::fs::create_dir_all(dir)?;
        write_npy(dir.join(G_WEIGHT_FILE), &weights.g_w)?;
        write_npy(dir.join(G_BIAS_FILE), &weights.g_b)?;
        write_npy(dir.join(D_WEIGHT_FILE), &weights.d_w)?;
        write_npy(dir.join(D_BIAS_FILE), &weights.d_b)?;
        Ok(())
    }

    fn to_images(&self, flat: Array2<f32>) -> Result<Array4<f32>> {
        let [h, w, c] = self.image_shape;
        let batch = flat.nrows();
        flat.into_shape((batch, h, w, c))
            .map_err(|e| CompletionError::Model(e.to_string()))
    }

    fn flatten(&self, images: &Array4<f32>) -> Result<Array2<f32>> {
        let [h, w, c] = self.image_shape;
        let batch = images.len_of(Axis(0));
        CompletionError::check_shape(&[batch, h, w, c], images.shape())?;
        images
            .as_standard_layout()
            .into_owned()
            .into_shape((batch, h * w * c))
            .map_err(|e| CompletionError::Model(e.to_string()))
    }

    fn check_latent(&self, z: &Array2<f32>) -> Result<()> {
        CompletionError::check_shape(&[z.nrows(), self.z_dim], z.shape())
    }
}

impl GenerativeModel for LinearGan {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn z_dim(&self) -> usize {
        self.z_dim
    }

    fn image_shape(&self) -> [usize; 3] {
        self.image_shape
    }

    fn is_loaded(&self) -> bool {
        self.weights.is_some()
    }

    fn generate(&self, z: &Array2<f32>) -> Result<Array4<f32>> {
        self.check_latent(z)?;
        let weights = self.weights()?;
        let pre = z.dot(&weights.g_w) + &weights.g_b;
        self.to_images(pre.mapv(f32::tanh))
    }

    fn score(&self, images: &Array4<f32>) -> Result<Array1<f32>> {
        let weights = self.weights()?;
        let flat = self.flatten(images)?;
        Ok(flat.dot(&weights.d_w) + weights.d_b[0])
    }

    fn generate_backward(
        &self,
        z: &Array2<f32>,
        grad_images: &Array4<f32>,
    ) -> Result<Array2<f32>> {
        self.check_latent(z)?;
        let weights = self.weights()?;
        let grad_flat = self.flatten(grad_images)?;
        CompletionError::check_shape(&[z.nrows(), self.pixel_count()], grad_flat.shape())?;
        // d tanh(a) / da = 1 - tanh(a)²
        let activated = (z.dot(&weights.g_w) + &weights.g_b).mapv(f32::tanh);
        let grad_pre = grad_flat * activated.mapv(|y| 1.0 - y * y);
        Ok(grad_pre.dot(&weights.g_w.t()))
    }

    fn score_backward(
        &self,
        images: &Array4<f32>,
        grad_logits: &Array1<f32>,
    ) -> Result<Array4<f32>> {
        let weights = self.weights()?;
        let batch = images.len_of(Axis(0));
        CompletionError::check_shape(&[batch], grad_logits.shape())?;
        let grad_col = grad_logits.view().insert_axis(Axis(1));
        let grad_row = weights.d_w.view().insert_axis(Axis(0));
        self.to_images(grad_col.dot(&grad_row))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array2, Array4};

    use super::*;

    fn numeric_grad_check(model: &LinearGan, z: &Array2<f32>, upstream: &Array4<f32>) {
        // 以 L = Σ upstream ⊙ G(z) 做中心差分，验证 generate_backward
        let analytic = model.generate_backward(z, upstream).unwrap();
        let h = 1e-2f32;
        for i in 0..z.nrows() {
            for j in 0..z.ncols() {
                let mut plus = z.clone();
                plus[[i, j]] += h;
                let mut minus = z.clone();
                minus[[i, j]] -= h;
                let l_plus = (model.generate(&plus).unwrap() * upstream).sum();
                let l_minus = (model.generate(&minus).unwrap() * upstream).sum();
                let numeric = (l_plus - l_minus) / (2.0 * h);
                assert_abs_diff_eq!(analytic[[i, j]], numeric, epsilon = 2e-2);
            }
        }
    }

    #[test]
    fn test_linear_gan_shapes_and_gradients() {
        let model = LinearGan::new_random(2, 4, [3, 3, 3], 42);
        assert!(model.is_loaded());
        let z = Array2::from_shape_fn((2, 4), |(i, j)| 0.1 * (i as f32 - j as f32));
        let images = model.generate(&z).unwrap();
        assert_eq!(images.shape(), &[2, 3, 3, 3]);
        assert!(images.iter().all(|x| x.abs() <= 1.0));

        let logits = model.score(&images).unwrap();
        assert_eq!(logits.shape(), &[2]);

        let upstream = Array4::from_shape_fn((2, 3, 3, 3), |(b, y, x, c)| {
            ((b + y + 2 * x + c) % 3) as f32 - 1.0
        });
        numeric_grad_check(&model, &z, &upstream);

        // 判别器是线性的：d logit / d x = w_d
        let grad = model
            .score_backward(&images, &Array1::from(vec![1.0, 2.0]))
            .unwrap();
        let weights = model.weights().unwrap();
        assert_abs_diff_eq!(grad[[0, 0, 0, 1]], weights.d_w[1], epsilon = 1e-7);
        assert_abs_diff_eq!(grad[[1, 0, 0, 1]], 2.0 * weights.d_w[1], epsilon = 1e-7);
    }

    #[test]
    fn test_unloaded_model() {
        let model = LinearGan::new(2, 4, [3, 3, 3]);
        assert!(!model.is_loaded());
        let z = Array2::zeros((2, 4));
        assert!(matches!(
            model.generate(&z),
            Err(CompletionError::ModelNotLoaded)
        ));
    }

    #[test]
    fn test_save_load_checkpoint() {
        let dir = std::env::temp_dir().join(format!("latent_inpaint_ckpt_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        let mut fresh = LinearGan::new(2, 4, [3, 3, 3]);
        // 没有检查点时返回false
        assert!(!fresh.load(&dir).unwrap());
        assert!(!fresh.is_loaded());

        let trained = LinearGan::new_random(2, 4, [3, 3, 3], 7);
        trained.save(&dir).unwrap();
        assert!(fresh.load(&dir).unwrap());
        assert_eq!(fresh.weights, trained.weights);

        // 形状不符的检查点被拒绝
        let mut other = LinearGan::new(2, 5, [3, 3, 3]);
        assert!(matches!(
            other.load(&dir),
            Err(CompletionError::ShapeMismatch { .. })
        ));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
