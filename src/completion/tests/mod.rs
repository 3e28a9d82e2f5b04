use ndarray::{Array1, Array2, Array4, Axis};

use crate::errors::Result;
use crate::model::GenerativeModel;


/// 每项生成一张常数图像`0.01·Σz`；判别器恒输出0，梯度恒为常数
struct ConstantModel {
    pub batch_size: usize,
    pub z_dim: usize,
    pub image_shape: [usize; 3],
    pub loaded: bool,
}

impl ConstantModel {
    pub const WEIGHT: f32 = 0.01;

    pub fn new(batch_size: usize, z_dim: usize, image_shape: [usize; 3]) -> Self {
        Self {
            batch_size,
            z_dim,
            image_shape,
            loaded: true,
        }
    }
}

impl GenerativeModel for ConstantModel {
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
        self.loaded
    }

    fn generate(&self, z: &Array2<f32>) -> Result<Array4<f32>> {
        let [h, w, c] = self.image_shape;
        let values = z.sum_axis(Axis(1)) * Self::WEIGHT;
        Ok(Array4::from_shape_fn((z.nrows(), h, w, c), |(i, _, _, _)| {
            values[i]
        }))
    }

    fn score(&self, images: &Array4<f32>) -> Result<Array1<f32>> {
        Ok(Array1::zeros(images.len_of(Axis(0))))
    }

    fn generate_backward(
        &self,
        z: &Array2<f32>,
        _grad_images: &Array4<f32>,
    ) -> Result<Array2<f32>> {
        Ok(Array2::from_elem(z.dim(), Self::WEIGHT))
    }

    fn score_backward(
        &self,
        images: &Array4<f32>,
        _grad_logits: &Array1<f32>,
    ) -> Result<Array4<f32>> {
        Ok(Array4::zeros(images.dim()))
    }
}
