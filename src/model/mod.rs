/*
 * @Description  : 生成模型接口。
 *                 补全过程只把已训练的生成器/判别器当作黑盒使用：
 *                 1. 前向：潜向量→图像，图像→真实度logit；
 *                 2. 反向：对二者分别求向量-雅可比积（VJP），
 *                    由补全过程按链式法则自行组合出损失对潜向量的梯度。
 *                 网络本身的结构、BN统计量等状态完全由实现方持有，补全过程从不直接读写。
 */

use ndarray::{Array1, Array2, Array4};

use crate::errors::Result;

mod linear;

pub use linear::LinearGan;

/// 已训练（冻结）的生成器+判别器
///
/// 所有图像批次形状均为`[batch, 高, 宽, 通道]`，取值范围为`[-1, 1]`。
pub trait GenerativeModel: Sync {
    /// 模型固定的批大小，输入不足时由调用方补零
    fn batch_size(&self) -> usize;
    /// 潜向量维度
    fn z_dim(&self) -> usize;
    /// 单张图像的形状`[高, 宽, 通道]`
    fn image_shape(&self) -> [usize; 3];
    /// 是否已载入训练好的权重
    fn is_loaded(&self) -> bool;

    /// 生成器：`[batch, z_dim]` → `[batch, 高, 宽, 通道]`
    fn generate(&self, z: &Array2<f32>) -> Result<Array4<f32>>;
    /// 判别器：返回每张图像“为真”的logit，形状`[batch]`
    fn score(&self, images: &Array4<f32>) -> Result<Array1<f32>>;

    /// 已知损失对生成图像的梯度`grad_images`，返回损失对`z`的梯度
    fn generate_backward(&self, z: &Array2<f32>, grad_images: &Array4<f32>)
    -> Result<Array2<f32>>;
    /// 已知损失对logit的梯度`grad_logits`，返回损失对输入图像的梯度
    fn score_backward(
        &self,
        images: &Array4<f32>,
        grad_logits: &Array1<f32>,
    ) -> Result<Array4<f32>>;
}
