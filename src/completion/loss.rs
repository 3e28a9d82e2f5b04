/*
 * @Description  : 补全损失：上下文损失（已知区域的L1距离）+ λ·感知损失（判别器的sigmoid交叉熵）。
 *                 梯度由模型提供的两个VJP按链式法则组合得到。
 */

use ndarray::{Array1, Array2, Array3, Array4, Axis};
use serde::{Deserialize, Serialize};

use crate::errors::{CompletionError, Result};
use crate::model::GenerativeModel;

/// 感知损失所评判的图像
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossVariant {
    /// 直接评判生成图`G(z)`
    Direct,
    /// 评判合成图`(1-mask)⊙G(z) + mask⊙原图`
    #[default]
    Composite,
}

/// 一次前向+反向的结果，各数组的首维均为模型批大小
#[derive(Debug, Clone)]
pub struct LossEvaluation {
    /// 每项的总损失：`contextual_i + λ·perceptual`
    pub loss: Array1<f32>,
    pub contextual: Array1<f32>,
    /// 整批的平均sigmoid交叉熵（标签为“真”）
    pub perceptual: f32,
    /// `Σ_i loss_i`对潜向量的梯度
    pub gradient: Array2<f32>,
    pub generated: Array4<f32>,
}

/// 计算当前潜向量的损失及其梯度。
/// * `images` - 原图批次，取值[-1, 1]
/// * `mask` - `[批, 高, 宽]`，1为已知像素
pub fn evaluate<M: GenerativeModel + ?Sized>(
    model: &M,
    z: &Array2<f32>,
    images: &Array4<f32>,
    mask: &Array3<f32>,
    lam: f32,
    variant: LossVariant,
) -> Result<LossEvaluation> {
    let generated = model.generate(z)?;
    CompletionError::check_shape(images.shape(), generated.shape())?;
    let mask4 = broadcast_mask(mask, generated.dim())?;

    let diff = (&generated - images) * &mask4;
    let contextual = diff
        .axis_iter(Axis(0))
        .map(|item| item.iter().map(|d| d.abs()).sum::<f32>())
        .collect::<Array1<f32>>();

    let scored = match variant {
        LossVariant::Direct => generated.clone(),
        LossVariant::Composite => composite(&generated, images, mask)?,
    };
    let logits = model.score(&scored)?;
    CompletionError::check_shape(&[generated.len_of(Axis(0))], logits.shape())?;
    let perceptual = logits.mapv(|l| softplus(-l)).mean().unwrap_or(0.0);
    let loss = &contextual + lam * perceptual;

    // 对Σ_i loss_i求导时，批平均的1/B与B项求和相抵
    let grad_logits = logits.mapv(|l| lam * (sigmoid(l) - 1.0));
    let grad_scored = model.score_backward(&scored, &grad_logits)?;
    CompletionError::check_shape(generated.shape(), grad_scored.shape())?;

    let mut grad_images = diff.mapv(sign) * &mask4;
    match variant {
        LossVariant::Direct => grad_images += &grad_scored,
        LossVariant::Composite => grad_images += &(grad_scored * &mask4.mapv(|m| 1.0 - m)),
    }
    let gradient = model.generate_backward(z, &grad_images)?;
    CompletionError::check_shape(z.shape(), gradient.shape())?;

    Ok(LossEvaluation {
        loss,
        contextual,
        perceptual,
        gradient,
        generated,
    })
}

/// 已知区域取原图、其余取生成图
pub fn composite(
    generated: &Array4<f32>,
    images: &Array4<f32>,
    mask: &Array3<f32>,
) -> Result<Array4<f32>> {
    CompletionError::check_shape(images.shape(), generated.shape())?;
    let mask4 = broadcast_mask(mask, generated.dim())?;
    Ok(&mask4 * images + &mask4.mapv(|m| 1.0 - m) * generated)
}

/// `[批, 高, 宽]`的掩码沿通道维广播
fn broadcast_mask(mask: &Array3<f32>, dim: (usize, usize, usize, usize)) -> Result<Array4<f32>> {
    let (batch, h, w, c) = dim;
    CompletionError::check_shape(&[batch, h, w], mask.shape())?;
    mask.view()
        .insert_axis(Axis(3))
        .broadcast((batch, h, w, c))
        .map(|view| view.to_owned())
        .ok_or_else(|| CompletionError::ShapeMismatch {
            expected: vec![batch, h, w, c],
            got: mask.shape().to_vec(),
        })
}

/// `ln(1 + e^x)`，数值稳定写法
fn softplus(x: f32) -> f32 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// 与`f32::signum`不同，0的符号取0
fn sign(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}
