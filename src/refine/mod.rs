/*
 * @Description  : 基于残差的掩码细化。
 *                 对原图与重建图（均为[0,255]）逐通道求平方残差，经以高分位残差为中心的
 *                 logistic软门控得到置信度，三通道取平均后二值化，再做闭运算+开运算去噪。
 */

use image::{GrayImage, Luma};
use imageproc::morphology::{Mask as Footprint, grayscale_close, grayscale_open};
use ndarray::{Array2, ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{ComparisonOperator, CompletionError, Result};
use crate::mask::Mask;

#[cfg(test)]
mod tests;

/// 防止`delta`接近0时`mu`溢出
const DELTA_EPSILON: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResidualMaskRefiner {
    /// 平均置信度低于该值的像素被置0（需重新补全）
    pub threshold: f32,
    /// 取残差的第`ceil(median_e*N)`个顺序统计量作为门控中心
    pub median_e: f32,
    pub mu_delta: f32,
    /// 闭运算所用圆盘结构元的半径
    pub close_disk: u8,
    /// 开运算所用圆盘结构元的半径
    pub open_disk: u8,
}

impl Default for ResidualMaskRefiner {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            median_e: 0.6,
            mu_delta: 8.0,
            close_disk: 4,
            open_disk: 2,
        }
    }
}

impl ResidualMaskRefiner {
    pub fn validate(&self) -> Result<()> {
        CompletionError::check_comparison(
            "median_e",
            self.median_e as f64,
            ComparisonOperator::GreaterThan,
            0.0,
        )?;
        CompletionError::check_comparison(
            "median_e",
            self.median_e as f64,
            ComparisonOperator::LessOrEqual,
            1.0,
        )?;
        CompletionError::check_comparison(
            "threshold",
            self.threshold as f64,
            ComparisonOperator::GreaterOrEqual,
            0.0,
        )?;
        CompletionError::check_comparison(
            "threshold",
            self.threshold as f64,
            ComparisonOperator::LessOrEqual,
            1.0,
        )
    }

    /// 单通道的软权重：残差越大权重越接近0
    pub fn channel_weight(
        &self,
        original: ArrayView2<f32>,
        reconstructed: ArrayView2<f32>,
    ) -> Array2<f64> {
        let residual = (&original - &reconstructed).mapv(|d| (d as f64) * (d as f64));

        let mut sorted = residual.iter().copied().collect::<Vec<_>>();
        sorted.sort_by(f64::total_cmp);
        let index = ((self.median_e as f64 * sorted.len() as f64).ceil() as usize)
            .min(sorted.len().saturating_sub(1));
        let delta = sorted.get(index).copied().unwrap_or(0.0);
        let mu = self.mu_delta as f64 / (delta + DELTA_EPSILON);
        debug!("残差门控：delta={delta:.4}, mu={mu:.4}");

        // 1 / (1 + 1/exp(-mu*(r-delta))) == 1 / (1 + exp(mu*(r-delta)))
        residual.mapv(|r| 1.0 / (1.0 + (mu * (r - delta)).exp()))
    }

    /// 三通道软权重的平均，形状`[高, 宽]`
    pub fn confidence(
        &self,
        original: ArrayView3<f32>,
        reconstructed: ArrayView3<f32>,
    ) -> Result<Array2<f64>> {
        CompletionError::check_shape(original.shape(), reconstructed.shape())?;
        let (h, w, c) = original.dim();
        if c == 0 {
            return Err(CompletionError::ShapeMismatch {
                expected: vec![h, w, 3],
                got: vec![h, w, c],
            });
        }
        let mut total = Array2::<f64>::zeros((h, w));
        for k in 0..c {
            total += &self.channel_weight(
                original.index_axis(Axis(2), k),
                reconstructed.index_axis(Axis(2), k),
            );
        }
        Ok(total / c as f64)
    }

    /// 计算下一轮补全所用的掩码（1为保留，0为重新补全）
    pub fn refine(
        &self,
        original: ArrayView3<f32>,
        reconstructed: ArrayView3<f32>,
    ) -> Result<Mask> {
        let confidence = self.confidence(original, reconstructed)?;
        let threshold = self.threshold as f64;
        let binary = confidence.mapv(|w| if w < threshold { 0.0f32 } else { 1.0 });
        let cleaned = self.close_then_open(&binary);
        debug!(
            "掩码细化：阈值化后保留{}个像素，形态学处理后保留{}个像素",
            binary.iter().filter(|&&x| x != 0.0).count(),
            cleaned.iter().filter(|&&x| x != 0.0).count()
        );
        Ok(cleaned)
    }

    /// 先闭运算（填小洞）再开运算（去散点），结构元均为圆盘
    fn close_then_open(&self, binary: &Mask) -> Mask {
        let (h, w) = binary.dim();
        let image = GrayImage::from_fn(w as u32, h as u32, |x, y| {
            Luma([if binary[[y as usize, x as usize]] != 0.0 {
                255u8
            } else {
                0
            }])
        });
        let closed = grayscale_close(&image, &Footprint::disk(self.close_disk));
        let opened = grayscale_open(&closed, &Footprint::disk(self.open_disk));
        Array2::from_shape_fn((h, w), |(y, x)| {
            if opened.get_pixel(x as u32, y as u32)[0] > 127 {
                1.0
            } else {
                0.0
            }
        })
    }
}
