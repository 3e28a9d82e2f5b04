/*
 * @Description  : 掩码构造。
 *                 约定：掩码值为1表示已知（保留）像素，为0表示需要补全的区域；
 *                 掩码只有高、宽2个维度，对各颜色通道共用。
 */

use ndarray::{Array2, s};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::errors::{ComparisonOperator, CompletionError, Result};


/// 单张图像的掩码，形状为`[高, 宽]`，取值仅为0或1
pub type Mask = Array2<f32>;

/// 预置的掩码策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskStrategy {
    /// 每个像素以`fraction`的概率独立置0
    Random { fraction: f32 },
    /// 置0中心方块`[floor(size*scale), floor(size*(1-scale)))`，要求`scale ≤ 0.5`
    Center { scale: f32 },
    /// 置0左半边
    Left,
    /// 不做遮挡
    Full,
    /// 置0最上方的`rows`行（如遮挡眼部）
    TopBand { rows: usize },
    /// 置0从`start_row`行起直到底部的区域（如遮挡围巾处）
    BottomBand { start_row: usize },
}

/// 按名称构造掩码策略时用到的可选参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskParams {
    pub fraction: f32,
    pub scale: f32,
    pub top_band_rows: usize,
    pub bottom_band_start: usize,
}

impl Default for MaskParams {
    fn default() -> Self {
        Self {
            fraction: 0.2,
            scale: 0.25,
            top_band_rows: 26,
            bottom_band_start: 25,
        }
    }
}

impl MaskStrategy {
    /// 根据名称（不区分大小写）构造策略，未知名称返回`InvalidConfiguration`。
    /// 支持：`random`、`center`、`left`、`full`、`eye`（即`top_band`）、`scarf`（即`bottom_band`）
    pub fn from_name(name: &str, params: &MaskParams) -> Result<Self> {
        let strategy = match name.to_ascii_lowercase().as_str() {
            "random" => MaskStrategy::Random {
                fraction: params.fraction,
            },
            "center" => MaskStrategy::Center {
                scale: params.scale,
            },
            "left" => MaskStrategy::Left,
            "full" => MaskStrategy::Full,
            "eye" | "top_band" => MaskStrategy::TopBand {
                rows: params.top_band_rows,
            },
            "scarf" | "bottom_band" => MaskStrategy::BottomBand {
                start_row: params.bottom_band_start,
            },
            other => {
                return Err(CompletionError::InvalidConfiguration(format!(
                    "未知的掩码策略`{other}`"
                )));
            }
        };
        strategy.validate()?;
        Ok(strategy)
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            MaskStrategy::Random { fraction } => {
                CompletionError::check_comparison(
                    "fraction",
                    fraction as f64,
                    ComparisonOperator::GreaterOrEqual,
                    0.0,
                )?;
                CompletionError::check_comparison(
                    "fraction",
                    fraction as f64,
                    ComparisonOperator::LessOrEqual,
                    1.0,
                )
            }
            MaskStrategy::Center { scale } => {
                CompletionError::check_comparison(
                    "scale",
                    scale as f64,
                    ComparisonOperator::GreaterOrEqual,
                    0.0,
                )?;
                CompletionError::check_comparison(
                    "scale",
                    scale as f64,
                    ComparisonOperator::LessOrEqual,
                    0.5,
                )
            }
            _ => Ok(()),
        }
    }

    /// 构造`[height, width]`的掩码，随机策略使用线程本地的随机数生成器
    pub fn build(&self, height: usize, width: usize) -> Result<Mask> {
        self.build_with_rng(height, width, &mut rand::thread_rng())
    }

    /// 同`build`，但由调用方提供随机数生成器（便于复现）
    pub fn build_with_rng<R: Rng>(
        &self,
        height: usize,
        width: usize,
        rng: &mut R,
    ) -> Result<Mask> {
        self.validate()?;
        let mut mask = Mask::ones((height, width));
        match *self {
            MaskStrategy::Random { fraction } => {
                mask.mapv_inplace(|_| {
                    if rng.r#gen::<f32>() < fraction {
                        0.0
                    } else {
                        1.0
                    }
                });
            }
            MaskStrategy::Center { scale } => {
                let (top, bottom) = center_span(height, scale);
                let (left, right) = center_span(width, scale);
                mask.slice_mut(s![top..bottom, left..right]).fill(0.0);
            }
            MaskStrategy::Left => {
                mask.slice_mut(s![.., ..width / 2]).fill(0.0);
            }
            MaskStrategy::Full => {}
            MaskStrategy::TopBand { rows } => {
                mask.slice_mut(s![..rows.min(height), ..]).fill(0.0);
            }
            MaskStrategy::BottomBand { start_row } => {
                mask.slice_mut(s![start_row.min(height).., ..]).fill(0.0);
            }
        }
        Ok(mask)
    }
}

fn center_span(size: usize, scale: f32) -> (usize, usize) {
    let lower = (size as f32 * scale).floor() as usize;
    let upper = (size as f32 * (1.0 - scale)).floor() as usize;
    (lower, upper.max(lower))
}
