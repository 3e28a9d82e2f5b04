/*
 * @Description  : 补全任务的配置项，可从JSON文件读取，缺省字段取默认值。
 */

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::completion::LossVariant;
use crate::errors::{ComparisonOperator, CompletionError, Result};
use crate::mask::{MaskParams, MaskStrategy};
use crate::optimizer::AdamConfig;
use crate::refine::ResidualMaskRefiner;


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    // ========== 掩码 ==========
    /// `random`、`center`、`left`、`full`、`eye`、`scarf`
    pub mask_type: String,
    pub mask_fraction: f32,
    pub center_scale: f32,
    pub top_band_rows: usize,
    pub bottom_band_start: usize,

    // ========== 损失与优化 ==========
    /// 感知损失的权重λ
    pub lam: f32,
    pub lr: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    /// 是否改用偏差修正后的学习率`lr_t`
    pub bias_corrected_lr: bool,
    /// 每轮的迭代次数
    pub n_iter: usize,
    /// 掩码细化的轮数；大于1时每轮结束都会按残差重新计算掩码
    pub mask_iter: usize,
    pub loss: LossVariant,

    // ========== 掩码细化 ==========
    pub threshold: f32,
    pub median_e: f32,
    pub mu_delta: f32,
    pub close_disk: u8,
    pub open_disk: u8,

    // ========== 输出 ==========
    /// 每隔多少次迭代记录一次快照
    pub snapshot_interval: usize,
    /// 快照网格的列数
    pub grid_cols: usize,
    /// 为`None`时不写任何文件
    pub out_dir: Option<PathBuf>,
    /// 是否对最终结果做泊松融合
    pub blend: bool,
    /// 潜向量初始化、随机掩码所用的随机种子
    pub seed: Option<u64>,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        let mask = MaskParams::default();
        let adam = AdamConfig::default();
        let refiner = ResidualMaskRefiner::default();
        Self {
            mask_type: "center".to_string(),
            mask_fraction: mask.fraction,
            center_scale: mask.scale,
            top_band_rows: mask.top_band_rows,
            bottom_band_start: mask.bottom_band_start,
            lam: 0.1,
            lr: adam.learning_rate,
            beta1: adam.beta1,
            beta2: adam.beta2,
            epsilon: adam.epsilon,
            bias_corrected_lr: adam.bias_corrected,
            n_iter: 1000,
            mask_iter: 1,
            loss: LossVariant::default(),
            threshold: refiner.threshold,
            median_e: refiner.median_e,
            mu_delta: refiner.mu_delta,
            close_disk: refiner.close_disk,
            open_disk: refiner.open_disk,
            snapshot_interval: 50,
            grid_cols: 8,
            out_dir: None,
            blend: false,
            seed: None,
        }
    }
}

impl CompletionConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    /// 检查各项取值，任一不合法即返回`InvalidConfiguration`
    pub fn validate(&self) -> Result<()> {
        self.mask_strategy()?;
        self.refiner().validate()?;
        CompletionError::check_comparison("lr", self.lr as f64, ComparisonOperator::GreaterThan, 0.0)?;
        CompletionError::check_comparison("lam", self.lam as f64, ComparisonOperator::GreaterOrEqual, 0.0)?;
        for (name, beta) in [("beta1", self.beta1), ("beta2", self.beta2)] {
            CompletionError::check_comparison(name, beta as f64, ComparisonOperator::GreaterOrEqual, 0.0)?;
            CompletionError::check_comparison(name, beta as f64, ComparisonOperator::LessThan, 1.0)?;
        }
        CompletionError::check_comparison(
            "epsilon",
            self.epsilon as f64,
            ComparisonOperator::GreaterThan,
            0.0,
        )?;
        CompletionError::check_comparison(
            "snapshot_interval",
            self.snapshot_interval as f64,
            ComparisonOperator::GreaterOrEqual,
            1.0,
        )?;
        CompletionError::check_comparison(
            "grid_cols",
            self.grid_cols as f64,
            ComparisonOperator::GreaterOrEqual,
            1.0,
        )
    }

    pub fn mask_params(&self) -> MaskParams {
        MaskParams {
            fraction: self.mask_fraction,
            scale: self.center_scale,
            top_band_rows: self.top_band_rows,
            bottom_band_start: self.bottom_band_start,
        }
    }

    pub fn mask_strategy(&self) -> Result<MaskStrategy> {
        MaskStrategy::from_name(&self.mask_type, &self.mask_params())
    }

    pub fn adam(&self) -> AdamConfig {
        AdamConfig {
            learning_rate: self.lr,
            beta1: self.beta1,
            beta2: self.beta2,
            epsilon: self.epsilon,
            bias_corrected: self.bias_corrected_lr,
        }
    }

    pub fn refiner(&self) -> ResidualMaskRefiner {
        ResidualMaskRefiner {
            threshold: self.threshold,
            median_e: self.median_e,
            mu_delta: self.mu_delta,
            close_disk: self.close_disk,
            open_disk: self.open_disk,
        }
    }

    /// 实际执行的轮数：`mask_iter`为0时仍执行1轮
    pub fn rounds(&self) -> usize {
        self.mask_iter.max(1)
    }

    /// 是否在每轮结束后细化掩码
    pub fn refines_mask(&self) -> bool {
        self.mask_iter > 1
    }
}
