/*
 * @Description  : 潜空间（latent）向量的Adam式更新与重归一化。
 *                 与训练网络权重所用的优化器无关：这里只更新一批潜向量，
 *                 状态（m、v、t）显式传入、显式返回，不依赖任何全局计数器。
 */

use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::errors::{CompletionError, Result};


/// Adam超参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdamConfig {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    /// 为`true`时用偏差修正后的学习率`lr_t`更新，否则用原始`learning_rate`
    pub bias_corrected: bool,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            bias_corrected: false,
        }
    }
}

/// 一批潜向量的Adam状态，`m`、`v`与潜向量批次同形（`[batch, z_dim]`）
#[derive(Debug, Clone, PartialEq)]
pub struct AdamState {
    /// 一阶矩估计
    pub m: Array2<f32>,
    /// 二阶矩估计
    pub v: Array2<f32>,
    /// 时间步
    pub t: u32,
}

impl AdamState {
    pub fn zeros(batch_size: usize, z_dim: usize) -> Self {
        Self {
            m: Array2::zeros((batch_size, z_dim)),
            v: Array2::zeros((batch_size, z_dim)),
            t: 0,
        }
    }
}

impl AdamConfig {
    /// 第`t`步偏差修正后的学习率：`lr * sqrt(1 - β2^t) / (1 - β1^t)`
    pub fn bias_corrected_lr(&self, t: u32) -> f32 {
        let t = t as i32;
        self.learning_rate * (1.0 - self.beta2.powi(t)).sqrt() / (1.0 - self.beta1.powi(t))
    }

    /// 执行一步更新，返回新的潜向量与新的状态，入参均不被修改。
    ///
    /// - `m = β1*m + (1-β1)*g`
    /// - `v = β2*v + (1-β2)*g²`
    /// - `z = z - lr*m/(sqrt(v)+ε)`
    ///
    /// 注：默认的`lr`并非`lr_t`，`lr_t`仅在`bias_corrected`为`true`时生效。
    pub fn step(
        &self,
        z: &Array2<f32>,
        gradient: &Array2<f32>,
        state: &AdamState,
    ) -> Result<(Array2<f32>, AdamState)> {
        CompletionError::check_shape(z.shape(), gradient.shape())?;
        CompletionError::check_shape(z.shape(), state.m.shape())?;
        CompletionError::check_shape(z.shape(), state.v.shape())?;

        let t = state.t + 1;
        let lr = if self.bias_corrected {
            self.bias_corrected_lr(t)
        } else {
            self.learning_rate
        };
        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);

        let mut new_z = z.clone();
        let mut m = state.m.clone();
        let mut v = state.v.clone();
        Zip::from(&mut new_z)
            .and(&mut m)
            .and(&mut v)
            .and(gradient)
            .par_for_each(|z, m, v, &g| {
                *m = beta1 * *m + (1.0 - beta1) * g;
                *v = beta2 * *v + (1.0 - beta2) * g * g;
                *z -= lr * *m / (v.sqrt() + epsilon);
            });

        Ok((new_z, AdamState { m, v, t }))
    }
}

/// 将L2范数超过`max_norm`的潜向量（按行）缩放回半径为`max_norm`的球面，
/// 球内的向量保持不变。缩放系数为`max_norm * min(1/‖z‖, 1/max_norm)`。
pub fn renorm(z: &Array2<f32>, max_norm: f32) -> Array2<f32> {
    let mut renormed = z.clone();
    Zip::from(renormed.rows_mut()).par_for_each(|mut row| {
        let norm = row.dot(&row).sqrt();
        // ‖z‖为0时1/‖z‖为inf，取min后系数为1
        let scale = max_norm * (1.0 / norm).min(1.0 / max_norm);
        if scale < 1.0 {
            row.mapv_inplace(|x| x * scale);
        }
    });
    renormed
}
