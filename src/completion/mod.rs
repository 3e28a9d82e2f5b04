/*
 * @Description  : 语义图像补全（semantic inpainting）的主流程。
 *                 固定一个已训练的GAN，在潜空间中搜索使“已知区域与原图一致、整体又像真图”的潜向量，
 *                 再用其生成图填补缺失区域。
 *                 外层循环为掩码细化的轮次，内层循环为潜向量的Adam迭代，二者均串行执行。
 */

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ndarray::{Array1, Array2, Array3, Array4, Axis, s};
use rand::SeedableRng;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::blend::PoissonBlender;
use crate::config::CompletionConfig;
use crate::errors::{CompletionError, Result};
use crate::mask::Mask;
use crate::model::GenerativeModel;
use crate::optimizer::{AdamState, renorm};
use crate::vision::{Image, ImageBatch, Vision};

mod loss;
mod snapshot;

pub use loss::{LossEvaluation, LossVariant, composite, evaluate};
pub use snapshot::SnapshotWriter;

#[cfg(test)]
mod tests;

/// 潜向量的L2范数上限
pub const MAX_LATENT_NORM: f32 = 1.0;

/// 跨线程共享的取消标记，每次迭代开始前检查一次
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 一轮补全的全部可变状态，轮次结束即丢弃
#[derive(Debug, Clone)]
pub struct RoundState {
    pub round: usize,
    /// 本轮已完成的迭代次数
    pub iteration: usize,
    /// `[batch, z_dim]`
    pub z: Array2<f32>,
    pub adam: AdamState,
    /// `[batch, 高, 宽]`，1为已知像素
    pub mask: Array3<f32>,
}

/// 单次迭代的结果（对应更新前的潜向量）
#[derive(Debug, Clone)]
pub struct IterationReport {
    pub iteration: usize,
    /// 每项的损失，含补零项
    pub loss: Array1<f32>,
    /// 真实输入项的平均损失
    pub mean_loss: f32,
    pub generated: Array4<f32>,
}

/// 补全结果，所有数组都已去掉补零项
#[derive(Debug, Clone)]
pub struct CompletionOutput {
    /// 最终潜向量的生成图，取值[-1, 1]
    pub generated: Array4<f32>,
    /// 已知区域取原图、其余取生成图，取值[-1, 1]
    pub completed: Array4<f32>,
    /// 最后一轮所用的掩码
    pub masks: Array3<f32>,
    /// 每轮细化得到的掩码（仅`mask_iter > 1`时非空）
    pub refined_masks: Vec<Array3<f32>>,
    pub latents: Array2<f32>,
    /// 每次迭代的平均损失，按轮次依次拼接
    pub loss_history: Vec<f32>,
    pub rounds_completed: usize,
    pub cancelled: bool,
    /// 泊松融合结果，取值[0, 255]
    pub blended: Option<Array4<f32>>,
}

pub struct Completer<'m, M: GenerativeModel + ?Sized> {
    model: &'m M,
    config: CompletionConfig,
    cancel: CancelToken,
    rng: StdRng,
}

impl<'m, M: GenerativeModel + ?Sized> Completer<'m, M> {
    pub fn new(model: &'m M, config: CompletionConfig) -> Result<Self> {
        config.validate()?;
        if !model.is_loaded() {
            return Err(CompletionError::ModelNotLoaded);
        }
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            model,
            config,
            cancel: CancelToken::new(),
            rng,
        })
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &CompletionConfig {
        &self.config
    }

    /// 将输入图像组成模型批次，不足的部分补零。返回批次与真实图像数
    pub fn prepare_batch(&self, images: &[Image]) -> Result<(ImageBatch, usize)> {
        if images.is_empty() {
            return Err(CompletionError::EmptyBatch);
        }
        let batch_size = self.model.batch_size();
        if images.len() > batch_size {
            return Err(CompletionError::InvalidConfiguration(format!(
                "输入图像数{}超过了模型的批大小{}",
                images.len(),
                batch_size
            )));
        }
        let [h, w, c] = self.model.image_shape();
        let mut batch = Array4::zeros((batch_size, h, w, c));
        for (i, image) in images.iter().enumerate() {
            CompletionError::check_shape(&[h, w, c], image.shape())?;
            batch.index_axis_mut(Axis(0), i).assign(image);
        }
        if images.len() < batch_size {
            debug!("输入{}张图像，补零至批大小{}", images.len(), batch_size);
        }
        Ok((batch, images.len()))
    }

    /// 按配置的掩码类型构造首轮掩码，批内各项共用
    pub fn initial_mask(&mut self) -> Result<Array3<f32>> {
        let [h, w, _] = self.model.image_shape();
        let mask = self
            .config
            .mask_strategy()?
            .build_with_rng(h, w, &mut self.rng)?;
        Ok(self.tile_mask(&mask))
    }

    fn tile_mask(&self, mask: &Mask) -> Array3<f32> {
        let (h, w) = mask.dim();
        let mut tiled = Array3::zeros((self.model.batch_size(), h, w));
        for mut item in tiled.outer_iter_mut() {
            item.assign(mask);
        }
        tiled
    }

    /// 新一轮：潜向量在[-1, 1]内均匀初始化并投影进单位球，Adam状态清零
    pub fn start_round(&mut self, round: usize, mask: Array3<f32>) -> Result<RoundState> {
        let (batch_size, z_dim) = (self.model.batch_size(), self.model.z_dim());
        let [h, w, _] = self.model.image_shape();
        CompletionError::check_shape(&[batch_size, h, w], mask.shape())?;
        let range = Uniform::from(-1.0f32..=1.0);
        let z = Array2::from_shape_simple_fn((batch_size, z_dim), || range.sample(&mut self.rng));
        let z = renorm(&z, MAX_LATENT_NORM);
        Ok(RoundState {
            round,
            iteration: 0,
            z,
            adam: AdamState::zeros(batch_size, z_dim),
            mask,
        })
    }

    /// 一次内层迭代：求损失与梯度，Adam更新，再投影回单位球。
    /// 出错时`state`保持不变
    pub fn step(
        &self,
        state: &mut RoundState,
        images: &ImageBatch,
        real_count: usize,
    ) -> Result<IterationReport> {
        let evaluation = evaluate(
            self.model,
            &state.z,
            images,
            &state.mask,
            self.config.lam,
            self.config.loss,
        )?;
        let (z, adam) = self
            .config
            .adam()
            .step(&state.z, &evaluation.gradient, &state.adam)?;

        let real = real_count.min(evaluation.loss.len());
        let mean_loss = evaluation.loss.slice(s![..real]).mean().unwrap_or(0.0);
        let report = IterationReport {
            iteration: state.iteration,
            loss: evaluation.loss,
            mean_loss,
            generated: evaluation.generated,
        };
        state.z = renorm(&z, MAX_LATENT_NORM);
        state.adam = adam;
        state.iteration += 1;
        Ok(report)
    }

    /// 快照文件名：`mask_iter`非0时按轮次命名，否则按迭代次数命名
    pub fn snapshot_name(&self, round: usize, iteration: usize) -> String {
        if self.config.mask_iter != 0 {
            format!("{round:02}")
        } else {
            format!("{iteration:04}")
        }
    }

    /// 完整的补全流程
    pub fn complete(&mut self, images: &[Image]) -> Result<CompletionOutput> {
        let (batch, real) = self.prepare_batch(images)?;
        let writer = match &self.config.out_dir {
            Some(dir) => Some(SnapshotWriter::create(dir, self.config.grid_cols, real)?),
            None => None,
        };
        if let Some(writer) = &writer {
            writer.save_before(&batch)?;
        }

        let rounds = self.config.rounds();
        let n_iter = self.config.n_iter;
        let interval = self.config.snapshot_interval;
        let mut mask = self.initial_mask()?;
        let mut refined_masks = Vec::new();
        let mut loss_history = Vec::with_capacity(rounds * n_iter);
        let mut rounds_completed = 0;
        let mut cancelled = false;
        let mut last = None;

        for round in 0..rounds {
            info!("第{}/{}轮补全开始", round + 1, rounds);
            let mut state = self.start_round(round, mask.clone())?;
            for i in 0..n_iter {
                if self.cancel.is_cancelled() {
                    warn!("补全在第{}轮第{}次迭代前被取消", round + 1, i);
                    cancelled = true;
                    break;
                }
                let report = self.step(&mut state, &batch, real)?;
                loss_history.push(report.mean_loss);
                if i % interval == 0 || i + 1 == n_iter {
                    info!("[轮{}] 迭代{:>5}，平均损失：{:.4}", round, i, report.mean_loss);
                    if let Some(writer) = &writer {
                        let name = self.snapshot_name(round, i);
                        writer.save_generated(&name, &report.generated)?;
                        let completed = composite(&report.generated, &batch, &state.mask)?;
                        writer.save_completed(&name, &completed)?;
                    }
                }
            }

            if cancelled {
                // 新一轮尚未迭代就被取消时，保留上一轮的结果
                if state.iteration > 0 || last.is_none() {
                    let generated = self.model.generate(&state.z)?;
                    last = Some((state, generated));
                }
                break;
            }
            let generated = self.model.generate(&state.z)?;
            rounds_completed += 1;
            if self.config.refines_mask() {
                mask = self.refine_masks(&batch, &generated, real)?;
                if let Some(writer) = &writer {
                    writer.save_masks(round, &mask)?;
                }
                refined_masks.push(mask.slice(s![..real, .., ..]).to_owned());
            }
            last = Some((state, generated));
        }

        let (state, generated) = last.ok_or_else(|| {
            CompletionError::InvalidConfiguration("没有执行任何一轮补全".to_string())
        })?;
        let completed = composite(&generated, &batch, &state.mask)?;

        let blended = if self.config.blend {
            let blended = self.blend(&batch, &generated, &state.mask, real)?;
            if let Some(writer) = &writer {
                for (i, image) in blended.outer_iter().enumerate() {
                    writer.save_blended(i, image)?;
                }
            }
            Some(blended)
        } else {
            None
        };

        info!(
            "补全结束：完成{}轮，共{}次迭代{}",
            rounds_completed,
            loss_history.len(),
            if cancelled { "（已取消）" } else { "" }
        );

        Ok(CompletionOutput {
            generated: generated.slice(s![..real, .., .., ..]).to_owned(),
            completed: completed.slice(s![..real, .., .., ..]).to_owned(),
            masks: state.mask.slice(s![..real, .., ..]).to_owned(),
            refined_masks,
            latents: state.z.slice(s![..real, ..]).to_owned(),
            loss_history,
            rounds_completed,
            cancelled,
            blended,
        })
    }

    /// 按残差为每一项重新计算掩码；补零项的掩码置为全1
    fn refine_masks(
        &self,
        images: &ImageBatch,
        generated: &Array4<f32>,
        real_count: usize,
    ) -> Result<Array3<f32>> {
        let refiner = self.config.refiner();
        let originals = Vision::inverse_transform(images) * 255.0;
        let reconstructed = Vision::inverse_transform(generated) * 255.0;
        let [h, w, _] = self.model.image_shape();

        let masks = (0..images.len_of(Axis(0)))
            .into_par_iter()
            .map(|i| {
                if i < real_count {
                    refiner.refine(
                        originals.index_axis(Axis(0), i),
                        reconstructed.index_axis(Axis(0), i),
                    )
                } else {
                    Ok(Mask::ones((h, w)))
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let mut stacked = Array3::zeros((masks.len(), h, w));
        for (mut item, mask) in stacked.outer_iter_mut().zip(&masks) {
            CompletionError::check_shape(&[h, w], mask.shape())?;
            item.assign(mask);
        }
        Ok(stacked)
    }

    /// 把生成图的缺失区域泊松融合进原图，只处理真实输入项，结果取值[0, 255]
    fn blend(
        &self,
        images: &ImageBatch,
        generated: &Array4<f32>,
        mask: &Array3<f32>,
        real_count: usize,
    ) -> Result<Array4<f32>> {
        let targets = Vision::inverse_transform(images) * 255.0;
        let sources = Vision::inverse_transform(generated) * 255.0;
        let [h, w, c] = self.model.image_shape();

        let results = (0..real_count)
            .into_par_iter()
            .map(|i| {
                // 融合掩码以非0表示待合成区域，与补全掩码相反
                let synthesize = mask.index_axis(Axis(0), i).mapv(|m| 1.0 - m);
                PoissonBlender::blend(
                    sources.index_axis(Axis(0), i),
                    targets.index_axis(Axis(0), i),
                    synthesize.view(),
                )
            })
            .collect::<Result<Vec<Image>>>()?;

        let mut blended = Array4::zeros((real_count, h, w, c));
        for (mut item, image) in blended.outer_iter_mut().zip(&results) {
            item.assign(image);
        }
        Ok(blended)
    }
}
