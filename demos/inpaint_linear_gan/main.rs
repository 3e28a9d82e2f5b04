/*
 * 线性GAN图像补全示例
 *
 * 用一个随机初始化的线性GAN演示完整的补全流程：
 * 检查点读写 → 潜空间搜索 → 两轮掩码细化 → 泊松融合。
 *
 * # 运行
 * ```bash
 * cargo run --example inpaint_linear_gan
 * # 指定配置文件与待补全的图像
 * cargo run --example inpaint_linear_gan -- config.json a.png b.png
 * ```
 */

use std::path::PathBuf;
use std::time::Instant;

use latent_inpaint::completion::Completer;
use latent_inpaint::config::CompletionConfig;
use latent_inpaint::errors::Result;
use latent_inpaint::model::{GenerativeModel, LinearGan};
use latent_inpaint::utils::init_logging;
use latent_inpaint::vision::{Image, Vision};
use ndarray::{Array2, Axis};
use tracing::info;

const BATCH_SIZE: usize = 8;
const Z_DIM: usize = 32;
const IMAGE_SIZE: usize = 32;
const SEED: u64 = 42;

fn main() -> Result<()> {
    init_logging();
    let args = std::env::args().skip(1).collect::<Vec<_>>();

    // 1. 配置
    let config = match args.first() {
        Some(path) => CompletionConfig::from_json_file(path)?,
        None => CompletionConfig {
            n_iter: 300,
            mask_iter: 2,
            blend: true,
            seed: Some(SEED),
            out_dir: Some(PathBuf::from("demo_output/inpaint_linear_gan")),
            ..CompletionConfig::default()
        },
    };
    info!("[1/4] 配置：{}", serde_json::to_string(&config)?);

    // 2. 模型：首次运行时随机初始化并保存检查点，之后直接读取
    let checkpoint = PathBuf::from("demo_output/checkpoint");
    let mut model = LinearGan::new(BATCH_SIZE, Z_DIM, [IMAGE_SIZE, IMAGE_SIZE, 3]);
    if !model.load(&checkpoint)? {
        info!("[2/4] 未找到检查点，随机初始化模型");
        LinearGan::new_random(BATCH_SIZE, Z_DIM, [IMAGE_SIZE, IMAGE_SIZE, 3], SEED)
            .save(&checkpoint)?;
        model.load(&checkpoint)?;
    } else {
        info!("[2/4] 已读取检查点：{}", checkpoint.display());
    }

    // 3. 待补全的图像：命令行给出则读取，否则取模型自身的生成结果
    let images = if args.len() > 1 {
        args[1..]
            .iter()
            .map(|path| Vision::load_image(path, IMAGE_SIZE, true))
            .collect::<Result<Vec<Image>>>()?
    } else {
        let z = Array2::from_shape_fn((BATCH_SIZE, Z_DIM), |(i, j)| {
            ((i * 5 + j * 3) % 7) as f32 / 7.0 - 0.5
        });
        let generated = model.generate(&z)?;
        (0..4)
            .map(|i| generated.index_axis(Axis(0), i).to_owned())
            .collect()
    };
    info!("[3/4] 待补全图像{}张", images.len());

    // 4. 补全
    let start = Instant::now();
    let mut completer = Completer::new(&model, config)?;
    let output = completer.complete(&images)?;
    info!(
        "[4/4] 完成{}轮，最终平均损失{:.4}，耗时{:.2}s",
        output.rounds_completed,
        output.loss_history.last().copied().unwrap_or(f32::NAN),
        start.elapsed().as_secs_f32()
    );
    if let Some(dir) = &completer.config().out_dir {
        info!("输出目录：{}", dir.display());
    }
    Ok(())
}
