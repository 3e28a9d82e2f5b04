use std::path::{Path, PathBuf};

use ndarray::{Array3, Array4, ArrayView3, Axis, s};
use tracing::debug;

use crate::errors::Result;
use crate::vision::Vision;

const GENERATED_DIR: &str = "hats_imgs";
const COMPLETED_DIR: &str = "completed";
const MASK_DIR: &str = "mask";
const BLENDED_DIR: &str = "blended";

/// 将补全过程中的各类中间结果写入输出目录，只保存前`real_count`项（去掉补零的部分）
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    root: PathBuf,
    cols: usize,
    real_count: usize,
}

impl SnapshotWriter {
    pub fn create<P: AsRef<Path>>(root: P, cols: usize, real_count: usize) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in [GENERATED_DIR, COMPLETED_DIR, MASK_DIR, BLENDED_DIR] {
            std::fs::create_dir_all(root.join(dir))?;
        }
        Ok(Self {
            root,
            cols,
            real_count,
        })
    }

    /// 输入图像的网格
    pub fn save_before(&self, images: &Array4<f32>) -> Result<()> {
        self.save_grid(images, self.root.join("before.png"))
    }

    pub fn save_generated(&self, name: &str, generated: &Array4<f32>) -> Result<()> {
        self.save_grid(generated, self.root.join(GENERATED_DIR).join(format!("{name}.png")))
    }

    pub fn save_completed(&self, name: &str, completed: &Array4<f32>) -> Result<()> {
        self.save_grid(completed, self.root.join(COMPLETED_DIR).join(format!("{name}.png")))
    }

    /// 第`round`轮细化得到的掩码，同时保存`.npy`与`.png`
    pub fn save_masks(&self, round: usize, masks: &Array3<f32>) -> Result<()> {
        let real = masks.slice(s![..self.real_count.min(masks.len_of(Axis(0))), .., ..]);
        let dir = self.root.join(MASK_DIR);
        Vision::save_masks(
            real,
            self.cols,
            dir.join(format!("{round:02}.png")),
            dir.join(format!("{round:02}.npy")),
        )
    }

    /// 单张融合结果，取值[0, 255]
    pub fn save_blended(&self, index: usize, image: ArrayView3<f32>) -> Result<()> {
        Vision::save_image(image, self.root.join(BLENDED_DIR).join(format!("{index:02}.png")))
    }

    fn save_grid(&self, images: &Array4<f32>, path: PathBuf) -> Result<()> {
        let count = self.real_count.min(images.len_of(Axis(0)));
        debug!("保存快照：{}", path.display());
        Vision::save_images(
            images.slice(s![..count, .., .., ..]),
            Vision::grid_rows(count, self.cols),
            self.cols,
            path,
        )
    }
}
