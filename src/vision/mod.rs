/*
 * @Description  : 本模块提供图像的读写与格式转换。
 *                 在本模块中，不严谨地说：
 *                 1. 所谓的image/图像是指`[高, 宽, 通道]`的RGB浮点数组；
 *                 2. 模型输入输出的取值范围为[-1, 1]，保存为文件、做融合时的取值范围为[0, 255]。
 */

use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use ndarray::{Array3, Array4, ArrayView3, ArrayView4, Axis, s};
use ndarray_npy::write_npy;

use crate::errors::{CompletionError, Result};

#[cfg(test)]
mod tests;

/// 单张图像，形状`[高, 宽, 通道]`
pub type Image = Array3<f32>;
/// 一批图像，形状`[批, 高, 宽, 通道]`
pub type ImageBatch = Array4<f32>;

pub struct Vision;

impl Vision {
    /// 载入本地图像，转为RGB后缩放到`image_size`见方，取值映射到[-1, 1]
    /// * `crop` - `true`则先按短边做基于中心的裁剪再缩放，`false`则直接缩放
    pub fn load_image<P: AsRef<Path>>(path: P, image_size: usize, crop: bool) -> Result<Image> {
        let image = image::open(path)?;
        let image = if crop {
            let (width, height) = image.dimensions();
            let side = width.min(height);
            image.crop_imm((width - side) / 2, (height - side) / 2, side, side)
        } else {
            image
        };
        let resized = image.resize_exact(
            image_size as u32,
            image_size as u32,
            FilterType::Triangle,
        );
        Ok(Self::transform(&Self::from_dynamic_image(&resized)))
    }

    /// 转为`[高, 宽, 3]`、取值[0, 255]的数组
    pub fn from_dynamic_image(image: &DynamicImage) -> Image {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        Array3::from_shape_fn((height as usize, width as usize, 3), |(y, x, c)| {
            rgb.get_pixel(x as u32, y as u32)[c] as f32
        })
    }

    /// 将取值[0, 255]的数组转为RGB图像（四舍五入并截断到[0, 255]）
    pub fn to_rgb_image(image: ArrayView3<f32>) -> Result<RgbImage> {
        let (height, width, channels) = image.dim();
        if channels != 3 {
            return Err(CompletionError::ShapeMismatch {
                expected: vec![height, width, 3],
                got: vec![height, width, channels],
            });
        }
        Ok(RgbImage::from_fn(width as u32, height as u32, |x, y| {
            let pixel = |c: usize| image[[y as usize, x as usize, c]].round().clamp(0.0, 255.0) as u8;
            Rgb([pixel(0), pixel(1), pixel(2)])
        }))
    }

    /// [0, 255] → [-1, 1]
    pub fn transform(image: &Image) -> Image {
        image.mapv(|v| v / 127.5 - 1.0)
    }

    /// [-1, 1] → [0, 1]
    pub fn inverse_transform<D: ndarray::Dimension>(
        images: &ndarray::Array<f32, D>,
    ) -> ndarray::Array<f32, D> {
        images.mapv(|v| (v + 1.0) / 2.0)
    }

    /// 网格的行数：`ceil(图像数 / 列数)`
    pub fn grid_rows(count: usize, cols: usize) -> usize {
        count.div_ceil(cols.max(1))
    }

    /// 将一批图像按`rows`行`cols`列拼成一张大图，多余的格子留0
    pub fn merge(images: ArrayView4<f32>, rows: usize, cols: usize) -> Result<Image> {
        let (count, h, w, c) = images.dim();
        if count > rows * cols {
            return Err(CompletionError::InvalidConfiguration(format!(
                "{count}张图像无法放入{rows}x{cols}的网格"
            )));
        }
        let mut merged = Array3::zeros((h * rows, w * cols, c));
        for (idx, image) in images.axis_iter(Axis(0)).enumerate() {
            let (i, j) = (idx / cols, idx % cols);
            merged
                .slice_mut(s![i * h..(i + 1) * h, j * w..(j + 1) * w, ..])
                .assign(&image);
        }
        Ok(merged)
    }

    /// 保存取值[0, 255]的单张图像
    pub fn save_image<P: AsRef<Path>>(image: ArrayView3<f32>, path: P) -> Result<()> {
        Self::to_rgb_image(image)?.save(path)?;
        Ok(())
    }

    /// 将一批取值[-1, 1]的图像拼成网格后保存
    pub fn save_images<P: AsRef<Path>>(
        images: ArrayView4<f32>,
        rows: usize,
        cols: usize,
        path: P,
    ) -> Result<()> {
        let merged = Self::merge(images, rows, cols)?;
        let merged = Self::inverse_transform(&merged) * 255.0;
        Self::save_image(merged.view(), path)
    }

    /// 保存一批单通道掩码：`npy_path`为原始浮点数组（形状`[批, 高, 宽]`），
    /// `png_path`为网格可视化（0为黑，1为白）
    pub fn save_masks<P: AsRef<Path>, Q: AsRef<Path>>(
        masks: ArrayView3<f32>,
        cols: usize,
        png_path: P,
        npy_path: Q,
    ) -> Result<()> {
        write_npy(npy_path, &masks.to_owned())?;
        let count = masks.len_of(Axis(0));
        let rgb = masks
            .insert_axis(Axis(3))
            .broadcast((count, masks.len_of(Axis(1)), masks.len_of(Axis(2)), 3))
            .map(|view| view.mapv(|m| m * 2.0 - 1.0))
            .ok_or_else(|| CompletionError::ShapeMismatch {
                expected: vec![count, 0, 0, 3],
                got: masks.shape().to_vec(),
            })?;
        Self::save_images(rgb.view(), Self::grid_rows(count, cols), cols, png_path)
    }
}
