//! # Latent Inpaint
//!
//! `latent_inpaint`项目用纯rust实现基于生成对抗网络（GAN）的语义图像补全：
//! 固定一个已训练的生成器/判别器，在潜空间中用Adam搜索最能解释图像已知区域的潜向量，
//! 再用生成结果填补缺失区域。可选地按残差迭代细化掩码，并以泊松融合消除接缝。
//!

pub mod blend;
pub mod completion;
pub mod config;
pub mod errors;
pub mod mask;
pub mod model;
pub mod optimizer;
pub mod refine;
pub mod utils;
pub mod vision;
