/*
 * @Description  : 泊松融合。
 *                 在补全区域内令结果的离散拉普拉斯与源图（生成图）一致，区域外固定为目标图（原图），
 *                 从而使接缝处匹配的是梯度而非像素值。每个颜色通道各解一个稀疏线性方程组。
 */

use nalgebra::DMatrix;
use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use ndarray::{Array1, Array2, Array3, ArrayView2, ArrayView3, Axis, s};
use rayon::prelude::*;
use tracing::debug;

use crate::errors::{CompletionError, Result};


/// 一次融合对应的线性方程组`A·x = b`：
/// `A`以(行, 列, 值)三元组给出，大小为填充后的像素数的平方；每个颜色通道一个右端项`b`
#[derive(Debug, Clone)]
pub struct BlendingSystem {
    /// 填充后网格的行数、列数
    rows: usize,
    cols: usize,
    pub triplets: Vec<(usize, usize, f64)>,
    pub rhs: Vec<Array1<f64>>,
    /// 按行优先展平后，第i个像素是否属于待合成区域（即第i行是否为拉普拉斯方程）
    synthesize: Vec<bool>,
}

impl BlendingSystem {
    /// 构建方程组。
    /// * `source` - 提供梯度（引导场）的源图，形状`[高, 宽, 通道]`
    /// * `target` - 提供区域外像素值的目标图，与`source`同形
    /// * `mask` - `[高, 宽]`，非0处为待合成区域
    pub fn build(
        source: ArrayView3<f32>,
        target: ArrayView3<f32>,
        mask: ArrayView2<f32>,
    ) -> Result<Self> {
        CompletionError::check_shape(source.shape(), target.shape())?;
        let (h, w, channels) = source.dim();
        CompletionError::check_shape(&[h, w], mask.shape())?;
        if h == 0 || w == 0 || channels == 0 {
            return Err(CompletionError::InvalidConfiguration(
                "融合的图像不能为空".to_string(),
            ));
        }

        // 四周各填充1像素：图像做对称填充，掩码补0，保证待合成像素的4邻域都不越界
        let padded_mask = pad_zero(mask);
        let sources = (0..channels)
            .map(|c| pad_symmetric(source.index_axis(Axis(2), c)))
            .collect::<Vec<_>>();
        let targets = (0..channels)
            .map(|c| pad_symmetric(target.index_axis(Axis(2), c)))
            .collect::<Vec<_>>();

        let (rows, cols) = padded_mask.dim();
        let size = rows * cols;
        let mut triplets = Vec::with_capacity(size);
        let mut rhs = vec![Array1::<f64>::zeros(size); channels];
        let mut synthesize = vec![false; size];

        for i in 0..size {
            let (y, x) = (i / cols, i % cols);
            if padded_mask[[y, x]] != 0.0 {
                synthesize[i] = true;
                triplets.push((i, i, 4.0));
                triplets.push((i, i + 1, -1.0));
                triplets.push((i, i - 1, -1.0));
                triplets.push((i, i - cols, -1.0));
                triplets.push((i, i + cols, -1.0));
                for (b, s) in rhs.iter_mut().zip(&sources) {
                    b[i] = 4.0 * s[[y, x]]
                        - s[[y, x - 1]]
                        - s[[y, x + 1]]
                        - s[[y - 1, x]]
                        - s[[y + 1, x]];
                }
            } else {
                triplets.push((i, i, 1.0));
                for (b, t) in rhs.iter_mut().zip(&targets) {
                    b[i] = t[[y, x]];
                }
            }
        }

        Ok(Self {
            rows,
            cols,
            triplets,
            rhs,
            synthesize,
        })
    }

    /// 方程个数（即填充后的像素数）
    pub fn size(&self) -> usize {
        self.rows * self.cols
    }

    /// 待合成（未知）像素个数
    pub fn unknown_count(&self) -> usize {
        self.synthesize.iter().filter(|&&x| x).count()
    }

    /// 按三元组组装出的完整稀疏系数矩阵`A`，仅供检查方程组用；
    /// `solve`直接由三元组构造消去已知像素后的方程组
    pub fn matrix(&self) -> CscMatrix<f64> {
        let mut coo = CooMatrix::new(self.size(), self.size());
        for &(row, col, value) in &self.triplets {
            coo.push(row, col, value);
        }
        CscMatrix::from(&coo)
    }

    /// 求解各通道的`A·x = b`，返回展平的解（每通道一个）。
    ///
    /// 恒等行直接给出已知像素的值；将其代入拉普拉斯行后，剩下的未知像素构成
    /// 对称正定的方程组，做一次稀疏Cholesky分解后各通道并行回代。
    pub fn solve(&self) -> Result<Vec<Array1<f64>>> {
        let mut unknown_index = vec![None; self.size()];
        let mut unknowns = 0;
        for (i, &synth) in self.synthesize.iter().enumerate() {
            if synth {
                unknown_index[i] = Some(unknowns);
                unknowns += 1;
            }
        }
        debug!(
            "泊松方程组：{}个方程，其中{}个未知像素",
            self.size(),
            unknowns
        );
        if unknowns == 0 {
            return Ok(self.rhs.clone());
        }

        let mut reduced_rhs = vec![vec![0.0f64; unknowns]; self.rhs.len()];
        for (i, k) in unknown_index.iter().enumerate() {
            if let Some(k) = *k {
                for (reduced, b) in reduced_rhs.iter_mut().zip(&self.rhs) {
                    reduced[k] = b[i];
                }
            }
        }
        let mut coo = CooMatrix::new(unknowns, unknowns);
        for &(row, col, value) in &self.triplets {
            let Some(k) = unknown_index[row] else {
                continue;
            };
            match unknown_index[col] {
                Some(j) => coo.push(k, j, value),
                // 已知像素满足恒等方程，其值即右端项
                None => {
                    for (reduced, b) in reduced_rhs.iter_mut().zip(&self.rhs) {
                        reduced[k] -= value * b[col];
                    }
                }
            }
        }

        let cholesky = CscCholesky::factor(&CscMatrix::from(&coo))
            .map_err(|e| CompletionError::SingularSystem(format!("Cholesky分解失败：{e:?}")))?;

        reduced_rhs
            .par_iter()
            .zip(self.rhs.par_iter())
            .enumerate()
            .map(|(channel, (reduced, b))| {
                let solution = cholesky.solve(&DMatrix::from_column_slice(unknowns, 1, reduced));
                if solution.iter().any(|v| !v.is_finite()) {
                    return Err(CompletionError::SingularSystem(format!(
                        "第{channel}通道的解中出现非有限值"
                    )));
                }
                let mut full = b.clone();
                for (i, k) in unknown_index.iter().enumerate() {
                    if let Some(k) = *k {
                        full[i] = solution[(k, 0)];
                    }
                }
                Ok(full)
            })
            .collect()
    }

    /// 将各通道的解还原为`[高, 宽, 通道]`的图像，并去掉四周的填充
    pub fn unpad_solution(&self, solutions: &[Array1<f64>]) -> Result<Array3<f32>> {
        let (rows, cols) = (self.rows, self.cols);
        let mut result = Array3::<f32>::zeros((rows - 2, cols - 2, solutions.len()));
        for (c, solution) in solutions.iter().enumerate() {
            CompletionError::check_shape(&[rows * cols], solution.shape())?;
            let grid = solution
                .view()
                .into_shape((rows, cols))
                .map_err(|_| CompletionError::ShapeMismatch {
                    expected: vec![rows, cols],
                    got: solution.shape().to_vec(),
                })?;
            result
                .index_axis_mut(Axis(2), c)
                .assign(&grid.slice(s![1..rows - 1, 1..cols - 1]).mapv(|v| v as f32));
        }
        Ok(result)
    }
}

/// 泊松融合入口
pub struct PoissonBlender;

impl PoissonBlender {
    /// 将`source`中`mask`非0的区域无缝融合进`target`，返回与`target`同形的图像。
    /// 像素值一般取[0,255]，结果不做截断。
    pub fn blend(
        source: ArrayView3<f32>,
        target: ArrayView3<f32>,
        mask: ArrayView2<f32>,
    ) -> Result<Array3<f32>> {
        let system = BlendingSystem::build(source, target, mask)?;
        let solutions = system.solve()?;
        system.unpad_solution(&solutions)
    }
}

/// 对称填充1像素（边缘像素复制一份到外侧）
fn pad_symmetric(channel: ArrayView2<f32>) -> Array2<f64> {
    let (h, w) = channel.dim();
    Array2::from_shape_fn((h + 2, w + 2), |(y, x)| {
        let sy = y.saturating_sub(1).min(h - 1);
        let sx = x.saturating_sub(1).min(w - 1);
        channel[[sy, sx]] as f64
    })
}

fn pad_zero(mask: ArrayView2<f32>) -> Array2<f32> {
    let (h, w) = mask.dim();
    let mut padded = Array2::zeros((h + 2, w + 2));
    padded.slice_mut(s![1..h + 1, 1..w + 1]).assign(&mask);
    padded
}
