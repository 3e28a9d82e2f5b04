use thiserror::Error;
mod ops;
pub use self::ops::*;

/// 图像补全相关的错误
///
/// 除`Io`等外部错误外，均表示调用方或配置的问题，出错即终止本次调用，不做重试。
#[derive(Error, Debug)]
pub enum CompletionError {
    /// 未知的掩码策略、越界的参数等
    #[error("配置无效：{0}")]
    InvalidConfiguration(String),

    /// 补全前未载入已训练的生成器/判别器
    #[error("尚未载入已训练的模型")]
    ModelNotLoaded,

    #[error("输入图像列表为空")]
    EmptyBatch,

    #[error("形状不匹配: 期望 {expected:?}, 实际 {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// 泊松融合的线性方程组数值退化
    #[error("线性方程组奇异：{0}")]
    SingularSystem(String),

    /// 生成模型后端自身的错误
    #[error("生成模型错误：{0}")]
    Model(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("图像错误: {0}")]
    Image(#[from] image::ImageError),
    #[error("npy写入错误: {0}")]
    NpyWrite(#[from] ndarray_npy::WriteNpyError),
    #[error("npy读取错误: {0}")]
    NpyRead(#[from] ndarray_npy::ReadNpyError),
    #[error("配置解析错误: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CompletionError>;

impl CompletionError {
    /// 检查`value_name`（值为`value`）是否满足与`threshold`的比较关系，不满足则返回`InvalidConfiguration`
    pub fn check_comparison(
        value_name: &str,
        value: f64,
        operator: ComparisonOperator,
        threshold: f64,
    ) -> Result<()> {
        if operator.holds(value, threshold) {
            Ok(())
        } else {
            Err(CompletionError::InvalidConfiguration(format!(
                "{value_name}须{operator}{threshold}，实际为{value}"
            )))
        }
    }

    /// 形状不一致时返回`ShapeMismatch`
    pub fn check_shape(expected: &[usize], got: &[usize]) -> Result<()> {
        if expected == got {
            Ok(())
        } else {
            Err(CompletionError::ShapeMismatch {
                expected: expected.to_vec(),
                got: got.to_vec(),
            })
        }
    }
}
