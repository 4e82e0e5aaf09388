use std::fmt;

/// Operator kinds with a strategy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpKind {
    Conv2d,
    /// Conv2d whose kernel was already transformed to the Winograd domain.
    Conv2dWinogradWithoutWeightTransform,
    Conv2dTranspose,
    Conv3d,
    Dense,
    BatchMatmul,
    Softmax,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Conv2d => "conv2d",
            OpKind::Conv2dWinogradWithoutWeightTransform => {
                "conv2d_winograd_without_weight_transform"
            }
            OpKind::Conv2dTranspose => "conv2d_transpose",
            OpKind::Conv3d => "conv3d",
            OpKind::Dense => "dense",
            OpKind::BatchMatmul => "batch_matmul",
            OpKind::Softmax => "softmax",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
