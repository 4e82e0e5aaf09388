use ts_ir::{DType, TensorDesc};

use crate::attrs::Attrs;
use crate::error::{Result, StrategyError};
use crate::layout::Layout;
use crate::op::OpKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conv2dAttrs {
    pub strides: [usize; 2],
    /// Top, left, bottom, right.
    pub padding: [usize; 4],
    pub dilation: [usize; 2],
    pub groups: usize,
    pub data_layout: Layout,
    pub kernel_layout: Layout,
    pub kernel_size: [usize; 2],
    /// Output channels implied by the kernel shape under `kernel_layout`.
    pub kernel_out_depth: usize,
    pub out_dtype: DType,
}

impl Conv2dAttrs {
    /// A grouped convolution with one group per output channel.
    pub fn is_depthwise(&self) -> bool {
        self.groups != 1 && self.kernel_out_depth == self.groups
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conv3dAttrs {
    pub strides: [usize; 3],
    /// Front, top, left, back, bottom, right.
    pub padding: [usize; 6],
    pub dilation: [usize; 3],
    pub groups: usize,
    pub data_layout: Layout,
    pub kernel_layout: Layout,
    pub out_dtype: DType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conv2dTransposeAttrs {
    pub strides: [usize; 2],
    pub padding: [usize; 4],
    pub dilation: [usize; 2],
    pub output_padding: [usize; 2],
    pub groups: usize,
    pub data_layout: Layout,
    pub kernel_layout: Layout,
    pub out_dtype: DType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenseAttrs {
    pub units: Option<usize>,
    pub out_dtype: DType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchMatmulAttrs {
    pub out_dtype: DType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftmaxAttrs {
    /// Non-negative axis into the input.
    pub axis: usize,
}

/// Normalized, validated operator attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeSet {
    Conv2d(Conv2dAttrs),
    Conv3d(Conv3dAttrs),
    Conv2dTranspose(Conv2dTransposeAttrs),
    Dense(DenseAttrs),
    BatchMatmul(BatchMatmulAttrs),
    Softmax(SoftmaxAttrs),
}

impl AttributeSet {
    /// Validate `attrs` for `op` and convert them to typed, fixed-arity form.
    ///
    /// Pure: the same inputs always give the same result.
    pub fn normalize(op: OpKind, attrs: &Attrs, inputs: &[TensorDesc]) -> Result<AttributeSet> {
        match op {
            OpKind::Conv2d | OpKind::Conv2dWinogradWithoutWeightTransform => {
                conv2d(attrs, inputs).map(AttributeSet::Conv2d)
            }
            OpKind::Conv3d => conv3d(attrs, inputs).map(AttributeSet::Conv3d),
            OpKind::Conv2dTranspose => {
                conv2d_transpose(attrs, inputs).map(AttributeSet::Conv2dTranspose)
            }
            OpKind::Dense => Ok(AttributeSet::Dense(DenseAttrs {
                units: match attrs.get("units") {
                    Some(_) => Some(positive(attrs.get_int("units")?, "units")?),
                    None => None,
                },
                out_dtype: out_dtype(attrs, inputs)?,
            })),
            OpKind::BatchMatmul => Ok(AttributeSet::BatchMatmul(BatchMatmulAttrs {
                out_dtype: out_dtype(attrs, inputs)?,
            })),
            OpKind::Softmax => softmax(attrs, inputs).map(AttributeSet::Softmax),
        }
    }

    pub fn as_conv2d(&self) -> Result<&Conv2dAttrs> {
        match self {
            AttributeSet::Conv2d(a) => Ok(a),
            _ => Err(self.wrong_kind("conv2d")),
        }
    }

    pub fn as_conv3d(&self) -> Result<&Conv3dAttrs> {
        match self {
            AttributeSet::Conv3d(a) => Ok(a),
            _ => Err(self.wrong_kind("conv3d")),
        }
    }

    pub fn as_conv2d_transpose(&self) -> Result<&Conv2dTransposeAttrs> {
        match self {
            AttributeSet::Conv2dTranspose(a) => Ok(a),
            _ => Err(self.wrong_kind("conv2d_transpose")),
        }
    }

    pub fn as_dense(&self) -> Result<&DenseAttrs> {
        match self {
            AttributeSet::Dense(a) => Ok(a),
            _ => Err(self.wrong_kind("dense")),
        }
    }

    pub fn as_softmax(&self) -> Result<&SoftmaxAttrs> {
        match self {
            AttributeSet::Softmax(a) => Ok(a),
            _ => Err(self.wrong_kind("softmax")),
        }
    }

    /// Output dtype after resolving the inherit sentinel. Softmax keeps the
    /// input dtype and reports `None`.
    pub fn out_dtype(&self) -> Option<DType> {
        match self {
            AttributeSet::Conv2d(a) => Some(a.out_dtype),
            AttributeSet::Conv3d(a) => Some(a.out_dtype),
            AttributeSet::Conv2dTranspose(a) => Some(a.out_dtype),
            AttributeSet::Dense(a) => Some(a.out_dtype),
            AttributeSet::BatchMatmul(a) => Some(a.out_dtype),
            AttributeSet::Softmax(_) => None,
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            AttributeSet::Conv2d(_) => "conv2d",
            AttributeSet::Conv3d(_) => "conv3d",
            AttributeSet::Conv2dTranspose(_) => "conv2d_transpose",
            AttributeSet::Dense(_) => "dense",
            AttributeSet::BatchMatmul(_) => "batch_matmul",
            AttributeSet::Softmax(_) => "softmax",
        }
    }

    fn wrong_kind(&self, expected: &str) -> StrategyError {
        StrategyError::invalid(
            "attrs",
            format!("expected {} attributes, got {}", expected, self.kind_name()),
        )
    }
}

fn positive(v: i64, name: &str) -> Result<usize> {
    if v <= 0 {
        return Err(StrategyError::invalid(name, format!("must be positive, got {}", v)));
    }
    Ok(v as usize)
}

fn non_negative(v: i64, name: &str) -> Result<usize> {
    if v < 0 {
        return Err(StrategyError::invalid(name, format!("must be non-negative, got {}", v)));
    }
    Ok(v as usize)
}

/// A `N`-tuple of positive integers; a single value is broadcast.
fn positive_tuple<const N: usize>(attrs: &Attrs, key: &str, default: [usize; N]) -> Result<[usize; N]> {
    if !attrs.contains(key) {
        return Ok(default);
    }
    let raw = attrs.get_int_tuple(key)?;
    let values = match raw.len() {
        1 => vec![raw[0]; N],
        n if n == N => raw,
        n => {
            return Err(StrategyError::invalid(
                key,
                format!("expected 1 or {} values, got {}", N, n),
            ))
        }
    };
    let mut out = [0usize; N];
    for (slot, v) in out.iter_mut().zip(values) {
        *slot = positive(v, key)?;
    }
    Ok(out)
}

/// Padding for `spatial` dimensions expanded to begin-then-end form:
/// one value pads every side, `spatial` values pad both ends of each
/// dimension, `2 * spatial` values are taken as-is.
fn padding(attrs: &Attrs, spatial: usize) -> Result<Vec<usize>> {
    if !attrs.contains("padding") {
        return Ok(vec![0; 2 * spatial]);
    }
    let raw = attrs.get_int_tuple("padding")?;
    let values: Vec<i64> = match raw.len() {
        1 => vec![raw[0]; 2 * spatial],
        n if n == spatial => raw.iter().chain(raw.iter()).copied().collect(),
        n if n == 2 * spatial => raw,
        n => {
            return Err(StrategyError::invalid(
                "padding",
                format!("expected 1, {} or {} values, got {}", spatial, 2 * spatial, n),
            ))
        }
    };
    values.into_iter().map(|v| non_negative(v, "padding")).collect()
}

fn array<const N: usize>(v: Vec<usize>, key: &str) -> Result<[usize; N]> {
    v.try_into()
        .map_err(|v: Vec<usize>| StrategyError::invalid(key, format!("expected {} values, got {}", N, v.len())))
}

fn groups(attrs: &Attrs) -> Result<usize> {
    if attrs.contains("groups") {
        positive(attrs.get_int("groups")?, "groups")
    } else {
        Ok(1)
    }
}

/// `"same"` and `""` inherit the first input's dtype.
fn out_dtype(attrs: &Attrs, inputs: &[TensorDesc]) -> Result<DType> {
    match attrs.get_str_or("out_dtype", "")? {
        "" | "same" => inputs
            .first()
            .map(|t| t.dtype())
            .ok_or_else(|| StrategyError::invalid("out_dtype", "no input to inherit the dtype from")),
        other => other
            .parse::<DType>()
            .map_err(|e| StrategyError::invalid("out_dtype", e.to_string())),
    }
}

fn data_and_kernel(inputs: &[TensorDesc]) -> Result<(&TensorDesc, &TensorDesc)> {
    match inputs {
        [data, kernel, ..] => Ok((data, kernel)),
        _ => Err(StrategyError::invalid(
            "inputs",
            format!("expected data and kernel, got {} tensors", inputs.len()),
        )),
    }
}

fn conv2d(attrs: &Attrs, inputs: &[TensorDesc]) -> Result<Conv2dAttrs> {
    let strides = positive_tuple(attrs, "strides", [1, 1])?;
    let dilation = positive_tuple(attrs, "dilation", [1, 1])?;
    let padding = array(padding(attrs, 2)?, "padding")?;
    let groups = groups(attrs)?;
    let data_layout = Layout::parse(attrs.get_str_or("data_layout", "NCHW")?);
    let kernel_layout = Layout::parse(attrs.get_str_or("kernel_layout", "OIHW")?);
    let (_, kernel) = data_and_kernel(inputs)?;
    let k = kernel.shape().known_dims(kernel.name())?;

    let kernel_size = if attrs.contains("kernel_size") {
        positive_tuple(attrs, "kernel_size", [1, 1])?
    } else {
        let (h, w) = match (kernel_layout.axis_index('H'), kernel_layout.axis_index('W')) {
            (Some(h), Some(w)) if h < k.len() && w < k.len() => (h, w),
            _ => {
                return Err(StrategyError::invalid(
                    "kernel_layout",
                    format!("cannot locate kernel height/width in {}", kernel_layout),
                ))
            }
        };
        [k[h], k[w]]
    };

    let depth_factors: Vec<usize> = if kernel_layout.starts_with("HW") && k.len() >= 4 {
        k[2..4].to_vec()
    } else {
        match k.as_slice() {
            [o, i, _, _] => vec![*o, *i],
            [c, m, _, _, vc] => vec![*c, *m, *vc],
            _ => {
                return Err(StrategyError::invalid(
                    "kernel",
                    format!("expected a rank 4 or 5 kernel, got {}", kernel.shape()),
                ))
            }
        }
    };
    let kernel_out_depth = depth_factors
        .iter()
        .try_fold(1usize, |acc, &f| acc.checked_mul(f))
        .ok_or_else(|| StrategyError::invalid("kernel", format!("output depth of {} overflows", kernel.shape())))?;

    Ok(Conv2dAttrs {
        strides,
        padding,
        dilation,
        groups,
        data_layout,
        kernel_layout,
        kernel_size,
        kernel_out_depth,
        out_dtype: out_dtype(attrs, inputs)?,
    })
}

fn conv3d(attrs: &Attrs, inputs: &[TensorDesc]) -> Result<Conv3dAttrs> {
    data_and_kernel(inputs)?;
    Ok(Conv3dAttrs {
        strides: positive_tuple(attrs, "strides", [1, 1, 1])?,
        padding: array(padding(attrs, 3)?, "padding")?,
        dilation: positive_tuple(attrs, "dilation", [1, 1, 1])?,
        groups: groups(attrs)?,
        data_layout: Layout::parse(attrs.get_str_or("data_layout", "NCDHW")?),
        kernel_layout: Layout::parse(attrs.get_str_or("kernel_layout", "OIDHW")?),
        out_dtype: out_dtype(attrs, inputs)?,
    })
}

fn conv2d_transpose(attrs: &Attrs, inputs: &[TensorDesc]) -> Result<Conv2dTransposeAttrs> {
    data_and_kernel(inputs)?;
    let output_padding = if attrs.contains("output_padding") {
        let raw = attrs.get_int_tuple("output_padding")?;
        let v = match raw.len() {
            1 => vec![raw[0]; 2],
            _ => raw,
        };
        let v = v
            .into_iter()
            .map(|p| non_negative(p, "output_padding"))
            .collect::<Result<Vec<_>>>()?;
        array(v, "output_padding")?
    } else {
        [0, 0]
    };
    Ok(Conv2dTransposeAttrs {
        strides: positive_tuple(attrs, "strides", [1, 1])?,
        padding: array(padding(attrs, 2)?, "padding")?,
        dilation: positive_tuple(attrs, "dilation", [1, 1])?,
        output_padding,
        groups: groups(attrs)?,
        data_layout: Layout::parse(attrs.get_str_or("data_layout", "NCHW")?),
        kernel_layout: Layout::parse(attrs.get_str_or("kernel_layout", "OIHW")?),
        out_dtype: out_dtype(attrs, inputs)?,
    })
}

fn softmax(attrs: &Attrs, inputs: &[TensorDesc]) -> Result<SoftmaxAttrs> {
    let ndim = inputs
        .first()
        .map(|t| t.ndim() as i64)
        .ok_or_else(|| StrategyError::invalid("inputs", "softmax needs one input"))?;
    let axis = if attrs.contains("axis") {
        attrs.get_int("axis")?
    } else {
        -1
    };
    let resolved = if axis < 0 { axis + ndim } else { axis };
    if resolved < 0 || resolved >= ndim {
        return Err(StrategyError::invalid(
            "axis",
            format!("{} is out of range for a rank {} input", axis, ndim),
        ));
    }
    Ok(SoftmaxAttrs {
        axis: resolved as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv_inputs() -> Vec<TensorDesc> {
        vec![
            TensorDesc::new("data", vec![1, 32, 28, 28], DType::Float32),
            TensorDesc::new("kernel", vec![32, 1, 3, 3], DType::Float32),
        ]
    }

    #[test]
    fn test_conv2d_normalize() {
        let attrs = Attrs::new()
            .with("strides", [2i64, 2])
            .with("padding", [1i64, 1])
            .with("groups", 32i64)
            .with("out_dtype", "same");
        let set = AttributeSet::normalize(OpKind::Conv2d, &attrs, &conv_inputs()).unwrap();
        let conv = set.as_conv2d().unwrap();
        assert_eq!(conv.strides, [2, 2]);
        assert_eq!(conv.padding, [1, 1, 1, 1]);
        assert_eq!(conv.dilation, [1, 1]);
        assert_eq!(conv.kernel_size, [3, 3]);
        assert_eq!(conv.out_dtype, DType::Float32);
        assert_eq!(conv.data_layout, Layout::Nchw);
        assert!(conv.is_depthwise());
    }

    #[test]
    fn test_rejects_non_positive_dilation_and_stride() {
        for (key, value) in [("dilation", [0i64, 1]), ("strides", [1, -1])] {
            let attrs = Attrs::new().with(key, value);
            let err = AttributeSet::normalize(OpKind::Conv2d, &attrs, &conv_inputs()).unwrap_err();
            assert!(matches!(err, StrategyError::InvalidAttribute { ref name, .. } if name == key));
        }
    }

    #[test]
    fn test_padding_arity() {
        let attrs = Attrs::new().with("padding", [1i64, 2, 3]);
        assert!(AttributeSet::normalize(OpKind::Conv2d, &attrs, &conv_inputs()).is_err());
        let attrs = Attrs::new().with("padding", [0i64, 1, 2, 3]);
        let set = AttributeSet::normalize(OpKind::Conv2d, &attrs, &conv_inputs()).unwrap();
        assert_eq!(set.as_conv2d().unwrap().padding, [0, 1, 2, 3]);
    }

    #[test]
    fn test_hwoi_out_depth() {
        let inputs = vec![
            TensorDesc::new("data", vec![1, 28, 28, 16], DType::Float32),
            TensorDesc::new("kernel", vec![3, 3, 16, 2], DType::Float32),
        ];
        let attrs = Attrs::new()
            .with("data_layout", "NHWC")
            .with("kernel_layout", "HWOI")
            .with("groups", 32i64);
        let set = AttributeSet::normalize(OpKind::Conv2d, &attrs, &inputs).unwrap();
        let conv = set.as_conv2d().unwrap();
        assert_eq!(conv.kernel_out_depth, 32);
        assert_eq!(conv.kernel_size, [3, 3]);
        assert!(conv.is_depthwise());
    }

    #[test]
    fn test_explicit_out_dtype() {
        let attrs = Attrs::new().with("out_dtype", "int32");
        let inputs = vec![
            TensorDesc::new("data", vec![4, 8], DType::Int8),
            TensorDesc::new("weight", vec![16, 8], DType::Int8),
        ];
        let set = AttributeSet::normalize(OpKind::Dense, &attrs, &inputs).unwrap();
        assert_eq!(set.out_dtype(), Some(DType::Int32));
        let bad = Attrs::new().with("out_dtype", "float7");
        assert!(AttributeSet::normalize(OpKind::Dense, &bad, &inputs).is_err());
    }

    #[test]
    fn test_softmax_axis() {
        let inputs = vec![TensorDesc::new("x", vec![2, 10], DType::Float32)];
        let set = AttributeSet::normalize(OpKind::Softmax, &Attrs::new(), &inputs).unwrap();
        assert_eq!(set.as_softmax().unwrap().axis, 1);
        let attrs = Attrs::new().with("axis", 2i64);
        assert!(AttributeSet::normalize(OpKind::Softmax, &attrs, &inputs).is_err());
    }

    #[test]
    fn test_normalize_is_repeatable() {
        let attrs = Attrs::new().with("dilation", 2i64);
        let a = AttributeSet::normalize(OpKind::Conv2d, &attrs, &conv_inputs()).unwrap();
        let b = AttributeSet::normalize(OpKind::Conv2d, &attrs, &conv_inputs()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_conv2d().unwrap().dilation, [2, 2]);
    }
}
