//! Rasterizer-pipeline strategies.

use ts_ir::{Target, TensorDesc};

use super::untuned;
use crate::attribute_set::AttributeSet;
use crate::compute;
use crate::error::Result;
use crate::implementation::{ImplementationRecord, DEFAULT_PLEVEL};
use crate::op::OpKind;
use crate::registry::RegistryBuilder;

pub const OPENGL_KEY: &str = "opengl";

pub fn register(builder: RegistryBuilder) -> RegistryBuilder {
    builder
        .register(OpKind::Dense, OPENGL_KEY, dense_strategy)
        .register(OpKind::Softmax, OPENGL_KEY, softmax_strategy)
}

pub fn dense_strategy(
    _attrs: &AttributeSet,
    _inputs: &[TensorDesc],
    _target: &Target,
) -> Result<Vec<ImplementationRecord>> {
    Ok(vec![untuned("dense.opengl", DEFAULT_PLEVEL, compute::dense)])
}

pub fn softmax_strategy(
    _attrs: &AttributeSet,
    _inputs: &[TensorDesc],
    _target: &Target,
) -> Result<Vec<ImplementationRecord>> {
    Ok(vec![untuned("softmax.opengl", DEFAULT_PLEVEL, compute::softmax)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::Attrs;
    use ts_ir::DType;

    #[test]
    fn test_dense_and_softmax() {
        let target = Target::parse("opengl").unwrap();
        let inputs = vec![
            TensorDesc::new("data", vec![2, 32], DType::Float32),
            TensorDesc::new("weight", vec![10, 32], DType::Float32),
        ];
        let set = AttributeSet::normalize(OpKind::Dense, &Attrs::new(), &inputs).unwrap();
        let records = dense_strategy(&set, &inputs, &target).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!((records[0].name(), records[0].plevel()), ("dense.opengl", DEFAULT_PLEVEL));

        let set = AttributeSet::normalize(OpKind::Softmax, &Attrs::new(), &inputs[..1]).unwrap();
        assert_eq!(softmax_strategy(&set, &inputs[..1], &target).unwrap()[0].name(), "softmax.opengl");
    }
}
