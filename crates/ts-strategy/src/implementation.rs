use std::fmt;
use std::sync::Arc;

use ts_ir::{Target, TensorDesc};
use ts_schedule::{ComputeOutput, Schedule, TuningContext};

use crate::attribute_set::AttributeSet;
use crate::error::{Result, StrategyError};
use crate::op::OpKind;

/// Priority given to an implementation that does not ask for another one.
pub const DEFAULT_PLEVEL: i32 = 10;

/// Builds the compute graph of one implementation.
pub type ComputeFn =
    Arc<dyn Fn(&[TensorDesc], &AttributeSet, &TuningContext) -> Result<ComputeOutput> + Send + Sync>;

/// Builds the loop schedule for a compute graph produced by the paired [`ComputeFn`].
pub type ScheduleFn = Arc<dyn Fn(&Target, &ComputeOutput) -> Result<Schedule> + Send + Sync>;

/// One candidate way of computing an operator: a named pair of compute and
/// schedule builders with a selection priority.
#[derive(Clone)]
pub struct ImplementationRecord {
    name: String,
    plevel: i32,
    compute: ComputeFn,
    schedule: ScheduleFn,
}

impl ImplementationRecord {
    pub fn new<C, S>(name: impl Into<String>, plevel: i32, compute: C, schedule: S) -> Self
    where
        C: Fn(&[TensorDesc], &AttributeSet, &TuningContext) -> Result<ComputeOutput> + Send + Sync + 'static,
        S: Fn(&Target, &ComputeOutput) -> Result<Schedule> + Send + Sync + 'static,
    {
        ImplementationRecord {
            name: name.into(),
            plevel,
            compute: Arc::new(compute),
            schedule: Arc::new(schedule),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plevel(&self) -> i32 {
        self.plevel
    }

    pub fn compute(&self, inputs: &[TensorDesc], attrs: &AttributeSet, ctx: &TuningContext) -> Result<ComputeOutput> {
        (self.compute)(inputs, attrs, ctx)
    }

    pub fn schedule(&self, target: &Target, output: &ComputeOutput) -> Result<Schedule> {
        (self.schedule)(target, output)
    }

    /// Run the compute builder, then schedule what it produced.
    pub fn build(&self, inputs: &[TensorDesc], attrs: &AttributeSet, ctx: &TuningContext) -> Result<BuiltImplementation> {
        let output = self.compute(inputs, attrs, ctx)?;
        let schedule = self.schedule(ctx.target(), &output)?;
        schedule.validate()?;
        Ok(BuiltImplementation {
            name: self.name.clone(),
            output,
            schedule,
        })
    }
}

impl fmt::Debug for ImplementationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImplementationRecord")
            .field("name", &self.name)
            .field("plevel", &self.plevel)
            .finish_non_exhaustive()
    }
}

/// Compute graph and schedule of the implementation that was built.
#[derive(Debug, Clone)]
pub struct BuiltImplementation {
    pub name: String,
    pub output: ComputeOutput,
    pub schedule: Schedule,
}

/// The implementations available for one operator instance on one target,
/// ordered by descending priority. Records with equal priority keep the
/// order in which the strategy builder produced them.
#[derive(Debug, Clone)]
pub struct OpStrategy {
    op: OpKind,
    attrs: AttributeSet,
    records: Vec<ImplementationRecord>,
}

impl OpStrategy {
    pub fn new(op: OpKind, attrs: AttributeSet, mut records: Vec<ImplementationRecord>) -> Self {
        records.sort_by(|a, b| b.plevel.cmp(&a.plevel));
        OpStrategy { op, attrs, records }
    }

    pub fn op(&self) -> OpKind {
        self.op
    }

    pub fn attrs(&self) -> &AttributeSet {
        &self.attrs
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The highest-priority implementation.
    pub fn select(&self) -> Option<&ImplementationRecord> {
        self.records.first()
    }

    /// Every implementation, best first, for callers that measure them.
    pub fn candidates(&self) -> &[ImplementationRecord] {
        &self.records
    }

    pub fn names(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.name()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ImplementationRecord> {
        self.records.iter().find(|r| r.name == name)
    }

    /// Build the named implementation.
    pub fn build(&self, name: &str, inputs: &[TensorDesc], ctx: &TuningContext) -> Result<BuiltImplementation> {
        let record = self.get(name).ok_or_else(|| StrategyError::UnsupportedConfiguration {
            op: self.op.to_string(),
            target: ctx.target().to_string(),
            reason: format!("no implementation named '{}'", name),
        })?;
        record.build(inputs, &self.attrs, ctx)
    }

    /// Build the implementation [`OpStrategy::select`] picks.
    pub fn build_selected(&self, inputs: &[TensorDesc], ctx: &TuningContext) -> Result<BuiltImplementation> {
        let record = self.select().ok_or_else(|| StrategyError::UnsupportedConfiguration {
            op: self.op.to_string(),
            target: ctx.target().to_string(),
            reason: "strategy has no implementations".to_string(),
        })?;
        record.build(inputs, &self.attrs, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ts_ir::{ComputeGraph, DType};
    use ts_schedule::default_schedule;

    fn record(name: &str, plevel: i32) -> ImplementationRecord {
        ImplementationRecord::new(
            name,
            plevel,
            |inputs: &[TensorDesc], _: &AttributeSet, _: &TuningContext| {
                Ok(ComputeOutput::new(ComputeGraph::new(inputs.to_vec())))
            },
            |_: &Target, out: &ComputeOutput| Ok(default_schedule(out)?),
        )
    }

    fn softmax_attrs() -> AttributeSet {
        AttributeSet::Softmax(crate::attribute_set::SoftmaxAttrs { axis: 0 })
    }

    #[test]
    fn test_sorted_by_descending_plevel() {
        let strategy = OpStrategy::new(
            OpKind::Softmax,
            softmax_attrs(),
            vec![record("a", 5), record("b", 15), record("c", 10), record("d", 15)],
        );
        assert_eq!(strategy.names(), vec!["b", "d", "c", "a"]);
        assert_eq!(strategy.select().map(|r| r.name()), Some("b"));
        assert_eq!(strategy.candidates().len(), 4);
    }

    #[test]
    fn test_build_selected() {
        let strategy = OpStrategy::new(OpKind::Softmax, softmax_attrs(), vec![record("only", DEFAULT_PLEVEL)]);
        let ctx = TuningContext::new(Target::parse("llvm").unwrap());
        let inputs = vec![TensorDesc::new("x", vec![4], DType::Float32)];
        let built = strategy.build_selected(&inputs, &ctx).unwrap();
        assert_eq!(built.name, "only");
        assert!(strategy.build("missing", &inputs, &ctx).is_err());
    }

    #[test]
    fn test_empty_strategy() {
        let strategy = OpStrategy::new(OpKind::Softmax, softmax_attrs(), Vec::new());
        assert!(strategy.select().is_none());
        let ctx = TuningContext::new(Target::parse("opengl").unwrap());
        let err = strategy.build_selected(&[], &ctx).unwrap_err();
        assert!(err.is_unsupported_configuration());
    }
}
