//! Per-target strategy builders.
//!
//! Each submodule registers its builders under the target keys it serves.
//! Resolution falls through to [`generic`] when a target has no builder
//! of its own for an operator.

pub mod bifrost;
pub mod generic;
pub mod hls;
pub mod opengl;
pub mod x86;

use ts_ir::{Target, TensorDesc};
use ts_schedule::{default_schedule, ComputeOutput, Schedule, TuningContext};

use crate::attribute_set::AttributeSet;
use crate::error::{Result, StrategyError};
use crate::implementation::ImplementationRecord;
use crate::registry::{RegistryBuilder, StrategyRegistry};

type ComputeBuilder = fn(&[TensorDesc], &AttributeSet, &TuningContext) -> Result<ComputeOutput>;

/// The table behind [`crate::default_registry`].
pub fn register_all() -> StrategyRegistry {
    let builder = RegistryBuilder::new();
    let builder = generic::register(builder);
    let builder = x86::register(builder);
    let builder = bifrost::register(builder);
    let builder = hls::register(builder);
    opengl::register(builder).build()
}

/// Schedule that leaves every stage in its natural loop nest.
pub fn schedule_default(_target: &Target, output: &ComputeOutput) -> Result<Schedule> {
    Ok(default_schedule(output)?)
}

/// Record pairing a fixed compute builder with the default schedule.
pub(crate) fn untuned(name: &str, plevel: i32, compute: ComputeBuilder) -> ImplementationRecord {
    ImplementationRecord::new(name, plevel, compute, schedule_default)
}

pub(crate) fn unsupported_layout(op: &str, layout: impl ToString, target: &Target) -> StrategyError {
    StrategyError::UnsupportedLayout {
        op: op.to_string(),
        layout: layout.to_string(),
        target: target.to_string(),
    }
}

pub(crate) fn unsupported_groups(op: &str, groups: usize, target: &Target) -> StrategyError {
    StrategyError::UnsupportedGroupCount {
        op: op.to_string(),
        groups,
        target: target.to_string(),
    }
}

pub(crate) fn unsupported(op: &str, target: &Target, reason: impl Into<String>) -> StrategyError {
    StrategyError::UnsupportedConfiguration {
        op: op.to_string(),
        target: target.to_string(),
        reason: reason.into(),
    }
}
