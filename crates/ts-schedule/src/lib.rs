//! `ts-schedule` - Loop schedules and tunable schedule templates.
//!
//! This crate provides:
//! - A `Schedule` of loop-transformation directives over a compute graph
//! - `ConfigSpace` knob declarations and concrete `ConfigEntity` assignments
//! - A deterministic `FallbackGenerator` for spaces without tuning records
//! - Tuning-record lookup through the `TuningRecords` trait
//! - Dense (packed and unpacked) and conv2d NCHWc schedule templates

pub mod error;
pub mod fallback;
pub mod records;
pub mod schedule;
pub mod space;
pub mod template;

pub use error::{ConfigSpaceError, Result, ScheduleError};
pub use fallback::{FallbackGenerator, MAX_REGISTER_TILE};
pub use records::{
    ConfigSource, MemoryRecords, NoRecords, SelectedConfig, TuningContext, TuningRecords, Workload,
};
pub use schedule::{Annotation, AttachPoint, Directive, IterVar, IterVarId, Schedule, Stage, StageId};
pub use space::{ConfigEntity, ConfigSpace, KnobDecl, KnobValue, SplitEntity};
pub use template::{default_schedule, ComputeOutput};
