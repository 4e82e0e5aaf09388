use thiserror::Error;

/// Breaches of the config-space contract.
///
/// A correctly built `ConfigEntity` never triggers these while a template is
/// applied; seeing one means a record or a template is wrong.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigSpaceError {
    #[error("split of '{axis}' (extent {extent}) by factor {factor} is not exact")]
    NonDivisibleSplit {
        axis: String,
        extent: usize,
        factor: usize,
    },
    #[error("factors {factors:?} of '{axis}' multiply to {product}, expected {extent}")]
    ProductMismatch {
        axis: String,
        factors: Vec<usize>,
        product: usize,
        extent: usize,
    },
    #[error("knob '{knob}' expects {expected} factors, got {got}")]
    ArityMismatch {
        knob: String,
        expected: usize,
        got: usize,
    },
    #[error("knob '{knob}' is a {expected} knob, found a {got} value")]
    KindMismatch {
        knob: String,
        expected: &'static str,
        got: &'static str,
    },
    #[error("invalid declaration of knob '{knob}': {reason}")]
    InvalidDeclaration { knob: String, reason: String },
    #[error("unknown knob: {0}")]
    UnknownKnob(String),
    #[error("config entity has no value for knob '{0}'")]
    MissingKnob(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("config space error: {0}")]
    ConfigSpace(#[from] ConfigSpaceError),
    #[error("IR error: {0}")]
    Ir(#[from] ts_ir::IrError),
    #[error("no stage named '{0}'")]
    UnknownStage(String),
    #[error("no op tagged '{tag}' in the compute graph")]
    MissingTag { tag: String },
    #[error("'{axis}' is not a leaf axis of stage '{stage}'")]
    NotALeaf { stage: String, axis: String },
    #[error("cannot fuse '{outer}' and '{inner}' in stage '{stage}': {reason}")]
    InvalidFuse {
        stage: String,
        outer: String,
        inner: String,
        reason: String,
    },
    #[error("stage '{stage}' already has parallel axis '{existing}'")]
    MultipleParallel { stage: String, existing: String },
    #[error("parallel axis of stage '{stage}' would be nested inside the parallel loop of '{outer}'")]
    NestedParallel { stage: String, outer: String },
    #[error("cannot parallelize reduce axis '{axis}' of stage '{stage}'")]
    ParallelReduce { stage: String, axis: String },
    #[error("axis '{axis}' of stage '{stage}' is already marked {existing}")]
    ConflictingAnnotation {
        stage: String,
        axis: String,
        existing: &'static str,
    },
    #[error("invalid compute_at of '{stage}' into '{consumer}': {reason}")]
    InvalidComputeAt {
        stage: String,
        consumer: String,
        reason: String,
    },
    #[error("cannot cache_write stage '{0}' after it has been transformed")]
    CacheWriteAfterTransform(String),
    #[error("invalid reorder of stage '{stage}': {reason}")]
    InvalidReorder { stage: String, reason: String },
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ScheduleError>;
