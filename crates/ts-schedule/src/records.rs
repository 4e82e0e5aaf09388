use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use ts_ir::{DType, Shape, Target, TensorDesc};

use crate::fallback::FallbackGenerator;
use crate::space::{ConfigEntity, ConfigSpace};

/// Signature of one tunable operator instantiation, used as the key of a
/// tuning-record store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Workload {
    pub task: String,
    pub inputs: Vec<(Shape, DType)>,
    pub params: Vec<i64>,
}

impl Workload {
    pub fn new(task: impl Into<String>, inputs: &[TensorDesc]) -> Self {
        Workload {
            task: task.into(),
            inputs: inputs
                .iter()
                .map(|t| (t.shape().clone(), t.dtype()))
                .collect(),
            params: Vec::new(),
        }
    }

    /// Attach scalar attributes (strides, padding, ...) that distinguish
    /// workloads with identical input shapes.
    pub fn with_params(mut self, params: &[i64]) -> Self {
        self.params = params.to_vec();
        self
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.task)?;
        for (i, (shape, dtype)) in self.inputs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", shape, dtype)?;
        }
        if !self.params.is_empty() {
            write!(f, "; {:?}", self.params)?;
        }
        write!(f, ")")
    }
}

/// Read side of an external tuning-record store.
///
/// Lookups may run concurrently from many measurement trials, hence the
/// `Send + Sync` bound.
pub trait TuningRecords: Send + Sync {
    fn lookup(&self, target: &Target, workload: &Workload) -> Option<ConfigEntity>;
}

/// A store with no records; every query falls back.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRecords;

impl TuningRecords for NoRecords {
    fn lookup(&self, _target: &Target, _workload: &Workload) -> Option<ConfigEntity> {
        None
    }
}

/// In-memory records keyed by target string and workload.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecords {
    entries: HashMap<(String, Workload), ConfigEntity>,
}

impl MemoryRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, target: &Target, workload: Workload, entity: ConfigEntity) {
        self.entries.insert((target.to_string(), workload), entity);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TuningRecords for MemoryRecords {
    fn lookup(&self, target: &Target, workload: &Workload) -> Option<ConfigEntity> {
        self.entries
            .get(&(target.to_string(), workload.clone()))
            .cloned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Tuned,
    Fallback,
}

/// The configuration a tunable compute was built with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedConfig {
    pub entity: ConfigEntity,
    pub source: ConfigSource,
}

impl SelectedConfig {
    pub fn is_fallback(&self) -> bool {
        self.source == ConfigSource::Fallback
    }
}

/// Target plus record store, threaded explicitly through compute builders.
#[derive(Clone)]
pub struct TuningContext {
    target: Target,
    records: Arc<dyn TuningRecords>,
}

impl TuningContext {
    /// A context with no tuning records.
    pub fn new(target: Target) -> Self {
        TuningContext {
            target,
            records: Arc::new(NoRecords),
        }
    }

    pub fn with_records(target: Target, records: Arc<dyn TuningRecords>) -> Self {
        TuningContext { target, records }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Tuned entity for `workload` if the store has one that fits `space`,
    /// otherwise the fallback for the target's vector width.
    pub fn query(&self, workload: &Workload, space: &ConfigSpace) -> SelectedConfig {
        if let Some(entity) = self.records.lookup(&self.target, workload) {
            match entity.validate(space) {
                Ok(()) => {
                    debug!(%workload, config = %entity, "using tuned config");
                    return SelectedConfig {
                        entity,
                        source: ConfigSource::Tuned,
                    };
                }
                Err(e) => {
                    warn!(%workload, error = %e, "tuning record does not fit the config space, using fallback");
                }
            }
        }
        let entity = FallbackGenerator::new(self.target.fp32_lanes()).generate(space);
        debug!(%workload, config = %entity, "using fallback config");
        SelectedConfig {
            entity,
            source: ConfigSource::Fallback,
        }
    }
}

impl fmt::Debug for TuningContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TuningContext")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}
