use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use tracing::debug;
use ts_ir::{Target, TensorDesc};

use crate::attribute_set::AttributeSet;
use crate::attrs::Attrs;
use crate::error::{Result, StrategyError};
use crate::implementation::{ImplementationRecord, OpStrategy};
use crate::op::OpKind;

/// Key every operator falls back to after the target's own keys.
pub const GENERIC_KEY: &str = "generic";

/// Produces the candidate implementations for one operator instance.
pub type StrategyFn = fn(&AttributeSet, &[TensorDesc], &Target) -> Result<Vec<ImplementationRecord>>;

static DEFAULT_REGISTRY: Lazy<StrategyRegistry> = Lazy::new(crate::strategy::register_all);

/// The process-wide table with every built-in strategy.
pub fn default_registry() -> &'static StrategyRegistry {
    &DEFAULT_REGISTRY
}

/// Collects `(operator, key)` registrations before the table is frozen.
#[derive(Default)]
pub struct RegistryBuilder {
    table: HashMap<(OpKind, String), StrategyFn>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `f` for `op` under `key`. A second registration for the same
    /// pair replaces the first.
    pub fn register(mut self, op: OpKind, key: &str, f: StrategyFn) -> Self {
        if self.table.insert((op, key.to_string()), f).is_some() {
            debug!(%op, key, "strategy registration replaced");
        }
        self
    }

    pub fn build(self) -> StrategyRegistry {
        StrategyRegistry { table: self.table }
    }
}

/// Immutable dispatch table from operator and target key to strategy builder.
///
/// Shared freely across threads; resolution never mutates it.
pub struct StrategyRegistry {
    table: HashMap<(OpKind, String), StrategyFn>,
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.table.keys().collect();
        keys.sort();
        f.debug_struct("StrategyRegistry").field("entries", &keys).finish()
    }
}

impl StrategyRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn contains(&self, op: OpKind, key: &str) -> bool {
        self.table.contains_key(&(op, key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// The first key, walking the target's keys from most specific to the
    /// generic key, that has a builder for `op`.
    pub fn lookup(&self, op: OpKind, target: &Target) -> Option<(&'static str, StrategyFn)> {
        target
            .keys()
            .into_iter()
            .chain(std::iter::once(GENERIC_KEY))
            .find_map(|key| self.table.get(&(op, key.to_string())).map(|f| (key, *f)))
    }

    /// Validate `attrs` and build the strategy for `op` on `target`.
    ///
    /// Attributes are normalized before any builder runs, so malformed input
    /// is reported the same way on every target. Only the first matching
    /// builder is invoked; an error from it is final.
    pub fn resolve(&self, op: OpKind, attrs: &Attrs, inputs: &[TensorDesc], target: &Target) -> Result<OpStrategy> {
        let attrs = AttributeSet::normalize(op, attrs, inputs)?;
        let (key, f) = self
            .lookup(op, target)
            .ok_or_else(|| StrategyError::UnsupportedConfiguration {
                op: op.to_string(),
                target: target.to_string(),
                reason: "no strategy registered for any target key".to_string(),
            })?;
        debug!(%op, %target, key, "resolving strategy");

        let records = f(&attrs, inputs, target)?;
        if records.is_empty() {
            return Err(StrategyError::UnsupportedConfiguration {
                op: op.to_string(),
                target: target.to_string(),
                reason: format!("strategy '{}' produced no implementations", key),
            });
        }
        let strategy = OpStrategy::new(op, attrs, records);
        debug!(%op, implementations = ?strategy.names(), "strategy resolved");
        Ok(strategy)
    }
}
