use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use ts_ir::DimExtent;

use crate::error::ConfigSpaceError;
use crate::schedule::{IterVarId, Schedule, StageId};

/// Declared shape of one tunable knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KnobDecl {
    /// Split a loop of `extent` into `num_outputs` factors.
    Split { extent: DimExtent, num_outputs: usize },
    /// A boolean schedule option.
    Flag,
}

impl KnobDecl {
    fn kind_name(&self) -> &'static str {
        match self {
            KnobDecl::Split { .. } => "split",
            KnobDecl::Flag => "flag",
        }
    }
}

/// The tunable knobs of one parameterized implementation, in declaration
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSpace {
    knobs: Vec<(String, KnobDecl)>,
}

impl ConfigSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a split knob over a loop of `extent`.
    pub fn declare_split(
        &mut self,
        name: impl Into<String>,
        extent: DimExtent,
        num_outputs: usize,
    ) -> Result<(), ConfigSpaceError> {
        let name = name.into();
        if num_outputs == 0 {
            return Err(ConfigSpaceError::InvalidDeclaration {
                knob: name,
                reason: "a split needs at least one factor".to_string(),
            });
        }
        if extent == DimExtent::Known(0) {
            return Err(ConfigSpaceError::InvalidDeclaration {
                knob: name,
                reason: "extent must be positive".to_string(),
            });
        }
        self.declare(name, KnobDecl::Split { extent, num_outputs })
    }

    pub fn declare_flag(&mut self, name: impl Into<String>) -> Result<(), ConfigSpaceError> {
        self.declare(name.into(), KnobDecl::Flag)
    }

    fn declare(&mut self, name: String, decl: KnobDecl) -> Result<(), ConfigSpaceError> {
        if self.knob(&name).is_some() {
            return Err(ConfigSpaceError::InvalidDeclaration {
                knob: name,
                reason: "declared twice".to_string(),
            });
        }
        self.knobs.push((name, decl));
        Ok(())
    }

    pub fn knob(&self, name: &str) -> Option<&KnobDecl> {
        self.knobs.iter().find(|(n, _)| n == name).map(|(_, d)| d)
    }

    pub fn knobs(&self) -> impl Iterator<Item = (&str, &KnobDecl)> {
        self.knobs.iter().map(|(n, d)| (n.as_str(), d))
    }

    pub fn is_empty(&self) -> bool {
        self.knobs.is_empty()
    }

    /// Every ordered factor chain of the knob's canonical extent.
    pub fn split_candidates(&self, name: &str) -> Result<Vec<SplitEntity>, ConfigSpaceError> {
        match self.knob(name) {
            Some(KnobDecl::Split { extent, num_outputs }) => {
                let mut out = Vec::new();
                factor_chains(extent.heuristic_size(), *num_outputs, &mut Vec::new(), &mut out);
                Ok(out.into_iter().map(SplitEntity::new).collect())
            }
            Some(decl) => Err(ConfigSpaceError::KindMismatch {
                knob: name.to_string(),
                expected: "split",
                got: decl.kind_name(),
            }),
            None => Err(ConfigSpaceError::UnknownKnob(name.to_string())),
        }
    }

    /// Number of distinct entities in the space, saturating at `usize::MAX`.
    pub fn len(&self) -> usize {
        self.knobs.iter().fold(1usize, |acc, (_, decl)| {
            let n = match decl {
                KnobDecl::Split { extent, num_outputs } => {
                    count_factor_chains(extent.heuristic_size(), *num_outputs)
                }
                KnobDecl::Flag => 2,
            };
            acc.saturating_mul(n)
        })
    }
}

fn factor_chains(n: usize, arity: usize, prefix: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
    if arity == 1 {
        let mut chain = prefix.clone();
        chain.push(n);
        out.push(chain);
        return;
    }
    for d in (1..=n).filter(|d| n % d == 0) {
        prefix.push(d);
        factor_chains(n / d, arity - 1, prefix, out);
        prefix.pop();
    }
}

fn count_factor_chains(n: usize, arity: usize) -> usize {
    if arity <= 1 {
        return 1;
    }
    (1..=n)
        .filter(|d| n % d == 0)
        .fold(0usize, |acc, d| acc.saturating_add(count_factor_chains(n / d, arity - 1)))
}

/// An ordered factor chain for one split knob, outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SplitEntity {
    pub size: Vec<usize>,
}

impl SplitEntity {
    pub fn new(size: Vec<usize>) -> Self {
        SplitEntity { size }
    }

    /// Product of the factors, saturating at `usize::MAX`.
    pub fn product(&self) -> usize {
        self.size.iter().fold(1usize, |acc, &f| acc.saturating_mul(f))
    }

    /// Innermost factor.
    pub fn inner(&self) -> usize {
        self.size.last().copied().unwrap_or(1)
    }

    /// Split `iv` of `stage` into the chain, returning the new leaves
    /// outermost first.
    pub fn apply(
        &self,
        sch: &mut Schedule,
        stage: StageId,
        iv: IterVarId,
    ) -> crate::error::Result<Vec<IterVarId>> {
        sch.split_by_factors(stage, iv, &self.size)
    }
}

impl fmt::Display for SplitEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sp{:?}", self.size)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnobValue {
    Split(SplitEntity),
    Flag(bool),
}

impl KnobValue {
    fn kind_name(&self) -> &'static str {
        match self {
            KnobValue::Split(_) => "split",
            KnobValue::Flag(_) => "flag",
        }
    }
}

/// One concrete assignment to every knob of a [`ConfigSpace`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntity {
    knobs: BTreeMap<String, KnobValue>,
}

impl ConfigEntity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: KnobValue) {
        self.knobs.insert(name.into(), value);
    }

    pub fn with_split(mut self, name: impl Into<String>, size: Vec<usize>) -> Self {
        self.insert(name, KnobValue::Split(SplitEntity::new(size)));
        self
    }

    pub fn with_flag(mut self, name: impl Into<String>, value: bool) -> Self {
        self.insert(name, KnobValue::Flag(value));
        self
    }

    pub fn get(&self, name: &str) -> Option<&KnobValue> {
        self.knobs.get(name)
    }

    pub fn split(&self, name: &str) -> Result<&SplitEntity, ConfigSpaceError> {
        match self.knobs.get(name) {
            Some(KnobValue::Split(s)) => Ok(s),
            Some(other) => Err(ConfigSpaceError::KindMismatch {
                knob: name.to_string(),
                expected: "split",
                got: other.kind_name(),
            }),
            None => Err(ConfigSpaceError::MissingKnob(name.to_string())),
        }
    }

    pub fn flag(&self, name: &str) -> Result<bool, ConfigSpaceError> {
        match self.knobs.get(name) {
            Some(KnobValue::Flag(v)) => Ok(*v),
            Some(other) => Err(ConfigSpaceError::KindMismatch {
                knob: name.to_string(),
                expected: "flag",
                got: other.kind_name(),
            }),
            None => Err(ConfigSpaceError::MissingKnob(name.to_string())),
        }
    }

    /// Check that this entity assigns every knob of `space`, with the
    /// declared kind and arity, and that each split chain multiplies to the
    /// canonical extent.
    pub fn validate(&self, space: &ConfigSpace) -> Result<(), ConfigSpaceError> {
        if let Some(extra) = self.knobs.keys().find(|k| space.knob(k).is_none()) {
            return Err(ConfigSpaceError::UnknownKnob(extra.clone()));
        }
        for (name, decl) in space.knobs() {
            match decl {
                KnobDecl::Split { extent, num_outputs } => {
                    let split = self.split(name)?;
                    if split.size.len() != *num_outputs {
                        return Err(ConfigSpaceError::ArityMismatch {
                            knob: name.to_string(),
                            expected: *num_outputs,
                            got: split.size.len(),
                        });
                    }
                    let expected = extent.heuristic_size();
                    if split.product() != expected {
                        return Err(ConfigSpaceError::ProductMismatch {
                            axis: name.to_string(),
                            factors: split.size.clone(),
                            product: split.product(),
                            extent: expected,
                        });
                    }
                }
                KnobDecl::Flag => {
                    self.flag(name)?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for ConfigEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in &self.knobs {
            if !first {
                write!(f, ",")?;
            }
            first = false;
            match value {
                KnobValue::Split(s) => write!(f, "{}:{}", name, s)?,
                KnobValue::Flag(v) => write!(f, "{}:{}", name, v)?,
            }
        }
        Ok(())
    }
}
