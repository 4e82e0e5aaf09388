use std::collections::BTreeMap;

use crate::error::{Result, StrategyError};

/// A raw operator attribute as handed over by the graph layer.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Str(String),
    IntTuple(Vec<i64>),
}

impl AttrValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            AttrValue::Int(_) => "int",
            AttrValue::Float(_) => "float",
            AttrValue::Str(_) => "str",
            AttrValue::IntTuple(_) => "int tuple",
        }
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}

impl From<Vec<i64>> for AttrValue {
    fn from(v: Vec<i64>) -> Self {
        AttrValue::IntTuple(v)
    }
}

impl<const N: usize> From<[i64; N]> for AttrValue {
    fn from(v: [i64; N]) -> Self {
        AttrValue::IntTuple(v.to_vec())
    }
}

/// Unvalidated attribute record of one operator node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attrs {
    entries: BTreeMap<String, AttrValue>,
}

impl Attrs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<AttrValue>) {
        self.entries.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn mismatch(key: &str, expected: &str, got: &AttrValue) -> StrategyError {
        StrategyError::invalid(key, format!("expected {}, got {}", expected, got.type_name()))
    }

    /// Retrieve an integer attribute.
    pub fn get_int(&self, key: &str) -> Result<i64> {
        match self.entries.get(key) {
            Some(AttrValue::Int(v)) => Ok(*v),
            Some(other) => Err(Self::mismatch(key, "int", other)),
            None => Err(StrategyError::invalid(key, "missing")),
        }
    }

    /// Retrieve a string attribute.
    pub fn get_str(&self, key: &str) -> Result<&str> {
        match self.entries.get(key) {
            Some(AttrValue::Str(s)) => Ok(s.as_str()),
            Some(other) => Err(Self::mismatch(key, "str", other)),
            None => Err(StrategyError::invalid(key, "missing")),
        }
    }

    /// Retrieve a string attribute, or `default` when it is absent.
    pub fn get_str_or<'a>(&'a self, key: &str, default: &'a str) -> Result<&'a str> {
        if self.contains(key) {
            self.get_str(key)
        } else {
            Ok(default)
        }
    }

    /// Retrieve an integer tuple. A scalar integer is read as a 1-tuple.
    pub fn get_int_tuple(&self, key: &str) -> Result<Vec<i64>> {
        match self.entries.get(key) {
            Some(AttrValue::IntTuple(v)) => Ok(v.clone()),
            Some(AttrValue::Int(v)) => Ok(vec![*v]),
            Some(other) => Err(Self::mismatch(key, "int tuple", other)),
            None => Err(StrategyError::invalid(key, "missing")),
        }
    }
}
