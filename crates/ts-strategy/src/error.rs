use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StrategyError {
    #[error("invalid attribute '{name}': {reason}")]
    InvalidAttribute { name: String, reason: String },
    #[error("{op}: layout {layout} is not supported on {target}")]
    UnsupportedLayout {
        op: String,
        layout: String,
        target: String,
    },
    #[error("{op}: group count {groups} is not supported on {target}")]
    UnsupportedGroupCount {
        op: String,
        groups: usize,
        target: String,
    },
    #[error("no {op} implementation for target '{target}': {reason}")]
    UnsupportedConfiguration {
        op: String,
        target: String,
        reason: String,
    },
    #[error("schedule error: {0}")]
    Schedule(#[from] ts_schedule::ScheduleError),
    #[error("IR error: {0}")]
    Ir(#[from] ts_ir::IrError),
}

impl StrategyError {
    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        StrategyError::InvalidAttribute {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// True when the operator/target combination has no implementation,
    /// as opposed to malformed input.
    pub fn is_unsupported_configuration(&self) -> bool {
        matches!(
            self,
            StrategyError::UnsupportedLayout { .. }
                | StrategyError::UnsupportedGroupCount { .. }
                | StrategyError::UnsupportedConfiguration { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, StrategyError>;
