use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("invalid expression `{expr}`: {reason}")]
    Syntax { expr: String, reason: String },
    #[error("unknown operator `{name}`")]
    UnknownOperator { name: String },
    #[error("operator `{name}` requires {expected} args, got {actual}")]
    InvalidArity {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("invalid parameter `{param}` for op `{op}`: {value}")]
    InvalidParameter {
        op: &'static str,
        param: &'static str,
        value: String,
    },
}

impl CompileError {
    pub(crate) fn syntax(expr: &str, reason: impl Into<String>) -> Self {
        Self::Syntax {
            expr: expr.to_string(),
            reason: reason.into(),
        }
    }

    /// True for failures of the textual form (including arity), false for
    /// semantic failures such as an out-of-domain parameter.
    pub fn is_syntax(&self) -> bool {
        matches!(
            self,
            Self::Syntax { .. } | Self::InvalidArity { .. } | Self::UnknownOperator { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no tree has been created")]
    NoTree,
    #[error("required field `{field}` not found in batch")]
    MissingField { field: String },
    #[error("field `{field}` has {actual} values, expected {expected}")]
    FieldLengthMismatch {
        field: String,
        expected: usize,
        actual: usize,
    },
    #[error("field `{field}` is not provided by the input catalog")]
    UnboundField { field: String },
    #[error("day {day_index} is already open")]
    DayAlreadyOpen { day_index: u64 },
    #[error("no day is open")]
    DayNotOpen,
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt checkpoint: {reason}")]
    Corrupt { reason: String },
    #[error("unsupported checkpoint version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("incompatible checkpoint: {reason}")]
    Incompatible { reason: String },
    #[error("checkpoint encoding failed: {reason}")]
    Encode { reason: String },
}

impl CheckpointError {
    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        Self::Corrupt {
            reason: reason.into(),
        }
    }

    pub(crate) fn incompatible(reason: impl Into<String>) -> Self {
        Self::Incompatible {
            reason: reason.into(),
        }
    }

    /// Version mismatches are reported separately but belong to the corrupt
    /// class for callers that only distinguish "unreadable" from the rest.
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            Self::Corrupt { .. } | Self::UnsupportedVersion { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {reason}")]
    Invalid { reason: String },
    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to stand up a tree from init args plus an expression.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Compile(#[from] CompileError),
}
