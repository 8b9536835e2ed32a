//! Error types for the scripting crate

use qbscript_core::EngineError;

/// Script-specific error types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    /// Malformed source; aborts the whole script
    #[error("Parse error at line {line}, column {column}: {message}")]
    Parse {
        message: String,
        line: usize,
        column: usize,
    },

    /// Generic runtime failure
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Variable not found
    #[error("Undefined variable: {0}")]
    UndefinedVariable(String),

    /// Called something that is not a function
    #[error("Not callable: {0}")]
    NotCallable(String),

    /// Wrong number of arguments
    #[error("{name} expects {expected} argument(s) but got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },

    /// Operator or builtin applied to the wrong kind of value
    #[error("Type error: {0}")]
    TypeError(String),

    /// Array index outside the array
    #[error("Index {index} out of range for array of length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    /// Method name not known for the receiver
    #[error("Unknown method '{method}' on {receiver}")]
    UnknownMethod { receiver: String, method: String },

    /// Call depth budget exhausted
    #[error("Stack overflow: call depth exceeded {0}")]
    StackOverflow(usize),

    /// Loop budget exhausted
    #[error("Loop iteration limit of {0} exceeded")]
    IterationLimit(u64),

    /// `subscribe` used outside of a script evaluation
    #[error("subscribe() called with no current script")]
    NoScriptContext,

    /// Chart data is not a JSON 2-D array
    #[error("Chart '{chart}' has malformed data: {message}")]
    ChartParse { chart: String, message: String },

    /// Header not present in the chart's first row
    #[error("Column '{column}' not found in chart '{chart}'")]
    ColumnNotFound { chart: String, column: String },

    /// Chart has a header row but no data rows
    #[error("Chart '{0}' has no data rows")]
    EmptyChart(String),
}

impl ScriptError {
    /// Build a parse error at a source position
    pub fn parse(message: impl Into<String>, line: usize, column: usize) -> Self {
        ScriptError::Parse {
            message: message.into(),
            line,
            column,
        }
    }
}

impl From<ScriptError> for EngineError {
    fn from(err: ScriptError) -> Self {
        EngineError::Script(err.to_string())
    }
}

/// Result type for scripting operations
pub type Result<T> = std::result::Result<T, ScriptError>;
