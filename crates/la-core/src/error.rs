use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Tool error: {tool} - {message}")]
    ToolFailed { tool: String, message: String },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Maximum spawn depth ({0}) exceeded")]
    SpawnDepthExceeded(u32),

    #[error("Invalid working directory: {0}")]
    InvalidWorkingDir(String),

    #[error("Invalid state transition: {from} -> {to}")]
    StateTransition { from: String, to: String },

    #[error("Cancelled")]
    Cancelled,
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolFailed {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn invalid_working_dir(path: impl Into<String>) -> Self {
        Self::InvalidWorkingDir(path.into())
    }

    pub fn state_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::StateTransition {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Errors that are surfaced back to the model as a tool-role message
    /// instead of ending the turn.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::UnknownTool(_)
                | Error::Parse(_)
                | Error::PermissionDenied(_)
                | Error::ToolFailed { .. }
                | Error::UnknownAgent(_)
                | Error::SpawnDepthExceeded(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Parse(err.to_string())
    }
}
