use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfregError {
    #[error("Invalid configuration section: {0}")]
    InvalidSection(String),
    #[error("Registration is closed once the configuration has been finalized")]
    RegistrationClosed,
    #[error("Invalid attempt to re-initialize configuration data")]
    AlreadyFinalized,
    #[error("Configuration data ignored due to syntax or other error(s): {}", .0.join("; "))]
    Schema(Vec<String>),
    #[error("Error in configuration data or incomplete configuration: {}", .0.join("; "))]
    Incomplete(Vec<String>),
    #[error("Configuration is not usable (not finalized or voided by schema errors)")]
    Unusable,
    #[error("Unknown configuration item '{0}'")]
    UnknownItem(String),
    #[error("No such section: {0}")]
    UnknownSection(String),
    #[error("Configuration item '{0}' is locked. Unlock before using it.")]
    Locked(String),
    #[error("Syntax error for configuration item '{item}': {message}")]
    Syntax { item: String, message: String },
    #[error("Modification of configuration item '{0}' rejected")]
    Rejected(String),
    #[error("Bound violation for configuration item '{item}': {message}")]
    BoundViolation { item: String, message: String },
    #[error("Configuration item '{item}' declined the change: {reason}")]
    Declined { item: String, reason: String },
    #[error("Error in binary configuration data: {0}")]
    Binary(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, ConfregError>;

/// Coarse outcome of a registry call, as reported to registrants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    OutOfMemory,
    InvalidSection,
    SchemaError,
    IncompleteData,
    UnknownItem,
    Locked,
    SyntaxError,
    Rejected,
}

impl ConfregError {
    pub fn status(&self) -> Status {
        match self {
            Self::InvalidSection(_) | Self::RegistrationClosed => Status::InvalidSection,
            Self::AlreadyFinalized | Self::Schema(_) | Self::Unusable => Status::SchemaError,
            Self::Incomplete(_) => Status::IncompleteData,
            Self::UnknownItem(_) | Self::UnknownSection(_) => Status::UnknownItem,
            Self::Locked(_) => Status::Locked,
            Self::Syntax { .. } | Self::Binary(_) => Status::SyntaxError,
            Self::Rejected(_)
            | Self::BoundViolation { .. }
            | Self::Declined { .. }
            | Self::Lock(_) => Status::Rejected,
        }
    }

    pub(crate) fn syntax(item: &str, message: impl Into<String>) -> Self {
        Self::Syntax {
            item: item.to_string(),
            message: message.into(),
        }
    }
}

/// Folds an assignment result into its status code.
pub fn status_of<T>(result: &Result<T>) -> Status {
    match result {
        Ok(_) => Status::Ok,
        Err(e) => e.status(),
    }
}

// Helper conversions
impl<T> From<std::sync::PoisonError<T>> for ConfregError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Lock(e.to_string())
    }
}
