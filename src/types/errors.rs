use std::fmt;

// === DataServiceError ===

/// Errors raised by data service reads, identity lookups and subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataServiceError {
    /// The request never produced a response.
    Network(String),
    /// The service answered with a non-success status.
    Status { status: u16, message: String },
    /// The response body or headers could not be decoded.
    Decode(String),
    /// The local store failed.
    Database(String),
    /// No valid session for the request.
    Unauthenticated(String),
    /// The change subscription could not be opened or was closed.
    Subscription(String),
}

impl fmt::Display for DataServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataServiceError::Network(msg) => write!(f, "Data service network error: {}", msg),
            DataServiceError::Status { status, message } => {
                write!(f, "Data service returned {}: {}", status, message)
            }
            DataServiceError::Decode(msg) => write!(f, "Data service decode error: {}", msg),
            DataServiceError::Database(msg) => write!(f, "Data service database error: {}", msg),
            DataServiceError::Unauthenticated(msg) => write!(f, "Not authenticated: {}", msg),
            DataServiceError::Subscription(msg) => write!(f, "Subscription error: {}", msg),
        }
    }
}

impl std::error::Error for DataServiceError {}

impl From<rusqlite::Error> for DataServiceError {
    fn from(e: rusqlite::Error) -> Self {
        DataServiceError::Database(e.to_string())
    }
}

// === MutationError ===

/// Structured error returned by the mutation gateway.
///
/// `message` carries the service's own wording so callers can match on
/// constraint names such as `unique_title_per_user` or `url_format_check`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationError {
    pub code: Option<String>,
    pub message: String,
}

impl MutationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for MutationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for MutationError {}

impl From<DataServiceError> for MutationError {
    fn from(e: DataServiceError) -> Self {
        MutationError::new(e.to_string())
    }
}

// === SettingsError ===

/// Errors related to settings operations.
#[derive(Debug)]
pub enum SettingsError {
    /// File I/O error.
    IoError(String),
    /// JSON serialization/deserialization error.
    SerializationError(String),
    /// The provided settings key is invalid.
    InvalidKey(String),
    /// The provided value fails validation.
    InvalidValue(String),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::IoError(msg) => write!(f, "Settings I/O error: {}", msg),
            SettingsError::SerializationError(msg) => {
                write!(f, "Settings serialization error: {}", msg)
            }
            SettingsError::InvalidKey(key) => write!(f, "Invalid settings key: {}", key),
            SettingsError::InvalidValue(msg) => write!(f, "Invalid settings value: {}", msg),
        }
    }
}

impl std::error::Error for SettingsError {}

// === AppError ===

/// Errors raised while wiring the application together.
#[derive(Debug)]
pub enum AppError {
    /// Settings could not be loaded.
    Settings(SettingsError),
    /// The local database could not be opened.
    Database(String),
    /// No user could be established for the session.
    Unauthenticated(String),
    /// The configured backend is unusable.
    Backend(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Settings(e) => write!(f, "App settings error: {}", e),
            AppError::Database(msg) => write!(f, "App database error: {}", msg),
            AppError::Unauthenticated(msg) => write!(f, "App not authenticated: {}", msg),
            AppError::Backend(msg) => write!(f, "App backend error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Settings(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SettingsError> for AppError {
    fn from(e: SettingsError) -> Self {
        AppError::Settings(e)
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<DataServiceError> for AppError {
    fn from(e: DataServiceError) -> Self {
        match e {
            DataServiceError::Unauthenticated(msg) => AppError::Unauthenticated(msg),
            other => AppError::Backend(other.to_string()),
        }
    }
}
