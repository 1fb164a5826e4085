use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Backend(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("version conflict on {collection}/{id}")]
    VersionConflict { collection: String, id: String },

    #[error("document {collection}/{id} does not exist")]
    Missing { collection: String, id: String },

    #[error("injected failure writing to {0}")]
    Injected(String),
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("credential is invalid")]
    InvalidCredential,

    #[error("credential has expired")]
    Expired,

    #[error("credential used before its issue time: {0}")]
    ClockSkew(String),

    #[error("identity provider unavailable: {0}")]
    Unavailable(String),

    #[error("an account already exists for {0}")]
    AccountExists(String),
}

impl IdentityError {
    /// Only clock skew between us and the issuer clears up on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, IdentityError::ClockSkew(_))
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("{context}: {source}")]
    PersistenceFailed {
        context: &'static str,
        #[source]
        source: StoreError,
    },
}

impl ServiceError {
    pub fn persistence(context: &'static str) -> impl FnOnce(StoreError) -> ServiceError {
        move |source| ServiceError::PersistenceFailed { context, source }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Unauthorized(_) => "unauthorized",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Forbidden(_) => "forbidden",
            ServiceError::ValidationFailed(_) => "validation_failed",
            ServiceError::PersistenceFailed { .. } => "persistence_failed",
        }
    }

    /// Message safe to show a client; the root cause stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            ServiceError::Unauthorized(_) => "invalid, expired or missing credential".to_string(),
            ServiceError::NotFound(what) => format!("{what} not found"),
            ServiceError::Forbidden(_) => "you do not own this resource".to_string(),
            ServiceError::ValidationFailed(reason) => reason.clone(),
            ServiceError::PersistenceFailed { context, .. } => context.to_string(),
        }
    }
}
