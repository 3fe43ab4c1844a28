use db::store_error::{ClassifyError, StoreErrorClass};
use sea_orm::DbErr;

/// Failure taxonomy of the attendance operations.
///
/// `Database` is the fatal class: an unclassified store failure that is logged
/// and propagated, never retried.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

impl ServiceError {
    /// HTTP status a transport layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::BadRequest(_) => 400,
            ServiceError::NotFound(_) => 404,
            ServiceError::Conflict(_) => 409,
            ServiceError::Database(_) => 500,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ServiceError::Database(_))
    }
}

impl ClassifyError for ServiceError {
    fn classify(&self) -> StoreErrorClass {
        match self {
            ServiceError::Database(err) => err.classify(),
            _ => StoreErrorClass::Other,
        }
    }
}
