use sea_orm::DbErr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("db error: {0}")]
    Db(#[from] DbErr),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("external service error: {0}")]
    External(String),
    #[error("actor exceeded time limit of {0:?}")]
    TimeLimit(std::time::Duration),
    #[error("task deadline exceeded")]
    DeadlineExceeded,
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
