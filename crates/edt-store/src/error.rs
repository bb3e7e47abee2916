use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("department {0} is not registered")]
    DepartmentNotFound(String),
    #[error("invalid savepoint name {0:?}")]
    InvalidSavepoint(String),
    #[error("no savepoint named {0}")]
    UnknownSavepoint(String),
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error("transaction already finished")]
    TransactionClosed,
}
