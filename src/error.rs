use thiserror::Error;

pub type Result<T> = std::result::Result<T, AnalyticsError>;

#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("Data source unavailable: {0}")]
    DataSourceUnavailable(String),

    #[error("Invalid category: {0}. Must be A, B, C, or D")]
    InvalidCategory(String),

    #[error("Invalid subject: {0}")]
    InvalidSubject(String),

    #[error("Invalid score level: {0}")]
    InvalidLevel(String),

    #[error("Selection of {0} cannot be empty")]
    EmptySelection(&'static str),

    #[error("Invalid student ID: {0}. Student ID must be 8 digits")]
    InvalidStudentId(String),

    #[error("No score record for student {0}")]
    StudentNotFound(String),
}

impl From<sqlx::Error> for AnalyticsError {
    fn from(err: sqlx::Error) -> Self {
        AnalyticsError::DataSourceUnavailable(err.to_string())
    }
}
