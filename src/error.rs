use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum TrackError {
    #[error("Error: {0}")]
    LapjvError(String),
    #[error("Error: {0}")]
    AssignmentError(String),
}
