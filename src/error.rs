use thiserror::Error;

use crate::analyzer::AnalyzeError;
use crate::scans::dto::ProtocolError;

/// Everything that can go wrong while handling one client message. None of
/// these end the connection; each becomes an `error` frame whose text is
/// the `Display` output, so internal details stay out of it.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Failed to process image")]
    Analysis(#[source] AnalyzeError),

    #[error("Image analysis timed out")]
    AnalysisTimeout,

    #[error("Image data not found")]
    PendingNotFound,

    #[error("Failed to save results")]
    SaveResults(anyhow::Error),

    #[error("Failed to save scan")]
    SaveScan(anyhow::Error),

    #[error("Failed to retrieve history")]
    History(anyhow::Error),
}
