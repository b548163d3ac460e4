//! Preview state

use std::fmt;

/// State of the console's single preview
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PreviewState {
    #[default]
    Idle,
    /// Offer sent, waiting for the answer or the first track
    Requesting,
    /// Media is flowing (or a direct embed is showing)
    Connected,
    /// Negotiation failed; `status` is the HTTP status when there was one
    Failed { status: Option<u16>, reason: String },
    Closed,
}

impl PreviewState {
    /// Whether a session is requesting or connected
    pub fn is_live(&self) -> bool {
        matches!(self, PreviewState::Requesting | PreviewState::Connected)
    }
}

impl fmt::Display for PreviewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreviewState::Idle => f.write_str("idle"),
            PreviewState::Requesting => f.write_str("requesting"),
            PreviewState::Connected => f.write_str("connected"),
            PreviewState::Failed {
                status: Some(status),
                ..
            } => write!(f, "failed ({})", status),
            PreviewState::Failed { status: None, .. } => f.write_str("failed"),
            PreviewState::Closed => f.write_str("closed"),
        }
    }
}
