//! Media engine boundary
//!
//! The console does not implement a media stack. A [`MediaEngine`] opens
//! receive-only sessions and reports inbound tracks; the negotiator only
//! moves session descriptions between it and the playback endpoint.

use std::future::Future;

use tokio::sync::mpsc;

use super::NegotiationError;

/// Kind of a media line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

/// An inbound track reported by a media session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub kind: MediaKind,
    pub id: String,
}

/// Factory for receive-only media sessions
pub trait MediaEngine: Send + Sync + 'static {
    type Session: MediaSession;

    /// Open a session with one receive-only line per entry of `lines`
    fn open_receive_only(
        &self,
        lines: &[MediaKind],
    ) -> impl Future<Output = Result<Self::Session, NegotiationError>> + Send;
}

/// One local media context
pub trait MediaSession: Send + 'static {
    /// Produce the local offer
    fn create_offer(&mut self) -> impl Future<Output = Result<String, NegotiationError>> + Send;

    /// Apply the remote answer
    fn apply_answer(
        &mut self,
        answer: &str,
    ) -> impl Future<Output = Result<(), NegotiationError>> + Send;

    /// Inbound track notifications; available once
    fn take_tracks(&mut self) -> Option<mpsc::UnboundedReceiver<TrackInfo>>;

    /// Tear the session down
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}
