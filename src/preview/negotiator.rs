//! Preview negotiator
//!
//! Owns the console's single preview. Sessions are tracked under one lock
//! that is held for the whole of `start`, so a second `start` (or a
//! `close`) waits for an in-flight offer/answer exchange to settle before
//! tearing it down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::session::context::FleetContext;

use super::endpoint::{resolve_endpoint, PlaybackEndpoint};
use super::media::{MediaEngine, MediaKind, MediaSession, TrackInfo};
use super::state::PreviewState;
use super::{NegotiationError, PreviewConfig};

/// Content type of offers and answers
const SDP_CONTENT_TYPE: &str = "application/sdp";

struct TrackedPreview<S> {
    endpoint: PlaybackEndpoint,
    /// `None` for direct embeds and failed negotiations
    media: Option<S>,
    watcher: Option<JoinHandle<()>>,
}

impl<S: MediaSession> TrackedPreview<S> {
    async fn teardown(mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        if let Some(mut media) = self.media.take() {
            media.close().await;
        }
    }
}

struct Tracked<S> {
    active: Option<String>,
    sessions: HashMap<String, TrackedPreview<S>>,
}

/// Negotiates and tracks the live preview
pub struct PreviewNegotiator<E: MediaEngine> {
    engine: E,
    config: PreviewConfig,
    fleet: Arc<FleetContext>,
    http: reqwest::Client,
    state: Arc<watch::Sender<PreviewState>>,
    /// Bumped whenever the active session changes; stale watchers compare against it
    generation: Arc<AtomicU64>,
    tracked: Mutex<Tracked<E::Session>>,
}

impl<E: MediaEngine> PreviewNegotiator<E> {
    pub fn new(engine: E, config: PreviewConfig, fleet: Arc<FleetContext>) -> Result<Self, NegotiationError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| NegotiationError::Network(e.to_string()))?;
        let (state, _) = watch::channel(PreviewState::Idle);

        Ok(Self {
            engine,
            config,
            fleet,
            http,
            state: Arc::new(state),
            generation: Arc::new(AtomicU64::new(0)),
            tracked: Mutex::new(Tracked {
                active: None,
                sessions: HashMap::new(),
            }),
        })
    }

    pub fn state(&self) -> PreviewState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<PreviewState> {
        self.state.subscribe()
    }

    /// Device whose preview is current
    pub async fn active_device(&self) -> Option<String> {
        self.tracked.lock().await.active.clone()
    }

    /// Playback endpoint of the current preview
    pub async fn active_endpoint(&self) -> Option<PlaybackEndpoint> {
        let tracked = self.tracked.lock().await;
        let id = tracked.active.as_ref()?;
        tracked.sessions.get(id).map(|s| s.endpoint.clone())
    }

    /// Start previewing a device
    ///
    /// Any tracked preview is torn down first. Returns the endpoint in use;
    /// for negotiated previews the state stays `Requesting` until the first
    /// track arrives.
    pub async fn start(&self, device_id: &str) -> Result<PlaybackEndpoint, NegotiationError> {
        let session = self
            .fleet
            .get(device_id)
            .await
            .ok_or_else(|| NegotiationError::UnknownDevice(device_id.to_string()))?;
        let endpoint = resolve_endpoint(
            &self.config,
            self.fleet.room(),
            device_id,
            session.settings.endpoint_url.as_deref(),
        )?;

        let mut tracked = self.tracked.lock().await;
        let closed = self.teardown_all(&mut tracked).await;
        if closed > 0 {
            tracing::debug!(closed = closed, "Previous preview torn down");
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracked.active = Some(device_id.to_string());

        if let PlaybackEndpoint::DirectEmbed(ref url) = endpoint {
            tracing::info!(device = %device_id, url = %url, "Preview embedded directly");
            tracked.sessions.insert(
                device_id.to_string(),
                TrackedPreview {
                    endpoint: endpoint.clone(),
                    media: None,
                    watcher: None,
                },
            );
            self.state.send_replace(PreviewState::Connected);
            return Ok(endpoint);
        }

        self.state.send_replace(PreviewState::Requesting);
        tracing::info!(device = %device_id, url = %endpoint.url(), "Preview negotiating");

        match self.negotiate(endpoint.url(), device_id, generation).await {
            Ok((media, watcher)) => {
                tracked.sessions.insert(
                    device_id.to_string(),
                    TrackedPreview {
                        endpoint: endpoint.clone(),
                        media: Some(media),
                        watcher,
                    },
                );
                Ok(endpoint)
            }
            Err(e) => {
                tracing::warn!(device = %device_id, error = %e, "Preview negotiation failed");
                tracked.sessions.insert(
                    device_id.to_string(),
                    TrackedPreview {
                        endpoint,
                        media: None,
                        watcher: None,
                    },
                );
                self.state.send_replace(PreviewState::Failed {
                    status: e.status(),
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn negotiate(
        &self,
        url: &Url,
        device_id: &str,
        generation: u64,
    ) -> Result<(E::Session, Option<JoinHandle<()>>), NegotiationError> {
        let mut media = self
            .engine
            .open_receive_only(&[MediaKind::Video, MediaKind::Audio])
            .await?;

        let exchanged: Result<(), NegotiationError> = async {
            let offer = media.create_offer().await?;
            let answer = self.exchange(url, offer).await?;
            media.apply_answer(&answer).await
        }
        .await;

        if let Err(e) = exchanged {
            media.close().await;
            return Err(e);
        }

        let watcher = media
            .take_tracks()
            .map(|tracks| self.spawn_track_watcher(tracks, device_id.to_string(), generation));
        Ok((media, watcher))
    }

    async fn exchange(&self, url: &Url, offer: String) -> Result<String, NegotiationError> {
        let response = self
            .http
            .post(url.clone())
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .body(offer)
            .send()
            .await
            .map_err(|e| NegotiationError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NegotiationError::HttpStatus(status.as_u16()));
        }

        response
            .text()
            .await
            .map_err(|e| NegotiationError::Network(e.to_string()))
    }

    fn spawn_track_watcher(
        &self,
        mut tracks: mpsc::UnboundedReceiver<TrackInfo>,
        device_id: String,
        generation: u64,
    ) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let current = Arc::clone(&self.generation);

        tokio::spawn(async move {
            let Some(track) = tracks.recv().await else {
                return;
            };
            if current.load(Ordering::SeqCst) != generation {
                return;
            }

            let connected = state.send_if_modified(|s| {
                if *s == PreviewState::Requesting {
                    *s = PreviewState::Connected;
                    true
                } else {
                    false
                }
            });
            if connected {
                tracing::info!(device = %device_id, track = %track.id, kind = ?track.kind, "Preview connected");
            }
        })
    }

    /// Close the current preview
    ///
    /// Returns `false` when there was nothing to close.
    pub async fn close(&self) -> bool {
        let mut tracked = self.tracked.lock().await;
        let Some(id) = tracked.active.take() else {
            return false;
        };

        if let Some(session) = tracked.sessions.remove(&id) {
            session.teardown().await;
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(PreviewState::Closed);

        tracing::info!(device = %id, "Preview closed");
        true
    }

    /// Close every tracked preview
    ///
    /// Returns the number of sessions torn down.
    pub async fn cleanup_all(&self) -> usize {
        let mut tracked = self.tracked.lock().await;
        self.teardown_all(&mut tracked).await
    }

    async fn teardown_all(&self, tracked: &mut Tracked<E::Session>) -> usize {
        tracked.active = None;
        let sessions: Vec<_> = tracked.sessions.drain().collect();
        let count = sessions.len();

        for (id, session) in sessions {
            session.teardown().await;
            tracing::debug!(device = %id, "Preview session torn down");
        }

        if count > 0 {
            self.generation.fetch_add(1, Ordering::SeqCst);
            self.state.send_replace(PreviewState::Closed);
        }
        count
    }
}
