//! End-to-end console flows over the in-process transport

use std::time::Duration;

use serde_json::{json, Map};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

use fleet_console::preview::{MediaKind, TrackInfo};
use fleet_console::registry::DiscoverySource;
use fleet_console::transport::PresenceMember;
use fleet_console::{
    CommandKind, ConsoleConfig, ConsoleSession, DeviceSession, EntityRegistry, Error, MediaEngine,
    MediaSession, MemoryHub, MemoryTransport, NegotiationError, PreviewConfig, PreviewState, Status,
    TransportConfig, TransportKey,
};

fn console(hub: &MemoryHub, preview: PreviewConfig) -> ConsoleSession<MemoryTransport> {
    let config = ConsoleConfig::new(
        "studio",
        TransportConfig::new(TransportKey::new("test"), "memory://"),
    )
    .preview(preview);
    ConsoleSession::new(hub.transport(), config).unwrap()
}

async fn wait_for<F>(registry: &EntityRegistry, id: &str, predicate: F) -> DeviceSession
where
    F: Fn(&DeviceSession) -> bool,
{
    let poll = async {
        loop {
            if let Some(session) = registry.get_entity(id).await {
                if predicate(&session) {
                    return session;
                }
            }
            tokio::task::yield_now().await;
        }
    };
    tokio::time::timeout(Duration::from_secs(30), poll)
        .await
        .expect("device never reached the expected state")
}

#[tokio::test(start_paused = true)]
async fn discovery_command_and_timeout() {
    let hub = MemoryHub::new();
    hub.enter_presence("studio", PresenceMember::with_role("p1", "streamer"));

    let console = console(&hub, PreviewConfig::default());
    assert_ok!(console.connect().await);

    // Presence snapshot
    let streamers = &console.fleet().streamers().registry;
    let p1 = streamers.get_entity("p1").await.unwrap();
    assert_eq!(p1.origin, DiscoverySource::Presence);
    assert_eq!(p1.status, Status::Ready);

    tokio::time::sleep(Duration::from_millis(1001)).await;
    assert_eq!(hub.published("studio-devices", "request-devices").len(), 1);

    // Registration
    hub.publish_json(
        "cam1",
        "studio",
        "streamer-ready",
        &json!({"streamId": "cam1", "name": "Stage left", "status": "ready"}),
    );
    let cam1 = wait_for(streamers, "cam1", |_| true).await;
    assert_eq!(cam1.name, "Stage left");

    // START confirmed by a status event
    assert_ok!(console.streamers().start("cam1").await);
    assert!(streamers.get_entity("cam1").await.unwrap().is_pending(&CommandKind::Start));
    hub.publish_json("cam1", "studio", "status", &json!({"streamId": "cam1", "status": "streaming"}));
    let cam1 = wait_for(streamers, "cam1", |s| s.is_active()).await;
    assert!(!cam1.is_pending(&CommandKind::Start));
    assert!(cam1.active_since.is_some());

    // STOP to a device that never answers expires after exactly 10 s
    let mut timeouts = console.streamers().pending().subscribe_timeouts();
    assert_ok!(console.streamers().stop("p1").await);
    let sent = Instant::now();
    let timeout = timeouts.recv().await.unwrap();
    assert_eq!(sent.elapsed(), Duration::from_secs(10));
    assert_eq!(timeout.device_id, "p1");
    assert_eq!(timeout.command, CommandKind::Stop);
    assert!(!streamers.get_entity("p1").await.unwrap().is_pending(&CommandKind::Stop));

    let stats = console.stats().await;
    assert_eq!(stats.streamers.total, 2);
    assert_eq!(stats.streamers.active, 1);

    console.disconnect().await;
    assert_eq!(console.stats().await.total(), 0);
    assert!(matches!(
        console.streamers().start("cam1").await,
        Err(Error::NotConnected)
    ));
}

#[tokio::test]
async fn acknowledged_settings_update() {
    let hub = MemoryHub::new();
    let console = console(&hub, PreviewConfig::default());
    assert_ok!(console.connect().await);

    hub.publish_json("rec1", "studio", "recorder-ready", &json!({"streamId": "rec1"}));
    let recorders = &console.fleet().recorders().registry;
    wait_for(recorders, "rec1", |_| true).await;

    let mut payload = Map::new();
    payload.insert("bitrate".into(), json!(12000));
    let envelope = console
        .recorders()
        .send("rec1", CommandKind::UpdateSettings, payload)
        .await
        .unwrap();

    hub.publish_json(
        "rec1",
        "studio",
        "settings-updated",
        &json!({"streamId": "rec1", "settings": {"bitrate": 12000}}),
    );
    let rec1 = wait_for(recorders, "rec1", |s| s.settings.bitrate == 12000).await;
    assert!(rec1.is_pending(&CommandKind::UpdateSettings));
    assert_eq!(rec1.settings.resolution, "1920x1080");

    hub.publish_json(
        "rec1",
        "studio",
        "command-ack",
        &json!({"streamId": "rec1", "command": "UPDATE_SETTINGS", "correlationId": envelope.correlation_id}),
    );
    wait_for(recorders, "rec1", |s| s.pending_commands.is_empty()).await;

    console.disconnect().await;
}

struct UnusedEngine;

struct UnusedSession;

impl MediaEngine for UnusedEngine {
    type Session = UnusedSession;

    async fn open_receive_only(&self, _lines: &[MediaKind]) -> Result<UnusedSession, NegotiationError> {
        Err(NegotiationError::Media("no media stack in tests".into()))
    }
}

impl MediaSession for UnusedSession {
    async fn create_offer(&mut self) -> Result<String, NegotiationError> {
        Err(NegotiationError::Media("unused".into()))
    }

    async fn apply_answer(&mut self, _answer: &str) -> Result<(), NegotiationError> {
        Err(NegotiationError::Media("unused".into()))
    }

    fn take_tracks(&mut self) -> Option<mpsc::UnboundedReceiver<TrackInfo>> {
        None
    }

    async fn close(&mut self) {}
}

#[tokio::test]
async fn preview_direct_embed_and_media_failure() {
    let hub = MemoryHub::new();
    let console = console(
        &hub,
        PreviewConfig::default().http_only_host("hls.example.com"),
    );
    assert_ok!(console.connect().await);

    hub.publish_json(
        "cam1",
        "studio",
        "streamer-ready",
        &json!({
            "streamId": "cam1",
            "settings": {"endpointUrl": "https://hls.example.com/studio/cam1/whip"}
        }),
    );
    hub.publish_json("cam2", "studio", "streamer-ready", &json!({"streamId": "cam2"}));
    let streamers = &console.fleet().streamers().registry;
    wait_for(streamers, "cam1", |s| s.settings.endpoint_url.is_some()).await;
    wait_for(streamers, "cam2", |_| true).await;

    let preview = console.preview(UnusedEngine).unwrap();

    let endpoint = preview.start("cam1").await.unwrap();
    assert!(endpoint.is_direct());
    assert_eq!(endpoint.url().as_str(), "https://hls.example.com/studio/cam1");
    assert_eq!(preview.state(), PreviewState::Connected);

    // cam2 has no publish endpoint; the media engine refuses before any HTTP
    let err = assert_err!(preview.start("cam2").await);
    assert!(matches!(err, NegotiationError::Media(_)));
    assert!(matches!(preview.state(), PreviewState::Failed { status: None, .. }));
    assert_eq!(preview.active_device().await.as_deref(), Some("cam2"));

    assert_eq!(preview.cleanup_all().await, 1);
    assert_eq!(preview.state(), PreviewState::Closed);

    console.disconnect().await;
}
