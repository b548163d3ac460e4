//! Console driving simulated devices over the in-process transport
//!
//! Run with: cargo run --example loopback_console
//!
//! Log level follows RUST_LOG (default `fleet_console=debug`), e.g.:
//!   RUST_LOG=fleet_console=trace cargo run --example loopback_console
//!
//! Two simulated devices join the room:
//!   cam1: a streamer that registers itself and answers START/STOP/UPDATE_SETTINGS
//!   rec1: a recorder that only shows up in presence and ignores RELOAD
//!
//! The console discovers both, starts cam1, pushes new settings, and sends
//! a RELOAD that times out.

use std::time::Duration;

use bytes::Bytes;
use serde_json::{json, Map, Value};
use tracing_subscriber::EnvFilter;

use fleet_console::command::{DispatchConfig, COMMAND_EVENT};
use fleet_console::transport::{Inbound, PresenceData, PresenceMember};
use fleet_console::{
    CommandKind, ConsoleConfig, ConsoleSession, DeviceKind, MemoryHub, Transport, TransportConfig,
    TransportError, TransportKey,
};

const ROOM: &str = "studio";
const DEVICES_CHANNEL: &str = "studio-devices";

/// Simulated device
async fn run_device(hub: MemoryHub, id: &'static str, kind: DeviceKind, register: bool) -> Result<(), TransportError> {
    let transport = hub.transport();
    let mut inbound = transport
        .connect(id, &[ROOM.to_string(), DEVICES_CHANNEL.to_string()])
        .await?;

    hub.enter_presence(
        ROOM,
        PresenceMember::new(
            id,
            PresenceData {
                role: Some(kind.to_string()),
                participant_name: Some(format!("{} handset", id)),
                platform: Some("android".into()),
                ..Default::default()
            },
        ),
    );

    let publish = |channel: &'static str, name: String, value: Value| {
        let transport = transport.clone();
        async move { transport.publish(channel, &name, Bytes::from(value.to_string())).await }
    };

    if register {
        publish(
            ROOM,
            format!("{}-ready", kind),
            json!({"streamId": id, "name": "Stage left", "status": "ready"}),
        )
        .await?;
    }

    while let Some(event) = inbound.recv().await {
        let Inbound::Message(message) = event else {
            continue;
        };
        let Ok(payload) = message.decode::<Value>() else {
            continue;
        };
        if payload["streamId"] != id {
            continue;
        }

        match (message.name.as_str(), payload["command"].as_str()) {
            (COMMAND_EVENT, Some("START")) => {
                publish(ROOM, "status".into(), json!({"streamId": id, "status": "streaming"})).await?;
            }
            (COMMAND_EVENT, Some("STOP")) => {
                publish(ROOM, "status".into(), json!({"streamId": id, "status": "stopped"})).await?;
            }
            (COMMAND_EVENT, Some("UPDATE_SETTINGS")) => {
                let mut settings = payload.clone();
                if let Some(map) = settings.as_object_mut() {
                    for key in ["command", "streamId", "timestamp", "correlationId"] {
                        map.remove(key);
                    }
                }
                publish(ROOM, "settings-updated".into(), json!({"streamId": id, "settings": settings})).await?;
                publish(
                    ROOM,
                    "command-ack".into(),
                    json!({
                        "streamId": id,
                        "command": "UPDATE_SETTINGS",
                        "correlationId": payload["correlationId"],
                    }),
                )
                .await?;
            }
            ("request-devices", _) => {
                publish(
                    DEVICES_CHANNEL,
                    "devices-list".into(),
                    json!({
                        "streamId": id,
                        "video": [
                            {"deviceId": "back", "label": "Back camera"},
                            {"deviceId": "front", "label": "Front camera"}
                        ],
                        "audio": [{"deviceId": "mic", "label": "Built-in microphone"}],
                        "currentVideo": {"deviceId": "back", "label": "Back camera"},
                        "currentAudio": {"deviceId": "mic", "label": "Built-in microphone"}
                    }),
                )
                .await?;
            }
            _ => {}
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fleet_console=debug")),
        )
        .init();

    let hub = MemoryHub::new();
    let config = ConsoleConfig::new(ROOM, TransportConfig::new(TransportKey::new("demo"), "memory://"))
        .dispatch(DispatchConfig::default().command_timeout(Duration::from_secs(2)));
    let console = ConsoleSession::new(hub.transport(), config)?;
    console.connect().await?;

    for (id, kind, register) in [
        ("cam1", DeviceKind::Streamer, true),
        ("rec1", DeviceKind::Recorder, false),
    ] {
        let hub = hub.clone();
        tokio::spawn(async move {
            if let Err(e) = run_device(hub, id, kind, register).await {
                tracing::error!(device = %id, error = %e, "Simulated device failed");
            }
        });
    }

    // Metadata requests go out within a second of discovery
    tokio::time::sleep(Duration::from_millis(1500)).await;
    for session in console.fleet().streamers().registry.list().await {
        println!(
            "streamer {} ({}) status={} video={:?}",
            session.id, session.name, session.status, session.devices.video.current_label
        );
    }
    for session in console.fleet().recorders().registry.list().await {
        println!(
            "recorder {} ({}) status={} platform={:?}",
            session.id, session.name, session.status, session.platform
        );
    }

    console.streamers().start("cam1").await?;
    let mut settings = Map::new();
    settings.insert("bitrate".into(), Value::from(4500));
    console
        .streamers()
        .send("cam1", CommandKind::UpdateSettings, settings)
        .await?;

    let mut timeouts = console.recorders().pending().subscribe_timeouts();
    console
        .recorders()
        .send("rec1", CommandKind::Reload, Map::new())
        .await?;
    let timeout = timeouts.recv().await?;
    println!("{} to {} timed out after {:?}", timeout.command, timeout.device_id, timeout.timeout);

    let cam1 = console.fleet().get("cam1").await;
    if let Some(cam1) = cam1 {
        println!(
            "cam1 status={} bitrate={} elapsed={:?} pending={:?}",
            cam1.status, cam1.settings.bitrate, cam1.elapsed, cam1.pending_commands
        );
    }

    let stats = console.stats().await;
    println!("{} devices, {} active", stats.total(), stats.active());

    console.disconnect().await;
    Ok(())
}
