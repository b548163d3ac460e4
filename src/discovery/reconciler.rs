//! Discovery reconciler
//!
//! Turns registration events, presence changes and inventory listings into
//! registry mutations. All inbound traffic is handled on one task. Control
//! channel events share one receiver, so a device's registration, status and
//! removal are applied in the order they were published.
//!
//! # Authority
//!
//! | source        | creates          | may overwrite                              |
//! |---------------|------------------|--------------------------------------------|
//! | registration  | always           | name, status, kind, settings, devices       |
//! | presence      | if absent        | default name, missing platform              |
//! | inventory     | if absent        | nothing                                     |
//!
//! Sessions created by presence or inventory get a deferred device
//! metadata request, plus one retry if no device list shows up.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use rand::Rng;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::command::{CommandAck, CommandKind};
use crate::error::Result;
use crate::registry::{DeviceKind, DiscoverySource, EntityPatch, NewEntity, Status};
use crate::session::context::{DeviceFleet, FleetContext};
use crate::transport::{
    ChannelKind, ChannelMessage, PresenceAction, PresenceMember, PresenceSubscription,
    Subscription, Transport, TransportSupervisor,
};

use super::events::{
    DeviceList, DeviceMetadataRequest, DeviceUpdate, Registration, Removal, ACK_EVENT,
    DEVICES_LIST_EVENT, RECORDER_READY_EVENT, REMOVED_EVENT, REQUEST_DEVICES_EVENT,
    SETTINGS_EVENT, STATUS_EVENT, STREAMER_READY_EVENT,
};
use super::inventory::{InventoryClient, InventoryListing};
use super::DiscoveryConfig;

const CONTROL_EVENTS: &[&str] = &[
    STREAMER_READY_EVENT,
    RECORDER_READY_EVENT,
    STATUS_EVENT,
    SETTINGS_EVENT,
    REMOVED_EVENT,
    ACK_EVENT,
];

/// Subscriptions held by a running reconciler loop
struct Inbox {
    control: Subscription,
    devices_list: Subscription,
    entered: PresenceSubscription,
    updated: PresenceSubscription,
    left: PresenceSubscription,
}

/// Merges discovery signals into the fleet's registries
pub struct Reconciler<T: Transport> {
    fleet: Arc<FleetContext>,
    supervisor: Arc<TransportSupervisor<T>>,
    config: DiscoveryConfig,
    inventory: Option<InventoryClient>,
    metadata_tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl<T: Transport> Reconciler<T> {
    pub fn new(
        fleet: Arc<FleetContext>,
        supervisor: Arc<TransportSupervisor<T>>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            fleet,
            supervisor,
            config,
            inventory: None,
            metadata_tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Attach an inventory client for [`probe_inventory`](Self::probe_inventory)
    pub fn with_inventory(mut self, client: InventoryClient) -> Self {
        self.inventory = Some(client);
        self
    }

    pub fn fleet(&self) -> &Arc<FleetContext> {
        &self.fleet
    }

    /// Subscribe to every discovery event, then process them on a new task
    ///
    /// Subscriptions are taken before this returns, so nothing published
    /// after the call is missed.
    pub async fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let inbox = self.subscribe().await;
        let reconciler = Arc::clone(self);
        tokio::spawn(async move { reconciler.run(inbox).await })
    }

    async fn subscribe(&self) -> Inbox {
        let sup = &self.supervisor;
        Inbox {
            control: sup.on_events(ChannelKind::Control, CONTROL_EVENTS).await,
            devices_list: sup.on(ChannelKind::Devices, DEVICES_LIST_EVENT).await,
            entered: sup.subscribe_to_presence(PresenceAction::Enter).await,
            updated: sup.subscribe_to_presence(PresenceAction::Update).await,
            left: sup.subscribe_to_presence(PresenceAction::Leave).await,
        }
    }

    async fn run(self: Arc<Self>, mut inbox: Inbox) {
        tracing::debug!(room = %self.fleet.room(), "Reconciler started");

        loop {
            tokio::select! {
                Some(message) = inbox.control.recv() => {
                    self.handle_control(&message).await;
                }
                Some(message) = inbox.devices_list.recv() => {
                    if let Some(list) = decode::<DeviceList>(&message) {
                        self.apply_device_list(&list).await;
                    }
                }
                Some(member) = inbox.entered.recv() => {
                    self.apply_presence(&member).await;
                }
                Some(member) = inbox.updated.recv() => {
                    self.apply_presence(&member).await;
                }
                Some(member) = inbox.left.recv() => {
                    self.apply_presence_leave(&member).await;
                }
                else => break,
            }
        }

        tracing::debug!(room = %self.fleet.room(), "Reconciler stopped");
    }

    async fn handle_control(&self, message: &ChannelMessage) {
        match message.name.as_str() {
            STREAMER_READY_EVENT | RECORDER_READY_EVENT => {
                let kind = if message.name == STREAMER_READY_EVENT {
                    DeviceKind::Streamer
                } else {
                    DeviceKind::Recorder
                };
                if let Some(reg) = decode::<Registration>(message) {
                    self.apply_registration(kind, &reg).await;
                }
            }
            STATUS_EVENT | SETTINGS_EVENT => {
                if let Some(update) = decode::<DeviceUpdate>(message) {
                    self.apply_update(&update).await;
                }
            }
            REMOVED_EVENT => {
                if let Some(removal) = decode::<Removal>(message) {
                    self.apply_removal(&removal.stream_id).await;
                }
            }
            ACK_EVENT => {
                if let Some(ack) = decode::<CommandAck>(message) {
                    self.apply_ack(&ack).await;
                }
            }
            other => tracing::trace!(event = %other, "Control event ignored"),
        }
    }

    /// Apply a registration event
    ///
    /// Returns `true` if a new session was created.
    pub async fn apply_registration(&self, kind: DeviceKind, reg: &Registration) -> bool {
        let id = reg.stream_id.as_str();
        if id.is_empty() {
            tracing::warn!(kind = %kind, "Registration without stream id ignored");
            return false;
        }

        let fleet = self.fleet.fleet(kind);
        self.move_kind(id, kind).await;

        let mut entity = NewEntity::new(self.fleet.room(), DiscoverySource::Registration)
            .status(reg.status.unwrap_or(Status::Ready));
        if let Some(ref name) = reg.name {
            entity = entity.name(name.clone());
        }

        let created = fleet.registry.add_entity(id, entity).await;
        let patch = if created {
            EntityPatch {
                devices: reg.devices.clone(),
                settings: reg.settings.clone(),
                ..Default::default()
            }
        } else {
            fleet
                .registry
                .modify(id, |s| s.origin = DiscoverySource::Registration)
                .await;
            reg.to_patch()
        };

        if !patch.is_empty() {
            if let Err(e) = fleet.registry.update_entity(id, &patch).await {
                tracing::debug!(device = %id, error = %e, "Registration merge skipped");
            }
        }

        if let Some(status) = reg.status {
            confirm_from_status(fleet, id, status).await;
        }

        created
    }

    /// Move a session registered under the other kind into `kind`
    ///
    /// Session state and in-flight commands (with their original deadlines)
    /// follow the device. A pending metadata request is dropped since the
    /// registration that triggered the move is authoritative.
    async fn move_kind(&self, id: &str, kind: DeviceKind) -> bool {
        let other = self.fleet.fleet(other_kind(kind));
        let Some(session) = other.registry.remove_entity(id).await else {
            return false;
        };
        let in_flight = other.pending.take_device(id).await;
        if let Some(task) = self.metadata_tasks.lock().await.remove(id) {
            task.abort();
        }

        tracing::info!(
            device = %id,
            from = %other.kind(),
            to = %kind,
            pending = in_flight.len(),
            "Device changed kind"
        );
        let fleet = self.fleet.fleet(kind);
        if fleet.registry.insert_session(session).await {
            fleet.pending.adopt(id, in_flight).await;
        }
        true
    }

    /// Apply a presence enter or update
    ///
    /// Members without a device role are ignored. Returns `true` if a new
    /// session was created.
    pub async fn apply_presence(self: &Arc<Self>, member: &PresenceMember) -> bool {
        let Some(kind) = member.data.role_tag().and_then(DeviceKind::from_role) else {
            tracing::trace!(client_id = %member.client_id, "Presence member without device role");
            return false;
        };
        let id = member.client_id.as_str();
        let name = member
            .data
            .participant_name
            .clone()
            .filter(|n| !n.trim().is_empty());
        let platform = member.data.platform.clone();

        if let Some(existing) = self.fleet.locate(id).await {
            self.fleet
                .fleet(existing)
                .registry
                .modify(id, |s| {
                    s.origin = s.origin.max(DiscoverySource::Presence);
                    if let (true, Some(name)) = (s.name_is_default, name) {
                        s.name = name;
                        s.name_is_default = false;
                    }
                    if s.platform.is_none() {
                        s.platform = platform;
                    }
                    s.last_seen = Instant::now();
                })
                .await;
            return false;
        }

        let mut entity = NewEntity::new(self.fleet.room(), DiscoverySource::Presence);
        if let Some(name) = name {
            entity = entity.name(name);
        }
        if let Some(platform) = platform {
            entity = entity.platform(platform);
        }

        let created = self.fleet.fleet(kind).registry.add_entity(id, entity).await;
        if created {
            self.schedule_metadata_requests(id).await;
        }
        created
    }

    /// Apply a full presence snapshot
    ///
    /// Returns the number of sessions created.
    pub async fn apply_presence_snapshot(self: &Arc<Self>, members: &[PresenceMember]) -> usize {
        let mut created = 0;
        for member in members {
            if self.apply_presence(member).await {
                created += 1;
            }
        }
        created
    }

    /// Apply a presence leave; removes the session
    pub async fn apply_presence_leave(&self, member: &PresenceMember) -> bool {
        self.apply_removal(&member.client_id).await
    }

    /// Pull the current presence set of the control channel
    pub async fn sync_presence(self: &Arc<Self>) -> Result<usize> {
        let members = self.supervisor.get_presence().await?;
        let created = self.apply_presence_snapshot(&members).await;
        tracing::debug!(members = members.len(), created = created, "Presence synced");
        Ok(created)
    }

    /// Apply an inventory listing
    ///
    /// Returns the number of sessions created.
    pub async fn apply_inventory(self: &Arc<Self>, listing: &InventoryListing) -> usize {
        let mut created = 0;

        for id in listing.ids_for_room(self.fleet.room()) {
            if self.fleet.locate(&id).await.is_some() {
                continue;
            }
            let entity = NewEntity::new(self.fleet.room(), DiscoverySource::Inventory);
            if self.fleet.streamers().registry.add_entity(&id, entity).await {
                self.schedule_metadata_requests(&id).await;
                created += 1;
            }
        }

        created
    }

    /// Fetch the inventory listing and apply it
    ///
    /// A no-op when no inventory client is attached.
    pub async fn probe_inventory(self: &Arc<Self>) -> Result<usize> {
        let Some(ref client) = self.inventory else {
            return Ok(0);
        };
        let listing = client.fetch().await?;
        let created = self.apply_inventory(&listing).await;
        tracing::info!(url = %client.url(), created = created, "Inventory probed");
        Ok(created)
    }

    /// Apply a status or settings update
    ///
    /// Returns `false` for unknown devices.
    pub async fn apply_update(&self, update: &DeviceUpdate) -> bool {
        let id = update.stream_id.as_str();
        let Some(kind) = self.fleet.locate(id).await else {
            tracing::debug!(device = %id, "Update for unknown device ignored");
            return false;
        };
        let fleet = self.fleet.fleet(kind);

        if let Err(e) = fleet.registry.update_entity(id, &update.patch).await {
            tracing::debug!(device = %id, error = %e, "Update dropped");
            return false;
        }
        if let Some(status) = update.patch.status {
            confirm_from_status(fleet, id, status).await;
        }
        true
    }

    /// Apply a device enumeration
    pub async fn apply_device_list(&self, list: &DeviceList) -> bool {
        let id = list.stream_id.as_str();
        let Some(kind) = self.fleet.locate(id).await else {
            tracing::debug!(device = %id, "Device list for unknown device ignored");
            return false;
        };

        let patch = EntityPatch::devices(list.to_patch());
        self.fleet
            .fleet(kind)
            .registry
            .update_entity(id, &patch)
            .await
            .is_ok()
    }

    /// Apply an explicit command acknowledgement
    pub async fn apply_ack(&self, ack: &CommandAck) -> bool {
        for fleet in self.fleet.fleets() {
            if fleet.pending.acknowledge(&ack.correlation_id).await.is_some() {
                return true;
            }
        }
        tracing::debug!(
            device = %ack.stream_id,
            correlation_id = %ack.correlation_id,
            "Acknowledgement matched no pending command"
        );
        false
    }

    /// Remove a device
    pub async fn apply_removal(&self, id: &str) -> bool {
        if let Some(task) = self.metadata_tasks.lock().await.remove(id) {
            task.abort();
        }
        self.fleet.remove(id).await.is_some()
    }

    async fn schedule_metadata_requests(self: &Arc<Self>, id: &str) {
        let created_at = Instant::now();
        let first = created_at + self.jitter();
        let retry = created_at + self.config.metadata_retry_delay;
        let weak: Weak<Self> = Arc::downgrade(self);
        let device = id.to_string();

        let task = tokio::spawn(async move {
            tokio::time::sleep_until(first).await;
            let Some(reconciler) = weak.upgrade() else {
                return;
            };
            if !reconciler.request_metadata(&device, 1).await {
                return;
            }
            drop(reconciler);

            tokio::time::sleep_until(retry).await;
            let Some(reconciler) = weak.upgrade() else {
                return;
            };
            match reconciler.fleet.get(&device).await {
                Some(session) if session.has_device_metadata() => {
                    tracing::debug!(device = %device, "Device list received, retry skipped");
                }
                Some(_) => {
                    reconciler.request_metadata(&device, 2).await;
                }
                None => {}
            }
        });

        if let Some(previous) = self.metadata_tasks.lock().await.insert(id.to_string(), task) {
            previous.abort();
        }
    }

    fn jitter(&self) -> Duration {
        let min = self.config.metadata_delay_min.as_millis() as u64;
        let max = (self.config.metadata_delay_max.as_millis() as u64).max(min);
        Duration::from_millis(rand::rng().random_range(min..=max))
    }

    /// Returns `false` if the device is gone
    async fn request_metadata(&self, id: &str, attempt: u8) -> bool {
        if self.fleet.locate(id).await.is_none() {
            return false;
        }

        let request = DeviceMetadataRequest {
            stream_id: id.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            attempt,
        };
        match self
            .supervisor
            .publish_to_device_channel(REQUEST_DEVICES_EVENT, &request)
            .await
        {
            Ok(()) => tracing::debug!(device = %id, attempt = attempt, "Device metadata requested"),
            Err(e) => tracing::warn!(device = %id, error = %e, "Device metadata request failed"),
        }
        true
    }

    /// Cancel every scheduled metadata request
    pub async fn shutdown(&self) {
        let mut tasks = self.metadata_tasks.lock().await;
        for (_, task) in tasks.drain() {
            task.abort();
        }
    }
}

fn other_kind(kind: DeviceKind) -> DeviceKind {
    match kind {
        DeviceKind::Streamer => DeviceKind::Recorder,
        DeviceKind::Recorder => DeviceKind::Streamer,
    }
}

/// Treat a reported status as confirmation of the matching command
async fn confirm_from_status(fleet: &DeviceFleet, id: &str, status: Status) {
    let command = match status {
        Status::Active => CommandKind::Start,
        Status::Stopped => CommandKind::Stop,
        _ => return,
    };
    fleet.pending.clear(id, command).await;
}

fn decode<P: DeserializeOwned>(message: &ChannelMessage) -> Option<P> {
    match message.decode() {
        Ok(payload) => Some(payload),
        Err(e) => {
            tracing::warn!(
                channel = %message.channel,
                event = %message.name,
                error = %e,
                "Malformed discovery payload"
            );
            None
        }
    }
}
