//! The single task that owns the [`ChatEngine`].
//!
//! Sockets and HTTP handlers talk to it through a [`HubHandle`]. Commands are
//! applied one at a time in arrival order, so the engine needs no locking.

use std::path::PathBuf;
use std::sync::Arc;

use pairchat_core::{ClientEvent, ConnectionId};
use pairchat_engine::{ActivityRecord, ChatEngine, EngineStats, Outbox, Target};
use pairchat_telemetry::MetricsRecorder;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::client::ClientRegistry;
use crate::error::ServerError;
use crate::uploads::{UploadTracker, ANONYMOUS_OWNER};

const HUB_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug)]
pub enum HubCommand {
    Connect {
        id: ConnectionId,
    },
    Inbound {
        id: ConnectionId,
        text: String,
    },
    Disconnect {
        id: ConnectionId,
    },
    TrackUpload {
        owner: String,
        path: PathBuf,
    },
    CheckName {
        name: String,
        reply: oneshot::Sender<bool>,
    },
    Activity {
        reply: oneshot::Sender<Vec<ActivityRecord>>,
    },
    Stats {
        reply: oneshot::Sender<EngineStats>,
    },
}

/// Cloneable sender side of the hub.
#[derive(Clone, Debug)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    async fn send(&self, command: HubCommand) -> Result<(), ServerError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| ServerError::HubUnavailable)
    }

    async fn ask<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> HubCommand,
    ) -> Result<T, ServerError> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply)).await?;
        rx.await.map_err(|_| ServerError::HubUnavailable)
    }

    pub async fn connect(&self, id: &ConnectionId) {
        if self.send(HubCommand::Connect { id: id.clone() }).await.is_err() {
            tracing::debug!(connection_id = %id, "hub gone, connect not delivered");
        }
    }

    pub async fn inbound(&self, id: &ConnectionId, text: String) {
        if self
            .send(HubCommand::Inbound {
                id: id.clone(),
                text,
            })
            .await
            .is_err()
        {
            tracing::debug!(connection_id = %id, "hub gone, frame not delivered");
        }
    }

    pub async fn disconnect(&self, id: &ConnectionId) {
        if self
            .send(HubCommand::Disconnect { id: id.clone() })
            .await
            .is_err()
        {
            tracing::debug!(connection_id = %id, "hub gone, disconnect not delivered");
        }
    }

    pub async fn track_upload(&self, owner: &str, path: PathBuf) -> Result<(), ServerError> {
        self.send(HubCommand::TrackUpload {
            owner: owner.to_string(),
            path,
        })
        .await
    }

    pub async fn check_name(&self, name: &str) -> Result<bool, ServerError> {
        let name = name.to_string();
        self.ask(|reply| HubCommand::CheckName { name, reply }).await
    }

    pub async fn activity(&self) -> Result<Vec<ActivityRecord>, ServerError> {
        self.ask(|reply| HubCommand::Activity { reply }).await
    }

    pub async fn stats(&self) -> Result<EngineStats, ServerError> {
        self.ask(|reply| HubCommand::Stats { reply }).await
    }
}

pub struct Hub {
    engine: ChatEngine,
    clients: Arc<ClientRegistry>,
    uploads: UploadTracker,
    metrics: Arc<MetricsRecorder>,
}

impl Hub {
    pub fn new(
        engine: ChatEngine,
        clients: Arc<ClientRegistry>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            engine,
            clients,
            uploads: UploadTracker::default(),
            metrics,
        }
    }

    /// Start the hub task. It ends once every [`HubHandle`] is dropped.
    pub fn spawn(self) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(HUB_CHANNEL_CAPACITY);
        let task = tokio::spawn(self.run(rx));
        (HubHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<HubCommand>) {
        tracing::info!("hub started");
        while let Some(command) = rx.recv().await {
            self.apply(command);
        }
        tracing::info!("hub stopped");
    }

    pub fn apply(&mut self, command: HubCommand) {
        match command {
            HubCommand::Connect { id } => self.on_connect(id),
            HubCommand::Inbound { id, text } => self.on_inbound(id, &text),
            HubCommand::Disconnect { id } => self.on_disconnect(id),
            HubCommand::TrackUpload { owner, path } => self.on_track_upload(owner, path),
            HubCommand::CheckName { name, reply } => {
                let _ = reply.send(self.engine.is_name_available(&name));
            }
            HubCommand::Activity { reply } => {
                let _ = reply.send(self.engine.activity());
            }
            HubCommand::Stats { reply } => {
                let _ = reply.send(self.engine.stats());
            }
        }
    }

    fn on_connect(&mut self, id: ConnectionId) {
        match self.engine.connect(&id) {
            Ok(outbox) => {
                tracing::info!(connection_id = %id, "user connected");
                self.metrics.counter_inc("connections_total", &[], 1);
                self.deliver(outbox);
                self.update_gauges();
            }
            Err(e) => tracing::error!(connection_id = %id, error = %e, "connect rejected"),
        }
    }

    fn on_inbound(&mut self, id: ConnectionId, text: &str) {
        let event: ClientEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(connection_id = %id, error = %e, "dropping malformed frame");
                return;
            }
        };

        let name = event.name();
        let is_relay = event.is_relay();
        let ends_chat = matches!(event, ClientEvent::EndChat);
        self.metrics.counter_inc("events_total", &[("event", name)], 1);
        tracing::debug!(connection_id = %id, event = name, "event received");

        let outbox = self.engine.handle(&id, event);
        if is_relay && outbox.is_empty() {
            self.metrics
                .counter_inc("relay_dropped_total", &[("event", name)], 1);
        }
        self.deliver(outbox);
        self.record_session_lengths();

        if ends_chat {
            self.uploads.purge(id.as_str());
        }
        self.update_gauges();
    }

    fn on_disconnect(&mut self, id: ConnectionId) {
        let known = self.engine.is_connected(&id);
        let outbox = self.engine.disconnect(&id);
        if known {
            self.metrics.counter_inc("disconnections_total", &[], 1);
            let duration = self
                .engine
                .latest_activity()
                .filter(|r| r.id == id)
                .map(|r| r.duration);
            if let Some(minutes) = duration {
                self.metrics
                    .histogram_observe("connection_duration_minutes", &[], minutes);
            }
            tracing::info!(connection_id = %id, duration_minutes = ?duration, "user disconnected");
        }
        self.deliver(outbox);
        self.record_session_lengths();
        self.uploads.purge(id.as_str());
        self.update_gauges();
    }

    fn record_session_lengths(&mut self) {
        for minutes in self.engine.drain_session_lengths() {
            self.metrics
                .histogram_observe("session_duration_minutes", &[], minutes);
        }
    }

    /// Files uploaded under an id that is not a live connection are pooled
    /// with the anonymous uploads, which are capped.
    fn on_track_upload(&mut self, owner: String, path: PathBuf) {
        self.metrics.counter_inc("uploads_total", &[], 1);
        let live = self.engine.is_connected(&ConnectionId::from_raw(owner.clone()));
        if live {
            self.uploads.track(&owner, path);
        } else {
            if owner != ANONYMOUS_OWNER {
                tracing::debug!(owner = %owner, "upload owner not connected, pooled as anonymous");
            }
            if self.uploads.track_anonymous(path) > 0 {
                self.metrics.counter_inc("uploads_evicted_total", &[], 1);
            }
        }
    }

    fn deliver(&self, outbox: Outbox) {
        for delivery in outbox {
            let frame = match serde_json::to_string(&delivery.event) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(
                        event = delivery.event.name(),
                        error = %e,
                        "failed to serialize event"
                    );
                    continue;
                }
            };
            match delivery.target {
                Target::Connection(id) => {
                    self.clients.send_to(&id, frame);
                }
                Target::Everyone => {
                    self.clients.broadcast(&frame);
                }
            }
        }
    }

    fn update_gauges(&self) {
        let stats = self.engine.stats();
        self.metrics
            .gauge_set("online_connections", &[], stats.online as f64);
        self.metrics
            .gauge_set("waiting_connections", &[], stats.waiting as f64);
        self.metrics
            .gauge_set("active_sessions", &[], stats.sessions as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    struct Harness {
        hub: Hub,
        clients: Arc<ClientRegistry>,
        metrics: Arc<MetricsRecorder>,
    }

    impl Harness {
        fn new() -> Self {
            let clients = Arc::new(ClientRegistry::new(64));
            let metrics = Arc::new(MetricsRecorder::new());
            let hub = Hub::new(ChatEngine::new(), Arc::clone(&clients), Arc::clone(&metrics));
            Self {
                hub,
                clients,
                metrics,
            }
        }

        fn join(&mut self) -> (ConnectionId, mpsc::Receiver<String>) {
            let (id, rx) = self.clients.register();
            self.hub.apply(HubCommand::Connect { id: id.clone() });
            (id, rx)
        }

        fn send(&mut self, id: &ConnectionId, frame: Value) {
            self.hub.apply(HubCommand::Inbound {
                id: id.clone(),
                text: frame.to_string(),
            });
        }
    }

    /// Drain queued frames, skipping the connect greeting and online-count broadcasts.
    fn frames(rx: &mut mpsc::Receiver<String>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(text) = rx.try_recv() {
            let value: Value = serde_json::from_str(&text).unwrap();
            if value["event"] != "updateOnlineUsers" && value["event"] != "connected" {
                out.push(value);
            }
        }
        out
    }

    #[test]
    fn connect_broadcasts_online_count() {
        let mut h = Harness::new();
        let (a, mut rx_a) = h.join();
        let (_b, _rx_b) = h.join();

        let mut next = || -> Value { serde_json::from_str(&rx_a.try_recv().unwrap()).unwrap() };
        assert_eq!(
            next(),
            json!({"event": "connected", "data": {"connectionId": a.as_str()}})
        );
        assert_eq!(next(), json!({"event": "updateOnlineUsers", "data": 1}));
        assert_eq!(next(), json!({"event": "updateOnlineUsers", "data": 2}));
        assert_eq!(h.metrics.counter_get("connections_total", &[]), 2);
        assert_eq!(h.metrics.gauge_get("online_connections", &[]), 2.0);
    }

    #[test]
    fn pairing_and_relay_over_frames() {
        let mut h = Harness::new();
        let (a, mut rx_a) = h.join();
        let (b, mut rx_b) = h.join();

        h.send(&a, json!({"event": "setUsername", "data": "Nova"}));
        h.send(&a, json!({"event": "startChat"}));
        assert_eq!(frames(&mut rx_a), vec![json!({"event": "waiting"})]);

        h.send(&b, json!({"event": "startChat"}));
        let started = |partner: &ConnectionId, name: &str| {
            json!({
                "event": "chatStarted",
                "data": {"partnerId": partner.as_str(), "partnerUsername": name}
            })
        };
        assert_eq!(frames(&mut rx_a), vec![started(&b, "Anonymous")]);
        assert_eq!(frames(&mut rx_b), vec![started(&a, "Nova")]);

        h.send(&a, json!({"event": "chatMessage", "data": {"text": "hi"}}));
        assert_eq!(
            frames(&mut rx_b),
            vec![json!({"event": "chatMessage", "data": {"text": "hi"}})]
        );
        assert!(frames(&mut rx_a).is_empty());
        assert_eq!(h.metrics.gauge_get("active_sessions", &[]), 1.0);
        assert_eq!(
            h.metrics.counter_get("events_total", &[("event", "chatMessage")]),
            1
        );
    }

    #[test]
    fn unpaired_relay_is_counted_as_dropped() {
        let mut h = Harness::new();
        let (a, mut rx_a) = h.join();
        h.send(&a, json!({"event": "offer", "data": {"sdp": "x"}}));
        assert!(frames(&mut rx_a).is_empty());
        assert_eq!(
            h.metrics.counter_get("relay_dropped_total", &[("event", "offer")]),
            1
        );
    }

    #[test]
    fn malformed_frames_are_ignored() {
        let mut h = Harness::new();
        let (a, mut rx_a) = h.join();
        h.hub.apply(HubCommand::Inbound {
            id: a.clone(),
            text: "not json".into(),
        });
        h.send(&a, json!({"event": "noSuchEvent"}));
        assert!(frames(&mut rx_a).is_empty());
        assert_eq!(h.hub.engine.state_of(&a), pairchat_engine::MatchState::Idle);
    }

    #[test]
    fn disconnect_requeues_partner_and_records_duration() {
        let mut h = Harness::new();
        let (a, _rx_a) = h.join();
        let (b, mut rx_b) = h.join();
        h.send(&a, json!({"event": "startChat"}));
        h.send(&b, json!({"event": "startChat"}));
        frames(&mut rx_b);

        h.clients.unregister(&a);
        h.hub.apply(HubCommand::Disconnect { id: a.clone() });

        assert_eq!(
            frames(&mut rx_b),
            vec![json!({"event": "chatEnded"}), json!({"event": "waiting"})]
        );
        assert_eq!(h.metrics.counter_get("disconnections_total", &[]), 1);
        assert_eq!(
            h.metrics
                .histogram_summary("connection_duration_minutes", &[])
                .count,
            1
        );
        assert_eq!(h.metrics.gauge_get("waiting_connections", &[]), 1.0);

        h.hub.apply(HubCommand::Disconnect { id: a });
        assert_eq!(h.metrics.counter_get("disconnections_total", &[]), 1);
    }

    #[tokio::test]
    async fn end_chat_purges_owned_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip.webm");
        std::fs::write(&file, b"x").unwrap();

        let mut h = Harness::new();
        let (a, _rx_a) = h.join();
        h.hub.apply(HubCommand::TrackUpload {
            owner: a.as_str().to_string(),
            path: file.clone(),
        });
        assert_eq!(h.metrics.counter_get("uploads_total", &[]), 1);

        h.send(&a, json!({"event": "endChat"}));
        assert_eq!(h.hub.uploads.tracked(a.as_str()), 0);

        for _ in 0..50 {
            if !file.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!file.exists());
    }

    #[test]
    fn closed_sessions_feed_duration_histogram() {
        let mut h = Harness::new();
        let (a, _rx_a) = h.join();
        let (b, _rx_b) = h.join();
        h.send(&a, json!({"event": "startChat"}));
        h.send(&b, json!({"event": "startChat"}));

        h.send(&a, json!({"event": "endChat"}));
        let summary = h.metrics.histogram_summary("session_duration_minutes", &[]);
        assert_eq!(summary.count, 1);

        // Re-paired with each other, so the disconnect closes a second session.
        h.clients.unregister(&b);
        h.hub.apply(HubCommand::Disconnect { id: b });
        let summary = h.metrics.histogram_summary("session_duration_minutes", &[]);
        assert_eq!(summary.count, 2);
        assert!(summary.sum >= 0.0);
    }

    #[tokio::test]
    async fn uploads_from_unknown_owners_are_pooled_as_anonymous() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("pic.png");
        std::fs::write(&file, b"x").unwrap();

        let mut h = Harness::new();
        let (a, _rx_a) = h.join();
        h.hub.apply(HubCommand::TrackUpload {
            owner: "conn_made_up".into(),
            path: file.clone(),
        });
        assert_eq!(h.hub.uploads.tracked("conn_made_up"), 0);
        assert_eq!(h.hub.uploads.tracked(ANONYMOUS_OWNER), 1);

        h.send(&a, json!({"event": "endChat"}));
        assert_eq!(h.hub.uploads.tracked(ANONYMOUS_OWNER), 1);
        assert!(file.exists());
    }

    #[tokio::test]
    async fn queries_through_handle() {
        let clients = Arc::new(ClientRegistry::new(16));
        let metrics = Arc::new(MetricsRecorder::new());
        let (handle, task) = Hub::new(ChatEngine::new(), Arc::clone(&clients), metrics).spawn();

        let (a, _rx) = clients.register();
        handle.connect(&a).await;
        handle
            .inbound(
                &a,
                json!({"event": "setUsername", "data": "Echo"}).to_string(),
            )
            .await;

        assert!(!handle.check_name("echo").await.unwrap());
        assert!(handle.check_name("Vega").await.unwrap());
        assert_eq!(
            handle.stats().await.unwrap(),
            EngineStats {
                online: 1,
                waiting: 0,
                sessions: 0
            }
        );

        handle.disconnect(&a).await;
        let activity = handle.activity().await.unwrap();
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].username.as_deref(), Some("Echo"));

        drop(handle);
        task.await.unwrap();
    }
}
