//! Typed job lifecycle notifications on top of a [`ConnectionManager`].
//!
//! Raw frames are decoded as [`JobUpdateMessage`]s and dispatched to the
//! callback matching their `type`. Malformed frames are reported through
//! `on_error` and otherwise ignored; they never affect the connection.

use std::sync::Arc;
use std::time::Duration;

use jobwatch_shared::{ControlFrame, JobEventKind, JobUpdateMessage};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::config::{ClientConfig, ConnectionConfig};
use crate::ws::{
    ConnectionCallbacks, ConnectionManager, ConnectionState, Connector, RawMessage,
    TungsteniteConnector,
};

/// Passed to `on_error` when a frame cannot be decoded.
pub const PARSE_ERROR_MESSAGE: &str = "Failed to parse job update message";

/// Passed to `on_error` when the connection itself reports an error.
pub const CONNECTION_ERROR_MESSAGE: &str = "WebSocket connection error";

/// Pause between the disconnect and connect halves of [`JobUpdates::reconnect`].
pub const RECONNECT_PAUSE: Duration = Duration::from_millis(100);

/// Receives the embedded job record and the full message it came in.
pub type JobCallback = Arc<dyn Fn(&serde_json::Value, &JobUpdateMessage) + Send + Sync>;

/// Per-event-type callbacks.
#[derive(Clone, Default)]
pub struct JobUpdateCallbacks {
    on_job_update: Option<JobCallback>,
    on_job_created: Option<JobCallback>,
    on_job_completed: Option<JobCallback>,
    on_job_failed: Option<JobCallback>,
    on_error: Option<Arc<dyn Fn(&str) + Send + Sync>>,
}

impl JobUpdateCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_job_update(
        mut self,
        f: impl Fn(&serde_json::Value, &JobUpdateMessage) + Send + Sync + 'static,
    ) -> Self {
        self.on_job_update = Some(Arc::new(f));
        self
    }

    pub fn on_job_created(
        mut self,
        f: impl Fn(&serde_json::Value, &JobUpdateMessage) + Send + Sync + 'static,
    ) -> Self {
        self.on_job_created = Some(Arc::new(f));
        self
    }

    pub fn on_job_completed(
        mut self,
        f: impl Fn(&serde_json::Value, &JobUpdateMessage) + Send + Sync + 'static,
    ) -> Self {
        self.on_job_completed = Some(Arc::new(f));
        self
    }

    pub fn on_job_failed(
        mut self,
        f: impl Fn(&serde_json::Value, &JobUpdateMessage) + Send + Sync + 'static,
    ) -> Self {
        self.on_job_failed = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    fn for_kind(&self, kind: JobEventKind) -> Option<&JobCallback> {
        match kind {
            JobEventKind::JobUpdate => self.on_job_update.as_ref(),
            JobEventKind::JobCreated => self.on_job_created.as_ref(),
            JobEventKind::JobCompleted => self.on_job_completed.as_ref(),
            JobEventKind::JobFailed => self.on_job_failed.as_ref(),
        }
    }

    fn emit_error(&self, message: &str) {
        if let Some(cb) = &self.on_error {
            cb(message);
        }
    }
}

/// How to reach the job-events socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobUpdatesOptions {
    pub url: String,
    /// When false the connection is built but not opened until `connect()`.
    pub enabled: bool,
    pub connection: ConnectionConfig,
}

impl JobUpdatesOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            enabled: true,
            connection: ConnectionConfig::default(),
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }
}

impl From<ClientConfig> for JobUpdatesOptions {
    fn from(config: ClientConfig) -> Self {
        Self::new(config.ws_url).connection(config.connection)
    }
}

/// Live feed of job lifecycle events.
pub struct JobUpdates {
    connection: ConnectionManager,
    last_update: Arc<Mutex<Option<JobUpdateMessage>>>,
}

impl JobUpdates {
    /// Must be called from within a tokio runtime.
    pub fn new(options: JobUpdatesOptions, callbacks: JobUpdateCallbacks) -> Self {
        Self::with_connector(options, callbacks, Arc::new(TungsteniteConnector))
    }

    pub fn with_connector(
        options: JobUpdatesOptions,
        callbacks: JobUpdateCallbacks,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let last_update = Arc::new(Mutex::new(None));

        let store = last_update.clone();
        let for_messages = callbacks.clone();
        let for_errors = callbacks;
        let connection_callbacks = ConnectionCallbacks::new()
            .on_message(move |raw| handle_frame(raw, &store, &for_messages))
            .on_error(move |e| {
                tracing::error!(error = %e, "Job updates connection error");
                for_errors.emit_error(CONNECTION_ERROR_MESSAGE);
            });

        let mut config = options.connection;
        config.auto_connect = config.auto_connect && options.enabled;

        Self {
            connection: ConnectionManager::with_connector(
                options.url,
                config,
                connection_callbacks,
                connector,
            ),
            last_update,
        }
    }

    /// Ask the backend to push updates for one job. Does nothing unless connected.
    pub fn subscribe_to_job(&self, job_id: &str) -> bool {
        self.send_control(ControlFrame::subscribe(job_id))
    }

    /// Stop updates for one job. Does nothing unless connected.
    pub fn unsubscribe_from_job(&self, job_id: &str) -> bool {
        self.send_control(ControlFrame::unsubscribe(job_id))
    }

    fn send_control(&self, frame: ControlFrame) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.connection.send_json(&frame)
    }

    /// Drop the current socket and open a fresh one after a short pause.
    pub async fn reconnect(&self) {
        self.connection.disconnect();
        tokio::time::sleep(RECONNECT_PAUSE).await;
        self.connection.connect();
    }

    pub fn connect(&self) {
        self.connection.connect();
    }

    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    /// The most recent successfully decoded message.
    pub fn last_update(&self) -> Option<JobUpdateMessage> {
        self.last_update.lock().clone()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.connection.state_changes()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }
}

fn handle_frame(
    raw: &RawMessage,
    last_update: &Mutex<Option<JobUpdateMessage>>,
    callbacks: &JobUpdateCallbacks,
) {
    let message = match JobUpdateMessage::from_json(&raw.data) {
        Ok(message) => message,
        Err(e) => {
            tracing::error!(error = %e, frame = %raw.data, "{}", PARSE_ERROR_MESSAGE);
            callbacks.emit_error(PARSE_ERROR_MESSAGE);
            return;
        }
    };

    *last_update.lock() = Some(message.clone());

    match message.kind() {
        Some(kind) => {
            tracing::debug!(%kind, job_id = ?message.job_id(), "Job event");
            if let Some(cb) = callbacks.for_kind(kind) {
                cb(&message.job, &message);
            }
        }
        None => tracing::debug!(event_type = %message.event_type, "Unhandled job event type"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::mock::{settle, MockConnector};

    const URL: &str = "ws://jobs.test/ws/jobs";

    fn recording_callbacks() -> (Arc<Mutex<Vec<String>>>, JobUpdateCallbacks) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let record = |name: &'static str, log: &Arc<Mutex<Vec<String>>>| {
            let log = log.clone();
            move |job: &serde_json::Value, _: &JobUpdateMessage| {
                log.lock().push(format!("{} {}", name, job["id"]));
            }
        };
        let errors = log.clone();
        let callbacks = JobUpdateCallbacks::new()
            .on_job_update(record("update", &log))
            .on_job_created(record("created", &log))
            .on_job_completed(record("completed", &log))
            .on_job_failed(record("failed", &log))
            .on_error(move |msg| errors.lock().push(format!("error {}", msg)));
        (log, callbacks)
    }

    fn connected_updates(callbacks: JobUpdateCallbacks) -> (JobUpdates, MockConnector) {
        let connector = MockConnector::default();
        let updates = JobUpdates::with_connector(
            JobUpdatesOptions::new(URL),
            callbacks,
            Arc::new(connector.clone()),
        );
        connector.last().open();
        (updates, connector)
    }

    #[tokio::test(start_paused = true)]
    async fn completed_frame_fires_only_completed_callback() {
        let (log, callbacks) = recording_callbacks();
        let (updates, connector) = connected_updates(callbacks);

        connector.last().message(
            r#"{"type":"job_completed","job":{"id":"j1","status":"completed"},"timestamp":"2024-01-01T00:00:00Z"}"#,
        );
        settle().await;

        assert_eq!(*log.lock(), vec![r#"completed "j1""#]);
        let last = updates.last_update().unwrap();
        assert_eq!(last.kind(), Some(JobEventKind::JobCompleted));
        assert_eq!(last.job_id().as_deref(), Some("j1"));
    }

    #[tokio::test(start_paused = true)]
    async fn each_type_routes_to_its_callback() {
        let (log, callbacks) = recording_callbacks();
        let (_updates, connector) = connected_updates(callbacks);
        let socket = connector.last();

        socket.message(r#"{"type":"job_created","job":{"id":1}}"#);
        socket.message(r#"{"type":"job_update","job":{"id":1}}"#);
        socket.message(r#"{"type":"job_failed","job":{"id":2}}"#);
        settle().await;

        assert_eq!(*log.lock(), vec!["created 1", "update 1", "failed 2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_type_is_stored_without_callback() {
        let (log, callbacks) = recording_callbacks();
        let (updates, connector) = connected_updates(callbacks);

        connector
            .last()
            .message(r#"{"type":"job_paused","job":{"id":"j9"}}"#);
        settle().await;

        assert!(log.lock().is_empty());
        assert_eq!(updates.last_update().unwrap().event_type, "job_paused");
    }

    #[tokio::test(start_paused = true)]
    async fn numeric_or_null_timestamp_is_still_dispatched() {
        let (log, callbacks) = recording_callbacks();
        let (updates, connector) = connected_updates(callbacks);
        let socket = connector.last();

        socket.message(r#"{"type":"job_completed","job":{"id":"j1"},"timestamp":1717000000}"#);
        settle().await;
        assert_eq!(updates.last_update().unwrap().timestamp, "1717000000");

        socket.message(r#"{"type":"job_completed","job":{"id":"j2"},"timestamp":null}"#);
        settle().await;

        assert_eq!(*log.lock(), vec![r#"completed "j1""#, r#"completed "j2""#]);
        assert_eq!(updates.last_update().unwrap().job_id().as_deref(), Some("j2"));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frame_reports_error_and_keeps_last_update() {
        let (log, callbacks) = recording_callbacks();
        let (updates, connector) = connected_updates(callbacks);
        let socket = connector.last();

        socket.message(r#"{"type":"job_update","job":{"id":"a"}}"#);
        socket.message("{not json");
        settle().await;

        assert_eq!(
            *log.lock(),
            vec![
                r#"update "a""#.to_string(),
                format!("error {}", PARSE_ERROR_MESSAGE)
            ]
        );
        assert_eq!(updates.last_update().unwrap().job_id().as_deref(), Some("a"));
        assert_eq!(updates.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn connection_errors_are_forwarded() {
        let (log, callbacks) = recording_callbacks();
        let (updates, connector) = connected_updates(callbacks);

        connector.last().error("reset");
        settle().await;

        assert_eq!(
            *log.lock(),
            vec![format!("error {}", CONNECTION_ERROR_MESSAGE)]
        );
        assert_eq!(updates.connection_state(), ConnectionState::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_sends_control_frames_only_when_connected() {
        let connector = MockConnector::default();
        let updates = JobUpdates::with_connector(
            JobUpdatesOptions::new(URL),
            JobUpdateCallbacks::new(),
            Arc::new(connector.clone()),
        );
        let socket = connector.last();

        assert!(!updates.subscribe_to_job("early"));

        socket.open();
        settle().await;
        assert!(updates.is_connected());
        assert!(updates.subscribe_to_job("j1"));
        assert!(updates.unsubscribe_from_job("j1"));

        assert_eq!(
            socket.sent(),
            vec![
                r#"{"type":"subscribe","job_id":"j1"}"#,
                r#"{"type":"unsubscribe","job_id":"j1"}"#
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_does_not_connect_until_asked() {
        let connector = MockConnector::default();
        let updates = JobUpdates::with_connector(
            JobUpdatesOptions::new(URL).enabled(false),
            JobUpdateCallbacks::new(),
            Arc::new(connector.clone()),
        );

        assert_eq!(updates.connection_state(), ConnectionState::Disconnected);
        assert_eq!(connector.created(), 0);

        updates.connect();
        assert_eq!(connector.created(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_replaces_the_socket() {
        let (_log, callbacks) = recording_callbacks();
        let (updates, connector) = connected_updates(callbacks);
        settle().await;
        let first = connector.last();

        updates.reconnect().await;

        assert!(first.was_closed());
        assert_eq!(connector.created(), 2);
        assert_eq!(updates.connection_state(), ConnectionState::Connecting);
        assert_eq!(updates.connection().reconnect_attempt(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn capped_reconnect_scenario() {
        let connector = MockConnector::default();
        let updates = JobUpdates::with_connector(
            JobUpdatesOptions::new(URL).connection(ConnectionConfig {
                auto_connect: true,
                auto_reconnect: true,
                reconnect_delay: Duration::from_millis(1000),
                max_reconnect_attempts: 3,
            }),
            JobUpdateCallbacks::new(),
            Arc::new(connector.clone()),
        );
        connector.last().open();
        settle().await;

        for _ in 0..4 {
            connector.last().drop_connection();
            settle().await;
            tokio::time::sleep(Duration::from_millis(1000)).await;
            settle().await;
        }

        assert_eq!(connector.created(), 1 + 3);
        assert_eq!(updates.connection_state(), ConnectionState::Disconnected);
        assert!(!updates.connection().has_pending_reconnect());
    }
}
