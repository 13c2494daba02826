//! Keeps one replica in step with its group on the sync server.
//!
//! A connection attempt walks `Connecting -> Authenticating -> Loading ->
//! Syncing`. Local changes are only pushed once the server's snapshot has
//! been merged, and the first push is the full diff the server lacks rather
//! than the outbox, so a freshly installed client never overwrites its group
//! with an empty replica. Any failure moves to `Reconnecting`. Recoverable
//! failures are retried after a backoff delay, and once the retry budget is
//! spent the synchronizer goes `Offline`. A missing group is only retried when
//! the application calls [`SyncHandle::retry_now`].

use crate::{
    backoff::ReconnectionManager,
    config::ClientConfig,
    error::{ConfigError, Result, SyncError},
    provider::{GroupProvider, TokenProvider},
    shared::SharedStore,
    transport::{Connection, Connector, WebSocketConnector},
};
use futures::FutureExt;
use listsync_engine::{ClientMessage, MergeableContent, ServerMessage};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Connection lifecycle as seen by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncState {
    Disconnected,
    Connecting,
    Authenticating,
    Loading,
    Syncing,
    Reconnecting,
    /// Retries exhausted. Local edits still work and are kept for later.
    Offline,
}

impl SyncState {
    pub fn is_connected(self) -> bool {
        matches!(self, SyncState::Loading | SyncState::Syncing)
    }
}

pub struct Synchronizer {
    store: SharedStore,
    config: ClientConfig,
    tokens: Arc<dyn TokenProvider>,
    groups: Arc<dyn GroupProvider>,
    connector: Arc<dyn Connector>,
    backoff: ReconnectionManager,
    state: watch::Sender<SyncState>,
    last_error: Arc<Mutex<Option<String>>>,
    requests: u64,
}

impl Synchronizer {
    pub fn new(
        store: SharedStore,
        config: ClientConfig,
        tokens: Arc<dyn TokenProvider>,
        groups: Arc<dyn GroupProvider>,
    ) -> Self {
        let backoff = ReconnectionManager::new(config.reconnect.clone());
        let (state, _) = watch::channel(SyncState::Disconnected);
        Self {
            store,
            config,
            tokens,
            groups,
            connector: Arc::new(WebSocketConnector),
            backoff,
            state,
            last_error: Arc::new(Mutex::new(None)),
            requests: 0,
        }
    }

    /// Use a different transport.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Use a specific backoff, e.g. one with a fixed seed.
    pub fn with_backoff(mut self, backoff: ReconnectionManager) -> Self {
        self.backoff = backoff;
        self
    }

    /// Spawn the synchronizer on the current Tokio runtime.
    ///
    /// Dropping the returned handle stops it as well.
    pub fn start(self) -> SyncHandle {
        let state = self.state.subscribe();
        let last_error = self.last_error.clone();
        let (stop, stop_rx) = watch::channel(false);
        let retry = Arc::new(Notify::new());
        let task = tokio::spawn(self.run(stop_rx, retry.clone()));
        SyncHandle {
            state,
            stop,
            retry,
            last_error,
            task,
        }
    }

    async fn run(mut self, mut stop: watch::Receiver<bool>, retry: Arc<Notify>) {
        loop {
            // Drop a retry request that arrived after its wait had ended
            let _ = retry.notified().now_or_never();

            let outcome = tokio::select! {
                biased;
                _ = stopped(&mut stop) => break,
                outcome = self.session() => outcome,
            };
            let err = match outcome {
                Ok(never) => match never {},
                Err(e) => e,
            };

            tracing::warn!(
                error = %err,
                recoverable = err.is_recoverable(),
                "Sync attempt failed"
            );
            self.record_error(&err);
            self.set_state(SyncState::Reconnecting);

            // Missing configuration is not retried until the application asks
            if !err.is_recoverable() {
                tokio::select! {
                    biased;
                    _ = stopped(&mut stop) => break,
                    _ = retry.notified() => self.backoff.reset(),
                }
                continue;
            }

            match self.backoff.next_delay() {
                Some(delay) => {
                    tracing::info!(
                        attempt = self.backoff.attempts(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Reconnecting"
                    );
                    tokio::select! {
                        biased;
                        _ = stopped(&mut stop) => break,
                        _ = retry.notified() => self.backoff.reset(),
                        _ = time::sleep(delay) => {}
                    }
                }
                None => {
                    tracing::warn!(
                        attempts = self.backoff.attempts(),
                        "Retries exhausted, going offline"
                    );
                    self.set_state(SyncState::Offline);
                    tokio::select! {
                        biased;
                        _ = stopped(&mut stop) => break,
                        _ = retry.notified() => self.backoff.reset(),
                    }
                }
            }
        }
        self.set_state(SyncState::Disconnected);
        tracing::info!("Synchronizer stopped");
    }

    /// One connection attempt. Only returns on failure.
    async fn session(&mut self) -> Result<Infallible> {
        self.set_state(SyncState::Connecting);
        let group_id = self.groups.group_id().ok_or(ConfigError::MissingGroup)?;

        self.set_state(SyncState::Authenticating);
        let timeout = self.config.reconnect.connection_timeout;
        let token = time::timeout(timeout, self.tokens.get_token())
            .await
            .map_err(|_| SyncError::Auth("timed out waiting for credential".to_string()))??
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SyncError::Auth("no credential available".to_string()))?;

        let url = self.config.endpoint(&group_id, &token);
        let mut conn = time::timeout(timeout, self.connector.connect(&url))
            .await
            .map_err(|_| SyncError::Network("timed out connecting".to_string()))??;
        tracing::info!(group_id = %group_id, "Connected to sync server");

        self.set_state(SyncState::Loading);
        let outcome = self.load_then_sync(conn.as_mut()).await;
        let _ = time::timeout(Duration::from_secs(1), conn.close()).await;
        outcome
    }

    async fn load_then_sync(&mut self, conn: &mut dyn Connection) -> Result<Infallible> {
        let request_id = self.next_request_id();
        conn.send(&ClientMessage::Load {
            request_id: Some(request_id.clone()),
        })
        .await?;

        let timeout = self.config.reconnect.connection_timeout;
        let snapshot = time::timeout(timeout, self.await_snapshot(conn, &request_id))
            .await
            .map_err(|_| SyncError::Network("timed out waiting for snapshot".to_string()))??;

        let missing = {
            let mut replica = self.store.lock();
            let report = replica.apply_merge(&snapshot)?;
            let missing = replica.changes_since(&snapshot);
            replica.clear_outbox();
            tracing::info!(
                rows_merged = report.rows_merged,
                rows_changed = report.rows_changed,
                "Loaded group snapshot"
            );
            missing
        };
        if !missing.is_empty() {
            self.push(conn, missing).await?;
        }

        self.backoff.reset();
        self.clear_error();
        self.set_state(SyncState::Syncing);
        self.sync(conn).await
    }

    async fn await_snapshot(
        &self,
        conn: &mut dyn Connection,
        request_id: &str,
    ) -> Result<MergeableContent> {
        loop {
            match conn.recv().await {
                Some(Ok(ServerMessage::Snapshot {
                    content,
                    request_id: answered,
                })) if answered.as_deref().map_or(true, |id| id == request_id) => {
                    return Ok(content);
                }
                // Merging remote content early is safe; only local pushes wait
                Some(Ok(ServerMessage::Changes { changes })) => self.merge_remote(&changes)?,
                Some(Ok(ServerMessage::Error { message, .. })) => {
                    return Err(SyncError::Protocol(message));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(SyncError::Network(
                        "connection closed while loading".to_string(),
                    ))
                }
            }
        }
    }

    async fn sync(&mut self, conn: &mut dyn Connection) -> Result<Infallible> {
        let pending = self.store.pending();
        let period = self.config.ping_interval;
        let mut ping = time::interval_at(time::Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = pending.notified() => {
                    let changes = self.store.lock().take_outbox();
                    if !changes.is_empty() {
                        self.push(conn, changes).await?;
                    }
                }
                message = conn.recv() => match message {
                    Some(Ok(message)) => self.handle(message)?,
                    Some(Err(e)) => return Err(e),
                    None => {
                        return Err(SyncError::Network("server closed the connection".to_string()))
                    }
                },
                _ = ping.tick() => conn.send(&ClientMessage::Ping).await?,
            }
        }
    }

    fn handle(&self, message: ServerMessage) -> Result<()> {
        match message {
            ServerMessage::Changes { changes } | ServerMessage::Snapshot { content: changes, .. } => {
                self.merge_remote(&changes)
            }
            ServerMessage::Ack { request_id } => {
                tracing::trace!(?request_id, "Push acknowledged");
                Ok(())
            }
            ServerMessage::Pong => Ok(()),
            ServerMessage::Error {
                message,
                request_id,
            } => {
                // The rejected push already left the outbox; the next load
                // diff carries it again.
                tracing::warn!(?request_id, "Server reported an error: {}", message);
                self.record_error(&SyncError::Protocol(message));
                Ok(())
            }
        }
    }

    /// Merge content from the server. Rejected content leaves the replica
    /// untouched and drops the connection.
    fn merge_remote(&self, changes: &MergeableContent) -> Result<()> {
        self.store
            .lock()
            .apply_merge(changes)
            .map(|_| ())
            .map_err(|e| SyncError::Protocol(format!("rejected remote changes: {e}")))
    }

    async fn push(&mut self, conn: &mut dyn Connection, changes: MergeableContent) -> Result<()> {
        let request_id = self.next_request_id();
        tracing::debug!(
            request_id = %request_id,
            cells = changes.cell_count(),
            "Pushing local changes"
        );
        conn.send(&ClientMessage::Push {
            changes,
            request_id: Some(request_id),
        })
        .await
    }

    fn next_request_id(&mut self) -> String {
        self.requests += 1;
        format!("req-{}", self.requests)
    }

    fn set_state(&self, state: SyncState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = ?previous, to = ?state, "Sync state changed");
        }
    }

    fn record_error(&self, err: &SyncError) {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(err.to_string());
    }

    fn clear_error(&self) {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

async fn stopped(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        // Handle dropped
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// Control over a running [`Synchronizer`].
#[derive(Debug)]
pub struct SyncHandle {
    state: watch::Receiver<SyncState>,
    stop: watch::Sender<bool>,
    retry: Arc<Notify>,
    last_error: Arc<Mutex<Option<String>>>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    pub fn watch(&self) -> watch::Receiver<SyncState> {
        self.state.clone()
    }

    /// Wait until the synchronizer reaches `target`. Returns `false` if it
    /// stopped first.
    pub async fn wait_for(&mut self, target: SyncState) -> bool {
        loop {
            if *self.state.borrow_and_update() == target {
                return true;
            }
            if self.state.changed().await.is_err() {
                return *self.state.borrow() == target;
            }
        }
    }

    /// Why the most recent attempt failed, until a connection succeeds.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Skip the remaining backoff delay, or leave `Offline`, and try again
    /// with a fresh retry budget. Ignored unless the synchronizer is
    /// `Reconnecting` or `Offline`.
    pub fn retry_now(&self) {
        if matches!(self.state(), SyncState::Reconnecting | SyncState::Offline) {
            self.retry.notify_one();
        }
    }

    /// Stop synchronizing and wait for the connection to be dropped.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            tracing::error!("Synchronizer task failed: {}", e);
        }
    }
}
