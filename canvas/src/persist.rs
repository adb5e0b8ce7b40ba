//! Map persistence client: load stored maps and push full snapshots back.
//!
//! DESIGN
//! ======
//! Saves are fire-and-forget for the interaction layer. Each snapshot is
//! queued to a single background worker, so at most one save is in flight
//! and saves reach the server in submission order: a slow early save can't
//! land after a fast later one. Snapshots for the same game that queue up
//! behind an in-flight save are coalesced to the newest.
//!
//! ERROR HANDLING
//! ==============
//! Failed saves are logged and dropped. There is no retry and no rollback;
//! the in-memory state stays the source of truth until the next load.
//! With conflict detection on, a rejected save marks the client stale: later
//! saves carry the same outdated version and keep failing until the host
//! reloads. [`PersistClient::needs_reload`] reports that state.

#[cfg(test)]
#[path = "persist_test.rs"]
mod persist_test;

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use mapstate::{
    GameId, LoadResponse, MapState, MapStatePatch, PaletteToken, PersistedToken, SAVE_PATH, SaveRequest,
    SaveResponse, map_path, palette_path, tokens_path,
};
use reqwest::StatusCode;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:3000";
const DEFAULT_SAVE_QUEUE_CAPACITY: usize = 64;
const UNKNOWN_VERSION: i64 = -1;

// =============================================================================
// CONFIG
// =============================================================================

/// Persistence client settings, loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistConfig {
    /// Origin of the map persistence service.
    pub base_url: String,
    /// Bounded capacity of the save queue.
    pub save_queue_capacity: usize,
    /// Send the last known version with each save so concurrent edits are
    /// rejected instead of silently overwritten.
    pub detect_conflicts: bool,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            save_queue_capacity: DEFAULT_SAVE_QUEUE_CAPACITY,
            detect_conflicts: false,
        }
    }
}

impl PersistConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("MAP_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_owned()),
            save_queue_capacity: env_parse("MAP_SAVE_QUEUE_CAPACITY", DEFAULT_SAVE_QUEUE_CAPACITY).max(1),
            detect_conflicts: env_bool("MAP_DETECT_CONFLICTS").unwrap_or(false),
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

pub(crate) fn env_bool(key: &str) -> Option<bool> {
    let raw = std::env::var(key).unwrap_or_default();
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// =============================================================================
// TRANSPORT
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned status {0}")]
    Status(u16),
    #[error("stored map changed since it was last loaded")]
    Conflict,
    #[error("save queue is full")]
    QueueFull,
    #[error("save worker has stopped")]
    QueueClosed,
}

/// A stored map together with its save counter.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMap {
    pub state: MapState,
    pub version: i64,
}

/// The persistence service boundary.
#[async_trait]
pub trait MapTransport: Send + Sync {
    /// `GET /map/{gameId}`; `None` when the game has no map.
    async fn fetch_map(&self, game_id: GameId) -> Result<Option<StoredMap>, PersistenceError>;

    /// `GET /map/tokens/{gameId}`; `None` when the game has no map.
    async fn fetch_tokens(&self, game_id: GameId) -> Result<Option<Vec<PersistedToken>>, PersistenceError>;

    /// `GET /map/palette/{gameId}`.
    async fn fetch_palette(&self, game_id: GameId) -> Result<Vec<PaletteToken>, PersistenceError>;

    /// `POST /map/save`.
    async fn save_map(&self, request: SaveRequest) -> Result<SaveResponse, PersistenceError>;
}

/// [`MapTransport`] over HTTP.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Use a preconfigured client (cookies, default headers, timeouts).
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, PersistenceError> {
    let status = resp.status();
    if status.is_success() { Ok(resp) } else { Err(PersistenceError::Status(status.as_u16())) }
}

#[async_trait]
impl MapTransport for HttpTransport {
    async fn fetch_map(&self, game_id: GameId) -> Result<Option<StoredMap>, PersistenceError> {
        let resp = self.client.get(self.url(&map_path(game_id))).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: LoadResponse = ensure_success(resp)?.json().await?;
        Ok(body.map_data.map(|state| StoredMap { state, version: body.version }))
    }

    async fn fetch_tokens(&self, game_id: GameId) -> Result<Option<Vec<PersistedToken>>, PersistenceError> {
        let resp = self.client.get(self.url(&tokens_path(game_id))).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(ensure_success(resp)?.json().await?))
    }

    async fn fetch_palette(&self, game_id: GameId) -> Result<Vec<PaletteToken>, PersistenceError> {
        let resp = self.client.get(self.url(&palette_path(game_id))).send().await?;
        Ok(ensure_success(resp)?.json().await?)
    }

    async fn save_map(&self, request: SaveRequest) -> Result<SaveResponse, PersistenceError> {
        let resp = self.client.post(self.url(SAVE_PATH)).json(&request).send().await?;
        if resp.status() == StatusCode::CONFLICT {
            return Err(PersistenceError::Conflict);
        }
        Ok(ensure_success(resp)?.json().await?)
    }
}

// =============================================================================
// SAVE WORKER
// =============================================================================

#[derive(Debug)]
pub(crate) struct SaveJob {
    pub(crate) game_id: GameId,
    pub(crate) snapshot: MapStatePatch,
}

#[derive(Debug)]
pub(crate) enum SaveCommand {
    Save(SaveJob),
    /// Acknowledged once every save queued before it has completed.
    Flush(oneshot::Sender<()>),
}

/// Client handle: loads maps directly and queues saves to the background worker.
///
/// Tracks the version of the map it last loaded or saved; use one client per
/// open map.
pub struct PersistClient {
    transport: Arc<dyn MapTransport>,
    tx: mpsc::Sender<SaveCommand>,
    version: Arc<AtomicI64>,
    stale: Arc<AtomicBool>,
}

impl PersistClient {
    /// Spawn the save worker on the current tokio runtime.
    #[must_use]
    pub fn spawn(transport: Arc<dyn MapTransport>, config: &PersistConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.save_queue_capacity.max(1));
        let version = Arc::new(AtomicI64::new(UNKNOWN_VERSION));
        let stale = Arc::new(AtomicBool::new(false));
        info!(
            queue_capacity = config.save_queue_capacity,
            detect_conflicts = config.detect_conflicts,
            "map save worker configured"
        );
        let tracker = VersionTracker { version: Arc::clone(&version), stale: Arc::clone(&stale) };
        spawn_save_worker(Arc::clone(&transport), rx, tracker, config.detect_conflicts);
        Self { transport, tx, version, stale }
    }

    /// The underlying transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn MapTransport> {
        &self.transport
    }

    /// Fetch the stored map for `game_id` and remember its version. Clears
    /// [`Self::needs_reload`].
    ///
    /// # Errors
    ///
    /// Returns the transport error; a missing map is `Ok(None)`.
    pub async fn load(&self, game_id: GameId) -> Result<Option<StoredMap>, PersistenceError> {
        let stored = self.transport.fetch_map(game_id).await?;
        let version = stored.as_ref().map_or(0, |s| s.version);
        self.version.store(version, Ordering::SeqCst);
        self.stale.store(false, Ordering::SeqCst);
        Ok(stored)
    }

    /// A save was rejected as a conflict since the last load. Saves keep
    /// failing until the map is loaded again.
    #[must_use]
    pub fn needs_reload(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    /// Version of the last map loaded or saved, if any.
    #[must_use]
    pub fn last_version(&self) -> Option<i64> {
        known_version(&self.version)
    }

    /// Best-effort, non-blocking enqueue of a full snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::QueueFull`] or [`PersistenceError::QueueClosed`]
    /// when the snapshot could not be queued; the error is also logged.
    pub fn enqueue_save(&self, game_id: GameId, snapshot: MapStatePatch) -> Result<(), PersistenceError> {
        match self.tx.try_send(SaveCommand::Save(SaveJob { game_id, snapshot })) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%game_id, "map save queue full; dropping snapshot");
                Err(PersistenceError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(%game_id, "map save worker stopped; dropping snapshot");
                Err(PersistenceError::QueueClosed)
            }
        }
    }

    /// Wait until every save queued so far has completed (successfully or not).
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::QueueClosed`] if the worker has stopped.
    pub async fn flush(&self) -> Result<(), PersistenceError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(SaveCommand::Flush(ack_tx))
            .await
            .map_err(|_| PersistenceError::QueueClosed)?;
        ack_rx.await.map_err(|_| PersistenceError::QueueClosed)
    }
}

fn known_version(version: &AtomicI64) -> Option<i64> {
    match version.load(Ordering::SeqCst) {
        UNKNOWN_VERSION => None,
        v => Some(v),
    }
}

/// Version state shared between the client handle and the save worker.
struct VersionTracker {
    version: Arc<AtomicI64>,
    stale: Arc<AtomicBool>,
}

fn spawn_save_worker(
    transport: Arc<dyn MapTransport>,
    mut rx: mpsc::Receiver<SaveCommand>,
    tracker: VersionTracker,
    detect_conflicts: bool,
) {
    tokio::spawn(async move {
        while let Some(first) = rx.recv().await {
            let mut batch = vec![first];
            while let Ok(more) = rx.try_recv() {
                batch.push(more);
            }

            for command in coalesce(batch) {
                match command {
                    SaveCommand::Save(job) => run_save(transport.as_ref(), job, &tracker, detect_conflicts).await,
                    SaveCommand::Flush(ack) => {
                        if ack.send(()).is_err() {
                            debug!("flush waiter went away");
                        }
                    }
                }
            }
        }
        debug!("map save worker stopped");
    });
}

/// Drop queued saves superseded by a later save of the same game.
///
/// Coalescing never crosses a flush marker, so a flush still acknowledges
/// exactly the saves queued before it.
pub(crate) fn coalesce(batch: Vec<SaveCommand>) -> Vec<SaveCommand> {
    let mut out: Vec<SaveCommand> = Vec::with_capacity(batch.len());
    let mut segment_start = 0;
    for command in batch {
        match command {
            SaveCommand::Save(job) => {
                let superseded = out[segment_start..]
                    .iter()
                    .position(|c| matches!(c, SaveCommand::Save(queued) if queued.game_id == job.game_id));
                if let Some(offset) = superseded {
                    out.remove(segment_start + offset);
                }
                out.push(SaveCommand::Save(job));
            }
            SaveCommand::Flush(ack) => {
                out.push(SaveCommand::Flush(ack));
                segment_start = out.len();
            }
        }
    }
    out
}

async fn run_save(transport: &dyn MapTransport, job: SaveJob, tracker: &VersionTracker, detect_conflicts: bool) {
    let game_id = job.game_id;
    let token_count = job.snapshot.tokens.as_ref().map_or(0, Vec::len);
    let expected_version = if detect_conflicts { known_version(&tracker.version) } else { None };
    let request = SaveRequest { game_id, map_data: job.snapshot, expected_version };

    match transport.save_map(request).await {
        Ok(resp) => {
            tracker.version.store(resp.version, Ordering::SeqCst);
            debug!(%game_id, version = resp.version, token_count, "map saved");
        }
        Err(PersistenceError::Conflict) => {
            tracker.stale.store(true, Ordering::SeqCst);
            warn!(%game_id, ?expected_version, "map save rejected: stored map changed since last load; reload required");
        }
        Err(e) => {
            error!(error = %e, %game_id, token_count, "map save failed");
        }
    }
}
