//! One open map: the engine plus its asset resolver and persistence client.
//!
//! Asset resolution runs on spawned tasks and reports back through an
//! unbounded channel. Completions are applied on the session's own thread via
//! [`MapSession::pump`] or [`MapSession::next_event`], so the engine is only
//! ever mutated by its owner.

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

use std::sync::Arc;

use mapstate::{GameId, MapState, PaletteToken, TokenId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::asset::{AssetError, AssetInfo, AssetResolver};
use crate::camera::Point;
use crate::engine::{Action, EngineCore};
use crate::input::{Key, Viewport, WheelDelta};
use crate::persist::{PersistClient, PersistenceError};

/// A finished asset resolution, waiting to be applied to the engine.
#[derive(Debug)]
pub enum SessionEvent {
    /// A palette pick finished resolving; success inserts a new token.
    PaletteAsset { image_ref: String, result: Result<AssetInfo, AssetError> },
    /// A hydrated token's asset finished resolving; success makes it visible.
    TokenAsset { id: TokenId, image_ref: String, result: Result<AssetInfo, AssetError> },
    /// The background finished resolving; success records its size.
    Background { image_ref: String, result: Result<AssetInfo, AssetError> },
}

pub struct MapSession {
    game_id: GameId,
    engine: EngineCore,
    persist: PersistClient,
    assets: Arc<dyn AssetResolver>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl MapSession {
    #[must_use]
    pub fn new(game_id: GameId, viewport: Viewport, persist: PersistClient, assets: Arc<dyn AssetResolver>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self { game_id, engine: EngineCore::new(viewport), persist, assets, events_tx, events_rx }
    }

    #[must_use]
    pub fn game_id(&self) -> GameId {
        self.game_id
    }

    #[must_use]
    pub fn engine(&self) -> &EngineCore {
        &self.engine
    }

    pub fn set_viewport(&mut self, width: f64, height: f64) {
        self.engine.set_viewport(width, height);
    }

    // --- Persistence ---

    /// Fetch the stored map and hydrate the engine from it.
    ///
    /// Returns `true` if a stored map was found. A missing map resets the
    /// engine to an empty board. Asset resolution for the background and
    /// every token starts concurrently; tokens appear as their assets arrive.
    ///
    /// # Errors
    ///
    /// Returns the transport error; the current state is kept in that case.
    pub async fn load(&mut self) -> Result<bool, PersistenceError> {
        let stored = match self.persist.load(self.game_id).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, game_id = %self.game_id, "map load failed; keeping current state");
                return Err(e);
            }
        };

        let Some(stored) = stored else {
            self.engine.reset();
            info!(game_id = %self.game_id, "no stored map; starting empty");
            return Ok(false);
        };

        self.engine.hydrate(&stored.state);
        self.resolve_hydrated_assets(&stored.state);
        info!(
            game_id = %self.game_id,
            version = stored.version,
            tokens = stored.state.tokens.len(),
            "map loaded"
        );
        Ok(true)
    }

    /// Tokens offered in the add-token palette for this game.
    ///
    /// # Errors
    ///
    /// Returns the transport error.
    pub async fn palette(&self) -> Result<Vec<PaletteToken>, PersistenceError> {
        self.persist.transport().fetch_palette(self.game_id).await
    }

    /// Queue the current snapshot for saving.
    pub fn save(&self) {
        if let Err(e) = self.persist.enqueue_save(self.game_id, self.engine.snapshot()) {
            debug!(error = %e, "snapshot not queued");
        }
    }

    /// Save the current view explicitly, then wait for every queued save.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::QueueClosed`] if the save worker has stopped.
    pub async fn commit_view(&self) -> Result<(), PersistenceError> {
        let actions = self.engine.commit_view();
        self.dispatch(actions);
        self.persist.flush().await
    }

    /// Wait until every queued save has completed.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::QueueClosed`] if the save worker has stopped.
    pub async fn flush(&self) -> Result<(), PersistenceError> {
        self.persist.flush().await
    }

    /// A save was rejected because another editor changed the map; call
    /// [`Self::load`] before editing further.
    #[must_use]
    pub fn needs_reload(&self) -> bool {
        self.persist.needs_reload()
    }

    // --- Palette ---

    /// Start adding a token for `image_ref`. The token is inserted once the
    /// asset resolves; a failed asset adds nothing.
    pub fn add_token_from_palette(&self, image_ref: impl Into<String>) {
        let image_ref = image_ref.into();
        self.spawn_resolve(image_ref, |image_ref, result| SessionEvent::PaletteAsset { image_ref, result });
    }

    // --- Gestures ---

    pub fn pointer_down(&mut self, pt: Point) -> Vec<Action> {
        let actions = self.engine.on_pointer_down(pt);
        self.dispatch(actions)
    }

    pub fn pointer_move(&mut self, pt: Point) -> Vec<Action> {
        let actions = self.engine.on_pointer_move(pt);
        self.dispatch(actions)
    }

    pub fn pointer_up(&mut self) -> Vec<Action> {
        let actions = self.engine.on_pointer_up();
        self.dispatch(actions)
    }

    pub fn wheel(&mut self, pt: Point, delta: WheelDelta) -> Vec<Action> {
        let actions = self.engine.on_wheel(pt, delta);
        self.dispatch(actions)
    }

    pub fn key_down(&mut self, key: &Key) -> Vec<Action> {
        let actions = self.engine.on_key_down(key);
        self.dispatch(actions)
    }

    pub fn double_click(&mut self, pt: Point) -> Vec<Action> {
        let actions = self.engine.on_double_click(pt);
        self.dispatch(actions)
    }

    // --- Async completions ---

    /// Apply every completion that has already arrived, without waiting.
    pub fn pump(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            actions.extend(self.apply(event));
        }
        actions
    }

    /// Wait for the next completion and apply it.
    pub async fn next_event(&mut self) -> Option<Vec<Action>> {
        let event = self.events_rx.recv().await?;
        Some(self.apply(event))
    }

    /// Apply one completion to the engine.
    pub fn apply(&mut self, event: SessionEvent) -> Vec<Action> {
        match event {
            SessionEvent::PaletteAsset { image_ref, result: Ok(info) } => {
                match self.engine.add_token(&image_ref, info) {
                    Ok(actions) => self.dispatch(actions),
                    Err(e) => {
                        warn!(error = %e, %image_ref, "palette token not added");
                        vec![]
                    }
                }
            }
            SessionEvent::PaletteAsset { image_ref, result: Err(e) } => {
                warn!(error = %e, %image_ref, "token asset failed to load; token not added");
                vec![]
            }
            SessionEvent::TokenAsset { id, result: Ok(_), .. } => self.engine.token_asset_resolved(&id),
            SessionEvent::TokenAsset { id, image_ref, result: Err(e) } => {
                warn!(error = %e, %id, %image_ref, "token asset failed to load; token stays hidden");
                vec![]
            }
            SessionEvent::Background { image_ref, result: Ok(info) } => {
                self.engine.background_resolved(&image_ref, info)
            }
            SessionEvent::Background { image_ref, result: Err(e) } => {
                warn!(error = %e, %image_ref, "background failed to load");
                vec![]
            }
        }
    }

    /// Carry out the side effects the host doesn't own, then hand the actions back.
    fn dispatch(&self, actions: Vec<Action>) -> Vec<Action> {
        if actions.contains(&Action::SaveRequested) {
            self.save();
        }
        actions
    }

    fn resolve_hydrated_assets(&self, state: &MapState) {
        if let Some(url) = &state.background_image_url {
            self.spawn_resolve(url.clone(), |image_ref, result| SessionEvent::Background { image_ref, result });
        }
        for token in &state.tokens {
            let id = token.id;
            self.spawn_resolve(token.image_url.clone(), move |image_ref, result| SessionEvent::TokenAsset {
                id,
                image_ref,
                result,
            });
        }
    }

    fn spawn_resolve<F>(&self, image_ref: String, into_event: F)
    where
        F: FnOnce(String, Result<AssetInfo, AssetError>) -> SessionEvent + Send + 'static,
    {
        let assets = Arc::clone(&self.assets);
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = assets.resolve(&image_ref).await;
            if tx.send(into_event(image_ref, result)).is_err() {
                debug!("session closed before asset resolved");
            }
        });
    }
}
