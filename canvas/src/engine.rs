use mapstate::{MapState, MapStatePatch, TokenId};

use crate::asset::AssetInfo;
use crate::camera::{MapView, Point, Size, centered_offset, clamp_scale, pan, rescale_about_map, zoom};
use crate::consts::{DEFAULT_SCALE, KEY_ZOOM_STEP, WHEEL_ZOOM_SENSITIVITY};
use crate::doc::{DocError, DragState, Token, TokenStore};
use crate::hit::hit_test;
use crate::input::{InputState, Key, Viewport, WheelDelta};

#[cfg(test)]
#[path = "engine_test.rs"]
mod engine_test;

/// Actions returned from input handlers for the host to process.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    TokenCreated(TokenId),
    TokenDeleted(TokenId),
    /// The full current snapshot should be pushed to the persistence service.
    SaveRequested,
    RenderNeeded,
}

/// The map's background image.
#[derive(Debug, Clone, PartialEq)]
pub struct Background {
    pub image_ref: String,
    /// Intrinsic size, known once the asset resolves.
    pub size: Option<Size>,
}

/// Core engine state: view, tokens and the gesture state machine.
///
/// Owned by one map session. Handlers run to completion and never block; they
/// return [`Action`]s describing side effects the host must carry out.
#[derive(Debug)]
pub struct EngineCore {
    pub doc: TokenStore,
    pub view: MapView,
    pub input: InputState,
    pub viewport: Viewport,
    pub background: Option<Background>,
    /// The view came from a stored record and must not be re-centered.
    view_restored: bool,
}

impl Default for EngineCore {
    fn default() -> Self {
        Self {
            doc: TokenStore::new(),
            view: MapView::default(),
            input: InputState::default(),
            viewport: Viewport::default(),
            background: None,
            view_restored: false,
        }
    }
}

impl EngineCore {
    #[must_use]
    pub fn new(viewport: Viewport) -> Self {
        Self { viewport, ..Self::default() }
    }

    // --- Data inputs ---

    /// Update the board dimensions.
    pub fn set_viewport(&mut self, width: f64, height: f64) {
        self.viewport = Viewport::new(width, height);
    }

    /// Drop all map state, keeping the viewport.
    pub fn reset(&mut self) {
        *self = Self::new(self.viewport);
    }

    /// Replace the view and tokens with a stored record.
    ///
    /// Tokens start invisible; call [`Self::token_asset_resolved`] as each asset loads.
    pub fn hydrate(&mut self, state: &MapState) {
        self.background = state
            .background_image_url
            .as_ref()
            .map(|url| Background { image_ref: url.clone(), size: None });
        self.view = MapView {
            offset: state.map_position.map(Point::from).unwrap_or_default(),
            scale: clamp_scale(state.map_scale.unwrap_or(DEFAULT_SCALE)),
        };
        self.view_restored = state.map_position.is_some();
        self.doc.load_snapshot(state.tokens.iter().map(Token::from_persisted).collect());
        self.input = InputState::Idle;
    }

    /// Record the background's size. A view that wasn't restored from storage is
    /// centered on the board; tokens shift with it so they keep their place on the map.
    pub fn background_resolved(&mut self, image_ref: &str, info: AssetInfo) -> Vec<Action> {
        let Some(background) = self.background.as_mut().filter(|b| b.image_ref == image_ref) else {
            return vec![];
        };
        background.size = Some(info.size());
        if !self.view_restored {
            let delta = centered_offset(self.viewport.size(), info.size()) - self.view.offset;
            self.view = pan(self.view, delta);
            self.doc.translate_all(delta);
            self.view_restored = true;
        }
        vec![Action::RenderNeeded]
    }

    /// Show a hydrated token once its asset is available.
    pub fn token_asset_resolved(&mut self, id: &TokenId) -> Vec<Action> {
        if self.doc.set_visible(id, true) { vec![Action::RenderNeeded] } else { vec![] }
    }

    /// Insert a palette token for an already-resolved asset, centered on the viewport.
    ///
    /// # Errors
    ///
    /// Returns [`DocError::DuplicateId`] if the generated id collides.
    pub fn add_token(&mut self, image_ref: &str, info: AssetInfo) -> Result<Vec<Action>, DocError> {
        let token = Token::from_palette(image_ref, info.aspect_ratio(), self.viewport.center());
        self.insert_token(token)
    }

    /// Insert a fully built token.
    ///
    /// # Errors
    ///
    /// Returns [`DocError::DuplicateId`] if a token with the same id exists.
    pub fn insert_token(&mut self, token: Token) -> Result<Vec<Action>, DocError> {
        let id = token.id();
        self.doc.add(token)?;
        Ok(vec![Action::TokenCreated(id), Action::SaveRequested, Action::RenderNeeded])
    }

    /// Explicitly request that the current view be saved.
    #[must_use]
    pub fn commit_view(&self) -> Vec<Action> {
        vec![Action::SaveRequested]
    }

    /// The full snapshot pushed on save: background, view and every token.
    #[must_use]
    pub fn snapshot(&self) -> MapStatePatch {
        MapStatePatch {
            background_image_url: self.background.as_ref().map(|b| b.image_ref.clone()),
            map_position: Some(self.view.offset.into()),
            map_scale: Some(self.view.scale),
            tokens: Some(self.doc.persisted()),
        }
    }

    // --- Input events ---

    /// Pointer press: grab the topmost token under the pointer, else start panning.
    pub fn on_pointer_down(&mut self, pt: Point) -> Vec<Action> {
        // A press without a release ends whatever gesture was running.
        self.doc.clear_drag_flags();
        self.input = InputState::Idle;
        if let Some(id) = hit_test(pt, &self.doc) {
            let Some(token) = self.doc.get(&id) else {
                return vec![];
            };
            let grab = pt - token.position;
            self.doc.update(&id, |t| t.drag = Some(DragState { grab }));
            self.input = InputState::DraggingToken { id, grab };
        } else if self.viewport.contains(pt) {
            self.input = InputState::DraggingMap { last: pt };
        }
        vec![]
    }

    /// Pointer move: pan the map with every token, or move the grabbed token.
    pub fn on_pointer_move(&mut self, pt: Point) -> Vec<Action> {
        match self.input.clone() {
            InputState::Idle => vec![],
            InputState::DraggingMap { last } => {
                let delta = pt - last;
                self.view = pan(self.view, delta);
                self.doc.translate_all(delta);
                self.input = InputState::DraggingMap { last: pt };
                vec![Action::RenderNeeded]
            }
            InputState::DraggingToken { id, grab } => {
                if self.doc.update(&id, |t| t.position = pt - grab) {
                    vec![Action::RenderNeeded]
                } else {
                    // EDGE: token vanished mid-drag.
                    self.input = InputState::Idle;
                    vec![]
                }
            }
        }
    }

    /// Pointer release: end any gesture. Only a token drag requests a save.
    pub fn on_pointer_up(&mut self) -> Vec<Action> {
        let prior = std::mem::take(&mut self.input);
        self.doc.clear_drag_flags();
        match prior {
            InputState::DraggingToken { .. } => vec![Action::SaveRequested],
            InputState::DraggingMap { .. } | InputState::Idle => vec![],
        }
    }

    /// Wheel zoom, only while the pointer is over the board. Does not save.
    pub fn on_wheel(&mut self, pt: Point, delta: WheelDelta) -> Vec<Action> {
        if !self.viewport.covers(pt) {
            return vec![];
        }
        self.zoom_by(-delta.dy * WHEEL_ZOOM_SENSITIVITY)
    }

    /// `+` / `-` zoom by a fixed step. Does not save.
    pub fn on_key_down(&mut self, key: &Key) -> Vec<Action> {
        match key.zoom_direction() {
            Some(direction) => self.zoom_by(direction * KEY_ZOOM_STEP),
            None => vec![],
        }
    }

    /// Double click: delete the topmost token under the pointer.
    pub fn on_double_click(&mut self, pt: Point) -> Vec<Action> {
        let Some(id) = hit_test(pt, &self.doc) else {
            return vec![];
        };
        self.doc.remove(&id);
        if matches!(self.input, InputState::DraggingToken { id: dragged, .. } if dragged == id) {
            self.input = InputState::Idle;
        }
        vec![Action::TokenDeleted(id), Action::SaveRequested, Action::RenderNeeded]
    }

    fn zoom_by(&mut self, delta_scale: f64) -> Vec<Action> {
        let outcome = zoom(self.view, delta_scale);
        if !outcome.changed() {
            return vec![];
        }
        let old = self.view;
        let new = outcome.view;
        self.doc.for_each_mut(|t| t.position = rescale_about_map(t.position, t.anchor(), &old, &new));
        self.view = new;
        vec![Action::RenderNeeded]
    }

    // --- Queries ---

    /// The current view.
    #[must_use]
    pub fn view(&self) -> MapView {
        self.view
    }

    /// Look up a token by id.
    #[must_use]
    pub fn token(&self, id: &TokenId) -> Option<&Token> {
        self.doc.get(id)
    }

    /// All tokens in insertion order.
    #[must_use]
    pub fn tokens(&self) -> &[Token] {
        self.doc.list()
    }
}
