//! Token model and the in-memory token store.
//!
//! A [`Token`] is a fixed-shape record: persisted fields (id, image reference,
//! position, size) plus client-only transient fields (drag state, asset
//! visibility). The persisted projection is [`mapstate::PersistedToken`], built
//! by [`Token::to_persisted`], so transient fields never reach the wire.
//!
//! [`TokenStore`] keeps tokens in insertion order. Order only matters for
//! hit-testing, where later tokens sit on top.

#[cfg(test)]
#[path = "doc_test.rs"]
mod doc_test;

use mapstate::{PersistedToken, TokenId};
use tracing::warn;
use uuid::Uuid;

use crate::camera::{Point, Size};
use crate::consts::TOKEN_HEIGHT;

/// Errors raised by the token store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocError {
    #[error("duplicate token id: {0}")]
    DuplicateId(TokenId),
}

/// Transient drag context captured at drag start.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DragState {
    /// Pointer position minus token position at the moment of the press.
    pub grab: Point,
}

/// A draggable image token on the map.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    id: TokenId,
    /// Opaque reference (URL) to the token image.
    pub image_ref: String,
    /// Top-left of the bounding box in board coordinates.
    pub position: Point,
    size: Size,
    anchor: Point,
    /// Set while the token is being dragged.
    pub drag: Option<DragState>,
    /// Whether the token's asset has resolved and it can be drawn and picked.
    pub visible: bool,
}

impl Token {
    /// Create a visible token. The anchor is derived from `size` and fixed for life.
    #[must_use]
    pub fn new(id: TokenId, image_ref: impl Into<String>, position: Point, size: Size) -> Self {
        Self { id, image_ref: image_ref.into(), position, size, anchor: size.half(), drag: None, visible: true }
    }

    /// Create a palette token with a fresh id, normalized to [`TOKEN_HEIGHT`]
    /// and centered on `center`.
    #[must_use]
    pub fn from_palette(image_ref: impl Into<String>, aspect_ratio: f64, center: Point) -> Self {
        let size = token_size(aspect_ratio);
        Self::new(Uuid::new_v4(), image_ref, center - size.half(), size)
    }

    /// Rebuild a token from its persisted form. It stays invisible until its asset resolves.
    #[must_use]
    pub fn from_persisted(persisted: &PersistedToken) -> Self {
        let mut token = Self::new(
            persisted.id,
            persisted.image_url.clone(),
            Point::new(persisted.x, persisted.y),
            Size::new(persisted.width, persisted.height),
        );
        token.visible = false;
        token
    }

    /// The persistable projection of this token.
    #[must_use]
    pub fn to_persisted(&self) -> PersistedToken {
        PersistedToken {
            id: self.id,
            image_url: self.image_ref.clone(),
            x: self.position.x,
            y: self.position.y,
            width: self.size.width,
            height: self.size.height,
        }
    }

    #[must_use]
    pub fn id(&self) -> TokenId {
        self.id
    }

    #[must_use]
    pub fn size(&self) -> Size {
        self.size
    }

    /// Scale-invariant pivot (the token's own center), relative to `position`.
    #[must_use]
    pub fn anchor(&self) -> Point {
        self.anchor
    }

    #[must_use]
    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    /// Whether `point` lies strictly inside the token's bounding box.
    #[must_use]
    pub fn contains(&self, point: Point) -> bool {
        point.x > self.position.x
            && point.x < self.position.x + self.size.width
            && point.y > self.position.y
            && point.y < self.position.y + self.size.height
    }
}

/// Token size for an asset of the given aspect ratio (`width / height`).
#[must_use]
pub fn token_size(aspect_ratio: f64) -> Size {
    Size::new(TOKEN_HEIGHT * aspect_ratio, TOKEN_HEIGHT)
}

/// Ordered in-memory collection of the open map's tokens.
#[derive(Debug, Default)]
pub struct TokenStore {
    tokens: Vec<Token>,
}

impl TokenStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self { tokens: Vec::new() }
    }

    /// Append a token.
    ///
    /// # Errors
    ///
    /// Returns [`DocError::DuplicateId`] if a token with the same id exists.
    pub fn add(&mut self, token: Token) -> Result<(), DocError> {
        if self.get(&token.id).is_some() {
            return Err(DocError::DuplicateId(token.id));
        }
        self.tokens.push(token);
        Ok(())
    }

    /// Remove a token by id, returning it if it was present.
    pub fn remove(&mut self, id: &TokenId) -> Option<Token> {
        let index = self.tokens.iter().position(|t| t.id == *id)?;
        Some(self.tokens.remove(index))
    }

    /// Apply `mutator` to the token with `id`. Returns false if it doesn't exist.
    pub fn update(&mut self, id: &TokenId, mutator: impl FnOnce(&mut Token)) -> bool {
        let Some(token) = self.tokens.iter_mut().find(|t| t.id == *id) else {
            return false;
        };
        mutator(token);
        true
    }

    /// All tokens in insertion order.
    #[must_use]
    pub fn list(&self) -> &[Token] {
        &self.tokens
    }

    #[must_use]
    pub fn get(&self, id: &TokenId) -> Option<&Token> {
        self.tokens.iter().find(|t| t.id == *id)
    }

    /// Replace all tokens with a snapshot. Later duplicates of an id are dropped.
    pub fn load_snapshot(&mut self, tokens: Vec<Token>) {
        self.tokens.clear();
        for token in tokens {
            let id = token.id;
            if let Err(e) = self.add(token) {
                warn!(error = %e, token_id = %id, "dropping duplicate token from snapshot");
            }
        }
    }

    /// Shift every token by `delta`.
    pub fn translate_all(&mut self, delta: Point) {
        for token in &mut self.tokens {
            token.position = token.position + delta;
        }
    }

    /// Apply `f` to every token.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut Token)) {
        for token in &mut self.tokens {
            f(token);
        }
    }

    /// Clear the drag state of every token.
    pub fn clear_drag_flags(&mut self) {
        for token in &mut self.tokens {
            token.drag = None;
        }
    }

    /// Show or hide the token with `id`. Returns false if it doesn't exist.
    pub fn set_visible(&mut self, id: &TokenId, visible: bool) -> bool {
        self.update(id, |t| t.visible = visible)
    }

    /// Persistable projection of every token, in order.
    #[must_use]
    pub fn persisted(&self) -> Vec<PersistedToken> {
        self.tokens.iter().map(Token::to_persisted).collect()
    }

    /// Number of tokens currently in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns `true` if the store contains no tokens.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
