#[cfg(test)]
#[path = "hit_test.rs"]
mod hit_test;

use mapstate::TokenId;

use crate::camera::Point;
use crate::doc::TokenStore;

/// Find the topmost visible token whose bounding box contains `point`.
///
/// Tokens are checked in reverse insertion order, so the most recently added
/// token wins where boxes overlap. Tokens whose asset hasn't resolved yet are
/// not drawn and therefore can't be picked.
#[must_use]
pub fn hit_test(point: Point, doc: &TokenStore) -> Option<TokenId> {
    doc.list()
        .iter()
        .rev()
        .find(|token| token.visible && token.contains(point))
        .map(crate::doc::Token::id)
}
