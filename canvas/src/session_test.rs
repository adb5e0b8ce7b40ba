#![allow(clippy::float_cmp)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use mapstate::{PersistedToken, Position, SaveRequest, SaveResponse};
use uuid::Uuid;

use super::*;
use crate::persist::{MapTransport, PersistConfig, StoredMap};

/// In-memory service applying the same shallow merge as the real one.
#[derive(Default)]
struct MemoryTransport {
    stored: Mutex<HashMap<GameId, StoredMap>>,
    palette: Vec<PaletteToken>,
    unavailable: bool,
    check_versions: bool,
}

impl MemoryTransport {
    fn stored(&self, game_id: GameId) -> Option<StoredMap> {
        self.stored.lock().unwrap().get(&game_id).cloned()
    }

    fn seed(&self, game_id: GameId, state: MapState) {
        self.stored.lock().unwrap().insert(game_id, StoredMap { state, version: 1 });
    }
}

#[async_trait]
impl MapTransport for MemoryTransport {
    async fn fetch_map(&self, game_id: GameId) -> Result<Option<StoredMap>, PersistenceError> {
        if self.unavailable {
            return Err(PersistenceError::Status(503));
        }
        Ok(self.stored(game_id))
    }

    async fn fetch_tokens(&self, game_id: GameId) -> Result<Option<Vec<PersistedToken>>, PersistenceError> {
        Ok(self.stored(game_id).map(|s| s.state.tokens))
    }

    async fn fetch_palette(&self, _game_id: GameId) -> Result<Vec<PaletteToken>, PersistenceError> {
        Ok(self.palette.clone())
    }

    async fn save_map(&self, request: SaveRequest) -> Result<SaveResponse, PersistenceError> {
        let mut stored = self.stored.lock().unwrap();
        let current = stored.get(&request.game_id).map_or(0, |s| s.version);
        if self.check_versions && request.expected_version.is_some_and(|v| v != current) {
            return Err(PersistenceError::Conflict);
        }
        let entry = stored
            .entry(request.game_id)
            .or_insert_with(|| StoredMap { state: MapState::default(), version: 0 });
        entry.state.apply_patch(request.map_data);
        entry.version += 1;
        Ok(SaveResponse { message: "Map saved successfully".into(), version: entry.version })
    }
}

/// Resolver backed by a fixed table; unknown references fail.
struct TableResolver {
    sizes: HashMap<String, (f64, f64)>,
}

impl TableResolver {
    fn new(entries: &[(&str, f64, f64)]) -> Self {
        let sizes = entries.iter().map(|(r, w, h)| ((*r).to_owned(), (*w, *h))).collect();
        Self { sizes }
    }
}

#[async_trait]
impl AssetResolver for TableResolver {
    async fn resolve(&self, image_ref: &str) -> Result<AssetInfo, AssetError> {
        match self.sizes.get(image_ref) {
            Some(&(w, h)) => AssetInfo::new(image_ref, w, h),
            None => Err(AssetError::Status { url: image_ref.to_owned(), status: 404 }),
        }
    }
}

fn resolver() -> Arc<TableResolver> {
    Arc::new(TableResolver::new(&[
        ("cat.png", 100.0, 100.0),
        ("wide.png", 300.0, 100.0),
        ("dungeon.png", 400.0, 200.0),
    ]))
}

fn session_with(transport: Arc<MemoryTransport>, game_id: GameId) -> MapSession {
    let persist = PersistClient::spawn(transport, &PersistConfig::default());
    MapSession::new(game_id, Viewport::new(800.0, 600.0), persist, resolver())
}

async fn drain(session: &mut MapSession, count: usize) -> Vec<Action> {
    let mut actions = Vec::new();
    for _ in 0..count {
        let next = tokio::time::timeout(Duration::from_secs(2), session.next_event())
            .await
            .unwrap()
            .unwrap();
        actions.extend(next);
    }
    actions
}

fn persisted(x: f64, y: f64, image_url: &str) -> PersistedToken {
    PersistedToken { id: Uuid::new_v4(), image_url: image_url.into(), x, y, width: 50.0, height: 50.0 }
}

// =============================================================================
// load
// =============================================================================

#[tokio::test]
async fn load_missing_map_starts_empty() {
    let transport = Arc::new(MemoryTransport::default());
    let mut session = session_with(transport, Uuid::new_v4());

    assert!(!session.load().await.unwrap());
    assert!(session.engine().tokens().is_empty());
    assert_eq!(session.engine().view().scale, 1.0);
}

#[tokio::test]
async fn load_failure_keeps_current_state() {
    let transport = Arc::new(MemoryTransport { unavailable: true, ..MemoryTransport::default() });
    let mut session = session_with(transport, Uuid::new_v4());

    let err = session.load().await.unwrap_err();
    assert!(matches!(err, PersistenceError::Status(503)));
    assert!(session.engine().tokens().is_empty());
}

#[tokio::test]
async fn hydrated_tokens_appear_once_assets_resolve() {
    let game = Uuid::new_v4();
    let transport = Arc::new(MemoryTransport::default());
    let good = persisted(10.0, 20.0, "cat.png");
    let broken = persisted(30.0, 40.0, "missing.png");
    transport.seed(
        game,
        MapState {
            background_image_url: None,
            map_position: Some(Position::new(5.0, 5.0)),
            map_scale: Some(2.0),
            tokens: vec![good.clone(), broken.clone()],
        },
    );
    let mut session = session_with(transport, game);

    assert!(session.load().await.unwrap());
    assert_eq!(session.engine().tokens().len(), 2);
    assert!(session.engine().tokens().iter().all(|t| !t.visible));
    assert_eq!(session.engine().view().scale, 2.0);

    drain(&mut session, 2).await;

    assert!(session.engine().token(&good.id).unwrap().visible);
    assert!(!session.engine().token(&broken.id).unwrap().visible);
}

#[tokio::test]
async fn background_without_stored_view_is_centered() {
    let game = Uuid::new_v4();
    let transport = Arc::new(MemoryTransport::default());
    transport.seed(
        game,
        MapState { background_image_url: Some("dungeon.png".into()), ..MapState::default() },
    );
    let mut session = session_with(transport, game);

    session.load().await.unwrap();
    let actions = drain(&mut session, 1).await;

    assert_eq!(actions, vec![Action::RenderNeeded]);
    assert_eq!(session.engine().view().offset, Point::new(200.0, 200.0));
}

// =============================================================================
// palette
// =============================================================================

#[tokio::test]
async fn palette_add_inserts_centered_token_and_saves() {
    let game = Uuid::new_v4();
    let transport = Arc::new(MemoryTransport::default());
    let mut session = session_with(transport.clone(), game);

    session.add_token_from_palette("wide.png");
    let actions = drain(&mut session, 1).await;

    let token = &session.engine().tokens()[0];
    assert!(matches!(actions[0], Action::TokenCreated(id) if id == token.id()));
    assert!(actions.contains(&Action::SaveRequested));
    assert_eq!(token.position, Point::new(325.0, 275.0));

    session.flush().await.unwrap();
    let stored = transport.stored(game).unwrap();
    assert_eq!(stored.state.tokens.len(), 1);
    assert_eq!(stored.state.tokens[0].width, 150.0);
}

#[tokio::test]
async fn palette_add_with_broken_asset_adds_nothing() {
    let game = Uuid::new_v4();
    let transport = Arc::new(MemoryTransport::default());
    let mut session = session_with(transport.clone(), game);

    session.add_token_from_palette("missing.png");
    let actions = drain(&mut session, 1).await;

    assert!(actions.is_empty());
    assert!(session.engine().tokens().is_empty());
    session.flush().await.unwrap();
    assert!(transport.stored(game).is_none());
}

#[tokio::test]
async fn palette_lists_service_tokens() {
    let offered = PaletteToken {
        id: Uuid::new_v4(),
        name: "Cat".into(),
        image_url: "cat.png".into(),
        is_custom: false,
    };
    let transport = Arc::new(MemoryTransport { palette: vec![offered.clone()], ..MemoryTransport::default() });
    let session = session_with(transport, Uuid::new_v4());

    assert_eq!(session.palette().await.unwrap(), vec![offered]);
}

// =============================================================================
// gestures and saves
// =============================================================================

#[tokio::test]
async fn saved_map_reloads_with_same_tokens_and_view() {
    let game = Uuid::new_v4();
    let transport = Arc::new(MemoryTransport::default());
    let mut session = session_with(transport.clone(), game);

    session.add_token_from_palette("cat.png");
    drain(&mut session, 1).await;
    session.add_token_from_palette("wide.png");
    drain(&mut session, 1).await;

    // The wide token sits on top at (325, 275); drop it 100px lower.
    session.pointer_down(Point::new(340.0, 280.0));
    session.pointer_move(Point::new(340.0, 380.0));
    assert_eq!(session.pointer_up(), vec![Action::SaveRequested]);

    session.pointer_down(Point::new(700.0, 100.0));
    session.pointer_move(Point::new(650.0, 80.0));
    session.pointer_up();
    session.key_down(&Key::new("+"));
    session.commit_view().await.unwrap();

    let mut reloaded = session_with(transport, game);
    assert!(reloaded.load().await.unwrap());

    let mut saved = session.engine().doc.persisted();
    let mut restored = reloaded.engine().doc.persisted();
    saved.sort_by_key(|t| t.id);
    restored.sort_by_key(|t| t.id);
    assert_eq!(saved.len(), 2);
    assert_eq!(restored.len(), saved.len());
    for (a, b) in saved.iter().zip(&restored) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.image_url, b.image_url);
        for (x, y) in [(a.x, b.x), (a.y, b.y), (a.width, b.width), (a.height, b.height)] {
            assert!((x - y).abs() < 1e-9, "{a:?} vs {b:?}");
        }
    }

    let view = reloaded.engine().view();
    let expected = session.engine().view();
    assert!((view.offset.x - expected.offset.x).abs() < 1e-9);
    assert!((view.offset.y - expected.offset.y).abs() < 1e-9);
    assert!((view.scale - expected.scale).abs() < 1e-9);
    assert_eq!(expected.offset, Point::new(-50.0, -20.0));
    assert!((expected.scale - 1.1).abs() < 1e-9);
}

#[tokio::test]
async fn pan_and_zoom_are_not_saved_until_committed() {
    let game = Uuid::new_v4();
    let transport = Arc::new(MemoryTransport::default());
    transport.seed(game, MapState { map_position: Some(Position::new(0.0, 0.0)), ..MapState::default() });
    let mut session = session_with(transport.clone(), game);
    session.load().await.unwrap();

    session.pointer_down(Point::new(10.0, 10.0));
    session.pointer_move(Point::new(60.0, 30.0));
    assert!(session.pointer_up().is_empty());
    session.key_down(&Key::new("+"));
    session.flush().await.unwrap();

    let stored = transport.stored(game).unwrap();
    assert_eq!(stored.state.map_position, Some(Position::new(0.0, 0.0)));
    assert_eq!(stored.state.map_scale, None);

    session.commit_view().await.unwrap();
    let stored = transport.stored(game).unwrap();
    assert_eq!(stored.state.map_position, Some(Position::new(50.0, 20.0)));
    assert!((stored.state.map_scale.unwrap() - 1.1).abs() < 1e-9);
}

#[tokio::test]
async fn double_click_delete_is_persisted() {
    let game = Uuid::new_v4();
    let transport = Arc::new(MemoryTransport::default());
    let keep = persisted(100.0, 100.0, "cat.png");
    let gone = persisted(300.0, 300.0, "cat.png");
    transport.seed(game, MapState { tokens: vec![keep.clone(), gone.clone()], ..MapState::default() });
    let mut session = session_with(transport.clone(), game);
    session.load().await.unwrap();
    drain(&mut session, 2).await;

    let actions = session.double_click(Point::new(320.0, 320.0));
    assert_eq!(actions[0], Action::TokenDeleted(gone.id));
    session.flush().await.unwrap();

    let ids: Vec<_> = transport.stored(game).unwrap().state.tokens.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![keep.id]);
}

#[tokio::test]
async fn snapshot_after_delete_has_no_stale_tokens() {
    let game = Uuid::new_v4();
    let transport = Arc::new(MemoryTransport::default());
    let only = persisted(100.0, 100.0, "cat.png");
    transport.seed(game, MapState { tokens: vec![only], ..MapState::default() });
    let mut session = session_with(transport.clone(), game);
    session.load().await.unwrap();
    drain(&mut session, 1).await;

    session.double_click(Point::new(110.0, 110.0));
    session.flush().await.unwrap();

    let stored = transport.stored(game).unwrap();
    assert!(stored.state.tokens.is_empty());
    assert_eq!(session.engine().snapshot().tokens, Some(vec![]));
}

#[tokio::test]
async fn pump_applies_only_arrived_events() {
    let mut session = session_with(Arc::new(MemoryTransport::default()), Uuid::new_v4());
    assert!(session.pump().is_empty());

    session.add_token_from_palette("cat.png");
    // Let the spawned resolver run.
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    let actions = session.pump();
    assert_eq!(session.engine().tokens().len(), 1);
    assert!(actions.contains(&Action::RenderNeeded));
}

#[tokio::test]
async fn rejected_save_asks_for_reload() {
    let game = Uuid::new_v4();
    let transport = Arc::new(MemoryTransport { check_versions: true, ..MemoryTransport::default() });
    transport.seed(game, MapState::default());
    let config = PersistConfig { detect_conflicts: true, ..PersistConfig::default() };
    let persist = PersistClient::spawn(transport.clone(), &config);
    let mut session = MapSession::new(game, Viewport::new(800.0, 600.0), persist, resolver());
    session.load().await.unwrap();

    // Another editor saves in between.
    transport.seed(game, MapState { map_scale: Some(2.0), ..MapState::default() });
    transport.stored.lock().unwrap().get_mut(&game).unwrap().version = 2;

    session.commit_view().await.unwrap();
    assert!(session.needs_reload());
    assert_eq!(transport.stored(game).unwrap().state.map_scale, Some(2.0));

    session.load().await.unwrap();
    assert!(!session.needs_reload());
    assert_eq!(session.engine().view().scale, 2.0);
}
