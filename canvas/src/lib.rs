//! Interactive map engine for a tabletop game board.
//!
//! The crate owns everything between raw pointer/keyboard input and the map
//! persistence service: translating gestures into view and token mutations,
//! keeping tokens pinned to the map while it pans and zooms, hit-testing,
//! resolving image dimensions, and pushing ordered snapshots to storage. The
//! host is responsible only for forwarding input events and drawing the
//! current state after each [`engine::Action::RenderNeeded`].
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`engine`] | Synchronous, testable [`engine::EngineCore`] and its actions |
//! | [`session`] | One open map: engine, asset resolution and persistence wired together |
//! | [`doc`] | Token type and the in-memory token store |
//! | [`camera`] | Map view, pan/zoom and the token rescaling rule |
//! | [`input`] | Input event types and the gesture state machine |
//! | [`hit`] | Topmost-token hit-testing |
//! | [`asset`] | Image reference resolution to pixel dimensions |
//! | [`persist`] | Persistence transport and the ordered save queue |
//! | [`consts`] | Shared numeric constants (zoom limits, token height, etc.) |

pub mod asset;
pub mod camera;
pub mod consts;
pub mod doc;
pub mod engine;
pub mod hit;
pub mod input;
pub mod persist;
pub mod session;
