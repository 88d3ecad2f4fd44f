//! Space and engine composition
//!
//! The outermost layer: invites, the per-space composition root, and
//! the engine registry that routes one transport endpoint to many
//! spaces.

pub mod engine;
pub mod errors;
pub mod invite;
pub mod space;

pub use engine::SyncEngine;
pub use errors::EngineError;
pub use invite::{Invite, InviteUri, DEFAULT_INVITE_TTL};
pub use space::{Space, SpaceEvent, DATA_DIR_NAME};
