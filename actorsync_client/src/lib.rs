//! `actorsync_client`
//!
//! Client-side systems:
//! - Mirror of the actors visible to this session
//! - Dead-reckoning interpolation between server ticks
//! - Render scheduling on fixed substeps
//! - Deduplicated control messages

pub mod client;
pub mod control;
pub mod interp;
pub mod mirror;
pub mod runtime;

pub use client::{ClientHandler, ClientState, GameClient};
pub use mirror::{ClientMirror, MirrorActor, MirrorBehavior};
