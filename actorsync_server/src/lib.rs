//! `actorsync_server`
//!
//! Server-side systems:
//! - Actor registry and lifecycle
//! - Sessions with per-session known-actor sets and outbound queues
//! - Per-step reconcile of actors against sessions
//! - Fixed timestep loop (`GameServer`) and its tokio driver
//!
//! Networking model:
//! - The core sends through `Connection` handles and never blocks
//! - The driver owns sockets and feeds frames back in

pub mod actor;
pub mod demo;
pub mod registry;
pub mod runtime;
pub mod server;
pub mod session;
pub mod sync;

pub use actor::{ActorBehavior, ActorContext, ActorCore, ActorPhase};
pub use registry::{ActorError, ActorRegistry};
pub use server::{GameHandler, GameServer, GameState};
pub use session::SessionError;
