//! `actorsync_shared`
//!
//! Pieces used by both the authoritative server and the client mirror.
//!
//! Design goals:
//! - Deterministic where it matters (fixed-step clock, stable wire rounding).
//! - Terse wire format: array messages, bare object keys.
//! - The core talks to the network only through `transport::Connection`.
//! - No `unsafe`.

pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod fields;
pub mod protocol;
pub mod transport;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::clock::*;
    pub use crate::config::*;
    pub use crate::error::*;
    pub use crate::fields::*;
    pub use crate::protocol::*;
    pub use crate::transport::{Connection, MemoryConnection};
}
