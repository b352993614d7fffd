//! dance-monkey: status API served by a multi-process worker supervisor.
//!
//! The binary runs in one of two roles. The supervisor spawns and watches
//! identical worker processes; each worker binds the shared address and
//! answers `GET /` and `GET /health` with fixed JSON bodies.

pub mod config;
pub mod error;
pub mod http;
pub mod middleware;
pub mod routes;
pub mod supervisor;

pub use error::*;
