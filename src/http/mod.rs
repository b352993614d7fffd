//! Worker HTTP server.
//!
//! Each worker process binds the shared address with `SO_REUSEPORT` so the
//! kernel spreads incoming connections across all workers, then serves the
//! status router until it is told to stop.
//!
//! `SO_REUSEPORT` also admits any other process of the same user that sets it,
//! so a second `dance-monkey serve` on the same port starts without an
//! "Address already in use" error and shares the traffic with the first.
//!
//! The server includes:
//! - Graceful shutdown on SIGTERM
//! - Graceful shutdown when the supervisor closes the worker's stdin

mod server;
mod shutdown;

pub use server::{bind_listener, start_worker, ServerError};
