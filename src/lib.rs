//! Cemuhook DSU UDP server: bridges one or more controller report streams
//! to the DSU wire protocol that Cemu, DS4Windows and friends speak, with
//! per-client subscriptions and timeout-based cleanup.
//!
//! [`server::Server`] is the entry point. Implement [`slots::Controller`]
//! for whatever is producing reports, register it with
//! [`server::Server::add_controller`], and `start()` the server.

mod dispatcher;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod slots;

pub use error::ServerError;
pub use server::{Server, ServerConfig};
pub use slots::Controller;
