//! Errors the server surfaces on its non-fatal error stream, plus the one
//! that can reject `start()` outright.

use std::net::SocketAddr;

use thiserror::Error;

use crate::protocol::CodecError;

/// Non-fatal errors emitted on [`crate::server::Server::errors`]. None of
/// these tear the server down; the dispatcher's per-datagram failure
/// boundary keeps one bad packet or one bad send from affecting anything
/// else.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A malformed inbound datagram was dropped without a reply.
    #[error("dropped malformed datagram from {source_addr}: {error}")]
    MalformedDatagram {
        source_addr: SocketAddr,
        #[source]
        error: CodecError,
    },

    /// `send_to` returned an error while replying to a request or fanning
    /// out a report.
    #[error("send to {target} failed: {source}")]
    Send {
        target: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// `send_to` wrote fewer bytes than the datagram's length.
    #[error("short send to {target}: wrote {written} of {expected} bytes")]
    ShortSend {
        target: SocketAddr,
        written: usize,
        expected: usize,
    },

    /// The UDP socket itself returned an error outside of a specific send
    /// (e.g. while polling for inbound datagrams).
    #[error("socket error: {0}")]
    Socket(#[source] std::io::Error),

    /// A controller's own error stream reported a problem; forwarded
    /// verbatim.
    #[error("controller in slot {slot} reported an error: {message}")]
    Controller { slot: usize, message: String },
}
