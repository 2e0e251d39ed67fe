//! Minimal multi-user TCP chat, served and consumed by one binary.
//!
//! See `README.md` for an overview, usage instructions, and the line
//! protocol. Each module focuses on a concrete responsibility:
//!
//! - [`cli`] parses the command-line interface for server and client modes.
//! - [`protocol`] provides the line framing, the client command keywords,
//!   and the exact shapes of every server-to-client message.
//! - [`session`] holds per-connection state: the identity plus the shared
//!   line sink that broadcasts are delivered through.
//! - [`registry`] tracks the live sessions behind a single lock and carries
//!   out best-effort delivery to everyone but the sender.
//! - [`server`] accepts TCP connections and drives one session handler task
//!   per participant.
//! - [`client`] connects to a server and relays stdin and server lines for
//!   a terminal user.
//!
//! Integration tests use this crate directly to exercise the session
//! lifecycle and the wire protocol.

pub mod cli;
pub mod client;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
