//! An event-loop driven, single-threaded-per-loop HTTP/1, HTTP/2 and
//! WebSocket protocol engine.
//!
//! # Layout
//!
//! - [`reactor`] and [`event_loop`]: the per-thread poller and the loop that
//!   owns it, a timer wheel, and a cross-thread task queue.
//! - [`h2`]: HTTP/2 framing, HPACK seam, flow control, the per-stream state
//!   machine, the connection multiplexer, the h2c/TLS handshake, and the
//!   multi-thread stream proxy façade.
//! - [`http1`]: chunked/content-length body framing around an external
//!   HTTP/1 parser collaborator.
//! - [`ws`]: WebSocket (RFC 6455) framing, the HTTP/1.x and HTTP/2 (RFC 8441)
//!   handshakes, and the generic extension negotiation chain.
//! - [`collab`]: the external-collaborator traits (socket, DNS, proxy
//!   connector, response cache) this crate is built against but does not
//!   implement.
//!
//! This library does not implement TLS, HPACK's static/dynamic tables, or
//! any compression codec; those are consumed as collaborators (see
//! [`collab`] and [`h2::hpack`]).

#![cfg_attr(not(test), warn(clippy::print_stdout, clippy::dbg_macro))]

mod error;
pub use error::{Error, ErrorKind, Result};

pub mod collab;
pub mod event_loop;
pub mod h2;
pub mod http1;
pub mod reactor;
pub mod timer;
pub mod ws;
