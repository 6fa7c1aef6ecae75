//! This module exports a minimal tagged message-passing API, encapsulated by
//! a `Transport` trait. Implementors only need to write non-blocking `send`
//! and blocking `recv` operations for a given transport layer (an in-process
//! channel transport and a pure-Rust TCP transport are included). The
//! `MessageChannel` layered on top turns those into posted receives that a
//! cooperative scheduler can poll.
//!

mod backoff;
pub mod channel;
pub mod codec;
pub mod comm;
pub mod local;
pub mod tcp;
pub mod util;
