//! Thor/Odin protocol engine: pipelined USB bulk flashing for Tizen and
//! legacy Samsung download-mode devices.
//!
//! This crate is the core protocol engine plus a thin external layer (USB
//! enumeration, CDC-ACM setup, CLI). The engine itself — codec, session
//! state machine, pipelined sender, PIT dump receiver — is
//! transport-agnostic behind the [`transport::BulkTransport`] and
//! [`transport::BulkDriver`] traits, and depends on `rusb` only at the edges.

pub mod codec;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod pit;
pub mod proto_ids;
pub mod session;
pub mod source;
pub mod transport;
pub mod util;

pub use error::{Error, Result};
