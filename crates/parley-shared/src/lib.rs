//! # parley-shared
//!
//! Types shared between the Parley store and server: identifiers, the
//! domain model, the realtime wire protocol and the error taxonomy that is
//! surfaced to connected clients.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::{ChatError, ErrorKind};
pub use types::*;
