//! chameleon-core: Core types, traits, and error definitions.
//!
//! This crate defines the device-level abstractions that the codec, the
//! transport and the client build on. Host integrations depend on these
//! types without pulling in the TCP stack.
//!
//! # Key types
//!
//! - [`ZoneId`], [`InputId`], [`Volume`] -- validated identifiers and registers
//! - [`ZoneState`], [`MuteState`] -- per-zone snapshots (mute is tri-state)
//! - [`Transport`], [`Connector`] -- byte stream and how to open one
//! - [`ChameleonEvent`] -- connection and zone change notifications
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
pub use events::ChameleonEvent;
pub use transport::{Connector, Transport};
pub use types::*;
