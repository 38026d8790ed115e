//! Async command client for the Knox Chameleon64i.
//!
//! The Chameleon64i is a 64x64 audio/video matrix controlled over RS-232;
//! in the field it sits behind a serial-to-ethernet bridge that exposes the
//! port as a raw TCP socket. This crate provides:
//!
//! - **Connection manager** ([`connection`]) -- one persistent socket, a lock
//!   that serializes every exchange, reconnect with [`backoff`] and jitter.
//! - **Client** ([`client`]) -- typed per-zone operations (routing, volume,
//!   mute, tone, patterns) with host volume levels converted at the boundary.
//! - **Batch polling** ([`poll`]) -- zone state for many zones, bounded by a
//!   semaphore, with one result per zone.
//! - **Builder** ([`builder`]) and **config** ([`config`]) -- construct a
//!   client from code or from stored config-entry JSON.
//! - **Media view** ([`media`]) -- a zone as a media player: on/off, volume
//!   level, mute and named source.
//!
//! # Example
//!
//! ```no_run
//! use chameleon_client::ChameleonBuilder;
//! use chameleon_core::types::{InputId, ZoneId};
//!
//! # async fn example() -> chameleon_core::Result<()> {
//! let client = ChameleonBuilder::new().host("192.168.1.50").build()?;
//!
//! let kitchen = ZoneId::new(1)?;
//! client.set_input(kitchen, InputId::new(3)?).await?;
//! client.set_volume_level(kitchen, 0.5).await?;
//!
//! let zones: Vec<ZoneId> = ZoneId::all().take(8).collect();
//! let batch = client.get_all_zone_states(&zones).await;
//! for (zone, err) in batch.failures() {
//!     eprintln!("zone {zone}: {err}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod builder;
pub mod client;
pub mod config;
pub mod connection;
pub mod media;
pub mod poll;

pub use builder::ChameleonBuilder;
pub use client::ChameleonClient;
pub use config::{DeviceConfig, InputConfig, ZoneConfig};
pub use connection::{Connection, ConnectionConfig};
pub use media::{MediaView, PlayerState, ZonePlayer};
pub use poll::ZoneBatch;
