//! # chameleon -- control for the Knox Chameleon64i matrix
//!
//! `chameleon` is an asynchronous Rust library for driving a Knox
//! Chameleon64i 64x64 audio/video routing matrix through the
//! serial-to-ethernet bridge it is usually wired to. It is built for home
//! automation hosts that expose each output zone as a media player and poll
//! the matrix periodically.
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! chameleon = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! Route an input and set a zone's volume:
//!
//! ```no_run
//! use chameleon::{ChameleonBuilder, InputId, ZoneId};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = ChameleonBuilder::new().host("192.168.1.50").build()?;
//!
//!     let zone = ZoneId::new(4)?;
//!     client.set_input(zone, InputId::new(2)?).await?;
//!     client.set_volume_level(zone, 0.6).await?;
//!
//!     let state = client.get_zone_state(zone).await?;
//!     println!("zone {}: input {:?}, mute {}", zone, state.input, state.mute);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate                    | Purpose                                          |
//! |--------------------------|--------------------------------------------------|
//! | `chameleon-core`         | Types, errors, [`Transport`] / [`Connector`]     |
//! | `chameleon-transport`    | TCP transport and connector                      |
//! | `chameleon-protocol`     | Command framing, builders and reply parsers      |
//! | `chameleon-client`       | Connection manager, client, polling, media view  |
//! | **`chameleon`**          | This facade crate -- re-exports everything       |
//!
//! ## Reliability
//!
//! All commands share one TCP connection and run one at a time. A command
//! that times out or hits a dropped socket closes the connection, which is
//! reopened with exponential backoff and jitter before the command is
//! retried. When every attempt fails the caller gets
//! [`Error::Unavailable`] with the last cause attached; device `ERROR`
//! replies and malformed responses are returned at once.
//!
//! ## Event Subscription
//!
//! ```no_run
//! use chameleon::{ChameleonClient, ChameleonEvent};
//! # async fn example(client: &ChameleonClient) {
//! let mut events = client.subscribe();
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         ChameleonEvent::Reconnecting { attempt } => println!("reconnect #{attempt}"),
//!         other => println!("{other:?}"),
//!     }
//! }
//! # }
//! ```

pub use chameleon_core::*;

pub use chameleon_client::{
    ChameleonBuilder, ChameleonClient, Connection, ConnectionConfig, DeviceConfig, InputConfig,
    MediaView, PlayerState, ZoneBatch, ZoneConfig, ZonePlayer,
};

/// Connection manager, client, builder, config and media view.
pub mod client {
    pub use chameleon_client::*;
}

/// Command framing, builders and reply parsers.
pub mod protocol {
    pub use chameleon_protocol::*;
}

/// TCP transport to the serial bridge.
pub mod tcp {
    pub use chameleon_transport::*;
}
