//! Asynchronous device event types.
//!
//! Events are emitted through a [`tokio::sync::broadcast`] channel owned by
//! the client whenever the connection changes state or a zone register is
//! changed by a successful command. Subscribers that fall behind may miss
//! events; the authoritative state is always the next poll.

use crate::types::{InputId, Volume, ZoneId};

/// An event emitted by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ChameleonEvent {
    /// A connection to the bridge was established.
    Connected,

    /// The connection was closed, either on request or after a failure.
    Disconnected,

    /// A command failed and the client is backing off before reconnecting.
    Reconnecting {
        /// The failed attempt number (1-based).
        attempt: u32,
    },

    /// A zone was routed to a new input.
    InputChanged {
        /// Affected zone.
        zone: ZoneId,
        /// Newly routed input.
        input: InputId,
    },

    /// A zone's volume changed.
    VolumeChanged {
        /// Affected zone.
        zone: ZoneId,
        /// New device volume.
        volume: Volume,
    },

    /// A zone was muted or unmuted.
    MuteChanged {
        /// Affected zone.
        zone: ZoneId,
        /// `true` if now muted.
        muted: bool,
    },
}
