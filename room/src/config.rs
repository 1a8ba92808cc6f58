//! Room tuning knobs.

use thiserror::Error;

/// Number of sequence ids covered by one receive-window chunk.
pub const CHUNK_IDS: usize = 32;

/// Cadence and window sizes shared by server and client rooms.
///
/// Protocol byte caps live in [`wire::Limits`]; this only covers timing and
/// buffer lengths.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RoomConfig {
    /// Server ticks between packets to each peer.
    pub server_send_rate: u32,
    /// Client ticks between packets to the server.
    pub client_send_rate: u32,
    /// Slots in each dejitter buffer (deltas on the client, commands on the
    /// server).
    pub dejitter_length: usize,
    /// Records kept per entity as delta bases.
    pub record_history: usize,
    /// Unacknowledged commands a client keeps per controlled entity.
    pub command_buffer: usize,
    /// Commands sent per entity per packet, newest first.
    pub commands_per_update: usize,
    /// Default send attempts for a reliable event.
    pub event_attempts: u8,
    /// Receive window size in chunks of [`CHUNK_IDS`] sequence ids.
    pub history_chunks: usize,
    /// Lowest acceptable clock delay, in ticks.
    pub delay_min: u32,
    /// Highest acceptable clock delay, in ticks.
    pub delay_max: u32,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            server_send_rate: 2,
            client_send_rate: 2,
            dejitter_length: 50,
            record_history: 50,
            command_buffer: 40,
            commands_per_update: 32,
            event_attempts: 3,
            history_chunks: 6,
            delay_min: 3,
            delay_max: 9,
        }
    }
}

impl RoomConfig {
    /// Small windows and every-tick sends, for deterministic tests.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            server_send_rate: 1,
            client_send_rate: 1,
            dejitter_length: 16,
            record_history: 8,
            command_buffer: 8,
            commands_per_update: 4,
            event_attempts: 3,
            history_chunks: 1,
            delay_min: 1,
            delay_max: 3,
        }
    }

    /// Size of the event receive window in sequence ids.
    #[must_use]
    pub const fn event_window(&self) -> usize {
        self.history_chunks * CHUNK_IDS
    }

    /// Checks the invariants rooms rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let counts = [
            ("server_send_rate", self.server_send_rate as usize),
            ("client_send_rate", self.client_send_rate as usize),
            ("dejitter_length", self.dejitter_length),
            ("record_history", self.record_history),
            ("command_buffer", self.command_buffer),
            ("commands_per_update", self.commands_per_update),
            ("event_attempts", usize::from(self.event_attempts)),
            ("history_chunks", self.history_chunks),
        ];
        if let Some(&(field, _)) = counts.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Zero { field });
        }
        if self.delay_min > self.delay_max {
            return Err(ConfigError::DelayRange {
                min: self.delay_min,
                max: self.delay_max,
            });
        }
        if self.commands_per_update > self.command_buffer {
            return Err(ConfigError::CommandsPerUpdate {
                per_update: self.commands_per_update,
                buffer: self.command_buffer,
            });
        }
        // Sequence ordering only holds within half the u16 cycle.
        if self.event_window() >= usize::from(u16::MAX / 2) {
            return Err(ConfigError::EventWindow {
                chunks: self.history_chunks,
            });
        }
        Ok(())
    }
}

/// A [`RoomConfig`] that rooms cannot run with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("delay_min {min} exceeds delay_max {max}")]
    DelayRange { min: u32, max: u32 },
    #[error("commands_per_update {per_update} exceeds command_buffer {buffer}")]
    CommandsPerUpdate { per_update: usize, buffer: usize },
    #[error("{chunks} history chunks cover more than half the sequence space")]
    EventWindow { chunks: usize },
}
