//! Protocol byte budgets.
//!
//! These are protocol constants, not negotiated: both sides must use the same
//! values because decoding validates against them.

/// Hard upper bound on items in one packed list (the count is a `u8`).
pub const MAX_LIST_ITEMS: usize = u8::MAX as usize;

/// Bytes reserved at the end of the payload for the fill-pass event count.
pub const EVENT_TRAILER_BYTES: usize = 1;

/// Byte budgets for packet packing and decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum packet size in bytes.
    pub max_packet_bytes: usize,

    /// Absolute byte position the early event pass may fill up to.
    pub early_event_bytes: usize,

    /// Maximum encoded size of a single event.
    pub max_event_bytes: usize,

    /// Maximum encoded size of a single entity delta.
    pub max_delta_bytes: usize,

    /// Maximum encoded size of one entity's command update.
    pub max_command_update_bytes: usize,

    /// Absolute byte position the command section may fill up to.
    pub command_section_bytes: usize,

    /// Maximum encoded size of one view entry.
    pub max_view_entry_bytes: usize,

    /// Maximum items in any one list (clamped to [`MAX_LIST_ITEMS`]).
    pub max_list_items: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            // Stays under a typical 1280-byte IPv6 MTU with UDP headroom.
            max_packet_bytes: 1200,
            early_event_bytes: 370,
            max_event_bytes: 100,
            max_delta_bytes: 400,
            max_command_update_bytes: 124,
            command_section_bytes: 670,
            max_view_entry_bytes: 16,
            max_list_items: MAX_LIST_ITEMS,
        }
    }
}

impl Limits {
    /// Creates limits suitable for testing with smaller values.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            max_packet_bytes: 256,
            early_event_bytes: 64,
            max_event_bytes: 32,
            max_delta_bytes: 64,
            max_command_update_bytes: 48,
            command_section_bytes: 128,
            max_view_entry_bytes: 16,
            max_list_items: 32,
        }
    }

    /// Creates limits with no practical restrictions (use with caution).
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            max_packet_bytes: usize::MAX,
            early_event_bytes: usize::MAX,
            max_event_bytes: usize::MAX,
            max_delta_bytes: usize::MAX,
            max_command_update_bytes: usize::MAX,
            command_section_bytes: usize::MAX,
            max_view_entry_bytes: usize::MAX,
            max_list_items: MAX_LIST_ITEMS,
        }
    }

    /// Item count cap actually enforced.
    #[must_use]
    pub fn list_items(&self) -> usize {
        self.max_list_items.min(MAX_LIST_ITEMS)
    }

    /// Absolute byte position the payload may fill up to, leaving room for
    /// the trailing event count.
    #[must_use]
    pub const fn payload_end(&self) -> usize {
        self.max_packet_bytes.saturating_sub(EVENT_TRAILER_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_packet_bytes() {
        let limits = Limits::default();
        assert_eq!(limits.max_packet_bytes, 1200);
        assert_eq!(limits.payload_end(), 1199);
    }

    #[test]
    fn default_sections_fit_in_packet() {
        let limits = Limits::default();
        assert!(limits.early_event_bytes < limits.max_packet_bytes);
        assert!(limits.command_section_bytes < limits.max_packet_bytes);
        assert!(limits.max_event_bytes < limits.early_event_bytes);
        assert!(limits.max_delta_bytes < limits.payload_end());
    }

    #[test]
    fn testing_limits_smaller() {
        let test_limits = Limits::for_testing();
        let default_limits = Limits::default();

        assert!(test_limits.max_packet_bytes < default_limits.max_packet_bytes);
        assert!(test_limits.early_event_bytes < default_limits.early_event_bytes);
        assert!(test_limits.max_list_items < default_limits.max_list_items);
    }

    #[test]
    fn list_items_clamped() {
        let limits = Limits {
            max_list_items: 10_000,
            ..Limits::default()
        };
        assert_eq!(limits.list_items(), MAX_LIST_ITEMS);
    }

    #[test]
    fn unlimited_payload_end_saturates() {
        let limits = Limits::unlimited();
        assert_eq!(limits.payload_end(), usize::MAX - 1);
    }

    #[test]
    fn limits_const_constructible() {
        const LIMITS: Limits = Limits::for_testing();
        assert_eq!(LIMITS.max_packet_bytes, 256);
    }
}
