//! Estimate of the remote peer's tick.

use wire::Tick;

/// Tracks the latest tick heard from the remote side and a locally advanced
/// estimate that trails it by a bounded delay.
///
/// The estimate advances by exactly one per local [`Clock::tick`] once the
/// first remote tick has been observed. After a new remote tick arrives the
/// estimate is nudged by one tick per local tick toward
/// `[delay_min, delay_max]` behind it, or snapped to the desired delay when
/// it is too far off to converge by nudging.
#[derive(Debug, Clone)]
pub struct Clock {
    remote_rate: u32,
    delay_min: i64,
    delay_max: i64,
    delay_desired: i64,
    latest_remote: Tick,
    estimated_remote: Tick,
    resync: bool,
}

impl Clock {
    /// `remote_rate` is the number of remote ticks between packets.
    #[must_use]
    pub fn new(remote_rate: u32, delay_min: u32, delay_max: u32) -> Self {
        assert!(delay_min <= delay_max, "delay_min exceeds delay_max");
        let (min, max) = (i64::from(delay_min), i64::from(delay_max));
        Self {
            remote_rate,
            delay_min: min,
            delay_max: max,
            delay_desired: (max - min) / 2 + min,
            latest_remote: Tick::INVALID,
            estimated_remote: Tick::INVALID,
            resync: false,
        }
    }

    pub fn set_remote_rate(&mut self, remote_rate: u32) {
        self.remote_rate = remote_rate;
    }

    #[must_use]
    pub const fn remote_rate(&self) -> u32 {
        self.remote_rate
    }

    /// Highest remote tick observed, or [`Tick::INVALID`].
    #[must_use]
    pub const fn latest_remote(&self) -> Tick {
        self.latest_remote
    }

    /// Current estimate of the remote tick, or [`Tick::INVALID`] before the
    /// first observation.
    #[must_use]
    pub const fn estimated_remote(&self) -> Tick {
        self.estimated_remote
    }

    #[must_use]
    pub const fn delay_desired(&self) -> i64 {
        self.delay_desired
    }

    /// Records a tick read from a remote packet header.
    pub fn observe(&mut self, remote: Tick) {
        if !remote.is_valid() || remote <= self.latest_remote {
            return;
        }
        if !self.latest_remote.is_valid() {
            self.estimated_remote = remote.offset(-self.delay_desired);
        }
        self.latest_remote = remote;
        self.resync = true;
    }

    /// Advances the estimate by one local tick.
    pub fn tick(&mut self) {
        if !self.latest_remote.is_valid() {
            return;
        }
        self.estimated_remote = self.estimated_remote.next();
        if !self.resync {
            return;
        }

        let delta = self.latest_remote.diff(self.estimated_remote);
        let rate = i64::from(self.remote_rate);
        if delta < self.delay_min - rate || delta > self.delay_max + rate {
            self.estimated_remote = self.latest_remote.offset(-self.delay_desired);
            self.resync = false;
        } else if delta < self.delay_min {
            self.estimated_remote = self.estimated_remote.offset(-1);
        } else if delta > self.delay_max {
            self.estimated_remote = self.estimated_remote.next();
        } else {
            self.resync = false;
        }
    }
}
