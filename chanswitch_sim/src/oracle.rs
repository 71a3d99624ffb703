//! Ground truth spectrum for simulation.
//!
//! The SpectrumOracle holds the "true" interference level of every channel:
//! - A per-channel ambient floor, optionally drifting as a random walk
//! - Jammers that raise one channel for a time span
//! - The peer's received signal strength
//!
//! The link layer samples it (with measurement noise) to build scan reports.

use chanswitch_env::{Channel, ChannelMask};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::Serialize;
use std::time::Duration;

/// Lowest and highest ambient floor the random walk may reach (dB).
const FLOOR_RANGE_DB: (f64, f64) = (-100.0, -50.0);

/// A narrowband interferer parked on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Jammer {
    pub channel: Channel,
    pub start: Duration,

    /// `None` keeps it on until the end of the run
    pub end: Option<Duration>,

    /// Interference power added to the channel (dB)
    pub level_db: f64,
}

impl Jammer {
    pub fn is_active(&self, now: Duration) -> bool {
        self.start <= now && self.end.map_or(true, |end| now < end)
    }
}

/// The oracle - ground truth interference per channel.
#[derive(Debug)]
pub struct SpectrumOracle {
    /// RNG for the random walk (separate from measurement noise)
    spectrum_rng: ChaCha8Rng,

    /// Current ambient floor per channel index (dB)
    floor_db: Vec<f64>,

    /// Per-step random-walk distribution; `None` keeps the floor static
    walk: Option<Normal<f64>>,

    /// Spacing between random-walk steps
    walk_interval: Duration,

    /// Time of the last applied walk step
    last_step: Duration,

    jammers: Vec<Jammer>,

    /// Peer signal strength at the receiver (dBm)
    tx_rss_dbm: f64,
}

impl SpectrumOracle {
    /// Creates an oracle with `channel_count` channels at random floors.
    pub fn new(spectrum_seed: u64, channel_count: u8) -> Self {
        let mut spectrum_rng = ChaCha8Rng::seed_from_u64(spectrum_seed);
        let floor_db = (0..channel_count)
            .map(|_| spectrum_rng.gen_range(-95.0..-65.0))
            .collect();
        Self::build(spectrum_rng, floor_db)
    }

    /// Creates an oracle with an explicit floor per channel.
    pub fn with_profile(spectrum_seed: u64, floor_db: Vec<f64>) -> Self {
        Self::build(ChaCha8Rng::seed_from_u64(spectrum_seed), floor_db)
    }

    fn build(spectrum_rng: ChaCha8Rng, floor_db: Vec<f64>) -> Self {
        Self {
            spectrum_rng,
            floor_db,
            walk: None,
            walk_interval: Duration::from_secs(1),
            last_step: Duration::ZERO,
            jammers: Vec::new(),
            tx_rss_dbm: -40.0,
        }
    }

    /// Enables the random walk: every `interval` each floor moves by
    /// N(0, `std_db`). A non-positive deviation disables it.
    pub fn set_walk(&mut self, std_db: f64, interval: Duration) {
        self.walk = if std_db > 0.0 && !interval.is_zero() {
            Normal::new(0.0, std_db).ok()
        } else {
            None
        };
        self.walk_interval = interval;
    }

    pub fn set_tx_rss_dbm(&mut self, tx_rss_dbm: f64) {
        self.tx_rss_dbm = tx_rss_dbm;
    }

    pub fn tx_rss_dbm(&self) -> f64 {
        self.tx_rss_dbm
    }

    pub fn channel_count(&self) -> usize {
        self.floor_db.len()
    }

    pub fn add_jammer(&mut self, jammer: Jammer) {
        self.jammers.push(jammer);
    }

    pub fn jammers(&self) -> &[Jammer] {
        &self.jammers
    }

    /// Applies every walk step due up to `now`.
    pub fn advance_to(&mut self, now: Duration) {
        let Some(walk) = self.walk else {
            return;
        };
        while self.last_step + self.walk_interval <= now {
            self.last_step += self.walk_interval;
            for floor in self.floor_db.iter_mut() {
                let step = walk.sample(&mut self.spectrum_rng);
                *floor = (*floor + step).clamp(FLOOR_RANGE_DB.0, FLOOR_RANGE_DB.1);
            }
        }
    }

    /// True interference on `channel` at `now` (dB); floor and jammers add
    /// as powers.
    pub fn interference_db(&self, channel: Channel, now: Duration) -> f64 {
        let Some(floor) = self.floor_db.get(channel.index()) else {
            return FLOOR_RANGE_DB.1;
        };
        let total_mw = self
            .jammers
            .iter()
            .filter(|j| j.channel == channel && j.is_active(now))
            .fold(db_to_mw(*floor), |acc, j| acc + db_to_mw(j.level_db));
        mw_to_db(total_mw)
    }

    /// Least-interfered channel in `mask`, ties to the lower index.
    pub fn best_channel(&self, mask: ChannelMask, now: Duration) -> Option<Channel> {
        mask.channels()
            .filter(|c| c.index() < self.floor_db.len())
            .map(|c| (c, self.interference_db(c, now)))
            .fold(None, |best: Option<(Channel, f64)>, (c, db)| match best {
                Some((_, best_db)) if best_db <= db => best,
                _ => Some((c, db)),
            })
            .map(|(c, _)| c)
    }
}

fn db_to_mw(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

fn mw_to_db(mw: f64) -> f64 {
    10.0 * mw.log10()
}
