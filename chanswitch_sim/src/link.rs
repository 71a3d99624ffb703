//! Simulated radios: channel state per connection and noisy scan reports.

use crate::oracle::SpectrumOracle;
use chanswitch_env::{Channel, ChannelInterference, ChannelMask, ConnectionId, NodeId, ScanReport};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Peak-over-average margin reported for every channel (dB).
const PEAK_MARGIN_DB: f64 = 3.0;

#[derive(Debug, Clone, Copy)]
struct Radio {
    address: NodeId,
    channel: Channel,
}

/// Link layer shared by all simulated stations, keyed by connection.
#[derive(Debug)]
pub struct SimLinkLayer {
    radios: BTreeMap<ConnectionId, Radio>,

    /// Measurement noise; `None` reports ground truth exactly
    noise: Option<Normal<f64>>,
    noise_rng: ChaCha8Rng,

    scan_latency: Duration,
    address_latency: Duration,
}

impl SimLinkLayer {
    pub fn new(noise_seed: u64, noise_std_db: f64, scan_latency: Duration, address_latency: Duration) -> Self {
        let noise = if noise_std_db > 0.0 {
            Normal::new(0.0, noise_std_db).ok()
        } else {
            None
        };
        Self {
            radios: BTreeMap::new(),
            noise,
            noise_rng: ChaCha8Rng::seed_from_u64(noise_seed),
            scan_latency,
            address_latency,
        }
    }

    /// Attaches the radio behind `conn`.
    pub fn register(&mut self, conn: ConnectionId, address: NodeId, channel: Channel) {
        self.radios.insert(conn, Radio { address, channel });
    }

    pub fn channel_of(&self, conn: ConnectionId) -> Option<Channel> {
        self.radios.get(&conn).map(|r| r.channel)
    }

    pub fn address_of(&self, conn: ConnectionId) -> Option<NodeId> {
        self.radios.get(&conn).map(|r| r.address)
    }

    pub fn scan_latency(&self) -> Duration {
        self.scan_latency
    }

    pub fn address_latency(&self) -> Duration {
        self.address_latency
    }

    /// Tunes the radio and returns the channel it left.
    pub fn retune(&mut self, conn: ConnectionId, to: Channel) -> Option<Channel> {
        let radio = self.radios.get_mut(&conn)?;
        let from = radio.channel;
        radio.channel = to;
        debug!(%conn, %from, %to, "radio retuned");
        Some(from)
    }

    /// Sweeps every channel the oracle knows; channels outside `mask` are
    /// reported but marked not switchable.
    pub fn measure(
        &mut self,
        conn: ConnectionId,
        mask: ChannelMask,
        oracle: &SpectrumOracle,
        now: Duration,
    ) -> Option<ScanReport> {
        let current_channel = self.channel_of(conn)?;

        let per_channel = (0..oracle.channel_count())
            .map(|idx| {
                let channel = Channel(idx as u8);
                let average_db = oracle.interference_db(channel, now) + self.sample();
                let worst_db = average_db + PEAK_MARGIN_DB + self.sample().abs();
                ChannelInterference::new(average_db, worst_db, mask.contains(channel))
            })
            .collect();

        Some(ScanReport {
            tx_rss_dbm: oracle.tx_rss_dbm() + self.sample(),
            per_channel,
            current_channel,
        })
    }

    fn sample(&mut self) -> f64 {
        match self.noise {
            Some(normal) => normal.sample(&mut self.noise_rng),
            None => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oracle() -> SpectrumOracle {
        SpectrumOracle::with_profile(1, vec![-20.0, -60.0, -80.0, -70.0])
    }

    #[test]
    fn test_noiseless_scan_reports_ground_truth() {
        let mut link = SimLinkLayer::new(3, 0.0, Duration::from_millis(50), Duration::from_millis(1));
        let conn = ConnectionId(1);
        link.register(conn, NodeId::from_seed(1), Channel(1));

        let mask = ChannelMask::from_channels([Channel(1), Channel(2), Channel(3)]);
        let report = link.measure(conn, mask, &oracle(), Duration::ZERO).unwrap();

        assert_eq!(report.current_channel, Channel(1));
        assert_eq!(report.per_channel.len(), 4);
        assert!(!report.per_channel[0].switchable);
        assert!(report.per_channel[2].switchable);
        assert_eq!(report.per_channel[2].average_db, -80.0);
        assert_eq!(report.per_channel[2].worst_db, -77.0);
        assert_eq!(report.tx_rss_dbm, -40.0);
    }

    #[test]
    fn test_noisy_scans_are_reproducible() {
        let mask = ChannelMask::first(4);
        let scan = || {
            let mut link = SimLinkLayer::new(11, 2.0, Duration::ZERO, Duration::ZERO);
            link.register(ConnectionId(1), NodeId::from_seed(1), Channel(0));
            link.measure(ConnectionId(1), mask, &oracle(), Duration::ZERO).unwrap()
        };
        assert_eq!(scan(), scan());
    }

    #[test]
    fn test_retune_tracks_channel() {
        let mut link = SimLinkLayer::new(0, 0.0, Duration::ZERO, Duration::ZERO);
        let conn = ConnectionId(4);
        link.register(conn, NodeId::from_seed(4), Channel(1));

        assert_eq!(link.retune(conn, Channel(6)), Some(Channel(1)));
        assert_eq!(link.channel_of(conn), Some(Channel(6)));
        assert_eq!(link.retune(ConnectionId(5), Channel(2)), None);
        assert!(link.measure(ConnectionId(5), ChannelMask::first(4), &oracle(), Duration::ZERO).is_none());
    }
}
