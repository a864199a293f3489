//! RSSI normalisation across links.
//!
//! A peer reports RSSI on its association link only. To compare it with
//! the average RSSI seen on another instance, the value is adjusted for
//! the transmit-power limit difference between the two channels and for
//! the extra free-space loss of the higher frequency.

use mlo_types::Channel;

use crate::config::PathLossBucket;

/// Frequency-ratio path-loss correction table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathLossTable {
    /// Sorted by descending `min_ratio_pct`.
    buckets: Vec<PathLossBucket>,
}

impl PathLossTable {
    pub fn new(buckets: Vec<PathLossBucket>) -> Self {
        Self { buckets }
    }

    fn lookup(&self, ratio_pct: u32) -> i32 {
        self.buckets
            .iter()
            .find(|b| ratio_pct >= b.min_ratio_pct)
            .map(|b| b.loss_db as i32)
            .unwrap_or(0)
    }

    /// Extra loss (dB) on `freq_mhz` relative to `ref_freq_mhz`.
    ///
    /// Negative when `freq_mhz` is the lower frequency.
    pub fn path_loss(&self, freq_mhz: u32, ref_freq_mhz: u32) -> i32 {
        if freq_mhz == 0 || ref_freq_mhz == 0 {
            return 0;
        }
        if freq_mhz >= ref_freq_mhz {
            self.lookup(freq_mhz * 100 / ref_freq_mhz)
        } else {
            -self.lookup(ref_freq_mhz * 100 / freq_mhz)
        }
    }

    /// RSSI the peer would likely show on `candidate`, given `assoc_rssi`
    /// measured on `assoc`.
    pub fn adjusted_rssi(&self, assoc_rssi: i8, assoc: &Channel, candidate: &Channel) -> i32 {
        let txpower_delta = candidate.max_tx_power_dbm as i32 - assoc.max_tx_power_dbm as i32;
        assoc_rssi as i32 + txpower_delta - self.path_loss(candidate.freq_mhz, assoc.freq_mhz)
    }
}
