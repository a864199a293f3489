//! Operating channel description of a single link.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Frequency band of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Band {
    Band2G,
    Band5G,
    Band6G,
}

impl Band {
    /// Derives the band from a center frequency.
    pub fn from_freq(freq_mhz: u32) -> Result<Self, ParseError> {
        match freq_mhz {
            2412..=2484 => Ok(Band::Band2G),
            5150..=5895 => Ok(Band::Band5G),
            5925..=7125 => Ok(Band::Band6G),
            _ => Err(ParseError::InvalidFrequency(freq_mhz)),
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Band::Band2G => "2g",
            Band::Band5G => "5g",
            Band::Band6G => "6g",
        };
        write!(f, "{}", s)
    }
}

/// Channel bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChannelWidth {
    Mhz20,
    Mhz40,
    Mhz80,
    Mhz160,
    Mhz320,
}

impl ChannelWidth {
    /// Bandwidth in MHz.
    pub const fn mhz(&self) -> u32 {
        match self {
            ChannelWidth::Mhz20 => 20,
            ChannelWidth::Mhz40 => 40,
            ChannelWidth::Mhz80 => 80,
            ChannelWidth::Mhz160 => 160,
            ChannelWidth::Mhz320 => 320,
        }
    }
}

impl fmt::Display for ChannelWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mhz())
    }
}

impl FromStr for ChannelWidth {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_end_matches("MHz").trim_end_matches("mhz") {
            "20" => Ok(ChannelWidth::Mhz20),
            "40" => Ok(ChannelWidth::Mhz40),
            "80" => Ok(ChannelWidth::Mhz80),
            "160" => Ok(ChannelWidth::Mhz160),
            "320" => Ok(ChannelWidth::Mhz320),
            _ => Err(ParseError::InvalidChannelWidth(s.to_string())),
        }
    }
}

impl TryFrom<String> for ChannelWidth {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ChannelWidth> for String {
    fn from(w: ChannelWidth) -> String {
        w.to_string()
    }
}

/// PHY mode negotiated on a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhyMode {
    /// 802.11ax (HE)
    He,
    /// 802.11be (EHT)
    Eht,
}

impl Default for PhyMode {
    fn default() -> Self {
        PhyMode::Eht
    }
}

impl FromStr for PhyMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "he" | "11ax" => Ok(PhyMode::He),
            "eht" | "11be" => Ok(PhyMode::Eht),
            _ => Err(ParseError::InvalidPhyMode(s.to_string())),
        }
    }
}

/// Operating channel of a link.
///
/// `max_tx_power_dbm` is the regulatory transmit-power limit on this
/// channel; the primary-anchor selection compares it across links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    pub freq_mhz: u32,
    pub width: ChannelWidth,
    #[serde(default)]
    pub phymode: PhyMode,
    pub max_tx_power_dbm: i8,
}

impl Channel {
    pub fn new(freq_mhz: u32, width: ChannelWidth, max_tx_power_dbm: i8) -> Self {
        Self {
            freq_mhz,
            width,
            phymode: PhyMode::default(),
            max_tx_power_dbm,
        }
    }

    pub fn with_phymode(mut self, phymode: PhyMode) -> Self {
        self.phymode = phymode;
        self
    }

    pub fn band(&self) -> Result<Band, ParseError> {
        Band::from_freq(self.freq_mhz)
    }

    pub const fn bandwidth_mhz(&self) -> u32 {
        self.width.mhz()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}MHz/{}MHz", self.freq_mhz, self.width)
    }
}
