//! MAC address type used for MLD and per-link addresses.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 48-bit IEEE 802 MAC address.
///
/// An MLD carries one MLD address plus one address per affiliated link;
/// both use this type.
///
/// # Examples
///
/// ```
/// use mlo_types::MacAddress;
///
/// let mac: MacAddress = "02:11:22:33:44:55".parse().unwrap();
/// assert_eq!(mac.to_string(), "02:11:22:33:44:55");
/// assert!(mac.is_local());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// The zero address, used for "no address".
    pub const ZERO: MacAddress = MacAddress([0; 6]);

    /// Creates a MAC address from raw bytes.
    pub const fn new(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }

    /// Returns the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Returns true if the group bit is set.
    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// Returns true if the locally-administered bit is set.
    ///
    /// Per-link addresses of an MLD are usually derived from the MLD
    /// address and carry this bit.
    pub const fn is_local(&self) -> bool {
        self.0[0] & 0x02 != 0
    }

    /// Returns true if every octet is zero.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Returns true if the address can be used as a link address
    /// (non-zero unicast).
    pub fn is_valid_link_addr(&self) -> bool {
        !self.is_zero() && !self.is_multicast()
    }
}

impl Default for MacAddress {
    fn default() -> Self {
        MacAddress::ZERO
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let separator = if s.contains(':') { ':' } else { '-' };

        let mut bytes = [0u8; 6];
        let mut count = 0;
        for part in s.split(separator) {
            if count == 6 || part.len() != 2 {
                return Err(ParseError::InvalidMacAddress(s.to_string()));
            }
            bytes[count] = u8::from_str_radix(part, 16)
                .map_err(|_| ParseError::InvalidMacAddress(s.to_string()))?;
            count += 1;
        }

        if count != 6 {
            return Err(ParseError::InvalidMacAddress(s.to_string()));
        }
        Ok(MacAddress(bytes))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> String {
        mac.to_string()
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_both_separators() {
        let a: MacAddress = "00:11:22:33:44:55".parse().unwrap();
        let b: MacAddress = "00-11-22-33-44-55".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_bytes(), &[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    }

    #[test]
    fn test_display_lowercase() {
        let mac = MacAddress::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert_eq!(mac.to_string(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn test_link_addr_validity() {
        assert!(!MacAddress::ZERO.is_valid_link_addr());
        let group: MacAddress = "01:00:5e:00:00:01".parse().unwrap();
        assert!(!group.is_valid_link_addr());
        let link: MacAddress = "02:00:00:00:00:01".parse().unwrap();
        assert!(link.is_valid_link_addr());
        assert!(link.is_local());
    }

    #[test]
    fn test_invalid_format() {
        assert!("invalid".parse::<MacAddress>().is_err());
        assert!("00:11:22:33:44".parse::<MacAddress>().is_err());
        assert!("00:11:22:33:44:55:66".parse::<MacAddress>().is_err());
        assert!("0:11:22:33:44:55".parse::<MacAddress>().is_err());
        assert!("zz:11:22:33:44:55".parse::<MacAddress>().is_err());
    }
}
