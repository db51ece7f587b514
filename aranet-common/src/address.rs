//! Bluetooth device address handling.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A 48-bit Bluetooth MAC address.
///
/// Accepts `:` or `-` separated hex octets in either case and always
/// displays in upper case with `:` separators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceAddress([u8; 6]);

impl DeviceAddress {
    pub fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for DeviceAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| Error::InvalidAddress {
            address: s.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(invalid("address is empty"));
        }

        let separator = if trimmed.contains(':') { ':' } else { '-' };
        let parts: Vec<&str> = trimmed.split(separator).collect();
        if parts.len() != 6 {
            return Err(invalid("expected 6 octets"));
        }

        let mut octets = [0u8; 6];
        for (octet, part) in octets.iter_mut().zip(&parts) {
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid("each octet must be two hex digits"));
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid("invalid hex digit"))?;
        }

        Ok(Self(octets))
    }
}

impl TryFrom<String> for DeviceAddress {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceAddress> for String {
    fn from(address: DeviceAddress) -> Self {
        address.to_string()
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a, b, c, d, e, g
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_colon_separated() {
        let addr: DeviceAddress = "d4:6b:3c:1a:2b:3c".parse().unwrap();
        assert_eq!(addr.octets(), [0xD4, 0x6B, 0x3C, 0x1A, 0x2B, 0x3C]);
        assert_eq!(addr.to_string(), "D4:6B:3C:1A:2B:3C");
    }

    #[test]
    fn test_parse_dash_separated() {
        let addr: DeviceAddress = "D4-6B-3C-1A-2B-3C".parse().unwrap();
        assert_eq!(addr.to_string(), "D4:6B:3C:1A:2B:3C");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("".parse::<DeviceAddress>().is_err());
        assert!("D4:6B:3C:1A:2B".parse::<DeviceAddress>().is_err());
        assert!("D4:6B:3C:1A:2B:3C:00".parse::<DeviceAddress>().is_err());
        assert!("D4:6B:3C:1A:2B:ZZ".parse::<DeviceAddress>().is_err());
        assert!("D46B:3C:1A:2B:3C:0".parse::<DeviceAddress>().is_err());
        assert!("+A:BB:CC:DD:EE:FF".parse::<DeviceAddress>().is_err());
        assert!("AA:BB:CC:DD:EE:-F".parse::<DeviceAddress>().is_err());
    }

    #[test]
    fn test_error_names_address() {
        let err = "not-a-mac".parse::<DeviceAddress>().unwrap_err();
        assert!(err.to_string().contains("not-a-mac"));
    }

    #[test]
    fn test_serde_as_string() {
        let addr: DeviceAddress = serde_json::from_str("\"aa:bb:cc:dd:ee:ff\"").unwrap();
        assert_eq!(serde_json::to_string(&addr).unwrap(), "\"AA:BB:CC:DD:EE:FF\"");

        let bad: Result<DeviceAddress, _> = serde_json::from_str("\"aa:bb\"");
        assert!(bad.is_err());
    }
}
