//! Peripheral model and beacon frame parsing
//!
//! A peripheral is identified by a stable `unique_key` derived from its
//! broadcast data. For iBeacon frames the key is
//! `<uuid128 hex>:<major>:<minor>`. Peripherals are immutable once
//! constructed; ranging attributes (`accuracy`, `proximity`) are derived at
//! construction from the advertised power and RSSI.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

const APPLE_COMPANY_IDENTIFIER: u16 = 0x004c;
const IBEACON_SUBTYPE: u8 = 0x02;
const IBEACON_DATA_LENGTH: u8 = 0x15;
const IBEACON_MANUFACTURER_DATA_LENGTH: usize = 25;

pub const KIND_IBEACON: &str = "ibeacon";

/// Ranged proximity bucket derived from accuracy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Proximity {
    Unknown,
    Immediate,
    Near,
    Far,
}

impl Proximity {
    fn from_accuracy(accuracy: f64) -> Self {
        if accuracy < 0.0 {
            Proximity::Unknown
        } else if accuracy < 0.5 {
            Proximity::Immediate
        } else if accuracy < 4.0 {
            Proximity::Near
        } else {
            Proximity::Far
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Proximity::Unknown => "unknown",
            Proximity::Immediate => "immediate",
            Proximity::Near => "near",
            Proximity::Far => "far",
        }
    }
}

impl fmt::Display for Proximity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Variant-specific beacon payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PeripheralDetail {
    IBeacon {
        /// 32-char lowercase hex
        uuid: String,
        major: u16,
        minor: u16,
    },
}

/// One observed BLE peripheral
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peripheral {
    unique_key: String,
    local_name: String,
    manufacturer_data: Vec<u8>,
    tx_power: f64,
    rssi: f64,
    address: String,
    accuracy: f64,
    proximity: Proximity,
    detail: PeripheralDetail,
}

impl Peripheral {
    /// Parse a raw advertisement into a peripheral.
    ///
    /// Returns [`Error::UnsupportedAdvertisement`] when the manufacturer data
    /// does not carry a supported beacon frame.
    pub fn from_advertisement(
        local_name: impl Into<String>,
        manufacturer_data: &[u8],
        tx_power: f64,
        rssi: f64,
        address: impl Into<String>,
    ) -> Result<Self> {
        if !is_ibeacon_frame(manufacturer_data) {
            return Err(Error::UnsupportedAdvertisement);
        }

        let uuid = hex::encode(&manufacturer_data[4..20]);
        let major = u16::from_be_bytes([manufacturer_data[20], manufacturer_data[21]]);
        let minor = u16::from_be_bytes([manufacturer_data[22], manufacturer_data[23]]);

        Ok(Self::ibeacon(
            uuid,
            major,
            minor,
            local_name,
            manufacturer_data.to_vec(),
            tx_power,
            rssi,
            address,
        ))
    }

    /// Construct an iBeacon peripheral from already-parsed fields.
    #[allow(clippy::too_many_arguments)]
    pub fn ibeacon(
        uuid: impl Into<String>,
        major: u16,
        minor: u16,
        local_name: impl Into<String>,
        manufacturer_data: Vec<u8>,
        tx_power: f64,
        rssi: f64,
        address: impl Into<String>,
    ) -> Self {
        let uuid = uuid.into();
        let accuracy = calculate_accuracy(tx_power, rssi);

        Self {
            unique_key: ibeacon_unique_key(&uuid, major, minor),
            local_name: local_name.into(),
            manufacturer_data,
            tx_power,
            rssi,
            address: address.into(),
            accuracy,
            proximity: Proximity::from_accuracy(accuracy),
            detail: PeripheralDetail::IBeacon { uuid, major, minor },
        }
    }

    pub fn unique_key(&self) -> &str {
        &self.unique_key
    }

    pub fn kind(&self) -> &'static str {
        match self.detail {
            PeripheralDetail::IBeacon { .. } => KIND_IBEACON,
        }
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn manufacturer_data(&self) -> &[u8] {
        &self.manufacturer_data
    }

    pub fn tx_power(&self) -> f64 {
        self.tx_power
    }

    pub fn rssi(&self) -> f64 {
        self.rssi
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn accuracy(&self) -> f64 {
        self.accuracy
    }

    pub fn proximity(&self) -> Proximity {
        self.proximity
    }

    pub fn detail(&self) -> &PeripheralDetail {
        &self.detail
    }
}

/// Whether the manufacturer data carries any supported beacon frame.
pub fn is_supported_frame(data: &[u8]) -> bool {
    is_ibeacon_frame(data)
}

fn is_ibeacon_frame(data: &[u8]) -> bool {
    if data.len() < IBEACON_MANUFACTURER_DATA_LENGTH {
        return false;
    }

    u16::from_le_bytes([data[0], data[1]]) == APPLE_COMPANY_IDENTIFIER
        && data[2] == IBEACON_SUBTYPE
        && data[3] == IBEACON_DATA_LENGTH
}

/// Build the stable key for an iBeacon identity.
pub fn ibeacon_unique_key(uuid: &str, major: u16, minor: u16) -> String {
    format!("{}:{}:{}", uuid, major, minor)
}

/// Parse a key produced by [`ibeacon_unique_key`] back into its parts.
pub fn parse_ibeacon_unique_key(key: &str) -> Result<(String, u16, u16)> {
    let mut parts = key.split(':');

    let (uuid, major, minor) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(uuid), Some(major), Some(minor), None) => (uuid, major, minor),
        _ => return Err(Error::InvalidUniqueKey(key.to_string())),
    };

    if uuid.is_empty() {
        return Err(Error::InvalidUniqueKey(key.to_string()));
    }

    let major: u16 = major
        .parse()
        .map_err(|_| Error::InvalidUniqueKey(key.to_string()))?;
    let minor: u16 = minor
        .parse()
        .map_err(|_| Error::InvalidUniqueKey(key.to_string()))?;

    Ok((uuid.to_string(), major, minor))
}

fn calculate_accuracy(power: f64, rssi: f64) -> f64 {
    12.0_f64.powf(1.5 * ((rssi / power) - 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ibeacon_frame(uuid: &[u8; 16], major: u16, minor: u16) -> Vec<u8> {
        let mut data = vec![0x4c, 0x00, 0x02, 0x15];
        data.extend_from_slice(uuid);
        data.extend_from_slice(&major.to_be_bytes());
        data.extend_from_slice(&minor.to_be_bytes());
        data.push(0xc5); // calibrated power
        data
    }

    #[test]
    fn test_parse_ibeacon_frame() {
        let uuid = [0xab; 16];
        let data = ibeacon_frame(&uuid, 1001, 42);

        let peripheral =
            Peripheral::from_advertisement("lobby", &data, -59.0, -71.0, "aa:bb:cc:dd:ee:ff")
                .unwrap();

        assert_eq!(peripheral.kind(), KIND_IBEACON);
        assert_eq!(
            peripheral.unique_key(),
            format!("{}:1001:42", "ab".repeat(16))
        );

        match peripheral.detail() {
            PeripheralDetail::IBeacon { uuid, major, minor } => {
                assert_eq!(uuid, &"ab".repeat(16));
                assert_eq!(*major, 1001);
                assert_eq!(*minor, 42);
            }
        }
    }

    #[test]
    fn test_rejects_short_frame() {
        let data = vec![0x4c, 0x00, 0x02, 0x15];
        assert!(matches!(
            Peripheral::from_advertisement("", &data, 1.0, 1.0, ""),
            Err(Error::UnsupportedAdvertisement)
        ));
    }

    #[test]
    fn test_rejects_wrong_company() {
        let uuid = [0x01; 16];
        let mut data = ibeacon_frame(&uuid, 1, 1);
        data[0] = 0x4d;
        assert!(!is_supported_frame(&data));
    }

    #[test]
    fn test_unique_key_round_trip() {
        let uuid = "0123456789abcdef0123456789abcdef";
        for (major, minor) in [(0u16, 0u16), (1, 2), (65535, 65535), (42, 7)] {
            let key = ibeacon_unique_key(uuid, major, minor);
            let (u, ma, mi) = parse_ibeacon_unique_key(&key).unwrap();
            assert_eq!(u, uuid);
            assert_eq!(ma, major);
            assert_eq!(mi, minor);
        }
    }

    #[test]
    fn test_unique_key_rejects_garbage() {
        assert!(parse_ibeacon_unique_key("").is_err());
        assert!(parse_ibeacon_unique_key("abc").is_err());
        assert!(parse_ibeacon_unique_key("abc:1").is_err());
        assert!(parse_ibeacon_unique_key("abc:1:2:3").is_err());
        assert!(parse_ibeacon_unique_key("abc:99999:1").is_err());
        assert!(parse_ibeacon_unique_key(":1:2").is_err());
    }

    #[test]
    fn test_proximity_buckets() {
        assert_eq!(Proximity::from_accuracy(-0.1), Proximity::Unknown);
        assert_eq!(Proximity::from_accuracy(0.0), Proximity::Immediate);
        assert_eq!(Proximity::from_accuracy(0.49), Proximity::Immediate);
        assert_eq!(Proximity::from_accuracy(0.5), Proximity::Near);
        assert_eq!(Proximity::from_accuracy(3.99), Proximity::Near);
        assert_eq!(Proximity::from_accuracy(4.0), Proximity::Far);
    }

    #[test]
    fn test_accuracy_formula() {
        // rssi == power gives exactly 1.0
        assert!((calculate_accuracy(-59.0, -59.0) - 1.0).abs() < f64::EPSILON);

        // weaker signal than calibrated power ranges farther away
        assert!(calculate_accuracy(-59.0, -80.0) > calculate_accuracy(-59.0, -60.0));
    }
}
