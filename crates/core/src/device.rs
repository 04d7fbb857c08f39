use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A device discovered on the router's LAN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub ip: String,
    pub mac: String,
    /// BusyBox reports `*` for hosts that never sent a hostname; that value
    /// is preserved as-is.
    pub hostname: String,
}

/// Validate a dotted-quad IPv4 address.
///
/// # Errors
///
/// Returns [`CoreError::InvalidIp`] if the value does not parse as four
/// decimal octets.
pub fn validate_ip(raw: &str) -> Result<(), CoreError> {
    let err = || CoreError::InvalidIp(raw.to_owned());
    let octets: Vec<&str> = raw.split('.').collect();
    if octets.len() != 4 {
        return Err(err());
    }
    for octet in octets {
        if octet.is_empty() || octet.len() > 3 || !octet.chars().all(|c| c.is_ascii_digit()) {
            return Err(err());
        }
        // Leading zeros are ambiguous (octal in some parsers); reject them.
        if octet.len() > 1 && octet.starts_with('0') {
            return Err(err());
        }
        if octet.parse::<u16>().map_err(|_| err())? > 255 {
            return Err(err());
        }
    }
    Ok(())
}

/// Normalise a MAC address to upper-case colon-separated form.
///
/// # Errors
///
/// Returns [`CoreError::InvalidMac`] if the input does not contain exactly
/// twelve hex digits.
pub fn normalize_mac(raw: &str) -> Result<String, CoreError> {
    let digits: String = raw
        .trim()
        .chars()
        .filter(|c| *c != ':' && *c != '-')
        .collect();
    if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CoreError::InvalidMac(raw.to_owned()));
    }
    let upper = digits.to_ascii_uppercase();
    let pairs: Vec<String> = upper
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect();
    Ok(pairs.join(":"))
}

/// Validate a bandwidth rate limit, accepted range `1..=1000` Mbps.
///
/// # Errors
///
/// Returns [`CoreError::RateOutOfRange`] outside the range.
pub fn validate_rate(rate: i64) -> Result<u16, CoreError> {
    if (1..=1000).contains(&rate) {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Ok(rate as u16)
    } else {
        Err(CoreError::RateOutOfRange(rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_ips() {
        validate_ip("192.168.1.10").unwrap();
        validate_ip("10.0.0.1").unwrap();
        validate_ip("255.255.255.255").unwrap();
        validate_ip("0.0.0.0").unwrap();
    }

    #[test]
    fn rejects_invalid_ips() {
        assert!(validate_ip("").is_err());
        assert!(validate_ip("192.168.1").is_err());
        assert!(validate_ip("192.168.1.256").is_err());
        assert!(validate_ip("192.168.01.1").is_err());
        assert!(validate_ip("a.b.c.d").is_err());
        assert!(validate_ip("192.168.1.10.5").is_err());
    }

    #[test]
    fn normalises_mac_variants() {
        assert_eq!(
            normalize_mac("aa:bb:cc:11:22:33").unwrap(),
            "AA:BB:CC:11:22:33"
        );
        assert_eq!(
            normalize_mac("AA-BB-CC-11-22-33").unwrap(),
            "AA:BB:CC:11:22:33"
        );
        assert_eq!(normalize_mac("aabbcc112233").unwrap(), "AA:BB:CC:11:22:33");
        assert!(normalize_mac("aa:bb:cc").is_err());
    }

    #[test]
    fn rate_bounds() {
        assert_eq!(validate_rate(1).unwrap(), 1);
        assert_eq!(validate_rate(1000).unwrap(), 1000);
        assert!(validate_rate(0).is_err());
        assert!(validate_rate(1001).is_err());
        assert!(validate_rate(-5).is_err());
    }
}
