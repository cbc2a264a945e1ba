//! Voltage decoding for sensors that report their reading in the advertised name,
//! e.g. `"Lancol BT01 12.92V"`.

use thiserror::Error;

/// Unit letter the sensor appends to the reading.
pub const VOLTAGE_UNIT: char = 'V';

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Device did not advertise a name")]
    MissingName,
    #[error("Advertised name is empty")]
    EmptyName,
    #[error("Invalid voltage token: {0:?}")]
    InvalidToken(String),
}

/// Parse the trailing `<digits>[.<digits>]V` token of an advertised name.
pub fn decode_voltage(name: Option<&str>) -> Result<f64, DecodeError> {
    let name = name.ok_or(DecodeError::MissingName)?;
    let token = name.split_whitespace().last().ok_or(DecodeError::EmptyName)?;

    let number = token
        .strip_suffix(VOLTAGE_UNIT)
        .filter(|n| is_decimal(n))
        .ok_or_else(|| DecodeError::InvalidToken(token.to_string()))?;

    number
        .parse::<f64>()
        .map_err(|_| DecodeError::InvalidToken(token.to_string()))
}

fn is_decimal(s: &str) -> bool {
    let (whole, fraction) = match s.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (s, None),
    };
    let digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());

    digits(whole) && fraction.is_none_or(digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_voltage() {
        assert_eq!(decode_voltage(Some("Lancol BT01 12.92V")), Ok(12.92));
        assert_eq!(decode_voltage(Some("Lancol 12.92V")), Ok(12.92));
        assert_eq!(decode_voltage(Some("Lancol 13V")), Ok(13.0));
        assert_eq!(decode_voltage(Some("  Lancol   0.5V  ")), Ok(0.5));
    }

    #[test]
    fn test_decode_formatted_names() {
        for value in [0.0, 3.3, 11.87, 12.92, 14.4, 25.06] {
            let name = format!("Lancol BT01 {value}V");
            assert_eq!(decode_voltage(Some(name.as_str())), Ok(value), "{name}");
        }
    }

    #[test]
    fn test_decode_missing_or_empty() {
        assert_eq!(decode_voltage(None), Err(DecodeError::MissingName));
        assert_eq!(decode_voltage(Some("")), Err(DecodeError::EmptyName));
        assert_eq!(decode_voltage(Some("   ")), Err(DecodeError::EmptyName));
    }

    #[test]
    fn test_decode_invalid_token() {
        assert_eq!(
            decode_voltage(Some("NoNumberHere")),
            Err(DecodeError::InvalidToken("NoNumberHere".to_string()))
        );
        assert!(decode_voltage(Some("Lancol BATTERY_LOW")).is_err());
        assert!(decode_voltage(Some("Lancol 12.92")).is_err());
        assert!(decode_voltage(Some("Lancol V")).is_err());
        assert!(decode_voltage(Some("Lancol -1.0V")).is_err());
        assert!(decode_voltage(Some("Lancol 12.V")).is_err());
        assert!(decode_voltage(Some("Lancol .5V")).is_err());
        assert!(decode_voltage(Some("Lancol 1e3V")).is_err());
        assert!(decode_voltage(Some("Lancol 12.92VV")).is_err());
    }

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::InvalidToken("BATTERY_LOW".to_string());
        assert_eq!(format!("{}", err), "Invalid voltage token: \"BATTERY_LOW\"");
        assert_eq!(
            format!("{}", DecodeError::MissingName),
            "Device did not advertise a name"
        );
    }
}
