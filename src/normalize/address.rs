//! Comma-split street address parsing.
//!
//! Deliberately simple: leading integer of the first component is the house
//! number, the remainder is the street, the second component is the city, and
//! the last component is scanned for a two-letter state and a ZIP code. This
//! is not a general address parser.

use crate::models::ParsedAddress;

/// Parse a raw address string into its components.
pub fn parse_address(raw: &str) -> ParsedAddress {
    let mut parsed = ParsedAddress::default();

    let parts: Vec<&str> = raw.split(',').map(str::trim).filter(|p| !p.is_empty()).collect();
    let Some(first) = parts.first() else {
        return parsed;
    };

    let digits: String = first.chars().take_while(|c| c.is_ascii_digit()).collect();
    let street = first[digits.len()..].trim();
    if !digits.is_empty() {
        parsed.house_number = Some(digits);
    }
    if !street.is_empty() {
        parsed.street = Some(street.to_string());
    }

    if let Some(city) = parts.get(1) {
        parsed.city = Some((*city).to_string());
    }

    if parts.len() >= 2 {
        if let Some(last) = parts.last() {
            for token in last.split_whitespace() {
                if parsed.state.is_none() && is_state_abbreviation(token) {
                    parsed.state = Some(token.to_string());
                } else if parsed.zip.is_none() && is_zip(token) {
                    parsed.zip = Some(token.to_string());
                }
            }
            // The trailing "CA 95814" component is not a city.
            if parts.len() == 2 && (parsed.state.is_some() || parsed.zip.is_some()) {
                parsed.city = None;
            }
        }
    }

    parsed
}

fn is_state_abbreviation(token: &str) -> bool {
    token.len() == 2 && token.chars().all(|c| c.is_ascii_uppercase())
}

fn is_zip(token: &str) -> bool {
    match token.split_once('-') {
        Some((five, four)) => {
            five.len() == 5
                && five.chars().all(|c| c.is_ascii_digit())
                && four.len() == 4
                && four.chars().all(|c| c.is_ascii_digit())
        }
        None => token.len() == 5 && token.chars().all(|c| c.is_ascii_digit()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_address() {
        let parsed = parse_address("700 H Street, Sacramento, CA 95814");
        assert_eq!(parsed.house_number.as_deref(), Some("700"));
        assert_eq!(parsed.street.as_deref(), Some("H Street"));
        assert_eq!(parsed.city.as_deref(), Some("Sacramento"));
        assert_eq!(parsed.state.as_deref(), Some("CA"));
        assert_eq!(parsed.zip.as_deref(), Some("95814"));
    }

    #[test]
    fn test_street_only() {
        let parsed = parse_address("H Street");
        assert_eq!(parsed.street.as_deref(), Some("H Street"));
        assert!(parsed.house_number.is_none());
        assert!(parsed.city.is_none());
        assert!(parsed.state.is_none());
        assert!(parsed.zip.is_none());
    }

    #[test]
    fn test_zip_plus_four() {
        let parsed = parse_address("1 Main St, Springfield, IL 62701-4321");
        assert_eq!(parsed.zip.as_deref(), Some("62701-4321"));
        assert_eq!(parsed.state.as_deref(), Some("IL"));
    }

    #[test]
    fn test_city_without_state() {
        let parsed = parse_address("700 H Street, Sacramento");
        assert_eq!(parsed.house_number.as_deref(), Some("700"));
        assert_eq!(parsed.city.as_deref(), Some("Sacramento"));
        assert!(parsed.state.is_none());
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_address("").is_empty());
        assert!(parse_address("   ,  , ").is_empty());
    }

    #[test]
    fn test_malformed_zip_is_skipped() {
        let parsed = parse_address("5 Oak Ave, Anytown, TX 123");
        assert_eq!(parsed.state.as_deref(), Some("TX"));
        assert!(parsed.zip.is_none());
    }
}
