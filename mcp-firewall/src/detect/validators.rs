//! Checksum and format validators. A pattern whose label implies a checksum
//! runs it here before the candidate is emitted.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Luhn mod-10 over the digits of the candidate, 13–19 digits required.
pub(crate) fn is_credit_card(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();

    if !(13..=19).contains(&digits.len()) {
        return false;
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();

    sum % 10 == 0
}

/// SSA issuance rules: area not 000/666/900–999, group not 00, serial not 0000.
pub(crate) fn is_ssn(candidate: &str) -> bool {
    let mut parts = candidate.split('-');
    let (Some(area), Some(group), Some(serial)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };

    let (Ok(area), Ok(group), Ok(serial)) = (area.parse::<u16>(), group.parse::<u8>(), serial.parse::<u16>()) else {
        return false;
    };

    area != 0 && area != 666 && area < 900 && group != 0 && serial != 0
}

/// Every segment must be base64url; the header segment must decode to a JSON
/// object carrying an `alg` field.
pub(crate) fn is_jwt(candidate: &str) -> bool {
    let segments: Vec<&str> = candidate.split('.').collect();

    if segments.len() != 3 {
        return false;
    }

    if !segments.iter().all(|s| URL_SAFE_NO_PAD.decode(s).is_ok()) {
        return false;
    }

    let Ok(header) = URL_SAFE_NO_PAD.decode(segments[0]) else {
        return false;
    };

    match serde_json::from_slice::<serde_json::Value>(&header) {
        Ok(value) => value.as_object().is_some_and(|obj| obj.contains_key("alg")),
        Err(_) => false,
    }
}

/// A SAS candidate needs the signature plus at least one lifetime parameter.
pub(crate) fn is_sas_token(candidate: &str) -> bool {
    candidate.contains("sig=") && (candidate.contains("se=") || candidate.contains("sv=") || candidate.contains("st="))
}

fn parse_ipv4(candidate: &str) -> Option<[u8; 4]> {
    let mut octets = [0u8; 4];
    let mut parts = candidate.split('.');

    for octet in &mut octets {
        *octet = parts.next()?.parse().ok()?;
    }

    parts.next().is_none().then_some(octets)
}

fn is_private(octets: [u8; 4]) -> bool {
    matches!(
        octets,
        [10, ..] | [127, ..] | [192, 168, ..] | [172, 16..=31, ..]
    )
}

pub(crate) fn is_private_ipv4(candidate: &str) -> bool {
    parse_ipv4(candidate).is_some_and(is_private)
}

pub(crate) fn is_public_ipv4(candidate: &str) -> bool {
    parse_ipv4(candidate).is_some_and(|octets| !is_private(octets))
}
