//! Input cleanup and validation, applied before any network call.

use super::types::{FailureReason, GeocodeRequest, RawPinCode};

/// Addresses shorter than this are rejected as likely mis-entered pin codes.
pub const MIN_ADDRESS_CHARS: usize = 5;

/// Cell values that spreadsheet exports use for an empty cell.
const NULL_MARKERS: &[&str] = &["nan", "none", "null"];

/// A request that passed validation. At least one of `address`/`pin_code`
/// is non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRequest {
    pub address: String,
    pub pin_code: String,
    pub state: Option<String>,
}

pub fn normalize(request: &GeocodeRequest) -> Result<NormalizedRequest, FailureReason> {
    let address = clean_address(&request.raw_address);
    let pin_code = clean_pin_code(&request.raw_pin_code);
    let state = request
        .state
        .as_deref()
        .map(clean_text)
        .filter(|s| !s.is_empty());

    if address.is_empty() && pin_code.is_empty() {
        return Err(FailureReason::MissingInput);
    }

    if address.chars().count() < MIN_ADDRESS_CHARS || !address.chars().any(char::is_alphabetic) {
        return Err(FailureReason::TooShortOrInvalid);
    }

    Ok(NormalizedRequest {
        address,
        pin_code,
        state,
    })
}

/// Commas become spaces so the comma-separated query templates stay well
/// formed.
pub fn clean_address(raw: &str) -> String {
    clean_text(&raw.replace(',', " "))
}

/// Trim, collapse whitespace runs, and blank out null markers.
pub fn clean_text(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if NULL_MARKERS.iter().any(|m| collapsed.eq_ignore_ascii_case(m)) {
        String::new()
    } else {
        collapsed
    }
}

pub fn clean_pin_code(raw: &RawPinCode) -> String {
    match raw {
        RawPinCode::Missing => String::new(),
        RawPinCode::Number(n) if !n.is_finite() => String::new(),
        RawPinCode::Number(n) if n.fract() == 0.0 => format!("{:.0}", n),
        RawPinCode::Number(n) => n.to_string(),
        RawPinCode::Text(s) => strip_fraction(&clean_text(s)).to_string(),
    }
}

/// "110001.0" → "110001". Only applies when both sides are digits and the
/// fraction is all zeros.
fn strip_fraction(pin: &str) -> &str {
    match pin.split_once('.') {
        Some((int, frac))
            if !int.is_empty()
                && int.chars().all(|c| c.is_ascii_digit())
                && !frac.is_empty()
                && frac.chars().all(|c| c == '0') =>
        {
            int
        }
        _ => pin,
    }
}
