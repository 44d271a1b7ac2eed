//! Query candidate builder: most specific query first, pin-code-only last.

use super::normalize::NormalizedRequest;

pub const DEFAULT_COUNTRY: &str = "India";

pub fn build_candidates(request: &NormalizedRequest, country: &str) -> Vec<String> {
    let address = request.address.as_str();
    let pin = request.pin_code.as_str();
    let state = request.state.as_deref().unwrap_or("");

    let templates: [(bool, String); 5] = [
        (
            has(address) && has(pin) && has(state),
            format!("{address}, {pin}, {state}, {country}"),
        ),
        (has(address) && has(state), format!("{address}, {state}, {country}")),
        (has(address) && has(pin), format!("{address}, {pin}, {country}")),
        (has(address), format!("{address}, {country}")),
        (has(pin), format!("{pin}, {country}")),
    ];

    let mut candidates: Vec<String> = Vec::with_capacity(templates.len());
    for (applies, query) in templates {
        if applies && !candidates.contains(&query) {
            candidates.push(query);
        }
    }
    candidates
}

fn has(field: &str) -> bool {
    !field.is_empty()
}
