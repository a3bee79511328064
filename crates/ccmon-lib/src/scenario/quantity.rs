//! Kubernetes resource quantity validation

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use regex::Regex;
use std::sync::OnceLock;

static QUANTITY_RE: OnceLock<Regex> = OnceLock::new();

fn quantity_re() -> &'static Regex {
    QUANTITY_RE.get_or_init(|| {
        Regex::new(r"^\+?([0-9]+(\.[0-9]*)?|\.[0-9]+)([KMGTPE]i|[numkMGTPE]|[eE][+-]?[0-9]+)?$")
            .expect("quantity pattern is valid")
    })
}

/// Parse a resource quantity such as `100m`, `1`, `512Mi` or `1e3`
///
/// Returns `None` when the text is not a valid non-negative quantity.
pub fn parse_quantity(text: &str) -> Option<Quantity> {
    let trimmed = text.trim();
    if quantity_re().is_match(trimmed) {
        Some(Quantity(trimmed.to_string()))
    } else {
        None
    }
}
