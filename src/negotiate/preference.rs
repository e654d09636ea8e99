//! Weighted header lists: `Accept`, `Accept-Language`, `Accept-Encoding`.

use std::cmp::Ordering;

use tracing::trace;

/// One element of a weighted list, e.g. `text/html;level=1;q=0.8`.
#[derive(Debug, Clone, PartialEq)]
pub struct Preference {
    name: String,
    params: Vec<(String, String)>,
    weight: f32,
}

impl Preference {
    /// Lowercased value, without parameters.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    /// Weight zero is an explicit refusal.
    pub fn is_refused(&self) -> bool {
        self.weight == 0.0
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn parse(element: &str) -> Option<Self> {
        let mut parts = element.split(';');
        let name = parts.next()?.trim();
        if name.is_empty() {
            return None;
        }

        let mut weight = 1.0;
        let mut params = Vec::new();
        for part in parts {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim().trim_matches('"');
            if key == "q" {
                weight = parse_weight(value)?;
            } else {
                params.push((key, value.to_string()));
            }
        }

        Some(Self {
            name: name.to_ascii_lowercase(),
            params,
            weight,
        })
    }
}

fn parse_weight(value: &str) -> Option<f32> {
    value
        .parse::<f32>()
        .ok()
        .filter(|weight| (0.0..=1.0).contains(weight))
}

/// Parse a comma-separated weighted list, heaviest first.
///
/// Elements with a malformed `q` are dropped on their own. Elements of equal
/// weight keep their header order.
pub fn parse_preferences(header: &str) -> Vec<Preference> {
    let mut preferences: Vec<Preference> = header
        .split(',')
        .map(str::trim)
        .filter(|element| !element.is_empty())
        .filter_map(|element| {
            let parsed = Preference::parse(element);
            if parsed.is_none() {
                trace!(element, "dropping malformed preference");
            }
            parsed
        })
        .collect();
    preferences.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(Ordering::Equal));
    preferences
}
