use thiserror::Error;
use tracing::trace;

use crate::cache::EncodingType;

use super::preference::parse_preferences;

/// The client refused every coding we could send, identity included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no acceptable content coding")]
pub struct NotAcceptable;

/// Choose the response coding for an `Accept-Encoding` header.
///
/// Scans preferences heaviest first and takes the first one that names a
/// coding in `supported`; `*` stands for the first supported coding the
/// header does not mention. Without a match the body goes out as identity,
/// unless identity was refused by `identity;q=0` or `*;q=0`.
pub fn negotiate_encoding(
    accept_encoding: Option<&str>,
    supported: &[EncodingType],
) -> Result<EncodingType, NotAcceptable> {
    let Some(header) = accept_encoding.filter(|header| !header.trim().is_empty()) else {
        return Ok(EncodingType::Identity);
    };
    let preferences = parse_preferences(header);
    let listed: Vec<EncodingType> = preferences
        .iter()
        .filter(|preference| preference.name() != "*")
        .map(|preference| EncodingType::from_token(preference.name()))
        .collect();

    for preference in preferences.iter().filter(|preference| !preference.is_refused()) {
        let chosen = if preference.name() == "*" {
            supported
                .iter()
                .copied()
                .find(|coding| coding.is_real() && !listed.contains(coding))
        } else {
            let coding = EncodingType::from_token(preference.name());
            let usable = coding == EncodingType::Identity
                || (coding.is_real() && supported.contains(&coding));
            usable.then_some(coding)
        };
        if let Some(coding) = chosen {
            trace!(coding = %coding, "negotiated content coding");
            return Ok(coding);
        }
    }

    let identity_allowed = preferences
        .iter()
        .any(|preference| preference.name() == "identity" && !preference.is_refused());
    let identity_refused = preferences.iter().any(|preference| {
        preference.is_refused() && (preference.name() == "identity" || preference.name() == "*")
    });
    if identity_refused && !identity_allowed {
        return Err(NotAcceptable);
    }
    Ok(EncodingType::Identity)
}
