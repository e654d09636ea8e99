//! Content-type and language selection among registered representations.

use tracing::trace;

use super::preference::{Preference, parse_preferences};

/// One negotiable variant of a resource.
#[derive(Debug, Clone)]
pub struct RepresentationEntry<H> {
    content_type: String,
    charset: String,
    language: String,
    handler: H,
}

impl<H> RepresentationEntry<H> {
    /// Media type without parameters, lowercased; empty for the default entry.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    fn type_and_subtype(&self) -> Option<(&str, &str)> {
        self.content_type.split_once('/')
    }
}

/// Registered variants of one resource, in server preference order.
#[derive(Debug, Clone)]
pub struct ResourceRepresentations<H> {
    entries: Vec<RepresentationEntry<H>>,
}

impl<H> Default for ResourceRepresentations<H> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<H> ResourceRepresentations<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[RepresentationEntry<H>] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pick the entry best matching `Accept` and `Accept-Language`.
    ///
    /// A missing `Accept` behaves like `*/*`. Preferences with weight zero
    /// never match, and an entry whose most specific matching `Accept`
    /// preference has weight zero is never returned, not even as a fallback.
    pub fn negotiate(
        &self,
        accept: Option<&str>,
        accept_language: Option<&str>,
    ) -> Option<&RepresentationEntry<H>> {
        let accept = match accept.map(str::trim) {
            Some(header) if !header.is_empty() => parse_preferences(header),
            _ => parse_preferences("*/*"),
        };
        let languages: Vec<Preference> = accept_language
            .map(parse_preferences)
            .unwrap_or_default()
            .into_iter()
            .filter(|preference| !preference.is_refused())
            .collect();

        let candidates: Vec<&RepresentationEntry<H>> = self
            .entries
            .iter()
            .filter(|entry| !is_refused(&accept, entry))
            .collect();
        let wanted: Vec<&Preference> = accept
            .iter()
            .filter(|preference| !preference.is_refused())
            .collect();

        if !languages.is_empty() {
            for exact in [true, false] {
                for media in &wanted {
                    for language in &languages {
                        let found = candidates.iter().copied().find(|entry| {
                            media_matches(media.name(), entry)
                                && language_matches(language.name(), &entry.language, exact)
                        });
                        if let Some(entry) = found {
                            trace!(
                                content_type = entry.content_type(),
                                language = entry.language(),
                                exact,
                                "negotiated by type and language"
                            );
                            return Some(entry);
                        }
                    }
                }
            }
        }

        for media in &wanted {
            if let Some(entry) = candidates
                .iter()
                .copied()
                .find(|entry| media_matches(media.name(), entry))
            {
                trace!(content_type = entry.content_type(), "negotiated by type");
                return Some(entry);
            }
        }

        candidates
            .iter()
            .copied()
            .find(|entry| entry.content_type.is_empty())
            .or_else(|| candidates.first().copied())
    }
}

impl<H: Clone> ResourceRepresentations<H> {
    /// Register `handler` under every (content type, language) pair.
    ///
    /// Content types may carry a `charset` parameter. An empty list registers
    /// the empty string, which acts as the default for that dimension.
    pub fn register(&mut self, content_types: &[&str], languages: &[&str], handler: H) {
        let content_types = if content_types.is_empty() { &[""][..] } else { content_types };
        let languages = if languages.is_empty() { &[""][..] } else { languages };

        for content_type in content_types {
            let (media, charset) = split_media_type(content_type);
            for language in languages {
                self.entries.push(RepresentationEntry {
                    content_type: media.clone(),
                    charset: charset.clone(),
                    language: language.trim().to_string(),
                    handler: handler.clone(),
                });
            }
        }
    }

    pub fn with(mut self, content_types: &[&str], languages: &[&str], handler: H) -> Self {
        self.register(content_types, languages, handler);
        self
    }
}

/// `"text/html; charset=UTF-8"` → `("text/html", "utf-8")`.
fn split_media_type(value: &str) -> (String, String) {
    let mut parts = value.split(';');
    let media = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
    let charset = parts
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("charset"))
        .map(|(_, value)| value.trim().trim_matches('"').to_ascii_lowercase())
        .unwrap_or_default();
    (media, charset)
}

fn media_matches<H>(pattern: &str, entry: &RepresentationEntry<H>) -> bool {
    if pattern == "*/*" || pattern == "*" {
        return true;
    }
    let Some((entry_type, entry_subtype)) = entry.type_and_subtype() else {
        return false;
    };
    match pattern.split_once('/') {
        Some((kind, "*")) => kind.eq_ignore_ascii_case(entry_type),
        Some((kind, subtype)) => {
            kind.eq_ignore_ascii_case(entry_type) && subtype.eq_ignore_ascii_case(entry_subtype)
        }
        None => false,
    }
}

/// 0 for `*/*`, 1 for `type/*`, 2 for an exact media type.
fn specificity(pattern: &str) -> u8 {
    match pattern.split_once('/') {
        Some(("*", "*")) | None => 0,
        Some((_, "*")) => 1,
        Some(_) => 2,
    }
}

/// True when the most specific `Accept` element covering `entry` refuses it.
fn is_refused<H>(accept: &[Preference], entry: &RepresentationEntry<H>) -> bool {
    accept
        .iter()
        .filter(|preference| media_matches(preference.name(), entry))
        .max_by_key(|preference| specificity(preference.name()))
        .is_some_and(Preference::is_refused)
}

fn primary_tag(tag: &str) -> &str {
    tag.split('-').next().unwrap_or(tag)
}

fn language_matches(pattern: &str, language: &str, exact: bool) -> bool {
    if pattern == "*" {
        return true;
    }
    if exact {
        return pattern.eq_ignore_ascii_case(language);
    }
    !language.is_empty() && primary_tag(pattern).eq_ignore_ascii_case(primary_tag(language))
}
