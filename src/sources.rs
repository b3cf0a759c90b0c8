use regex::Regex;
use std::sync::LazyLock;
use url::Url;

static UUID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")
        .expect("invalid uuid regex")
});

static AICC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://aicharactercards\.com/character-cards/([^/]+)/([^/]+)/?$|([^/]+)/([^/]+)$")
        .expect("invalid aicc regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Character,
    Lorebook,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Character => "character",
            ContentKind::Lorebook => "lorebook",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSource {
    Pygmalion { uuid: String },
    Janny { uuid: String },
    Risu { uuid: String },
    Aicc { path: String },
    Chub { path: String, kind: ContentKind },
    Generic { url: String },
}

impl ContentSource {
    pub fn provider(&self) -> &'static str {
        match self {
            ContentSource::Pygmalion { .. } => "pygmalion",
            ContentSource::Janny { .. } => "janny",
            ContentSource::Risu { .. } => "risu",
            ContentSource::Aicc { .. } => "aicc",
            ContentSource::Chub { .. } => "chub",
            ContentSource::Generic { .. } => "generic",
        }
    }

    pub fn kind(&self) -> ContentKind {
        match self {
            ContentSource::Chub { kind, .. } => *kind,
            _ => ContentKind::Character,
        }
    }
}

// Order is the contract: the matchers overlap on pathological inputs, and the
// first non-absent identifier wins. Matchers test the parsed host only;
// identifiers are still extracted from the full input string.
const URL_MATCHERS: &[fn(&str, &str) -> Option<ContentSource>] = &[
    pygmalion_from_url,
    janny_from_url,
    risu_from_url,
    aicc_from_url,
    chub_from_url,
];

pub fn classify_url(url: &str, whitelist: &[String]) -> Option<ContentSource> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    for matcher in URL_MATCHERS {
        if let Some(source) = matcher(&host, url) {
            return Some(source);
        }
    }
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let allowed = whitelist
        .iter()
        .any(|entry| entry.eq_ignore_ascii_case(&host));
    if !allowed {
        return None;
    }
    Some(ContentSource::Generic {
        url: url.to_string(),
    })
}

// Total: every handle maps to some provider, Chub being the catch-all. The
// length-36 check accepts any 36-byte handle and must stay ahead of the
// `AICC/` prefix check.
pub fn classify_handle(handle: &str) -> ContentSource {
    if handle.contains("_character") {
        let uuid = handle.split('_').next().unwrap_or(handle).to_string();
        return ContentSource::Janny { uuid };
    }
    if handle.len() == 36 {
        return ContentSource::Pygmalion {
            uuid: handle.to_string(),
        };
    }
    if let Some(path) = handle.strip_prefix("AICC/") {
        return ContentSource::Aicc {
            path: path.to_string(),
        };
    }
    let kind = if handle.contains("lorebook") {
        ContentKind::Lorebook
    } else {
        ContentKind::Character
    };
    ContentSource::Chub {
        path: handle.to_string(),
        kind,
    }
}

pub fn extract_uuid(input: &str) -> Option<String> {
    UUID_PATTERN
        .find(input)
        .map(|found| found.as_str().to_string())
}

fn pygmalion_from_url(host: &str, url: &str) -> Option<ContentSource> {
    if !host.contains("pygmalion.chat") {
        return None;
    }
    extract_uuid(url).map(|uuid| ContentSource::Pygmalion { uuid })
}

fn janny_from_url(host: &str, url: &str) -> Option<ContentSource> {
    if !host.contains("janitorai") {
        return None;
    }
    extract_uuid(url).map(|uuid| ContentSource::Janny { uuid })
}

fn risu_from_url(host: &str, url: &str) -> Option<ContentSource> {
    if !host.contains("realm.risuai.net") {
        return None;
    }
    extract_uuid(url).map(|uuid| ContentSource::Risu { uuid })
}

fn aicc_from_url(host: &str, url: &str) -> Option<ContentSource> {
    if !host.contains("aicharactercards.com") {
        return None;
    }
    parse_aicc_path(url).map(|path| ContentSource::Aicc { path })
}

pub fn parse_aicc_path(input: &str) -> Option<String> {
    let caps = AICC_PATTERN.captures(input)?;
    let pair = match (caps.get(1), caps.get(2)) {
        (Some(author), Some(card)) => (author, card),
        _ => match (caps.get(3), caps.get(4)) {
            (Some(author), Some(card)) => (author, card),
            _ => return None,
        },
    };
    Some(format!("{}/{}", pair.0.as_str(), pair.1.as_str()))
}

fn chub_from_url(host: &str, url: &str) -> Option<ContentSource> {
    if !host.contains("chub.ai") && !host.contains("characterhub.org") {
        return None;
    }
    parse_chub_path(url)
}

pub fn parse_chub_path(input: &str) -> Option<ContentSource> {
    let segments: Vec<&str> = input.split('/').collect();
    if segments.len() < 2 {
        return None;
    }
    let domain_index = segments.iter().position(|segment| is_chub_domain(segment));
    let tail: &[&str] = match domain_index {
        Some(index) => &segments[index + 1..],
        None => &segments[..],
    };
    let first = tail.first()?.to_ascii_lowercase();
    if first == "characters" || first == "lorebooks" {
        let path = tail[1..].join("/");
        if path.is_empty() {
            return None;
        }
        let kind = if first == "characters" {
            ContentKind::Character
        } else {
            ContentKind::Lorebook
        };
        return Some(ContentSource::Chub { path, kind });
    }
    if segments.len() == 2 {
        let path = tail.join("/");
        if path.is_empty() {
            return None;
        }
        return Some(ContentSource::Chub {
            path,
            kind: ContentKind::Character,
        });
    }
    None
}

fn is_chub_domain(segment: &str) -> bool {
    let segment = segment.to_ascii_lowercase();
    for domain in ["chub.ai", "characterhub.org"] {
        if segment == domain || segment.ends_with(&format!(".{domain}")) {
            return true;
        }
    }
    false
}
