//! URL helper functions used throughout the crawler

use url::Url;

/// Remove control characters and stray whitespace from a raw href.
pub fn clean_link(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Canonical form: `scheme://host[:port]/path[?query]`, fragment dropped.
pub fn canonicalize(url: &Url) -> String {
    let mut canonical = format!(
        "{}://{}",
        url.scheme(),
        url.host_str().unwrap_or_default()
    );
    // `port()` is None for scheme defaults, so those never appear.
    if let Some(port) = url.port() {
        canonical.push(':');
        canonical.push_str(&port.to_string());
    }
    canonical.push_str(url.path());
    if let Some(query) = url.query() {
        canonical.push('?');
        canonical.push_str(query);
    }
    canonical
}

/// The seed host plus its `www.` sibling.
pub fn allowed_hosts(seed_host: &str) -> Vec<String> {
    let mut hosts = vec![seed_host.to_string()];
    if let Some(stripped) = seed_host.strip_prefix("www.") {
        hosts.push(stripped.to_string());
    } else {
        hosts.push(format!("www.{}", seed_host));
    }
    hosts
}

pub fn host_allowed(host: &str, allowed: &[String]) -> bool {
    allowed.iter().any(|h| h == host)
}

/// Build the robots.txt URL for the given base URL.
pub fn robots_url(base_url: &str) -> Option<String> {
    let parsed = Url::parse(base_url).ok()?;
    parsed.host_str()?;
    Some(format!(
        "{}/robots.txt",
        parsed.origin().ascii_serialization()
    ))
}

const SKIP_EXTENSIONS: &[&str] = &[
    ".css", ".js", ".jpg", ".jpeg", ".png", ".gif", ".svg", ".ico", ".pdf", ".zip", ".tar",
    ".gz", ".mp4", ".mp3", ".avi", ".mov", ".wmv", ".flv", ".swf", ".doc", ".docx", ".xls",
    ".xlsx", ".ppt", ".pptx",
];

const SKIP_PATTERNS: &[&str] = &[
    "/admin", "/login", "/logout", "/register", "/signin", "/signup", "/auth", "/api/",
    "/assets/", "/static/", "/images/", "/img/", "/css/", "/js/", "/fonts/", "mailto:",
    "tel:", "javascript:", "#",
];

/// Filter out non-content links: static assets, auth pages, and
/// non-navigable schemes.
pub fn should_skip_link(link: &str) -> bool {
    let link = link.to_lowercase();

    if SKIP_EXTENSIONS.iter().any(|ext| link.ends_with(ext)) {
        return true;
    }

    SKIP_PATTERNS.iter().any(|pattern| link.contains(pattern))
}

/// Require an absolute http(s) URL.
pub fn is_absolute_http(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some()
        }
        Err(_) => false,
    }
}
