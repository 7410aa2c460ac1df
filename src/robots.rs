//! robots.txt mining for `Sitemap:` directives.
//!
//! robots.txt is not honored as a crawling constraint; it is only a source
//! of sitemap locations.

use url::Url;

use crate::network::HttpClient;
use crate::url_utils;

/// Fetch robots.txt for the host of `base_url` and return every declared
/// sitemap URL, with relative references resolved against the base.
/// Fetch failures yield an empty list.
pub async fn sitemaps_from_robots(http: &HttpClient, base_url: &str) -> Vec<String> {
    let Some(robots_url) = url_utils::robots_url(base_url) else {
        return Vec::new();
    };

    let content = match http.fetch_text(&robots_url).await {
        Ok(result) => result.content,
        Err(err) => {
            tracing::debug!(url = %robots_url, error = %err, "robots.txt fetch failed");
            return Vec::new();
        }
    };

    extract_sitemap_directives(&content, base_url)
}

/// Parse `Sitemap:` lines (case-insensitive, leading whitespace tolerated).
pub fn extract_sitemap_directives(robots_txt: &str, base_url: &str) -> Vec<String> {
    let base = Url::parse(base_url).ok();
    let mut sitemaps = Vec::new();

    for line in robots_txt.lines() {
        let line = line.trim();
        let lower = line.to_lowercase();
        let Some(rest) = lower.strip_prefix("sitemap:") else {
            continue;
        };
        // Take the value from the original line to preserve case.
        let value = line[line.len() - rest.len()..].trim();
        if value.is_empty() {
            continue;
        }

        if value.starts_with("http://") || value.starts_with("https://") {
            sitemaps.push(value.to_string());
        } else if let Some(base) = &base {
            if let Ok(resolved) = base.join(value) {
                sitemaps.push(resolved.to_string());
            }
        }
    }

    sitemaps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_directives_case_and_whitespace() {
        let robots = "User-agent: *\nDisallow: /private\n  SITEMAP: https://example.com/sitemap.xml\nsitemap:https://example.com/other.xml\n";
        let found = extract_sitemap_directives(robots, "https://example.com/");
        assert_eq!(
            found,
            vec![
                "https://example.com/sitemap.xml".to_string(),
                "https://example.com/other.xml".to_string(),
            ]
        );
    }

    #[test]
    fn test_relative_directive_resolved() {
        let robots = "Sitemap: /sitemap.xml";
        let found = extract_sitemap_directives(robots, "https://example.com/page");
        assert_eq!(found, vec!["https://example.com/sitemap.xml".to_string()]);
    }

    #[test]
    fn test_empty_and_missing_directives() {
        assert!(extract_sitemap_directives("User-agent: *\n", "https://example.com").is_empty());
        assert!(extract_sitemap_directives("Sitemap:  \n", "https://example.com").is_empty());
    }
}
