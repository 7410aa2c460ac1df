//! Sitemap discovery and parsing.
//!
//! Discovery probes conventional sitemap paths and robots.txt directives.
//! Parsing handles plain url-sets, recursive sitemap indexes, and gzipped
//! payloads. Duplicates across sub-sitemaps are permitted here; dedup
//! happens downstream in the orchestrator.

use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Arc;

use sitemap::reader::{SiteMapEntity, SiteMapReader};
use tokio::io::AsyncReadExt;
use url::Url;

use crate::bus::JobEmitter;
use crate::models::Tier;
use crate::network::{FetchError, HttpClient};
use crate::robots;

const CONVENTIONAL_PATHS: &[&str] = &[
    "/sitemap.xml",
    "/sitemap_index.xml",
    "/sitemaps.xml",
    "/sitemap/sitemap.xml",
];

#[derive(Debug, thiserror::Error)]
pub enum SitemapError {
    #[error("sitemap fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("gzip decompression failed: {0}")]
    Gzip(String),

    #[error("failed to parse sitemap XML: {0}")]
    Parse(String),
}

pub struct SitemapResolver {
    http: Arc<HttpClient>,
}

impl SitemapResolver {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }

    /// Discover sitemap locations for a reachable base URL: conventional
    /// paths validated by HEAD, plus robots.txt `Sitemap:` directives.
    pub async fn discover(&self, base_url: &str, emitter: &JobEmitter) -> Vec<String> {
        self.discover_with_fallback(base_url, &[], emitter).await
    }

    /// Discovery with a pre-supplied robots-derived list. When the list is
    /// non-empty the base host is assumed unreachable, so the entries are
    /// used directly without existence checks.
    pub async fn discover_with_fallback(
        &self,
        base_url: &str,
        robots_sitemaps: &[String],
        emitter: &JobEmitter,
    ) -> Vec<String> {
        let Ok(parsed) = Url::parse(base_url) else {
            return Vec::new();
        };
        let origin = parsed.origin().ascii_serialization();

        let mut sitemap_urls = Vec::new();

        if !robots_sitemaps.is_empty() {
            emitter
                .progress_tier("Using sitemaps from robots.txt fallback...", Tier::Sitemap)
                .await;
            for sitemap_url in robots_sitemaps {
                sitemap_urls.push(sitemap_url.clone());
                emitter
                    .sitemap_discovered(
                        sitemap_url.clone(),
                        format!("Using sitemap from robots.txt: {}", sitemap_url),
                    )
                    .await;
            }
            return sitemap_urls;
        }

        emitter
            .progress_tier("Discovering sitemaps...", Tier::Sitemap)
            .await;

        for path in CONVENTIONAL_PATHS {
            let candidate = format!("{}{}", origin, path);
            if self.http.head_ok(&candidate).await {
                emitter
                    .sitemap_discovered(candidate.clone(), format!("Found sitemap: {}", candidate))
                    .await;
                sitemap_urls.push(candidate);
            }
        }

        for sitemap_url in robots::sitemaps_from_robots(&self.http, base_url).await {
            if self.http.head_ok(&sitemap_url).await {
                emitter
                    .sitemap_discovered(
                        sitemap_url.clone(),
                        format!("Found sitemap in robots.txt: {}", sitemap_url),
                    )
                    .await;
                sitemap_urls.push(sitemap_url);
            }
        }

        sitemap_urls
    }

    /// Parse one sitemap into page URLs, recursing through sitemap indexes.
    /// Sub-sitemap failures are logged and skipped; a malformed top-level
    /// document is an error.
    pub async fn parse(
        &self,
        sitemap_url: &str,
        emitter: &JobEmitter,
    ) -> Result<Vec<String>, SitemapError> {
        let mut visited = HashSet::new();
        self.parse_recursive(sitemap_url, emitter, &mut visited).await
    }

    fn parse_recursive<'a>(
        &'a self,
        sitemap_url: &'a str,
        emitter: &'a JobEmitter,
        visited: &'a mut HashSet<String>,
    ) -> futures_util::future::BoxFuture<'a, Result<Vec<String>, SitemapError>> {
        Box::pin(async move {
            if !visited.insert(sitemap_url.to_string()) {
                return Ok(Vec::new());
            }

            emitter
                .progress_tier(format!("Parsing sitemap: {}", sitemap_url), Tier::Sitemap)
                .await;

            let xml = self.fetch_xml(sitemap_url).await?;
            let (page_urls, child_sitemaps) = decode_entities(&xml)?;

            let mut urls = page_urls;

            if !child_sitemaps.is_empty() {
                emitter
                    .progress_tier(
                        format!("Found sitemap index with {} sitemaps", child_sitemaps.len()),
                        Tier::Sitemap,
                    )
                    .await;

                for child in child_sitemaps {
                    match self.parse_recursive(&child, emitter, visited).await {
                        Ok(child_urls) => urls.extend(child_urls),
                        Err(err) => {
                            tracing::warn!(sitemap = %child, error = %err, "failed to parse sub-sitemap");
                        }
                    }
                }
            } else {
                emitter
                    .emit(
                        crate::models::CrawlEvent::new(
                            crate::models::EventKind::Progress,
                            emitter.job_id(),
                        )
                        .with_progress(format!("Extracted {} URLs from sitemap", urls.len()))
                        .with_tier(Tier::Sitemap)
                        .with_total(urls.len()),
                    )
                    .await;
            }

            Ok(urls)
        })
    }

    /// Fetch a sitemap payload, transparently decompressing gzip (declared
    /// via Content-Encoding or detected from the magic bytes).
    async fn fetch_xml(&self, sitemap_url: &str) -> Result<Vec<u8>, SitemapError> {
        let result = self.http.fetch_bytes(sitemap_url).await?;

        let declared_gzip = result
            .content_encoding
            .as_deref()
            .is_some_and(|enc| enc.eq_ignore_ascii_case("gzip"));
        let magic_gzip = result.content.starts_with(&[0x1f, 0x8b]);

        if declared_gzip || magic_gzip {
            let mut decoder =
                async_compression::tokio::bufread::GzipDecoder::new(&result.content[..]);
            let mut decompressed = Vec::new();
            decoder
                .read_to_end(&mut decompressed)
                .await
                .map_err(|e| SitemapError::Gzip(e.to_string()))?;
            Ok(decompressed)
        } else {
            Ok(result.content)
        }
    }
}

/// Decode a sitemap document into (page URLs, child sitemap URLs).
/// Empty `<loc>` entries are skipped. A document yielding nothing at all
/// is treated as malformed.
fn decode_entities(xml: &[u8]) -> Result<(Vec<String>, Vec<String>), SitemapError> {
    let mut page_urls = Vec::new();
    let mut child_sitemaps = Vec::new();
    let mut parse_errors = Vec::new();

    for entity in SiteMapReader::new(Cursor::new(xml)) {
        match entity {
            SiteMapEntity::Url(entry) => {
                if let Some(loc) = entry.loc.get_url() {
                    page_urls.push(loc.to_string());
                }
            }
            SiteMapEntity::SiteMap(entry) => {
                if let Some(loc) = entry.loc.get_url() {
                    child_sitemaps.push(loc.to_string());
                }
            }
            SiteMapEntity::Err(err) => parse_errors.push(err.to_string()),
        }
    }

    if page_urls.is_empty() && child_sitemaps.is_empty() {
        let reason = parse_errors
            .first()
            .cloned()
            .unwrap_or_else(|| "no url or sitemap entries found".to_string());
        return Err(SitemapError::Parse(reason));
    }

    Ok((page_urls, child_sitemaps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemorySink;
    use crate::fingerprint::FingerprintProvider;
    use crate::models::EventKind;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resolver() -> SitemapResolver {
        let http = Arc::new(HttpClient::new(FingerprintProvider::new(None), 5).unwrap());
        SitemapResolver::new(http)
    }

    fn emitter() -> (Arc<MemorySink>, JobEmitter) {
        let sink = Arc::new(MemorySink::new());
        let emitter = JobEmitter::new(sink.clone(), "test-job");
        (sink, emitter)
    }

    fn urlset(urls: &[&str]) -> String {
        let entries: String = urls
            .iter()
            .map(|u| format!("<url><loc>{}</loc></url>", u))
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{}</urlset>"#,
            entries
        )
    }

    #[test]
    fn test_decode_urlset_skips_empty_loc() {
        let xml = r#"<?xml version="1.0"?><urlset><url><loc>https://example.com/a</loc></url><url><loc></loc></url></urlset>"#;
        let (urls, children) = decode_entities(xml.as_bytes()).unwrap();
        assert_eq!(urls, vec!["https://example.com/a".to_string()]);
        assert!(children.is_empty());
    }

    #[test]
    fn test_decode_index() {
        let xml = r#"<?xml version="1.0"?><sitemapindex><sitemap><loc>https://example.com/a.xml</loc></sitemap><sitemap><loc>https://example.com/b.xml</loc></sitemap></sitemapindex>"#;
        let (urls, children) = decode_entities(xml.as_bytes()).unwrap();
        assert!(urls.is_empty());
        assert_eq!(children.len(), 2);
    }

    #[test]
    fn test_decode_malformed_fails() {
        assert!(decode_entities(b"this is not xml at all").is_err());
        assert!(decode_entities(b"<html><body>404</body></html>").is_err());
    }

    #[tokio::test]
    async fn test_discover_probes_conventional_paths() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/sitemap.xml"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        // Other probes and robots.txt 404.
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (sink, emitter) = emitter();
        let found = resolver().discover(&server.uri(), &emitter).await;
        assert_eq!(found, vec![format!("{}/sitemap.xml", server.uri())]);
        assert_eq!(sink.events_of_kind(EventKind::SitemapDiscovered).len(), 1);
    }

    #[tokio::test]
    async fn test_discover_fallback_skips_existence_checks() {
        let (sink, emitter) = emitter();
        let provided = vec!["https://blocked.example/sitemap.xml".to_string()];
        let found = resolver()
            .discover_with_fallback("https://blocked.example", &provided, &emitter)
            .await;
        assert_eq!(found, provided);
        assert_eq!(sink.events_of_kind(EventKind::SitemapDiscovered).len(), 1);
    }

    #[tokio::test]
    async fn test_parse_recurses_through_index() {
        let server = MockServer::start().await;
        let index = format!(
            r#"<?xml version="1.0"?><sitemapindex><sitemap><loc>{0}/a.xml</loc></sitemap><sitemap><loc>{0}/b.xml</loc></sitemap></sitemapindex>"#,
            server.uri()
        );
        Mock::given(method("GET"))
            .and(path("/index.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(index))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/a.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(urlset(&[
                "https://example.com/1",
                "https://example.com/2",
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b.xml"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(urlset(&["https://example.com/3"])),
            )
            .mount(&server)
            .await;

        let (_, emitter) = emitter();
        let urls = resolver()
            .parse(&format!("{}/index.xml", server.uri()), &emitter)
            .await
            .unwrap();
        assert_eq!(urls.len(), 3);
    }

    #[tokio::test]
    async fn test_parse_survives_sub_sitemap_failure() {
        let server = MockServer::start().await;
        let index = format!(
            r#"<?xml version="1.0"?><sitemapindex><sitemap><loc>{0}/good.xml</loc></sitemap><sitemap><loc>{0}/missing.xml</loc></sitemap></sitemapindex>"#,
            server.uri()
        );
        Mock::given(method("GET"))
            .and(path("/index.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(index))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/good.xml"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(urlset(&["https://example.com/only"])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing.xml"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (_, emitter) = emitter();
        let urls = resolver()
            .parse(&format!("{}/index.xml", server.uri()), &emitter)
            .await
            .unwrap();
        assert_eq!(urls, vec!["https://example.com/only".to_string()]);
    }

    #[tokio::test]
    async fn test_parse_handles_gzip_payload() {
        use async_compression::tokio::write::GzipEncoder;
        use tokio::io::AsyncWriteExt;

        let body = urlset(&["https://example.com/gz-1", "https://example.com/gz-2"]);
        let mut encoder = GzipEncoder::new(Vec::new());
        encoder.write_all(body.as_bytes()).await.unwrap();
        encoder.shutdown().await.unwrap();
        let compressed = encoder.into_inner();

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sitemap.xml.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(compressed))
            .mount(&server)
            .await;

        let (_, emitter) = emitter();
        let urls = resolver()
            .parse(&format!("{}/sitemap.xml.gz", server.uri()), &emitter)
            .await
            .unwrap();
        assert_eq!(urls.len(), 2);
    }

    #[tokio::test]
    async fn test_parse_handles_unicode_locations() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sitemap.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(urlset(&[
                "https://example.com/caf%C3%A9",
                "https://example.com/%E6%97%A5%E6%9C%AC",
            ])))
            .mount(&server)
            .await;

        let (_, emitter) = emitter();
        let urls = resolver()
            .parse(&format!("{}/sitemap.xml", server.uri()), &emitter)
            .await
            .unwrap();
        assert_eq!(urls.len(), 2);
    }
}
