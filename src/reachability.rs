//! URL reachability probing with www/scheme fallback permutations.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::config::Config;
use crate::network::{FetchError, HttpClient};

/// Record of a probe: which URL was asked for, which variant answered, and
/// the last error when none did.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub original_url: String,
    pub fallback_url: String,
    pub success: bool,
    pub error: Option<String>,
}

pub struct ReachabilityProber {
    http: Arc<HttpClient>,
}

impl ReachabilityProber {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }

    /// Find a reachable variant of `original`: the URL itself, then the
    /// www/non-www sibling, then https upgrades of both when the scheme is
    /// http. First reachable wins; total failure returns the original URL
    /// with `success = false` and the first error observed.
    pub async fn find(&self, original: &str) -> (String, ProbeOutcome) {
        let mut outcome = ProbeOutcome {
            original_url: original.to_string(),
            fallback_url: original.to_string(),
            success: false,
            error: None,
        };

        match self.check(original).await {
            Ok(reached) => {
                outcome.success = true;
                outcome.fallback_url = reached.clone();
                return (reached, outcome);
            }
            Err(err) => outcome.error = Some(err),
        }

        for candidate in fallback_candidates(original) {
            if let Ok(reached) = self.check(&candidate).await {
                outcome.fallback_url = reached.clone();
                outcome.success = true;
                return (reached, outcome);
            }
        }

        (original.to_string(), outcome)
    }

    /// One reachability check: GET with browser headers after a short
    /// human-like delay, following up to 5 redirects. 2xx/3xx passes, and
    /// the redirect-final URL is the one reported reachable.
    async fn check(&self, url: &str) -> Result<String, String> {
        if Url::parse(url).is_err() {
            return Err(format!("invalid URL: {}", url));
        }

        let pause = rand::thread_rng().gen_range(0..=1000);
        tokio::time::sleep(Duration::from_millis(pause)).await;

        let response = self
            .http
            .get_following_redirects(url, Config::MAX_REDIRECTS)
            .await
            .map_err(|e| match e {
                FetchError::TooManyRedirects => "too many redirects".to_string(),
                other => other.to_string(),
            })?;

        let status = response.status();
        if status.is_success() || status.is_redirection() {
            return Ok(response.url().to_string());
        }

        if status.as_u16() == 403 {
            return Err("HTTP 403: Forbidden (may need different approach)".to_string());
        }

        Err(format!("HTTP {}", status.as_u16()))
    }
}

/// Alternative URLs to try when the original fails: www toggle, then https
/// upgrades (with both host variants) when the original scheme is http.
pub fn fallback_candidates(original: &str) -> Vec<String> {
    let Ok(parsed) = Url::parse(original) else {
        return Vec::new();
    };
    let Some(host) = parsed.host_str().map(|h| h.to_string()) else {
        return Vec::new();
    };

    let toggled_host = match host.strip_prefix("www.") {
        Some(stripped) => stripped.to_string(),
        None => format!("www.{}", host),
    };

    let mut candidates = Vec::new();

    let mut toggled = parsed.clone();
    if toggled.set_host(Some(&toggled_host)).is_ok() {
        candidates.push(toggled.to_string());
    }

    if parsed.scheme() == "http" {
        let mut https = parsed.clone();
        if https.set_scheme("https").is_ok() {
            candidates.push(https.to_string());

            let mut https_toggled = https.clone();
            if https_toggled.set_host(Some(&toggled_host)).is_ok() {
                candidates.push(https_toggled.to_string());
            }
        }
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::FingerprintProvider;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn prober() -> ReachabilityProber {
        let http = Arc::new(HttpClient::new(FingerprintProvider::new(None), 5).unwrap());
        ReachabilityProber::new(http)
    }

    #[test]
    fn test_fallback_candidates_without_www() {
        let candidates = fallback_candidates("http://example.com/page");
        assert_eq!(
            candidates,
            vec![
                "http://www.example.com/page".to_string(),
                "https://example.com/page".to_string(),
                "https://www.example.com/page".to_string(),
            ]
        );
    }

    #[test]
    fn test_fallback_candidates_with_www_https() {
        let candidates = fallback_candidates("https://www.example.com/");
        assert_eq!(candidates, vec!["https://example.com/".to_string()]);
    }

    #[tokio::test]
    async fn test_reachable_original_wins() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let url = format!("{}/", server.uri());
        let (chosen, outcome) = prober().find(&url).await;
        assert_eq!(chosen, url);
        assert!(outcome.success);
        assert_eq!(outcome.fallback_url, url);
    }

    #[tokio::test]
    async fn test_forbidden_reports_specific_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        // The mock host has no www sibling, so every fallback fails too.
        let (chosen, outcome) = prober().find(&format!("{}/", server.uri())).await;
        assert_eq!(chosen, format!("{}/", server.uri()));
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("403"));
    }

    #[tokio::test]
    async fn test_redirect_resolves_to_final_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let (chosen, outcome) = prober().find(&format!("{}/old", server.uri())).await;
        assert_eq!(chosen, format!("{}/new", server.uri()));
        assert!(outcome.success);
        assert_eq!(outcome.fallback_url, chosen);
        assert_eq!(outcome.original_url, format!("{}/old", server.uri()));
    }

    #[tokio::test]
    async fn test_find_is_idempotent_on_reachable_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let prober = prober();
        let url = format!("{}/", server.uri());
        let (first, _) = prober.find(&url).await;
        let (second, outcome) = prober.find(&first).await;
        assert_eq!(first, second);
        assert!(outcome.success);
    }
}
