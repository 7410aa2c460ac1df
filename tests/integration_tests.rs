use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use siteminer::bus::{JobEmitter, MemorySink, NullSink};
use siteminer::handlers::{self, AppState};
use siteminer::models::{
    CrawlEvent, CrawlRequest, EventKind, Job, JobStatus,
};
use siteminer::{
    BrowserPool, ContentExtractor, CrawlError, CrawlOrchestrator, FingerprintProvider,
    HttpClient, JobRegistry, WorkerPool,
};

fn http_client() -> Arc<HttpClient> {
    Arc::new(HttpClient::new(FingerprintProvider::new(None), 5).unwrap())
}

fn orchestrator_with_sink(sink: Arc<MemorySink>) -> CrawlOrchestrator {
    CrawlOrchestrator::new(http_client(), Arc::new(BrowserPool::new(1)), sink)
}

fn crawl_request(url: &str) -> CrawlRequest {
    CrawlRequest {
        url: url.to_string(),
        ..Default::default()
    }
}

fn app_state() -> AppState {
    let http = http_client();
    let browsers = Arc::new(BrowserPool::new(1));
    let extractor = Arc::new(ContentExtractor::new(
        Arc::clone(&http),
        Arc::clone(&browsers),
    ));
    let pool = WorkerPool::new(extractor, Arc::clone(&browsers), 5);
    let sink: Arc<siteminer::bus::NullSink> = Arc::new(NullSink);
    AppState {
        registry: JobRegistry::new(None),
        pool,
        orchestrator: Arc::new(CrawlOrchestrator::new(http, browsers, sink.clone())),
        sink,
        bus: None,
        api_key: Arc::new("test-key".to_string()),
    }
}

/// Mock a small site: a sitemap with two pages plus a homepage that links
/// to a third page and an off-host URL.
async fn mock_site() -> MockServer {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("HEAD"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<?xml version="1.0"?><urlset><url><loc>{0}/page-a</loc></url><url><loc>{0}/page-b</loc></url></urlset>"#,
            base
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<html><body><a href="/page-c">c</a><a href="https://offsite.example/x">off</a></body></html>"#,
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>ok</body></html>"))
        .mount(&server)
        .await;

    server
}

#[tokio::test]
async fn orchestrator_merges_tiers_with_dedup_and_host_scope() {
    let server = mock_site().await;
    let base = server.uri();
    let sink = Arc::new(MemorySink::new());
    let orchestrator = orchestrator_with_sink(sink.clone());

    let result = orchestrator
        .execute(&crawl_request(&format!("{}/", base)), "job-merge")
        .await
        .unwrap();

    // Effective target leads the list; sitemap and HTML URLs follow.
    assert_eq!(result.target_url, format!("{}/", base));
    assert_eq!(result.urls[0], format!("{}/", base));
    assert!(result.urls.contains(&format!("{}/page-a", base)));
    assert!(result.urls.contains(&format!("{}/page-b", base)));
    assert!(result.urls.contains(&format!("{}/page-c", base)));

    // No duplicates, nothing off-host.
    let unique: std::collections::HashSet<_> = result.urls.iter().collect();
    assert_eq!(unique.len(), result.urls.len());
    assert!(result.urls.iter().all(|u| u.starts_with(&base)));
    assert_eq!(result.total_urls, result.urls.len());

    // Tier switches were announced for sitemap and html.
    let switches = sink.events_of_kind(EventKind::TierSwitch);
    assert!(switches.len() >= 2);
}

#[tokio::test]
async fn unreachable_seed_without_robots_fails_with_diagnostic() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let sink = Arc::new(MemorySink::new());
    let orchestrator = orchestrator_with_sink(sink.clone());

    let err = orchestrator
        .execute(&crawl_request(&format!("{}/", server.uri())), "job-fail")
        .await
        .unwrap_err();

    assert!(matches!(err, CrawlError::Unreachable(_)));
    assert!(err.to_string().contains("all fallbacks are inaccessible"));

    let errors = sink.events_of_kind(EventKind::Error);
    assert!(!errors.is_empty());
}

#[tokio::test]
async fn unreachable_seed_with_robots_sitemaps_still_crawls() {
    let server = MockServer::start().await;
    let base = server.uri();

    // Everything 403s except robots.txt and the sitemap it declares.
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "User-agent: *\nSitemap: {}/deep/sitemap.xml\n",
            base
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/deep/sitemap.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<?xml version="1.0"?><urlset><url><loc>{0}/hidden-1</loc></url><url><loc>{0}/hidden-2</loc></url></urlset>"#,
            base
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let sink = Arc::new(MemorySink::new());
    let orchestrator = orchestrator_with_sink(sink.clone());

    // HTML tier disabled: the blocked host would only add noise.
    let mut request = crawl_request(&format!("{}/", base));
    request.enable_sitemap = true;

    let result = orchestrator.execute(&request, "job-robots").await.unwrap();
    assert_eq!(result.urls.len(), 2);
    assert!(result.urls.contains(&format!("{}/hidden-1", base)));
}

#[tokio::test]
async fn cap_truncates_and_announces() {
    let server = MockServer::start().await;
    let base = server.uri();

    let entries: String = (0..40)
        .map(|i| format!("<url><loc>{}/p{}</loc></url>", base, i))
        .collect();
    Mock::given(method("HEAD"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<?xml version="1.0"?><urlset>{}</urlset>"#,
            entries
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .mount(&server)
        .await;

    let sink = Arc::new(MemorySink::new());
    let orchestrator = orchestrator_with_sink(sink.clone());

    let mut request = crawl_request(&format!("{}/", base));
    request.max_urls = Some(10);
    request.enable_sitemap = true;

    let result = orchestrator.execute(&request, "job-cap").await.unwrap();
    assert_eq!(result.urls.len(), 10);
    assert_eq!(result.total_urls, 10);

    let truncated = sink
        .events()
        .iter()
        .any(|e| {
            e.kind == EventKind::Progress
                && e.progress
                    .as_deref()
                    .is_some_and(|p| p.contains("truncated to 10"))
        });
    assert!(truncated);
}

#[tokio::test]
async fn terminal_event_is_last_and_after_registry_update() {
    let server = mock_site().await;
    let sink = Arc::new(MemorySink::new());
    let orchestrator = orchestrator_with_sink(sink.clone());
    let registry = JobRegistry::new(None);

    let request = crawl_request(&format!("{}/", server.uri()));
    registry
        .create(Job::new("job-causality", request.clone()))
        .await
        .unwrap();

    // Mirror the executor path: run, update the registry, then publish
    // the terminal event.
    let result = orchestrator.execute(&request, "job-causality").await.unwrap();
    let total = result.urls.len();
    let updated = registry
        .mark_completed("job-causality", result)
        .await
        .unwrap();
    assert_eq!(updated.status, JobStatus::Completed);

    let emitter = JobEmitter::new(sink.clone(), "job-causality");
    emitter
        .emit(
            CrawlEvent::new(EventKind::Completed, "job-causality")
                .with_progress(format!("Crawl completed! Found {} URLs", total))
                .with_total(total),
        )
        .await;

    let events = sink.events();
    let last = events.last().unwrap();
    assert_eq!(last.kind, EventKind::Completed);
    assert!(events
        .iter()
        .all(|e| e.timestamp <= last.timestamp));
    // Poll already observes the terminal state.
    assert!(registry
        .get("job-causality")
        .await
        .unwrap()
        .status
        .is_terminal());
}

#[tokio::test]
async fn content_batch_preserves_input_order() {
    let server = MockServer::start().await;
    let base = server.uri();
    let long_body = format!(
        "<html><body><p>{}</p></body></html>",
        "meaningful words ".repeat(30)
    );

    Mock::given(method("GET"))
        .and(path("/ok-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/html")
                .set_body_string(long_body.clone()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/blocked"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ok-2"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/html")
                .set_body_string(long_body),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let state = app_state();
    let urls = vec![
        format!("{}/ok-1", base),
        format!("{}/blocked", base),
        format!("{}/ok-2", base),
    ];
    let results = state.pool.process_content_urls(&urls).await.unwrap();

    assert_eq!(results.len(), 3);
    assert!(results[0].url.ends_with("/ok-1"));
    assert!(results[1].url.ends_with("/blocked"));
    assert!(results[2].url.ends_with("/ok-2"));
    assert!(results[0].is_success());
    assert!(!results[1].is_success());
    assert!(results[2].is_success());
    assert!(results[0].markdown.contains("meaningful words"));
}

#[tokio::test]
async fn crawl_handler_validates_input() {
    let state = app_state();

    // Invalid JSON.
    let response = handlers::handle_crawl(State(state.clone()), Bytes::from_static(b"{nope"))
        .await
        .into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Missing URL.
    let response = handlers::handle_crawl(State(state.clone()), Bytes::from_static(b"{}"))
        .await
        .into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Relative URL.
    let response = handlers::handle_crawl(
        State(state.clone()),
        Bytes::from_static(br#"{"url":"/not-absolute"}"#),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Malformed custom job id.
    let response = handlers::handle_crawl(
        State(state.clone()),
        Bytes::from_static(br#"{"url":"https://example.com","job_id":"x"}"#),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn crawl_handler_conflicts_on_existing_id() {
    let state = app_state();
    state
        .registry
        .create(Job::new(
            "already-taken",
            crawl_request("https://example.com"),
        ))
        .await
        .unwrap();

    let response = handlers::handle_crawl(
        State(state),
        Bytes::from_static(br#"{"url":"https://example.com","job_id":"already-taken"}"#),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn content_handler_requires_targets() {
    let state = app_state();
    let response = handlers::handle_content(State(state), Bytes::from_static(b"{}"))
        .await
        .into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn job_status_handler_404s_on_unknown() {
    let state = app_state();
    let response = handlers::handle_job_status(
        State(state),
        axum::extract::Path("missing-job".to_string()),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// Crash recovery against a live store. Skips when redis is not listening,
// in the same spirit as the store module's own tests.
#[tokio::test]
async fn recovery_marks_running_jobs_failed() {
    let Ok(store) = siteminer::JobStore::connect("redis://127.0.0.1:6379").await else {
        return;
    };

    let id = format!("recovery-{}", siteminer::models::generate_job_id());
    let job = Job::new(&id, crawl_request("https://example.com"));
    store.save(&job).await.unwrap();

    // A fresh registry simulates a restarted process.
    let registry = JobRegistry::new(Some(store));
    registry.recover().await;

    let recovered = registry.get(&id).await.unwrap();
    assert_eq!(recovered.status, JobStatus::Failed);
    assert_eq!(
        recovered.error.as_deref(),
        Some(siteminer::registry::RECOVERY_ERROR)
    );
    assert!(registry.contains(&id).await);
}
