use std::sync::Arc;

use siteminer::cli::{Cli, Commands};
use siteminer::config::Config;
use siteminer::{
    bus, fingerprint, logging, models, network, orchestrator, renderer, server,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Serve {
            port,
            nats_url,
            redis_url,
            api_key,
            headers_api_key,
        } => {
            server::run(server::ServerConfig {
                port,
                nats_url,
                redis_url,
                api_key,
                headers_api_key,
            })
            .await?;
        }

        Commands::Crawl {
            url,
            depth,
            workers,
            delay,
            max_urls,
            enable_sitemap,
            enable_html,
            enable_headless,
        } => {
            let request = models::CrawlRequest {
                url,
                job_id: None,
                depth: Some(depth),
                workers: Some(workers),
                delay: Some(delay),
                max_urls: Some(max_urls),
                enable_sitemap,
                enable_html,
                enable_headless,
                headless_timeout: None,
            };

            let fingerprints = fingerprint::FingerprintProvider::new(None);
            let http = Arc::new(network::HttpClient::new(
                fingerprints,
                Config::FETCH_TIMEOUT_SECS,
            )?);
            let browsers = Arc::new(renderer::BrowserPool::new(1));
            let orchestrator = orchestrator::CrawlOrchestrator::new(
                http,
                Arc::clone(&browsers),
                Arc::new(bus::NullSink),
            );

            let job_id = models::generate_job_id();
            let result = orchestrator.execute(&request, &job_id).await?;
            browsers.shutdown().await;

            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}
