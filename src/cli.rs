use clap::{Parser, Subcommand};

/// siteminer cli
#[derive(Parser)]
#[command(name = "siteminer")]
#[command(about = "Web crawling and content extraction service")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP/WebSocket API server
    Serve {
        /// bind port
        #[arg(long, env = "SITEMINER_PORT", default_value = "8080")]
        port: u16,

        /// event bus URL
        #[arg(
            long,
            env = "SITEMINER_NATS_URL",
            default_value = "nats://127.0.0.1:4222"
        )]
        nats_url: String,

        /// document store URL
        #[arg(
            long,
            env = "SITEMINER_REDIS_URL",
            default_value = "redis://127.0.0.1:6379"
        )]
        redis_url: String,

        /// API key required on authenticated endpoints
        #[arg(long, env = "SITEMINER_API_KEY", default_value = "dev-api-key")]
        api_key: String,

        /// fingerprint catalog API key (static fallback table without it)
        #[arg(long, env = "SITEMINER_HEADERS_API_KEY")]
        headers_api_key: Option<String>,
    },

    /// One-shot crawl printing the result as JSON
    Crawl {
        /// crawl start url
        url: String,

        /// crawl depth for the HTML walker
        #[arg(short, long, default_value = "1")]
        depth: u32,

        /// HTML walker parallelism
        #[arg(short, long, default_value = "10")]
        workers: usize,

        /// delay between requests (e.g. 200ms, 1s)
        #[arg(long, default_value = "200ms")]
        delay: String,

        /// maximum URLs to collect
        #[arg(long, default_value = "1000")]
        max_urls: usize,

        /// enable the sitemap tier explicitly
        #[arg(long)]
        enable_sitemap: bool,

        /// enable the HTML tier explicitly
        #[arg(long)]
        enable_html: bool,

        /// enable the headless tier explicitly
        #[arg(long)]
        enable_headless: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
