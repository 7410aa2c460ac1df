//! Headless browser rendering and the shared browser pool.
//!
//! Rendering loads a page, scrolls to trigger lazy content, and returns
//! the final DOM HTML. Browsers are expensive: they live in a pool owned
//! by the worker pool, grown lazily up to a cap, and each instance is
//! leased exclusively while in use.

use chromiumoxide::browser::{Browser, BrowserConfig};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::config::Config;

const CHROMIUM_BIN: &str = "/usr/bin/chromium";

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("browser pool exhausted")]
    PoolExhausted,

    #[error("headless operation timed out")]
    Timeout,

    #[error("page error: {0}")]
    Page(String),

    #[error("page returned minimal content")]
    EmptyContent,
}

struct Slot {
    browser: Arc<Browser>,
    handler: tokio::task::JoinHandle<()>,
    in_use: bool,
}

/// Lease on a pooled browser. Return it with [`BrowserPool::release`].
pub struct BrowserLease {
    pub browser: Arc<Browser>,
    slot: usize,
}

pub struct BrowserPool {
    slots: Mutex<Vec<Slot>>,
    max_size: usize,
}

impl BrowserPool {
    pub fn new(max_size: usize) -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            max_size: max_size.max(1),
        }
    }

    /// First idle browser wins; below the cap a new one is launched.
    /// Exhaustion is an immediate error, not a wait.
    pub async fn acquire(&self) -> Result<BrowserLease, RenderError> {
        let mut slots = self.slots.lock().await;

        if let Some((idx, slot)) = slots.iter_mut().enumerate().find(|(_, s)| !s.in_use) {
            slot.in_use = true;
            return Ok(BrowserLease {
                browser: Arc::clone(&slot.browser),
                slot: idx,
            });
        }

        if slots.len() < self.max_size {
            let (browser, handler) = launch_browser().await?;
            let browser = Arc::new(browser);
            slots.push(Slot {
                browser: Arc::clone(&browser),
                handler,
                in_use: true,
            });
            return Ok(BrowserLease {
                browser,
                slot: slots.len() - 1,
            });
        }

        Err(RenderError::PoolExhausted)
    }

    pub async fn release(&self, lease: BrowserLease) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(lease.slot) {
            slot.in_use = false;
        }
    }

    /// Close every browser and its event handler task.
    pub async fn shutdown(&self) {
        let mut slots = self.slots.lock().await;
        for slot in slots.drain(..) {
            match Arc::try_unwrap(slot.browser) {
                Ok(mut browser) => {
                    if let Err(err) = browser.close().await {
                        tracing::warn!(error = %err, "browser close error");
                    }
                }
                Err(_) => {
                    tracing::warn!("browser still leased during shutdown, dropping handle");
                }
            }
            slot.handler.abort();
        }
    }
}

async fn launch_browser() -> Result<(Browser, tokio::task::JoinHandle<()>), RenderError> {
    let browser_cfg = BrowserConfig::builder()
        .chrome_executable(CHROMIUM_BIN)
        .arg("--no-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-extensions")
        .arg("--disable-gpu")
        .arg("--disable-web-security")
        .arg("--disable-background-timer-throttling")
        .arg("--disable-backgrounding-occluded-windows")
        .arg("--disable-renderer-backgrounding")
        .build()
        .map_err(RenderError::Launch)?;

    let (browser, mut handler) = Browser::launch(browser_cfg)
        .await
        .map_err(|e| RenderError::Launch(e.to_string()))?;

    let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });

    Ok((browser, handler_task))
}

/// Render a page to DOM HTML: navigate, wait for load (best-effort),
/// scroll through the page to trigger lazy content, then extract.
pub async fn render_page(
    browser: &Browser,
    url: &str,
    op_timeout: Duration,
) -> Result<String, RenderError> {
    let page = timeout(op_timeout, browser.new_page(url))
        .await
        .map_err(|_| RenderError::Timeout)?
        .map_err(|e| RenderError::Page(e.to_string()))?;

    if let Err(err) = timeout(op_timeout, page.wait_for_navigation()).await {
        tracing::debug!(url, error = %err, "page load wait failed, continuing");
    }

    for step in 0..Config::SCROLL_STEPS {
        if let Err(err) = page
            .evaluate(format!("window.scrollBy(0, {})", Config::SCROLL_STEP_PX))
            .await
        {
            tracing::debug!(url, step, error = %err, "scroll step failed");
        }
        tokio::time::sleep(Duration::from_millis(Config::SCROLL_PAUSE_MS)).await;
    }

    // Terminal scroll to the bottom, brief settle, then back to the top so
    // viewport-dependent content renders from the start of the page.
    let _ = page.evaluate("window.scrollBy(0, 5000)").await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    let _ = page.evaluate("window.scrollTo(0, 0)").await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let html = timeout(op_timeout, page.content())
        .await
        .map_err(|_| RenderError::Timeout)?
        .map_err(|e| RenderError::Page(e.to_string()))?;

    if let Err(err) = page.close().await {
        tracing::debug!(url, error = %err, "page close error");
    }

    if html.trim().len() < Config::RENDER_MIN_BYTES {
        return Err(RenderError::EmptyContent);
    }

    Ok(html)
}
