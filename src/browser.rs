use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use url::Url;

use crate::config::BrowserSettings;
use crate::extract::{ExtractionError, PageScan};

// ── Constants ────────────────────────────────────────────────────────────────

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
const WINDOW_WIDTH: u32 = 1920;
const WINDOW_HEIGHT: u32 = 1080;

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
/// Must outlast `NAVIGATION_TIMEOUT` so a slow page reports as a timeout.
const CDP_REQUEST_TIMEOUT: Duration = Duration::from_secs(45);
const SETTLE_DELAY: Duration = Duration::from_secs(2);
const SCROLL_STEPS: u32 = 5;
const SCROLL_PAUSE: Duration = Duration::from_secs(1);

const COLLECT_IMAGES_JS: &str = include_str!("../script/collect_images.js");

// ── Scanner seam ─────────────────────────────────────────────────────────────

/// Something that can render a page and report raw image candidates.
#[async_trait]
pub trait PageScanner: Send + Sync {
    async fn scan(&self, url: &Url) -> Result<PageScan, ExtractionError>;

    /// Whether the underlying browser has been started.
    fn is_running(&self) -> bool;

    async fn shutdown(&self);
}

// ── Headless Chrome ──────────────────────────────────────────────────────────

struct RunningBrowser {
    browser: Browser,
    handler: JoinHandle<()>,
}

/// Process-wide Chrome, launched on the first scan and shared by every
/// request afterwards. Each scan gets its own tab.
pub struct BrowserHandle {
    settings: BrowserSettings,
    running: OnceCell<RunningBrowser>,
}

impl BrowserHandle {
    pub fn new(settings: BrowserSettings) -> Self {
        Self {
            settings,
            running: OnceCell::new(),
        }
    }

    async fn browser(&self) -> Result<&Browser, ExtractionError> {
        let running = self
            .running
            .get_or_try_init(|| launch(&self.settings))
            .await?;
        Ok(&running.browser)
    }
}

#[async_trait]
impl PageScanner for BrowserHandle {
    async fn scan(&self, url: &Url) -> Result<PageScan, ExtractionError> {
        let browser = self.browser().await?;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| ExtractionError::Browser(e.to_string()))?;

        let result = scan_page(&page, url).await;

        if let Err(e) = page.close().await {
            tracing::warn!("failed to close tab for {}: {}", url, e);
        }
        result
    }

    fn is_running(&self) -> bool {
        self.running.initialized()
    }

    async fn shutdown(&self) {
        let Some(running) = self.running.get() else {
            return;
        };
        tracing::info!("closing headless browser");
        if let Err(e) = running.browser.close().await {
            tracing::warn!("error closing browser: {}", e);
        }
        running.handler.abort();
    }
}

async fn launch(settings: &BrowserSettings) -> Result<RunningBrowser, ExtractionError> {
    tracing::info!("launching headless browser");

    let mut builder = BrowserConfig::builder()
        .window_size(WINDOW_WIDTH, WINDOW_HEIGHT)
        .request_timeout(CDP_REQUEST_TIMEOUT)
        .arg("--disable-gpu")
        .arg("--disable-dev-shm-usage");
    if settings.no_sandbox {
        builder = builder.no_sandbox();
    }
    if let Some(path) = &settings.executable {
        builder = builder.chrome_executable(path);
    }
    let config = builder.build().map_err(ExtractionError::Launch)?;

    let (browser, mut handler) = Browser::launch(config)
        .await
        .map_err(|e| ExtractionError::Launch(e.to_string()))?;

    let handler = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                tracing::debug!("CDP handler event error: {}", e);
            }
        }
    });

    tracing::info!("headless browser ready");
    Ok(RunningBrowser { browser, handler })
}

// ── Per-page routine ─────────────────────────────────────────────────────────

async fn scan_page(page: &Page, url: &Url) -> Result<PageScan, ExtractionError> {
    page.set_user_agent(SetUserAgentOverrideParams::new(USER_AGENT))
        .await
        .map_err(|e| ExtractionError::Browser(e.to_string()))?;

    tracing::debug!("navigating to {}", url);
    match tokio::time::timeout(NAVIGATION_TIMEOUT, page.goto(url.as_str())).await {
        Err(_) => return Err(ExtractionError::Timeout(NAVIGATION_TIMEOUT)),
        Ok(Err(e)) => return Err(ExtractionError::Navigation(e.to_string())),
        Ok(Ok(_)) => {}
    }

    tokio::time::sleep(SETTLE_DELAY).await;
    scroll_page(page).await?;

    page.evaluate(COLLECT_IMAGES_JS)
        .await
        .map_err(|e| ExtractionError::Script(e.to_string()))?
        .into_value::<PageScan>()
        .map_err(|e| ExtractionError::Script(e.to_string()))
}

/// Step down the page in fixed increments so lazy-load observers fire, then
/// return to the top.
async fn scroll_page(page: &Page) -> Result<(), ExtractionError> {
    for step in 1..=SCROLL_STEPS {
        let script = scroll_script(step, SCROLL_STEPS);
        page.evaluate(script.as_str())
            .await
            .map_err(|e| ExtractionError::Script(e.to_string()))?;
        tracing::debug!("scroll step {}/{}", step, SCROLL_STEPS);
        tokio::time::sleep(SCROLL_PAUSE).await;
    }

    page.evaluate("window.scrollTo(0, 0)")
        .await
        .map_err(|e| ExtractionError::Script(e.to_string()))?;
    tokio::time::sleep(SCROLL_PAUSE).await;
    Ok(())
}

fn scroll_script(step: u32, steps: u32) -> String {
    format!(
        "window.scrollTo(0, Math.floor(document.documentElement.scrollHeight * {} / {}))",
        step, steps
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DetectionMethod;

    #[test]
    fn test_scroll_script_reaches_bottom_on_last_step() {
        assert_eq!(
            scroll_script(5, 5),
            "window.scrollTo(0, Math.floor(document.documentElement.scrollHeight * 5 / 5))"
        );
        assert!(scroll_script(1, 5).contains("* 1 / 5"));
    }

    #[test]
    fn test_collector_script_is_a_single_expression() {
        let script = COLLECT_IMAGES_JS.trim();
        assert!(script.starts_with("(() => {"));
        assert!(script.ends_with("})()"));
        for method in ["img-tag", "css-background", "picture-srcset", "lazy-data"] {
            assert!(script.contains(method), "collector misses {method}");
        }
    }

    #[test]
    fn test_browser_is_not_running_before_first_scan() {
        let handle = BrowserHandle::new(BrowserSettings::default());
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_shutdown_without_launch_is_a_no_op() {
        let handle = BrowserHandle::new(BrowserSettings::default());
        handle.shutdown().await;
        assert!(!handle.is_running());
    }

    #[test]
    fn test_cdp_requests_outlast_navigation_timeout() {
        assert!(CDP_REQUEST_TIMEOUT > NAVIGATION_TIMEOUT);
    }

    const FIXTURE: &str = concat!(
        "data:text/html,<html><body>",
        "<img src='https://example.com/plain.jpg' alt='Plain' width='200' height='200'>",
        "<div style='width:300px;height:300px;background-image:url(https://example.com/bg.jpg)'></div>",
        "<picture><source srcset='https://example.com/p-1x.jpg 1x, https://example.com/p-2x.jpg 2x'>",
        "<img src='https://example.com/p-fallback.jpg' width='200' height='200'></picture>",
        "<img src='data:image/gif;base64,R0lGODlhAQABAIAAAAAAAP///yH5BAEAAAAALAAAAAABAAEAAAIBRAA7' ",
        "data-src='https://example.com/real.jpg' alt='Deferred'>",
        "</body></html>"
    );

    #[tokio::test]
    #[ignore = "needs a local Chrome"]
    async fn test_scan_reports_all_detection_families_in_order() {
        let handle = BrowserHandle::new(BrowserSettings::default());
        let url = Url::parse(FIXTURE).unwrap();
        let scan = handle.scan(&url).await.unwrap();
        handle.shutdown().await;

        let base = Url::parse("https://example.com/").unwrap();
        let images = crate::extract::collect_images(&scan, &base);

        let position = |src: &str, method: DetectionMethod| {
            images
                .iter()
                .position(|i| i.src == src && i.method == method)
                .unwrap_or_else(|| panic!("{src} not found as {method:?} in {images:?}"))
        };

        let plain = position("https://example.com/plain.jpg", DetectionMethod::ImgTag);
        let background = position("https://example.com/bg.jpg", DetectionMethod::CssBackground);
        let picture = position("https://example.com/p-2x.jpg", DetectionMethod::PictureSrcset);
        let deferred = position("https://example.com/real.jpg", DetectionMethod::LazyData);
        assert!(plain < background && background < picture && picture < deferred);

        assert_eq!(images[deferred].width, None);
        assert_eq!(images[deferred].alt.as_deref(), Some("Deferred"));
        assert!(images.iter().all(|i| !i.src.starts_with("data:")));
    }
}
