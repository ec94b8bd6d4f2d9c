use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use shelfscan_core::error::AppError;
use shelfscan_core::traits::{ContextProvider, PageSnapshot};

const READY_POLL: Duration = Duration::from_millis(250);
const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Headless-browser page contexts using Chromium via the Chrome DevTools
/// Protocol.
///
/// A single Chromium process is shared across all clones of this struct;
/// each job gets its own tab, which is closed when the job ends. Pages
/// that render their product data with JavaScript need this provider.
///
/// # Example
///
/// ```rust,no_run
/// use shelfscan_client::ChromiumContextProvider;
/// use shelfscan_core::traits::ContextProvider;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let provider = ChromiumContextProvider::launch().await?;
/// let tab = provider.open("https://example.com").await?;
/// let page = provider.snapshot(&tab).await?;
/// println!("{}", &page.html[..200]);
/// provider.close(tab).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ChromiumContextProvider {
    browser: Arc<Browser>,
    navigation_timeout: Duration,
}

/// One open tab.
#[derive(Debug)]
pub struct BrowserPage {
    locator: String,
    page: Page,
}

impl ChromiumContextProvider {
    /// Launch a headless Chromium.
    ///
    /// Requires a Chromium / Chrome binary reachable via `$PATH`, `CHROME_BIN`
    /// or one of the well-known install locations.
    pub async fn launch() -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder();
        builder = builder.no_sandbox().disable_default_args();

        // The snap wrapper rejects standard Chrome flags; prefer the real binary.
        if let Some(bin) = find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::ConfigError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::Generic(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            navigation_timeout: DEFAULT_NAVIGATION_TIMEOUT,
        })
    }

    /// Give up on a navigation that has not committed within `timeout`.
    /// The tab is closed before `open` returns the error.
    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }
}

impl ContextProvider for ChromiumContextProvider {
    type Handle = BrowserPage;

    async fn open(&self, locator: &str) -> Result<BrowserPage, AppError> {
        let open_failed = |message: String| AppError::ContextOpen {
            locator: locator.to_string(),
            message,
        };

        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| open_failed(format!("new tab: {e}")))?;

        // The tab exists from here on, so every failure below closes it.
        // Returns once navigation commits; load completion is awaited separately.
        let navigation =
            tokio::time::timeout(self.navigation_timeout, page.execute(NavigateParams::new(locator)))
                .await;
        let error = match navigation {
            Ok(Ok(response)) => response.result.error_text.clone(),
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!(
                "navigation did not commit within {}ms",
                self.navigation_timeout.as_millis()
            )),
        };
        if let Some(error) = error {
            if let Err(e) = page.close().await {
                tracing::debug!(%locator, error = %e, "Closing failed tab");
            }
            return Err(open_failed(error));
        }

        Ok(BrowserPage {
            locator: locator.to_string(),
            page,
        })
    }

    async fn wait_until_ready(&self, handle: &BrowserPage, timeout: Duration) -> Result<(), AppError> {
        let poll = async {
            loop {
                let state = handle
                    .page
                    .evaluate("document.readyState")
                    .await
                    .ok()
                    .and_then(|r| r.into_value::<String>().ok());
                if state.as_deref() == Some("complete") {
                    return;
                }
                tokio::time::sleep(READY_POLL).await;
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| AppError::LoadTimeout(timeout.as_millis() as u64))
    }

    async fn snapshot(&self, handle: &BrowserPage) -> Result<PageSnapshot, AppError> {
        let html = handle
            .page
            .content()
            .await
            .map_err(|e| AppError::Extraction(format!("Failed to read page content: {e}")))?;
        let final_url = handle
            .page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| handle.locator.clone());

        Ok(PageSnapshot {
            locator: handle.locator.clone(),
            final_url,
            html,
        })
    }

    async fn close(&self, handle: BrowserPage) -> Result<(), AppError> {
        handle
            .page
            .close()
            .await
            .map_err(|e| AppError::Generic(format!("Failed to close tab: {e}")))
    }
}

/// Locate the real Chrome/Chromium binary.
///
/// `CHROME_BIN` wins; otherwise the binary inside a snap install is preferred
/// over well-known system paths. `None` lets chromiumoxide do its own lookup.
fn find_chrome_binary() -> Option<PathBuf> {
    let candidates: &[&str] = &[
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ];

    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    candidates.iter().map(PathBuf::from).find(|p| p.exists())
}
