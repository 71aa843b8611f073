use headless_chrome::{Browser, LaunchOptions, Tab};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::ScraperConfig;
use crate::utils::error::FetchFailure;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRequest {
    pub url: String,
    /// CSS selectors whose text is read, in order.
    pub selectors: Vec<String>,
    pub wait_for_selector: Option<String>,
    pub warmup_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSnapshot {
    /// Text of the first match for each requested selector.
    pub texts: Vec<Option<String>>,
    pub final_url: String, // After redirects
    pub response_time_ms: u64,
}

/// Loads pages in headless Chrome.
///
/// The browser process is launched on first use and shared; every fetch gets
/// its own tab which is closed before returning, whether the fetch succeeded
/// or not. A browser that fails to open a tab is discarded and relaunched on
/// the next call.
pub struct WebScraper {
    config: ScraperConfig,
    browser: Mutex<Option<Arc<Browser>>>,
}

impl WebScraper {
    pub fn new(config: ScraperConfig) -> Self {
        Self {
            config,
            browser: Mutex::new(None),
        }
    }

    fn launch(&self) -> Result<Browser, FetchFailure> {
        let mut launch_options = LaunchOptions::default_builder()
            .headless(self.config.headless)
            .sandbox(false) // Often needed in containerized environments
            .idle_browser_timeout(self.config.request_timeout() * 4)
            .args(vec![
                std::ffi::OsStr::new("--no-sandbox"),
                std::ffi::OsStr::new("--disable-dev-shm-usage"),
                std::ffi::OsStr::new("--disable-gpu"),
                std::ffi::OsStr::new("--disable-extensions"),
            ])
            .build()
            .map_err(|e| FetchFailure::Browser(format!("Failed to create launch options: {}", e)))?;

        // Set Chrome path if provided
        if let Some(chrome_path) = &self.config.chrome_path {
            launch_options.path = Some(std::path::PathBuf::from(chrome_path));
        }

        tracing::info!("Launching browser (headless: {})", self.config.headless);
        Browser::new(launch_options)
            .map_err(|e| FetchFailure::Browser(format!("Failed to launch browser: {}", e)))
    }

    fn browser(&self) -> Result<Arc<Browser>, FetchFailure> {
        let mut slot = self
            .browser
            .lock()
            .map_err(|_| FetchFailure::Browser("browser lock poisoned".to_string()))?;
        if let Some(browser) = slot.as_ref() {
            return Ok(Arc::clone(browser));
        }
        let browser = Arc::new(self.launch()?);
        *slot = Some(Arc::clone(&browser));
        Ok(browser)
    }

    fn discard_browser(&self) {
        if let Ok(mut slot) = self.browser.lock() {
            *slot = None;
        }
    }

    // An idle browser shuts itself down between passes; the first tab after
    // that fails once and gets a freshly launched browser.
    fn open_tab(&self) -> Result<Arc<Tab>, FetchFailure> {
        match self.browser()?.new_tab() {
            Ok(tab) => Ok(tab),
            Err(e) => {
                tracing::debug!("Relaunching browser after tab failure: {}", e);
                self.discard_browser();
                self.browser()?.new_tab().map_err(|e| {
                    self.discard_browser();
                    FetchFailure::Browser(format!("Failed to create tab: {}", e))
                })
            }
        }
    }

    pub async fn fetch_page(&self, request: PageRequest) -> Result<PageSnapshot, FetchFailure> {
        let tab = self.open_tab()?;

        let user_agent = self.config.user_agent.clone();
        let timeout = self.config.request_timeout();
        let blocking_tab = Arc::clone(&tab);

        // headless_chrome drives the DevTools protocol synchronously.
        let result = tokio::task::spawn_blocking(move || {
            load_and_extract(&blocking_tab, &user_agent, timeout, &request)
        })
        .await
        .map_err(|e| FetchFailure::Browser(format!("Page task failed: {}", e)))
        .and_then(|result| result);

        // Close tab to free resources
        if let Err(e) = tab.close(true) {
            tracing::debug!("Failed to close tab: {}", e);
        }

        result
    }
}

fn load_and_extract(
    tab: &Tab,
    user_agent: &str,
    timeout: Duration,
    request: &PageRequest,
) -> Result<PageSnapshot, FetchFailure> {
    let start_time = Instant::now();
    tab.set_default_timeout(timeout);

    tab.set_user_agent(user_agent, None, None)
        .map_err(|e| FetchFailure::Browser(format!("Failed to set user agent: {}", e)))?;

    if let Some(warmup_url) = &request.warmup_url {
        tab.navigate_to(warmup_url)
            .and_then(|tab| tab.wait_until_navigated())
            .map_err(|e| FetchFailure::Network(format!("Warmup navigation failed: {}", e)))?;
    }

    tab.navigate_to(&request.url)
        .map_err(|e| FetchFailure::Network(format!("Navigation failed: {}", e)))?;
    tab.wait_until_navigated()
        .map_err(|e| FetchFailure::Network(format!("Page load failed: {}", e)))?;

    if let Some(wait_selector) = &request.wait_for_selector {
        if tab
            .wait_for_element_with_custom_timeout(wait_selector, timeout)
            .is_err()
        {
            if start_time.elapsed() >= timeout {
                return Err(FetchFailure::Timeout {
                    after_secs: timeout.as_secs(),
                });
            }
            return Err(FetchFailure::ElementNotFound {
                selector: wait_selector.clone(),
            });
        }
    }

    // Get final URL after redirects
    let final_url = {
        let url = tab.get_url();
        if url.is_empty() { request.url.clone() } else { url }
    };

    let html_content = tab
        .get_content()
        .map_err(|e| FetchFailure::Browser(format!("Failed to get page content: {}", e)))?;

    Ok(PageSnapshot {
        texts: extract_texts(&html_content, &request.selectors)?,
        final_url,
        response_time_ms: start_time.elapsed().as_millis() as u64,
    })
}

/// Text of the first element matching each selector, trimmed; `None` when a
/// selector matches nothing or only whitespace.
pub fn extract_texts(html: &str, selectors: &[String]) -> Result<Vec<Option<String>>, FetchFailure> {
    let document = Html::parse_document(html);

    selectors
        .iter()
        .map(|selector| {
            let css_selector = Selector::parse(selector).map_err(|_| FetchFailure::ElementNotFound {
                selector: selector.clone(),
            })?;
            Ok(document.select(&css_selector).next().and_then(|element| {
                let text = element.text().collect::<Vec<_>>().join(" ");
                let text = text.trim();
                if text.is_empty() { None } else { Some(text.to_string()) }
            }))
        })
        .collect()
}
