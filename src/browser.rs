use anyhow::{anyhow, Result};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;

const SETTLE_DELAY: Duration = Duration::from_millis(1500);

// One headless Chromium per run. Launched on first use; if the connection
// dies mid-run the next page() call relaunches once.
pub struct BrowserHandle {
	browser: Option<Browser>,
	handler_task: Option<JoinHandle<()>>,
}

impl BrowserHandle {
	pub fn new() -> Self {
		Self {
			browser: None,
			handler_task: None,
		}
	}

	async fn launch(&mut self) -> Result<()> {
		let config = BrowserConfig::builder()
			.no_sandbox()
			.request_timeout(Duration::from_secs(60))
			.arg("--disable-gpu")
			.arg("--disable-dev-shm-usage")
			.build()
			.map_err(|e| anyhow!("Failed to configure browser: {}", e))?;

		let (browser, mut handler) = Browser::launch(config).await?;

		let task = tokio::spawn(async move {
			while let Some(event) = handler.next().await {
				if event.is_err() {
					break;
				}
			}
		});

		self.browser = Some(browser);
		self.handler_task = Some(task);

		log::debug!("Launched headless browser");
		Ok(())
	}

	pub async fn page(&mut self, url: &str) -> Result<Page> {
		if self.browser.is_none() {
			self.launch().await?;
		}

		if let Some(browser) = &self.browser {
			match browser.new_page(url).await {
				Ok(page) => return Ok(page),
				Err(e) => {
					log::warn!("Lost connection to browser ({}), relaunching", e);
				}
			}
		}

		self.close().await;
		self.launch().await?;

		let browser = self
			.browser
			.as_ref()
			.ok_or_else(|| anyhow!("Browser not running after relaunch"))?;
		Ok(browser.new_page(url).await?)
	}

	// Navigate, let the page settle, hand back its serialized DOM.
	pub async fn page_content(&mut self, url: &str) -> Result<String> {
		let page = self.page(url).await?;
		page.wait_for_navigation().await?;
		tokio::time::sleep(SETTLE_DELAY).await;

		let content = page.content().await?;
		let _ = page.close().await;

		Ok(content)
	}

	pub async fn close(&mut self) {
		if let Some(mut browser) = self.browser.take() {
			let _ = browser.close().await;
			let _ = browser.wait().await;
		}
		if let Some(task) = self.handler_task.take() {
			task.abort();
		}
	}
}
