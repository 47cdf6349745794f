use anyhow::{anyhow, bail, Context, Result};
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::browser::BrowserHandle;

// Literal string served by throttling hosts (F5 interstitial on the OAS family).
pub const RATE_LIMIT_MARKER: &str = "The requested URL was rejected";

const DOC_EXTENSIONS: [&str; 4] = ["pdf", "doc", "docx", "rtf"];
const RENDER_SETTLE: Duration = Duration::from_millis(1500);

#[derive(Error, Debug)]
pub enum ScrapeError {
	#[error("Rate limited by remote host")]
	RateLimited,

	#[error("Unexpected status {0} for {1}")]
	HttpStatus(u16, String),

	#[error("Unexpected content type {0} for {1}")]
	ContentType(String, String),
}

pub fn is_rate_limited(err: &anyhow::Error) -> bool {
	matches!(err.downcast_ref::<ScrapeError>(), Some(ScrapeError::RateLimited))
}

#[derive(Debug)]
pub enum Fetched {
	Downloaded,
	Rendered,
}

//Helper Functions
fn strip_query(url: &str) -> &str {
	let url = url.split_once('?').map_or(url, |(base, _)| base);
	url.split_once('#').map_or(url, |(base, _)| base)
}

fn last_segment(url: &str) -> &str {
	strip_query(url).rsplit('/').next().unwrap_or("")
}

fn sanitize_stem(stem: &str) -> String {
	let cleaned: String = stem
		.chars()
		.map(|c| {
			if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
				c
			} else {
				'_'
			}
		})
		.collect();

	cleaned.trim_matches('_').to_string()
}

pub fn looks_like_html(url: &str) -> bool {
	match last_segment(url).rsplit_once('.') {
		Some((_, ext)) => !DOC_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
		None => true,
	}
}

#[test]
fn test_looks_like_html() {
	const TEST_URLS: [(&str, bool); 7] = [
		("https://example.org/docs/report.pdf", false),
		("https://example.org/docs/report.PDF", false),
		("https://example.org/docs/statement.docx", false),
		("https://example.org/docs/report.pdf?download=1", false),
		("https://example.org/en/documents/annual-reports", true),
		("https://example.org/decisions/merits.asp?Year=2019", true),
		("https://example.org/", true),
	];

	for (input, expected) in TEST_URLS {
		assert_eq!(
			looks_like_html(input),
			expected,
			"Expected {} for URL '{}'",
			expected,
			input
		);
	}
}

// Hash-or-derive: direct document URLs keep a cleaned basename, anything
// else gets a stable hash-based name for the rendered PDF.
pub fn derived_filename(url: &str) -> String {
	if let Some((stem, ext)) = last_segment(url).rsplit_once('.') {
		let ext = ext.to_ascii_lowercase();
		if DOC_EXTENSIONS.contains(&ext.as_str()) {
			let slug = sanitize_stem(stem);
			if !slug.is_empty() {
				return format!("{}.{}", slug, ext);
			}
		}
	}

	let mut hasher = Sha256::new();
	hasher.update(url.as_bytes());
	let digest = hex::encode(hasher.finalize());
	format!("{}.pdf", &digest[..16])
}

#[test]
fn test_derived_filename_for_documents() {
	const TEST_URLS: [(&str, &str); 4] = [
		(
			"https://www.oas.org/en/iachr/decisions/2019/ARpe123-19.pdf",
			"ARpe123-19.pdf",
		),
		(
			"https://example.org/files/report.pdf?inline=1",
			"report.pdf",
		),
		(
			"https://example.org/files/annual%20report.PDF",
			"annual_20report.pdf",
		),
		("https://example.org/files/state report.doc", "state_report.doc"),
	];

	for (input, expected) in TEST_URLS {
		let result = derived_filename(input);
		assert_eq!(
			result.as_str(),
			expected,
			"Expected '{}' for URL '{}', but got '{}'",
			expected,
			input,
			result
		);
	}
}

#[test]
fn test_derived_filename_falls_back_to_hash_for_empty_stems() {
	// "%%%" sanitizes to nothing, so the hashed name takes over.
	let first = derived_filename("https://example.org/files/%%%.pdf");
	let second = derived_filename("https://example.org/files/%%%.pdf");

	assert_eq!(first, second);
	assert!(first.ends_with(".pdf"));
	assert_eq!(first.len(), 16 + ".pdf".len());
}

#[test]
fn test_derived_filename_is_deterministic_for_pages() {
	let first = derived_filename("https://www.ohchr.org/en/documents/annual-reports");
	let second = derived_filename("https://www.ohchr.org/en/documents/annual-reports");
	let other = derived_filename("https://www.ohchr.org/en/documents/country-reports");

	assert_eq!(first, second);
	assert_ne!(first, other);
	assert!(first.ends_with(".pdf"));
	assert_eq!(first.len(), 16 + ".pdf".len());
}

//Fetch Primitives
pub async fn download_file(client: &reqwest::Client, url: &str, dest: &Path) -> Result<()> {
	let response = client.get(url).send().await?;
	let status = response.status();

	log::debug!("Received status {} from {}", status, url);

	if !status.is_success() {
		bail!(ScrapeError::HttpStatus(status.as_u16(), url.to_string()));
	}

	let content_type = response
		.headers()
		.get(reqwest::header::CONTENT_TYPE)
		.and_then(|value| value.to_str().ok())
		.unwrap_or("")
		.to_string();

	// A document URL answered with HTML is either the throttling
	// interstitial or a redirect to an error page.
	if content_type.contains("text/html") {
		let body = response.text().await?;
		if body.contains(RATE_LIMIT_MARKER) {
			bail!(ScrapeError::RateLimited);
		}
		bail!(ScrapeError::ContentType(content_type, url.to_string()));
	}

	let mut file = tokio::fs::File::create(dest)
		.await
		.with_context(|| format!("Failed to create file: {}", dest.display()))?;

	let mut stream = response.bytes_stream();
	while let Some(chunk) = stream.next().await {
		let chunk = chunk?;
		file.write_all(&chunk).await?;
	}
	file.flush().await?;

	Ok(())
}

pub async fn render_page_pdf(browser: &mut BrowserHandle, url: &str, dest: &Path) -> Result<()> {
	let page = browser.page(url).await?;
	page.wait_for_navigation().await?;

	// Late XHR content; goto only waits for the load event.
	tokio::time::sleep(RENDER_SETTLE).await;

	let content = page.content().await?;
	if content.contains(RATE_LIMIT_MARKER) {
		let _ = page.close().await;
		bail!(ScrapeError::RateLimited);
	}

	let params = PrintToPdfParams {
		print_background: Some(true),
		paper_width: Some(8.27),
		paper_height: Some(11.69),
		margin_top: Some(0.4),
		margin_bottom: Some(0.4),
		margin_left: Some(0.4),
		margin_right: Some(0.4),
		..Default::default()
	};

	page.save_pdf(params, dest)
		.await
		.map_err(|e| anyhow!("Failed to render {} to PDF: {}", url, e))?;

	let _ = page.close().await;

	Ok(())
}

pub async fn fetch_document(
	client: &reqwest::Client,
	browser: &mut BrowserHandle,
	url: &str,
	dest: &Path,
) -> Result<Fetched> {
	if looks_like_html(url) {
		render_page_pdf(browser, url, dest).await?;
		Ok(Fetched::Rendered)
	} else {
		download_file(client, url, dest).await?;
		Ok(Fetched::Downloaded)
	}
}

// Re-invokes op only while it keeps failing with the distinguished
// rate-limit error: base_delay, then doubled per attempt, no jitter.
// Any other error propagates immediately.
pub async fn with_retry<T, F, Fut>(max_retries: u16, base_delay: Duration, mut op: F) -> Result<T>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let mut attempt: u32 = 0;
	loop {
		match op().await {
			Ok(value) => return Ok(value),
			Err(err) if is_rate_limited(&err) && attempt < u32::from(max_retries) => {
				let delay = base_delay * 2u32.pow(attempt);
				attempt += 1;
				log::warn!(
					"Rate limited, sleeping {:?} before retry {}/{}",
					delay,
					attempt,
					max_retries
				);
				tokio::time::sleep(delay).await;
			}
			Err(err) => return Err(err),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::cell::Cell;
	use wiremock::matchers::{method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	#[tokio::test]
	async fn test_with_retry_gives_up_after_configured_attempts() {
		let calls = Cell::new(0u32);

		let result: Result<()> = with_retry(3, Duration::from_millis(1), || {
			calls.set(calls.get() + 1);
			async { Err(anyhow::Error::new(ScrapeError::RateLimited)) }
		})
		.await;

		let err = result.unwrap_err();
		assert!(is_rate_limited(&err));
		assert_eq!(calls.get(), 4);
	}

	#[tokio::test]
	async fn test_with_retry_does_not_retry_other_errors() {
		let calls = Cell::new(0u32);

		let result: Result<()> = with_retry(3, Duration::from_millis(1), || {
			calls.set(calls.get() + 1);
			async { Err(anyhow!("connection reset")) }
		})
		.await;

		assert!(result.is_err());
		assert_eq!(calls.get(), 1);
	}

	#[tokio::test]
	async fn test_rate_limited_download_retries_then_fails() {
		let server = MockServer::start().await;

		Mock::given(method("GET"))
			.and(path("/decisions/2019/report.pdf"))
			.respond_with(
				ResponseTemplate::new(200).set_body_raw(
					format!("<html><body>{}</body></html>", RATE_LIMIT_MARKER).into_bytes(),
					"text/html; charset=utf-8",
				),
			)
			.expect(3)
			.mount(&server)
			.await;

		let client = reqwest::Client::new();
		let dir = tempfile::tempdir().expect("Failed to create temp dir");
		let dest = dir.path().join("report.pdf");
		let url = format!("{}/decisions/2019/report.pdf", server.uri());

		let result =
			with_retry(2, Duration::from_millis(5), || download_file(&client, &url, &dest)).await;

		let err = result.unwrap_err();
		assert!(is_rate_limited(&err));
		assert!(!dest.exists());
	}

	#[tokio::test]
	async fn test_download_streams_body_to_disk() {
		let server = MockServer::start().await;
		let body: &[u8] = b"%PDF-1.4 fake document body";

		Mock::given(method("GET"))
			.and(path("/docs/report.pdf"))
			.respond_with(
				ResponseTemplate::new(200)
					.insert_header("content-type", "application/pdf")
					.set_body_bytes(body),
			)
			.expect(1)
			.mount(&server)
			.await;

		let client = reqwest::Client::new();
		let dir = tempfile::tempdir().expect("Failed to create temp dir");
		let dest = dir.path().join("report.pdf");
		let url = format!("{}/docs/report.pdf", server.uri());

		download_file(&client, &url, &dest).await.unwrap();

		let written = std::fs::read(&dest).unwrap();
		assert_eq!(written, body);
	}

	#[tokio::test]
	async fn test_download_fails_on_non_success_status() {
		let server = MockServer::start().await;

		Mock::given(method("GET"))
			.and(path("/docs/gone.pdf"))
			.respond_with(ResponseTemplate::new(404))
			.expect(1)
			.mount(&server)
			.await;

		let client = reqwest::Client::new();
		let dir = tempfile::tempdir().expect("Failed to create temp dir");
		let dest = dir.path().join("gone.pdf");
		let url = format!("{}/docs/gone.pdf", server.uri());

		let err = download_file(&client, &url, &dest).await.unwrap_err();
		assert!(!is_rate_limited(&err));
		assert!(!dest.exists());
	}
}
