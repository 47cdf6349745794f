pub mod achpr;
pub mod oas;
pub mod ohchr;

use anyhow::Result;
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::browser::BrowserHandle;
use crate::fetch::{self, derived_filename, download_file, fetch_document, is_rate_limited};
use crate::ledger::{DocRecord, Ledger};

const RENDER_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct DocLink {
	pub url: String,
	pub title: String,
	pub category: String,
}

#[derive(Debug, Clone)]
pub struct CrawlOpts {
	pub data_dir: std::path::PathBuf,
	pub limit: u16,
	pub retries: u16,
	pub start: u16,
	pub end: u16,
}

pub fn progress_spinner(message: String) -> ProgressBar {
	let pb = ProgressBar::new_spinner();
	pb.set_style(
		ProgressStyle::default_bar()
			.template("{msg} {spinner:.green} {pos:>7}")
			.expect("Failed to set progress bar style.")
			.progress_chars("=> "),
	);
	pb.set_message(message);
	pb
}

pub fn progress_bar(message: String) -> ProgressBar {
	let pb = ProgressBar::new(0);
	pb.set_style(
		ProgressStyle::default_bar()
			.template("{msg} {spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} ({eta_precise})")
			.expect("Failed to set progress bar style.")
			.progress_chars("##-"),
	);
	pb.set_message(message);
	pb
}

// The skip decision: a key already downloaded (ledger entry + file on disk)
// or already recorded as failed is never fetched again. Re-running against
// unchanged ledgers and files performs zero network downloads.
pub fn already_handled(ledger: &Ledger, failures: &Ledger, key: &str, dir: &Path) -> bool {
	ledger.is_downloaded(key, dir) || failures.contains(key)
}

pub fn title_from_slug(url: &str) -> String {
	let url = url.split_once('?').map_or(url, |(base, _)| base);
	let url = url.split_once('#').map_or(url, |(base, _)| base);
	let segment = url.rsplit('/').next().unwrap_or("");
	let stem = segment.rsplit_once('.').map_or(segment, |(stem, _)| stem);
	let spaced = stem.replace('-', " ").replace('_', " ");

	titlecase::titlecase(spaced.trim())
}

#[test]
fn test_title_from_slug() {
	const TEST_URLS: [(&str, &str); 4] = [
		(
			"https://achpr.au.int/files/nigeria-state-report.pdf",
			"Nigeria State Report",
		),
		(
			"https://example.org/docs/annual_report_2020.pdf",
			"Annual Report 2020",
		),
		("https://example.org/en/periodic-reports", "Periodic Reports"),
		("https://example.org/files/merits.pdf?lang=en", "Merits"),
	];

	for (input, expected) in TEST_URLS {
		let result = title_from_slug(input);
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

// Direct downloads for one listing page, fanned out behind a semaphore.
// A rate-limited item aborts the whole batch so the caller can back off;
// every other failure becomes a failure-ledger outcome.
pub async fn download_batch(
	client: &reqwest::Client,
	links: &[DocLink],
	dir: &Path,
	limit: u16,
	pb: &ProgressBar,
) -> Result<Vec<(String, DocRecord)>> {
	let semaphore = Arc::new(Semaphore::new(limit.into()));
	let mut futures = FuturesUnordered::new();

	for link in links {
		let semaphore = Arc::clone(&semaphore);
		let link = link.clone();
		let key = derived_filename(&link.url);
		let dest = dir.join(&key);
		let pb = pb.clone();

		futures.push(Box::pin(async move {
			let _permit = semaphore
				.acquire()
				.await
				.expect("Failed to acquire semaphore");

			let result = download_file(client, &link.url, &dest).await;
			pb.inc(1);
			(key, link, result)
		}));
	}

	let results = futures.collect::<Vec<_>>().await;

	let mut outcomes = Vec::new();
	for (key, link, result) in results {
		match result {
			Ok(()) => {
				log::debug!("Downloaded {} -> {}", link.url, key);
				outcomes.push((
					key,
					DocRecord {
						url: link.url,
						title: link.title,
						category: link.category,
						error: None,
					},
				));
			}
			Err(err) if is_rate_limited(&err) => return Err(err),
			Err(err) => {
				log::error!("Failed to download {}: {}", link.url, err);
				outcomes.push((
					key,
					DocRecord {
						url: link.url,
						title: link.title,
						category: link.category,
						error: Some(err.to_string()),
					},
				));
			}
		}
	}

	Ok(outcomes)
}

// HTML resources are rendered one at a time; the browser connection is a
// single CDP session and the print jobs are not worth parallelizing.
pub async fn render_batch(
	client: &reqwest::Client,
	browser: &mut BrowserHandle,
	links: &[DocLink],
	dir: &Path,
	pb: &ProgressBar,
) -> Result<Vec<(String, DocRecord)>> {
	let mut outcomes = Vec::new();

	for link in links {
		let key = derived_filename(&link.url);
		let dest = dir.join(&key);

		let result = fetch_document(client, browser, &link.url, &dest).await;
		pb.inc(1);

		match result {
			Ok(fetched) => {
				log::debug!("{:?} {} -> {}", fetched, link.url, key);
				outcomes.push((
					key,
					DocRecord {
						url: link.url.clone(),
						title: link.title.clone(),
						category: link.category.clone(),
						error: None,
					},
				));
			}
			Err(err) if is_rate_limited(&err) => return Err(err),
			Err(err) => {
				log::error!("Failed to render {}: {}", link.url, err);
				outcomes.push((
					key,
					DocRecord {
						url: link.url.clone(),
						title: link.title.clone(),
						category: link.category.clone(),
						error: Some(err.to_string()),
					},
				));
			}
		}

		tokio::time::sleep(RENDER_DELAY).await;
	}

	Ok(outcomes)
}

// Successes into the download ledger, failures into the failure ledger,
// whole file rewritten after each record.
pub async fn apply_outcomes(
	outcomes: Vec<(String, DocRecord)>,
	ledger: &mut Ledger,
	failures: &mut Ledger,
) -> Result<(usize, usize)> {
	let mut downloaded = 0;
	let mut failed = 0;

	for (key, record) in outcomes {
		if record.error.is_some() {
			failures.record(&key, record);
			failures.save().await?;
			failed += 1;
		} else {
			ledger.record(&key, record);
			ledger.save().await?;
			downloaded += 1;
		}
	}

	Ok((downloaded, failed))
}

pub fn partition_links(links: Vec<DocLink>) -> (Vec<DocLink>, Vec<DocLink>) {
	links
		.into_iter()
		.partition(|link| !fetch::looks_like_html(&link.url))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn link(url: &str) -> DocLink {
		DocLink {
			url: url.to_string(),
			title: "Annual Report".to_string(),
			category: "report".to_string(),
		}
	}

	#[tokio::test]
	async fn test_already_handled_skip_decision() {
		let dir = tempfile::tempdir().expect("Failed to create temp dir");

		let mut ledger = Ledger::load(dir.path().join("downloads.json")).await.unwrap();
		let mut failures = Ledger::load(dir.path().join("failures.json")).await.unwrap();

		let record = DocRecord {
			url: "https://example.org/files/report.pdf".to_string(),
			title: "Annual Report".to_string(),
			category: "report".to_string(),
			error: None,
		};

		// Neither ledger knows the key: fetch it.
		assert!(!already_handled(&ledger, &failures, "report.pdf", dir.path()));

		// Recorded but the file is gone: fetch it again.
		ledger.record("report.pdf", record.clone());
		assert!(!already_handled(&ledger, &failures, "report.pdf", dir.path()));

		// Recorded and present on disk: skip.
		std::fs::write(dir.path().join("report.pdf"), b"%PDF-1.4").unwrap();
		assert!(already_handled(&ledger, &failures, "report.pdf", dir.path()));

		// A recorded failure is skipped too, so re-runs stay offline.
		failures.record("broken.pdf", record);
		assert!(already_handled(&ledger, &failures, "broken.pdf", dir.path()));
	}

	#[tokio::test]
	async fn test_apply_outcomes_splits_ledgers() {
		let dir = tempfile::tempdir().expect("Failed to create temp dir");

		let mut ledger = Ledger::load(dir.path().join("downloads.json")).await.unwrap();
		let mut failures = Ledger::load(dir.path().join("failures.json")).await.unwrap();

		let good = link("https://example.org/files/good.pdf");
		let bad = link("https://example.org/files/bad.pdf");

		let outcomes = vec![
			(
				"good.pdf".to_string(),
				DocRecord {
					url: good.url,
					title: good.title,
					category: good.category,
					error: None,
				},
			),
			(
				"bad.pdf".to_string(),
				DocRecord {
					url: bad.url,
					title: bad.title,
					category: bad.category,
					error: Some("Unexpected status 500".to_string()),
				},
			),
		];

		let (downloaded, failed) = apply_outcomes(outcomes, &mut ledger, &mut failures)
			.await
			.unwrap();

		assert_eq!(downloaded, 1);
		assert_eq!(failed, 1);
		assert!(ledger.contains("good.pdf"));
		assert!(!ledger.contains("bad.pdf"));
		assert!(failures.contains("bad.pdf"));
		assert!(dir.path().join("downloads.json").exists());
		assert!(dir.path().join("failures.json").exists());
	}

	#[test]
	fn test_partition_links_splits_on_extension() {
		let links = vec![
			link("https://example.org/files/report.pdf"),
			link("https://example.org/en/documents/annual-reports"),
			link("https://example.org/files/statement.doc"),
		];

		let (direct, render) = partition_links(links);
		assert_eq!(direct.len(), 2);
		assert_eq!(render.len(), 1);
	}
}
