use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use regex::RegexSet;
use scraper::{Html, Selector};
use std::time::Duration;

use crate::browser::BrowserHandle;
use crate::fetch::{derived_filename, ScrapeError};
use crate::ledger::{ensure_dir, Ledger};
use crate::sites::{
	already_handled, apply_outcomes, download_batch, partition_links, progress_spinner,
	render_batch, title_from_slug, CrawlOpts, DocLink,
};

const LISTING_URL: &str = "https://achpr.au.int/en/state-reports";
const CATEGORY: &str = "state-report";

const MAX_PAGES: u16 = 200;
const PAGE_DELAY: Duration = Duration::from_millis(1000);

// ACHPR Listing Selectors
static ROW_SELECTOR: Lazy<Selector> =
	Lazy::new(|| Selector::parse("div.view-content div.views-row").unwrap());
static LINK_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a").unwrap());

static EXCLUDE_SET: Lazy<RegexSet> = Lazy::new(|| {
	RegexSet::new([
		r"(?i)^javascript:",
		r"(?i)^mailto:",
		r"^#",
		r"(?i)/user/",
		r"(?i)/taxonomy/",
	])
	.unwrap()
});

fn absolute(href: &str) -> String {
	if href.starts_with("http") {
		href.to_string()
	} else {
		format!("https://achpr.au.int{}", href)
	}
}

fn parse_listing(document: &Html) -> Vec<DocLink> {
	let mut links: Vec<DocLink> = Vec::new();

	for row in document.select(&ROW_SELECTOR) {
		let link = match row.select(&LINK_SELECTOR).next() {
			Some(link) => link,
			None => continue,
		};

		let href = link.value().attr("href").unwrap_or("");
		if href.is_empty() || EXCLUDE_SET.is_match(href) {
			continue;
		}

		let url = absolute(href);

		let text = link.text().collect::<Vec<_>>().join("");
		let text = text.trim();
		let title = if text.len() > 1 {
			text.to_string()
		} else {
			title_from_slug(&url)
		};

		if !links.iter().any(|existing| existing.url == url) {
			links.push(DocLink {
				url,
				title,
				category: CATEGORY.to_string(),
			});
		}
	}

	links
}

// 404 ends the pagination rather than failing the crawl.
async fn request_listing(client: &reqwest::Client, url: &str) -> Result<Option<String>> {
	let response = client.get(url).send().await?;
	let status = response.status();

	log::debug!("Received status {} from {}", status, url);

	if status == reqwest::StatusCode::NOT_FOUND {
		return Ok(None);
	}
	if !status.is_success() {
		bail!(ScrapeError::HttpStatus(status.as_u16(), url.to_string()));
	}

	Ok(Some(response.text().await?))
}

pub async fn run(
	client: &reqwest::Client,
	browser: &mut BrowserHandle,
	ledger: &mut Ledger,
	failures: &mut Ledger,
	opts: &CrawlOpts,
) -> Result<()> {
	let site_dir = opts.data_dir.join("achpr");
	ensure_dir(&site_dir)?;

	let pb = progress_spinner("Fetching ACHPR state reports".to_string());

	for page in 0..MAX_PAGES {
		let url = if page == 0 {
			LISTING_URL.to_string()
		} else {
			format!("{}?page={}", LISTING_URL, page)
		};

		log::debug!("Listing page: {}", url);

		let body = match request_listing(client, &url).await? {
			Some(body) => body,
			None => break,
		};

		let links = {
			let document = Html::parse_document(&body);
			parse_listing(&document)
		};

		if links.is_empty() {
			break;
		}

		let fresh: Vec<DocLink> = links
			.into_iter()
			.filter(|link| {
				!already_handled(ledger, failures, &derived_filename(&link.url), &site_dir)
			})
			.collect();

		let (direct, render) = partition_links(fresh);

		let mut outcomes = download_batch(client, &direct, &site_dir, opts.limit, &pb).await?;
		outcomes.extend(render_batch(client, browser, &render, &site_dir, &pb).await?);
		apply_outcomes(outcomes, ledger, failures).await?;

		tokio::time::sleep(PAGE_DELAY).await;
	}

	pb.finish_with_message("ACHPR state reports done");
	log::info!(
		"ACHPR: {} documents recorded, {} failures",
		ledger.len(),
		failures.len()
	);

	Ok(())
}
