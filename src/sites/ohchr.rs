use anyhow::Result;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;

use crate::browser::BrowserHandle;
use crate::fetch::derived_filename;
use crate::ledger::{ensure_dir, Ledger};
use crate::sites::{
	already_handled, apply_outcomes, download_batch, partition_links, progress_spinner,
	render_batch, title_from_slug, CrawlOpts, DocLink,
};

const LISTING_URL: &str = "https://www.ohchr.org/en/documents";
const DEFAULT_CATEGORY: &str = "publication";

// Pager loop guard.
const MAX_PAGES: u16 = 500;
const PAGE_DELAY: Duration = Duration::from_millis(1000);

// OHCHR Listing Selectors
static ROW_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("div.views-row").unwrap());
static TITLE_LINK_SELECTOR: Lazy<Selector> =
	Lazy::new(|| Selector::parse("div.views-field-title a").unwrap());
static TYPE_SELECTOR: Lazy<Selector> =
	Lazy::new(|| Selector::parse("div.views-field-field-document-type").unwrap());
static NEXT_PAGE_SELECTOR: Lazy<Selector> =
	Lazy::new(|| Selector::parse("li.pager__item--next a").unwrap());

fn extract_text(element: ElementRef, selector: &Selector) -> Option<String> {
	element
		.select(selector)
		.next()?
		.text()
		.collect::<Vec<_>>()
		.join("")
		.trim()
		.to_string()
		.into()
}

fn absolute(href: &str) -> String {
	if href.starts_with("http") {
		href.to_string()
	} else {
		format!("https://www.ohchr.org{}", href)
	}
}

// One listing page: document rows plus the pager's next link, if any.
fn parse_listing(document: &Html) -> (Vec<DocLink>, Option<String>) {
	let mut links: Vec<DocLink> = Vec::new();

	for row in document.select(&ROW_SELECTOR) {
		let link = match row.select(&TITLE_LINK_SELECTOR).next() {
			Some(link) => link,
			None => continue,
		};

		let href = link.value().attr("href").unwrap_or("");
		if href.is_empty() {
			continue;
		}

		let url = absolute(href);

		let title_text = link.text().collect::<Vec<_>>().join("");
		let title = if title_text.trim().is_empty() {
			title_from_slug(&url)
		} else {
			title_text.trim().to_string()
		};

		let category = extract_text(row, &TYPE_SELECTOR)
			.filter(|text| !text.is_empty())
			.unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

		if !links.iter().any(|existing| existing.url == url) {
			links.push(DocLink { url, title, category });
		}
	}

	let next = document
		.select(&NEXT_PAGE_SELECTOR)
		.next()
		.and_then(|link| link.value().attr("href"))
		.map(|href| href.to_string());

	(links, next)
}

pub async fn run(
	client: &reqwest::Client,
	browser: &mut BrowserHandle,
	ledger: &mut Ledger,
	failures: &mut Ledger,
	opts: &CrawlOpts,
) -> Result<()> {
	let site_dir = opts.data_dir.join("ohchr");
	ensure_dir(&site_dir)?;

	let pb = progress_spinner("Fetching OHCHR documents".to_string());

	let mut page_url = LISTING_URL.to_string();
	let mut pages: u16 = 0;

	loop {
		log::debug!("Listing page: {}", page_url);

		let html = browser.page_content(&page_url).await?;
		let (links, next) = {
			let document = Html::parse_document(&html);
			parse_listing(&document)
		};

		if links.is_empty() {
			log::warn!("No document rows found on {}", page_url);
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

		pages += 1;
		match next {
			Some(href) if pages < MAX_PAGES => {
				page_url = absolute(&href);
				tokio::time::sleep(PAGE_DELAY).await;
			}
			_ => break,
		}
	}

	pb.finish_with_message("OHCHR documents done");
	log::info!(
		"OHCHR: {} documents recorded, {} failures",
		ledger.len(),
		failures.len()
	);

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	const LISTING_FIXTURE: &str = r#"
		<div class="view-content">
			<div class="views-row">
				<div class="views-field-title">
					<a href="/sites/default/files/documents/a-78-123.pdf">Annual report A/78/123</a>
				</div>
				<div class="views-field-field-document-type">Annual reports</div>
			</div>
			<div class="views-row">
				<div class="views-field-title">
					<a href="/en/documents/thematic-reports/right-to-food">Right to food</a>
				</div>
			</div>
			<div class="views-row">
				<div class="views-field-title">
					<a href="/sites/default/files/documents/a-78-123.pdf">Annual report A/78/123 (duplicate)</a>
				</div>
			</div>
		</div>
		<ul class="pager__items">
			<li class="pager__item--next"><a href="/en/documents?page=1">Next</a></li>
		</ul>
	"#;

	#[test]
	fn test_parse_listing_rows_and_pager() {
		let document = Html::parse_document(LISTING_FIXTURE);
		let (links, next) = parse_listing(&document);

		assert_eq!(links.len(), 2);

		assert_eq!(
			links[0].url,
			"https://www.ohchr.org/sites/default/files/documents/a-78-123.pdf"
		);
		assert_eq!(links[0].title, "Annual report A/78/123");
		assert_eq!(links[0].category, "Annual reports");

		assert_eq!(
			links[1].url,
			"https://www.ohchr.org/en/documents/thematic-reports/right-to-food"
		);
		assert_eq!(links[1].category, DEFAULT_CATEGORY);

		assert_eq!(next.as_deref(), Some("/en/documents?page=1"));
	}

	#[test]
	fn test_parse_listing_without_pager_ends_pagination() {
		let document = Html::parse_document("<div class=\"view-content\"></div>");
		let (links, next) = parse_listing(&document);

		assert!(links.is_empty());
		assert!(next.is_none());
	}
}
