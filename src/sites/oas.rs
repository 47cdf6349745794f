use anyhow::{bail, Result};
use indicatif::ProgressBar;
use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};
use scraper::{Html, Selector};
use std::time::Duration;

use crate::fetch::{
	derived_filename, looks_like_html, with_retry, ScrapeError, RATE_LIMIT_MARKER,
};
use crate::ledger::{ensure_dir, DocRecord, Ledger};
use crate::sites::{
	already_handled, apply_outcomes, download_batch, progress_bar, title_from_slug, CrawlOpts,
	DocLink,
};

// IACHR publishes its decisions per year and section; the same listing
// template is reused for every section.
const SECTIONS: [(&str, &str); 2] = [
	("merits", "https://www.oas.org/en/iachr/decisions/merits.asp"),
	(
		"admissibility",
		"https://www.oas.org/en/iachr/decisions/admissibility.asp",
	),
];

// www.oas.org throttles aggressively; back off a long time before retrying.
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(30);
const SECTION_DELAY: Duration = Duration::from_millis(500);

static DOC_LINK_SELECTOR: Lazy<Selector> =
	Lazy::new(|| Selector::parse("table a, p a").unwrap());
static YEAR_DIR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/((?:19|20)\d{2})/").unwrap());
static EXCLUDE_SET: Lazy<RegexSet> = Lazy::new(|| {
	RegexSet::new([
		r"(?i)^javascript:",
		r"(?i)^mailto:",
		r"^#",
		r"(?i)default\.asp",
	])
	.unwrap()
});

fn absolute(href: &str) -> String {
	if href.starts_with("http") {
		href.to_string()
	} else {
		format!("https://www.oas.org{}", href)
	}
}

// Document anchors for one year. The archive page lists several years at
// once, so hrefs carrying a different year directory are dropped.
fn parse_section(document: &Html, year: u16, section: &str) -> Vec<DocLink> {
	let mut links: Vec<DocLink> = Vec::new();

	for element in document.select(&DOC_LINK_SELECTOR) {
		let href = element.value().attr("href").unwrap_or("");
		if href.is_empty() || EXCLUDE_SET.is_match(href) {
			continue;
		}

		// Only direct documents live on these pages.
		if looks_like_html(href) {
			continue;
		}

		if let Some(caps) = YEAR_DIR_RE.captures(href) {
			if caps[1].parse::<u16>().ok() != Some(year) {
				continue;
			}
		}

		let text = element.text().collect::<Vec<_>>().join("");
		let text = text.trim();
		let title = if text.len() > 3 {
			text.to_string()
		} else {
			title_from_slug(href)
		};

		let url = absolute(href);
		if !links.iter().any(|existing| existing.url == url) {
			links.push(DocLink {
				url,
				title,
				category: section.to_string(),
			});
		}
	}

	links
}

async fn fetch_section_listing(client: &reqwest::Client, url: &str) -> Result<String> {
	let response = client.get(url).send().await?;
	let status = response.status();

	log::debug!("Received status {} from {}", status, url);

	if !status.is_success() {
		bail!(ScrapeError::HttpStatus(status.as_u16(), url.to_string()));
	}

	let body = response.text().await?;
	if body.contains(RATE_LIMIT_MARKER) {
		bail!(ScrapeError::RateLimited);
	}

	Ok(body)
}

// One year of one section. Reads the ledgers but does not write them:
// outcomes flow back to the caller, so a rate-limited attempt can be
// re-run wholesale by the retry wrapper.
async fn crawl_section(
	client: &reqwest::Client,
	ledger: &Ledger,
	failures: &Ledger,
	opts: &CrawlOpts,
	year: u16,
	section: (&str, &str),
	pb: &ProgressBar,
) -> Result<Vec<(String, DocRecord)>> {
	let (section_name, base) = section;
	let site_dir = opts.data_dir.join("oas");

	let listing_url = format!("{}?Year={}", base, year);
	let body = fetch_section_listing(client, &listing_url).await?;

	let links = {
		let document = Html::parse_document(&body);
		parse_section(&document, year, section_name)
	};

	let fresh: Vec<DocLink> = links
		.into_iter()
		.filter(|link| {
			!already_handled(ledger, failures, &derived_filename(&link.url), &site_dir)
		})
		.collect();

	pb.inc_length(fresh.len() as u64);

	download_batch(client, &fresh, &site_dir, opts.limit, pb).await
}

pub async fn run(
	client: &reqwest::Client,
	ledger: &mut Ledger,
	failures: &mut Ledger,
	opts: &CrawlOpts,
) -> Result<()> {
	ensure_dir(&opts.data_dir.join("oas"))?;

	let pb = progress_bar("Fetching IACHR decisions".to_string());

	for year in opts.start..=opts.end {
		for (section_name, base) in SECTIONS {
			let result = {
				let ledger_view = &*ledger;
				let failures_view = &*failures;
				with_retry(opts.retries, RATE_LIMIT_BACKOFF, || {
					crawl_section(
						client,
						ledger_view,
						failures_view,
						opts,
						year,
						(section_name, base),
						&pb,
					)
				})
				.await
			};

			match result {
				Ok(outcomes) => {
					let (downloaded, failed) =
						apply_outcomes(outcomes, ledger, failures).await?;
					log::debug!(
						"{} {}: {} downloaded, {} failed",
						section_name,
						year,
						downloaded,
						failed
					);
				}
				Err(err) => {
					log::error!(
						"Giving up on {} decisions for {}: {}",
						section_name,
						year,
						err
					);
				}
			}

			tokio::time::sleep(SECTION_DELAY).await;
		}
	}

	pb.finish_with_message("IACHR decisions done");
	log::info!(
		"OAS: {} documents recorded, {} failures",
		ledger.len(),
		failures.len()
	);

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	const SECTION_FIXTURE: &str = r#"
		<table>
			<tr>
				<td><a href="/en/iachr/decisions/2019/ARpe123-19.pdf">Report No. 123/19, Petition 456-11</a></td>
			</tr>
			<tr>
				<td><a href="/en/iachr/decisions/2018/ARco45-18.pdf">Report No. 45/18</a></td>
			</tr>
			<tr>
				<td><a href="/en/iachr/decisions/2019/ARbr9-19.doc">PDF</a></td>
			</tr>
			<tr>
				<td><a href="javascript:history.back()">Back</a></td>
				<td><a href="/en/iachr/decisions/merits.asp?Year=2018">2018</a></td>
			</tr>
		</table>
	"#;

	#[test]
	fn test_parse_section_filters_years_and_nav_links() {
		let document = Html::parse_document(SECTION_FIXTURE);
		let links = parse_section(&document, 2019, "merits");

		assert_eq!(links.len(), 2);

		assert_eq!(
			links[0].url,
			"https://www.oas.org/en/iachr/decisions/2019/ARpe123-19.pdf"
		);
		assert_eq!(links[0].title, "Report No. 123/19, Petition 456-11");
		assert_eq!(links[0].category, "merits");

		// Anchor text "PDF" is useless; the slug supplies the title.
		assert_eq!(
			links[1].url,
			"https://www.oas.org/en/iachr/decisions/2019/ARbr9-19.doc"
		);
		assert_eq!(links[1].title, "ARbr9 19");
	}

	#[test]
	fn test_parse_section_keeps_undated_documents() {
		let fixture = r#"<p><a href="/en/iachr/docs/annual-report.pdf">Annual Report</a></p>"#;
		let document = Html::parse_document(fixture);
		let links = parse_section(&document, 2019, "merits");

		assert_eq!(links.len(), 1);
		assert_eq!(
			links[0].url,
			"https://www.oas.org/en/iachr/docs/annual-report.pdf"
		);
	}
}
