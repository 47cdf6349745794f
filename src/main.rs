mod browser;
mod fetch;
mod ledger;
mod sites;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::browser::BrowserHandle;
use crate::ledger::{ensure_dir, Ledger};
use crate::sites::CrawlOpts;

#[derive(Parser, Debug)]
#[clap(about, version, author)]
struct Args {
	#[arg(long, default_value_t = 2000)]
	start: u16,

	#[arg(long, default_value_t = 2025)]
	end: u16,

	#[arg(short, long, default_value_t = 4)]
	limit: u16,

	#[arg(short, long, default_value_t = 5)]
	retries: u16,

	#[arg(long, default_value = "data")]
	data_dir: PathBuf,

	#[clap(long)]
	ohchr: bool,

	#[clap(long)]
	oas: bool,

	#[clap(long)]
	achpr: bool,
}

// Main Function
#[tokio::main]
async fn main() -> Result<()> {
	if pretty_env_logger::try_init().is_err() {
		log::warn!("Logger is already initialized.");
	}

	let args = Args::parse();

	if !(args.ohchr || args.oas || args.achpr) {
		log::warn!("Nothing to do; pass --ohchr, --oas and/or --achpr");
		return Ok(());
	}

	let opts = CrawlOpts {
		data_dir: args.data_dir.clone(),
		limit: args.limit,
		retries: args.retries,
		start: args.start,
		end: args.end,
	};

	ensure_dir(&opts.data_dir)?;

	let client = reqwest::Client::builder()
		.user_agent("reqwest/0.12.3 (rust)")
		.timeout(Duration::from_secs(120))
		.build()?;

	let mut browser = BrowserHandle::new();

	if args.ohchr {
		let mut ledger = Ledger::load(opts.data_dir.join("ohchr_downloads.json")).await?;
		let mut failures = Ledger::load(opts.data_dir.join("ohchr_failures.json")).await?;

		if let Err(e) =
			sites::ohchr::run(&client, &mut browser, &mut ledger, &mut failures, &opts).await
		{
			log::error!("OHCHR crawl aborted: {:?}", e);
		}
	}

	if args.oas {
		let mut ledger = Ledger::load(opts.data_dir.join("oas_downloads.json")).await?;
		let mut failures = Ledger::load(opts.data_dir.join("oas_failures.json")).await?;

		if let Err(e) = sites::oas::run(&client, &mut ledger, &mut failures, &opts).await {
			log::error!("OAS crawl aborted: {:?}", e);
		}
	}

	if args.achpr {
		let mut ledger = Ledger::load(opts.data_dir.join("achpr_downloads.json")).await?;
		let mut failures = Ledger::load(opts.data_dir.join("achpr_failures.json")).await?;

		if let Err(e) =
			sites::achpr::run(&client, &mut browser, &mut ledger, &mut failures, &opts).await
		{
			log::error!("ACHPR crawl aborted: {:?}", e);
		}
	}

	browser.close().await;

	Ok(())
}
