use clap::Parser;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

#[derive(Parser, Debug)]
#[clap(about, version, author)]
struct Args {
	#[arg(long, required = true)]
	file: String,

	#[arg(long, default_value = "category")]
	field: String,
}

pub trait SortableField {
	fn get_field(&self, field: &str) -> Cow<str>;
}

#[derive(Serialize, Deserialize, Debug)]
struct DocRecord {
	url: String,
	title: String,
	category: String,

	#[serde(skip_serializing_if = "Option::is_none")]
	error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
struct LedgerEntry {
	filename: String,
	url: String,
	title: String,
	category: String,

	#[serde(skip_serializing_if = "Option::is_none")]
	error: Option<String>,
}

impl SortableField for LedgerEntry {
	fn get_field(&self, field: &str) -> Cow<str> {
		match field {
			"filename" => Cow::Borrowed(&self.filename),
			"url" => Cow::Borrowed(&self.url),
			"title" => Cow::Borrowed(&self.title),
			"category" => Cow::Borrowed(&self.category),
			"error" => Cow::Owned(self.error.clone().unwrap_or_default()),
			_ => panic!("Invalid field: {}", field),
		}
	}
}

pub fn sort<T: SortableField>(entries: &mut [T], sort_field: &str) {
	entries.sort_by(|a, b| {
		let a_field = a.get_field(sort_field);
		let b_field = b.get_field(sort_field);

		a_field.cmp(&b_field)
	});
}

fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	let contents = std::fs::read_to_string(&args.file)?;
	let records: BTreeMap<String, DocRecord> = serde_json::from_str(&contents)?;

	let mut entries: Vec<LedgerEntry> = records
		.into_iter()
		.map(|(filename, record)| LedgerEntry {
			filename,
			url: record.url,
			title: record.title,
			category: record.category,
			error: record.error,
		})
		.collect();

	sort(&mut entries, &args.field);

	serde_json::to_writer_pretty(std::io::stdout(), &entries)?;
	println!();

	Ok(())
}

#[test]
fn test_sort_by_field() {
	let mut entries = vec![
		LedgerEntry {
			filename: "b.pdf".to_string(),
			url: "https://example.org/b.pdf".to_string(),
			title: "Zimbabwe Report".to_string(),
			category: "merits".to_string(),
			error: None,
		},
		LedgerEntry {
			filename: "a.pdf".to_string(),
			url: "https://example.org/a.pdf".to_string(),
			title: "Angola Report".to_string(),
			category: "admissibility".to_string(),
			error: None,
		},
	];

	sort(&mut entries, "title");
	assert_eq!(entries[0].filename, "a.pdf");

	sort(&mut entries, "category");
	assert_eq!(entries[0].category, "admissibility");
}
