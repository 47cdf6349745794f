use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DocRecord {
	pub url: String,
	pub title: String,
	pub category: String,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

// Keyed by derived filename so the ledger key doubles as the on-disk name.
// BTreeMap keeps the persisted JSON sorted between runs.
#[derive(Debug)]
pub struct Ledger {
	path: PathBuf,
	records: BTreeMap<String, DocRecord>,
}

impl Ledger {
	pub async fn load(path: PathBuf) -> Result<Self> {
		let records = match tokio::fs::read_to_string(&path).await {
			Ok(contents) => serde_json::from_str(&contents)
				.with_context(|| format!("Failed to parse ledger: {}", path.display()))?,
			Err(_) => BTreeMap::new(),
		};

		Ok(Self { path, records })
	}

	// Rewrites the whole file. Last write wins; there is no transaction
	// between a downloaded file appearing on disk and its ledger entry.
	pub async fn save(&self) -> Result<()> {
		let file = File::create(&self.path)
			.with_context(|| format!("Failed to write ledger: {}", self.path.display()))?;
		serde_json::to_writer_pretty(file, &self.records)?;

		Ok(())
	}

	pub fn record(&mut self, key: &str, record: DocRecord) {
		self.records.insert(key.to_string(), record);
	}

	pub fn contains(&self, key: &str) -> bool {
		self.records.contains_key(key)
	}

	pub fn is_downloaded(&self, key: &str, dir: &Path) -> bool {
		self.contains(key) && dir.join(key).exists()
	}

	pub fn len(&self) -> usize {
		self.records.len()
	}
}

pub fn ensure_dir(path: &Path) -> Result<()> {
	std::fs::create_dir_all(path)
		.with_context(|| format!("Failed to create directory: {}", path.display()))?;
	Ok(())
}
