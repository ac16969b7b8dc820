//! Epoch log: an append-only on-disk log mapping epoch number to
//! the sorted member list and cluster birth time in effect at that epoch.
//!
//! One file per epoch under `<metadata_dir>/epoch/`, stored through the same
//! small `Persister` pattern used for every other piece of persisted state
//! in the system.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use ringd_util::error::Error;

use crate::node::Node;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EpochEntry {
	pub ctime: u64,
	pub members: Vec<Node>,
}

/// Append-only epoch log. Reads are by epoch number; appending an epoch that
/// already exists is an error unless the content is bit-identical.
pub struct EpochLog {
	dir: PathBuf,
}

impl EpochLog {
	pub fn new(metadata_dir: &Path) -> Self {
		let mut dir = metadata_dir.to_path_buf();
		dir.push("epoch");
		EpochLog { dir }
	}

	fn path(&self, epoch: u32) -> PathBuf {
		self.dir.join(format!("{:010}.json", epoch))
	}

	pub fn read(&self, epoch: u32) -> Result<EpochEntry, Error> {
		let data = std::fs::read(self.path(epoch)).map_err(|_| Error::EpochNotFound(epoch))?;
		Ok(serde_json::from_slice(&data)?)
	}

	/// Latest (highest) epoch present in the log, or 0 if the log is empty.
	pub fn read_latest(&self) -> u32 {
		self.all_epochs().last().copied().unwrap_or(0)
	}

	fn all_epochs(&self) -> Vec<u32> {
		let mut epochs: Vec<u32> = match std::fs::read_dir(&self.dir) {
			Ok(entries) => entries
				.filter_map(|e| e.ok())
				.filter_map(|e| {
					e.path()
						.file_stem()
						.and_then(|s| s.to_str())
						.and_then(|s| s.parse::<u32>().ok())
				})
				.collect(),
			Err(_) => Vec::new(),
		};
		epochs.sort_unstable();
		epochs
	}

	/// Whether the log has no entries at all (boundary case: fresh cluster).
	pub fn is_empty(&self) -> bool {
		self.all_epochs().is_empty()
	}

	/// Append an entry for `epoch`. Idempotent: re-appending bit-identical
	/// content for an existing epoch succeeds silently; appending different
	/// content for an existing epoch is an error.
	pub fn append(&self, epoch: u32, ctime: u64, members: Vec<Node>) -> Result<(), Error> {
		let mut members = members;
		members.sort();
		let entry = EpochEntry { ctime, members };

		if let Ok(existing) = self.read(epoch) {
			if existing == entry {
				return Ok(());
			}
			return Err(Error::EpochConflict(epoch));
		}

		std::fs::create_dir_all(&self.dir)?;
		let data = serde_json::to_vec_pretty(&entry)?;
		let tmp = self.path(epoch).with_extension("json.tmp");
		std::fs::write(&tmp, &data)?;
		std::fs::rename(&tmp, self.path(epoch))?;
		Ok(())
	}

	/// Snapshot of the whole log, for tests and diagnostics.
	pub fn dump(&self) -> BTreeMap<u32, EpochEntry> {
		self.all_epochs()
			.into_iter()
			.filter_map(|e| self.read(e).ok().map(|entry| (e, entry)))
			.collect()
	}
}
