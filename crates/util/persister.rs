//! Small on-disk persister for JSON-serializable structures: construct with
//! `Persister::new(&metadata_dir, "name")`, read with `.load()`, write with
//! `.save_async()`.

use std::marker::PhantomData;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Error;

pub struct Persister<T> {
	path: PathBuf,
	_marker: PhantomData<T>,
}

impl<T> Persister<T>
where
	T: Serialize + DeserializeOwned,
{
	pub fn new(base_dir: &std::path::Path, name: &str) -> Self {
		let mut path = base_dir.to_path_buf();
		path.push(format!("{}.json", name));
		Self {
			path,
			_marker: PhantomData,
		}
	}

	/// Load the persisted value, blocking. Used at startup before the async
	/// runtime is driving any I/O that would need to interleave with it.
	pub fn load(&self) -> Result<T, Error> {
		let data = std::fs::read(&self.path)?;
		Ok(serde_json::from_slice(&data)?)
	}

	pub async fn load_async(&self) -> Result<T, Error> {
		let data = tokio::fs::read(&self.path).await?;
		Ok(serde_json::from_slice(&data)?)
	}

	pub async fn save_async(&self, value: &T) -> Result<(), Error> {
		let data = serde_json::to_vec_pretty(value)?;
		if let Some(parent) = self.path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		let tmp_path = self.path.with_extension("json.tmp");
		tokio::fs::write(&tmp_path, &data).await?;
		tokio::fs::rename(&tmp_path, &self.path).await?;
		Ok(())
	}

	pub fn save(&self, value: &T) -> Result<(), Error> {
		let data = serde_json::to_vec_pretty(value)?;
		if let Some(parent) = self.path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		let tmp_path = self.path.with_extension("json.tmp");
		std::fs::write(&tmp_path, &data)?;
		std::fs::rename(&tmp_path, &self.path)?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde::Deserialize;

	#[derive(Serialize, Deserialize, PartialEq, Debug)]
	struct Sample {
		a: u32,
		b: String,
	}

	#[test]
	fn save_then_load_roundtrips() {
		let dir = mktemp::Temp::new_dir().unwrap();
		let p: Persister<Sample> = Persister::new(dir.as_path(), "sample");
		let value = Sample {
			a: 42,
			b: "hello".into(),
		};
		p.save(&value).unwrap();
		let loaded = p.load().unwrap();
		assert_eq!(loaded, value);
	}

	#[test]
	fn load_missing_file_errors() {
		let dir = mktemp::Temp::new_dir().unwrap();
		let p: Persister<Sample> = Persister::new(dir.as_path(), "missing");
		assert!(p.load().is_err());
	}
}
