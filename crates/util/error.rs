//! Error type used throughout the ringd workspace.
//!
//! Mirrors the shape used across the rest of the coordination core: a single
//! flat enum with `err-derive` for boilerplate, a catch-all `Message`
//! variant for ad-hoc context, and an `OkOrMessage` extension trait for
//! turning `Option`s into errors at config/IO boundaries.

use err_derive::Error;

/// The error type returned by ringd's library crates.
#[derive(Debug, Error)]
pub enum Error {
	#[error(display = "IO error: {}", _0)]
	Io(#[error(source)] std::io::Error),

	#[error(display = "JSON error: {}", _0)]
	Json(#[error(source)] serde_json::Error),

	#[error(display = "TOML deserialization error: {}", _0)]
	TomlDe(#[error(source)] toml::de::Error),

	#[error(display = "TOML serialization error: {}", _0)]
	TomlSer(#[error(source)] toml::ser::Error),

	#[error(display = "{}", _0)]
	Message(String),

	/// The epoch log does not contain the requested epoch.
	#[error(display = "epoch {} not found in epoch log", _0)]
	EpochNotFound(u32),

	/// An attempt was made to append an epoch log entry that already
	/// exists with different content (epoch log append is idempotent
	/// only for bit-identical content).
	#[error(display = "epoch {} already exists with different content", _0)]
	EpochConflict(u32),
}

impl From<String> for Error {
	fn from(s: String) -> Error {
		Error::Message(s)
	}
}

impl<'a> From<&'a str> for Error {
	fn from(s: &'a str) -> Error {
		Error::Message(s.to_string())
	}
}

/// Extension trait to convert an `Option<T>` into a `Result<T, Error>`,
/// attaching a message when the value is absent.
pub trait OkOrMessage {
	type S;
	fn ok_or_message<M: Into<String>>(self, message: M) -> Result<Self::S, Error>;
}

impl<S> OkOrMessage for Option<S> {
	type S = S;
	fn ok_or_message<M: Into<String>>(self, message: M) -> Result<S, Error> {
		self.ok_or_else(|| Error::Message(message.into()))
	}
}

impl<S, E> OkOrMessage for Result<S, E> {
	type S = S;
	fn ok_or_message<M: Into<String>>(self, message: M) -> Result<S, Error> {
		self.map_err(|_| Error::Message(message.into()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ok_or_message_on_none() {
		let x: Option<u32> = None;
		let e = x.ok_or_message("missing value").unwrap_err();
		assert_eq!(e.to_string(), "missing value");
	}

	#[test]
	fn ok_or_message_on_some() {
		let x: Option<u32> = Some(42);
		assert_eq!(x.ok_or_message("missing value").unwrap(), 42);
	}
}
