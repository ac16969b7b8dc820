//! Time helpers used for node status timestamps and cluster identity.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time in milliseconds since the Unix epoch.
pub fn now_msec() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("system clock is before the Unix epoch")
		.as_millis() as u64
}

/// Cluster creation time (`ctime`), generated once when a cluster is first
/// formatted and carried verbatim in every epoch log entry thereafter.
pub fn new_ctime() -> u64 {
	now_msec()
}
