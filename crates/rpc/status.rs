//! Cluster status state machine.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterStatus {
	/// No epoch log yet: waiting for the initial `format` operation.
	WaitFormat,
	/// Returning from a full shutdown: waiting for enough of the previous
	/// epoch's members to rejoin (or a wait-for-join quorum check to pass).
	WaitJoin,
	/// Cluster is fully formed and serving I/O at full redundancy.
	Ok,
	/// Serving I/O in a degraded state: fewer failure zones than the
	/// configured replication factor.
	Halt,
	/// Terminal: the cluster has been shut down.
	Shutdown,
}

impl ClusterStatus {
	/// `sys_can_recover()`: whether recovery (and epoch increment on
	/// membership change) may proceed in this status.
	pub fn can_recover(self) -> bool {
		matches!(self, ClusterStatus::Ok | ClusterStatus::Halt)
	}

	pub fn is_terminal(self) -> bool {
		matches!(self, ClusterStatus::Shutdown)
	}
}

/// `Ok` -> `Halt` after a leave that drops available zones below the
/// configured replication factor, subject to local halt policy
/// (`sys_can_halt()`).
pub fn on_leave_zone_shortage(
	status: ClusterStatus,
	nr_zones: usize,
	nr_copies: usize,
	halt_on_zone_shortage: bool,
) -> ClusterStatus {
	if status == ClusterStatus::Ok && nr_zones < nr_copies && halt_on_zone_shortage {
		ClusterStatus::Halt
	} else {
		status
	}
}

/// `Halt` -> `Ok` once a join restores enough failure zones.
pub fn on_join_zone_recovery(
	status: ClusterStatus,
	nr_zones: usize,
	nr_copies: usize,
) -> ClusterStatus {
	if status == ClusterStatus::Halt && nr_zones >= nr_copies {
		ClusterStatus::Ok
	} else {
		status
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn can_recover_only_in_ok_or_halt() {
		assert!(ClusterStatus::Ok.can_recover());
		assert!(ClusterStatus::Halt.can_recover());
		assert!(!ClusterStatus::WaitFormat.can_recover());
		assert!(!ClusterStatus::WaitJoin.can_recover());
		assert!(!ClusterStatus::Shutdown.can_recover());
	}

	#[test]
	fn leave_halts_on_zone_shortage() {
		let s = on_leave_zone_shortage(ClusterStatus::Ok, 2, 3, true);
		assert_eq!(s, ClusterStatus::Halt);
	}

	#[test]
	fn leave_does_not_halt_when_policy_disallows() {
		let s = on_leave_zone_shortage(ClusterStatus::Ok, 2, 3, false);
		assert_eq!(s, ClusterStatus::Ok);
	}

	#[test]
	fn join_recovers_from_halt_once_zones_restored() {
		let s = on_join_zone_recovery(ClusterStatus::Halt, 3, 3);
		assert_eq!(s, ClusterStatus::Ok);
	}

	#[test]
	fn join_keeps_halt_while_still_short() {
		let s = on_join_zone_recovery(ClusterStatus::Halt, 2, 3);
		assert_eq!(s, ClusterStatus::Halt);
	}
}
