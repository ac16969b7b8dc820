//! Join admission: a pure function from `(local snapshot, join request)` to
//! `(decision, response fields)`, with no hidden global state — this is what
//! makes mastership election and quorum reconstruction fully unit-testable.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use ringd_util::data::NodeId;

use crate::node::Node;
use crate::status::ClusterStatus;

/// Error taxonomy surfaced through join admission, numbered for the wire
/// `result` field (0 is reserved for `Success`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum JoinError {
	VerMismatch = 1,
	InvalidCTime = 2,
	OldNodeVer = 3,
	NewNodeVer = 4,
	InvalidEpoch = 5,
	NotFormatted = 6,
	Shutdown = 7,
}

impl JoinError {
	/// Whether this reason means the peer should retry later rather than
	/// being rejected outright.
	pub fn is_join_later(self) -> bool {
		matches!(self, JoinError::OldNodeVer | JoinError::NewNodeVer)
	}
}

/// Wire `result` code for a decision. `MasterTransfer` carries the same code
/// as `Success` — it is a successful admission that also hands off
/// mastership.
pub fn result_code(decision: JoinDecision) -> u32 {
	match decision {
		JoinDecision::Success | JoinDecision::MasterTransfer => 0,
		JoinDecision::JoinLater(e) | JoinDecision::Fail(e) => e as u32,
	}
}

/// Outcome of admission: a protocol decision, not a Rust error — kept
/// separate from `ringd_util::error::Error` the same way protocol-level
/// status enums stay apart from the I/O error type elsewhere in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinDecision {
	Success,
	JoinLater(JoinError),
	Fail(JoinError),
	/// Local node yields mastership to the candidate.
	MasterTransfer,
}

/// What the local node knows when evaluating a join request.
pub struct LocalView<'a> {
	pub this_node: Node,
	pub proto_ver: u8,
	pub configured_nr_copies: usize,
	pub cluster_flags: u16,
	pub status: ClusterStatus,
	/// `None` before the cluster has ever been formatted.
	pub ctime: Option<u64>,
	pub epoch: u32,
	/// Current member list (not including the candidate).
	pub members: &'a [Node],
	pub leave_set: &'a [Node],
	/// `EpochLog[epoch].members`, if epoch > 0.
	pub epoch_log_members: Option<&'a [Node]>,
	pub store_name: &'a str,
}

/// What the candidate sent in its `JoinMessage`.
#[derive(Debug, Clone)]
pub struct JoinRequest {
	pub candidate: Node,
	pub proto_ver: u8,
	/// `None` when the candidate has no epoch log of its own (brand-new
	/// node).
	pub ctime: Option<u64>,
	pub epoch: u32,
	pub members: Vec<Node>,
}

/// Fields threaded back into the broadcast `JoinMessage`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinResponse {
	pub nr_copies: usize,
	pub cluster_flags: u16,
	pub ctime: u64,
	pub status: ClusterStatus,
	pub epoch: u32,
	pub inc_epoch: bool,
	pub leave_nodes: Vec<Node>,
	pub store_name: String,
}

fn base_response(local: &LocalView) -> JoinResponse {
	JoinResponse {
		nr_copies: local.configured_nr_copies,
		cluster_flags: local.cluster_flags,
		ctime: local.ctime.unwrap_or(0),
		status: local.status,
		epoch: local.epoch,
		inc_epoch: false,
		leave_nodes: Vec::new(),
		store_name: local.store_name.to_string(),
	}
}

fn node_set(nodes: &[Node]) -> HashSet<NodeId> {
	nodes.iter().map(|n| n.id()).collect()
}

/// WaitJoin quorum-reconstruction check: the cluster flips to `Ok` once
/// current members, the candidate, and the leave-set together reconstitute
/// `EpochLog[epoch]`'s member set.
fn resolve_waitjoin(
	current_members: &[Node],
	candidate: Node,
	leave_set: &[Node],
	log_members: &[Node],
) -> bool {
	let mut union = node_set(current_members);
	union.insert(candidate.id());
	for n in leave_set {
		union.insert(n.id());
	}
	union == node_set(log_members)
}

/// Evaluate a join request against the local snapshot.
pub fn evaluate(local: &LocalView, req: &JoinRequest, is_self: bool) -> (JoinDecision, JoinResponse) {
	let mut resp = base_response(local);

	// Rule 1: protocol version.
	if req.proto_ver != local.proto_ver {
		return (JoinDecision::Fail(JoinError::VerMismatch), resp);
	}

	// Rules 2/3: the candidate is myself.
	if is_self {
		return match local.epoch_log_members {
			None => {
				resp.status = ClusterStatus::WaitFormat;
				(JoinDecision::Success, resp)
			}
			Some(log_members) => {
				let (status, inc_epoch) =
					match resolve_waitjoin(local.members, req.candidate, local.leave_set, log_members) {
						true => (ClusterStatus::Ok, true),
						false => (local.status, false),
					};
				resp.status = status;
				resp.inc_epoch = inc_epoch;
				(JoinDecision::Success, resp)
			}
		};
	}

	// Rule 4: sanity-check the candidate's (ctime, epoch, members) against
	// local state, skipped entirely while waiting for format or shut down.
	let skip_sanity = matches!(local.status, ClusterStatus::WaitFormat | ClusterStatus::Shutdown);
	if !skip_sanity && !req.members.is_empty() {
		if let Some(local_ctime) = local.ctime {
			if req.ctime != Some(local_ctime) {
				return (JoinDecision::Fail(JoinError::InvalidCTime), resp);
			}
		}

		if req.epoch > local.epoch {
			// Rule 6: mastership transfer to a higher-epoch candidate
			// reappearing while we're still reconstituting quorum.
			if local.status == ClusterStatus::WaitJoin {
				resp.leave_nodes = local.leave_set.to_vec();
				return (JoinDecision::MasterTransfer, resp);
			}
			return (JoinDecision::JoinLater(JoinError::OldNodeVer), resp);
		}

		if req.epoch < local.epoch && !local.status.can_recover() {
			return (JoinDecision::JoinLater(JoinError::NewNodeVer), resp);
		}

		if req.epoch == local.epoch {
			if let Some(log_members) = local.epoch_log_members {
				if node_set(&req.members) != node_set(log_members) {
					// Two candidates at the same epoch with diverging member
					// sets: deterministic tie-break instead of an outright
					// failure. While reconstituting quorum, yield mastership
					// to whichever node sorts first.
					if local.status == ClusterStatus::WaitJoin && req.candidate < local.this_node {
						resp.leave_nodes = local.leave_set.to_vec();
						return (JoinDecision::MasterTransfer, resp);
					}
					return (JoinDecision::Fail(JoinError::InvalidEpoch), resp);
				}
			}
		}
	}

	// Rule 5: status-dependent admission.
	match local.status {
		ClusterStatus::Ok | ClusterStatus::Halt => {
			resp.inc_epoch = true;
			(JoinDecision::Success, resp)
		}
		ClusterStatus::WaitFormat => {
			if req.members.is_empty() {
				resp.status = ClusterStatus::WaitFormat;
				(JoinDecision::Success, resp)
			} else {
				(JoinDecision::Fail(JoinError::NotFormatted), resp)
			}
		}
		ClusterStatus::WaitJoin => {
			let log_members = local.epoch_log_members.unwrap_or(&[]);
			if resolve_waitjoin(local.members, req.candidate, local.leave_set, log_members) {
				resp.status = ClusterStatus::Ok;
				resp.inc_epoch = true;
				(JoinDecision::Success, resp)
			} else {
				// Quorum isn't reconstituted yet. Still accept, without an
				// epoch bump, as long as the candidate and every member
				// collected so far are legitimate members of this epoch;
				// anyone else is rejected outright rather than silently
				// folded into a WaitJoin cluster it was never part of.
				let log_set = node_set(log_members);
				let candidate_known = log_set.contains(&req.candidate.id());
				let members_known = local.members.iter().all(|m| log_set.contains(&m.id()));
				if candidate_known && members_known {
					resp.leave_nodes = local.leave_set.to_vec();
					(JoinDecision::Success, resp)
				} else {
					(JoinDecision::Fail(JoinError::InvalidEpoch), resp)
				}
			}
		}
		ClusterStatus::Shutdown => (JoinDecision::Fail(JoinError::Shutdown), resp),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::net::SocketAddr;

	fn node(ip: &str, port: u16) -> Node {
		let addr: SocketAddr = format!("{}:{}", ip, port).parse().unwrap();
		Node::new(addr, 0, 4)
	}

	fn base_local<'a>(
		status: ClusterStatus,
		members: &'a [Node],
		leave_set: &'a [Node],
		epoch_log_members: Option<&'a [Node]>,
	) -> LocalView<'a> {
		LocalView {
			this_node: node("10.0.0.1", 7000),
			proto_ver: 1,
			configured_nr_copies: 3,
			cluster_flags: 0,
			status,
			ctime: Some(1000),
			epoch: 5,
			members,
			leave_set,
			epoch_log_members,
			store_name: "ringd",
		}
	}

	#[test]
	fn s1_fresh_cluster_first_node_self_join_is_waitformat() {
		let local = base_local(ClusterStatus::WaitFormat, &[], &[], None);
		let req = JoinRequest {
			candidate: node("10.0.0.1", 7000),
			proto_ver: 1,
			ctime: None,
			epoch: 0,
			members: vec![],
		};
		let (decision, resp) = evaluate(&local, &req, true);
		assert_eq!(decision, JoinDecision::Success);
		assert_eq!(resp.status, ClusterStatus::WaitFormat);
	}

	#[test]
	fn s1_peer_join_after_format_increments_epoch() {
		let n1 = node("10.0.0.1", 7000);
		let members = vec![n1];
		let local = base_local(ClusterStatus::Ok, &members, &[], Some(&members));
		let req = JoinRequest {
			candidate: node("10.0.0.2", 7000),
			proto_ver: 1,
			ctime: Some(1000),
			epoch: 1,
			members: members.clone(),
		};
		let (decision, resp) = evaluate(&local, &req, false);
		assert_eq!(decision, JoinDecision::Success);
		assert!(resp.inc_epoch);
	}

	#[test]
	fn version_mismatch_always_fails() {
		let local = base_local(ClusterStatus::Ok, &[], &[], None);
		let req = JoinRequest {
			candidate: node("10.0.0.2", 7000),
			proto_ver: 99,
			ctime: Some(1000),
			epoch: 0,
			members: vec![],
		};
		let (decision, _) = evaluate(&local, &req, false);
		assert_eq!(decision, JoinDecision::Fail(JoinError::VerMismatch));
	}

	#[test]
	fn invalid_ctime_fails() {
		let n1 = node("10.0.0.1", 7000);
		let members = vec![n1];
		let local = base_local(ClusterStatus::Ok, &members, &[], Some(&members));
		let req = JoinRequest {
			candidate: node("10.0.0.2", 7000),
			proto_ver: 1,
			ctime: Some(9999),
			epoch: 1,
			members: members.clone(),
		};
		let (decision, _) = evaluate(&local, &req, false);
		assert_eq!(decision, JoinDecision::Fail(JoinError::InvalidCTime));
	}

	#[test]
	fn s2_rejoin_after_shutdown_stays_waitjoin_until_quorum() {
		let n1 = node("10.0.0.1", 7000);
		let n2 = node("10.0.0.2", 7000);
		let n3 = node("10.0.0.3", 7000);
		let n4 = node("10.0.0.4", 7000);
		let log_members = vec![n1, n2, n3, n4];

		// N1 self-joins: epoch log nonempty, members=[] so far.
		let local1 = base_local(ClusterStatus::WaitJoin, &[], &[], Some(&log_members));
		let self_req = JoinRequest {
			candidate: n1,
			proto_ver: 1,
			ctime: Some(1000),
			epoch: 5,
			members: log_members.clone(),
		};
		let (d1, r1) = evaluate(&local1, &self_req, true);
		assert_eq!(d1, JoinDecision::Success);
		assert_eq!(r1.status, ClusterStatus::WaitJoin);

		// N2 joins: members=[N1], leave-set={N3} (N4 hasn't reported as left
		// yet), so the union {N1,N2,N3} falls short of the full log set and
		// quorum isn't reconstituted. N2 is still a legitimate prior member
		// and N1 is too, so the second WaitJoin clause accepts it without an
		// epoch bump.
		let members_after_n1 = vec![n1];
		let leave_after_n1 = vec![n3];
		let local2 = base_local(
			ClusterStatus::WaitJoin,
			&members_after_n1,
			&leave_after_n1,
			Some(&log_members),
		);
		let n2_req = JoinRequest {
			candidate: n2,
			proto_ver: 1,
			ctime: Some(1000),
			epoch: 5,
			members: log_members.clone(),
		};
		let (d2, r2) = evaluate(&local2, &n2_req, false);
		assert_eq!(d2, JoinDecision::Success);
		assert_eq!(r2.status, ClusterStatus::WaitJoin);
		assert!(!r2.inc_epoch);
		assert_eq!(r2.leave_nodes, leave_after_n1);

		// N3 joins: members=[N1,N2], leave-set={N4}. Union {N1,N2,N3,N4}
		// reconstitutes the full log set -> quorum complete, flips to Ok.
		let members_after_n2 = vec![n1, n2];
		let leave_after_n2 = vec![n4];
		let local3 = base_local(
			ClusterStatus::WaitJoin,
			&members_after_n2,
			&leave_after_n2,
			Some(&log_members),
		);
		let n3_req = JoinRequest {
			candidate: n3,
			proto_ver: 1,
			ctime: Some(1000),
			epoch: 5,
			members: log_members.clone(),
		};
		let (d3, r3) = evaluate(&local3, &n3_req, false);
		assert_eq!(d3, JoinDecision::Success);
		assert_eq!(r3.status, ClusterStatus::Ok);
		assert!(r3.inc_epoch);
	}

	#[test]
	fn s2_unknown_candidate_rejected_instead_of_joining_waitjoin() {
		// A candidate absent from the epoch log shouldn't be folded into a
		// WaitJoin cluster just because quorum hasn't completed yet.
		let n1 = node("10.0.0.1", 7000);
		let n2 = node("10.0.0.2", 7000);
		let stranger = node("10.0.0.99", 7000);
		let log_members = vec![n1, n2];
		let local = base_local(ClusterStatus::WaitJoin, &[n1], &[], Some(&log_members));
		let req = JoinRequest {
			candidate: stranger,
			proto_ver: 1,
			ctime: Some(1000),
			epoch: 5,
			members: log_members.clone(),
		};
		let (decision, _) = evaluate(&local, &req, false);
		assert_eq!(decision, JoinDecision::Fail(JoinError::InvalidEpoch));
	}

	#[test]
	fn s3_higher_epoch_candidate_triggers_master_transfer() {
		let n1 = node("10.0.0.1", 7000);
		let n2 = node("10.0.0.2", 7000);
		let log_members = vec![n1];
		let local = base_local(ClusterStatus::WaitJoin, &[n1], &[], Some(&log_members));
		let req = JoinRequest {
			candidate: n2,
			proto_ver: 1,
			ctime: Some(1000),
			epoch: 6,
			members: vec![n1, n2],
		};
		let (decision, _) = evaluate(&local, &req, false);
		assert_eq!(decision, JoinDecision::MasterTransfer);
	}

	#[test]
	fn old_node_ver_join_later_when_not_waitjoin() {
		let n1 = node("10.0.0.1", 7000);
		let n2 = node("10.0.0.2", 7000);
		let local = base_local(ClusterStatus::Ok, &[n1], &[], Some(&[n1]));
		let req = JoinRequest {
			candidate: n2,
			proto_ver: 1,
			ctime: Some(1000),
			epoch: 99,
			members: vec![n1],
		};
		let (decision, _) = evaluate(&local, &req, false);
		assert_eq!(decision, JoinDecision::JoinLater(JoinError::OldNodeVer));
	}

	#[test]
	fn shutdown_rejects_all_joins() {
		let local = base_local(ClusterStatus::Shutdown, &[], &[], None);
		let req = JoinRequest {
			candidate: node("10.0.0.2", 7000),
			proto_ver: 1,
			ctime: None,
			epoch: 0,
			members: vec![],
		};
		let (decision, _) = evaluate(&local, &req, false);
		assert_eq!(decision, JoinDecision::Fail(JoinError::Shutdown));
	}

	#[test]
	fn s4_leave_then_join_changes_zone_count_not_admission() {
		// Admission itself doesn't compute zones; this is exercised at the
		// ring/status layer (see status.rs and ring.rs tests). Included
		// here only to document the boundary between C5 and C1/C3.
		let n1 = node("10.0.0.1", 7000);
		let local = base_local(ClusterStatus::Halt, &[n1], &[], Some(&[n1]));
		let req = JoinRequest {
			candidate: node("10.0.0.2", 7000),
			proto_ver: 1,
			ctime: Some(1000),
			epoch: 1,
			members: vec![n1],
		};
		let (decision, resp) = evaluate(&local, &req, false);
		assert_eq!(decision, JoinDecision::Success);
		assert!(resp.inc_epoch);
	}
}
