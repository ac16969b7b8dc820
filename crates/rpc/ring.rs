//! Vnode ring computation.
//!
//! `VnodeInfo` is an immutable snapshot produced by [`rebuild`] and shared by
//! reference count; exactly one snapshot is ever "current" (the cluster
//! actor swaps it atomically via `arc_swap::ArcSwap`), and every holder's
//! reference keeps it alive until released.

use std::collections::HashSet;

use ringd_util::data::{oid_hash, NodeId};

use crate::node::{node_vnodes, Node, Vnode};

/// Immutable snapshot of the placement ring derived from a member list.
#[derive(Debug, Clone)]
pub struct VnodeInfo {
	/// Ring entries, sorted by token (ties broken by node address).
	entries: Vec<Vnode>,
	nr_zones: usize,
}

impl VnodeInfo {
	pub fn nr_vnodes(&self) -> usize {
		self.entries.len()
	}

	pub fn nr_zones(&self) -> usize {
		self.nr_zones
	}

	pub fn entries(&self) -> &[Vnode] {
		&self.entries
	}

	/// `nr_copies_effective = min(configured, nr_zones)`.
	pub fn nr_copies(&self, configured: usize) -> usize {
		configured.min(self.nr_zones)
	}

	/// Walk the ring clockwise from `hash(oid)`, collecting vnodes until `n`
	/// *distinct* owning nodes have been seen. Duplicate vnodes of an
	/// already-chosen node are skipped. If fewer distinct nodes exist than
	/// `n`, returns what is available.
	pub fn oid_to_vnodes(&self, oid: u64, n: usize) -> Vec<Vnode> {
		if self.entries.is_empty() || n == 0 {
			return Vec::new();
		}

		let start = start_index(&self.entries, oid_hash(oid));
		let mut seen: HashSet<NodeId> = HashSet::with_capacity(n);
		let mut out = Vec::with_capacity(n);

		for i in 0..self.entries.len() {
			if out.len() == n {
				break;
			}
			let v = self.entries[(start + i) % self.entries.len()];
			if seen.insert(v.node.id()) {
				out.push(v);
			}
		}

		out
	}
}

/// Find the index of the first ring entry at or after `token`, wrapping to 0
/// (i.e. the start position for a clockwise walk from `hash(oid)`).
fn start_index(entries: &[Vnode], token: u64) -> usize {
	match entries.binary_search_by_key(&token, |v| v.token) {
		Ok(i) => i,
		Err(i) if i == entries.len() => 0,
		Err(i) => i,
	}
}

/// Number of distinct failure zones among non-gateway members
/// Gateways are excluded since they never hold data.
pub fn count_zones(members: &[Node]) -> usize {
	members
		.iter()
		.filter(|n| !n.is_gateway())
		.map(|n| n.zone)
		.collect::<HashSet<_>>()
		.len()
}

/// Build a fresh [`VnodeInfo`] from the current member list (`rebuild`).
pub fn rebuild(members: &[Node]) -> VnodeInfo {
	let mut entries: Vec<Vnode> = members
		.iter()
		.filter(|n| !n.is_gateway())
		.flat_map(node_vnodes)
		.collect();
	entries.sort();

	VnodeInfo {
		entries,
		nr_zones: count_zones(members),
	}
}
