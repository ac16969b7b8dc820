//! Node and vnode types.

use std::cmp::Ordering;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use ringd_util::data::{ip_to_addr16, vnode_token, Addr16, NodeId};

/// A cluster member, as carried in membership lists and epoch log entries.
///
/// Two nodes are equal iff `(addr, port)` match; the total order is
/// lexicographic on `(addr, port)`, used to sort epoch log entries and to
/// break ties on the vnode ring.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Node {
	pub addr: Addr16,
	pub port: u16,
	pub zone: u32,
	pub nr_vnodes: u16,
}

impl Node {
	pub fn new(addr: SocketAddr, zone: u32, nr_vnodes: u16) -> Self {
		Node {
			addr: ip_to_addr16(addr.ip()),
			port: addr.port(),
			zone,
			nr_vnodes,
		}
	}

	/// A node with zero vnodes is a pure gateway: it participates in the
	/// protocol but stores no data and does not contribute to zone counts.
	pub fn is_gateway(&self) -> bool {
		self.nr_vnodes == 0
	}

	pub fn id(&self) -> NodeId {
		NodeId::from_addr_port(&self.addr, self.port)
	}

	fn sort_key(&self) -> (Addr16, u16) {
		(self.addr, self.port)
	}
}

impl PartialEq for Node {
	fn eq(&self, other: &Self) -> bool {
		self.addr == other.addr && self.port == other.port
	}
}
impl Eq for Node {}

impl PartialOrd for Node {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}
impl Ord for Node {
	fn cmp(&self, other: &Self) -> Ordering {
		self.sort_key().cmp(&other.sort_key())
	}
}

impl std::hash::Hash for Node {
	fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
		self.addr.hash(state);
		self.port.hash(state);
	}
}

/// Sort a member list the way epoch log entries and `update_node_info` do:
/// by `(addr, port)`.
pub fn sorted_members(mut nodes: Vec<Node>) -> Vec<Node> {
	nodes.sort();
	nodes
}

/// A single vnode on the placement ring: a token position owned by one node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Vnode {
	pub node: Node,
	pub token: u64,
}

impl Vnode {
	/// Ring order: by token, ties broken by `(addr, port)`.
	fn sort_key(&self) -> (u64, Addr16, u16) {
		(self.token, self.node.addr, self.node.port)
	}
}

impl PartialEq for Vnode {
	fn eq(&self, other: &Self) -> bool {
		self.sort_key() == other.sort_key()
	}
}
impl Eq for Vnode {}
impl PartialOrd for Vnode {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}
impl Ord for Vnode {
	fn cmp(&self, other: &Self) -> Ordering {
		self.sort_key().cmp(&other.sort_key())
	}
}

/// Emit the `nr_vnodes` vnode tokens a node contributes to the ring.
pub fn node_vnodes(node: &Node) -> Vec<Vnode> {
	(0..node.nr_vnodes)
		.map(|i| Vnode {
			node: *node,
			token: vnode_token(&node.addr, node.port, i),
		})
		.collect()
}
