//! `JoinMessage` wire layout: a packed, little-endian header followed by
//! a variable-length trailing array of [`Node`]s. Hand-rolled rather than
//! `serde`-derived because the layout is fixed byte-for-byte, including a
//! NUL-padded string field and a length-prefixed tail, calling for explicit
//! `encode`/`decode` instead of a derive.

use std::net::{Ipv6Addr, SocketAddr};

use ringd_util::error::Error;

use crate::node::Node;
use crate::status::ClusterStatus;

/// Fixed width of the NUL-padded backend identifier field.
pub const STORE_LEN: usize = 32;

const NODE_SIZE: usize = 16 /* addr */ + 2 /* port */ + 4 /* zone */ + 2 /* nr_vnodes */;
const HEADER_SIZE: usize = 1 + 1 + 2 + 2 + 2 + 4 + 4 + 8 + 4 + 1 + 1 + STORE_LEN;

/// In-memory form of the wire message. `nodes` carries the trailing array
/// when `result == Success` and `master_transfer` is unset; `leave_nodes`
/// carries it otherwise (a rejected join or a master-transfer hand-off).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinMessage {
	pub proto_ver: u8,
	pub nr_copies: u8,
	pub cluster_flags: u16,
	pub cluster_status: ClusterStatus,
	pub epoch: u32,
	pub ctime: u64,
	pub result: u32,
	pub inc_epoch: bool,
	/// Set when this join's decision was `MasterTransfer` rather than an
	/// ordinary `Success` — both share `result == 0`, so this bit is what
	/// actually distinguishes them on the wire.
	pub master_transfer: bool,
	pub store_name: String,
	pub nodes: Vec<Node>,
	pub leave_nodes: Vec<Node>,
}

fn status_to_u32(status: ClusterStatus) -> u32 {
	match status {
		ClusterStatus::WaitFormat => 0,
		ClusterStatus::WaitJoin => 1,
		ClusterStatus::Ok => 2,
		ClusterStatus::Halt => 3,
		ClusterStatus::Shutdown => 4,
	}
}

fn status_from_u32(v: u32) -> Result<ClusterStatus, Error> {
	Ok(match v {
		0 => ClusterStatus::WaitFormat,
		1 => ClusterStatus::WaitJoin,
		2 => ClusterStatus::Ok,
		3 => ClusterStatus::Halt,
		4 => ClusterStatus::Shutdown,
		other => return Err(Error::Message(format!("unknown cluster_status {}", other))),
	})
}

fn encode_node(buf: &mut Vec<u8>, node: &Node) {
	buf.extend_from_slice(&node.addr);
	buf.extend_from_slice(&node.port.to_le_bytes());
	buf.extend_from_slice(&node.zone.to_le_bytes());
	buf.extend_from_slice(&node.nr_vnodes.to_le_bytes());
}

fn decode_node(buf: &[u8]) -> Node {
	let mut addr = [0u8; 16];
	addr.copy_from_slice(&buf[0..16]);
	let port = u16::from_le_bytes([buf[16], buf[17]]);
	let zone = u32::from_le_bytes([buf[18], buf[19], buf[20], buf[21]]);
	let nr_vnodes = u16::from_le_bytes([buf[22], buf[23]]);
	let ip = Ipv6Addr::from(addr);
	let sock = SocketAddr::new(std::net::IpAddr::V6(ip), port);
	Node::new(sock, zone, nr_vnodes)
}

impl JoinMessage {
	/// Encode the message. Whichever of `nodes`/`leave_nodes` is selected by
	/// `result`/`master_transfer` is written as the trailing array: `nodes`
	/// on an ordinary success, `leave_nodes` otherwise.
	pub fn encode(&self) -> Vec<u8> {
		let trailing: &[Node] = if self.result == 0 && !self.master_transfer {
			&self.nodes
		} else {
			&self.leave_nodes
		};

		let mut buf = Vec::with_capacity(HEADER_SIZE + trailing.len() * NODE_SIZE);
		buf.push(self.proto_ver);
		buf.push(self.nr_copies);
		buf.extend_from_slice(&(self.nodes.len() as u16).to_le_bytes());
		buf.extend_from_slice(&(self.leave_nodes.len() as u16).to_le_bytes());
		buf.extend_from_slice(&self.cluster_flags.to_le_bytes());
		buf.extend_from_slice(&status_to_u32(self.cluster_status).to_le_bytes());
		buf.extend_from_slice(&self.epoch.to_le_bytes());
		buf.extend_from_slice(&self.ctime.to_le_bytes());
		buf.extend_from_slice(&self.result.to_le_bytes());
		buf.push(self.inc_epoch as u8);
		buf.push(self.master_transfer as u8);

		let mut name = [0u8; STORE_LEN];
		let name_bytes = self.store_name.as_bytes();
		let n = name_bytes.len().min(STORE_LEN);
		name[..n].copy_from_slice(&name_bytes[..n]);
		buf.extend_from_slice(&name);

		for node in trailing {
			encode_node(&mut buf, node);
		}
		buf
	}

	/// Decode a message. The receiver computes message size as
	/// `sizeof(header) + max(nr_nodes, nr_leave_nodes) * sizeof(Node)`:
	/// the trailing array is read into whichever of `nodes`/`leave_nodes`
	/// matches the decoded `result`, the other left empty.
	pub fn decode(buf: &[u8]) -> Result<Self, Error> {
		if buf.len() < HEADER_SIZE {
			return Err(Error::Message("join message shorter than header".into()));
		}

		let proto_ver = buf[0];
		let nr_copies = buf[1];
		let nr_nodes = u16::from_le_bytes([buf[2], buf[3]]) as usize;
		let nr_leave_nodes = u16::from_le_bytes([buf[4], buf[5]]) as usize;
		let cluster_flags = u16::from_le_bytes([buf[6], buf[7]]);
		let cluster_status = status_from_u32(u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]))?;
		let epoch = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);
		let ctime = u64::from_le_bytes([
			buf[16], buf[17], buf[18], buf[19], buf[20], buf[21], buf[22], buf[23],
		]);
		let result = u32::from_le_bytes([buf[24], buf[25], buf[26], buf[27]]);
		let inc_epoch = buf[28] != 0;
		let master_transfer = buf[29] != 0;
		let name_start = 30;
		let name_end = name_start + STORE_LEN;
		let nul = buf[name_start..name_end]
			.iter()
			.position(|&b| b == 0)
			.unwrap_or(STORE_LEN);
		let store_name = String::from_utf8_lossy(&buf[name_start..name_start + nul]).into_owned();

		let trailing_count = nr_nodes.max(nr_leave_nodes);
		let trailing_start = HEADER_SIZE;
		let trailing_end = trailing_start + trailing_count * NODE_SIZE;
		if buf.len() < trailing_end {
			return Err(Error::Message("join message shorter than declared trailing array".into()));
		}

		let mut trailing = Vec::with_capacity(trailing_count);
		for i in 0..trailing_count {
			let start = trailing_start + i * NODE_SIZE;
			trailing.push(decode_node(&buf[start..start + NODE_SIZE]));
		}

		let (nodes, leave_nodes) = if result == 0 && !master_transfer {
			(trailing, Vec::new())
		} else {
			(Vec::new(), trailing)
		};

		Ok(JoinMessage {
			proto_ver,
			nr_copies,
			cluster_flags,
			cluster_status,
			epoch,
			ctime,
			result,
			inc_epoch,
			master_transfer,
			store_name,
			nodes,
			leave_nodes,
		})
	}
}
