//! Node identity primitives shared across the workspace: the 16-byte address
//! representation used on the wire (native IPv6, or IPv4 mapped into IPv6 the
//! way the kernel does it) and the stable node id derived from it.

use std::fmt;
use std::net::{IpAddr, Ipv6Addr};

use blake2::{Blake2b512, Digest};
use serde::{Deserialize, Serialize};

/// 16-byte node address, IPv6 or IPv4-mapped-into-IPv6.
pub type Addr16 = [u8; 16];

/// Encode an [`IpAddr`] into its 16-byte wire form.
pub fn ip_to_addr16(ip: IpAddr) -> Addr16 {
	match ip {
		IpAddr::V6(v6) => v6.octets(),
		IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
	}
}

/// Decode a 16-byte wire address back into an [`IpAddr`], collapsing
/// IPv4-mapped addresses back to their `IpAddr::V4` form.
pub fn addr16_to_ip(addr: &Addr16) -> IpAddr {
	let v6 = Ipv6Addr::from(*addr);
	match v6.to_ipv4_mapped() {
		Some(v4) => IpAddr::V4(v4),
		None => IpAddr::V6(v6),
	}
}

/// Derive the zone id of an address from its last 4 bytes, as used when a
/// node is started with `zone = -1` ("derive from local address").
pub fn zone_from_addr(addr: &Addr16) -> u32 {
	let b = &addr[12..16];
	u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

/// Stable, content-derived identifier for a node, used as a map/set key.
/// Two nodes with the same `(addr, port)` always produce the same id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId([u8; 32]);

impl NodeId {
	pub fn from_addr_port(addr: &Addr16, port: u16) -> Self {
		let mut hasher = Blake2b512::new();
		hasher.update(addr);
		hasher.update(port.to_be_bytes());
		let digest = hasher.finalize();
		let mut out = [0u8; 32];
		out.copy_from_slice(&digest[..32]);
		NodeId(out)
	}

	pub fn as_bytes(&self) -> &[u8; 32] {
		&self.0
	}
}

impl fmt::Debug for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "NodeId({})", hex::encode(&self.0[..8]))
	}
}

impl fmt::Display for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", hex::encode(&self.0[..8]))
	}
}

/// Stable 64-bit token derived for a vnode at a given index on its owning
/// node, used as the ring placement key. Uses `xxh3` for fast
/// non-cryptographic hashing.
pub fn vnode_token(addr: &Addr16, port: u16, index: u16) -> u64 {
	let mut buf = Vec::with_capacity(addr.len() + 2 + 2);
	buf.extend_from_slice(addr);
	buf.extend_from_slice(&port.to_be_bytes());
	buf.extend_from_slice(&index.to_be_bytes());
	xxhash_rust::xxh3::xxh3_64(&buf)
}

/// Hash an object id onto the ring, as `hash(oid)` in the placement rule.
pub fn oid_hash(oid: u64) -> u64 {
	xxhash_rust::xxh3::xxh3_64(&oid.to_be_bytes())
}
