//! Daemon configuration: a TOML file loaded once at startup into a `Config`
//! struct that is then threaded through to every subsystem.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, OkOrMessage};

fn default_proto_ver() -> u8 {
	1
}

fn default_replication_factor() -> usize {
	3
}

/// Parsed contents of the node's TOML configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
	/// Directory holding the epoch log, cluster config, and peer list.
	pub metadata_dir: PathBuf,

	/// Local address to bind the membership RPC listener to.
	pub rpc_bind_addr: SocketAddr,
	/// Address to advertise to other nodes, if different from the bind
	/// address (e.g. behind NAT).
	#[serde(default)]
	pub rpc_public_addr: Option<SocketAddr>,

	/// Peers to attempt to contact at startup, `<host>:<port>` format.
	#[serde(default)]
	pub bootstrap_peers: Vec<String>,

	/// Desired replication factor (`nr_copies` in the join protocol).
	#[serde(default = "default_replication_factor")]
	pub replication_factor: usize,

	/// Failure zone of this node. `None` means "derive it from the low 4
	/// bytes of the local address", matching `zone = -1` on the CLI.
	#[serde(default)]
	pub zone: Option<u32>,

	/// Number of vnodes this node contributes to the ring. Zero makes this
	/// node a pure gateway that stores no data.
	#[serde(default)]
	pub nr_vnodes: u16,

	/// Protocol version this build speaks; joins from a different version
	/// are rejected outright.
	#[serde(default = "default_proto_ver")]
	pub proto_ver: u8,

	/// Backend store identifier advertised during join.
	#[serde(default)]
	pub store_name: String,

	/// Whether a degraded cluster should halt instead of continuing to
	/// serve I/O when it runs out of failure zones (`sys_can_halt`).
	#[serde(default = "default_true")]
	pub halt_on_zone_shortage: bool,
}

fn default_true() -> bool {
	true
}

impl Config {
	pub fn load(path: &Path) -> Result<Self, Error> {
		let data = std::fs::read_to_string(path).ok_or_message(format!("unable to read config file {:?}", path))?;
		let config: Config = toml::from_str(&data)?;
		Ok(config)
	}
}
