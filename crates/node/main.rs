//! ringd node daemon: loads configuration, starts the cluster actor, and
//! joins the group.

#[macro_use]
extern crate tracing;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use structopt::StructOpt;

use ringd_rpc::driver::{CheckJoin, GroupBus, GroupDriver, LocalDriver};
use ringd_rpc::epoch::EpochLog;
use ringd_rpc::event::{PartitionPolicy, ProcessAbort, Reachability, VdiBitmapFetcher};
use ringd_rpc::join::{evaluate, JoinDecision, JoinRequest, JoinResponse, LocalView};
use ringd_rpc::node::Node;
use ringd_rpc::status::ClusterStatus;
use ringd_rpc::system::ClusterActor;
use ringd_util::config::Config;
use ringd_util::data::{ip_to_addr16, zone_from_addr};
use ringd_util::error::Error;

#[derive(StructOpt, Debug)]
#[structopt(
	name = "ringd",
	about = "Cluster membership and epoch coordination node daemon"
)]
struct Opt {
	#[structopt(subcommand)]
	cmd: Command,
}

#[derive(StructOpt, Debug)]
enum Command {
	/// Run the node daemon using the configuration file given with -c.
	Server {
		#[structopt(short = "c", long = "config", env = "RINGD_CONFIG_FILE", default_value = "/etc/ringd.toml")]
		config_file: PathBuf,
	},
	/// Print the node id this config would derive, without starting anything.
	NodeId {
		#[structopt(short = "c", long = "config", env = "RINGD_CONFIG_FILE", default_value = "/etc/ringd.toml")]
		config_file: PathBuf,
	},
	/// Run several nodes in one process sharing an in-process group bus, for
	/// local development and manual testing.
	DevCluster {
		#[structopt(short = "n", long = "nodes", default_value = "3")]
		nodes: u16,
		#[structopt(short = "d", long = "metadata-dir", default_value = "/tmp/ringd-dev")]
		metadata_dir: PathBuf,
		#[structopt(long = "base-port", default_value = "7000")]
		base_port: u16,
		#[structopt(long = "replication-factor", default_value = "3")]
		replication_factor: usize,
	},
}

/// Builds the [`Node`] a config describes, deriving `zone` from the bind
/// address when the config leaves it unset.
fn node_from_config(config: &Config) -> Node {
	let addr16 = ip_to_addr16(config.rpc_bind_addr.ip());
	let zone = config.zone.unwrap_or_else(|| zone_from_addr(&addr16));
	Node::new(config.rpc_bind_addr, zone, config.nr_vnodes)
}

/// The `(ctime, epoch, members)` a node should announce in its initial
/// `JoinRequest`: recovered from the local epoch log when one exists, or the
/// all-zero fields of a genuinely fresh node otherwise.
struct RestartJoinFields {
	ctime: Option<u64>,
	epoch: u32,
	members: Vec<Node>,
}

fn restart_join_fields(epoch_log: &EpochLog) -> RestartJoinFields {
	if epoch_log.is_empty() {
		return RestartJoinFields {
			ctime: None,
			epoch: 0,
			members: Vec::new(),
		};
	}
	let epoch = epoch_log.read_latest();
	match epoch_log.read(epoch) {
		Ok(entry) => RestartJoinFields {
			ctime: Some(entry.ctime),
			epoch,
			members: entry.members,
		},
		Err(_) => RestartJoinFields {
			ctime: None,
			epoch: 0,
			members: Vec::new(),
		},
	}
}

#[tokio::main]
async fn main() {
	let opt = Opt::from_args();

	if std::env::var("RUST_LOG").is_err() {
		std::env::set_var("RUST_LOG", "ringd=info,ringd_rpc=info");
	}
	tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
		.init();

	let res = match opt.cmd {
		Command::Server { config_file } => run_server(config_file).await,
		Command::NodeId { config_file } => node_id_command(config_file),
		Command::DevCluster {
			nodes,
			metadata_dir,
			base_port,
			replication_factor,
		} => run_dev_cluster(nodes, metadata_dir, base_port, replication_factor).await,
	};

	if let Err(e) = res {
		eprintln!("Error: {}", e);
		std::process::exit(1);
	}
}

fn node_id_command(config_file: PathBuf) -> Result<(), Error> {
	let config = Config::load(&config_file)?;
	let node = node_from_config(&config);
	println!("{}", node.id());
	Ok(())
}

/// The admission authority a lone node offers for its own self-join: treats
/// the local view as a fresh, unformatted cluster until peers are known.
struct SelfOnly {
	node: Node,
	configured_nr_copies: usize,
	store_name: String,
}

impl CheckJoin for SelfOnly {
	fn on_check_join(&self, req: &JoinRequest, is_self: bool) -> (JoinDecision, JoinResponse) {
		let local = LocalView {
			this_node: self.node,
			proto_ver: req.proto_ver,
			configured_nr_copies: self.configured_nr_copies,
			cluster_flags: 0,
			status: ClusterStatus::WaitFormat,
			ctime: None,
			epoch: 0,
			members: &[],
			leave_set: &[],
			epoch_log_members: None,
			store_name: &self.store_name,
		};
		evaluate(&local, req, is_self)
	}
}

struct LoggingFetcher;
#[async_trait::async_trait]
impl VdiBitmapFetcher for LoggingFetcher {
	async fn fetch(&self, peer: Node) -> Result<(), Error> {
		debug!("VDI bitmap fetch from {:?} (no object store backend wired up)", peer);
		Ok(())
	}
}

struct AlwaysReachable;
#[async_trait::async_trait]
impl Reachability for AlwaysReachable {
	async fn probe(&self, _peer: Node) -> bool {
		true
	}
}

/// Builds a `LocalDriver` for `node` on `bus`, handing a clone of the
/// resulting driver back out through `driver_slot` so the caller can issue
/// the initial `join()` once the actor is running. `build_driver` only gets
/// to see the actor's sink, not a place to stash its own return value, so
/// this is the seam that lets startup code reach the driver afterwards.
fn make_driver_builder(
	node: Node,
	bus: Arc<GroupBus>,
	check_join: Arc<dyn CheckJoin>,
	driver_slot: Arc<Mutex<Option<Arc<dyn GroupDriver>>>>,
) -> impl FnOnce(ringd_rpc::system::ActorHandle) -> Arc<dyn GroupDriver> {
	move |sink| {
		let driver: Arc<dyn GroupDriver> = Arc::new(LocalDriver::new(node, bus, check_join, Arc::new(sink)));
		*driver_slot.lock().unwrap() = Some(driver.clone());
		driver
	}
}

async fn run_server(config_file: PathBuf) -> Result<(), Error> {
	let config = Config::load(&config_file)?;
	let node = node_from_config(&config);
	info!("starting node {} ({})", node.id(), config.rpc_bind_addr);

	let epoch_log = EpochLog::new(&config.metadata_dir);
	// A restarting node re-announces its last-known (ctime, epoch, members)
	// instead of joining as if it were brand new, so admission can run the
	// quorum-reconstruction/master-transfer rules (rather than always taking
	// the fresh-cluster path).
	let restart = restart_join_fields(&epoch_log);

	let bus = GroupBus::new();
	let check_join = Arc::new(SelfOnly {
		node,
		configured_nr_copies: config.replication_factor,
		store_name: config.store_name.clone(),
	});
	let driver_slot = Arc::new(Mutex::new(None));

	let (actor, _client) = ClusterActor::new(
		node,
		config.metadata_dir.clone(),
		epoch_log,
		config.replication_factor,
		0,
		config.store_name.clone(),
		config.halt_on_zone_shortage,
		Arc::new(LoggingFetcher),
		Arc::new(AlwaysReachable),
		Arc::new(ProcessAbort),
		make_driver_builder(node, bus, check_join, driver_slot.clone()),
	);

	let handle = tokio::spawn(actor.run());

	let driver = driver_slot.lock().unwrap().clone().expect("build_driver runs synchronously in ClusterActor::new");
	driver
		.join(JoinRequest {
			candidate: node,
			proto_ver: config.proto_ver,
			ctime: restart.ctime,
			epoch: restart.epoch,
			members: restart.members,
		})
		.await?;

	tokio::select! {
		_ = tokio::signal::ctrl_c() => {
			info!("received shutdown signal");
		}
		_ = handle => {
			warn!("cluster actor exited on its own");
		}
	}
	Ok(())
}

async fn run_dev_cluster(
	nr_nodes: u16,
	metadata_dir: PathBuf,
	base_port: u16,
	replication_factor: usize,
) -> Result<(), Error> {
	let bus = GroupBus::new();
	let mut handles = Vec::new();

	for i in 0..nr_nodes {
		let addr = format!("127.0.0.1:{}", base_port + i).parse().unwrap();
		let node = Node::new(addr, i as u32, 16);
		let node_dir = metadata_dir.join(format!("node-{}", i));
		let epoch_log = EpochLog::new(&node_dir);
		let restart = restart_join_fields(&epoch_log);

		let check_join = Arc::new(SelfOnly {
			node,
			configured_nr_copies: replication_factor,
			store_name: "ringd-dev".to_string(),
		});
		let driver_slot = Arc::new(Mutex::new(None));

		let (actor, _client) = ClusterActor::new(
			node,
			node_dir,
			epoch_log,
			replication_factor,
			0,
			"ringd-dev".to_string(),
			true,
			Arc::new(LoggingFetcher),
			Arc::new(AlwaysReachable),
			Arc::new(ProcessAbort),
			make_driver_builder(node, bus.clone(), check_join, driver_slot.clone()),
		);

		info!("dev-cluster node {} listening as {:?}", i, node.id());
		handles.push(tokio::spawn(actor.run()));

		let driver = driver_slot.lock().unwrap().clone().expect("build_driver runs synchronously in ClusterActor::new");
		driver
			.join(JoinRequest {
				candidate: node,
				proto_ver: 1,
				ctime: restart.ctime,
				epoch: restart.epoch,
				members: restart.members,
			})
			.await?;
	}

	tokio::signal::ctrl_c().await.ok();
	info!("shutting down dev cluster");
	for h in handles {
		h.abort();
	}
	Ok(())
}
