//! The cluster actor: membership handling and the client request path,
//! tying the ring, epoch log, status machine, leave-set, event serializer,
//! and driver boundary together behind a single mpsc inbox with a
//! single-consumer discipline. Every mutation of cluster state happens
//! inside [`ClusterActor::run`]; nothing else may touch `members`,
//! `status`, `epoch`, or the leave-set directly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use ringd_util::error::Error;
use ringd_util::persister::Persister;
use tokio::sync::{mpsc, oneshot};

use crate::driver::{DeliveredJoin, Delivery, GroupDriver, MembershipSink};
use crate::epoch::EpochLog;
use crate::event::{Event, EventSerializer, PartitionPolicy, Reachability, VdiBitmapFetcher};
use crate::leave_set::LeaveSet;
use crate::node::Node;
use crate::ring::{self, VnodeInfo};
use crate::status::{self, ClusterStatus};
use crate::wire::JoinMessage;

/// A unit of client-submitted cluster work.
enum ClientRequest {
	/// Mutates cluster state: parked, driver `block()`ed, run on a worker,
	/// then completed via driver `unblock()`.
	ProcessWork {
		work: Box<dyn FnOnce() -> Vec<u8> + Send>,
		respond: oneshot::Sender<Vec<u8>>,
	},
	/// Metadata broadcast: parked and completed once the self-originated
	/// `Notify` round-trips back through the driver.
	NotifyOnly {
		payload: Vec<u8>,
		respond: oneshot::Sender<Vec<u8>>,
	},
}

enum ActorMessage {
	Driver(Delivery),
	ClientRequest(ClientRequest),
	WorkComplete { id: u64, result: Vec<u8> },
}

/// Handle handed to the [`crate::driver::GroupDriver`] so it can deliver
/// totally-ordered events into the actor's inbox.
#[derive(Clone)]
pub struct ActorHandle {
	tx: mpsc::Sender<ActorMessage>,
}

#[async_trait]
impl MembershipSink for ActorHandle {
	async fn deliver(&self, event: Delivery) {
		let _ = self.tx.send(ActorMessage::Driver(event)).await;
	}
}

/// Client-facing façade for the cluster request path. Cheaply cloneable;
/// every call is a message send to the actor, never a direct state touch.
#[derive(Clone)]
pub struct ClusterClient {
	tx: mpsc::Sender<ActorMessage>,
}

impl ClusterClient {
	/// Process-work op: e.g. format, recover. Runs `work` on a
	/// worker task once the driver has paused ordered delivery, then
	/// completes once the result has round-tripped through `unblock()`.
	pub async fn process_work<F>(&self, work: F) -> Result<Vec<u8>, Error>
	where
		F: FnOnce() -> Vec<u8> + Send + 'static,
	{
		let (respond, rx) = oneshot::channel();
		self.tx
			.send(ActorMessage::ClientRequest(ClientRequest::ProcessWork {
				work: Box::new(work),
				respond,
			}))
			.await
			.map_err(|_| Error::Message("cluster actor gone".into()))?;
		rx.await.map_err(|_| Error::Message("cluster actor dropped request".into()))
	}

	/// Notify-only op: a metadata broadcast delivered to all nodes
	/// including self, completed by the local `Notify` handler.
	pub async fn notify_only(&self, payload: Vec<u8>) -> Result<Vec<u8>, Error> {
		let (respond, rx) = oneshot::channel();
		self.tx
			.send(ActorMessage::ClientRequest(ClientRequest::NotifyOnly { payload, respond }))
			.await
			.map_err(|_| Error::Message("cluster actor gone".into()))?;
		rx.await.map_err(|_| Error::Message("cluster actor dropped request".into()))
	}
}

fn encode_request(id: u64, payload: &[u8]) -> Vec<u8> {
	let mut buf = id.to_le_bytes().to_vec();
	buf.extend_from_slice(payload);
	buf
}

fn decode_request(buf: &[u8]) -> (u64, &[u8]) {
	if buf.len() < 8 {
		return (0, &[]);
	}
	let id = u64::from_le_bytes(buf[0..8].try_into().unwrap());
	(id, &buf[8..])
}

/// Cluster-formation facts that outlive any single process: the birth time
/// fixed at formation, the configured replication factor, and the backend
/// store identifier. Persisted so a restarting node can recover them instead
/// of looking freshly formed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfigSnapshot {
	pub ctime: u64,
	pub nr_copies: usize,
	pub store_name: String,
}

fn cluster_config_persister(metadata_dir: &Path) -> Persister<ClusterConfigSnapshot> {
	Persister::new(metadata_dir, "cluster_config")
}

/// Read back a previously persisted [`ClusterConfigSnapshot`], if any.
pub fn load_cluster_config(metadata_dir: &Path) -> Option<ClusterConfigSnapshot> {
	cluster_config_persister(metadata_dir).load().ok()
}

/// The single-consumer cluster actor. Owns every mutable piece of cluster
/// state.
pub struct ClusterActor {
	node: Node,
	metadata_dir: PathBuf,
	store_name: String,
	members: Vec<Node>,
	status: ClusterStatus,
	epoch: u32,
	ctime: u64,
	nr_copies: usize,
	cluster_flags: u16,
	halt_on_zone_shortage: bool,
	leave_set: LeaveSet,
	vnode_info: Arc<ArcSwap<VnodeInfo>>,
	epoch_log: EpochLog,
	join_finished: bool,

	events: EventSerializer,
	pending: HashMap<u64, oneshot::Sender<Vec<u8>>>,
	next_request_id: u64,

	driver: Arc<dyn GroupDriver>,
	fetcher: Arc<dyn VdiBitmapFetcher>,
	reachability: Arc<dyn Reachability>,
	partition_policy: Arc<dyn PartitionPolicy>,

	self_tx: mpsc::Sender<ActorMessage>,
	inbox: mpsc::Receiver<ActorMessage>,
}

impl ClusterActor {
	/// Builds the actor together with its `ClusterClient` façade. `build_driver`
	/// receives the [`ActorHandle`] the driver must deliver events into —
	/// resolving the construction cycle between "the driver needs a sink"
	/// and "the sink needs the actor's inbox" without a placeholder driver.
	#[allow(clippy::too_many_arguments)]
	pub fn new<F>(
		node: Node,
		metadata_dir: PathBuf,
		epoch_log: EpochLog,
		nr_copies: usize,
		cluster_flags: u16,
		store_name: String,
		halt_on_zone_shortage: bool,
		fetcher: Arc<dyn VdiBitmapFetcher>,
		reachability: Arc<dyn Reachability>,
		partition_policy: Arc<dyn PartitionPolicy>,
		build_driver: F,
	) -> (Self, ClusterClient)
	where
		F: FnOnce(ActorHandle) -> Arc<dyn GroupDriver>,
	{
		let (tx, rx) = mpsc::channel(256);
		let driver = build_driver(ActorHandle { tx: tx.clone() });
		let epoch = epoch_log.read_latest();

		// Recover the cluster's birth time rather than minting a fresh one on
		// every process start: the current epoch's log entry is the most
		// authoritative source, falling back to a persisted cluster config
		// snapshot, and only generating a new `ctime` for a genuinely
		// never-formatted node.
		let ctime = if !epoch_log.is_empty() {
			epoch_log.read(epoch).map(|e| e.ctime).unwrap_or_else(|_| ringd_util::time::new_ctime())
		} else if let Some(snapshot) = load_cluster_config(&metadata_dir) {
			snapshot.ctime
		} else {
			ringd_util::time::new_ctime()
		};

		let actor = ClusterActor {
			node,
			metadata_dir,
			store_name,
			members: Vec::new(),
			status: if epoch_log.is_empty() {
				ClusterStatus::WaitFormat
			} else {
				ClusterStatus::WaitJoin
			},
			epoch,
			ctime,
			nr_copies,
			cluster_flags,
			halt_on_zone_shortage,
			leave_set: LeaveSet::new(),
			vnode_info: Arc::new(ArcSwap::new(Arc::new(ring::rebuild(&[])))),
			epoch_log,
			join_finished: false,
			events: EventSerializer::new(),
			pending: HashMap::new(),
			next_request_id: 0,
			driver,
			fetcher,
			reachability,
			partition_policy,
			self_tx: tx.clone(),
			inbox: rx,
		};

		(actor, ClusterClient { tx })
	}

	pub fn vnode_info(&self) -> Arc<VnodeInfo> {
		self.vnode_info.load_full()
	}

	pub fn status(&self) -> ClusterStatus {
		self.status
	}

	pub fn epoch(&self) -> u32 {
		self.epoch
	}

	pub fn members(&self) -> &[Node] {
		&self.members
	}

	/// Drive the actor forever. Returns only when the inbox closes (every
	/// sender, including the driver handle, has been dropped).
	pub async fn run(mut self) {
		loop {
			tokio::select! {
				msg = self.inbox.recv() => {
					match msg {
						Some(m) => self.handle_message(m).await,
						None => break,
					}
				}
			}
			self.pump_events().await;
		}
	}

	async fn handle_message(&mut self, msg: ActorMessage) {
		match msg {
			ActorMessage::Driver(Delivery::Join { joined, decision, payload }) => {
				self.on_join_delivered(joined, decision, payload).await
			}
			ActorMessage::Driver(Delivery::Leave { left, members }) => self.on_leave_delivered(left, members),
			ActorMessage::Driver(Delivery::Notify { sender, payload }) => self.on_notify_delivered(sender, payload),
			ActorMessage::ClientRequest(req) => self.handle_client_request(req).await,
			ActorMessage::WorkComplete { id, result } => {
				let _ = self.driver.unblock(encode_request(id, &result)).await;
			}
		}
	}

	fn epoch_log_has_member(&self, node: &Node) -> bool {
		self.epoch_log
			.read(self.epoch)
			.map(|e| e.members.contains(node))
			.unwrap_or(false)
	}

	/// Handle a delivered Join event.
	async fn on_join_delivered(&mut self, joined: Node, decision: DeliveredJoin, payload: JoinMessage) {
		if joined == self.node && matches!(decision, DeliveredJoin::Fail | DeliveredJoin::JoinLater) {
			error!("join rejected for self: {:?}", decision);
			std::process::exit(1);
		}

		match decision {
			DeliveredJoin::Success => {
				// Prior-epoch entry excludes the just-joined node.
				let _ = self.epoch_log.append(self.epoch, self.ctime, self.members.clone());

				self.nr_copies = payload.nr_copies as usize;
				self.members = payload.nodes.clone();
				self.status = payload.cluster_status;
				for n in &payload.leave_nodes {
					self.leave_set.insert(*n);
				}
				self.vnode_info.store(Arc::new(ring::rebuild(&self.members)));

				if payload.inc_epoch {
					self.epoch += 1;
					let _ = self.epoch_log.append(self.epoch, self.ctime, self.members.clone());
				}

				let nr_zones = ring::count_zones(&self.members);
				self.status = status::on_join_zone_recovery(self.status, nr_zones, self.nr_copies);

				self.join_finished = true;

				let snapshot = ClusterConfigSnapshot {
					ctime: self.ctime,
					nr_copies: self.nr_copies,
					store_name: self.store_name.clone(),
				};
				if let Err(e) = cluster_config_persister(&self.metadata_dir).save_async(&snapshot).await {
					warn!("failed to persist cluster config: {}", e);
				}

				self.events.push(Event::Join {
					joined,
					members: self.members.clone(),
					decision,
					payload,
				});
			}
			DeliveredJoin::MasterTransfer => {
				self.absorb_master_transfer(&payload.leave_nodes);
			}
			DeliveredJoin::Fail | DeliveredJoin::JoinLater => {
				if self.epoch_log_has_member(&joined) {
					self.leave_set.insert(joined);
				}
				if let Ok(entry) = self.epoch_log.read(self.epoch) {
					if entry.members.len() == self.members.len() + self.leave_set.len() {
						self.status = ClusterStatus::Ok;
						let _ = self.epoch_log.append(self.epoch, self.ctime, self.members.clone());
					}
				}
			}
		}
	}

	/// Absorb a `MasterTransfer` decision: adopt the candidate's leave-set,
	/// mark `join_finished`, and, only on the node that was actually
	/// relinquishing mastership (identified by still being in `WaitJoin`),
	/// reset membership to just itself so the new master's subsequent
	/// delivery rebuilds the view from scratch. Every other participant on
	/// the bus sees the same broadcast and should only merge the leave-set.
	pub fn absorb_master_transfer(&mut self, leave_nodes: &[Node]) {
		for n in leave_nodes {
			self.leave_set.insert(*n);
		}
		if self.status == ClusterStatus::WaitJoin {
			self.members = vec![self.node];
			self.vnode_info.store(Arc::new(ring::rebuild(&self.members)));
		}
		self.join_finished = true;
	}

	/// Handle a delivered Leave event.
	fn on_leave_delivered(&mut self, left: Node, members: Vec<Node>) {
		self.members = members;
		self.leave_set.remove(&left);
		if self.status.can_recover() {
			self.epoch += 1;
		}
		let _ = self.epoch_log.append(self.epoch, self.ctime, self.members.clone());

		let nr_zones = ring::count_zones(&self.members);
		self.status = status::on_leave_zone_shortage(self.status, nr_zones, self.nr_copies, self.halt_on_zone_shortage);
		self.vnode_info.store(Arc::new(ring::rebuild(&self.members)));

		self.events.push(Event::Leave {
			left,
			members: self.members.clone(),
		});
	}

	/// Handle a delivered Notify event.
	fn on_notify_delivered(&mut self, sender: Node, payload: Vec<u8>) {
		if sender == self.node {
			let (id, body) = decode_request(&payload);
			if let Some(tx) = self.pending.remove(&id) {
				let _ = tx.send(body.to_vec());
			}
		}
		self.events.push(Event::Notify { sender, payload });
	}

	/// Dispatch a client request onto the cluster request path.
	async fn handle_client_request(&mut self, req: ClientRequest) {
		let id = self.next_request_id;
		self.next_request_id += 1;

		match req {
			ClientRequest::ProcessWork { work, respond } => {
				self.pending.insert(id, respond);
				if self.driver.block().await.is_err() {
					if let Some(tx) = self.pending.remove(&id) {
						let _ = tx.send(Vec::new());
					}
					return;
				}
				let self_tx = self.self_tx.clone();
				tokio::spawn(async move {
					let result = work();
					let _ = self_tx.send(ActorMessage::WorkComplete { id, result }).await;
				});
			}
			ClientRequest::NotifyOnly { payload, respond } => {
				self.pending.insert(id, respond);
				if self.driver.notify(encode_request(id, &payload)).await.is_err() {
					if let Some(tx) = self.pending.remove(&id) {
						let _ = tx.send(Vec::new());
					}
				}
			}
		}
	}

	/// Drain the event queue according to the dispatch rule, running real
	/// handlers (peer VDI fetch, leave-majority probe) before marking each
	/// event's done-handler complete.
	async fn pump_events(&mut self) {
		while let Some(event) = self.events.try_dispatch() {
			match &event {
				Event::Join { members, .. } => {
					let _ = crate::event::run_join_handler(members, self.node, self.status, self.fetcher.as_ref()).await;
				}
				Event::Leave { members, .. } => {
					crate::event::run_leave_handler(members, self.reachability.as_ref(), self.partition_policy.as_ref()).await;
				}
				Event::Notify { .. } => {}
			}
			self.events.finish_running();
		}
	}
}
