//! Group-communication driver boundary: the external collaborator that
//! provides totally-ordered delivery of join/leave/notify events across
//! the cluster, plus the synchronous `on_check_join` upcall run by whichever
//! node currently holds mastership.
//!
//! [`LocalDriver`] is an in-process stand-in (a single [`GroupBus`] shared by
//! every participant in a test or a single-binary dev cluster), keeping the
//! real network backend behind a trait so the test suite never needs one.
//! A production backend is a separate integration concern and is not
//! implemented here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ringd_util::data::NodeId;
use ringd_util::error::Error;
use tokio::sync::broadcast;

use crate::join::{result_code, JoinDecision, JoinError, JoinRequest, JoinResponse};
use crate::node::Node;
use crate::wire::JoinMessage;

/// Synchronous admission upcall, run directly on whichever task currently
/// holds mastership rather than across an async boundary, matching a
/// single-threaded callback discipline.
pub trait CheckJoin: Send + Sync {
	fn on_check_join(&self, req: &JoinRequest, is_self: bool) -> (JoinDecision, JoinResponse);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveredJoin {
	Success,
	JoinLater,
	Fail,
	MasterTransfer,
}

/// Delivered driver event, handed to the actor's inbox for processing under
/// its single-consumer discipline.
#[derive(Debug, Clone)]
pub enum Delivery {
	Join {
		joined: Node,
		decision: DeliveredJoin,
		payload: JoinMessage,
	},
	Leave {
		left: Node,
		members: Vec<Node>,
	},
	Notify {
		sender: Node,
		payload: Vec<u8>,
	},
}

/// Sink the driver delivers totally-ordered events into. Implemented by the
/// `ClusterActor`'s inbox handle.
#[async_trait]
pub trait MembershipSink: Send + Sync {
	async fn deliver(&self, event: Delivery);
}

/// The group-communication driver contract.
#[async_trait]
pub trait GroupDriver: Send + Sync {
	async fn join(&self, req: JoinRequest) -> Result<(), Error>;
	async fn leave(&self) -> Result<(), Error>;
	async fn notify(&self, payload: Vec<u8>) -> Result<(), Error>;
	async fn block(&self) -> Result<(), Error>;
	async fn unblock(&self, payload: Vec<u8>) -> Result<(), Error>;
}

type CheckJoinHandle = Arc<dyn CheckJoin>;
type SinkHandle = Arc<dyn MembershipSink>;

#[derive(Debug, Clone)]
enum BusPayload {
	Join { joined: Node, payload: JoinMessage },
	Leave { left: Node, members: Vec<Node> },
	Notify { sender: Node, payload: Vec<u8> },
}

/// Shared in-process bus representing the group. One `GroupBus` per test
/// cluster or dev deployment; each [`LocalDriver`] is one participant.
pub struct GroupBus {
	tx: broadcast::Sender<BusPayload>,
	master: Mutex<Option<NodeId>>,
	participants: Mutex<HashMap<NodeId, CheckJoinHandle>>,
}

impl GroupBus {
	pub fn new() -> Arc<Self> {
		let (tx, _rx) = broadcast::channel(1024);
		Arc::new(GroupBus {
			tx,
			master: Mutex::new(None),
			participants: Mutex::new(HashMap::new()),
		})
	}
}

/// An in-process participant in a [`GroupBus`].
pub struct LocalDriver {
	node: Node,
	bus: Arc<GroupBus>,
}

impl LocalDriver {
	/// Joins `bus` as `node`, registering `check_join` as the admission
	/// authority this participant offers should it become master, and
	/// spawning a background task that forwards bus traffic to `sink` for
	/// as long as the returned driver handle is alive.
	pub fn new(node: Node, bus: Arc<GroupBus>, check_join: CheckJoinHandle, sink: SinkHandle) -> Self {
		bus.participants.lock().unwrap().insert(node.id(), check_join);

		let mut rx = bus.tx.subscribe();
		tokio::spawn(async move {
			while let Ok(payload) = rx.recv().await {
				let event = match payload {
					BusPayload::Join { joined, payload } => Delivery::Join {
						joined,
						decision: classify_result(&payload),
						payload,
					},
					BusPayload::Leave { left, members } => Delivery::Leave { left, members },
					BusPayload::Notify { sender, payload } => Delivery::Notify { sender, payload },
				};
				sink.deliver(event).await;
			}
		});

		LocalDriver { node, bus }
	}

	/// Run admission on behalf of `req`: selects the current master (or, if
	/// none yet, treats this join as the cluster's first self-join) and
	/// invokes its `on_check_join`, updating mastership on `MasterTransfer`.
	fn run_admission(&self, req: &JoinRequest) -> JoinMessage {
		let mut master = self.bus.master.lock().unwrap();
		let is_self = master.is_none();

		let authority = match *master {
			None => self
				.bus
				.participants
				.lock()
				.unwrap()
				.get(&req.candidate.id())
				.cloned()
				.expect("candidate must register with the bus before joining"),
			Some(master_id) => self
				.bus
				.participants
				.lock()
				.unwrap()
				.get(&master_id)
				.cloned()
				.expect("current master must still be registered"),
		};

		let (decision, resp) = authority.on_check_join(req, is_self);

		if matches!(decision, JoinDecision::Success | JoinDecision::MasterTransfer) {
			*master = Some(req.candidate.id());
		}
		drop(master);

		JoinMessage {
			proto_ver: req.proto_ver,
			nr_copies: resp.nr_copies as u8,
			cluster_flags: resp.cluster_flags,
			cluster_status: resp.status,
			epoch: resp.epoch,
			ctime: resp.ctime,
			result: result_code(decision),
			inc_epoch: resp.inc_epoch,
			master_transfer: matches!(decision, JoinDecision::MasterTransfer),
			store_name: resp.store_name,
			nodes: req.members.clone(),
			leave_nodes: resp.leave_nodes,
		}
	}
}

/// Classify a delivered join by the outcome it actually carries. `result`
/// alone can't distinguish `Success` from `MasterTransfer` (both encode as
/// 0); the `master_transfer` bit is what disambiguates them on the wire.
fn classify_result(payload: &JoinMessage) -> DeliveredJoin {
	if payload.result == 0 && payload.master_transfer {
		DeliveredJoin::MasterTransfer
	} else if payload.result == 0 {
		DeliveredJoin::Success
	} else if payload.result == JoinError::OldNodeVer as u32 || payload.result == JoinError::NewNodeVer as u32 {
		DeliveredJoin::JoinLater
	} else {
		DeliveredJoin::Fail
	}
}

#[async_trait]
impl GroupDriver for LocalDriver {
	async fn join(&self, req: JoinRequest) -> Result<(), Error> {
		let payload = self.run_admission(&req);
		self.bus
			.tx
			.send(BusPayload::Join {
				joined: req.candidate,
				payload,
			})
			.map_err(|_| Error::Message("group bus closed".into()))?;
		Ok(())
	}

	async fn leave(&self) -> Result<(), Error> {
		self.bus
			.tx
			.send(BusPayload::Leave {
				left: self.node,
				members: Vec::new(),
			})
			.map_err(|_| Error::Message("group bus closed".into()))?;
		Ok(())
	}

	async fn notify(&self, payload: Vec<u8>) -> Result<(), Error> {
		self.bus
			.tx
			.send(BusPayload::Notify {
				sender: self.node,
				payload,
			})
			.map_err(|_| Error::Message("group bus closed".into()))?;
		Ok(())
	}

	async fn block(&self) -> Result<(), Error> {
		Ok(())
	}

	async fn unblock(&self, payload: Vec<u8>) -> Result<(), Error> {
		self.notify(payload).await
	}
}
