//! EventSerializer: a single FIFO of `{Join, Leave, Notify}` events,
//! dispatched one at a time and only while no object I/O local to this
//! node is outstanding.

use std::collections::VecDeque;

use async_trait::async_trait;
use ringd_util::error::Error;

use crate::driver::DeliveredJoin;
use crate::node::Node;
use crate::status::ClusterStatus;
use crate::wire::JoinMessage;

/// A queued unit of post-delivery work. Distinct from
/// [`crate::driver::Delivery`]: a `Delivery` is the raw driver callback: an
/// `Event` is what the membership handlers enqueue for the worker pool
/// once that callback has been classified and folded into cluster state.
#[derive(Debug, Clone)]
pub enum Event {
	Join {
		joined: Node,
		members: Vec<Node>,
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

/// The dispatch rule as a pure scheduler: a FIFO gated by two counters.
/// Mutated only from the actor's single-consumer loop, so no internal
/// locking is needed.
#[derive(Debug, Default)]
pub struct EventSerializer {
	queue: VecDeque<Event>,
	running: bool,
	nr_outstanding_io: usize,
}

impl EventSerializer {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&mut self, event: Event) {
		self.queue.push_back(event);
	}

	pub fn is_running(&self) -> bool {
		self.running
	}

	pub fn nr_outstanding_io(&self) -> usize {
		self.nr_outstanding_io
	}

	pub fn begin_io(&mut self) {
		self.nr_outstanding_io += 1;
	}

	pub fn end_io(&mut self) {
		self.nr_outstanding_io = self.nr_outstanding_io.saturating_sub(1);
	}

	/// Whether the request queue may be drained right now: only reachable
	/// while the event queue is empty.
	pub fn can_drain_requests(&self) -> bool {
		self.queue.is_empty()
	}

	/// Pop the next event if the dispatch rule currently allows running one:
	/// the queue is non-empty, no event is already running, and no local
	/// object I/O is outstanding.
	pub fn try_dispatch(&mut self) -> Option<Event> {
		if self.running || self.nr_outstanding_io > 0 {
			return None;
		}
		let event = self.queue.pop_front()?;
		self.running = true;
		Some(event)
	}

	/// Mark the in-flight event's done-handler as complete, allowing
	/// `try_dispatch` to hand out the next one.
	pub fn finish_running(&mut self) {
		self.running = false;
	}
}

/// Fetches a peer's VDI-in-use bitmap. The object store itself is out of
/// scope here; this is the seam a real implementation plugs a fetch into.
#[async_trait]
pub trait VdiBitmapFetcher: Send + Sync {
	async fn fetch(&self, peer: Node) -> Result<(), Error>;
}

/// Run the Join event handler: fetch the VDI-in-use bitmap from each peer in
/// `members` other than `self_node`. Short-circuits after the first
/// successful fetch while `status == WaitFormat`: any one peer suffices.
pub async fn run_join_handler(
	members: &[Node],
	self_node: Node,
	status: ClusterStatus,
	fetcher: &dyn VdiBitmapFetcher,
) -> Result<(), Error> {
	for peer in members.iter().filter(|n| **n != self_node) {
		match fetcher.fetch(*peer).await {
			Ok(()) if status == ClusterStatus::WaitFormat => return Ok(()),
			Ok(()) => {}
			Err(e) => warn!("VDI bitmap fetch from {:?} failed: {}", peer, e),
		}
	}
	Ok(())
}

/// `check_majority`: a cluster of fewer than 3 members never loses majority
/// by definition; otherwise a strict majority (`nr/2 + 1`) of the prior
/// membership must remain reachable.
pub fn check_majority(nr_members: usize, nr_reachable: usize) -> bool {
	if nr_members < 3 {
		return true;
	}
	nr_reachable >= nr_members / 2 + 1
}

/// Probes reachability of remaining members over the transport.
#[async_trait]
pub trait Reachability: Send + Sync {
	async fn probe(&self, peer: Node) -> bool;
}

/// Policy invoked on a suspected minority partition. Production code aborts
/// the process, favoring safety over liveness; tests substitute a recording
/// stand-in so the suite doesn't tear down the runtime.
pub trait PartitionPolicy: Send + Sync {
	fn abort(&self);
}

pub struct ProcessAbort;
impl PartitionPolicy for ProcessAbort {
	fn abort(&self) {
		error!("minority partition suspected, aborting");
		std::process::abort();
	}
}

/// Run the Leave event handler: probe the remaining members and invoke
/// `policy.abort()` if fewer than a majority answer.
pub async fn run_leave_handler(members: &[Node], reachability: &dyn Reachability, policy: &dyn PartitionPolicy) {
	let mut nr_reachable = 0;
	for peer in members {
		if reachability.probe(*peer).await {
			nr_reachable += 1;
		}
	}
	if !check_majority(members.len(), nr_reachable) {
		policy.abort();
	}
}
