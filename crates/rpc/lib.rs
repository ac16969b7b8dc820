//! Cluster membership and epoch coordination core: vnode placement ring,
//! epoch log, cluster status state machine, leave-set tracking, join
//! admission, wire framing, the group-driver boundary, and the actor tying
//! them together behind a single inbox.

#[macro_use]
extern crate tracing;

pub mod driver;
pub mod epoch;
pub mod event;
pub mod join;
pub mod leave_set;
pub mod node;
pub mod ring;
pub mod status;
pub mod system;
pub mod wire;
