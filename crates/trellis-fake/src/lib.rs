//! In-process stand-in for a column store cluster.
//!
//! `MemoryStore` holds the data, `Session` interprets wire requests against
//! it, `MemoryConnector` plugs sessions into the client's `Connector` seam
//! (with fault injection and a call log), and `FakeServer` serves the same
//! sessions over TCP.

mod connector;
mod row;
mod server;
mod session;
mod store;

pub use connector::{CallLog, CallRecord, Faults, MemoryConnector, MemoryTransport, OPEN};
pub use server::FakeServer;
pub use session::{CLUSTER_NAME, Session, VERSION};
pub use store::MemoryStore;
