//! Embedded transactional key-value store with primary/replica replication.
//!
//! A [`Store`] holds named buckets of string-keyed [`Value`]s and exposes
//! exactly two entry points: [`Store::read`] runs a closure against an
//! immutable snapshot, and [`Store::update`] runs a closure whose mutations
//! commit atomically or not at all. Every committed update is appended to a
//! durable transaction log, which is the store's source of truth: state is
//! rebuilt from it on open, and it is the unit of replication.
//!
//! A [`Replica`] mirrors a primary by pulling that log through an
//! [`Importer`] and replaying it locally. Replicas serve reads from their
//! own state and reject local writes.
//!
//! ```no_run
//! use std::sync::Arc;
//! use terrapin::{Replica, ReplicaConfig, Store};
//!
//! # fn main() -> terrapin::Result<()> {
//! let primary = Arc::new(Store::open("primary", "/var/lib/app")?);
//! primary.update(|txn| {
//!     let mut bkt = txn.create("users")?;
//!     bkt.put("alice", "admin")?;
//!     Ok(())
//! })?;
//!
//! let replica = Replica::open(
//!     "mirror",
//!     "/var/lib/app-mirror",
//!     Arc::clone(&primary),
//!     ReplicaConfig::default(),
//! )?;
//! replica.sync_now()?;
//! let role = replica.read(|txn| txn.bucket("users")?.get("alice"))?;
//! # let _ = role;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
mod bucket;
pub mod error;
pub mod events;
pub mod log;
mod replica;
mod store;
mod txn;
mod value;

pub use error::{Error, Result};
pub use events::{EventSink, ReplicationEvent, TracingSink, Verbosity};
pub use log::{LogEntry, Op, TxnId};
pub use replica::{Importer, Replica, ReplicaConfig};
pub use store::Store;
pub use txn::{ReadBucket, ReadTransaction, WriteBucket, WriteTransaction};
pub use value::Value;
