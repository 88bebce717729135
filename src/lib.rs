//! Client facade over a hierarchical coordination service.
//!
//! A [`Client`] owns one [`Session`] and shares it with a [`NodeRepository`]
//! for node CRUD, a [`ChangeNotifier`] for subtree watches and local caches,
//! and a [`LockFacade`] for distributed locks. The service itself sits behind
//! the [`Coordinator`]/[`Connector`] traits; [`MemoryEnsemble`] is the
//! in-process implementation.

pub mod backend;
mod client;
mod config;
mod errors;
mod lock;
pub mod metrics;
mod notify;
mod repository;
pub mod serialize;
mod session;
pub mod utils;

pub use backend::Acl;
pub use backend::Connector;
pub use backend::Coordinator;
pub use backend::CreateMode;
pub use backend::MemoryEnsemble;
pub use backend::Stat;
#[cfg(feature = "zookeeper")]
pub use backend::ZooKeeperConnector;
pub use client::*;
pub use config::*;
pub use errors::*;
pub use lock::*;
pub use metrics::gather_metrics;
pub use notify::*;
pub use repository::*;
pub use serialize::BincodeCodec;
pub use serialize::PayloadCodec;
pub use serialize::ProstCodec;
pub use session::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;

#[cfg(test)]
mod errors_test;
