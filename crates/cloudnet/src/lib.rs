//! # Cloudnet
//!
//! The node runtime: packet channels, RPC over those channels, cluster
//! messaging, and the replicated configuration entities built on top.
//!
//! ## Layers
//!
//! - `packet`, `transport`, `channel`, `network`: framed packets over any
//!   `Transport`, correlated queries, per-channel ordered dispatch.
//! - `rpc`: channel 1 served by `cloudrpc::Invoker`, plus the `RpcSender` proxy.
//! - `message`, `messenger`: node-addressed messages on channel 2.
//! - `sync`, `store`, `entity`, `provider`, `remote`: replicated entities.
//! - `context`: constructs all of the above for one node.

pub mod channel;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod entity;
pub mod listener;
pub mod logging;
pub mod message;
pub mod messenger;
pub mod network;
pub mod packet;
pub mod provider;
pub mod remote;
pub mod rpc;
pub mod store;
pub mod sync;
pub mod task;
pub mod transport;


pub use context::NodeContext;
pub use task::AsyncResult;
