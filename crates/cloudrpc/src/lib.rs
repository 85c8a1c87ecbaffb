//! # CloudRPC
//!
//! Method-level remote invocation over `cloudpack` payloads.
//!
//! ## Architecture
//!
//! A node registers an `RpcHandler` per exposed type in a `HandlerRegistry`.
//! The `Invoker` decodes an inbound call payload, resolves each frame's
//! handler, and encodes the reply. Callers build payloads with `RpcCall` and
//! `RpcChain` and decode replies with `reply::decode`.
//!
//! Transport is not this crate's concern: payloads go in and out as bytes.

mod error;
mod frame;
mod handler;
mod invoke;
mod registry;
pub mod reply;

#[cfg(test)]
mod tests;

pub use error::Error;
pub use error::RemoteFailure;
pub use error::Result;
pub use frame::RpcCall;
pub use frame::RpcChain;
pub use handler::Args;
pub use handler::HandlerBuilder;
pub use handler::MethodDescriptor;
pub use handler::Reply;
pub use handler::RpcHandler;
pub use handler::RpcObject;
pub use handler::Target;
pub use invoke::HandlingResult;
pub use invoke::InvocationContext;
pub use invoke::Invoker;
pub use registry::HandlerRegistry;
