//! # Invocation Engine
//!
//! Turns an inbound call payload into at most one reply payload.
//!
//! ## Payload layout
//!
//! ```text
//! chained: bool
//! [chain_size: i32]              if chained
//! frame * (chained ? chain_size : 1)
//!
//! frame = type_name: str, method: str, expects_result: bool, args: List
//! ```
//!
//! ## Invariants
//!
//! 1. The first frame of a chain runs lenient, without a context instance.
//!    Every later frame runs strict, against the previous frame's result.
//! 2. After a failed frame no further frame executes, but every remaining
//!    frame is still consumed from the buffer.
//! 3. A reply is produced only if the last frame expects one. This holds for
//!    failures too: the flags of the frames between the failed one and the
//!    last one play no part. A frame whose handler is not registered ends the
//!    chain silently.

use std::sync::Arc;

use cloudpack::Decoder;

use crate::reply;
use crate::Error;
use crate::HandlerRegistry;
use crate::RemoteFailure;
use crate::Reply;
use crate::Result;
use crate::Target;

/// Everything a handler needs to execute one frame.
pub struct InvocationContext<'a> {
    /// Target supplied by the chain, if any.
    pub target: Option<Target>,
    pub method: &'a str,
    pub expects_result: bool,
    /// The argument list body, positioned at the first argument.
    pub args: Decoder<'a>,
    pub normalize_primitives: bool,
    pub strict_instance_usage: bool,
}

impl<'a> InvocationContext<'a> {
    /// Reads `method, expects_result, args` from `dec`, leaving it positioned
    /// after the frame.
    pub fn read(dec: &mut Decoder<'a>, target: Option<Target>, strict: bool) -> Result<Self> {
        let method = dec.str()?;
        let expects_result = dec.bool()?;
        let args = dec.list()?;
        Ok(Self {
            target,
            method,
            expects_result,
            args,
            normalize_primitives: true,
            strict_instance_usage: strict,
        })
    }
}

/// Outcome of executing one frame.
#[derive(Debug, Clone)]
pub enum HandlingResult {
    Success(Reply),
    Failure(RemoteFailure),
}

impl HandlingResult {
    pub fn is_success(&self) -> bool {
        matches!(self, HandlingResult::Success(_))
    }
}

enum Chain {
    Start,
    Running(Reply),
    Failed(RemoteFailure),
    /// A frame named an unregistered type.
    Dropped,
}

/// Dispatches call payloads against a handler registry.
#[derive(Debug, Clone)]
pub struct Invoker {
    registry: Arc<HandlerRegistry>,
}

impl Invoker {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Executes every frame of `payload` and returns the encoded reply, if the
    /// caller asked for one.
    ///
    /// An `Err` means the payload itself is malformed; handler failures are
    /// returned as encoded failure replies instead.
    pub fn handle(&self, payload: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut dec = Decoder::new(payload);
        let frames = if dec.bool()? {
            let size = dec.i32()?;
            if size < 1 {
                return Err(Error::ProtocolViolation(format!("chain of size {}", size)));
            }
            size
        } else {
            1
        };

        let mut state = Chain::Start;
        let mut expects_result = false;

        for index in 0..frames {
            let type_name = dec.str()?;
            let target = match &state {
                Chain::Running(reply) => reply.as_target(),
                _ => None,
            };
            let ctx = InvocationContext::read(&mut dec, target, index > 0)?;
            expects_result = ctx.expects_result;

            state = match state {
                Chain::Start | Chain::Running(_) => self.execute(type_name, ctx),
                // consumed above, not executed
                other => other,
            };
        }
        if !dec.is_empty() {
            return Err(Error::ProtocolViolation(format!("{} trailing bytes after last frame", dec.remaining())));
        }

        let result = match state {
            Chain::Running(reply) => HandlingResult::Success(reply),
            Chain::Failed(failure) => HandlingResult::Failure(failure),
            Chain::Start | Chain::Dropped => return Ok(None),
        };
        if !expects_result {
            return Ok(None);
        }
        Ok(Some(reply::encode(&result)?))
    }

    fn execute(&self, type_name: &str, ctx: InvocationContext<'_>) -> Chain {
        let Some(handler) = self.registry.lookup(type_name) else {
            tracing::debug!(type_name, method = ctx.method, "no rpc handler registered, dropping call");
            return Chain::Dropped;
        };
        let method = ctx.method;
        match handler.handle(ctx) {
            HandlingResult::Success(reply) => Chain::Running(reply),
            HandlingResult::Failure(failure) => {
                tracing::warn!(type_name, method, %failure, "rpc method failed");
                Chain::Failed(failure)
            }
        }
    }
}
