//! Caller-side construction of call payloads.

use cloudpack::Encoder;
use cloudpack::Pack;

use crate::Result;

/// One method call on a remote type, with its arguments already packed.
#[derive(Debug, Clone)]
pub struct RpcCall {
    type_name: String,
    method: String,
    expects_result: bool,
    args: Vec<u8>,
    arity: usize,
}

impl RpcCall {
    pub fn new(type_name: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            method: method.into(),
            expects_result: true,
            args: Vec::new(),
            arity: 0,
        }
    }

    /// Appends one argument.
    pub fn arg<T: Pack + ?Sized>(mut self, value: &T) -> Result<Self> {
        let mut enc = Encoder::new();
        enc.pack(value)?;
        self.args.extend_from_slice(&enc.into_bytes()?);
        self.arity += 1;
        Ok(self)
    }

    /// Marks the call as not wanting a reply.
    pub fn fire_and_forget(mut self) -> Self {
        self.expects_result = false;
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Number of arguments appended, which is the arity the receiver resolves.
    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn expects_result(&self) -> bool {
        self.expects_result
    }

    /// Continues with a call on the result of this one.
    pub fn then(self, next: RpcCall) -> RpcChain {
        RpcChain { calls: vec![self, next] }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        enc.bool(false)?;
        self.encode_frame(&mut enc)?;
        Ok(enc.into_bytes()?)
    }

    fn encode_frame(&self, enc: &mut Encoder) -> Result<()> {
        enc.str(&self.type_name)?;
        enc.str(&self.method)?;
        enc.bool(self.expects_result)?;
        enc.list_begin()?;
        enc.raw(&self.args)?;
        enc.list_end()?;
        Ok(())
    }
}

/// A sequence of calls, each executed against the result of the previous.
#[derive(Debug, Clone)]
pub struct RpcChain {
    calls: Vec<RpcCall>,
}

impl RpcChain {
    pub fn then(mut self, next: RpcCall) -> Self {
        self.calls.push(next);
        self
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Whether the final call wants a reply.
    pub fn expects_result(&self) -> bool {
        self.calls.last().is_some_and(RpcCall::expects_result)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        enc.bool(true)?;
        enc.i32(self.calls.len() as i32)?;
        for call in &self.calls {
            call.encode_frame(&mut enc)?;
        }
        Ok(enc.into_bytes()?)
    }
}
