//! Reply payloads.
//!
//! ```text
//! success, void:   true, false
//! success, value:  true, value
//! failure:         false, type_name: str, message: str, trace: List<str>
//! ```
//!
//! The caller knows whether it asked a void method, so the two success shapes
//! are never ambiguous on the receiving side.

use cloudpack::Decoder;
use cloudpack::Encoder;
use cloudpack::Unpack;

use crate::HandlingResult;
use crate::RemoteFailure;
use crate::Reply;
use crate::Result;

pub fn encode(result: &HandlingResult) -> Result<Vec<u8>> {
    match result {
        HandlingResult::Success(Reply::Void) => {
            let mut enc = Encoder::with_capacity(2);
            enc.bool(true)?;
            enc.bool(false)?;
            Ok(enc.into_bytes()?)
        }
        HandlingResult::Success(Reply::Value(value)) => {
            let mut enc = Encoder::new();
            enc.bool(true)?;
            value.pack_into(&mut enc)?;
            Ok(enc.into_bytes()?)
        }
        HandlingResult::Failure(failure) => encode_failure(failure),
    }
}

pub fn encode_failure(failure: &RemoteFailure) -> Result<Vec<u8>> {
    let mut enc = Encoder::new();
    enc.bool(false)?;
    enc.str(&failure.type_name)?;
    enc.str(&failure.message)?;
    enc.pack(&failure.trace)?;
    Ok(enc.into_bytes()?)
}

/// Decodes the reply to a value-returning call.
pub fn decode<T: Unpack>(payload: &[u8]) -> Result<std::result::Result<T, RemoteFailure>> {
    let mut dec = Decoder::new(payload);
    if dec.bool()? {
        Ok(Ok(dec.unpack()?))
    } else {
        Ok(Err(read_failure(&mut dec)?))
    }
}

/// Decodes the reply to a void call.
pub fn decode_void(payload: &[u8]) -> Result<std::result::Result<(), RemoteFailure>> {
    let mut dec = Decoder::new(payload);
    if dec.bool()? {
        dec.bool()?;
        Ok(Ok(()))
    } else {
        Ok(Err(read_failure(&mut dec)?))
    }
}

fn read_failure(dec: &mut Decoder<'_>) -> Result<RemoteFailure> {
    let type_name = dec.str()?.to_string();
    let message = dec.str()?.to_string();
    let trace = if dec.is_empty() { Vec::new() } else { dec.unpack()? };
    Ok(RemoteFailure { type_name, message, trace })
}
