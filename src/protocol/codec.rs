//! Protocol codec for encoding/decoding datagrams
//!
//! Requests and responses are hand-packed: a fixed 24-byte header followed by
//! length-prefixed fields whose presence depends on the operation tag.
//! Declared lengths are always checked against the bytes actually received
//! before anything is copied out.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use super::{
    ErrorKind, OpCode, Request, RequestBody, Response, ResponseBody, Stat, ERROR_RESPONSE_TAG,
    MAX_PATH_LEN, NO_ERROR_TAG,
};

/// Header size: id(8) + op(8) + path_len(8) = 24 bytes
pub const REQUEST_HEADER_SIZE: usize = 24;

/// Header size: request_id(8) + error(8) + op(8) = 24 bytes
pub const RESPONSE_HEADER_SIZE: usize = 24;

/// Fixed prefix of a successful GetData reply: header + stat + data length
const GET_DATA_PREFIX_SIZE: usize = RESPONSE_HEADER_SIZE + Stat::ENCODED_LEN + 8;

/// Codec errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Message too large: {0} bytes (max: {1})")]
    CapacityExceeded(usize, usize),

    #[error("Path too long: {0} bytes (max: {1})")]
    PathTooLong(usize, usize),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Largest data blob that still fits in a GetData reply of `max_size` bytes
pub fn max_get_data_len(max_size: usize) -> usize {
    max_size.saturating_sub(GET_DATA_PREFIX_SIZE)
}

/// Serialized size of a request
pub fn request_len(request: &Request) -> usize {
    let trailer = match &request.body {
        RequestBody::Ping { data } | RequestBody::Create { data } => 8 + data.len(),
        RequestBody::Delete { .. } => 8,
        RequestBody::SetData { data, .. } => 8 + 8 + data.len(),
        RequestBody::Exists
        | RequestBody::GetData
        | RequestBody::GetChildren
        | RequestBody::Sync
        | RequestBody::Unknown { .. } => 0,
    };
    REQUEST_HEADER_SIZE + request.path.len() + trailer
}

/// Serialized size of a response
pub fn response_len(response: &Response) -> usize {
    let trailer = match &response.body {
        ResponseBody::Ping { data } => 8 + data.len(),
        ResponseBody::Create { .. } | ResponseBody::SetData { .. } => Stat::ENCODED_LEN,
        ResponseBody::Exists { .. } => 8,
        ResponseBody::GetData { data, .. } => Stat::ENCODED_LEN + 8 + data.len(),
        ResponseBody::Error { .. } => 0,
    };
    RESPONSE_HEADER_SIZE + trailer
}

/// Encode a request into a single datagram of at most `max_size` bytes
pub fn encode_request(request: &Request, max_size: usize) -> CodecResult<BytesMut> {
    if request.path.len() > MAX_PATH_LEN {
        return Err(CodecError::PathTooLong(request.path.len(), MAX_PATH_LEN));
    }

    let len = request_len(request);
    if len > max_size {
        return Err(CodecError::CapacityExceeded(len, max_size));
    }

    let mut buf = BytesMut::with_capacity(len);
    buf.put_u64_le(request.id);
    buf.put_u64_le(request.body.tag());
    put_blob(&mut buf, request.path.as_bytes());

    match &request.body {
        RequestBody::Ping { data } | RequestBody::Create { data } => put_blob(&mut buf, data),
        RequestBody::Delete { version } => buf.put_i64_le(*version),
        RequestBody::SetData { version, data } => {
            buf.put_i64_le(*version);
            put_blob(&mut buf, data);
        }
        RequestBody::Exists
        | RequestBody::GetData
        | RequestBody::GetChildren
        | RequestBody::Sync
        | RequestBody::Unknown { .. } => {}
    }

    debug_assert_eq!(buf.len(), len);
    Ok(buf)
}

/// Decode a request datagram.
///
/// Unknown operation tags decode to [`RequestBody::Unknown`] so the caller can
/// still answer with the request id. Bytes after the last field are ignored.
pub fn decode_request(bytes: &[u8]) -> CodecResult<Request> {
    let mut buf = bytes;
    if buf.remaining() < REQUEST_HEADER_SIZE {
        return Err(CodecError::Malformed(format!(
            "{} bytes is shorter than the {}-byte request header",
            bytes.len(),
            REQUEST_HEADER_SIZE
        )));
    }

    let id = buf.get_u64_le();
    let tag = buf.get_u64_le();
    let path_len = buf.get_u64_le();
    if path_len > MAX_PATH_LEN as u64 {
        return Err(CodecError::Malformed(format!(
            "path length {} exceeds {}",
            path_len, MAX_PATH_LEN
        )));
    }
    let path = String::from_utf8(take_bytes(&mut buf, path_len, "path")?)
        .map_err(|_| CodecError::Malformed("path is not valid UTF-8".to_string()))?;

    let body = match OpCode::from_tag(tag) {
        Some(OpCode::Ping) => RequestBody::Ping {
            data: take_blob(&mut buf, "ping data")?,
        },
        Some(OpCode::Create) => RequestBody::Create {
            data: take_blob(&mut buf, "create data")?,
        },
        Some(OpCode::Delete) => RequestBody::Delete {
            version: take_i64(&mut buf, "delete version")?,
        },
        Some(OpCode::Exists) => RequestBody::Exists,
        Some(OpCode::GetData) => RequestBody::GetData,
        Some(OpCode::SetData) => {
            let version = take_i64(&mut buf, "set_data version")?;
            let data = take_blob(&mut buf, "set_data data")?;
            RequestBody::SetData { version, data }
        }
        Some(OpCode::GetChildren) => RequestBody::GetChildren,
        Some(OpCode::Sync) => RequestBody::Sync,
        None => RequestBody::Unknown { tag },
    };

    Ok(Request { id, path, body })
}

/// Encode a response into a single datagram of at most `max_size` bytes
pub fn encode_response(response: &Response, max_size: usize) -> CodecResult<BytesMut> {
    let len = response_len(response);
    if len > max_size {
        return Err(CodecError::CapacityExceeded(len, max_size));
    }

    let mut buf = BytesMut::with_capacity(len);
    buf.put_u64_le(response.request_id);

    match &response.body {
        ResponseBody::Error { kind, op } => {
            buf.put_u64_le(kind.tag());
            buf.put_u64_le(op.map(OpCode::response_tag).unwrap_or(ERROR_RESPONSE_TAG));
        }
        body => {
            buf.put_u64_le(NO_ERROR_TAG);
            // Every non-error body maps to an operation.
            let op = body.op().map(OpCode::response_tag).unwrap_or(ERROR_RESPONSE_TAG);
            buf.put_u64_le(op);
        }
    }

    match &response.body {
        ResponseBody::Ping { data } => put_blob(&mut buf, data),
        ResponseBody::Create { stat } | ResponseBody::SetData { stat } => put_stat(&mut buf, stat),
        ResponseBody::Exists { exists } => buf.put_u64_le(u64::from(*exists)),
        ResponseBody::GetData { stat, data } => {
            put_stat(&mut buf, stat);
            put_blob(&mut buf, data);
        }
        ResponseBody::Error { .. } => {}
    }

    debug_assert_eq!(buf.len(), len);
    Ok(buf)
}

/// Decode a response datagram. The trailer is only read on success.
pub fn decode_response(bytes: &[u8]) -> CodecResult<Response> {
    let mut buf = bytes;
    if buf.remaining() < RESPONSE_HEADER_SIZE {
        return Err(CodecError::Malformed(format!(
            "{} bytes is shorter than the {}-byte response header",
            bytes.len(),
            RESPONSE_HEADER_SIZE
        )));
    }

    let request_id = buf.get_u64_le();
    let error_tag = buf.get_u64_le();
    let response_tag = buf.get_u64_le();
    let op = OpCode::from_response_tag(response_tag);

    if let Some(kind) = ErrorKind::from_tag(error_tag) {
        return Ok(Response::error(request_id, kind, op));
    }

    let body = match op {
        Some(OpCode::Ping) => ResponseBody::Ping {
            data: take_blob(&mut buf, "ping data")?,
        },
        Some(OpCode::Create) => ResponseBody::Create {
            stat: take_stat(&mut buf)?,
        },
        Some(OpCode::Exists) => ResponseBody::Exists {
            exists: take_u64(&mut buf, "exists flag")? != 0,
        },
        Some(OpCode::GetData) => {
            let stat = take_stat(&mut buf)?;
            let data = take_blob(&mut buf, "get_data data")?;
            ResponseBody::GetData { stat, data }
        }
        Some(OpCode::SetData) => ResponseBody::SetData {
            stat: take_stat(&mut buf)?,
        },
        _ => {
            return Err(CodecError::Malformed(format!(
                "unexpected response tag {} without an error",
                response_tag
            )))
        }
    };

    Ok(Response { request_id, body })
}

fn put_blob(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u64_le(data.len() as u64);
    buf.put_slice(data);
}

fn put_stat(buf: &mut BytesMut, stat: &Stat) {
    for field in stat.fields() {
        buf.put_u64_le(field);
    }
}

fn take_u64(buf: &mut &[u8], field: &str) -> CodecResult<u64> {
    if buf.remaining() < 8 {
        return Err(CodecError::Malformed(format!("truncated {}", field)));
    }
    Ok(buf.get_u64_le())
}

fn take_i64(buf: &mut &[u8], field: &str) -> CodecResult<i64> {
    if buf.remaining() < 8 {
        return Err(CodecError::Malformed(format!("truncated {}", field)));
    }
    Ok(buf.get_i64_le())
}

fn take_bytes(buf: &mut &[u8], len: u64, field: &str) -> CodecResult<Vec<u8>> {
    let len = usize::try_from(len)
        .ok()
        .filter(|len| *len <= buf.remaining())
        .ok_or_else(|| {
            CodecError::Malformed(format!(
                "{} declares {} bytes but only {} remain",
                field,
                len,
                buf.remaining()
            ))
        })?;

    let out = (*buf)[..len].to_vec();
    buf.advance(len);
    Ok(out)
}

fn take_blob(buf: &mut &[u8], field: &str) -> CodecResult<Vec<u8>> {
    let len = take_u64(buf, field)?;
    take_bytes(buf, len, field)
}

fn take_stat(buf: &mut &[u8]) -> CodecResult<Stat> {
    if buf.remaining() < Stat::ENCODED_LEN {
        return Err(CodecError::Malformed("truncated stat".to_string()));
    }
    let mut fields = [0u64; 11];
    for field in fields.iter_mut() {
        *field = buf.get_u64_le();
    }
    Ok(Stat::from_fields(fields))
}
