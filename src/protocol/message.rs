//! Protocol message definitions
//!
//! Typed requests and responses exchanged between clients and the server.

use serde::{Deserialize, Serialize};

/// Operation identifiers carried in the request header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum OpCode {
    Ping = 100,
    Create = 101,
    Delete = 102,
    Exists = 103,
    GetData = 104,
    SetData = 105,
    GetChildren = 106,
    Sync = 107,
}

/// Response tag used when the request operation was not recognized
pub const ERROR_RESPONSE_TAG: u64 = 1;

/// Offset between an operation tag and its response tag
const RESPONSE_TAG_OFFSET: u64 = 100;

impl OpCode {
    pub fn from_tag(tag: u64) -> Option<Self> {
        match tag {
            100 => Some(OpCode::Ping),
            101 => Some(OpCode::Create),
            102 => Some(OpCode::Delete),
            103 => Some(OpCode::Exists),
            104 => Some(OpCode::GetData),
            105 => Some(OpCode::SetData),
            106 => Some(OpCode::GetChildren),
            107 => Some(OpCode::Sync),
            _ => None,
        }
    }

    pub fn tag(self) -> u64 {
        self as u64
    }

    /// Tag written in the header of a response to this operation
    pub fn response_tag(self) -> u64 {
        self.tag() + RESPONSE_TAG_OFFSET
    }

    pub fn from_response_tag(tag: u64) -> Option<Self> {
        tag.checked_sub(RESPONSE_TAG_OFFSET).and_then(Self::from_tag)
    }

    pub fn name(self) -> &'static str {
        match self {
            OpCode::Ping => "ping",
            OpCode::Create => "create",
            OpCode::Delete => "delete",
            OpCode::Exists => "exists",
            OpCode::GetData => "get_data",
            OpCode::SetData => "set_data",
            OpCode::GetChildren => "get_children",
            OpCode::Sync => "sync",
        }
    }
}

/// Error kinds that can be reported back to a client.
///
/// Undecodable datagrams are not represented here: they carry no usable
/// correlation id and are dropped before a reply can be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Tag not known to this implementation
    Unknown,
    /// Operation tag not recognized, or the path is syntactically invalid
    BadRequest,
    /// Node already exists
    NodeExists,
    /// Node (or its parent) does not exist
    NoNode,
    /// Operation recognized but not supported
    NotImplemented,
    /// Reply would not fit in a single datagram
    CapacityExceeded,
}

/// Wire tag meaning "no error"; distinct from every [`ErrorKind`] tag
pub const NO_ERROR_TAG: u64 = 1;

impl ErrorKind {
    pub fn tag(self) -> u64 {
        match self {
            ErrorKind::Unknown => 0,
            ErrorKind::BadRequest => 2,
            ErrorKind::NodeExists => 3,
            ErrorKind::NoNode => 4,
            ErrorKind::NotImplemented => 5,
            ErrorKind::CapacityExceeded => 6,
        }
    }

    /// Map a wire tag to a kind. Returns `None` for [`NO_ERROR_TAG`].
    pub fn from_tag(tag: u64) -> Option<Self> {
        match tag {
            NO_ERROR_TAG => None,
            2 => Some(ErrorKind::BadRequest),
            3 => Some(ErrorKind::NodeExists),
            4 => Some(ErrorKind::NoNode),
            5 => Some(ErrorKind::NotImplemented),
            6 => Some(ErrorKind::CapacityExceeded),
            _ => Some(ErrorKind::Unknown),
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Unknown => "unknown error",
            ErrorKind::BadRequest => "bad request",
            ErrorKind::NodeExists => "node exists",
            ErrorKind::NoNode => "no node",
            ErrorKind::NotImplemented => "not implemented",
            ErrorKind::CapacityExceeded => "capacity exceeded",
        };
        f.write_str(s)
    }
}

/// Per-node metadata. Serialized as eleven u64 fields in declaration order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Creation transaction id (unused, always zero)
    pub czxid: u64,
    /// Last modification transaction id (unused, always zero)
    pub mzxid: u64,
    pub ctime: u64,
    pub mtime: u64,
    /// Number of writes to the node data
    pub version: u64,
    /// Number of children added
    pub cversion: u64,
    pub aversion: u64,
    pub ephemeral_owner: u64,
    pub data_length: u64,
    pub num_children: u64,
    pub pzxid: u64,
}

impl Stat {
    /// Size of a stat record on the wire
    pub const ENCODED_LEN: usize = 11 * 8;

    pub(crate) fn fields(&self) -> [u64; 11] {
        [
            self.czxid,
            self.mzxid,
            self.ctime,
            self.mtime,
            self.version,
            self.cversion,
            self.aversion,
            self.ephemeral_owner,
            self.data_length,
            self.num_children,
            self.pzxid,
        ]
    }

    pub(crate) fn from_fields(f: [u64; 11]) -> Self {
        Self {
            czxid: f[0],
            mzxid: f[1],
            ctime: f[2],
            mtime: f[3],
            version: f[4],
            cversion: f[5],
            aversion: f[6],
            ephemeral_owner: f[7],
            data_length: f[8],
            num_children: f[9],
            pzxid: f[10],
        }
    }
}

/// A decoded client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Client-assigned correlation id, echoed in the response
    pub id: u64,
    /// Target path (empty for ping)
    pub path: String,
    pub body: RequestBody,
}

/// Operation-specific part of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Ping { data: Vec<u8> },
    Create { data: Vec<u8> },
    /// `version` is reserved and not enforced
    Delete { version: i64 },
    Exists,
    GetData,
    /// `version` is reserved and not enforced
    SetData { version: i64, data: Vec<u8> },
    GetChildren,
    Sync,
    /// Operation tag not known to this server
    Unknown { tag: u64 },
}

impl RequestBody {
    pub fn op(&self) -> Option<OpCode> {
        match self {
            RequestBody::Ping { .. } => Some(OpCode::Ping),
            RequestBody::Create { .. } => Some(OpCode::Create),
            RequestBody::Delete { .. } => Some(OpCode::Delete),
            RequestBody::Exists => Some(OpCode::Exists),
            RequestBody::GetData => Some(OpCode::GetData),
            RequestBody::SetData { .. } => Some(OpCode::SetData),
            RequestBody::GetChildren => Some(OpCode::GetChildren),
            RequestBody::Sync => Some(OpCode::Sync),
            RequestBody::Unknown { .. } => None,
        }
    }

    /// Raw operation tag as written on the wire
    pub fn tag(&self) -> u64 {
        match self {
            RequestBody::Unknown { tag } => *tag,
            other => other.op().map(OpCode::tag).unwrap_or_default(),
        }
    }
}

impl Request {
    pub fn new(id: u64, path: impl Into<String>, body: RequestBody) -> Self {
        Self {
            id,
            path: path.into(),
            body,
        }
    }
}

/// A reply to a single request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Correlation id copied from the request
    pub request_id: u64,
    pub body: ResponseBody,
}

/// Operation-specific part of a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    Ping { data: Vec<u8> },
    Create { stat: Stat },
    Exists { exists: bool },
    GetData { stat: Stat, data: Vec<u8> },
    SetData { stat: Stat },
    /// Failure; `op` is the request operation when it was recognized
    Error { kind: ErrorKind, op: Option<OpCode> },
}

impl ResponseBody {
    pub fn op(&self) -> Option<OpCode> {
        match self {
            ResponseBody::Ping { .. } => Some(OpCode::Ping),
            ResponseBody::Create { .. } => Some(OpCode::Create),
            ResponseBody::Exists { .. } => Some(OpCode::Exists),
            ResponseBody::GetData { .. } => Some(OpCode::GetData),
            ResponseBody::SetData { .. } => Some(OpCode::SetData),
            ResponseBody::Error { op, .. } => *op,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ResponseBody::Error { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl Response {
    pub fn new(request_id: u64, body: ResponseBody) -> Self {
        Self { request_id, body }
    }

    pub fn error(request_id: u64, kind: ErrorKind, op: Option<OpCode>) -> Self {
        Self::new(request_id, ResponseBody::Error { kind, op })
    }
}
