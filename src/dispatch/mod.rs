//! Request dispatcher
//!
//! Routes decoded requests to the node store and shapes the replies. Every
//! reply carries the request's correlation id; request-level failures become
//! error replies instead of terminating the server.

use bytes::BytesMut;

use crate::protocol::{
    decode_request, encode_response, max_get_data_len, CodecError, CodecResult, ErrorKind, OpCode,
    Request, RequestBody, Response, ResponseBody, MAX_DATAGRAM_SIZE, PING_PREFIX,
    RESPONSE_HEADER_SIZE,
};
use crate::store::{normalize_path, NodeStore, StoreResult};

/// Outcome of handling one inbound datagram
#[derive(Debug)]
pub struct Reply {
    /// Correlation id of the request being answered
    pub request_id: u64,
    /// Operation, if the tag was recognized
    pub op: Option<OpCode>,
    /// Error reported to the client, if any
    pub error: Option<ErrorKind>,
    /// Encoded reply datagram
    pub datagram: BytesMut,
}

/// Maps requests onto a [`NodeStore`] it exclusively owns
#[derive(Debug)]
pub struct Dispatcher {
    store: NodeStore,
    max_datagram_size: usize,
}

impl Dispatcher {
    pub fn new(max_datagram_size: usize) -> Self {
        Self::with_store(NodeStore::new(), max_datagram_size)
    }

    pub fn with_store(store: NodeStore, max_datagram_size: usize) -> Self {
        Self {
            store,
            // An error reply must always fit.
            max_datagram_size: max_datagram_size.max(RESPONSE_HEADER_SIZE),
        }
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    pub fn max_datagram_size(&self) -> usize {
        self.max_datagram_size
    }

    /// Decode, dispatch and encode one datagram.
    ///
    /// Fails only when the datagram cannot be decoded; there is no id to
    /// answer in that case and the caller drops it.
    pub fn handle_datagram(&mut self, bytes: &[u8]) -> CodecResult<Reply> {
        let request = decode_request(bytes)?;
        let request_id = request.id;
        let op = request.body.op();

        let response = self.dispatch(request);
        let (datagram, error) = self.encode(&response);

        Ok(Reply {
            request_id,
            op,
            error,
            datagram,
        })
    }

    /// Apply a single request to the store
    pub fn dispatch(&mut self, request: Request) -> Response {
        let Request { id, path, body } = request;

        let op = match body.op() {
            Some(op) => op,
            None => {
                tracing::warn!("Got unknown operation tag {} in request {}", body.tag(), id);
                return Response::error(id, ErrorKind::BadRequest, None);
            }
        };
        tracing::debug!("Got {} request with id {} for {:?}", op.name(), id, path);

        let result = match body {
            RequestBody::Ping { data } => Ok(self.ping(data)),
            RequestBody::Create { data } => self.create(&path, data),
            RequestBody::Exists => Ok(ResponseBody::Exists {
                exists: self.store.exists(&path),
            }),
            RequestBody::GetData => self
                .store
                .get_data(&path)
                .map(|(data, stat)| ResponseBody::GetData { stat, data })
                .map_err(|e| e.kind()),
            RequestBody::SetData { data, .. } => self.set_data(&path, data),
            RequestBody::Delete { .. } | RequestBody::GetChildren | RequestBody::Sync => {
                Err(ErrorKind::NotImplemented)
            }
            RequestBody::Unknown { .. } => Err(ErrorKind::BadRequest),
        };

        match result {
            Ok(body) => Response::new(id, body),
            Err(kind) => {
                tracing::debug!("{} request {} failed: {}", op.name(), id, kind);
                Response::error(id, kind, Some(op))
            }
        }
    }

    /// Encode a response, replacing it with a `CapacityExceeded` error reply
    /// when it does not fit in one datagram.
    pub fn encode(&self, response: &Response) -> (BytesMut, Option<ErrorKind>) {
        match encode_response(response, self.max_datagram_size) {
            Ok(buf) => (buf, response.body.error_kind()),
            Err(e) => {
                tracing::warn!("Reply to request {} rejected: {}", response.request_id, e);
                let kind = match e {
                    CodecError::CapacityExceeded(..) => ErrorKind::CapacityExceeded,
                    _ => ErrorKind::Unknown,
                };
                let fallback = Response::error(response.request_id, kind, response.body.op());
                let buf = encode_response(&fallback, self.max_datagram_size)
                    .expect("error replies always fit in a datagram");
                (buf, Some(kind))
            }
        }
    }

    fn ping(&self, data: Vec<u8>) -> ResponseBody {
        let mut reply = Vec::with_capacity(PING_PREFIX.len() + data.len());
        reply.extend_from_slice(PING_PREFIX);
        reply.extend_from_slice(&data);
        ResponseBody::Ping { data: reply }
    }

    fn create(&mut self, path: &str, data: Vec<u8>) -> Result<ResponseBody, ErrorKind> {
        let path = normalize_path(path);
        if self.store.exists(path) {
            tracing::debug!("Can't create {} because it exists", path);
            return Err(ErrorKind::NodeExists);
        }
        self.check_data_len(data.len())?;

        let created: StoreResult<_> = self
            .store
            .create(path, data)
            .and_then(|_| self.store.stat(path));
        created
            .map(|stat| ResponseBody::Create { stat })
            .map_err(|e| e.kind())
    }

    fn set_data(&mut self, path: &str, data: Vec<u8>) -> Result<ResponseBody, ErrorKind> {
        self.check_data_len(data.len())?;
        self.store
            .set_data(path, data)
            .map(|stat| ResponseBody::SetData { stat })
            .map_err(|e| e.kind())
    }

    /// Data that could never be read back in one datagram is rejected up front
    fn check_data_len(&self, len: usize) -> Result<(), ErrorKind> {
        let max = max_get_data_len(self.max_datagram_size);
        if len > max {
            tracing::debug!("Rejecting {} bytes of data (max: {})", len, max);
            return Err(ErrorKind::CapacityExceeded);
        }
        Ok(())
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(MAX_DATAGRAM_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode_response, encode_request, RESPONSE_HEADER_SIZE};

    fn request(id: u64, path: &str, body: RequestBody) -> Request {
        Request::new(id, path, body)
    }

    fn expect_error(response: &Response) -> ErrorKind {
        response.body.error_kind().expect("expected an error reply")
    }

    #[test]
    fn test_ping_echoes_with_prefix() {
        let mut dispatcher = Dispatcher::default();
        let response = dispatcher.dispatch(request(1, "", RequestBody::Ping { data: b"x".to_vec() }));

        assert_eq!(response.request_id, 1);
        assert_eq!(
            response.body,
            ResponseBody::Ping {
                data: b"pingback: x".to_vec()
            }
        );
        assert_eq!(dispatcher.store().len(), 1);
    }

    #[test]
    fn test_create_and_exists() {
        let mut dispatcher = Dispatcher::default();
        let created = dispatcher.dispatch(request(1, "/foo", RequestBody::Create { data: Vec::new() }));
        assert!(matches!(created.body, ResponseBody::Create { stat } if stat.version == 0));

        let exists = dispatcher.dispatch(request(2, "/foo", RequestBody::Exists));
        assert_eq!(exists.body, ResponseBody::Exists { exists: true });
        assert_eq!(exists.request_id, 2);

        let missing = dispatcher.dispatch(request(3, "/bar", RequestBody::Exists));
        assert_eq!(missing.body, ResponseBody::Exists { exists: false });
    }

    #[test]
    fn test_create_errors() {
        let mut dispatcher = Dispatcher::default();
        dispatcher.dispatch(request(1, "/foo", RequestBody::Create { data: Vec::new() }));

        let again = dispatcher.dispatch(request(2, "/foo/", RequestBody::Create { data: Vec::new() }));
        assert_eq!(expect_error(&again), ErrorKind::NodeExists);
        assert_eq!(again.request_id, 2);

        let orphan = dispatcher.dispatch(request(3, "/a/b", RequestBody::Create { data: Vec::new() }));
        assert_eq!(expect_error(&orphan), ErrorKind::NoNode);

        let relative = dispatcher.dispatch(request(4, "a", RequestBody::Create { data: Vec::new() }));
        assert_eq!(expect_error(&relative), ErrorKind::BadRequest);
    }

    #[test]
    fn test_create_keeps_initial_data() {
        let mut dispatcher = Dispatcher::default();
        dispatcher.dispatch(request(1, "/cfg", RequestBody::Create { data: b"init".to_vec() }));

        let got = dispatcher.dispatch(request(2, "/cfg", RequestBody::GetData));
        match got.body {
            ResponseBody::GetData { data, stat } => {
                assert_eq!(data, b"init");
                assert_eq!(stat.version, 0);
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_set_then_get() {
        let mut dispatcher = Dispatcher::default();
        dispatcher.dispatch(request(1, "/foo", RequestBody::Create { data: Vec::new() }));

        let set = dispatcher.dispatch(request(
            2,
            "/foo",
            RequestBody::SetData {
                version: -1,
                data: b"hi".to_vec(),
            },
        ));
        assert!(matches!(set.body, ResponseBody::SetData { stat } if stat.version == 1));

        let got = dispatcher.dispatch(request(3, "/foo", RequestBody::GetData));
        match got.body {
            ResponseBody::GetData { data, stat } => {
                assert_eq!(data, b"hi");
                assert_eq!(stat.version, 1);
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_missing_node() {
        let mut dispatcher = Dispatcher::default();
        let got = dispatcher.dispatch(request(5, "/missing", RequestBody::GetData));
        assert_eq!(expect_error(&got), ErrorKind::NoNode);
        assert_eq!(got.body.op(), Some(OpCode::GetData));

        let set = dispatcher.dispatch(request(
            6,
            "/missing",
            RequestBody::SetData {
                version: 0,
                data: Vec::new(),
            },
        ));
        assert_eq!(expect_error(&set), ErrorKind::NoNode);
    }

    #[test]
    fn test_reserved_operations_not_implemented() {
        let mut dispatcher = Dispatcher::default();
        for body in [
            RequestBody::Delete { version: 0 },
            RequestBody::GetChildren,
            RequestBody::Sync,
        ] {
            let response = dispatcher.dispatch(request(8, "/", body));
            assert_eq!(expect_error(&response), ErrorKind::NotImplemented);
            assert_eq!(response.request_id, 8);
        }
    }

    #[test]
    fn test_unknown_operation_is_bad_request() {
        let mut dispatcher = Dispatcher::default();
        let response = dispatcher.dispatch(request(9, "/", RequestBody::Unknown { tag: 999 }));
        assert_eq!(response, Response::error(9, ErrorKind::BadRequest, None));
    }

    #[test]
    fn test_oversized_set_data_rejected() {
        let max = 256;
        let mut dispatcher = Dispatcher::new(max);
        dispatcher.dispatch(request(1, "/big", RequestBody::Create { data: Vec::new() }));

        let too_big = vec![0u8; max_get_data_len(max) + 1];
        let response = dispatcher.dispatch(request(
            2,
            "/big",
            RequestBody::SetData {
                version: -1,
                data: too_big,
            },
        ));
        assert_eq!(expect_error(&response), ErrorKind::CapacityExceeded);
        assert_eq!(dispatcher.store().stat("/big").unwrap().version, 0);

        let fits = vec![0u8; max_get_data_len(max)];
        let response = dispatcher.dispatch(request(
            3,
            "/big",
            RequestBody::SetData {
                version: -1,
                data: fits,
            },
        ));
        assert_eq!(response.body.error_kind(), None);

        let response = dispatcher.dispatch(request(4, "/big", RequestBody::GetData));
        let (buf, error) = dispatcher.encode(&response);
        assert_eq!(error, None);
        assert_eq!(buf.len(), max);
    }

    #[test]
    fn test_oversized_create_rejected() {
        let max = 256;
        let mut dispatcher = Dispatcher::new(max);

        let too_big = vec![7u8; max_get_data_len(max) + 1];
        let response = dispatcher.dispatch(request(1, "/big", RequestBody::Create { data: too_big }));
        assert_eq!(
            response,
            Response::error(1, ErrorKind::CapacityExceeded, Some(OpCode::Create))
        );
        assert!(!dispatcher.store().exists("/big"));
        assert_eq!(dispatcher.store().len(), 1);

        let fits = vec![7u8; max_get_data_len(max)];
        let response = dispatcher.dispatch(request(2, "/big", RequestBody::Create { data: fits }));
        match response.body {
            ResponseBody::Create { stat } => {
                assert_eq!(stat.data_length, max_get_data_len(max) as u64);
            }
            other => panic!("unexpected reply: {:?}", other),
        }
        assert!(dispatcher.store().exists("/big"));

        // The full node is still readable in one datagram.
        let response = dispatcher.dispatch(request(3, "/big", RequestBody::GetData));
        let (buf, error) = dispatcher.encode(&response);
        assert_eq!(error, None);
        assert_eq!(buf.len(), max);
    }

    #[test]
    fn test_oversized_ping_reply_becomes_error() {
        let max = 64;
        let mut dispatcher = Dispatcher::new(max);
        let response = dispatcher.dispatch(request(4, "", RequestBody::Ping { data: vec![1; max] }));

        let (buf, error) = dispatcher.encode(&response);
        assert_eq!(error, Some(ErrorKind::CapacityExceeded));
        assert_eq!(buf.len(), RESPONSE_HEADER_SIZE);

        let decoded = decode_response(&buf).unwrap();
        assert_eq!(
            decoded,
            Response::error(4, ErrorKind::CapacityExceeded, Some(OpCode::Ping))
        );
    }

    #[test]
    fn test_handle_datagram() {
        let mut dispatcher = Dispatcher::default();
        let datagram = encode_request(
            &request(42, "/node", RequestBody::Create { data: b"d".to_vec() }),
            MAX_DATAGRAM_SIZE,
        )
        .unwrap();

        let reply = dispatcher.handle_datagram(&datagram).unwrap();
        assert_eq!(reply.request_id, 42);
        assert_eq!(reply.op, Some(OpCode::Create));
        assert_eq!(reply.error, None);

        let response = decode_response(&reply.datagram).unwrap();
        assert_eq!(response.request_id, 42);
        assert!(matches!(response.body, ResponseBody::Create { .. }));
    }

    #[test]
    fn test_handle_malformed_datagram() {
        let mut dispatcher = Dispatcher::default();
        assert!(matches!(
            dispatcher.handle_datagram(b"short"),
            Err(CodecError::Malformed(_))
        ));
        assert_eq!(dispatcher.store().len(), 1);
    }
}
