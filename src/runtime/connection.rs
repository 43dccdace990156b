//! Per-connection protocol state.
//!
//! A `Connection` owns the inbound and outbound byte buffers for one socket
//! and the set of in-flight requests multiplexed over it. It performs no
//! I/O itself: the event loop appends received bytes with [`receive`] and
//! drains [`pending_output`] to the socket.
//!
//! ## Request Lifecycle
//!
//! ```text
//! BEGIN_REQUEST ──> params streaming ──> params closed ──> on_params_ready
//!                   stdin streaming (any time) ──────────> on_data
//!                   stdin closed ─────────────────────────> on_complete
//! ```
//!
//! The end-request record is written once input is closed or a callback
//! has returned a non-zero status, whichever comes first.
//!
//! [`receive`]: Connection::receive
//! [`pending_output`]: Connection::pending_output

use crate::protocol::record::{self, BeginRequestBody, ProtocolStatus, Record, RecordType, Role};
use crate::protocol::{capability_value, decode_pairs, encode_pair_into};
use crate::request::{Handler, Request};
use bytes::{Buf, BytesMut};
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Initial capacity of the inbound and outbound buffers.
const BUFFER_CAPACITY: usize = 16 * 1024;

/// Server-side bookkeeping for one request.
#[derive(Debug, Default)]
struct RequestState {
    request: Request,
    params_buffer: Vec<u8>,
    params_closed: bool,
    input_closed: bool,
    status: i32,
    response_closed: bool,
}

impl RequestState {
    fn finished(&self) -> bool {
        self.params_closed && self.input_closed
    }
}

/// Protocol state for a single transport connection.
#[derive(Debug)]
pub struct Connection {
    input: BytesMut,
    output: BytesMut,
    requests: BTreeMap<u16, RequestState>,
    /// Set once any begin-request arrives without the keep-connection flag.
    close_after_response: bool,
    /// Close once the outbound buffer drains.
    close: bool,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    pub fn new() -> Self {
        Self {
            input: BytesMut::with_capacity(BUFFER_CAPACITY),
            output: BytesMut::with_capacity(BUFFER_CAPACITY),
            requests: BTreeMap::new(),
            close_after_response: false,
            close: false,
        }
    }

    /// Append received bytes and process every complete record.
    pub fn receive<H: Handler>(&mut self, data: &[u8], handler: &mut H) {
        self.input.extend_from_slice(data);
        self.process_input(handler);
    }

    /// Bytes waiting to be written to the peer.
    pub fn pending_output(&self) -> &[u8] {
        &self.output
    }

    pub fn has_output(&self) -> bool {
        !self.output.is_empty()
    }

    /// Drop `n` bytes that have been written to the peer.
    pub fn advance_output(&mut self, n: usize) {
        self.output.advance(n);
    }

    /// Mark the connection to be closed once output drains.
    pub fn mark_close(&mut self) {
        self.close = true;
    }

    pub fn close_requested(&self) -> bool {
        self.close
    }

    /// True when the connection can be released.
    pub fn is_closable(&self) -> bool {
        self.close && self.output.is_empty()
    }

    /// Number of in-flight requests.
    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    /// Move buffered request output into the outbound buffer and release
    /// requests whose params and input are both closed.
    pub fn flush_requests(&mut self) {
        let mut ended = false;
        for (&id, state) in self.requests.iter_mut() {
            ended |= write_request(&mut self.output, id, state);
        }
        if ended {
            self.apply_keep_alive();
        }
        self.requests.retain(|_, state| !state.finished());
    }

    fn apply_keep_alive(&mut self) {
        if self.close_after_response {
            self.close = true;
        }
    }

    fn process_input<H: Handler>(&mut self, handler: &mut H) {
        let mut input = std::mem::take(&mut self.input);
        let mut consumed = 0;

        loop {
            match record::parse(&input[consumed..]) {
                record::ParseResult::Complete(rec, n) => {
                    self.dispatch(rec, handler);
                    consumed += n;
                }
                record::ParseResult::Incomplete => break,
                record::ParseResult::BadVersion(version) => {
                    debug!(version, "Unsupported protocol version, closing connection");
                    self.close = true;
                    break;
                }
            }
        }

        input.advance(consumed);
        self.input = input;
    }

    fn dispatch<H: Handler>(&mut self, rec: Record<'_>, handler: &mut H) {
        let id = rec.header.request_id;
        let content = rec.content;
        trace!(
            record_type = ?rec.header.record_type,
            request_id = id,
            len = content.len(),
            "Record"
        );

        match rec.header.record_type {
            RecordType::GetValues => self.get_values(content),
            RecordType::BeginRequest => self.begin_request(id, content),
            RecordType::AbortRequest => self.abort_request(id),
            RecordType::Params => self.params(id, content, handler),
            RecordType::Stdin => self.stdin(id, content, handler),
            RecordType::Data => {}
            other => {
                let code = u8::from(other);
                debug!(record_type = code, "Unknown record type");
                record::write_unknown_type(&mut self.output, code);
            }
        }
    }

    fn get_values(&mut self, content: &[u8]) {
        let mut body = Vec::new();
        let mut pair = Vec::new();
        for (name, _) in decode_pairs(content) {
            let Some(value) = capability_value(&name) else {
                continue;
            };
            pair.clear();
            encode_pair_into(&mut pair, &name, value);
            // The reply is a single record; only whole pairs are sent.
            if body.len() + pair.len() > record::MAX_CONTENT_LEN {
                break;
            }
            body.extend_from_slice(&pair);
        }
        record::write_record(
            &mut self.output,
            RecordType::GetValuesResult,
            record::NULL_REQUEST_ID,
            &body,
        );
    }

    fn begin_request(&mut self, id: u16, content: &[u8]) {
        let Some(body) = BeginRequestBody::decode(content) else {
            debug!(request_id = id, len = content.len(), "Malformed begin-request ignored");
            return;
        };

        if !body.keep_conn() {
            self.close_after_response = true;
        }

        if body.role != Role::Responder {
            debug!(request_id = id, role = ?body.role, "Rejecting unsupported role");
            record::write_end_request(&mut self.output, id, 0, ProtocolStatus::UnknownRole);
            self.apply_keep_alive();
            return;
        }

        if self.requests.insert(id, RequestState::default()).is_some() {
            debug!(request_id = id, "Request superseded by new begin-request");
        }
    }

    fn abort_request(&mut self, id: u16) {
        let Some(state) = self.requests.remove(&id) else {
            return;
        };
        debug!(request_id = id, "Request aborted by peer");

        if !state.response_closed {
            record::write_end_request(&mut self.output, id, 1, ProtocolStatus::RequestComplete);
            self.apply_keep_alive();
        }
    }

    fn params<H: Handler>(&mut self, id: u16, content: &[u8], handler: &mut H) {
        let Some(state) = self.requests.get_mut(&id) else {
            return;
        };
        if state.params_closed {
            return;
        }

        if !content.is_empty() {
            state.params_buffer.extend_from_slice(content);
            return;
        }

        for (key, value) in decode_pairs(&state.params_buffer) {
            state.request.params.entry(key).or_insert(value);
        }
        state.params_buffer = Vec::new();
        state.params_closed = true;

        let request = &mut state.request;
        state.status = handler.on_params_ready(request);
        if state.status == 0 && !request.input.is_empty() {
            state.status = handler.on_data(request);
            if state.status == 0 && state.input_closed {
                state.status = handler.on_complete(request);
            }
        }

        if write_request(&mut self.output, id, state) {
            self.apply_keep_alive();
        }
    }

    fn stdin<H: Handler>(&mut self, id: u16, content: &[u8], handler: &mut H) {
        let Some(state) = self.requests.get_mut(&id) else {
            return;
        };
        if state.input_closed {
            return;
        }

        if content.is_empty() {
            state.input_closed = true;
        } else {
            state.request.input.extend_from_slice(content);
        }

        if !state.params_closed || state.status != 0 {
            return;
        }

        state.status = if state.input_closed {
            handler.on_complete(&mut state.request)
        } else {
            handler.on_data(&mut state.request)
        };

        if write_request(&mut self.output, id, state) {
            self.apply_keep_alive();
        }
    }
}

/// Frame a request's pending output into `output`.
///
/// Returns true if this call wrote the request's end-request record.
fn write_request(output: &mut BytesMut, id: u16, state: &mut RequestState) -> bool {
    let request = &mut state.request;
    if !request.out.is_empty() {
        record::write_stream(output, RecordType::Stdout, id, &request.out);
        request.out.clear();
    }
    if !request.err.is_empty() {
        record::write_stream(output, RecordType::Stderr, id, &request.err);
        request.err.clear();
    }

    if (state.input_closed || state.status != 0) && !state.response_closed {
        record::write_stream(output, RecordType::Stdout, id, &[]);
        record::write_stream(output, RecordType::Stderr, id, &[]);
        record::write_end_request(
            output,
            id,
            state.status as u32,
            ProtocolStatus::RequestComplete,
        );
        state.response_closed = true;
        return true;
    }

    false
}
