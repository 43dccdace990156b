//! Record framing.
//!
//! Every FastCGI record starts with a fixed 8-byte header:
//!
//! ```text
//! +---------+------+------------+----------------+---------+----------+
//! | version | type | request id | content length | padding | reserved |
//! |   u8    |  u8  |   u16 BE   |     u16 BE     |   u8    |    u8    |
//! +---------+------+------------+----------------+---------+----------+
//! ```
//!
//! followed by `content length` bytes of content and `padding` ignored bytes.

use bytes::BufMut;

/// Length of the fixed record header.
pub const HEADER_LEN: usize = 8;

/// The only protocol version understood.
pub const VERSION_1: u8 = 1;

/// Largest content length a single record can carry.
pub const MAX_CONTENT_LEN: usize = 0xffff;

/// Request id used by management records.
pub const NULL_REQUEST_ID: u16 = 0;

/// `flags` bit in a begin-request body asking to keep the connection open.
pub const KEEP_CONN: u8 = 1;

/// Record type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    BeginRequest,
    AbortRequest,
    EndRequest,
    Params,
    Stdin,
    Stdout,
    Stderr,
    Data,
    GetValues,
    GetValuesResult,
    UnknownType,
    /// Any type code this implementation does not recognize.
    Other(u8),
}

impl From<u8> for RecordType {
    fn from(code: u8) -> Self {
        match code {
            1 => RecordType::BeginRequest,
            2 => RecordType::AbortRequest,
            3 => RecordType::EndRequest,
            4 => RecordType::Params,
            5 => RecordType::Stdin,
            6 => RecordType::Stdout,
            7 => RecordType::Stderr,
            8 => RecordType::Data,
            9 => RecordType::GetValues,
            10 => RecordType::GetValuesResult,
            11 => RecordType::UnknownType,
            other => RecordType::Other(other),
        }
    }
}

impl From<RecordType> for u8 {
    fn from(ty: RecordType) -> u8 {
        match ty {
            RecordType::BeginRequest => 1,
            RecordType::AbortRequest => 2,
            RecordType::EndRequest => 3,
            RecordType::Params => 4,
            RecordType::Stdin => 5,
            RecordType::Stdout => 6,
            RecordType::Stderr => 7,
            RecordType::Data => 8,
            RecordType::GetValues => 9,
            RecordType::GetValuesResult => 10,
            RecordType::UnknownType => 11,
            RecordType::Other(code) => code,
        }
    }
}

/// Application role requested in a begin-request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Responder,
    Authorizer,
    Filter,
    Other(u16),
}

impl From<u16> for Role {
    fn from(code: u16) -> Self {
        match code {
            1 => Role::Responder,
            2 => Role::Authorizer,
            3 => Role::Filter,
            other => Role::Other(other),
        }
    }
}

impl From<Role> for u16 {
    fn from(role: Role) -> u16 {
        match role {
            Role::Responder => 1,
            Role::Authorizer => 2,
            Role::Filter => 3,
            Role::Other(code) => code,
        }
    }
}

/// Protocol-level status carried by an end-request record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProtocolStatus {
    RequestComplete = 0,
    CantMultiplexConnections = 1,
    Overloaded = 2,
    UnknownRole = 3,
}

/// Decoded record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub record_type: RecordType,
    pub request_id: u16,
    pub content_length: u16,
    pub padding_length: u8,
}

impl Header {
    /// Decode a header from the start of `input`.
    ///
    /// Returns `None` if fewer than [`HEADER_LEN`] bytes are available.
    pub fn decode(input: &[u8]) -> Option<Header> {
        let raw: &[u8; HEADER_LEN] = input.get(..HEADER_LEN)?.try_into().ok()?;
        Some(Header {
            version: raw[0],
            record_type: RecordType::from(raw[1]),
            request_id: u16::from_be_bytes([raw[2], raw[3]]),
            content_length: u16::from_be_bytes([raw[4], raw[5]]),
            padding_length: raw[6],
        })
    }

    /// Encode the header, including the trailing reserved byte.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.version);
        buf.put_u8(self.record_type.into());
        buf.put_u16(self.request_id);
        buf.put_u16(self.content_length);
        buf.put_u8(self.padding_length);
        buf.put_u8(0);
    }

    /// Header, content and padding bytes taken together.
    pub fn record_len(&self) -> usize {
        HEADER_LEN + self.content_length as usize + self.padding_length as usize
    }
}

/// A complete record borrowed from the input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    pub header: Header,
    pub content: &'a [u8],
}

/// Begin-request body: role and flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeginRequestBody {
    pub role: Role,
    pub flags: u8,
}

impl BeginRequestBody {
    /// Length of the body on the wire (role, flags, 5 reserved bytes).
    pub const LEN: usize = 8;

    /// Decode the body, returning `None` if `content` is too short.
    pub fn decode(content: &[u8]) -> Option<BeginRequestBody> {
        if content.len() < Self::LEN {
            return None;
        }
        Some(BeginRequestBody {
            role: Role::from(u16::from_be_bytes([content[0], content[1]])),
            flags: content[2],
        })
    }

    pub fn keep_conn(&self) -> bool {
        self.flags & KEEP_CONN != 0
    }
}

/// Parse result.
#[derive(Debug)]
pub enum ParseResult<'a> {
    /// Successfully parsed record with bytes consumed.
    Complete(Record<'a>, usize),
    /// Need more data.
    Incomplete,
    /// Header carries a version other than 1.
    BadVersion(u8),
}

/// Parse one record from the start of `input`.
///
/// A record is only returned once its header, content and padding are all
/// present. The version is checked as soon as a full header is available.
pub fn parse(input: &[u8]) -> ParseResult<'_> {
    let header = match Header::decode(input) {
        Some(header) => header,
        None => return ParseResult::Incomplete,
    };

    if header.version != VERSION_1 {
        return ParseResult::BadVersion(header.version);
    }

    let total = header.record_len();
    if input.len() < total {
        return ParseResult::Incomplete;
    }

    let content = &input[HEADER_LEN..HEADER_LEN + header.content_length as usize];
    ParseResult::Complete(Record { header, content }, total)
}

/// Padding that brings `content_len` up to a multiple of 8.
pub fn padding_for(content_len: usize) -> u8 {
    ((8 - content_len % 8) % 8) as u8
}

/// Append a single padded record. `content` must fit in one record.
pub fn write_record<B: BufMut>(
    buf: &mut B,
    record_type: RecordType,
    request_id: u16,
    content: &[u8],
) {
    debug_assert!(content.len() <= MAX_CONTENT_LEN);
    let padding = padding_for(content.len());
    Header {
        version: VERSION_1,
        record_type,
        request_id,
        content_length: content.len() as u16,
        padding_length: padding,
    }
    .encode(buf);
    buf.put_slice(content);
    buf.put_bytes(0, padding as usize);
}

/// Append `data` as a stream of records of `record_type`.
///
/// Data longer than [`MAX_CONTENT_LEN`] is split across several records.
/// Empty data produces a single zero-length record, which is the stream
/// terminator.
pub fn write_stream<B: BufMut>(
    buf: &mut B,
    record_type: RecordType,
    request_id: u16,
    data: &[u8],
) {
    if data.is_empty() {
        write_record(buf, record_type, request_id, &[]);
        return;
    }
    for chunk in data.chunks(MAX_CONTENT_LEN) {
        write_record(buf, record_type, request_id, chunk);
    }
}

/// Append an end-request record.
pub fn write_end_request<B: BufMut>(
    buf: &mut B,
    request_id: u16,
    app_status: u32,
    protocol_status: ProtocolStatus,
) {
    let mut body = [0u8; 8];
    body[..4].copy_from_slice(&app_status.to_be_bytes());
    body[4] = protocol_status as u8;
    write_record(buf, RecordType::EndRequest, request_id, &body);
}

/// Append an unknown-type record echoing `unknown`.
pub fn write_unknown_type<B: BufMut>(buf: &mut B, unknown: u8) {
    let mut body = [0u8; 8];
    body[0] = unknown;
    write_record(buf, RecordType::UnknownType, NULL_REQUEST_ID, &body);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(record_type: RecordType, request_id: u16, len: u16, padding: u8) -> Vec<u8> {
        let mut buf = Vec::new();
        Header {
            version: VERSION_1,
            record_type,
            request_id,
            content_length: len,
            padding_length: padding,
        }
        .encode(&mut buf);
        buf
    }

    #[test]
    fn test_header_layout() {
        let buf = header(RecordType::Stdin, 0x1234, 0x0102, 6);
        assert_eq!(buf, vec![1, 5, 0x12, 0x34, 0x01, 0x02, 6, 0]);
        let decoded = Header::decode(&buf).unwrap();
        assert_eq!(decoded.record_type, RecordType::Stdin);
        assert_eq!(decoded.request_id, 0x1234);
        assert_eq!(decoded.content_length, 0x0102);
        assert_eq!(decoded.record_len(), 8 + 0x0102 + 6);
    }

    #[test]
    fn test_parse_complete() {
        let mut buf = header(RecordType::Params, 1, 3, 5);
        buf.extend_from_slice(b"abc");
        buf.extend_from_slice(&[0; 5]);
        buf.extend_from_slice(b"next");

        match parse(&buf) {
            ParseResult::Complete(record, 16) => {
                assert_eq!(record.header.record_type, RecordType::Params);
                assert_eq!(record.content, b"abc");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_waits_for_padding() {
        let mut buf = header(RecordType::Params, 1, 3, 5);
        buf.extend_from_slice(b"abc");
        buf.extend_from_slice(&[0; 4]);

        assert!(matches!(parse(&buf), ParseResult::Incomplete));
        assert!(matches!(parse(&buf[..7]), ParseResult::Incomplete));
    }

    #[test]
    fn test_parse_bad_version() {
        let mut buf = header(RecordType::Stdin, 1, 0, 0);
        buf[0] = 2;
        assert!(matches!(parse(&buf), ParseResult::BadVersion(2)));
    }

    #[test]
    fn test_unknown_type_code_preserved() {
        assert_eq!(RecordType::from(42), RecordType::Other(42));
        assert_eq!(u8::from(RecordType::Other(42)), 42);
    }

    #[test]
    fn test_padding() {
        assert_eq!(padding_for(0), 0);
        assert_eq!(padding_for(1), 7);
        assert_eq!(padding_for(8), 0);
        assert_eq!(padding_for(MAX_CONTENT_LEN), 1);
    }

    #[test]
    fn test_write_stream_chunks() {
        let data = vec![7u8; MAX_CONTENT_LEN + 10];
        let mut buf = Vec::new();
        write_stream(&mut buf, RecordType::Stdout, 3, &data);

        let (first, n1) = match parse(&buf) {
            ParseResult::Complete(record, n) => (record, n),
            other => panic!("unexpected: {:?}", other),
        };
        assert_eq!(first.content.len(), MAX_CONTENT_LEN);
        assert_eq!(first.header.padding_length, 1);
        assert_eq!(first.header.request_id, 3);

        let (second, n2) = match parse(&buf[n1..]) {
            ParseResult::Complete(record, n) => (record, n),
            other => panic!("unexpected: {:?}", other),
        };
        assert_eq!(second.content.len(), 10);
        assert_eq!(second.header.padding_length, 6);
        assert_eq!(n1 + n2, buf.len());
        assert_eq!((n1 + n2) % 8, 0);
    }

    #[test]
    fn test_write_empty_stream_is_terminator() {
        let mut buf = Vec::new();
        write_stream(&mut buf, RecordType::Stderr, 9, b"");
        assert_eq!(buf, vec![1, 7, 0, 9, 0, 0, 0, 0]);
    }

    #[test]
    fn test_end_request_body() {
        let mut buf = Vec::new();
        write_end_request(&mut buf, 1, 0x01020304, ProtocolStatus::UnknownRole);
        assert_eq!(&buf[..8], &[1, 3, 0, 1, 0, 8, 0, 0]);
        assert_eq!(&buf[8..], &[1, 2, 3, 4, 3, 0, 0, 0]);
    }

    #[test]
    fn test_begin_request_body() {
        let body = BeginRequestBody::decode(&[0, 1, 1, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(body.role, Role::Responder);
        assert!(body.keep_conn());

        let body = BeginRequestBody::decode(&[0, 3, 0, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(body.role, Role::Filter);
        assert!(!body.keep_conn());

        assert!(BeginRequestBody::decode(&[0, 1, 1]).is_none());
    }
}
