//! FastCGI wire protocol.
//!
//! - `pairs`: name-value pair codec used by params and capability records
//! - `record`: record header, type codes and record framing
//!
//! Both modules are pure: they operate on byte slices and append to
//! [`bytes::BufMut`] buffers, with no I/O.

pub mod pairs;
pub mod record;

pub use pairs::{decode_pairs, encode_pair, encode_pair_into, MAX_PAIR_LENGTH};
pub use record::{
    parse, BeginRequestBody, Header, ParseResult, ProtocolStatus, Record, RecordType, Role,
    HEADER_LEN, MAX_CONTENT_LEN, VERSION_1,
};

/// Capability name: maximum concurrent transport connections.
pub const MAX_CONNS: &[u8] = b"FCGI_MAX_CONNS";
/// Capability name: maximum concurrent requests.
pub const MAX_REQS: &[u8] = b"FCGI_MAX_REQS";
/// Capability name: whether connections are multiplexed.
pub const MPXS_CONNS: &[u8] = b"FCGI_MPXS_CONNS";

/// Canned answer for a capability query, or `None` for unknown names.
pub fn capability_value(name: &[u8]) -> Option<&'static [u8]> {
    match name {
        MAX_CONNS => Some(b"100"),
        MAX_REQS => Some(b"1000"),
        MPXS_CONNS => Some(b"1"),
        _ => None,
    }
}
