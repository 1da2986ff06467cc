use crate::error::Result;
use crate::request::Request;
use crate::response::Response;

pub mod msgpack;

pub use self::msgpack::MsgpackCodec;

/// Header fields shared by every request and response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Request type for requests, status for responses.
    pub code: u32,
    pub sync: u64,
    pub schema_version: Option<u64>,
}

/// Codec trait for turning requests and responses into frame bodies and back.
///
/// A frame body is the header map followed by the body map; the length
/// prefix belongs to the transport.
pub trait Codec: Send + Sync {
    /// Encode a request sent with the given sync
    fn encode_request(&self, sync: u64, request: &Request) -> Result<Vec<u8>>;

    /// Decode a request frame body into its sync and request
    fn decode_request(&self, bytes: &[u8]) -> Result<(u64, Request)>;

    /// Encode a response
    fn encode_response(&self, response: &Response) -> Result<Vec<u8>>;

    /// Decode a response frame body
    fn decode_response(&self, bytes: &[u8]) -> Result<Response>;

    /// Decode only the header of a frame body
    fn decode_header(&self, bytes: &[u8]) -> Result<Header>;
}
