//! Tarn Protocol - wire model and codec for the binary database protocol
//!
//! Pure, I/O free building blocks shared by the client:
//! typed [`Request`] / [`Response`] values, the MessagePack [`codec`] that
//! turns them into frame bodies and back, the server [`Greeting`] and the
//! `chap-sha1` [`scramble`].
//!
//! # Example
//!
//! ```
//! use tarn_protocol::codec::{Codec, MsgpackCodec};
//! use tarn_protocol::{Request, Value};
//!
//! let request = Request::call("box.info", vec![Value::from(1)]);
//! let bytes = MsgpackCodec.encode_request(42, &request).unwrap();
//! let (sync, decoded) = MsgpackCodec.decode_request(&bytes).unwrap();
//! assert_eq!(sync, 42);
//! assert_eq!(decoded, request);
//! ```

pub mod codec;
pub mod error;
pub mod greeting;
pub mod iproto;
pub mod request;
pub mod response;
pub mod scramble;

// Re-exports for convenience
pub use error::{Error, Result};
pub use greeting::Greeting;
pub use iproto::{Iterator, RequestType};
pub use request::Request;
pub use response::{ColumnMetadata, Payload, Response, ResponseBody, ServerError, SqlInfo};
pub use rmpv::Value;
pub use scramble::scramble;
