use rmpv::Value;

use crate::codec::{Codec, Header};
use crate::error::{Error, Result};
use crate::iproto::{self, Iterator, RequestType};
use crate::request::Request;
use crate::response::{ColumnMetadata, Payload, Response, ResponseBody, ServerError, SqlInfo};
use crate::scramble::CHAP_SHA1;

/// MessagePack codec for the binary protocol
///
/// Integers are written in their smallest exact representation, floats are
/// always 64-bit and byte strings go out as `bin` so arbitrary bytes survive.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgpackCodec;

impl Codec for MsgpackCodec {
    fn encode_request(&self, sync: u64, request: &Request) -> Result<Vec<u8>> {
        let header = vec![
            (iproto::REQUEST_TYPE, Value::from(request.request_type().code())),
            (iproto::SYNC, Value::from(sync)),
        ];
        encode_frame(header, request_body(request))
    }

    fn decode_request(&self, bytes: &[u8]) -> Result<(u64, Request)> {
        let (header, mut body) = decode_frame(bytes)?;
        let kind = RequestType::from_code(header.code)
            .ok_or_else(|| Error::Decode(format!("unknown request type {}", header.code)))?;

        let request = match kind {
            RequestType::Ping => Request::Ping,
            RequestType::Call => Request::Call {
                function: body.string(iproto::FUNCTION_NAME, "function name")?,
                args: body.array_or_empty(iproto::TUPLE, "arguments")?,
            },
            RequestType::Eval => Request::Eval {
                expr: body.string(iproto::EXPR, "expression")?,
                args: body.array_or_empty(iproto::TUPLE, "arguments")?,
            },
            RequestType::Execute => Request::Execute {
                sql: body.string(iproto::SQL_TEXT, "sql text")?,
                params: body.array_or_empty(iproto::SQL_BIND, "sql bind")?,
            },
            RequestType::Select => {
                let iterator = body.optional_u32(iproto::ITERATOR, "iterator")?.unwrap_or(0);
                Request::Select {
                    space_id: body.u32(iproto::SPACE_ID, "space id")?,
                    index_id: body.optional_u32(iproto::INDEX_ID, "index id")?.unwrap_or(0),
                    key: body.array_or_empty(iproto::KEY, "key")?,
                    limit: body
                        .optional_u32(iproto::LIMIT, "limit")?
                        .unwrap_or(u32::MAX),
                    offset: body.optional_u32(iproto::OFFSET, "offset")?.unwrap_or(0),
                    iterator: Iterator::from_code(iterator)
                        .ok_or_else(|| Error::Decode(format!("unknown iterator {iterator}")))?,
                }
            }
            RequestType::Insert => Request::Insert {
                space_id: body.u32(iproto::SPACE_ID, "space id")?,
                tuple: body.array(iproto::TUPLE, "tuple")?,
            },
            RequestType::Replace => Request::Replace {
                space_id: body.u32(iproto::SPACE_ID, "space id")?,
                tuple: body.array(iproto::TUPLE, "tuple")?,
            },
            RequestType::Update => Request::Update {
                space_id: body.u32(iproto::SPACE_ID, "space id")?,
                index_id: body.optional_u32(iproto::INDEX_ID, "index id")?.unwrap_or(0),
                key: body.array(iproto::KEY, "key")?,
                // update operations travel under the tuple key
                ops: body.array(iproto::TUPLE, "operations")?,
            },
            RequestType::Upsert => Request::Upsert {
                space_id: body.u32(iproto::SPACE_ID, "space id")?,
                tuple: body.array(iproto::TUPLE, "tuple")?,
                ops: body.array(iproto::OPS, "operations")?,
            },
            RequestType::Delete => Request::Delete {
                space_id: body.u32(iproto::SPACE_ID, "space id")?,
                index_id: body.optional_u32(iproto::INDEX_ID, "index id")?.unwrap_or(0),
                key: body.array(iproto::KEY, "key")?,
            },
            RequestType::Auth => {
                let username = body.string(iproto::USER_NAME, "user name")?;
                let mut tuple = body.array(iproto::TUPLE, "auth tuple")?.into_iter();
                let mechanism = tuple.next().and_then(|v| v.as_str().map(str::to_owned));
                if mechanism.as_deref() != Some(CHAP_SHA1) {
                    return Err(Error::decode("unsupported auth mechanism"));
                }
                let scramble = tuple
                    .next()
                    .ok_or_else(|| Error::decode("auth tuple has no scramble"))
                    .and_then(|v| into_bytes(v, "scramble"))?;
                Request::Auth { username, scramble }
            }
        };

        Ok((header.sync, request))
    }

    fn encode_response(&self, response: &Response) -> Result<Vec<u8>> {
        let (status, body) = match &response.body {
            ResponseBody::Ok(payload) => (iproto::OK, payload_body(payload)),
            ResponseBody::Error(err) => (
                iproto::TYPE_ERROR | err.code,
                vec![(iproto::ERROR, Value::from(err.message.as_str()))],
            ),
        };

        let mut header = vec![
            (iproto::REQUEST_TYPE, Value::from(status)),
            (iproto::SYNC, Value::from(response.sync)),
        ];
        if let Some(version) = response.schema_version {
            header.push((iproto::SCHEMA_VERSION, Value::from(version)));
        }
        encode_frame(header, body)
    }

    fn decode_response(&self, bytes: &[u8]) -> Result<Response> {
        let (header, mut body) = decode_frame(bytes)?;

        let body = if header.code & iproto::TYPE_ERROR != 0 {
            // Error bodies never expose data fields, whatever else the frame holds.
            let message = match body.take(iproto::ERROR) {
                Some(Value::String(s)) => s
                    .into_str()
                    .ok_or_else(|| Error::decode("error message is not valid UTF-8"))?,
                Some(other) => return Err(unexpected("error message", &other)),
                None => String::new(),
            };
            ResponseBody::Error(ServerError {
                code: header.code & !iproto::TYPE_ERROR,
                message,
            })
        } else if header.code == iproto::OK {
            ResponseBody::Ok(Payload {
                data: body.take(iproto::DATA),
                metadata: body.take(iproto::METADATA).map(metadata).transpose()?,
                sql_info: body.take(iproto::SQL_INFO).map(sql_info).transpose()?,
            })
        } else {
            return Err(Error::Decode(format!(
                "unexpected response status {:#x}",
                header.code
            )));
        };

        Ok(Response {
            sync: header.sync,
            schema_version: header.schema_version,
            body,
        })
    }

    fn decode_header(&self, bytes: &[u8]) -> Result<Header> {
        let mut cursor = bytes;
        read_header(&mut cursor)
    }
}

fn request_body(request: &Request) -> Vec<(u8, Value)> {
    match request {
        Request::Ping => Vec::new(),
        Request::Call { function, args } => vec![
            (iproto::FUNCTION_NAME, Value::from(function.as_str())),
            (iproto::TUPLE, Value::Array(args.clone())),
        ],
        Request::Eval { expr, args } => vec![
            (iproto::EXPR, Value::from(expr.as_str())),
            (iproto::TUPLE, Value::Array(args.clone())),
        ],
        Request::Execute { sql, params } => vec![
            (iproto::SQL_TEXT, Value::from(sql.as_str())),
            (iproto::SQL_BIND, Value::Array(params.clone())),
        ],
        Request::Select {
            space_id,
            index_id,
            key,
            limit,
            offset,
            iterator,
        } => vec![
            (iproto::SPACE_ID, Value::from(*space_id)),
            (iproto::INDEX_ID, Value::from(*index_id)),
            (iproto::LIMIT, Value::from(*limit)),
            (iproto::OFFSET, Value::from(*offset)),
            (iproto::ITERATOR, Value::from(iterator.code())),
            (iproto::KEY, Value::Array(key.clone())),
        ],
        Request::Insert { space_id, tuple } | Request::Replace { space_id, tuple } => vec![
            (iproto::SPACE_ID, Value::from(*space_id)),
            (iproto::TUPLE, Value::Array(tuple.clone())),
        ],
        Request::Update {
            space_id,
            index_id,
            key,
            ops,
        } => vec![
            (iproto::SPACE_ID, Value::from(*space_id)),
            (iproto::INDEX_ID, Value::from(*index_id)),
            (iproto::KEY, Value::Array(key.clone())),
            (iproto::TUPLE, Value::Array(ops.clone())),
        ],
        Request::Upsert {
            space_id,
            tuple,
            ops,
        } => vec![
            (iproto::SPACE_ID, Value::from(*space_id)),
            (iproto::TUPLE, Value::Array(tuple.clone())),
            (iproto::OPS, Value::Array(ops.clone())),
        ],
        Request::Delete {
            space_id,
            index_id,
            key,
        } => vec![
            (iproto::SPACE_ID, Value::from(*space_id)),
            (iproto::INDEX_ID, Value::from(*index_id)),
            (iproto::KEY, Value::Array(key.clone())),
        ],
        Request::Auth { username, scramble } => vec![
            (iproto::USER_NAME, Value::from(username.as_str())),
            (
                iproto::TUPLE,
                Value::Array(vec![
                    Value::from(CHAP_SHA1),
                    Value::Binary(scramble.clone()),
                ]),
            ),
        ],
    }
}

fn payload_body(payload: &Payload) -> Vec<(u8, Value)> {
    let mut body = Vec::new();
    if let Some(data) = &payload.data {
        body.push((iproto::DATA, data.clone()));
    }
    if let Some(columns) = &payload.metadata {
        let columns = columns
            .iter()
            .map(|column| {
                map(vec![
                    (iproto::FIELD_NAME, Value::from(column.name.as_str())),
                    (iproto::FIELD_TYPE, Value::from(column.field_type.as_str())),
                ])
            })
            .collect();
        body.push((iproto::METADATA, Value::Array(columns)));
    }
    if let Some(info) = &payload.sql_info {
        let mut entries = vec![(iproto::SQL_INFO_ROW_COUNT, Value::from(info.row_count))];
        if !info.autoincrement_ids.is_empty() {
            let ids = info.autoincrement_ids.iter().map(|&id| Value::from(id)).collect();
            entries.push((iproto::SQL_INFO_AUTOINCREMENT_IDS, Value::Array(ids)));
        }
        body.push((iproto::SQL_INFO, map(entries)));
    }
    body
}

fn metadata(value: Value) -> Result<Vec<ColumnMetadata>> {
    let Value::Array(columns) = value else {
        return Err(unexpected("metadata", &value));
    };
    columns
        .into_iter()
        .map(|column| {
            let mut fields = Fields::from_value(column, "column metadata")?;
            Ok(ColumnMetadata {
                name: fields.string(iproto::FIELD_NAME, "field name")?,
                field_type: fields.string(iproto::FIELD_TYPE, "field type")?,
            })
        })
        .collect()
}

fn sql_info(value: Value) -> Result<SqlInfo> {
    let mut fields = Fields::from_value(value, "sql info")?;
    let row_count = fields
        .take(iproto::SQL_INFO_ROW_COUNT)
        .map(|v| v.as_u64().ok_or_else(|| unexpected("row count", &v)))
        .transpose()?
        .unwrap_or(0);
    let autoincrement_ids = fields
        .array_or_empty(iproto::SQL_INFO_AUTOINCREMENT_IDS, "autoincrement ids")?
        .into_iter()
        .map(|v| v.as_i64().ok_or_else(|| unexpected("autoincrement id", &v)))
        .collect::<Result<_>>()?;
    Ok(SqlInfo {
        row_count,
        autoincrement_ids,
    })
}

fn map(entries: Vec<(u8, Value)>) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(key, value)| (Value::from(key), widen_floats(value)))
            .collect(),
    )
}

/// Floats always go out as float64, however deep they sit.
fn widen_floats(value: Value) -> Value {
    match value {
        Value::F32(f) => Value::F64(f64::from(f)),
        Value::Array(items) => Value::Array(items.into_iter().map(widen_floats).collect()),
        Value::Map(entries) => Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (widen_floats(k), widen_floats(v)))
                .collect(),
        ),
        other => other,
    }
}

fn encode_frame(header: Vec<(u8, Value)>, body: Vec<(u8, Value)>) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(64);
    for part in [map(header), map(body)] {
        rmpv::encode::write_value(&mut buf, &part).map_err(|e| Error::Encode(e.to_string()))?;
    }
    Ok(buf)
}

fn read_value(cursor: &mut &[u8], what: &str) -> Result<Value> {
    rmpv::decode::read_value(cursor).map_err(|e| Error::Decode(format!("{what}: {e}")))
}

fn read_header(cursor: &mut &[u8]) -> Result<Header> {
    let mut fields = Fields::from_value(read_value(cursor, "header")?, "header")?;
    Ok(Header {
        code: fields.u32(iproto::REQUEST_TYPE, "request type")?,
        sync: fields
            .take(iproto::SYNC)
            .ok_or_else(|| Error::decode("header has no sync"))
            .and_then(|v| v.as_u64().ok_or_else(|| unexpected("sync", &v)))?,
        schema_version: fields
            .take(iproto::SCHEMA_VERSION)
            .map(|v| v.as_u64().ok_or_else(|| unexpected("schema version", &v)))
            .transpose()?,
    })
}

fn decode_frame(bytes: &[u8]) -> Result<(Header, Fields)> {
    let mut cursor = bytes;
    let header = read_header(&mut cursor)?;
    let body = if cursor.is_empty() {
        Fields::default()
    } else {
        Fields::from_value(read_value(&mut cursor, "body")?, "body")?
    };
    if !cursor.is_empty() {
        return Err(Error::Decode(format!(
            "{} trailing bytes after body",
            cursor.len()
        )));
    }
    Ok((header, body))
}

fn unexpected(what: &str, value: &Value) -> Error {
    Error::Decode(format!("unexpected {what}: {value}"))
}

fn into_bytes(value: Value, what: &str) -> Result<Vec<u8>> {
    match value {
        Value::Binary(bytes) => Ok(bytes),
        Value::String(s) => Ok(s.into_bytes()),
        other => Err(unexpected(what, &other)),
    }
}

/// Integer-keyed map entries pulled out of a decoded map.
#[derive(Debug, Default)]
struct Fields {
    entries: Vec<(u64, Value)>,
}

impl Fields {
    fn from_value(value: Value, what: &str) -> Result<Self> {
        let Value::Map(pairs) = value else {
            return Err(unexpected(what, &value));
        };
        let entries = pairs
            .into_iter()
            .map(|(key, value)| match key.as_u64() {
                Some(key) => Ok((key, value)),
                None => Err(unexpected(&format!("{what} key"), &key)),
            })
            .collect::<Result<_>>()?;
        Ok(Self { entries })
    }

    fn take(&mut self, key: u8) -> Option<Value> {
        let pos = self.entries.iter().position(|(k, _)| *k == u64::from(key))?;
        Some(self.entries.swap_remove(pos).1)
    }

    fn require(&mut self, key: u8, what: &str) -> Result<Value> {
        self.take(key)
            .ok_or_else(|| Error::Decode(format!("missing {what}")))
    }

    fn optional_u32(&mut self, key: u8, what: &str) -> Result<Option<u32>> {
        self.take(key)
            .map(|v| {
                v.as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| unexpected(what, &v))
            })
            .transpose()
    }

    fn u32(&mut self, key: u8, what: &str) -> Result<u32> {
        self.optional_u32(key, what)?
            .ok_or_else(|| Error::Decode(format!("missing {what}")))
    }

    fn string(&mut self, key: u8, what: &str) -> Result<String> {
        match self.require(key, what)? {
            Value::String(s) => s
                .into_str()
                .ok_or_else(|| Error::Decode(format!("{what} is not valid UTF-8"))),
            other => Err(unexpected(what, &other)),
        }
    }

    fn array(&mut self, key: u8, what: &str) -> Result<Vec<Value>> {
        match self.require(key, what)? {
            Value::Array(items) => Ok(items),
            other => Err(unexpected(what, &other)),
        }
    }

    fn array_or_empty(&mut self, key: u8, what: &str) -> Result<Vec<Value>> {
        match self.take(key) {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(unexpected(what, &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(request: Request) {
        let bytes = MsgpackCodec.encode_request(7, &request).unwrap();
        let (sync, decoded) = MsgpackCodec.decode_request(&bytes).unwrap();
        assert_eq!(sync, 7);
        assert_eq!(decoded, request);
    }

    #[test]
    fn ping_uses_smallest_encodings() {
        let bytes = MsgpackCodec.encode_request(1, &Request::Ping).unwrap();
        // {0: 64, 1: 1} {}
        assert_eq!(bytes, vec![0x82, 0x00, 0x40, 0x01, 0x01, 0x80]);
    }

    #[test]
    fn wide_and_negative_integers_pick_widened_markers() {
        let request = Request::call(
            "f",
            vec![
                Value::from(-1i64),
                Value::from(-(1i64 << 31) - 1),
                Value::from(1u64 << 32),
            ],
        );
        let bytes = MsgpackCodec.encode_request(0, &request).unwrap();
        // tail of the body: fixarray(3), negative fixint, int64, uint64
        let tail = &bytes[bytes.len() - 20..];
        assert_eq!(tail[0], 0x93);
        assert_eq!(tail[1], 0xff);
        assert_eq!(tail[2], 0xd3);
        assert_eq!(tail[11], 0xcf);
        roundtrip(request);
    }

    #[test]
    fn floats_and_binary_with_nul_survive() {
        roundtrip(Request::eval(
            "return ...",
            vec![
                Value::F64(1.5),
                Value::F64(-0.25),
                Value::Binary(vec![b'a', 0, b'b', 0, 0]),
                Value::from("nul\0inside"),
            ],
        ));
    }

    #[test]
    fn every_request_kind_roundtrips() {
        roundtrip(Request::Ping);
        roundtrip(Request::execute(
            "SELECT * FROM t WHERE id = ?",
            vec![Value::from(42)],
        ));
        roundtrip(Request::Select {
            space_id: 512,
            index_id: 1,
            key: vec![Value::from("k")],
            limit: 10,
            offset: 5,
            iterator: Iterator::Ge,
        });
        roundtrip(Request::Insert {
            space_id: 512,
            tuple: vec![Value::from(1), Value::Nil, Value::Boolean(true)],
        });
        roundtrip(Request::Replace {
            space_id: 512,
            tuple: vec![Value::from(1)],
        });
        roundtrip(Request::Update {
            space_id: 512,
            index_id: 0,
            key: vec![Value::from(1)],
            ops: vec![Value::Array(vec![
                Value::from("="),
                Value::from(1),
                Value::from("x"),
            ])],
        });
        roundtrip(Request::Upsert {
            space_id: 512,
            tuple: vec![Value::from(1), Value::from(0)],
            ops: vec![Value::Array(vec![
                Value::from("+"),
                Value::from(1),
                Value::from(1),
            ])],
        });
        roundtrip(Request::Delete {
            space_id: 512,
            index_id: 0,
            key: vec![Value::from(1)],
        });
        roundtrip(Request::Auth {
            username: "admin".to_string(),
            scramble: vec![0; 20],
        });
    }

    #[test]
    fn response_roundtrip_keeps_sql_fields() {
        let response = Response {
            sync: 3,
            schema_version: Some(80),
            body: ResponseBody::Ok(Payload {
                data: Some(Value::Array(vec![Value::Array(vec![Value::from(1)])])),
                metadata: Some(vec![ColumnMetadata {
                    name: "ID".to_string(),
                    field_type: "integer".to_string(),
                }]),
                sql_info: None,
            }),
        };
        let bytes = MsgpackCodec.encode_response(&response).unwrap();
        assert_eq!(MsgpackCodec.decode_response(&bytes).unwrap(), response);

        let changed = Response::ok(
            4,
            Payload {
                sql_info: Some(SqlInfo {
                    row_count: 2,
                    autoincrement_ids: vec![10, 11],
                }),
                ..Payload::default()
            },
        );
        let bytes = MsgpackCodec.encode_response(&changed).unwrap();
        assert_eq!(MsgpackCodec.decode_response(&bytes).unwrap(), changed);
    }

    #[test]
    fn single_precision_floats_go_out_as_float64() {
        let request = Request::call(
            "f",
            vec![
                Value::F32(1.5),
                Value::Array(vec![Value::F32(-0.25)]),
                Value::Map(vec![(Value::from("k"), Value::F32(2.0))]),
            ],
        );
        let bytes = MsgpackCodec.encode_request(0, &request).unwrap();
        assert!(!bytes.contains(&0xca));

        let (_, decoded) = MsgpackCodec.decode_request(&bytes).unwrap();
        assert_eq!(
            decoded,
            Request::call(
                "f",
                vec![
                    Value::F64(1.5),
                    Value::Array(vec![Value::F64(-0.25)]),
                    Value::Map(vec![(Value::from("k"), Value::F64(2.0))]),
                ],
            )
        );
    }

    #[test]
    fn error_message_must_be_utf8() {
        let mut bytes = Vec::new();
        let header = map(vec![
            (iproto::REQUEST_TYPE, Value::from(iproto::TYPE_ERROR | 32)),
            (iproto::SYNC, Value::from(3u64)),
        ]);
        rmpv::encode::write_value(&mut bytes, &header).unwrap();
        // {0x31: fixstr "\xff"}
        bytes.extend_from_slice(&[0x81, iproto::ERROR, 0xa1, 0xff]);

        assert!(matches!(
            MsgpackCodec.decode_response(&bytes),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn error_status_never_yields_data() {
        let mut bytes = Vec::new();
        let header = map(vec![
            (iproto::REQUEST_TYPE, Value::from(iproto::TYPE_ERROR | 36)),
            (iproto::SYNC, Value::from(9u64)),
        ]);
        let body = map(vec![
            (iproto::ERROR, Value::from("Space 'ghost' does not exist")),
            (iproto::DATA, Value::Array(vec![Value::from(1)])),
        ]);
        rmpv::encode::write_value(&mut bytes, &header).unwrap();
        rmpv::encode::write_value(&mut bytes, &body).unwrap();

        let response = MsgpackCodec.decode_response(&bytes).unwrap();
        assert_eq!(response.sync, 9);
        assert!(response.payload().is_none());
        assert!(response.rows().is_empty());
        assert_eq!(
            response.into_result().unwrap_err(),
            ServerError {
                code: 36,
                message: "Space 'ghost' does not exist".to_string(),
            }
        );
    }

    #[test]
    fn header_peek_reads_sync_only() {
        let bytes = MsgpackCodec
            .encode_response(&Response::with_data(77, Value::Array(vec![])))
            .unwrap();
        let header = MsgpackCodec.decode_header(&bytes).unwrap();
        assert_eq!(header.sync, 77);
        assert_eq!(header.code, iproto::OK);
    }

    #[test]
    fn malformed_input_is_a_decode_error() {
        assert!(matches!(
            MsgpackCodec.decode_response(&[0xc1]),
            Err(Error::Decode(_))
        ));
        // header without sync
        assert!(matches!(
            MsgpackCodec.decode_response(&[0x81, 0x00, 0x00]),
            Err(Error::Decode(_))
        ));
        // trailing garbage
        let mut bytes = MsgpackCodec.encode_request(1, &Request::Ping).unwrap();
        bytes.push(0x01);
        assert!(matches!(
            MsgpackCodec.decode_request(&bytes),
            Err(Error::Decode(_))
        ));
    }
}
