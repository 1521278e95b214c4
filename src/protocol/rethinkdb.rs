//! RethinkDB client driver protocol (V0_4 handshake, JSON queries).
//!
//! Queries are ReQL terms serialized as JSON arrays `[term_type, [args], {opts}]`
//! and framed as `[token u64 LE][length u32 LE][json]`. Responses use the same
//! framing.

use super::ProtocolError;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::{BufMut, Bytes, BytesMut};
use serde::Deserialize;
use serde_json::{Value, json};

pub const VERSION_V0_4: u32 = 0x400c_2d20;
pub const PROTOCOL_JSON: u32 = 0x7e69_70c7;

/// Reply sent by the server when the handshake is accepted.
pub const HANDSHAKE_SUCCESS: &str = "SUCCESS";

pub const RESPONSE_HEADER_LEN: usize = 12;

mod term {
    pub const DB: u32 = 14;
    pub const TABLE: u32 = 15;
    pub const INSERT: u32 = 56;
    pub const DB_CREATE: u32 = 57;
    pub const TABLE_CREATE: u32 = 60;
    pub const TABLE_DROP: u32 = 61;
    pub const CHANGES: u32 = 152;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Start = 1,
    Continue = 2,
    Stop = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    SuccessAtom,
    SuccessSequence,
    SuccessPartial,
    WaitComplete,
    ServerInfo,
    ClientError,
    CompileError,
    RuntimeError,
}

impl ResponseType {
    pub fn from_code(code: i64) -> Result<Self, ProtocolError> {
        Ok(match code {
            1 => ResponseType::SuccessAtom,
            2 => ResponseType::SuccessSequence,
            3 => ResponseType::SuccessPartial,
            4 => ResponseType::WaitComplete,
            5 => ResponseType::ServerInfo,
            16 => ResponseType::ClientError,
            17 => ResponseType::CompileError,
            18 => ResponseType::RuntimeError,
            other => {
                return Err(ProtocolError::Malformed(format!(
                    "unknown rethinkdb response type {other}"
                )));
            }
        })
    }

    pub fn is_error(self) -> bool {
        matches!(
            self,
            ResponseType::ClientError | ResponseType::CompileError | ResponseType::RuntimeError
        )
    }
}

/// Handshake bytes: version magic, auth key, protocol magic.
pub fn encode_handshake(auth_key: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(12 + auth_key.len());
    buf.put_u32_le(VERSION_V0_4);
    buf.put_u32_le(auth_key.len() as u32);
    buf.put_slice(auth_key.as_bytes());
    buf.put_u32_le(PROTOCOL_JSON);
    buf.freeze()
}

/// Interpret the null-terminated handshake reply (terminator stripped).
pub fn check_handshake(reply: &[u8]) -> Result<(), ProtocolError> {
    let reply = String::from_utf8_lossy(reply);
    if reply == HANDSHAKE_SUCCESS {
        Ok(())
    } else {
        Err(ProtocolError::Broker(format!(
            "rethinkdb handshake rejected: {reply}"
        )))
    }
}

pub fn db(name: &str) -> Value {
    json!([term::DB, [name]])
}

pub fn table(db_name: &str, name: &str) -> Value {
    json!([term::TABLE, [db(db_name), name]])
}

pub fn db_create(name: &str) -> Value {
    json!([term::DB_CREATE, [name]])
}

pub fn table_create(db_name: &str, name: &str) -> Value {
    json!([term::TABLE_CREATE, [db(db_name), name]])
}

pub fn table_drop(db_name: &str, name: &str) -> Value {
    json!([term::TABLE_DROP, [db(db_name), name]])
}

pub fn changes(table: Value) -> Value {
    json!([term::CHANGES, [table]])
}

/// Insert a single document `{"data": <binary>}`.
pub fn insert_data(table: Value, data: &[u8]) -> Value {
    json!([term::INSERT, [table, { "data": binary(data) }]])
}

/// The BINARY pseudo-type.
pub fn binary(data: &[u8]) -> Value {
    json!({ "$reql_type$": "BINARY", "data": STANDARD.encode(data) })
}

pub fn decode_binary(value: &Value) -> Result<Bytes, ProtocolError> {
    match (value.get("$reql_type$"), value.get("data")) {
        (Some(Value::String(kind)), Some(Value::String(data))) if kind == "BINARY" => STANDARD
            .decode(data)
            .map(Bytes::from)
            .map_err(|e| ProtocolError::Malformed(format!("invalid binary data: {e}"))),
        _ => Err(ProtocolError::Malformed(format!(
            "expected binary pseudo-type, got {value}"
        ))),
    }
}

/// Frame a query. `term` is required for `Start` and ignored otherwise.
pub fn encode_query(token: u64, kind: QueryType, term: Option<&Value>) -> Bytes {
    let query = match (kind, term) {
        (QueryType::Start, Some(term)) => json!([kind as u32, term, {}]),
        _ => json!([kind as u32]),
    };
    let body = query.to_string();
    let mut buf = BytesMut::with_capacity(RESPONSE_HEADER_LEN + body.len());
    buf.put_u64_le(token);
    buf.put_u32_le(body.len() as u32);
    buf.put_slice(body.as_bytes());
    buf.freeze()
}

/// Token and body length from a response header.
pub fn decode_response_header(header: &[u8; RESPONSE_HEADER_LEN]) -> (u64, usize) {
    let mut token = [0u8; 8];
    token.copy_from_slice(&header[..8]);
    let mut len = [0u8; 4];
    len.copy_from_slice(&header[8..]);
    (u64::from_le_bytes(token), u32::from_le_bytes(len) as usize)
}

#[derive(Deserialize)]
struct RawResponse {
    t: i64,
    #[serde(default)]
    r: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub token: u64,
    pub kind: ResponseType,
    pub results: Vec<Value>,
}

impl Response {
    /// Turn an error response into a broker error carrying its message.
    pub fn into_result(self) -> Result<Self, ProtocolError> {
        if self.kind.is_error() {
            let message = self
                .results
                .first()
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(ProtocolError::Broker(format!(
                "rethinkdb {:?}: {message}",
                self.kind
            )));
        }
        Ok(self)
    }
}

pub fn decode_response(token: u64, body: &[u8]) -> Result<Response, ProtocolError> {
    let raw: RawResponse =
        serde_json::from_slice(body).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    Ok(Response {
        token,
        kind: ResponseType::from_code(raw.t)?,
        results: raw.r,
    })
}

/// Summary of a write query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    pub inserted: u64,
    pub errors: u64,
}

/// Check the result document of a write. Any reported error fails the write,
/// even if other documents were inserted.
pub fn check_write(result: &Value) -> Result<WriteSummary, ProtocolError> {
    let count = |field: &str| result.get(field).and_then(Value::as_u64).unwrap_or(0);
    let summary = WriteSummary {
        inserted: count("inserted"),
        errors: count("errors"),
    };
    if summary.errors > 0 {
        let first = result
            .get("first_error")
            .and_then(Value::as_str)
            .unwrap_or("write failed");
        return Err(ProtocolError::Broker(format!(
            "rethinkdb write reported {} errors: {first}",
            summary.errors
        )));
    }
    Ok(summary)
}

/// Extract `new_val.data` from a changefeed entry. Entries without a new
/// value (deletions, state notifications) yield `None`.
pub fn change_data(change: &Value) -> Result<Option<Bytes>, ProtocolError> {
    match change.get("new_val").and_then(|v| v.get("data")) {
        Some(data) => decode_binary(data).map(Some),
        None => Ok(None),
    }
}
