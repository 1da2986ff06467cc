use rmpv::Value;

use crate::iproto::{Iterator, RequestType};

/// A logical request, independent of the connection it travels on.
///
/// The sync (correlation id) is not part of the request: it is assigned by
/// the sender for every physical send attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Ping,
    Call {
        function: String,
        args: Vec<Value>,
    },
    Eval {
        expr: String,
        args: Vec<Value>,
    },
    Execute {
        sql: String,
        params: Vec<Value>,
    },
    Select {
        space_id: u32,
        index_id: u32,
        key: Vec<Value>,
        limit: u32,
        offset: u32,
        iterator: Iterator,
    },
    Insert {
        space_id: u32,
        tuple: Vec<Value>,
    },
    Replace {
        space_id: u32,
        tuple: Vec<Value>,
    },
    Update {
        space_id: u32,
        index_id: u32,
        key: Vec<Value>,
        ops: Vec<Value>,
    },
    Upsert {
        space_id: u32,
        tuple: Vec<Value>,
        ops: Vec<Value>,
    },
    Delete {
        space_id: u32,
        index_id: u32,
        key: Vec<Value>,
    },
    Auth {
        username: String,
        scramble: Vec<u8>,
    },
}

impl Request {
    pub fn request_type(&self) -> RequestType {
        match self {
            Self::Ping => RequestType::Ping,
            Self::Call { .. } => RequestType::Call,
            Self::Eval { .. } => RequestType::Eval,
            Self::Execute { .. } => RequestType::Execute,
            Self::Select { .. } => RequestType::Select,
            Self::Insert { .. } => RequestType::Insert,
            Self::Replace { .. } => RequestType::Replace,
            Self::Update { .. } => RequestType::Update,
            Self::Upsert { .. } => RequestType::Upsert,
            Self::Delete { .. } => RequestType::Delete,
            Self::Auth { .. } => RequestType::Auth,
        }
    }

    pub fn call(function: impl Into<String>, args: Vec<Value>) -> Self {
        Self::Call {
            function: function.into(),
            args,
        }
    }

    pub fn eval(expr: impl Into<String>, args: Vec<Value>) -> Self {
        Self::Eval {
            expr: expr.into(),
            args,
        }
    }

    pub fn execute(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self::Execute {
            sql: sql.into(),
            params,
        }
    }

    /// Select by key with no limit and no offset.
    pub fn select(space_id: u32, index_id: u32, key: Vec<Value>, iterator: Iterator) -> Self {
        Self::Select {
            space_id,
            index_id,
            key,
            limit: u32::MAX,
            offset: 0,
            iterator,
        }
    }
}
