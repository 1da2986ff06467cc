use rmpv::Value;

/// Error reported by the server in place of a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub code: u32,
    pub message: String,
}

/// Name and type of one result column of an SQL statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    pub name: String,
    pub field_type: String,
}

/// Outcome of a data-changing SQL statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlInfo {
    pub row_count: u64,
    pub autoincrement_ids: Vec<i64>,
}

/// Fields a successful response may carry. Which ones are present depends
/// on the request kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    pub data: Option<Value>,
    pub metadata: Option<Vec<ColumnMetadata>>,
    pub sql_info: Option<SqlInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Ok(Payload),
    Error(ServerError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub sync: u64,
    pub schema_version: Option<u64>,
    pub body: ResponseBody,
}

impl Response {
    pub fn ok(sync: u64, payload: Payload) -> Self {
        Self {
            sync,
            schema_version: None,
            body: ResponseBody::Ok(payload),
        }
    }

    /// Successful response carrying only `data`.
    pub fn with_data(sync: u64, data: Value) -> Self {
        Self::ok(
            sync,
            Payload {
                data: Some(data),
                ..Payload::default()
            },
        )
    }

    pub fn error(sync: u64, code: u32, message: impl Into<String>) -> Self {
        Self {
            sync,
            schema_version: None,
            body: ResponseBody::Error(ServerError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.body, ResponseBody::Error(_))
    }

    pub fn payload(&self) -> Option<&Payload> {
        match &self.body {
            ResponseBody::Ok(payload) => Some(payload),
            ResponseBody::Error(_) => None,
        }
    }

    /// Rows returned by the request, or an empty list when the response has none.
    pub fn rows(&self) -> &[Value] {
        self.payload()
            .and_then(|p| p.data.as_ref())
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Split into the payload or the server error.
    pub fn into_result(self) -> std::result::Result<Payload, ServerError> {
        match self.body {
            ResponseBody::Ok(payload) => Ok(payload),
            ResponseBody::Error(err) => Err(err),
        }
    }
}
