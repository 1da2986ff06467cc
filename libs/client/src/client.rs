use std::sync::Arc;

use serde::Serialize;
use tarn_protocol::{
    ColumnMetadata, Iterator, Payload, Request, Response, ResponseBody, SqlInfo, Value,
};

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::handler::{Handler, RequestExecutor};
use crate::middleware::{AuthenticationMiddleware, Middleware, MiddlewareHandler, RetryMiddleware};
use crate::schema::Schema;
use crate::transport::TransportOptions;

/// A space or an index, by name or by numeric id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ident {
    Id(u32),
    Name(String),
}

impl From<u32> for Ident {
    fn from(id: u32) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for Ident {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for Ident {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

/// Result of an SQL statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlResult {
    /// Rows of a query, with the column descriptions
    Rows {
        metadata: Vec<ColumnMetadata>,
        rows: Vec<Value>,
    },
    /// Outcome of a statement that changed data
    Changed(SqlInfo),
}

/// Options of a select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectOptions {
    pub limit: u32,
    pub offset: u32,
    pub iterator: Iterator,
}

impl Default for SelectOptions {
    fn default() -> Self {
        Self {
            limit: u32::MAX,
            offset: 0,
            iterator: Iterator::Eq,
        }
    }
}

/// Client for one server, over one connection.
///
/// Requests go through `[custom middleware..., retry, authentication]` and
/// then the executor. Retry is installed when `max_retries > 0`,
/// authentication when a username is configured.
pub struct Client {
    config: ClientConfig,
    connection: Arc<Connection>,
    handler: Arc<dyn Handler>,
    schema: Schema,
    extra: Vec<Arc<dyn Middleware>>,
}

impl Client {
    /// Build a client. The connection is opened on first use.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let connection = Arc::new(Connection::new(
            config.endpoint.clone(),
            TransportOptions::from(&config),
        ));
        Ok(Self::assemble(config, connection, Vec::new()))
    }

    /// Build a client and make sure the server answers.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let client = Self::new(config)?;
        client.ping().await?;
        Ok(client)
    }

    fn assemble(
        config: ClientConfig,
        connection: Arc<Connection>,
        extra: Vec<Arc<dyn Middleware>>,
    ) -> Self {
        let executor: Arc<dyn Handler> = Arc::new(RequestExecutor::new(Arc::clone(&connection)));

        let mut chain = MiddlewareHandler::new(executor);
        for middleware in &extra {
            chain = chain.inner_shared(Arc::clone(middleware));
        }
        if config.max_retries > 0 {
            chain = chain.inner(RetryMiddleware::new(config.max_retries, config.retry_policy));
        }
        if let Some(username) = &config.username {
            chain = chain.inner(AuthenticationMiddleware::new(
                username.clone(),
                config.password.clone().unwrap_or_default(),
            ));
        }

        let handler: Arc<dyn Handler> = Arc::new(chain);
        let schema = Schema::new(Arc::clone(&handler));
        Self {
            config,
            connection,
            handler,
            schema,
            extra,
        }
    }

    /// Add a middleware around every other one.
    pub fn with_middleware(self, middleware: impl Middleware + 'static) -> Self {
        let Self {
            config,
            connection,
            mut extra,
            ..
        } = self;
        extra.insert(0, Arc::new(middleware));
        Self::assemble(config, connection, extra)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// The composed handler chain
    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Send a raw request through the chain.
    pub async fn handle(&self, request: &Request) -> Result<Response> {
        let result = self.handler.handle(request).await;
        if !self.config.persistent {
            self.connection.close_if_idle().await;
        }
        result
    }

    pub async fn ping(&self) -> Result<()> {
        self.handle(&Request::Ping).await.map(|_| ())
    }

    /// Call a stored function with a tuple of arguments.
    pub async fn call<A: Serialize>(&self, function: &str, args: A) -> Result<Vec<Value>> {
        let request = Request::call(function, to_tuple(args)?);
        self.handle(&request).await.and_then(into_rows)
    }

    /// Evaluate an expression on the server; arguments are available as `...`.
    pub async fn evaluate<A: Serialize>(&self, expr: &str, args: A) -> Result<Vec<Value>> {
        let request = Request::eval(expr, to_tuple(args)?);
        self.handle(&request).await.and_then(into_rows)
    }

    /// Run an SQL statement with positional parameters.
    pub async fn execute<P: Serialize>(&self, sql: &str, params: P) -> Result<SqlResult> {
        let request = Request::execute(sql, to_tuple(params)?);
        let payload = into_payload(self.handle(&request).await?)?;

        Ok(match payload.metadata {
            Some(metadata) => SqlResult::Rows {
                metadata,
                rows: match payload.data {
                    Some(Value::Array(rows)) => rows,
                    _ => Vec::new(),
                },
            },
            None => SqlResult::Changed(payload.sql_info.unwrap_or_default()),
        })
    }

    pub async fn select<K: Serialize>(
        &self,
        space: impl Into<Ident>,
        index: impl Into<Ident>,
        key: K,
        options: SelectOptions,
    ) -> Result<Vec<Value>> {
        let space_id = self.space_id(space.into()).await?;
        let request = Request::Select {
            space_id,
            index_id: self.index_id(space_id, index.into()).await?,
            key: to_tuple(key)?,
            limit: options.limit,
            offset: options.offset,
            iterator: options.iterator,
        };
        self.handle(&request).await.and_then(into_rows)
    }

    pub async fn insert<T: Serialize>(&self, space: impl Into<Ident>, tuple: T) -> Result<Vec<Value>> {
        let request = Request::Insert {
            space_id: self.space_id(space.into()).await?,
            tuple: to_tuple(tuple)?,
        };
        self.handle(&request).await.and_then(into_rows)
    }

    pub async fn replace<T: Serialize>(&self, space: impl Into<Ident>, tuple: T) -> Result<Vec<Value>> {
        let request = Request::Replace {
            space_id: self.space_id(space.into()).await?,
            tuple: to_tuple(tuple)?,
        };
        self.handle(&request).await.and_then(into_rows)
    }

    /// Update the tuple matching `key`; `ops` are `[op, field, arg...]` lists.
    pub async fn update<K: Serialize, O: Serialize>(
        &self,
        space: impl Into<Ident>,
        index: impl Into<Ident>,
        key: K,
        ops: O,
    ) -> Result<Vec<Value>> {
        let space_id = self.space_id(space.into()).await?;
        let request = Request::Update {
            space_id,
            index_id: self.index_id(space_id, index.into()).await?,
            key: to_tuple(key)?,
            ops: to_tuple(ops)?,
        };
        self.handle(&request).await.and_then(into_rows)
    }

    /// Insert `tuple`, or apply `ops` to the existing tuple with the same key.
    pub async fn upsert<T: Serialize, O: Serialize>(
        &self,
        space: impl Into<Ident>,
        tuple: T,
        ops: O,
    ) -> Result<()> {
        let request = Request::Upsert {
            space_id: self.space_id(space.into()).await?,
            tuple: to_tuple(tuple)?,
            ops: to_tuple(ops)?,
        };
        self.handle(&request).await.map(|_| ())
    }

    pub async fn delete<K: Serialize>(
        &self,
        space: impl Into<Ident>,
        index: impl Into<Ident>,
        key: K,
    ) -> Result<Vec<Value>> {
        let space_id = self.space_id(space.into()).await?;
        let request = Request::Delete {
            space_id,
            index_id: self.index_id(space_id, index.into()).await?,
            key: to_tuple(key)?,
        };
        self.handle(&request).await.and_then(into_rows)
    }

    /// Forget resolved space and index ids, e.g. after DDL.
    pub fn flush_schema(&self) {
        self.schema.flush();
    }

    /// Close the physical connection. The next call opens a new one.
    pub async fn close(&self) {
        self.connection.close().await;
    }

    async fn space_id(&self, space: Ident) -> Result<u32> {
        match space {
            Ident::Id(id) => Ok(id),
            Ident::Name(name) => self.schema.resolve_space_id(&name).await,
        }
    }

    async fn index_id(&self, space_id: u32, index: Ident) -> Result<u32> {
        match index {
            Ident::Id(id) => Ok(id),
            Ident::Name(name) => self.schema.resolve_index_id(space_id, &name).await,
        }
    }
}

/// Serialize arguments into a tuple: sequences become the tuple, `()` an
/// empty one, and any other value a one-element tuple.
fn to_tuple<T: Serialize>(value: T) -> Result<Vec<Value>> {
    let value =
        rmpv::ext::to_value(value).map_err(|e| tarn_protocol::Error::Encode(e.to_string()))?;
    Ok(match value {
        Value::Array(items) => items,
        Value::Nil => Vec::new(),
        other => vec![other],
    })
}

fn into_payload(response: Response) -> Result<Payload> {
    match response.body {
        ResponseBody::Ok(payload) => Ok(payload),
        ResponseBody::Error(err) => Err(Error::RequestFailed {
            code: err.code,
            message: err.message,
        }),
    }
}

fn into_rows(response: Response) -> Result<Vec<Value>> {
    Ok(match into_payload(response)?.data {
        Some(Value::Array(rows)) => rows,
        Some(other) => vec![other],
        None => Vec::new(),
    })
}
