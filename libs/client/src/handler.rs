use std::sync::Arc;

use tarn_protocol::codec::{Codec, MsgpackCodec};
use tarn_protocol::{Request, Response, ResponseBody};

use crate::connection::{Connection, Session};
use crate::error::{Error, Result};

/// Anything that turns a request into a successful response.
///
/// Implemented by the base [`RequestExecutor`], by a composed middleware
/// chain, and by the "rest of the chain" view handed to each middleware.
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    /// Handle a request. A response that carries a server error is returned
    /// as [`Error::RequestFailed`].
    async fn handle(&self, request: &Request) -> Result<Response>;

    /// Handle a request on `session` rather than on whatever session the
    /// connection holds by the time the request reaches the executor.
    async fn handle_on(&self, session: &Arc<Session>, request: &Request) -> Result<Response>;

    /// Connection the requests end up on
    fn connection(&self) -> &Connection;
}

/// Innermost handler: one send, one matching reply.
pub struct RequestExecutor {
    connection: Arc<Connection>,
    codec: MsgpackCodec,
}

impl RequestExecutor {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self {
            connection,
            codec: MsgpackCodec,
        }
    }

    async fn exchange(&self, session: &Session, request: &Request) -> Result<Response> {
        let sync = session.next_sync();
        let frame = self.codec.encode_request(sync, request)?;
        let waiter = session.register(sync)?;

        tracing::trace!(
            session = session.id(),
            sync,
            kind = ?request.request_type(),
            "sending request"
        );
        session.write(frame).await?;

        let reply = waiter.wait(self.connection.read_timeout()).await?;
        let response = self.codec.decode_response(&reply)?;
        if response.sync != sync {
            return Err(Error::InvalidFrame(format!(
                "expected reply to sync {sync}, got {}",
                response.sync
            )));
        }

        match response.body {
            ResponseBody::Error(err) => Err(Error::RequestFailed {
                code: err.code,
                message: err.message,
            }),
            ResponseBody::Ok(_) => Ok(response),
        }
    }
}

#[async_trait::async_trait]
impl Handler for RequestExecutor {
    async fn handle(&self, request: &Request) -> Result<Response> {
        let session = self.connection.session().await?;
        self.handle_on(&session, request).await
    }

    async fn handle_on(&self, session: &Arc<Session>, request: &Request) -> Result<Response> {
        let result = self.exchange(session, request).await;

        if let Err(e) = &result {
            if e.breaks_connection() {
                tracing::debug!(session = session.id(), error = %e, "discarding session");
                self.connection.discard(session).await;
            }
        }
        result
    }

    fn connection(&self) -> &Connection {
        &self.connection
    }
}
