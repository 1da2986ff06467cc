use std::sync::Arc;

use tarn_protocol::{Request, Response};

use crate::connection::{Connection, Session};
use crate::error::Result;
use crate::handler::Handler;

pub mod auth;
pub mod retry;

pub use self::auth::AuthenticationMiddleware;
pub use self::retry::{RetryMiddleware, RetryPolicy};

/// Interceptor wrapped around the rest of the chain.
///
/// A middleware may inspect or rewrite the request, call `next` zero or more
/// times, and inspect the response or the failure before returning.
#[async_trait::async_trait]
pub trait Middleware: Send + Sync {
    async fn process(&self, request: &Request, next: &dyn Handler) -> Result<Response>;
}

/// Middleware composed around a base handler, outermost first.
pub struct MiddlewareHandler {
    middleware: Vec<Arc<dyn Middleware>>,
    base: Arc<dyn Handler>,
}

impl MiddlewareHandler {
    pub fn new(base: Arc<dyn Handler>) -> Self {
        Self {
            middleware: Vec::new(),
            base,
        }
    }

    /// Add a middleware inside the ones already present
    pub fn inner(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Add a middleware that may also sit in other chains
    pub fn inner_shared(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Add a middleware around the ones already present
    pub fn outer(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.insert(0, Arc::new(middleware));
        self
    }

    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    fn chain(&self) -> Next<'_> {
        Next {
            middleware: &self.middleware,
            base: self.base.as_ref(),
            session: None,
        }
    }
}

#[async_trait::async_trait]
impl Handler for MiddlewareHandler {
    async fn handle(&self, request: &Request) -> Result<Response> {
        self.chain().handle(request).await
    }

    async fn handle_on(&self, session: &Arc<Session>, request: &Request) -> Result<Response> {
        self.chain().handle_on(session, request).await
    }

    fn connection(&self) -> &Connection {
        self.base.connection()
    }
}

/// The part of the chain below a given middleware.
///
/// Once a middleware pins a session, every link below it and the base
/// handler work on that session.
struct Next<'a> {
    middleware: &'a [Arc<dyn Middleware>],
    base: &'a dyn Handler,
    session: Option<&'a Arc<Session>>,
}

#[async_trait::async_trait]
impl<'a> Handler for Next<'a> {
    async fn handle(&self, request: &Request) -> Result<Response> {
        match (self.middleware.split_first(), self.session) {
            (Some((first, rest)), session) => {
                let next = Next {
                    middleware: rest,
                    base: self.base,
                    session,
                };
                first.process(request, &next).await
            }
            (None, Some(session)) => self.base.handle_on(session, request).await,
            (None, None) => self.base.handle(request).await,
        }
    }

    async fn handle_on(&self, session: &Arc<Session>, request: &Request) -> Result<Response> {
        let pinned = Next {
            middleware: self.middleware,
            base: self.base,
            session: Some(session),
        };
        pinned.handle(request).await
    }

    fn connection(&self) -> &Connection {
        self.base.connection()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;

    use parking_lot::Mutex;
    use tarn_protocol::Value;

    use super::*;
    use crate::config::Endpoint;
    use crate::error::Error;
    use crate::transport::TransportOptions;

    /// Base handler that replays scripted outcomes and records requests.
    pub struct ScriptedHandler {
        connection: Connection,
        script: Mutex<VecDeque<Result<Response>>>,
        pub seen: Mutex<Vec<Request>>,
    }

    impl ScriptedHandler {
        pub fn new(script: Vec<Result<Response>>) -> Self {
            Self {
                connection: Connection::new(
                    Endpoint::Tcp("127.0.0.1:1".to_string()),
                    TransportOptions::default(),
                ),
                script: Mutex::new(script.into()),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> usize {
            self.seen.lock().len()
        }
    }

    #[async_trait::async_trait]
    impl Handler for ScriptedHandler {
        async fn handle(&self, request: &Request) -> Result<Response> {
            self.seen.lock().push(request.clone());
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(Response::with_data(0, Value::Array(Vec::new()))))
        }

        async fn handle_on(
            &self,
            _session: &Arc<Session>,
            request: &Request,
        ) -> Result<Response> {
            self.handle(request).await
        }

        fn connection(&self) -> &Connection {
            &self.connection
        }
    }

    pub fn ok() -> Result<Response> {
        Ok(Response::with_data(0, Value::Array(Vec::new())))
    }

    pub fn closed() -> Result<Response> {
        Err(Error::ConnectionClosed)
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::testing::{ok, ScriptedHandler};
    use super::*;

    struct Record {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl Middleware for Record {
        async fn process(&self, request: &Request, next: &dyn Handler) -> Result<Response> {
            self.log.lock().push(format!("{} before", self.name));
            let response = next.handle(request).await;
            self.log.lock().push(format!("{} after", self.name));
            response
        }
    }

    #[tokio::test]
    async fn runs_outermost_first_and_unwinds_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let base = Arc::new(ScriptedHandler::new(vec![ok()]));
        let chain = MiddlewareHandler::new(base.clone())
            .inner(Record {
                name: "b",
                log: log.clone(),
            })
            .inner(Record {
                name: "c",
                log: log.clone(),
            })
            .outer(Record {
                name: "a",
                log: log.clone(),
            });

        chain.handle(&Request::Ping).await.unwrap();

        assert_eq!(
            *log.lock(),
            vec!["a before", "b before", "c before", "c after", "b after", "a after"]
        );
        assert_eq!(base.calls(), 1);
    }

    #[tokio::test]
    async fn empty_chain_reaches_base() {
        let base = Arc::new(ScriptedHandler::new(vec![ok()]));
        let chain = MiddlewareHandler::new(base.clone());
        assert!(chain.is_empty());
        chain.handle(&Request::Ping).await.unwrap();
        assert_eq!(*base.seen.lock(), vec![Request::Ping]);
    }

    #[tokio::test]
    async fn chains_nest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let base = Arc::new(ScriptedHandler::new(vec![ok()]));
        let inner = MiddlewareHandler::new(base).inner(Record {
            name: "inner",
            log: log.clone(),
        });
        let outer = MiddlewareHandler::new(Arc::new(inner)).inner(Record {
            name: "outer",
            log: log.clone(),
        });

        outer.handle(&Request::Ping).await.unwrap();
        assert_eq!(
            *log.lock(),
            vec!["outer before", "inner before", "inner after", "outer after"]
        );
    }
}
