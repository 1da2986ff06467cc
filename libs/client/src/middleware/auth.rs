use std::sync::Arc;

use tarn_protocol::{scramble, Request, Response};

use crate::connection::Session;
use crate::error::{Error, Result};
use crate::handler::Handler;
use crate::middleware::Middleware;

/// Authenticates each physical connection before its first request.
///
/// The challenge is the salt from the connection's greeting. The handshake
/// runs at most once at a time per connection; requests that arrive while it
/// is in flight wait for it. A connection opened to replace a dead one starts
/// unauthenticated, so this middleware has to sit inside the retry
/// middleware for retried requests to authenticate again.
///
/// The handshake and the request it guards go out on the same session, even
/// if another caller replaces the connection's session in between.
pub struct AuthenticationMiddleware {
    username: String,
    password: String,
}

impl AuthenticationMiddleware {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    async fn handshake(&self, session: &Arc<Session>, next: &dyn Handler) -> Result<()> {
        tracing::debug!(session = session.id(), user = %self.username, "authenticating");

        let request = Request::Auth {
            username: self.username.clone(),
            scramble: scramble(&self.password, session.greeting().salt())?,
        };
        match next.handle_on(session, &request).await {
            Ok(_) => {
                tracing::debug!(session = session.id(), user = %self.username, "authenticated");
                Ok(())
            }
            Err(Error::RequestFailed { code, message }) => {
                Err(Error::Authentication { code, message })
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait::async_trait]
impl Middleware for AuthenticationMiddleware {
    async fn process(&self, request: &Request, next: &dyn Handler) -> Result<Response> {
        if matches!(request, Request::Auth { .. }) {
            return next.handle(request).await;
        }

        let session = next.connection().session().await?;
        let outcome = session
            .auth()
            .authenticate_with(|| self.handshake(&session, next))
            .await;

        if let Err(e) = outcome {
            if matches!(e, Error::Authentication { .. }) {
                tracing::warn!(session = session.id(), error = %e, "authentication rejected");
                next.connection().discard(&session).await;
            }
            return Err(e);
        }

        next.handle_on(&session, request).await
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use tarn_protocol::Value;

    use super::*;
    use crate::config::Endpoint;
    use crate::connection::{testing, AuthState, Connection};
    use crate::transport::TransportOptions;

    /// Base handler that swaps in a new session while the handshake is in
    /// flight, the way a concurrent caller reconnecting would.
    struct Reconnecting {
        connection: Connection,
        replacement: Mutex<Option<Arc<Session>>>,
        seen: Mutex<Vec<(u64, Request)>>,
    }

    #[async_trait::async_trait]
    impl Handler for Reconnecting {
        async fn handle(&self, request: &Request) -> Result<Response> {
            let session = self.connection.session().await?;
            self.handle_on(&session, request).await
        }

        async fn handle_on(&self, session: &Arc<Session>, request: &Request) -> Result<Response> {
            self.seen.lock().push((session.id(), request.clone()));
            if matches!(request, Request::Auth { .. }) {
                let replacement = self.replacement.lock().take();
                if let Some(replacement) = replacement {
                    self.connection.install(replacement).await;
                }
            }
            Ok(Response::with_data(0, Value::Array(Vec::new())))
        }

        fn connection(&self) -> &Connection {
            &self.connection
        }
    }

    #[tokio::test]
    async fn request_follows_its_handshake_onto_the_same_session() {
        let (first, _r1, _w1) = testing::session(1, 1024);
        let (second, _r2, _w2) = testing::session(2, 1024);
        let base = Reconnecting {
            connection: Connection::new(
                Endpoint::Tcp("127.0.0.1:1".to_string()),
                TransportOptions::default(),
            ),
            replacement: Mutex::new(Some(Arc::clone(&second))),
            seen: Mutex::new(Vec::new()),
        };
        base.connection.install(Arc::clone(&first)).await;

        let auth = AuthenticationMiddleware::new("app", "secret");
        auth.process(&Request::Ping, &base).await.unwrap();

        let seen = base.seen.lock().clone();
        assert_eq!(seen.len(), 2);
        assert!(matches!(seen[0], (1, Request::Auth { .. })));
        assert_eq!(seen[1], (1, Request::Ping));
        assert_eq!(first.auth().state(), AuthState::Authenticated);
        assert_eq!(second.auth().state(), AuthState::Unauthenticated);
    }
}
