//! Tarn Client - request pipeline for the binary database protocol
//!
//! Multiplexes concurrent requests over one TCP or Unix socket connection.
//! Each request travels through a chain of middleware (retry, authentication,
//! anything custom) down to the [`RequestExecutor`], which assigns the sync,
//! writes the frame and waits for the reply carrying the same sync.
//!
//! # Example
//!
//! ```no_run
//! use tarn_client::{Client, ClientConfig, SelectOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::builder()
//!     .tcp("127.0.0.1:3301")
//!     .credentials("app", "secret")
//!     .max_retries(2)
//!     .build()?;
//! let client = Client::connect(config).await?;
//!
//! client.insert("users", (1, "alice")).await?;
//! let rows = client
//!     .select("users", "primary", (1,), SelectOptions::default())
//!     .await?;
//! let sum = client.evaluate("local a, b = ... return a + b", (1, 2)).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod schema;
pub mod transport;

// Re-exports for convenience
pub use client::{Client, Ident, SelectOptions, SqlResult};
pub use config::{ClientConfig, Endpoint};
pub use connection::{AuthState, Connection, Session};
pub use error::{Error, Result, TimeoutKind};
pub use handler::{Handler, RequestExecutor};
pub use middleware::{
    AuthenticationMiddleware, Middleware, MiddlewareHandler, RetryMiddleware, RetryPolicy,
};
pub use schema::{Schema, SpaceMetadata};
pub use tarn_protocol as protocol;
pub use tarn_protocol::{Request, Response, Value};
