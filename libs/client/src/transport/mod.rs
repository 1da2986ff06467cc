use std::time::Duration;

use tarn_protocol::greeting::{Greeting, GREETING_SIZE};

use crate::config::{ClientConfig, Endpoint};
use crate::error::{Error, Result};

pub mod frame;
pub mod tcp;
pub mod unix;

pub use self::frame::{read_frame, write_frame, FrameReader, FrameWriter, MAX_FRAME_SIZE};
pub use self::tcp::{TcpTransport, TcpTransportBuilder};
pub use self::unix::{UnixTransport, UnixTransportBuilder};

/// Transport trait for sending and receiving frames
///
/// Each transport instance represents a single connection whose greeting has
/// already been read.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Greeting the server sent when the connection was accepted
    fn greeting(&self) -> &Greeting;

    /// Send one frame
    async fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Receive one frame
    async fn receive(&mut self) -> Result<Vec<u8>>;

    /// Close the transport connection
    async fn close(&mut self) -> Result<()>;

    /// Split into halves that can be driven from different tasks. The read
    /// half carries no timeout.
    fn into_split(self: Box<Self>) -> (FrameReader, FrameWriter);
}

/// Timeouts and socket flags applied when opening a transport.
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub tcp_nodelay: bool,
}

impl From<&ClientConfig> for TransportOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            tcp_nodelay: config.tcp_nodelay,
        }
    }
}

/// Open a transport to `endpoint`.
pub async fn connect(endpoint: &Endpoint, options: &TransportOptions) -> Result<Box<dyn Transport>> {
    let transport: Box<dyn Transport> = match endpoint {
        Endpoint::Tcp(address) => Box::new(
            TcpTransport::builder()
                .address(address.clone())
                .options(options)
                .connect()
                .await?,
        ),
        Endpoint::Unix(path) => Box::new(
            UnixTransport::builder()
                .path(path)
                .options(options)
                .connect()
                .await?,
        ),
    };
    tracing::debug!(
        endpoint = %endpoint,
        server = transport.greeting().server(),
        "connected"
    );
    Ok(transport)
}

/// Read and parse the greeting. A peer that hangs up first is reported as a
/// connect failure.
pub(crate) async fn read_greeting(reader: &mut FrameReader, address: &str) -> Result<Greeting> {
    let mut buf = [0u8; GREETING_SIZE];
    match reader.read_raw(&mut buf).await {
        Ok(()) => {}
        Err(Error::ConnectionClosed) => {
            return Err(Error::Connect {
                address: address.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed before greeting",
                ),
            })
        }
        Err(e) => return Err(e),
    }
    Ok(Greeting::parse(&buf)?)
}
