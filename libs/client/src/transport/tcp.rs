use std::time::Duration;

use tarn_protocol::Greeting;
use tokio::net::TcpStream;

use crate::error::{Error, Result, TimeoutKind};
use crate::transport::{read_greeting, FrameReader, FrameWriter, Transport, TransportOptions};

/// TCP transport with length-prefix framing
pub struct TcpTransport {
    reader: FrameReader,
    writer: FrameWriter,
    greeting: Greeting,
}

impl TcpTransport {
    /// Connect to a remote TCP address with no timeouts
    pub async fn connect(address: impl Into<String>) -> Result<Self> {
        Self::builder().address(address).connect().await
    }

    /// Create a builder for configuring the transport
    pub fn builder() -> TcpTransportBuilder {
        TcpTransportBuilder::new()
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    fn greeting(&self) -> &Greeting {
        &self.greeting
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.send(bytes).await
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        self.reader.receive().await
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await
    }

    fn into_split(self: Box<Self>) -> (FrameReader, FrameWriter) {
        (self.reader.without_timeout(), self.writer)
    }
}

/// Builder for configuring TCP transport
#[derive(Default)]
pub struct TcpTransportBuilder {
    address: Option<String>,
    connect_timeout: Option<Duration>,
    send_timeout: Option<Duration>,
    receive_timeout: Option<Duration>,
    nodelay: bool,
}

impl TcpTransportBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `host:port` to connect to
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Set the connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the send timeout
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// Set the receive timeout
    pub fn receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = Some(timeout);
        self
    }

    /// Disable Nagle's algorithm
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Apply timeouts and flags from transport options
    pub fn options(mut self, options: &TransportOptions) -> Self {
        self.connect_timeout = options.connect_timeout;
        self.send_timeout = options.write_timeout;
        self.receive_timeout = options.read_timeout;
        self.nodelay = options.tcp_nodelay;
        self
    }

    /// Connect and read the greeting with the configured settings
    pub async fn connect(self) -> Result<TcpTransport> {
        let Self {
            address,
            connect_timeout,
            send_timeout,
            receive_timeout,
            nodelay,
        } = self;
        let address = address.ok_or_else(|| Error::config("Address not set"))?;

        let connect_op = async {
            let stream = TcpStream::connect(address.as_str())
                .await
                .map_err(|source| Error::Connect {
                    address: address.clone(),
                    source,
                })?;
            stream.set_nodelay(nodelay)?;

            let (read_half, write_half) = stream.into_split();
            let mut reader = FrameReader::new(Box::new(read_half), receive_timeout);
            let writer = FrameWriter::new(Box::new(write_half), send_timeout);
            let greeting = read_greeting(&mut reader, &address).await?;

            Ok::<TcpTransport, Error>(TcpTransport {
                reader,
                writer,
                greeting,
            })
        };

        if let Some(timeout) = connect_timeout {
            tokio::time::timeout(timeout, connect_op)
                .await
                .map_err(|_| Error::Timeout(TimeoutKind::Connect))?
        } else {
            connect_op.await
        }
    }
}
