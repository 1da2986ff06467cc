use std::path::{Path, PathBuf};
use std::time::Duration;

use tarn_protocol::Greeting;
use tokio::net::UnixStream;

use crate::error::{Error, Result, TimeoutKind};
use crate::transport::{read_greeting, FrameReader, FrameWriter, Transport, TransportOptions};

/// Unix domain socket transport with length-prefix framing
pub struct UnixTransport {
    reader: FrameReader,
    writer: FrameWriter,
    greeting: Greeting,
}

impl UnixTransport {
    /// Connect to a Unix socket with no timeouts
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        Self::builder().path(path).connect().await
    }

    /// Create a builder for configuring the transport
    pub fn builder() -> UnixTransportBuilder {
        UnixTransportBuilder::new()
    }
}

#[async_trait::async_trait]
impl Transport for UnixTransport {
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

/// Builder for configuring Unix socket transport
#[derive(Default)]
pub struct UnixTransportBuilder {
    path: Option<PathBuf>,
    connect_timeout: Option<Duration>,
    send_timeout: Option<Duration>,
    receive_timeout: Option<Duration>,
}

impl UnixTransportBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the socket path to connect to
    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
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

    /// Apply timeouts from transport options
    pub fn options(mut self, options: &TransportOptions) -> Self {
        self.connect_timeout = options.connect_timeout;
        self.send_timeout = options.write_timeout;
        self.receive_timeout = options.read_timeout;
        self
    }

    /// Connect and read the greeting with the configured settings
    pub async fn connect(self) -> Result<UnixTransport> {
        let Self {
            path,
            connect_timeout,
            send_timeout,
            receive_timeout,
        } = self;
        let path = path.ok_or_else(|| Error::config("Path not set"))?;
        let address = path.display().to_string();

        let connect_op = async {
            let stream = UnixStream::connect(&path)
                .await
                .map_err(|source| Error::Connect {
                    address: address.clone(),
                    source,
                })?;

            let (read_half, write_half) = stream.into_split();
            let mut reader = FrameReader::new(Box::new(read_half), receive_timeout);
            let writer = FrameWriter::new(Box::new(write_half), send_timeout);
            let greeting = read_greeting(&mut reader, &address).await?;

            Ok::<UnixTransport, Error>(UnixTransport {
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
