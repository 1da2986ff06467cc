#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tarn_client::config::ClientConfigBuilder;
use tarn_client::protocol::codec::{Codec, MsgpackCodec};
use tarn_client::protocol::greeting::SALT_SIZE;
use tarn_client::protocol::{Greeting, Payload};
use tarn_client::transport::{read_frame, write_frame};
use tarn_client::{ClientConfig, Request, Response, RetryPolicy, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing_subscriber::{fmt, EnvFilter};

/// Route client logs to the test output; `RUST_LOG=tarn_client=trace` for
/// frame level detail.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt().with_env_filter(filter).with_test_writer().try_init();
}

pub fn salt() -> [u8; SALT_SIZE] {
    std::array::from_fn(|i| (i * 7) as u8)
}

pub fn greeting() -> Greeting {
    Greeting::new("Tarantool 2.11.1 (Binary) 3c0f8a6e-stub", salt())
}

/// Client config pointed at a stub, with short timeouts.
pub fn config(addr: &str) -> ClientConfigBuilder {
    ClientConfig::builder()
        .tcp(addr)
        .connect_timeout(Some(Duration::from_secs(1)))
        .read_timeout(Some(Duration::from_secs(1)))
        .write_timeout(Some(Duration::from_secs(1)))
        .retry_policy(RetryPolicy::Constant(Duration::from_millis(10)))
}

/// Accept one connection and send the greeting.
pub async fn accept(listener: &TcpListener) -> TcpStream {
    let (mut stream, _) = listener.accept().await.unwrap();
    stream.write_all(&greeting().to_bytes()).await.unwrap();
    stream
}

/// Read one request; `None` once the client hung up.
pub async fn read_request(stream: &mut TcpStream) -> Option<(u64, Request)> {
    let frame = read_frame(stream).await.ok()?;
    Some(MsgpackCodec.decode_request(&frame).unwrap())
}

pub async fn write_response(stream: &mut TcpStream, response: &Response) -> tarn_client::Result<()> {
    let bytes = MsgpackCodec.encode_response(response)?;
    write_frame(stream, &bytes).await
}

/// What the stub does with a request.
pub enum Reply {
    Rows(Vec<Value>),
    Payload(Payload),
    Fail(u32, &'static str),
    /// Hang up without answering
    Close,
    After(Duration, Box<Reply>),
}

impl Reply {
    pub fn ok() -> Self {
        Self::Rows(Vec::new())
    }
}

#[derive(Default)]
pub struct Recorder {
    connections: AtomicUsize,
    requests: Mutex<Vec<Request>>,
}

impl Recorder {
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }
}

/// Spawn a stub server answering every request with `respond`, one request
/// at a time per connection.
pub async fn serve<F>(respond: F) -> (String, Arc<Recorder>)
where
    F: Fn(&Request) -> Reply + Send + Sync + 'static,
{
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let recorder = Arc::new(Recorder::default());
    let respond = Arc::new(respond);

    let rec = Arc::clone(&recorder);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            rec.connections.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(handle_connection(stream, Arc::clone(&rec), Arc::clone(&respond)));
        }
    });

    (addr, recorder)
}

async fn handle_connection<F>(mut stream: TcpStream, recorder: Arc<Recorder>, respond: Arc<F>)
where
    F: Fn(&Request) -> Reply + Send + Sync + 'static,
{
    if stream.write_all(&greeting().to_bytes()).await.is_err() {
        return;
    }

    while let Some((sync, request)) = read_request(&mut stream).await {
        recorder.requests.lock().push(request.clone());

        let mut reply = respond(&request);
        let reply = loop {
            match reply {
                Reply::After(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
                other => break other,
            }
        };

        let response = match reply {
            Reply::Rows(rows) => Response::with_data(sync, Value::Array(rows)),
            Reply::Payload(payload) => Response::ok(sync, payload),
            Reply::Fail(code, message) => Response::error(sync, code, message),
            Reply::Close => return,
            Reply::After(..) => unreachable!(),
        };
        if write_response(&mut stream, &response).await.is_err() {
            return;
        }
    }
}

/// Row as the catalog would return it.
pub fn row(fields: Vec<Value>) -> Value {
    Value::Array(fields)
}
