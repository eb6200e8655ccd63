use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;

type ConnectionError = Box<dyn std::error::Error + Send + Sync>;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Connection-level timeouts enforced by the listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionTimeouts {
    /// A connection that has neither read nor written a byte for this long is shut down.
    pub idle: Duration,
    /// Time a client has to send a complete HTTP/1 request head.
    pub header_read: Duration,
}

impl Default for ConnectionTimeouts {
    fn default() -> Self {
        ConnectionTimeouts {
            idle: Duration::from_secs(120),
            header_read: Duration::from_secs(120),
        }
    }
}

/// Wraps a complete in-memory body into the boxed body type used by services.
pub fn full_body<E: 'static>(bytes: impl Into<Bytes>) -> BoxBody<Bytes, E> {
    Full::new(bytes.into()).map_err(|e| match e {}).boxed()
}

pub async fn run_http_service<S, E>(
    host: &str,
    port: u16,
    timeouts: ConnectionTimeouts,
    service: S,
) -> Result<(), E>
where
    S: Service<Request<Incoming>, Response = Response<BoxBody<Bytes, E>>, Error = E>
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
    E: From<std::io::Error> + std::error::Error + Send + Sync + 'static,
{
    let listener = TcpListener::bind(format!("{host}:{port}")).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(address = %local_addr, "HTTP listener started");
    serve(listener, timeouts, service).await
}

/// Accepts connections from an already bound listener. Accept errors are
/// logged and never end the loop.
pub async fn serve<S, E>(
    listener: TcpListener,
    timeouts: ConnectionTimeouts,
    service: S,
) -> Result<(), E>
where
    S: Service<Request<Incoming>, Response = Response<BoxBody<Bytes, E>>, Error = E>
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
    E: From<std::io::Error> + std::error::Error + Send + Sync + 'static,
{
    let service_arc = Arc::new(service);

    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to accept connection");
                if let Some(delay) = accept_backoff(&e) {
                    tokio::time::sleep(delay).await;
                }
                continue;
            }
        };
        let _ = stream.set_nodelay(true);
        let svc = service_arc.clone();

        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, svc, timeouts).await {
                tracing::debug!(peer = %peer_addr, error = %e, "Connection closed with error");
            }
        });
    }
}

/// Pause before the next accept. Errors caused by a single peer are retried
/// at once; anything else (usually fd exhaustion) backs off briefly.
fn accept_backoff(error: &io::Error) -> Option<Duration> {
    match error.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => None,
        _ => Some(ACCEPT_BACKOFF),
    }
}

async fn serve_connection<S, E>(
    stream: TcpStream,
    service: Arc<S>,
    timeouts: ConnectionTimeouts,
) -> Result<(), ConnectionError>
where
    S: Service<Request<Incoming>, Response = Response<BoxBody<Bytes, E>>, Error = E>
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let activity = ActivityClock::new();
    let io = TokioIo::new(TrackedStream {
        inner: stream,
        activity: activity.clone(),
    });

    // Hand the connection to hyper; auto-detect h1/h2 on this socket
    let mut builder = Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(timeouts.header_read);

    let conn = builder.serve_connection(io, service);
    tokio::pin!(conn);

    loop {
        let deadline = activity.last() + timeouts.idle;
        tokio::select! {
            res = conn.as_mut() => return res,
            _ = tokio::time::sleep_until(deadline) => {
                if activity.last().elapsed() >= timeouts.idle {
                    tracing::debug!("Closing idle connection");
                    conn.as_mut().graceful_shutdown();
                    // In-flight responses get one more idle period to finish. A peer
                    // stalled mid-request would otherwise hold the socket forever.
                    return match tokio::time::timeout(timeouts.idle, conn.as_mut()).await {
                        Ok(res) => res,
                        Err(_) => Err("idle connection did not finish after shutdown".into()),
                    };
                }
            }
        }
    }
}

/// Last time any byte moved over a connection.
#[derive(Clone)]
struct ActivityClock {
    origin: Instant,
    elapsed_ms: Arc<AtomicU64>,
}

impl ActivityClock {
    fn new() -> Self {
        ActivityClock {
            origin: Instant::now(),
            elapsed_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    fn touch(&self) {
        let elapsed = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.elapsed_ms.store(elapsed, Ordering::Relaxed);
    }

    fn last(&self) -> Instant {
        self.origin + Duration::from_millis(self.elapsed_ms.load(Ordering::Relaxed))
    }
}

/// Stream wrapper that records read and write activity on an `ActivityClock`.
struct TrackedStream<S> {
    inner: S,
    activity: ActivityClock,
}

impl<S: AsyncRead + Unpin> AsyncRead for TrackedStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let res = Pin::new(&mut self.inner).poll_read(cx, buf);
        if matches!(res, Poll::Ready(Ok(()))) && buf.filled().len() > before {
            self.activity.touch();
        }
        res
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TrackedStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let res = Pin::new(&mut self.inner).poll_write(cx, buf);
        if matches!(res, Poll::Ready(Ok(n)) if n > 0) {
            self.activity.touch();
        }
        res
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let res = Pin::new(&mut self.inner).poll_write_vectored(cx, bufs);
        if matches!(res, Poll::Ready(Ok(n)) if n > 0) {
            self.activity.touch();
        }
        res
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::service::service_fn;
    use hyper_util::client::legacy::Client;
    use hyper_util::client::legacy::connect::HttpConnector;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn start_echo_server(timeouts: ConnectionTimeouts) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to address");
        let addr = listener.local_addr().unwrap();

        let service = service_fn(|req: Request<Incoming>| async move {
            let body = req
                .into_body()
                .collect()
                .await
                .map_err(io::Error::other)?
                .to_bytes();
            Ok::<_, io::Error>(Response::new(full_body(body)))
        });

        tokio::spawn(serve(listener, timeouts, service));
        addr
    }

    #[tokio::test]
    async fn test_serve_round_trip() {
        let addr = start_echo_server(ConnectionTimeouts::default()).await;

        let client: Client<HttpConnector, Full<Bytes>> =
            Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        let request = Request::builder()
            .method("POST")
            .uri(format!("http://{addr}/"))
            .body(Full::new(Bytes::from_static(b"hello world")))
            .unwrap();

        let response = client.request(request).await.unwrap();
        assert_eq!(response.status(), 200);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), b"hello world");
    }

    #[tokio::test]
    async fn test_idle_connection_is_closed() {
        let addr = start_echo_server(ConnectionTimeouts {
            idle: Duration::from_millis(200),
            header_read: Duration::from_secs(120),
        })
        .await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut buf = Vec::new();
        let res = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf)).await;

        // Either a clean EOF or a reset is fine, as long as the server gave up on us.
        assert!(res.is_ok(), "idle connection was not closed");
    }

    #[tokio::test]
    async fn test_connection_stalled_mid_body_is_closed() {
        let addr = start_echo_server(ConnectionTimeouts {
            idle: Duration::from_millis(200),
            header_read: Duration::from_secs(120),
        })
        .await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"POST / HTTP/1.1\r\nhost: test\r\ncontent-length: 100\r\n\r\nabc")
            .await
            .unwrap();

        let mut buf = Vec::new();
        let res = tokio::time::timeout(Duration::from_secs(3), stream.read_to_end(&mut buf)).await;
        assert!(res.is_ok(), "connection stalled mid-body was not closed");
    }

    #[test]
    fn test_accept_backoff() {
        for kind in [io::ErrorKind::ConnectionAborted, io::ErrorKind::ConnectionReset] {
            assert_eq!(accept_backoff(&io::Error::from(kind)), None);
        }
        // EMFILE
        assert_eq!(
            accept_backoff(&io::Error::other("too many open files")),
            Some(ACCEPT_BACKOFF)
        );
    }

    #[tokio::test]
    async fn test_slow_request_head_is_closed() {
        let addr = start_echo_server(ConnectionTimeouts {
            idle: Duration::from_secs(120),
            header_read: Duration::from_millis(200),
        })
        .await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();

        let mut buf = Vec::new();
        let res = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf)).await;
        assert!(res.is_ok(), "connection with an incomplete head was not closed");
    }

    #[tokio::test]
    async fn test_active_keep_alive_connection_is_kept() {
        let addr = start_echo_server(ConnectionTimeouts {
            idle: Duration::from_millis(500),
            header_read: Duration::from_secs(120),
        })
        .await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        for _ in 0..3 {
            stream
                .write_all(b"POST / HTTP/1.1\r\nhost: test\r\ncontent-length: 2\r\n\r\nok")
                .await
                .unwrap();
            let mut buf = [0u8; 1024];
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0);
            assert!(buf[..n].starts_with(b"HTTP/1.1 200"));
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}
