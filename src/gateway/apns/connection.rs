use async_trait::async_trait;
use rustls::{
    ClientConfig, RootCertStore,
    pki_types::{CertificateDer, PrivateKeyDer, ServerName, pem::PemObject},
};
use std::{
    fmt, fs, io,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::Mutex,
};
use tracing::{debug, error, info, warn};

use crate::delivery::error::PlingError;

/// A connected, ordered byte stream.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

pub type BoxedTransport = Box<dyn Transport>;

/// Establishes a fresh transport, including any handshake.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> io::Result<BoxedTransport>;
}

/// TCP + TLS client authenticated with a PEM certificate/key pair.
pub struct TlsConnector {
    host: String,
    port: u16,
    server_name: ServerName<'static>,
    tls: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    /// Reads the certificate chain and private key from one PEM file.
    pub fn from_pem_file(
        path: impl AsRef<Path>,
        host: &str,
        port: u16,
    ) -> Result<Self, PlingError> {
        let path = path.as_ref();
        let pem = fs::read(path).map_err(|err| {
            PlingError::AuthenticationFailed(format!(
                "Could not read certificate {}: {}",
                path.display(),
                err
            ))
        })?;

        Self::from_pem(&pem, host, port)
    }

    pub fn from_pem(pem: &[u8], host: &str, port: u16) -> Result<Self, PlingError> {
        let certs = CertificateDer::pem_slice_iter(pem)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| {
                PlingError::AuthenticationFailed(format!("Could not parse certificate: {}", err))
            })?;
        if certs.is_empty() {
            return Err(PlingError::AuthenticationFailed(
                "No certificate found in PEM data".to_string(),
            ));
        }

        let key = PrivateKeyDer::from_pem_slice(pem).map_err(|err| {
            PlingError::AuthenticationFailed(format!("Could not parse private key: {}", err))
        })?;

        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|err| PlingError::AuthenticationFailed(err.to_string()))?
            .with_root_certificates(roots)
            .with_client_auth_cert(certs, key)
            .map_err(|err| {
                PlingError::AuthenticationFailed(format!("Certificate rejected: {}", err))
            })?;

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|err| PlingError::Argument(format!("Invalid host {:?}: {}", host, err)))?;

        Ok(Self {
            host: host.to_string(),
            port,
            server_name,
            tls: tokio_rustls::TlsConnector::from(Arc::new(config)),
        })
    }
}

impl fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConnector")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

#[async_trait]
impl Connector for TlsConnector {
    async fn connect(&self) -> io::Result<BoxedTransport> {
        debug!(host = %self.host, port = self.port, "opening TLS connection");
        let tcp = TcpStream::connect((self.host.as_str(), self.port)).await?;
        tcp.set_nodelay(true)?;
        let stream = self.tls.connect(self.server_name.clone(), tcp).await?;
        Ok(Box::new(stream))
    }
}

enum Link {
    /// Never opened, or closed by the owner.
    Closed,
    Connected(BoxedTransport),
    /// Dropped after a transport failure; reopened by the next operation.
    Failed,
}

impl Link {
    fn name(&self) -> &'static str {
        match self {
            Link::Closed => "closed",
            Link::Connected(_) => "connected",
            Link::Failed => "failed",
        }
    }
}

enum Transfer<'b> {
    Write(&'b [u8]),
    Read(&'b mut [u8]),
}

impl Transfer<'_> {
    async fn apply(&mut self, stream: &mut BoxedTransport) -> io::Result<usize> {
        match self {
            Transfer::Write(bytes) => {
                stream.write_all(bytes).await?;
                stream.flush().await?;
                Ok(bytes.len())
            }
            Transfer::Read(buf) => stream.read(buf).await,
        }
    }
}

/// Persistent connection that replays an operation on a fresh connection
/// after transport failures, up to `max_attempts` tries in total.
///
/// Operations are serialized: a frame is always written completely before
/// the next operation touches the stream.
pub struct FramingConnection {
    connector: Arc<dyn Connector>,
    link: Mutex<Link>,
    max_attempts: usize,
    reconnects: AtomicUsize,
}

impl FramingConnection {
    pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

    pub fn new(connector: Arc<dyn Connector>, max_attempts: usize) -> Self {
        Self {
            connector,
            link: Mutex::new(Link::Closed),
            max_attempts: max_attempts.max(1),
            reconnects: AtomicUsize::new(0),
        }
    }

    /// Connects, retrying transient failures like any other operation.
    pub async fn open(&self) -> Result<(), PlingError> {
        let mut link = self.link.lock().await;
        if let Link::Connected(_) = *link {
            return Ok(());
        }

        let mut attempt = 1;
        loop {
            match self.connector.connect().await {
                Ok(stream) => {
                    *link = Link::Connected(stream);
                    info!(attempt, "APNs connection opened");
                    return Ok(());
                }
                Err(err) => {
                    self.retry_or_give_up(attempt, err)?;
                    attempt += 1;
                }
            }
        }
    }

    pub async fn close(&self) {
        let mut link = self.link.lock().await;
        if let Link::Connected(mut stream) = std::mem::replace(&mut *link, Link::Closed) {
            if let Err(err) = stream.shutdown().await {
                debug!(error = %err, "error while shutting down connection");
            }
        }
    }

    /// False once closed by the owner; a connection waiting to be reopened
    /// after a failure still counts as open.
    pub async fn is_open(&self) -> bool {
        !matches!(*self.link.lock().await, Link::Closed)
    }

    /// How often the socket has been reopened after a failure.
    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    /// Writes the whole buffer.
    pub async fn write(&self, bytes: &[u8]) -> Result<(), PlingError> {
        self.transfer(Transfer::Write(bytes)).await.map(|_| ())
    }

    /// Reads into `buf`, returning `0` at end of stream.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, PlingError> {
        self.transfer(Transfer::Read(buf)).await
    }

    async fn transfer(&self, mut op: Transfer<'_>) -> Result<usize, PlingError> {
        let mut link = self.link.lock().await;
        if let Link::Closed = *link {
            return Err(PlingError::ConnectionClosed);
        }

        let mut attempt = 1;
        loop {
            match self.attempt(&mut link, &mut op).await {
                Ok(transferred) => return Ok(transferred),
                Err(err) => {
                    *link = Link::Failed;
                    self.retry_or_give_up(attempt, err)?;
                    attempt += 1;
                }
            }
        }
    }

    /// Reads until the peer closes the stream, without replaying anything:
    /// a reconnect mid-stream would splice two unrelated streams together.
    /// A close without TLS close_notify also counts as end of stream.
    pub async fn read_to_end(&self) -> Result<Vec<u8>, PlingError> {
        let mut link = self.link.lock().await;
        let Link::Connected(stream) = &mut *link else {
            return Err(PlingError::ConnectionClosed);
        };

        let mut data = Vec::new();
        let mut chunk = [0u8; 4096];
        let result = loop {
            match stream.read(&mut chunk).await {
                Ok(0) => break Ok(()),
                Ok(read) => data.extend_from_slice(&chunk[..read]),
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break Ok(()),
                Err(err) => break Err(err),
            }
        };

        match result {
            Ok(()) => Ok(data),
            Err(err) => {
                *link = Link::Failed;
                error!(bytes = data.len(), error = %err, "APNs stream broke off");
                Err(PlingError::Io(io::Error::other(format!(
                    "APNs stream failed after {} byte(s): {}",
                    data.len(),
                    err
                ))))
            }
        }
    }

    /// `Ok` when another attempt is due, otherwise the uniform exhaustion
    /// error.
    fn retry_or_give_up(&self, attempt: usize, err: io::Error) -> Result<(), PlingError> {
        if !is_transient(&err) || attempt >= self.max_attempts {
            error!(attempt, error = %err, "giving up on APNs connection");
            return Err(PlingError::Io(io::Error::other(format!(
                "APNs connection failed after {} attempt(s): {}",
                attempt, err
            ))));
        }

        warn!(
            attempt,
            max_attempts = self.max_attempts,
            error = %err,
            "APNs connection failed, reconnecting"
        );
        Ok(())
    }

    async fn attempt(&self, link: &mut Link, op: &mut Transfer<'_>) -> io::Result<usize> {
        if let Link::Failed = link {
            let stream = self.connector.connect().await?;
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            *link = Link::Connected(stream);
        }

        match link {
            Link::Connected(stream) => op.apply(stream).await,
            _ => Err(io::ErrorKind::NotConnected.into()),
        }
    }
}

impl fmt::Debug for FramingConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self
            .link
            .try_lock()
            .map(|link| link.name())
            .unwrap_or("busy");
        f.debug_struct("FramingConnection")
            .field("state", &state)
            .field("max_attempts", &self.max_attempts)
            .field("reconnects", &self.reconnects())
            .finish()
    }
}

/// Failures worth a reconnect. Bad arguments and refused permissions would
/// fail the same way again.
fn is_transient(err: &io::Error) -> bool {
    !matches!(
        err.kind(),
        io::ErrorKind::InvalidInput | io::ErrorKind::PermissionDenied | io::ErrorKind::Unsupported
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use std::{
        pin::Pin,
        task::{Context, Poll},
    };
    use tokio::io::{DuplexStream, ReadBuf, duplex};

    /// A stream whose every operation fails with `kind`.
    pub(crate) struct Broken(pub io::ErrorKind);

    impl AsyncRead for Broken {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(self.0.into()))
        }
    }

    impl AsyncWrite for Broken {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(self.0.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Hands out the scripted transports in order, one per connect.
    pub(crate) fn scripted_connector(
        script: Vec<io::Result<BoxedTransport>>,
    ) -> (MockConnector, Arc<AtomicUsize>) {
        let connects = Arc::new(AtomicUsize::new(0));
        let counter = connects.clone();
        let script = SyncMutex::new(script.into_iter());

        let mut connector = MockConnector::new();
        connector.expect_connect().returning(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            script
                .lock()
                .next()
                .unwrap_or_else(|| Err(io::ErrorKind::ConnectionRefused.into()))
        });

        (connector, connects)
    }

    pub(crate) fn broken_pipe() -> io::Result<BoxedTransport> {
        let transport: BoxedTransport = Box::new(Broken(io::ErrorKind::BrokenPipe));
        Ok(transport)
    }

    /// Hands out `data` once, then fails reads with `UnexpectedEof` the way
    /// rustls reports a peer that hung up without close_notify.
    pub(crate) struct Abrupt(pub Option<Vec<u8>>);

    impl AsyncRead for Abrupt {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            match self.0.take() {
                Some(data) => {
                    buf.put_slice(&data);
                    Poll::Ready(Ok(()))
                }
                None => Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into())),
            }
        }
    }

    impl AsyncWrite for Abrupt {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    pub(crate) fn abrupt(data: &[u8]) -> io::Result<BoxedTransport> {
        let transport: BoxedTransport = Box::new(Abrupt(Some(data.to_vec())));
        Ok(transport)
    }

    /// A transport backed by an in-memory pipe; the second half is the
    /// server's end.
    pub(crate) fn working() -> (io::Result<BoxedTransport>, DuplexStream) {
        let (client, server) = duplex(4096);
        let transport: BoxedTransport = Box::new(client);
        (Ok(transport), server)
    }

    #[tokio::test]
    async fn test_write_before_open_fails() {
        let connection = FramingConnection::new(Arc::new(MockConnector::new()), 3);

        assert!(matches!(
            connection.write(b"frame").await,
            Err(PlingError::ConnectionClosed)
        ));
        assert!(!connection.is_open().await);
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (transport, _server) = working();
        let (connector, _) = scripted_connector(vec![transport]);
        let connection = FramingConnection::new(Arc::new(connector), 3);

        connection.open().await.unwrap();
        assert!(connection.is_open().await);
        connection.close().await;

        let err = connection.write(b"Waahhhh!").await.unwrap_err();
        assert_eq!(err.to_string(), "Connection closed");
    }

    #[tokio::test]
    async fn test_write_passes_bytes_through() {
        let (transport, mut server) = working();
        let (connector, connects) = scripted_connector(vec![transport]);
        let connection = FramingConnection::new(Arc::new(connector), 3);

        connection.open().await.unwrap();
        connection.write(b"Pass this through!").await.unwrap();
        connection.write(b"!").await.unwrap();

        let mut received = [0u8; 19];
        server.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"Pass this through!!");
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reconnects_after_broken_pipes() {
        let (transport, mut server) = working();
        let (connector, connects) =
            scripted_connector(vec![broken_pipe(), broken_pipe(), transport]);
        let connection = FramingConnection::new(Arc::new(connector), 3);

        connection.open().await.unwrap();
        connection.write(b"frame").await.unwrap();

        let mut received = [0u8; 5];
        server.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"frame");
        assert_eq!(connection.reconnects(), 2);
        assert_eq!(connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_a_generic_io_error() {
        let (connector, connects) =
            scripted_connector(vec![broken_pipe(), broken_pipe(), broken_pipe()]);
        let connection = FramingConnection::new(Arc::new(connector), 3);

        connection.open().await.unwrap();
        let err = connection.write(b"frame").await.unwrap_err();

        match err {
            PlingError::Io(io_err) => assert_eq!(io_err.kind(), io::ErrorKind::Other),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(connects.load(Ordering::SeqCst), 3);
        assert!(connection.is_open().await);
    }

    #[tokio::test]
    async fn test_failed_reconnect_counts_as_an_attempt() {
        let (transport, mut server) = working();
        let (connector, connects) = scripted_connector(vec![
            broken_pipe(),
            Err(io::ErrorKind::ConnectionRefused.into()),
            transport,
        ]);
        let connection = FramingConnection::new(Arc::new(connector), 3);

        connection.open().await.unwrap();
        connection.write(b"ok").await.unwrap();

        let mut received = [0u8; 2];
        server.read_exact(&mut received).await.unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 3);
        assert_eq!(connection.reconnects(), 1);
    }

    #[tokio::test]
    async fn test_non_transient_errors_are_not_retried() {
        let invalid: BoxedTransport = Box::new(Broken(io::ErrorKind::InvalidInput));
        let (connector, connects) = scripted_connector(vec![Ok(invalid)]);
        let connection = FramingConnection::new(Arc::new(connector), 3);

        connection.open().await.unwrap();

        assert!(matches!(
            connection.write(b"frame").await,
            Err(PlingError::Io(_))
        ));
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_read_until_end_of_stream() {
        let (transport, mut server) = working();
        let (connector, _) = scripted_connector(vec![transport]);
        let connection = FramingConnection::new(Arc::new(connector), 3);
        connection.open().await.unwrap();

        server.write_all(b"abc").await.unwrap();
        drop(server);

        let mut buf = [0u8; 8];
        let read = connection.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..read], b"abc");
        assert_eq!(connection.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_open_failure_is_an_io_error() {
        let (connector, connects) = scripted_connector(vec![]);
        let connection = FramingConnection::new(Arc::new(connector), 3);

        match connection.open().await {
            Err(PlingError::Io(io_err)) => assert_eq!(io_err.kind(), io::ErrorKind::Other),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(connects.load(Ordering::SeqCst), 3);
        assert!(!connection.is_open().await);
    }

    #[tokio::test]
    async fn test_open_retries_transient_failures() {
        let (transport, mut server) = working();
        let (connector, connects) = scripted_connector(vec![
            Err(io::ErrorKind::ConnectionReset.into()),
            transport,
        ]);
        let connection = FramingConnection::new(Arc::new(connector), 3);

        connection.open().await.unwrap();
        connection.write(b"frame").await.unwrap();

        let mut received = [0u8; 5];
        server.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"frame");
        assert_eq!(connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_open_does_not_retry_refused_permission() {
        let (connector, connects) =
            scripted_connector(vec![Err(io::ErrorKind::PermissionDenied.into())]);
        let connection = FramingConnection::new(Arc::new(connector), 3);

        assert!(matches!(connection.open().await, Err(PlingError::Io(_))));
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_read_to_end_until_close() {
        let (transport, mut server) = working();
        let (connector, _) = scripted_connector(vec![transport]);
        let connection = FramingConnection::new(Arc::new(connector), 3);
        connection.open().await.unwrap();

        server.write_all(b"first").await.unwrap();
        server.write_all(b" second").await.unwrap();
        drop(server);

        assert_eq!(connection.read_to_end().await.unwrap(), b"first second");
    }

    #[tokio::test]
    async fn test_read_to_end_treats_abrupt_close_as_end() {
        let (connector, connects) = scripted_connector(vec![abrupt(b"records")]);
        let connection = FramingConnection::new(Arc::new(connector), 3);
        connection.open().await.unwrap();

        assert_eq!(connection.read_to_end().await.unwrap(), b"records");
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(connection.reconnects(), 0);
    }

    #[tokio::test]
    async fn test_read_to_end_does_not_reconnect() {
        let (connector, connects) = scripted_connector(vec![broken_pipe(), abrupt(b"late")]);
        let connection = FramingConnection::new(Arc::new(connector), 3);
        connection.open().await.unwrap();

        assert!(matches!(
            connection.read_to_end().await,
            Err(PlingError::Io(_))
        ));
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_never_interleave() {
        const WRITERS: usize = 16;
        const FRAME_LEN: usize = 256;

        // a pipe much smaller than a frame forces partial writes
        let (client, mut server) = duplex(32);
        let client: BoxedTransport = Box::new(client);
        let (connector, _) = scripted_connector(vec![Ok(client)]);
        let connection = Arc::new(FramingConnection::new(Arc::new(connector), 3));
        connection.open().await.unwrap();

        let reader = tokio::spawn(async move {
            let mut received = vec![0u8; WRITERS * FRAME_LEN];
            server.read_exact(&mut received).await.unwrap();
            received
        });

        let writers: Vec<_> = (0..WRITERS)
            .map(|index| {
                let connection = connection.clone();
                tokio::spawn(async move {
                    let frame = vec![index as u8; FRAME_LEN];
                    connection.write(&frame).await.unwrap();
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        let received = reader.await.unwrap();
        let mut seen: Vec<u8> = received
            .chunks(FRAME_LEN)
            .map(|frame| {
                assert!(frame.iter().all(|byte| *byte == frame[0]), "interleaved frame");
                frame[0]
            })
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..WRITERS as u8).collect::<Vec<_>>());
    }

    #[test]
    fn test_missing_certificate_fails_fast() {
        let err = TlsConnector::from_pem_file("/nonexistent/certificate.pem", "localhost", 2195)
            .unwrap_err();

        assert!(matches!(err, PlingError::AuthenticationFailed(_)));
        assert!(err.to_string().contains("Could not read certificate"));
    }

    #[test]
    fn test_garbage_certificate_fails_fast() {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), b"--- CERT CONTENT ---").unwrap();

        assert!(matches!(
            TlsConnector::from_pem_file(file.path(), "localhost", 2195),
            Err(PlingError::AuthenticationFailed(_))
        ));
    }
}
