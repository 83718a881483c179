//! Sideband endpoints and their sockets.
//!
//! - `host:port`: TCP
//! - `unix:/path`: Unix Domain Socket (unix only)
//!
//! Both sides split the connected stream into boxed read and write halves so
//! the rest of the transport is agnostic of the socket family.

use std::fmt;
use std::path::PathBuf;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{Result, SidebandError};
use crate::negotiate::Strategy;

pub type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;
pub type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

const UNIX_PREFIX: &str = "unix:";

/// Parsed sideband connection URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(String),
    Unix(PathBuf),
}

impl Endpoint {
    /// Parse a connection URL as returned by negotiation.
    ///
    /// # Example
    ///
    /// ```
    /// use moniker_sideband::transport::Endpoint;
    ///
    /// assert_eq!(
    ///     Endpoint::parse("localhost:50055").unwrap(),
    ///     Endpoint::Tcp("localhost:50055".into())
    /// );
    /// assert!(matches!(Endpoint::parse("unix:/tmp/s.sock").unwrap(), Endpoint::Unix(_)));
    /// assert!(Endpoint::parse("localhost").is_err());
    /// ```
    pub fn parse(url: &str) -> Result<Self> {
        if let Some(path) = url.strip_prefix(UNIX_PREFIX) {
            if path.is_empty() {
                return Err(SidebandError::Protocol(format!(
                    "Empty socket path in connection URL '{}'",
                    url
                )));
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }

        match url.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(Endpoint::Tcp(url.to_string()))
            }
            _ => Err(SidebandError::Protocol(format!(
                "Invalid connection URL '{}', expected host:port or unix:/path",
                url
            ))),
        }
    }

    /// URL form, as handed out by negotiation.
    pub fn url(&self) -> String {
        match self {
            Endpoint::Tcp(addr) => addr.clone(),
            Endpoint::Unix(path) => format!("{}{}", UNIX_PREFIX, path.display()),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Connect to `endpoint`, applying the socket policy of `strategy`.
pub async fn connect(endpoint: &Endpoint, strategy: Strategy) -> Result<(BoxedReader, BoxedWriter)> {
    match endpoint {
        Endpoint::Tcp(addr) => {
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(strategy.nodelay())?;
            let (read, write) = stream.into_split();
            Ok((Box::new(read), Box::new(write)))
        }
        #[cfg(unix)]
        Endpoint::Unix(path) => {
            let stream = tokio::net::UnixStream::connect(path).await?;
            let (read, write) = stream.into_split();
            Ok((Box::new(read), Box::new(write)))
        }
        #[cfg(not(unix))]
        Endpoint::Unix(_) => Err(SidebandError::Io(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Unix domain sockets are not available on this platform",
        ))),
    }
}

/// Generate a unique socket path for this process.
///
/// Format: `{tmp}/moniker-sideband-{pid}-{uuid}.sock`
pub fn generate_socket_path() -> PathBuf {
    let name = format!(
        "moniker-sideband-{}-{}.sock",
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    );
    std::env::temp_dir().join(name)
}

enum ListenerKind {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener, PathBuf),
}

/// Accepting side of a sideband endpoint.
pub struct SidebandListener {
    inner: ListenerKind,
}

impl SidebandListener {
    /// Bind `endpoint`. A TCP port of 0 picks a free port.
    ///
    /// Removes any existing socket file at a Unix path before binding.
    pub async fn bind(endpoint: &Endpoint) -> Result<Self> {
        let inner = match endpoint {
            Endpoint::Tcp(addr) => ListenerKind::Tcp(TcpListener::bind(addr).await?),
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                ListenerKind::Unix(tokio::net::UnixListener::bind(path)?, path.clone())
            }
            #[cfg(not(unix))]
            Endpoint::Unix(_) => {
                return Err(SidebandError::Io(std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "Unix domain sockets are not available on this platform",
                )))
            }
        };
        Ok(Self { inner })
    }

    /// The endpoint clients should connect to.
    pub fn local_endpoint(&self) -> Result<Endpoint> {
        match &self.inner {
            ListenerKind::Tcp(listener) => Ok(Endpoint::Tcp(listener.local_addr()?.to_string())),
            #[cfg(unix)]
            ListenerKind::Unix(_, path) => Ok(Endpoint::Unix(path.clone())),
        }
    }

    /// Accept a single connection.
    pub async fn accept(&self) -> Result<(BoxedReader, BoxedWriter)> {
        match &self.inner {
            ListenerKind::Tcp(listener) => {
                let (stream, _addr) = listener.accept().await?;
                let (read, write) = stream.into_split();
                Ok((Box::new(read), Box::new(write)))
            }
            #[cfg(unix)]
            ListenerKind::Unix(listener, _) => {
                let (stream, _addr) = listener.accept().await?;
                let (read, write) = stream.into_split();
                Ok((Box::new(read), Box::new(write)))
            }
        }
    }
}

#[cfg(unix)]
impl Drop for SidebandListener {
    fn drop(&mut self) {
        if let ListenerKind::Unix(_, path) = &self.inner {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Endpoint::parse("").is_err());
        assert!(Endpoint::parse(":50055").is_err());
        assert!(Endpoint::parse("host:notaport").is_err());
        assert!(Endpoint::parse("unix:").is_err());
    }

    #[test]
    fn test_url_roundtrip() {
        for url in ["127.0.0.1:50055", "[::1]:80", "unix:/tmp/x.sock"] {
            assert_eq!(Endpoint::parse(url).unwrap().url(), url);
        }
    }

    #[test]
    fn test_generate_socket_path_uniqueness() {
        let a = generate_socket_path();
        let b = generate_socket_path();
        assert_ne!(a, b);
        assert!(a
            .to_string_lossy()
            .contains(&std::process::id().to_string()));
    }

    #[tokio::test]
    async fn test_tcp_connect_and_accept() {
        let listener = SidebandListener::bind(&Endpoint::Tcp("127.0.0.1:0".into()))
            .await
            .unwrap();
        let endpoint = listener.local_endpoint().unwrap();

        let server = tokio::spawn(async move {
            let (mut read, _write) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            read.read_exact(&mut buf).await.unwrap();
            buf
        });

        let (_read, mut write) = connect(&endpoint, Strategy::SocketsLowLatency)
            .await
            .unwrap();
        write.write_all(b"ping").await.unwrap();

        assert_eq!(&server.await.unwrap(), b"ping");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_connect_and_cleanup() {
        let endpoint = Endpoint::Unix(generate_socket_path());
        let listener = SidebandListener::bind(&endpoint).await.unwrap();

        let accept = tokio::spawn(async move {
            let halves = listener.accept().await.unwrap();
            drop(halves);
            listener
        });

        let _halves = connect(&endpoint, Strategy::Sockets).await.unwrap();
        let listener = accept.await.unwrap();

        let Endpoint::Unix(path) = &endpoint else {
            unreachable!()
        };
        assert!(path.exists());
        drop(listener);
        assert!(!path.exists());
    }
}
