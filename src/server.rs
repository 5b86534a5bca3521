//! TCP server for the record log protocol.
//!
//! Accepts one connection at a time and drives it to completion: received
//! bytes are framed into newline-terminated records, each record is durably
//! appended to the store, and the full log is echoed back to the client
//! after every commit. Record commit order therefore equals receive order,
//! and no interleaving between connections is possible.

use crate::config::Config;
use crate::framer::RecordFramer;
use crate::shutdown::Shutdown;
use crate::store::RecordStore;
use bytes::BytesMut;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, trace, warn};

/// Listen backlog
const BACKLOG: i32 = 10;

/// Read buffer size per receive call
const CHUNK_SIZE: usize = 1024;

/// Server instance owning the listener, the store, and the stop flag.
pub struct Server {
    listener: TcpListener,
    store: RecordStore,
    shutdown: Shutdown,
}

impl Server {
    /// Bind the listening socket.
    ///
    /// The socket is built through socket2 so `SO_REUSEADDR` is set before
    /// bind; repeated runs do not fail on "address in use". Any failure here
    /// is fatal, before a single connection is accepted.
    pub async fn bind(
        config: &Config,
        store: RecordStore,
        shutdown: Shutdown,
    ) -> Result<Self, ServerError> {
        let addr: SocketAddr = config
            .listen
            .parse()
            .map_err(|e| ServerError::InvalidAddress(config.listen.clone(), e))?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(ServerError::Bind)?;
        socket.set_reuse_address(true).map_err(ServerError::Bind)?;
        socket.bind(&addr.into()).map_err(ServerError::Bind)?;
        socket.listen(BACKLOG).map_err(ServerError::Bind)?;
        socket.set_nonblocking(true).map_err(ServerError::Bind)?;

        let listener = TcpListener::from_std(socket.into()).map_err(ServerError::Bind)?;
        let local_addr = listener.local_addr().map_err(ServerError::Bind)?;
        info!(address = %local_addr, "Server listening");

        Ok(Self {
            listener,
            store,
            shutdown,
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::Bind)
    }

    /// Accept and handle connections until shutdown.
    ///
    /// Connections are serviced strictly one at a time: the handler runs to
    /// completion before the next accept. On shutdown the listener is
    /// dropped and the store file removed; persistence and accept failures
    /// end the loop with an error instead.
    pub async fn run(mut self) -> Result<(), ServerError> {
        loop {
            let (stream, peer) = tokio::select! {
                _ = self.shutdown.recv() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        return Err(ServerError::Accept(e));
                    }
                },
            };

            info!(peer = %peer, "Accepted connection");
            match handle_connection(stream, &mut self.store, self.shutdown.clone()).await {
                Ok(()) => info!(peer = %peer, "Closed connection"),
                Err(SessionError::Connection(e)) => {
                    warn!(peer = %peer, error = %e, "Connection error")
                }
                Err(SessionError::Store(e)) => {
                    error!(error = %e, "Record store failure, shutting down");
                    return Err(ServerError::Store(e));
                }
            }
        }

        info!("Caught stop request, exiting");
        drop(self.listener);
        if let Err(e) = self.store.remove().await {
            warn!(error = %e, "Failed to remove record store file");
        }
        Ok(())
    }
}

/// Drive one client connection until it closes, errors, or shutdown.
async fn handle_connection(
    mut stream: TcpStream,
    store: &mut RecordStore,
    mut shutdown: Shutdown,
) -> Result<(), SessionError> {
    let mut framer = RecordFramer::new();
    let mut chunk = BytesMut::with_capacity(CHUNK_SIZE);

    loop {
        if shutdown.is_shutdown() {
            return Ok(());
        }

        chunk.clear();
        let n = tokio::select! {
            _ = shutdown.recv() => return Ok(()),
            read = stream.read_buf(&mut chunk) => read.map_err(SessionError::Connection)?,
        };
        if n == 0 {
            // Peer closed; any trailing partial record is discarded.
            if framer.pending() > 0 {
                debug!(bytes = framer.pending(), "Discarding partial record at close");
            }
            return Ok(());
        }

        framer.feed(&chunk);
        while let Some(record) = framer.next_record() {
            let committed = store.append(&record).await.map_err(SessionError::Store)?;
            debug!(bytes = record.len(), committed, "Record committed");

            let log = store.read_all().await.map_err(SessionError::Store)?;
            // write_all retries partial writes until the whole log is sent.
            stream
                .write_all(&log)
                .await
                .map_err(SessionError::Connection)?;
            trace!(bytes = log.len(), "Echoed log to client");
        }
    }
}

/// Fatal server errors
#[derive(Debug)]
pub enum ServerError {
    InvalidAddress(String, std::net::AddrParseError),
    Bind(std::io::Error),
    Accept(std::io::Error),
    Store(std::io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::InvalidAddress(addr, e) => {
                write!(f, "Invalid listen address '{}': {}", addr, e)
            }
            ServerError::Bind(e) => write!(f, "Failed to bind listener: {}", e),
            ServerError::Accept(e) => write!(f, "Failed to accept connection: {}", e),
            ServerError::Store(e) => write!(f, "Record store failure: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}

/// Per-session error classification, applied by the accept loop:
/// connection errors end the session, store errors end the process.
enum SessionError {
    Connection(std::io::Error),
    Store(std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownController;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::task::JoinHandle;

    fn temp_path(tag: &str) -> PathBuf {
        static SEQ: AtomicU32 = AtomicU32::new(0);
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "linelog-server-{}-{}-{}",
            std::process::id(),
            tag,
            seq
        ))
    }

    async fn start_server(
        data_file: PathBuf,
    ) -> (
        SocketAddr,
        ShutdownController,
        JoinHandle<Result<(), ServerError>>,
    ) {
        let config = Config {
            listen: "127.0.0.1:0".to_string(),
            data_file: data_file.clone(),
            daemon: false,
            log_level: "info".to_string(),
        };

        let controller = ShutdownController::new();
        let store = RecordStore::create(&data_file).await.unwrap();
        let server = Server::bind(&config, store, controller.subscribe())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let handle = tokio::spawn(server.run());
        (addr, controller, handle)
    }

    async fn send_and_read(
        stream: &mut TcpStream,
        payload: &[u8],
        expected: &[u8],
    ) -> Vec<u8> {
        stream.write_all(payload).await.unwrap();
        let mut response = vec![0u8; expected.len()];
        stream.read_exact(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn echoes_cumulative_log_after_each_record() {
        let path = temp_path("cumulative");
        let (addr, controller, handle) = start_server(path).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        let r1 = send_and_read(&mut client, b"alpha\n", b"alpha\n").await;
        assert_eq!(r1, b"alpha\n");

        let r2 = send_and_read(&mut client, b"beta\n", b"alpha\nbeta\n").await;
        assert_eq!(r2, b"alpha\nbeta\n");

        drop(client);
        controller.trigger();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn frames_records_split_across_writes() {
        let path = temp_path("split");
        let (addr, controller, handle) = start_server(path).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"hel").await.unwrap();
        // Give the two writes distinct receive calls on the server side.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let r = send_and_read(&mut client, b"lo\n", b"hello\n").await;
        assert_eq!(r, b"hello\n");

        drop(client);
        controller.trigger();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn multiple_records_in_one_write() {
        let path = temp_path("multi");
        let (addr, controller, handle) = start_server(path).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"one\ntwo\n").await.unwrap();

        // Two commit+respond cycles: "one\n" then "one\ntwo\n".
        let mut response = vec![0u8; 4 + 8];
        client.read_exact(&mut response).await.unwrap();
        assert_eq!(&response[..], b"one\none\ntwo\n");

        drop(client);
        controller.trigger();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn empty_record_is_committed_and_echoed() {
        let path = temp_path("empty");
        let (addr, controller, handle) = start_server(path).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        let r = send_and_read(&mut client, b"\n", b"\n").await;
        assert_eq!(r, b"\n");

        drop(client);
        controller.trigger();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn log_persists_across_sequential_connections() {
        let path = temp_path("sequential");
        let (addr, controller, handle) = start_server(path).await;

        let mut a = TcpStream::connect(addr).await.unwrap();
        let r = send_and_read(&mut a, b"foo\n", b"foo\n").await;
        assert_eq!(r, b"foo\n");
        drop(a);

        // Give the accept loop time to finish with client A.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut b = TcpStream::connect(addr).await.unwrap();
        let r = send_and_read(&mut b, b"bar\n", b"foo\nbar\n").await;
        assert_eq!(r, b"foo\nbar\n");
        drop(b);

        controller.trigger();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_while_blocked_in_accept_removes_store() {
        let path = temp_path("shutdown-accept");
        let (_addr, controller, handle) = start_server(path.clone()).await;

        controller.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("server should stop")
            .unwrap()
            .unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn shutdown_with_idle_connected_client() {
        let path = temp_path("shutdown-idle");
        let (addr, controller, handle) = start_server(path.clone()).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        let r = send_and_read(&mut client, b"held\n", b"held\n").await;
        assert_eq!(r, b"held\n");

        // Client sends nothing further; the handler must still observe the
        // stop flag instead of blocking in read forever.
        controller.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("server should stop")
            .unwrap()
            .unwrap();
        assert!(!path.exists());
    }
}
