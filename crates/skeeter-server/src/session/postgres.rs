//! PostgreSQL session driven without an async runtime.
//!
//! `tokio-postgres` runs over a non-blocking std socket and is polled by
//! hand with a no-op waker. When the socket would block, the stream records
//! the direction, and that becomes the session's [`Readiness`]. The relay
//! then waits on the socket itself and polls again, which is the same
//! contract libpq offers for asynchronous connections.

use std::cell::Cell;
use std::collections::VecDeque;
use std::future::Future;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::task::noop_waker;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_postgres::config::Host;
use tokio_postgres::tls::NoTlsStream;
use tokio_postgres::{AsyncMessage, Client, Config, Connection, NoTls};

use super::{is_connectivity_state, NotificationEvent, Readiness, Session};
use crate::config::RelayConfig;
use crate::error::Error;
use crate::multiplexer::Interest;

/// Server port when the target names none.
pub const DEFAULT_PORT: u16 = 5432;

/// Socket directory when the target names no host and `PGHOST` is unset.
pub const DEFAULT_SOCKET_DIR: &str = "/var/run/postgresql";

type PgConnection = Connection<PgStream, NoTlsStream>;
type ConnectFuture = Pin<Box<dyn Future<Output = Result<(Client, PgConnection), tokio_postgres::Error>>>>;
type CommandFuture = Pin<Box<dyn Future<Output = Result<(), tokio_postgres::Error>>>>;

/// Directions the socket reported `WouldBlock` in during one poll.
#[derive(Debug, Clone, Copy, Default)]
struct Blocked {
    read: bool,
    write: bool,
}

enum Socket {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Socket {
    fn try_clone(&self) -> io::Result<Self> {
        match self {
            Socket::Tcp(s) => s.try_clone().map(Socket::Tcp),
            Socket::Unix(s) => s.try_clone().map(Socket::Unix),
        }
    }

    fn set_nonblocking(&self) -> io::Result<()> {
        match self {
            Socket::Tcp(s) => s.set_nonblocking(true),
            Socket::Unix(s) => s.set_nonblocking(true),
        }
    }

    fn shutdown(&self) -> io::Result<()> {
        match self {
            Socket::Tcp(s) => s.shutdown(Shutdown::Write),
            Socket::Unix(s) => s.shutdown(Shutdown::Write),
        }
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Socket::Tcp(s) => s.read(buf),
            Socket::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Socket::Tcp(s) => s.write(buf),
            Socket::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Non-blocking socket to the server that remembers why it last blocked.
pub struct PgStream {
    socket: Socket,
    blocked: Rc<Cell<Blocked>>,
}

impl PgStream {
    fn new(socket: Socket, blocked: Rc<Cell<Blocked>>) -> io::Result<Self> {
        socket.set_nonblocking()?;
        Ok(Self { socket, blocked })
    }

    fn try_clone(&self) -> io::Result<Self> {
        Ok(Self {
            socket: self.socket.try_clone()?,
            blocked: Rc::clone(&self.blocked),
        })
    }

    fn mark_blocked(&self, interest: Interest) {
        let mut blocked = self.blocked.get();
        match interest {
            Interest::Read => blocked.read = true,
            Interest::Write => blocked.write = true,
        }
        self.blocked.set(blocked);
    }
}

impl AsFd for PgStream {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match &self.socket {
            Socket::Tcp(s) => s.as_fd(),
            Socket::Unix(s) => s.as_fd(),
        }
    }
}

impl AsyncRead for PgStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            match this.socket.read(buf.initialize_unfilled()) {
                Ok(n) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    this.mark_blocked(Interest::Read);
                    return Poll::Pending;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Poll::Ready(Err(e)),
            }
        }
    }
}

impl AsyncWrite for PgStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        loop {
            match this.socket.write(buf) {
                Ok(n) => return Poll::Ready(Ok(n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    this.mark_blocked(Interest::Write);
                    return Poll::Pending;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Poll::Ready(Err(e)),
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.socket.shutdown() {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Poll::Ready(Err(e)),
            _ => Poll::Ready(Ok(())),
        }
    }
}

enum State {
    Idle,
    Handshake(ConnectFuture),
    Established {
        client: Rc<Client>,
        connection: PgConnection,
        command: Option<CommandFuture>,
    },
    Closed,
}

/// A `LISTEN`ing PostgreSQL session.
///
/// Nothing touches the network until the first [`Session::poll`]. The TCP
/// connect itself is bounded by the polling interval; the startup and
/// authentication exchange that follows is fully non-blocking.
pub struct PgSession {
    config: Config,
    connect_timeout: Duration,
    state: State,
    watch: Option<PgStream>,
    blocked: Rc<Cell<Blocked>>,
    notifications: VecDeque<NotificationEvent>,
}

impl PgSession {
    /// Prepare a session for the configured database target.
    pub fn open(relay: &RelayConfig) -> Result<Self, Error> {
        Ok(Self {
            config: parse_target(&relay.database)?,
            connect_timeout: relay.polling_interval,
            state: State::Idle,
            watch: None,
            blocked: Rc::default(),
            notifications: VecDeque::new(),
        })
    }

    fn open_stream(&self) -> Result<PgStream, Error> {
        let port = self.config.get_ports().first().copied().unwrap_or(DEFAULT_PORT);
        let host = self
            .config
            .get_hosts()
            .first()
            .ok_or_else(|| Error::Config("database target has no host".to_string()))?;

        let socket = match host {
            Host::Tcp(name) => connect_tcp(name, port, self.connect_timeout),
            Host::Unix(dir) => {
                UnixStream::connect(dir.join(format!(".s.PGSQL.{}", port))).map(Socket::Unix)
            }
        }
        .map_err(|e| {
            Error::Connectivity(format!("failed to connect to {:?} port {}: {}", host, port, e))
        })?;

        tracing::debug!(host = ?host, port, "database socket connected");
        Ok(PgStream::new(socket, Rc::clone(&self.blocked))?)
    }

    fn blocked_readiness(&self) -> Readiness {
        if self.blocked.get().write {
            Readiness::NeedsWrite
        } else {
            Readiness::NeedsRead
        }
    }
}

impl Session for PgSession {
    fn poll(&mut self) -> Result<Readiness, Error> {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        self.blocked.set(Blocked::default());

        loop {
            match &mut self.state {
                State::Idle => {
                    let stream = self.open_stream()?;
                    self.watch = Some(stream.try_clone()?);
                    let config = self.config.clone();
                    self.state = State::Handshake(Box::pin(async move {
                        config.connect_raw(stream, NoTls).await
                    }));
                }
                State::Handshake(connecting) => match connecting.as_mut().poll(&mut cx) {
                    Poll::Pending => return Ok(self.blocked_readiness()),
                    Poll::Ready(Ok((client, connection))) => {
                        tracing::debug!("database handshake complete");
                        self.state = State::Established {
                            client: Rc::new(client),
                            connection,
                            command: None,
                        };
                    }
                    Poll::Ready(Err(e)) => return Err(classify(e)),
                },
                State::Established {
                    connection,
                    command,
                    ..
                } => {
                    let idle = drive(connection, command, &mut self.notifications, &mut cx)?;
                    return Ok(if idle {
                        Readiness::Ready
                    } else {
                        self.blocked_readiness()
                    });
                }
                State::Closed => {
                    return Err(Error::Connectivity("database session is closed".to_string()))
                }
            }
        }
    }

    fn descriptor(&self) -> Option<BorrowedFd<'_>> {
        self.watch.as_ref().map(AsFd::as_fd)
    }

    fn execute(&mut self, sql: &str) -> Result<(), Error> {
        match &mut self.state {
            State::Established {
                client, command, ..
            } => {
                if command.is_some() {
                    return Err(Error::Database(format!(
                        "cannot issue {:?} while another command is in flight",
                        sql
                    )));
                }
                let client = Rc::clone(client);
                let sql = sql.to_string();
                *command = Some(Box::pin(async move { client.batch_execute(&sql).await }));
                Ok(())
            }
            State::Closed => Err(Error::Connectivity("database session is closed".to_string())),
            State::Idle | State::Handshake(_) => Err(Error::Database(format!(
                "cannot issue {:?} before the session is established",
                sql
            ))),
        }
    }

    fn pending_notifications(&self) -> usize {
        self.notifications.len()
    }

    fn pop_notification(&mut self) -> Option<NotificationEvent> {
        self.notifications.pop_front()
    }

    fn close(&mut self) -> Result<(), Error> {
        let state = std::mem::replace(&mut self.state, State::Closed);
        self.watch = None;

        if let State::Established {
            client,
            connection,
            command,
        } = state
        {
            drop(command);
            drop(client);

            // With the client gone the connection sends Terminate on its
            // next poll, if the socket takes it.
            let waker = noop_waker();
            let mut cx = Context::from_waker(&waker);
            let mut connection = Box::pin(connection);
            if let Poll::Ready(Err(e)) = connection.as_mut().poll(&mut cx) {
                return Err(classify(e));
            }
        }
        Ok(())
    }
}

/// Poll the established connection and any in-flight command.
///
/// Returns `true` once no command is outstanding.
fn drive(
    connection: &mut PgConnection,
    command: &mut Option<CommandFuture>,
    notifications: &mut VecDeque<NotificationEvent>,
    cx: &mut Context<'_>,
) -> Result<bool, Error> {
    loop {
        // The first poll hands the request to the connection.
        if let Some(pending) = command.as_mut() {
            if let Poll::Ready(result) = pending.as_mut().poll(cx) {
                *command = None;
                result.map_err(classify)?;
            }
        }

        loop {
            match connection.poll_message(cx) {
                Poll::Ready(Some(Ok(AsyncMessage::Notification(notification)))) => {
                    notifications.push_back(NotificationEvent {
                        channel: notification.channel().to_string(),
                        payload: Some(Bytes::copy_from_slice(notification.payload().as_bytes())),
                        process_id: Some(notification.process_id()),
                    });
                }
                Poll::Ready(Some(Ok(AsyncMessage::Notice(notice)))) => {
                    tracing::debug!(
                        severity = notice.severity(),
                        message = notice.message(),
                        "database notice"
                    );
                }
                Poll::Ready(Some(Ok(_))) => {}
                Poll::Ready(Some(Err(e))) => return Err(classify(e)),
                Poll::Ready(None) => {
                    return Err(Error::Connectivity(
                        "connection closed by server".to_string(),
                    ))
                }
                Poll::Pending => break,
            }
        }

        let Some(pending) = command.as_mut() else {
            return Ok(true);
        };
        match pending.as_mut().poll(cx) {
            Poll::Ready(result) => {
                *command = None;
                result.map_err(classify)?;
            }
            Poll::Pending => return Ok(false),
        }
    }
}

/// Sort a client error into the recoverable and fatal kinds.
fn classify(err: tokio_postgres::Error) -> Error {
    if err.is_closed() {
        return Error::Connectivity(err.to_string());
    }

    if let Some(db) = err.as_db_error() {
        let code = db.code().code();
        let message = format!("{} ({}): {}", db.severity(), code, db.message());
        return if is_connectivity_state(code) {
            Error::Connectivity(message)
        } else {
            Error::Database(message)
        };
    }

    let io_failure = std::error::Error::source(&err)
        .map(|source| source.is::<io::Error>())
        .unwrap_or(false);
    if io_failure {
        Error::Connectivity(err.to_string())
    } else {
        Error::Database(err.to_string())
    }
}

fn connect_tcp(name: &str, port: u16, timeout: Duration) -> io::Result<Socket> {
    let mut last_error = None;
    for addr in (name, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(Socket::Tcp(stream));
            }
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("no addresses for {}", name))
    }))
}

/// Build a client configuration from the `database` setting.
///
/// A bare word is a database name. Missing host and user fall back to
/// `PGHOST`/the local socket directory and `PGUSER`/`USER`, as libpq does.
pub(crate) fn parse_target(target: &str) -> Result<Config, Error> {
    let target = target.trim();
    let mut config = if target.contains('=')
        || target.starts_with("postgres://")
        || target.starts_with("postgresql://")
    {
        target
            .parse::<Config>()
            .map_err(|e| Error::Config(format!("invalid database target: {}", e)))?
    } else {
        let mut config = Config::new();
        config.dbname(target);
        config
    };

    if config.get_hosts().is_empty() {
        let host = std::env::var("PGHOST").unwrap_or_else(|_| DEFAULT_SOCKET_DIR.to_string());
        config.host(&host);
    }
    if config.get_user().is_none() {
        if let Some(user) = ["PGUSER", "USER"]
            .iter()
            .find_map(|key| std::env::var(key).ok())
        {
            config.user(&user);
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn relay_config(database: &str) -> RelayConfig {
        RelayConfig::new(database, "inproc://unused")
            .with_polling_interval(Duration::from_millis(500))
    }

    #[test]
    fn test_bare_target_is_dbname() {
        let config = parse_target("orders").unwrap();
        assert_eq!(config.get_dbname(), Some("orders"));
        assert!(!config.get_hosts().is_empty());
    }

    #[test]
    fn test_connection_string_target() {
        let config = parse_target("host=db.internal port=6543 dbname=orders user=relay").unwrap();
        assert_eq!(config.get_dbname(), Some("orders"));
        assert_eq!(config.get_user(), Some("relay"));
        assert_eq!(config.get_ports(), &[6543]);
        assert!(matches!(&config.get_hosts()[0], Host::Tcp(name) if name == "db.internal"));
    }

    #[test]
    fn test_invalid_target() {
        let err = parse_target("host=db port=notaport").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_stream_read_would_block() {
        let (left, mut right) = UnixStream::pair().unwrap();
        let blocked = Rc::new(Cell::new(Blocked::default()));
        let mut stream = PgStream::new(Socket::Unix(left), Rc::clone(&blocked)).unwrap();

        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut storage = [0u8; 16];

        let mut buf = ReadBuf::new(&mut storage);
        assert!(Pin::new(&mut stream).poll_read(&mut cx, &mut buf).is_pending());
        assert!(blocked.get().read);
        assert!(!blocked.get().write);

        right.write_all(b"abc").unwrap();
        let mut buf = ReadBuf::new(&mut storage);
        match Pin::new(&mut stream).poll_read(&mut cx, &mut buf) {
            Poll::Ready(Ok(())) => assert_eq!(buf.filled(), b"abc"),
            other => panic!("unexpected poll result: {:?}", other),
        }
    }

    #[test]
    fn test_refused_connection_is_connectivity() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let target = format!("host=127.0.0.1 port={} dbname=orders user=relay", port);
        let mut session = PgSession::open(&relay_config(&target)).unwrap();
        let err = session.poll().unwrap_err();
        assert!(err.is_recoverable(), "unexpected error: {err}");
    }

    #[test]
    fn test_handshake_waits_for_server() {
        // Accepted by the kernel backlog, but nobody answers.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let target = format!("host=127.0.0.1 port={} dbname=orders user=relay", port);
        let mut session = PgSession::open(&relay_config(&target)).unwrap();
        assert!(session.descriptor().is_none());

        assert_eq!(session.poll().unwrap(), Readiness::NeedsRead);
        assert!(session.descriptor().is_some());
        assert!(session.execute("LISTEN orders").is_err());

        session.close().unwrap();
        assert!(session.descriptor().is_none());
        assert!(session.poll().unwrap_err().is_recoverable());
    }
}
