use std::{
    future::Future,
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::Result;
use tokio::{
    io::{AsyncBufRead, AsyncWrite, BufReader},
    net::{tcp::OwnedWriteHalf, TcpListener, TcpStream},
    select,
};
use tracing::{debug, info, warn};

use crate::{
    protocol::{self, read_line, Command},
    registry::{DuplicateSessionError, Registry},
    session::{Session, SessionId, SessionSink},
};

/// Accepts chat connections and runs one session handler task per
/// participant.
pub struct ChatServer {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl ChatServer {
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            state: Arc::new(ServerState::new()),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept loop until `shutdown` completes. Per-connection
    /// failures never stop the loop; session handlers run independently and
    /// are never awaited here.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let ChatServer { listener, state } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

struct ServerState {
    registry: Registry<OwnedWriteHalf>,
    next_id: AtomicU64,
}

impl ServerState {
    fn new() -> Self {
        Self {
            registry: Registry::new(),
            // Ids count up from zero for the process lifetime and are never
            // reused, so the first participant is "User 0".
            next_id: AtomicU64::new(0),
        }
    }

    fn next_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

fn handle_accept_result(
    result: io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<ServerState>,
) {
    match result {
        Ok((stream, peer)) => {
            let id = state.next_id();
            spawn_session_handler(stream, peer, id, state);
        }
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_session_handler(
    stream: TcpStream,
    peer: SocketAddr,
    id: SessionId,
    state: &Arc<ServerState>,
) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        handle_connection(stream, peer, id, state).await;
    });
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    id: SessionId,
    state: Arc<ServerState>,
) {
    let (reader, writer) = stream.into_split();
    let sink = Arc::new(SessionSink::new(id, writer));
    let mut session = Session::new(id, BufReader::new(reader), Arc::clone(&sink));

    if let Err(DuplicateSessionError(_)) = state.registry.add(sink).await {
        warn!(session = id, "dropping connection: session id already registered");
        return;
    }

    info!(peer = %peer, name = session.name(), "client connected");
    let end = run_session(&state.registry, &mut session).await;
    finish_session(&state.registry, session, end).await;
}

/// How a session's read loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// The client asked to leave; the sink is still usable for a farewell.
    Quit,
    /// The transport reached end of stream or failed; no farewell possible.
    Disconnected,
}

/// Greets the session, announces it, then interprets one line at a time
/// until the client quits or its transport ends.
async fn run_session<R, W>(registry: &Registry<W>, session: &mut Session<R, W>) -> SessionEnd
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if let Err(error) = send_welcome(session).await {
        debug!(name = session.name(), ?error, "failed to send welcome");
        return SessionEnd::Disconnected;
    }
    registry
        .broadcast(session.id(), &protocol::entry_notice(session.name()))
        .await;

    loop {
        let line = match read_line(session.reader_mut()).await {
            Ok(Some(line)) => line,
            Ok(None) => return SessionEnd::Disconnected,
            Err(error) => {
                debug!(name = session.name(), ?error, "read failed");
                return SessionEnd::Disconnected;
            }
        };

        match Command::parse(&line) {
            Command::Quit => return SessionEnd::Quit,
            Command::Rename(new_name) => {
                if !apply_rename(registry, session, new_name).await {
                    return SessionEnd::Disconnected;
                }
            }
            Command::Chat(text) => {
                registry
                    .broadcast(session.id(), &protocol::chat_line(session.name(), text))
                    .await;
            }
        }
    }
}

async fn send_welcome<R, W>(session: &Session<R, W>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    for line in protocol::welcome_lines(session.name()) {
        session.sink().send_line(&line).await?;
    }
    Ok(())
}

/// Applies a rename: confirms to the session itself and notifies everyone
/// else. Returns false when the session's own sink has failed.
async fn apply_rename<R, W>(
    registry: &Registry<W>,
    session: &mut Session<R, W>,
    new_name: &str,
) -> bool
where
    W: AsyncWrite + Unpin,
{
    let old_name = session.rename(new_name);
    info!("{old_name} is now known as {}", session.name());

    let confirmation = protocol::rename_confirmation(session.name());
    if let Err(error) = session.sink().send_line(&confirmation).await {
        debug!(name = session.name(), ?error, "failed to confirm rename");
        return false;
    }

    registry
        .broadcast(
            session.id(),
            &protocol::rename_notice(&old_name, session.name()),
        )
        .await;
    true
}

/// Runs the termination sequence exactly once per session: farewell if the
/// sink is usable, departure notice to the others, then close and
/// deregister.
async fn finish_session<R, W>(registry: &Registry<W>, session: Session<R, W>, end: SessionEnd)
where
    W: AsyncWrite + Unpin,
{
    if end == SessionEnd::Quit {
        if let Err(error) = session.sink().send_line(protocol::GOODBYE).await {
            debug!(name = session.name(), ?error, "failed to send farewell");
        }
    }

    registry
        .broadcast(session.id(), &protocol::departure_notice(session.name()))
        .await;

    if let Err(error) = session.sink().shutdown().await {
        debug!(name = session.name(), ?error, "failed to shut down session writer");
    }
    registry.remove(session.id()).await;
    info!(name = session.name(), "client disconnected");
}
