use std::{io, sync::Arc};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};

use crate::protocol::write_line;

/// Identifies one connection for the lifetime of the process. Allocated
/// sequentially by the listener and never reused.
pub type SessionId = u64;

/// The writable half of a session, shared between the session's own handler
/// and every peer handler that broadcasts to it.
///
/// The writer sits behind a lock so a peer delivery cannot interleave bytes
/// with the handler's own replies.
pub struct SessionSink<W> {
    id: SessionId,
    writer: Mutex<W>,
}

impl<W> SessionSink<W> {
    pub fn new(id: SessionId, writer: W) -> Self {
        Self {
            id,
            writer: Mutex::new(writer),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl<W> SessionSink<W>
where
    W: AsyncWrite + Unpin,
{
    /// Writes one line to this session and flushes it.
    pub async fn send_line(&self, line: &str) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        write_line(&mut *writer, line).await
    }

    /// Shuts the underlying writer down, ending the outbound stream.
    pub async fn shutdown(&self) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.shutdown().await
    }
}

/// Per-connection state, owned by the session's handler task. The registry
/// only ever holds the [`SessionSink`] handle.
pub struct Session<R, W> {
    id: SessionId,
    name: String,
    reader: R,
    sink: Arc<SessionSink<W>>,
}

impl<R, W> Session<R, W> {
    /// Builds a session with the default display name for its id.
    pub fn new(id: SessionId, reader: R, sink: Arc<SessionSink<W>>) -> Self {
        Self {
            id,
            name: format!("User {id}"),
            reader,
            sink,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replaces the display name, returning the previous one.
    pub fn rename(&mut self, new_name: &str) -> String {
        std::mem::replace(&mut self.name, new_name.to_string())
    }

    pub fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn sink(&self) -> &Arc<SessionSink<W>> {
        &self.sink
    }
}
