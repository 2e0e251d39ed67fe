use std::{net::SocketAddr, time::Duration};

use anyhow::{anyhow, Result};
use chat_relay::{
    protocol::{read_line, welcome_lines},
    server::ChatServer,
};
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
    sync::oneshot,
    task::JoinHandle,
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn three_clients_chat_rename_and_leave() -> Result<()> {
    let (addr, shutdown_tx, server_task) = spawn_server().await?;

    let mut a = TestClient::connect(addr).await?;
    a.expect_welcome("User 0").await?;

    let mut b = TestClient::connect(addr).await?;
    b.expect_welcome("User 1").await?;
    assert_eq!(
        a.expect_line("a sees b enter").await?,
        ">>> User 1 has entered."
    );

    let mut c = TestClient::connect(addr).await?;
    c.expect_welcome("User 2").await?;
    assert_eq!(
        a.expect_line("a sees c enter").await?,
        ">>> User 2 has entered."
    );
    assert_eq!(
        b.expect_line("b sees c enter").await?,
        ">>> User 2 has entered."
    );

    // A chat line reaches exactly the other participants, prefixed.
    a.send("hello").await?;
    assert_eq!(b.expect_line("b hears a").await?, "User 0: hello");
    assert_eq!(c.expect_line("c hears a").await?, "User 0: hello");

    // Rename: one confirmation to the renamer, one notice to the rest.
    b.send("NAME Bob").await?;
    assert_eq!(
        b.expect_line("b rename confirmation").await?,
        "*** You are now known as Bob"
    );
    assert_eq!(
        a.expect_line("a sees rename").await?,
        "*** User 1 is now known as Bob."
    );
    assert_eq!(
        c.expect_line("c sees rename").await?,
        "*** User 1 is now known as Bob."
    );

    // Subsequent messages from b carry the new name.
    b.send("hi all").await?;
    assert_eq!(a.expect_line("a hears bob").await?, "Bob: hi all");
    assert_eq!(c.expect_line("c hears bob").await?, "Bob: hi all");

    // BYE: farewell to the sender only, departure notice to the others,
    // then the connection closes.
    c.send("BYE").await?;
    assert_eq!(c.expect_line("c farewell").await?, "Goodbye!");
    c.expect_eof("c connection closes").await?;
    assert_eq!(
        a.expect_line("a sees c leave").await?,
        "<<< User 2 has left."
    );
    assert_eq!(
        b.expect_line("b sees c leave").await?,
        "<<< User 2 has left."
    );

    // The departed session is gone from delivery: a's next message reaches
    // b, and nothing else arrives before it.
    a.send("still here").await?;
    assert_eq!(
        b.expect_line("b hears a again").await?,
        "User 0: still here"
    );

    let _ = shutdown_tx.send(());
    let _ = server_task.await;

    Ok(())
}

#[tokio::test]
async fn abrupt_disconnect_still_announces_departure() -> Result<()> {
    let (addr, shutdown_tx, server_task) = spawn_server().await?;

    let mut a = TestClient::connect(addr).await?;
    a.expect_welcome("User 0").await?;

    let mut b = TestClient::connect(addr).await?;
    b.expect_welcome("User 1").await?;
    assert_eq!(
        a.expect_line("a sees b enter").await?,
        ">>> User 1 has entered."
    );

    // b vanishes without a quit command.
    drop(b);
    assert_eq!(
        a.expect_line("a sees b leave").await?,
        "<<< User 1 has left."
    );

    // The server keeps serving the remaining participant.
    let mut c = TestClient::connect(addr).await?;
    c.expect_welcome("User 2").await?;
    a.send("anyone?").await?;
    assert_eq!(c.expect_line("c hears a").await?, "User 0: anyone?");

    let _ = shutdown_tx.send(());
    let _ = server_task.await;

    Ok(())
}

async fn spawn_server() -> Result<(SocketAddr, oneshot::Sender<()>, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let server = ChatServer::new(listener);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.await;
        };
        let _ = server.run_until(shutdown).await;
    });

    Ok((addr, shutdown_tx, handle))
}

struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    async fn send(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn expect_line(&mut self, description: &str) -> Result<String> {
        match timeout(READ_TIMEOUT, read_line(&mut self.reader)).await {
            Ok(Ok(Some(line))) => Ok(line),
            Ok(Ok(None)) => Err(anyhow!("{description}: connection closed")),
            Ok(Err(error)) => Err(anyhow!("{description}: read failed: {error}")),
            Err(_) => Err(anyhow!("{description}: timed out waiting for line")),
        }
    }

    async fn expect_eof(&mut self, description: &str) -> Result<()> {
        match timeout(READ_TIMEOUT, read_line(&mut self.reader)).await {
            Ok(Ok(None)) => Ok(()),
            // A connection reset also counts as closed.
            Ok(Err(_)) => Ok(()),
            Ok(Ok(Some(line))) => Err(anyhow!("{description}: unexpected line '{line}'")),
            Err(_) => Err(anyhow!("{description}: timed out waiting for close")),
        }
    }

    async fn expect_welcome(&mut self, name: &str) -> Result<()> {
        for expected in welcome_lines(name) {
            let line = self.expect_line("welcome sequence").await?;
            assert_eq!(line, expected);
        }
        Ok(())
    }
}
