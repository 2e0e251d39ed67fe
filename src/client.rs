use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    select,
    task::{JoinError, JoinHandle},
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    protocol::{self, read_line, write_line},
};

/// Connects to a server and relays lines both ways: a spawned task copies
/// server lines to stdout while this task copies stdin lines to the server.
/// The two sides share nothing but the socket.
pub async fn run(args: ClientArgs) -> Result<()> {
    let (reader, mut writer) = establish_connection(&args).await?;
    let mut server_task: JoinHandle<io::Result<()>> = tokio::spawn(relay_server_lines(reader));

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    let wait_for_server = loop {
        input.clear();
        select! {
            finished = &mut server_task => {
                report_relay_end(finished);
                break false;
            }
            bytes_read = stdin.read_line(&mut input) => {
                if relay_stdin_line(bytes_read?, &input, &mut writer).await? {
                    break true;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break false;
            }
        }
    };

    shutdown_connection(&mut writer).await;
    if wait_for_server {
        // Let the server's farewell reach stdout before leaving.
        report_relay_end((&mut server_task).await);
    }

    Ok(())
}

async fn establish_connection(args: &ClientArgs) -> Result<(OwnedReadHalf, OwnedWriteHalf)> {
    let stream = TcpStream::connect((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("failed to connect to {}:{}", args.host, args.port))?;

    info!("connected to {}:{}", args.host, args.port);

    Ok(stream.into_split())
}

/// Copies every server line to stdout until the server closes the stream.
async fn relay_server_lines(reader: OwnedReadHalf) -> io::Result<()> {
    let mut reader = BufReader::new(reader);
    while let Some(line) = read_line(&mut reader).await? {
        write_stdout(&line).await?;
    }
    Ok(())
}

/// Relays one line of user input to the server. Returns true once input is
/// finished: either stdin closed or the user sent the quit keyword.
async fn relay_stdin_line(
    bytes_read: usize,
    input: &str,
    writer: &mut OwnedWriteHalf,
) -> Result<bool> {
    if bytes_read == 0 {
        return Ok(true);
    }

    let text = input.trim_end_matches(['\r', '\n']);
    write_line(writer, text).await?;
    Ok(text.trim() == protocol::QUIT_KEYWORD)
}

fn report_relay_end(result: Result<io::Result<()>, JoinError>) {
    match result {
        Ok(Ok(())) => info!("server closed the connection"),
        Ok(Err(error)) => warn!(?error, "lost connection to server"),
        Err(error) => warn!(?error, "server relay task failed"),
    }
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
