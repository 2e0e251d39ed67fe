use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Port the server binds by default and the client dials by default.
pub const DEFAULT_PORT: u16 = 8042;

/// Keyword that disconnects the sender. Matched against the trimmed line.
pub const QUIT_KEYWORD: &str = "BYE";

/// Keyword that renames the sender. Matched case-sensitively at the start
/// of the line and must be followed by whitespace and a non-empty name.
pub const RENAME_KEYWORD: &str = "NAME";

/// Farewell sent to a client just before the server disconnects it.
pub const GOODBYE: &str = "Goodbye!";

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// One line received from a client, interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// Relay the line to everyone else.
    Chat(&'a str),
    /// Change the sender's display name.
    Rename(&'a str),
    /// Disconnect cleanly.
    Quit,
}

impl<'a> Command<'a> {
    /// Interprets one line (already stripped of line endings).
    ///
    /// Anything that is not an exact quit keyword or a well-formed rename is
    /// a chat message, including a bare `NAME` with no argument.
    pub fn parse(line: &'a str) -> Self {
        if line.trim() == QUIT_KEYWORD {
            return Self::Quit;
        }

        if let Some(rest) = line.strip_prefix(RENAME_KEYWORD) {
            if rest.starts_with(char::is_whitespace) {
                let name = rest.trim();
                if !name.is_empty() {
                    return Self::Rename(name);
                }
            }
        }

        Self::Chat(line)
    }
}

/// Reads one line, stripping the trailing line ending. Returns `None` once
/// the stream reaches end of input.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let bytes = reader.read_line(&mut line).await?;
    if bytes == 0 {
        return Ok(None);
    }

    let stripped = line.trim_end_matches(LINE_ENDINGS).len();
    line.truncate(stripped);
    Ok(Some(line))
}

/// Writes one `\n`-terminated line and flushes so peers get timely updates.
pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    // Encode into one buffer so the line and its delimiter leave together.
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// The three lines greeting a freshly connected client.
pub fn welcome_lines(name: &str) -> [String; 3] {
    [
        "Welcome to chat-relay!".to_string(),
        format!(
            "Your current user name is set to {name}. \
             Please type NAME followed by your desired name to change it."
        ),
        "Type BYE to exit.".to_string(),
    ]
}

/// A relayed chat message as the other participants see it.
pub fn chat_line(name: &str, text: &str) -> String {
    format!("{name}: {text}")
}

pub fn entry_notice(name: &str) -> String {
    format!(">>> {name} has entered.")
}

pub fn departure_notice(name: &str) -> String {
    format!("<<< {name} has left.")
}

/// Confirmation sent to the participant who renamed themselves.
pub fn rename_confirmation(name: &str) -> String {
    format!("*** You are now known as {name}")
}

/// Notice broadcast to everyone else after a rename.
pub fn rename_notice(old_name: &str, new_name: &str) -> String {
    format!("*** {old_name} is now known as {new_name}.")
}
