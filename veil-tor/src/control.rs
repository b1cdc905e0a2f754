//! Tor ControlPort client
//!
//! Speaks just enough of the control protocol to request a new circuit:
//! `AUTHENTICATE`, `SIGNAL NEWNYM`, `QUIT`.

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::DEFAULT_CONTROL_ADDR;

/// How to authenticate against the ControlPort
#[derive(Clone, Default, PartialEq, Eq)]
pub enum ControlAuth {
    /// No authentication configured (`AUTHENTICATE` with no argument)
    #[default]
    None,
    /// `HashedControlPassword`
    Password(String),
    /// `CookieAuthentication`, reading the cookie from this file
    Cookie(PathBuf),
}

impl fmt::Debug for ControlAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlAuth::None => write!(f, "None"),
            ControlAuth::Password(_) => write!(f, "Password(<redacted>)"),
            ControlAuth::Cookie(path) => f.debug_tuple("Cookie").field(path).finish(),
        }
    }
}

/// ControlPort connection settings
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// `host:port` of the ControlPort
    pub addr: String,
    pub auth: ControlAuth,
    /// Applied to the connect and to every reply
    pub timeout: Duration,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_CONTROL_ADDR.to_string(),
            auth: ControlAuth::None,
            timeout: Duration::from_secs(10),
        }
    }
}

impl ControlConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_addr(mut self, addr: &str) -> Self {
        self.addr = addr.to_string();
        self
    }

    pub fn with_auth(mut self, auth: ControlAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Errors from the ControlPort
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Failed to connect to control port {addr}: {message}")]
    Connect { addr: String, message: String },

    #[error("Control port I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Control port timed out after {0:?}")]
    Timeout(Duration),

    #[error("Authentication rejected: {0}")]
    Authentication(String),

    #[error("Command {command} rejected: {reply}")]
    Rejected { command: String, reply: String },

    #[error("Failed to read auth cookie {path:?}: {message}")]
    Cookie { path: PathBuf, message: String },

    #[error("Malformed reply line: {0:?}")]
    Malformed(String),

    #[error("Control port closed the connection")]
    Closed,
}

/// A complete control protocol reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    pub fn is_ok(&self) -> bool {
        self.code == 250
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.lines.join(" | "))
    }
}

/// Anything that can hand the process a fresh circuit
#[async_trait]
pub trait CircuitControl: Send + Sync {
    /// Authenticate and signal for a new identity
    async fn request_new_circuit(&self) -> Result<(), ControlError>;
}

/// ControlPort client over TCP
#[derive(Debug, Clone)]
pub struct TorController {
    config: ControlConfig,
}

impl TorController {
    pub fn new(config: ControlConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    async fn connect(&self) -> Result<TcpStream, ControlError> {
        timeout(self.config.timeout, TcpStream::connect(&self.config.addr))
            .await
            .map_err(|_| ControlError::Timeout(self.config.timeout))?
            .map_err(|e| ControlError::Connect {
                addr: self.config.addr.clone(),
                message: e.to_string(),
            })
    }

    async fn authenticate_command(&self) -> Result<String, ControlError> {
        match &self.config.auth {
            ControlAuth::None => Ok("AUTHENTICATE".to_string()),
            ControlAuth::Password(password) => Ok(format!("AUTHENTICATE {}", quote(password))),
            ControlAuth::Cookie(path) => {
                let cookie = tokio::fs::read(path).await.map_err(|e| ControlError::Cookie {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
                Ok(format!("AUTHENTICATE {}", hex_upper(&cookie)))
            }
        }
    }

    async fn command<R, W>(&self, reader: &mut R, writer: &mut W, line: &str) -> Result<Reply, ControlError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\r\n").await?;
        writer.flush().await?;

        let reply = timeout(self.config.timeout, read_reply(reader))
            .await
            .map_err(|_| ControlError::Timeout(self.config.timeout))??;

        let verb = line.split_whitespace().next().unwrap_or_default();
        debug!("Control port {} -> {}", verb, reply);

        if !reply.is_ok() {
            return Err(ControlError::Rejected {
                command: verb.to_string(),
                reply: reply.to_string(),
            });
        }
        Ok(reply)
    }
}

#[async_trait]
impl CircuitControl for TorController {
    async fn request_new_circuit(&self) -> Result<(), ControlError> {
        let stream = self.connect().await?;
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let auth = self.authenticate_command().await?;
        self.command(&mut reader, &mut writer, &auth)
            .await
            .map_err(|e| match e {
                ControlError::Rejected { reply, .. } => ControlError::Authentication(reply),
                other => other,
            })?;

        self.command(&mut reader, &mut writer, "SIGNAL NEWNYM").await?;

        // Tor answers QUIT with "250 closing connection"; nothing left to do if it doesn't.
        if let Err(e) = self.command(&mut reader, &mut writer, "QUIT").await {
            debug!("QUIT not acknowledged: {}", e);
        }

        Ok(())
    }
}

/// Read one reply: `NNN-` and `NNN+` lines continue, `NNN ` ends it
pub async fn read_reply<R>(reader: &mut R) -> Result<Reply, ControlError>
where
    R: AsyncBufRead + Unpin,
{
    let mut code = None;
    let mut lines = Vec::new();

    loop {
        let line = next_line(reader).await?;
        let (status, sep, rest) = match (line.get(..3), line.get(3..4), line.get(4..)) {
            (Some(status), Some(sep), Some(rest)) => match status.parse::<u16>() {
                Ok(status) => (status, sep.to_string(), rest.to_string()),
                Err(_) => return Err(ControlError::Malformed(line.clone())),
            },
            _ => return Err(ControlError::Malformed(line.clone())),
        };
        let reply_code = *code.get_or_insert(status);
        lines.push(rest);

        match sep.as_str() {
            " " => {
                return Ok(Reply {
                    code: reply_code,
                    lines,
                })
            }
            "-" => continue,
            "+" => loop {
                // Data block, terminated by a lone "."
                let data = next_line(reader).await?;
                if data == "." {
                    break;
                }
                lines.push(data);
            },
            _ => return Err(ControlError::Malformed(line)),
        }
    }
}

async fn next_line<R>(reader: &mut R) -> Result<String, ControlError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(ControlError::Closed);
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Quote a string argument per the control protocol
fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

fn hex_upper(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}
