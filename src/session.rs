//! Interactive iLO management shell session
//!
//! The iLO4 SSH shell is line oriented and has no framing beyond its prompt.
//! [`SessionChannel`] waits for the prompt before every line it writes, so
//! commands are strictly serialized: command N+1 is never written until the
//! prompt following command N has been read.

use crate::config::{FanControlConfig, SessionConfig};
use crate::errors::SessionError;
use log::{debug, trace, warn};
use std::fmt;
use std::future::Future;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;

/// Line sent after the last command to end the session
pub const EXIT_COMMAND: &str = "exit";

/// Key exchange, host key and cipher lists accepted by iLO4 firmware
const LEGACY_KEX: &str =
    "+diffie-hellman-group-exchange-sha1,diffie-hellman-group14-sha1,diffie-hellman-group1-sha1";
const LEGACY_HOST_KEY: &str = "+ssh-rsa";
const LEGACY_CIPHERS: &str = "+aes128-cbc,3des-cbc,aes192-cbc,aes256-cbc";

const READ_CHUNK: usize = 1024;

/// Incremental search for the prompt marker in an unframed byte stream.
///
/// Holds at most `marker.len() - 1` unmatched bytes: anything older can no
/// longer be the start of a marker split across reads.
#[derive(Debug)]
pub struct PromptScanner {
    marker: Vec<u8>,
    buffer: Vec<u8>,
}

impl PromptScanner {
    pub fn new(marker: &str) -> Self {
        Self {
            marker: marker.as_bytes().to_vec(),
            buffer: Vec::with_capacity(READ_CHUNK + marker.len()),
        }
    }

    /// Feed newly read bytes. Returns true once the marker has been seen,
    /// discarding everything buffered up to that point.
    pub fn feed(&mut self, chunk: &[u8]) -> bool {
        self.buffer.extend_from_slice(chunk);

        if self.marker.is_empty()
            || self
                .buffer
                .windows(self.marker.len())
                .any(|w| w == self.marker.as_slice())
        {
            self.buffer.clear();
            return true;
        }

        let keep = self.marker.len() - 1;
        if self.buffer.len() > keep {
            let excess = self.buffer.len() - keep;
            self.buffer.drain(..excess);
        }
        false
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// One interactive shell connection, driven prompt by prompt
pub struct SessionChannel<R, W> {
    reader: R,
    writer: W,
    child: Option<Child>,
    scanner: PromptScanner,
    prompt: String,
    first_prompt_timeout: Duration,
    prompt_timeout: Duration,
    exit_timeout: Duration,
    prompts_seen: usize,
    sent: usize,
}

impl<R, W> SessionChannel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W, settings: &SessionConfig) -> Self {
        Self {
            reader,
            writer,
            child: None,
            scanner: PromptScanner::new(&settings.prompt),
            prompt: settings.prompt.clone(),
            first_prompt_timeout: settings.prompt_timeout()
                + Duration::from_secs(settings.connect_timeout_seconds),
            prompt_timeout: settings.prompt_timeout(),
            exit_timeout: settings.exit_timeout(),
            prompts_seen: 0,
            sent: 0,
        }
    }

    /// Attach the process behind the streams so `execute` can reap it
    pub fn with_child(mut self, child: Child) -> Self {
        self.child = Some(child);
        self
    }

    /// Number of commands written so far, not counting the exit line
    pub fn commands_sent(&self) -> usize {
        self.sent
    }

    /// Run every command in order, then exit the shell.
    ///
    /// On error the remaining commands are not sent; commands already
    /// written stay applied on the remote side.
    pub async fn execute<S: AsRef<str>>(&mut self, commands: &[S]) -> Result<(), SessionError> {
        for command in commands {
            self.wait_for_prompt().await?;
            self.send_line(command.as_ref()).await?;
            self.sent += 1;
        }

        // The last command has finished once its prompt comes back.
        self.wait_for_prompt().await?;
        self.send_line(EXIT_COMMAND).await?;
        self.close().await
    }

    async fn wait_for_prompt(&mut self) -> Result<(), SessionError> {
        let limit = if self.prompts_seen == 0 {
            self.first_prompt_timeout
        } else {
            self.prompt_timeout
        };

        match timeout(limit, self.read_until_prompt()).await {
            Ok(result) => {
                result?;
                self.prompts_seen += 1;
                Ok(())
            }
            Err(_) => Err(SessionError::Timeout {
                waited: limit,
                waiting_for: "prompt",
            }),
        }
    }

    async fn read_until_prompt(&mut self) -> Result<(), SessionError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                return Err(SessionError::Closed {
                    prompt: self.prompt.clone(),
                });
            }
            trace!("<- {:?}", String::from_utf8_lossy(&chunk[..n]));
            if self.scanner.feed(&chunk[..n]) {
                return Ok(());
            }
        }
    }

    async fn send_line(&mut self, line: &str) -> Result<(), SessionError> {
        debug!("-> {}", line);
        let limit = self.prompt_timeout;
        let writer = &mut self.writer;
        let write = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        };
        match timeout(limit, write).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SessionError::Timeout {
                waited: limit,
                waiting_for: "write",
            }),
        }
    }

    /// Close our side, drain the farewell output and reap the process.
    ///
    /// Only reached after every command was acknowledged, so a shell that
    /// lingers past `exit_timeout` is killed and logged rather than failing.
    async fn close(&mut self) -> Result<(), SessionError> {
        let limit = self.exit_timeout;
        let (reader, writer, child) = (&mut self.reader, &mut self.writer, &mut self.child);
        let finish = async {
            // The shell may already have hung up after `exit`
            if let Err(e) = writer.shutdown().await {
                debug!("Closing session input: {}", e);
            }

            let mut sink = [0u8; READ_CHUNK];
            while reader.read(&mut sink).await? > 0 {}

            if let Some(child) = child.as_mut() {
                let status = child.wait().await?;
                if !status.success() {
                    warn!("Session process exited with {}", status);
                }
            }
            Ok::<(), SessionError>(())
        };

        match timeout(limit, finish).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Session did not close within {:?} after exit", limit);
                if let Some(child) = self.child.as_mut() {
                    if let Err(e) = child.start_kill() {
                        debug!("Killing session process: {}", e);
                    }
                }
                Ok(())
            }
        }
    }
}

/// Opens a fresh [`SessionChannel`] for each control cycle
pub trait ShellTransport {
    type Reader: AsyncRead + Unpin + Send;
    type Writer: AsyncWrite + Unpin + Send;

    fn open(
        &self,
    ) -> impl Future<Output = Result<SessionChannel<Self::Reader, Self::Writer>, SessionError>> + Send;
}

/// Reaches the iLO shell by spawning `sshpass -e ssh`
#[derive(Clone)]
pub struct SshTransport {
    host: String,
    user: String,
    password: String,
    verify_host_key: bool,
    settings: SessionConfig,
}

impl fmt::Debug for SshTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshTransport")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("verify_host_key", &self.verify_host_key)
            .field("settings", &self.settings)
            .finish()
    }
}

impl SshTransport {
    pub fn from_config(config: &FanControlConfig) -> Self {
        if !config.verify_host_key {
            warn!(
                "SSH host key checking is disabled for {} (verify_host_key = false)",
                config.host
            );
        }

        Self {
            host: config.host.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            verify_host_key: config.verify_host_key,
            settings: config.session.clone(),
        }
    }

    /// Arguments passed to `ssh`, excluding the password
    pub fn ssh_args(&self) -> Vec<String> {
        let mut args = vec!["-tt".to_string()];

        let mut option = |value: String| {
            args.push("-o".to_string());
            args.push(value);
        };
        if self.verify_host_key {
            option("StrictHostKeyChecking=yes".to_string());
        } else {
            option("StrictHostKeyChecking=no".to_string());
            option("UserKnownHostsFile=/dev/null".to_string());
        }
        option(format!("ConnectTimeout={}", self.settings.connect_timeout_seconds));
        option(format!("KexAlgorithms={}", LEGACY_KEX));
        option(format!("HostKeyAlgorithms={}", LEGACY_HOST_KEY));
        option(format!("Ciphers={}", LEGACY_CIPHERS));

        if self.settings.port != 22 {
            args.push("-p".to_string());
            args.push(self.settings.port.to_string());
        }
        args.push(format!("{}@{}", self.user, self.host));
        args
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("sshpass");
        // -e reads the password from SSHPASS so it never shows up in ps
        cmd.arg("-e")
            .arg("ssh")
            .args(self.ssh_args())
            .env("SSHPASS", &self.password)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

impl ShellTransport for SshTransport {
    type Reader = ChildStdout;
    type Writer = ChildStdin;

    async fn open(&self) -> Result<SessionChannel<ChildStdout, ChildStdin>, SessionError> {
        debug!("Opening SSH session to {}@{}", self.user, self.host);
        let mut child = self.command().spawn().map_err(SessionError::Spawn)?;

        let stdin = child.stdin.take().ok_or_else(|| {
            SessionError::Spawn(std::io::Error::new(
                std::io::ErrorKind::Other,
                "stdin was not captured",
            ))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            SessionError::Spawn(std::io::Error::new(
                std::io::ErrorKind::Other,
                "stdout was not captured",
            ))
        })?;

        Ok(SessionChannel::new(stdout, stdin, &self.settings).with_child(child))
    }
}
