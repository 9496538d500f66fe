//! In-process stand-ins for the iLO shell and sensor API

use crate::config::SessionConfig;
use crate::cpu_temp::{TemperatureSnapshot, TemperatureSource};
use crate::errors::{FanControlError, Result, SessionError};
use crate::session::{SessionChannel, ShellTransport, EXIT_COMMAND};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub(crate) type DuplexChannel = SessionChannel<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

/// What the fake shell saw during one session
#[derive(Debug, Default)]
pub(crate) struct Transcript {
    pub received: Vec<String>,
    /// A line arrived before the shell printed its next prompt
    pub early_write: bool,
}

/// Scripted iLO CLI: banner, prompt, one prompt per received line
#[derive(Debug, Clone)]
pub(crate) struct FakeShell {
    prompt: String,
    banner: String,
    split_prompt: bool,
    close_after: Option<usize>,
}

impl FakeShell {
    pub fn new(prompt: &str) -> Self {
        Self {
            prompt: format!("{} ", prompt),
            banner: "User:admin logged-in to ILO.(10.0.0.5 / FE80::1)\r\niLO 4 Advanced 2.55\r\n"
                .to_string(),
            split_prompt: false,
            close_after: None,
        }
    }

    pub fn with_banner(mut self, banner: &str) -> Self {
        self.banner = banner.to_string();
        self
    }

    /// Deliver each prompt in two writes
    pub fn with_split_prompt(mut self) -> Self {
        self.split_prompt = true;
        self
    }

    /// Drop the connection right after the n-th received line
    pub fn close_after(mut self, lines: usize) -> Self {
        self.close_after = Some(lines);
        self
    }

    async fn write_prompt(&self, out: &mut WriteHalf<DuplexStream>) -> std::io::Result<()> {
        if self.split_prompt {
            let (head, tail) = self.prompt.split_at(self.prompt.len() / 2);
            out.write_all(head.as_bytes()).await?;
            tokio::task::yield_now().await;
            out.write_all(tail.as_bytes()).await
        } else {
            out.write_all(self.prompt.as_bytes()).await
        }
    }

    pub async fn serve(self, stream: DuplexStream) -> Transcript {
        let (read_half, mut out) = tokio::io::split(stream);
        let mut lines = BufReader::new(read_half).lines();
        let mut transcript = Transcript::default();

        if out.write_all(self.banner.as_bytes()).await.is_err()
            || self.write_prompt(&mut out).await.is_err()
        {
            return transcript;
        }

        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim_end_matches('\r').to_string();
            let is_exit = line == EXIT_COMMAND;
            transcript.received.push(line);

            if is_exit {
                let _ = out.write_all(b"\r\n\r\nCLI session stopped\r\n").await;
                break;
            }
            if Some(transcript.received.len()) == self.close_after {
                break;
            }

            // Nothing may arrive until the next prompt is printed
            if let Ok(Ok(Some(extra))) = timeout(Duration::from_millis(50), lines.next_line()).await
            {
                transcript.early_write = true;
                transcript.received.push(extra);
            }

            let status = b"\r\nstatus=0\r\nstatus_tag=COMMAND COMPLETED\r\n\r\n";
            if out.write_all(status).await.is_err() || self.write_prompt(&mut out).await.is_err() {
                break;
            }
        }

        transcript
    }
}

/// Channel wired to a fake shell running on its own task
pub(crate) fn duplex_channel(shell: FakeShell) -> (DuplexChannel, JoinHandle<Transcript>) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let handle = tokio::spawn(shell.serve(server));
    let (read_half, write_half) = tokio::io::split(client);
    let channel = SessionChannel::new(read_half, write_half, &SessionConfig::default());
    (channel, handle)
}

/// Hands out one scripted shell per `open`, refusing once they run out
#[derive(Default)]
pub(crate) struct FakeTransport {
    shells: Mutex<VecDeque<FakeShell>>,
    sessions: Mutex<Vec<JoinHandle<Transcript>>>,
}

impl FakeTransport {
    pub fn new(shells: Vec<FakeShell>) -> Self {
        Self {
            shells: Mutex::new(shells.into()),
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn opened(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub async fn transcripts(&self) -> Vec<Transcript> {
        let handles: Vec<_> = self.sessions.lock().unwrap().drain(..).collect();
        let mut transcripts = Vec::new();
        for handle in handles {
            transcripts.push(handle.await.unwrap());
        }
        transcripts
    }
}

impl ShellTransport for FakeTransport {
    type Reader = ReadHalf<DuplexStream>;
    type Writer = WriteHalf<DuplexStream>;

    async fn open(&self) -> std::result::Result<DuplexChannel, SessionError> {
        let shell = self.shells.lock().unwrap().pop_front();
        let Some(shell) = shell else {
            return Err(SessionError::Spawn(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "no fake shell left",
            )));
        };
        let (channel, handle) = duplex_channel(shell);
        self.sessions.lock().unwrap().push(handle);
        Ok(channel)
    }
}

/// Returns queued readings in order, then reports the sensor as down
#[derive(Default)]
pub(crate) struct FakeSource {
    readings: Mutex<VecDeque<Result<TemperatureSnapshot>>>,
}

impl FakeSource {
    pub fn new(readings: Vec<Result<TemperatureSnapshot>>) -> Self {
        Self {
            readings: Mutex::new(readings.into()),
        }
    }
}

impl TemperatureSource for FakeSource {
    async fn read_temperatures(&self) -> Result<TemperatureSnapshot> {
        self.readings.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(FanControlError::SensorUnavailable(
                "no more fake readings".to_string(),
            ))
        })
    }
}
