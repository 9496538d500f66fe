//! Daemon implementation: the periodic read, plan, apply loop

use crate::{
    config::FanControlConfig,
    cpu_temp::{TemperatureReader, TemperatureSource},
    errors::{FanControlError, Result, SessionError},
    fan::CommandPlanner,
    session::{ShellTransport, SshTransport},
};
use log::{debug, error, info, warn};
use std::future::Future;
use tokio::time::{sleep, Duration};

/// Result of one control cycle
#[derive(Debug)]
pub enum CycleOutcome {
    /// No CPU produced a command, so no session was opened
    Idle,
    /// Every planned command was acknowledged by the shell
    Applied { commands: usize },
    /// The session failed after some commands were written
    Partial {
        sent: usize,
        total: usize,
        cause: SessionError,
    },
    /// Nothing was applied this cycle
    Failed(FanControlError),
}

/// Single-threaded control loop over one sensor source and one shell transport.
///
/// Cycles never overlap: the next one starts `period` after the previous one
/// returned. Errors end the current cycle only.
pub struct ControlLoop<S, T> {
    source: S,
    transport: T,
    planner: CommandPlanner,
    period: Duration,
    cycles: u64,
}

impl<S, T> ControlLoop<S, T>
where
    S: TemperatureSource,
    T: ShellTransport,
{
    pub fn new(source: S, transport: T, planner: CommandPlanner, period: Duration) -> Self {
        Self {
            source,
            transport,
            planner,
            period,
            cycles: 0,
        }
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Read temperatures, plan, and push the commands through a fresh session
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.cycles += 1;
        let cycle = self.cycles;

        let outcome = self.apply().await;
        match &outcome {
            CycleOutcome::Idle => info!("cycle {}: no fan commands planned", cycle),
            CycleOutcome::Applied { commands } => {
                info!("cycle {}: applied {} fan commands", cycle, commands)
            }
            CycleOutcome::Partial { sent, total, cause } => warn!(
                "cycle {}: partial, {}/{} fan commands sent before session failed: {}",
                cycle, sent, total, cause
            ),
            CycleOutcome::Failed(e) => {
                error!("cycle {}: failed in {} stage: {}", cycle, e.stage(), e)
            }
        }
        outcome
    }

    async fn apply(&mut self) -> CycleOutcome {
        let snapshot = match self.source.read_temperatures().await {
            Ok(snapshot) => snapshot,
            Err(e) => return CycleOutcome::Failed(e),
        };
        info!("CPU temperatures: {}", snapshot);

        let commands = self.planner.plan(&snapshot);
        if commands.is_empty() {
            return CycleOutcome::Idle;
        }
        let lines: Vec<String> = commands.iter().map(ToString::to_string).collect();

        let mut channel = match self.transport.open().await {
            Ok(channel) => channel,
            Err(e) => return CycleOutcome::Failed(e.into()),
        };

        match channel.execute(&lines).await {
            Ok(()) => CycleOutcome::Applied {
                commands: lines.len(),
            },
            Err(cause) if channel.commands_sent() > 0 => CycleOutcome::Partial {
                sent: channel.commands_sent(),
                total: lines.len(),
                cause,
            },
            Err(cause) => CycleOutcome::Failed(cause.into()),
        }
    }

    /// Run cycles until `shutdown` resolves; returns the number of cycles started.
    ///
    /// Shutdown interrupts an in-flight cycle as well as the sleep between
    /// cycles. Dropping the cycle drops its session, which kills the child.
    pub async fn run<F>(mut self, shutdown: F) -> u64
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = self.run_cycle() => {}
            }

            debug!("Sleeping {:?} until next cycle", self.period);
            tokio::select! {
                _ = &mut shutdown => break,
                _ = sleep(self.period) => {}
            }
        }

        info!("Shutdown requested after {} cycles", self.cycles);
        self.cycles
    }
}

/// Main daemon structure
pub struct FanControlDaemon {
    control: ControlLoop<TemperatureReader, SshTransport>,
}

impl FanControlDaemon {
    /// Build the daemon from a validated configuration
    pub fn new(config: &FanControlConfig) -> Result<Self> {
        let planner = config.planner()?;
        let reader = TemperatureReader::from_config(config)?;
        let transport = SshTransport::from_config(config);

        info!(
            "Controlling {} from {} every {}s",
            config.host,
            reader.url(),
            config.run_period_seconds
        );

        Ok(Self {
            control: ControlLoop::new(reader, transport, planner, config.run_period()),
        })
    }

    /// Run until SIGINT or SIGTERM
    pub async fn run(self) -> Result<()> {
        info!("Starting fan control daemon");
        self.control.run(shutdown_signal()).await;
        info!("Fan control daemon stopped");
        Ok(())
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
