//! One-shot command handlers

use crate::{
    args::{Commands, ConfigCommands, ConnectionOverrides},
    config::FanControlConfig,
    cpu_temp::{TemperatureReader, TemperatureSource},
    daemon::FanControlDaemon,
    fan::FanCommand,
    session::{ShellTransport, SshTransport},
};
use anyhow::{Context, Result};
use log::{debug, info};
use std::path::Path;

/// Dispatch a parsed command
pub async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Daemon { config } => run_daemon(&config).await,
        Commands::Status { config, overrides } => show_status(&config, overrides).await,
        Commands::Apply { config, fan, duty } => apply_fan(&config, fan, duty).await,
        Commands::Config { command } => match command {
            ConfigCommands::Sample { path, dual } => write_sample(&path, dual),
            ConfigCommands::Validate { path } => validate(&path),
        },
    }
}

fn load(path: &Path) -> Result<FanControlConfig> {
    FanControlConfig::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

async fn run_daemon(path: &Path) -> Result<()> {
    info!("Starting daemon with config path: {}", path.display());
    let config = load(path)?;
    let daemon = FanControlDaemon::new(&config).context("Failed to start daemon")?;
    daemon.run().await?;
    Ok(())
}

/// Apply command line connection settings on top of a loaded configuration
fn apply_overrides(config: &mut FanControlConfig, overrides: ConnectionOverrides) -> Result<()> {
    if let Some(host) = overrides.host {
        config.host = host;
    }
    if let Some(user) = overrides.user {
        config.user = user;
    }
    if let Some(password) = overrides.password {
        config.password = password;
    }
    config.validate().context("Invalid connection override")?;
    Ok(())
}

async fn show_status(path: &Path, overrides: ConnectionOverrides) -> Result<()> {
    let mut config = load(path)?;
    apply_overrides(&mut config, overrides)?;
    let planner = config.planner()?;
    let reader = TemperatureReader::from_config(&config)?;

    info!("Connecting to iLO4 at {}@{}", config.user, config.host);
    let snapshot = reader
        .read_temperatures()
        .await
        .context("Failed to get temperature data")?;

    println!("CPU temperatures:");
    for (cpu, temp) in snapshot.iter() {
        println!("  CPU-{}: {}°C", cpu, temp);
    }

    let commands = planner.plan(&snapshot);
    if commands.is_empty() {
        println!("No fan commands would be sent");
    } else {
        println!("Planned fan commands:");
        for command in commands {
            println!("  {}", command);
        }
    }
    Ok(())
}

async fn apply_fan(path: &Path, fan: u8, duty: u8) -> Result<()> {
    let config = load(path)?;
    let command = FanCommand::new(fan, duty);
    debug!("Applying single command: {}", command);

    send_command(&SshTransport::from_config(&config), command).await?;
    println!("Sent: {}", command);
    Ok(())
}

/// Push a single fan command through a fresh session
async fn send_command<T: ShellTransport>(transport: &T, command: FanCommand) -> Result<()> {
    let mut channel = transport.open().await.context("Failed to open iLO session")?;
    channel
        .execute(&[command.to_string()])
        .await
        .with_context(|| format!("Failed to send '{}'", command))
}

fn write_sample(path: &Path, dual: bool) -> Result<()> {
    let config = FanControlConfig::sample(dual);
    debug!("Generated sample config: {:?}", config);
    config
        .save_to_file(path)
        .with_context(|| format!("Failed to save sample configuration to {}", path.display()))?;
    info!("Sample configuration saved to {}", path.display());
    Ok(())
}

fn validate(path: &Path) -> Result<()> {
    let config = load(path)?;
    let groups = config.fan_group_assignment()?;
    info!(
        "Configuration valid: {} thresholds, {} installed fan groups",
        config.thresholds.len(),
        groups.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeShell, FakeTransport};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_sample_then_validate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ilo.toml");

        handle_command(Commands::Config {
            command: ConfigCommands::Sample {
                path: path.clone(),
                dual: false,
            },
        })
        .await
        .unwrap();

        handle_command(Commands::Config {
            command: ConfigCommands::Validate { path },
        })
        .await
        .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_command_writes_one_line_then_exits() {
        let transport = FakeTransport::new(vec![FakeShell::new("</>hpiLO->")]);
        send_command(&transport, FanCommand::new(2, 120)).await.unwrap();

        let transcripts = transport.transcripts().await;
        assert_eq!(transcripts.len(), 1);
        assert_eq!(transcripts[0].received, vec!["fan p 2 max 120", "exit"]);
        assert!(!transcripts[0].early_write);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_command_reports_connect_failure() {
        let transport = FakeTransport::new(Vec::new());
        let err = send_command(&transport, FanCommand::new(0, 50)).await.unwrap_err();
        assert!(err.to_string().contains("Failed to open iLO session"));
    }

    #[test]
    fn test_overrides_replace_connection_settings() {
        let mut config = FanControlConfig::sample(false);
        apply_overrides(
            &mut config,
            ConnectionOverrides {
                host: Some("10.0.0.9".to_string()),
                user: None,
                password: Some("from-cli".to_string()),
            },
        )
        .unwrap();

        assert_eq!(config.host, "10.0.0.9");
        assert_eq!(config.user, "USERNAME");
        assert_eq!(config.password, "from-cli");
        assert_eq!(config.sensor_url(), "https://10.0.0.9/redfish/v1/Chassis/1/Thermal");
    }

    #[test]
    fn test_empty_host_override_is_rejected() {
        let mut config = FanControlConfig::sample(false);
        let overrides = ConnectionOverrides {
            host: Some(String::new()),
            ..Default::default()
        };
        assert!(apply_overrides(&mut config, overrides).is_err());
    }

    #[tokio::test]
    async fn test_validate_reports_missing_file() {
        let err = handle_command(Commands::Config {
            command: ConfigCommands::Validate {
                path: "/nonexistent/ilo.toml".into(),
            },
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/ilo.toml"));
    }
}
