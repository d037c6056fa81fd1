//! TFTP Server - Main executable
//!
//! A standalone TFTP server for bare-metal provisioning: serves boot
//! files out of a root directory and accepts uploads next to them.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;
use tftp::{DEFAULT_BLOCK_SIZE, RetrySchedule, SessionConfig, TftpServer, TftpServerConfig};

const DEFAULT_BIND: &str = "0.0.0.0:6969"; // use 6969 for non-root testing; redirect or run as root for :69
const DEFAULT_ROOT: &str = "./tftp_root";
const DEFAULT_TIMEOUTS: &str = "1,3,7";

#[derive(FromArgs, Debug)]
#[argh(
    description = "TFTP server for bare-metal provisioning",
    example = "Serve the default root on the default port:\n  {command_name}",
    example = "Serve /srv/boot on the well-known port (requires root):\n  {command_name} --bind 0.0.0.0:69 --root /srv/boot",
    example = "Large blocks and a patient retry schedule:\n  {command_name} --block-size 1400 --timeouts 2,4,8,16"
)]
struct CliConfig {
    #[argh(
        option,
        short = 'b',
        description = "server bind address",
        default = "DEFAULT_BIND.to_string()"
    )]
    bind: String,

    #[argh(
        option,
        short = 'r',
        description = "served root directory",
        default = "PathBuf::from(DEFAULT_ROOT)"
    )]
    root: PathBuf,

    #[argh(
        option,
        short = 's',
        description = "data block size in bytes (clamped to 8..=1400)",
        default = "DEFAULT_BLOCK_SIZE"
    )]
    block_size: usize,

    #[argh(
        option,
        short = 't',
        description = "retry waits in seconds, comma separated; the last entry is the final give-up wait",
        default = "DEFAULT_TIMEOUTS.to_string()"
    )]
    timeouts: String,
}

impl CliConfig {
    fn into_server_config(self) -> Result<TftpServerConfig> {
        let waits = self
            .timeouts
            .split(',')
            .map(|s| s.trim().parse::<u64>().map(Duration::from_secs))
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Invalid timeout schedule: {}", self.timeouts))?;
        let schedule = RetrySchedule::new(waits)?;

        Ok(TftpServerConfig {
            bind_address: self.bind,
            root_directory: self.root,
            session: SessionConfig::new(self.block_size, schedule),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli_config: CliConfig = argh::from_env();
    let server_config = cli_config.into_server_config()?;

    TftpServer::new(server_config).run().await
}
