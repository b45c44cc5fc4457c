//! Operational CLI flags that override config-file values. Most settings
//! live in the TOML/env-loaded config; these exist for the handful
//! operators reach for at the command line when bringing a site up.

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "offgrid-dispatch", about = "Off-grid solar + battery dispatch controller")]
pub struct Cli {
    #[arg(long)]
    pub config: Option<std::path::PathBuf>,

    #[arg(long)]
    pub serial_port: Option<String>,

    #[arg(long)]
    pub baud: Option<u32>,

    #[arg(long)]
    pub master_address: Option<u16>,

    #[arg(long)]
    pub api_port: Option<u16>,

    #[arg(long)]
    pub db_host: Option<String>,

    #[arg(long)]
    pub db_port: Option<u16>,

    #[arg(long)]
    pub db_name: Option<String>,

    #[arg(long)]
    pub db_user: Option<String>,

    #[arg(long)]
    pub db_password: Option<String>,

    /// Run with real serial/CAN/GPIO backends disabled, logging every
    /// actuator decision instead of issuing it.
    #[arg(long)]
    pub dry_run: bool,
}
