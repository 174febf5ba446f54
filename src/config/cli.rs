use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "quota-gauge")]
#[command(about = "Report aggregate mailbox quota usage for a mail domain")]
pub struct CliConfig {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "quota-gauge.toml")]
    pub config: String,

    /// Only run the instance configured for this domain
    #[arg(long)]
    pub domain: Option<String>,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Print each cycle outcome as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Validate configuration and show resolved instances without contacting the server
    #[arg(long)]
    pub dry_run: bool,
}
