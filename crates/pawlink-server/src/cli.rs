use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "pawlink-server", about = "Pawlink real-time chat gateway")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/pawlink.toml")]
    pub config: String,

    /// Bind address (overrides config)
    #[arg(long)]
    pub bind: Option<String>,
}
