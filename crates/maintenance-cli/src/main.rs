// Maintenance CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json/yaml output formats for scripting.
// Design Decision: Use reqwest for HTTP client (already in workspace).

mod client;
mod commands;
mod output;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "maintenance")]
#[command(about = "Maintenance CLI - drive maintenance operations against the control plane")]
#[command(version)]
pub struct Cli {
    /// maintenance-api base URL
    #[arg(long, env = "MAINTENANCE_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json", "yaml"])]
    pub output: String,

    /// Suppress non-essential output
    #[arg(long, short)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create, inspect and drive maintenance operations
    Operations {
        #[command(subcommand)]
        command: commands::operations::OperationsCommand,
    },

    /// Run a scenario entirely in-process against a seeded mock provider, no API server required
    Demo {
        #[command(subcommand)]
        command: commands::demo::DemoCommand,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let output_format = output::OutputFormat::from_str(&cli.output);

    match cli.command {
        Commands::Operations { command } => {
            let client = client::Client::new(&cli.api_url);
            commands::operations::run(command, &client, output_format, cli.quiet).await
        }
        Commands::Demo { command } => commands::demo::run(command, output_format).await,
    }
}
