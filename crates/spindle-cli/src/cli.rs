use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "spindle")]
#[command(about = "Offline tooling for disk-balancer plans")]
#[command(after_help = "Run '<command> --help' for detailed options on each command.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Work with plan files before submitting them to a node
    Plan {
        #[command(subcommand)]
        command: PlanCommand,
    },
}

#[derive(Subcommand)]
pub enum PlanCommand {
    /// Print the plan ID (SHA-512 of the plan text) a node expects
    Hash(PlanFileArgs),
    /// Parse a plan file and summarize its steps
    Inspect(PlanFileArgs),
    /// Run the node's admission checks against a plan file
    Verify(VerifyArgs),
}

#[derive(Args, Clone, Debug)]
pub struct PlanFileArgs {
    /// Path to the plan JSON file
    pub file: PathBuf,
}

#[derive(Args, Clone, Debug)]
pub struct VerifyArgs {
    /// Path to the plan JSON file
    pub file: PathBuf,
    /// Node UUID the plan must target
    #[arg(long)]
    pub node_id: String,
    /// Plan ID to check against; computed from the file when omitted
    #[arg(long)]
    pub plan_id: Option<String>,
    /// Skip the plan-age check, as a forced submission would
    #[arg(long)]
    pub force: bool,
}
