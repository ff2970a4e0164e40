mod cli;
mod plan_cmd;

use clap::Parser;
use cli::{Cli, Commands, PlanCommand};
use eyre::Result;

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Plan { command } => match command {
            PlanCommand::Hash(args) => plan_cmd::run_hash(&args),
            PlanCommand::Inspect(args) => plan_cmd::run_inspect(&args),
            PlanCommand::Verify(args) => plan_cmd::run_verify(&args),
        },
    }
}
