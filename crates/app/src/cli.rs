use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::engagement::{self, EngagementConfig, ServeCliArgs};

/// Live engagement detection from a camera feed.
#[derive(Debug, Parser)]
#[command(name = "engagement", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Capture, classify and stream video plus stats over HTTP.
    Serve(ServeCliArgs),
    /// Print the classes, feature count and tree count of a classifier export.
    InspectClassifier {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
}

pub fn run() -> Result<()> {
    match Cli::parse().command {
        Command::Serve(args) => engagement::run(EngagementConfig::try_from(args)?),
        Command::InspectClassifier { path } => engagement::inspect_classifier(&path),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_both_subcommands() {
        let cli = Cli::try_parse_from(["engagement", "serve", "--classifier", "f.json", "--hud"])
            .unwrap();
        assert!(matches!(cli.command, Command::Serve(ref args) if args.hud));

        let cli = Cli::try_parse_from(["engagement", "inspect-classifier", "f.json"]).unwrap();
        assert!(
            matches!(cli.command, Command::InspectClassifier { ref path } if path.ends_with("f.json"))
        );
    }
}
