//! Command Line Interface (CLI) arguments.

use clap::{Parser, Subcommand};

/// Marker graph store inspection
#[derive(Clone, Debug, Parser)]
#[command(version, about)]
pub struct CommandLineArgs {
    /// Path to the sled database holding marker records
    #[arg(
        long,
        default_value = "~/.local/share/marker-graph/store",
        env = "MARKER_GRAPH_STORE"
    )]
    pub store: String,
    #[command(subcommand)]
    pub command: Command,
}

/// Store inspection commands
#[derive(Clone, Debug, PartialEq, Subcommand)]
pub enum Command {
    /// List every title in the store
    List,
    /// Print the record stored under a title as JSON
    Show {
        /// Title of the record, e.g. marker_graph/marker/RatioMarker/default
        title: String,
    },
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_with_store() {
        let args = CommandLineArgs::try_parse_from([
            "marker-graph",
            "--store",
            "/tmp/store",
            "show",
            "marker_graph/marker/RatioMarker/default",
        ])
        .unwrap();
        assert_eq!("/tmp/store", args.store);
        assert_eq!(
            Command::Show {
                title: "marker_graph/marker/RatioMarker/default".to_string()
            },
            args.command
        );
    }

    #[test]
    fn missing_command() {
        assert!(CommandLineArgs::try_parse_from(["marker-graph"]).is_err());
    }
}
