//! Store inspection commands run by the marker-graph binary.

use serde_json::Value;
use std::io::Write;
use tracing::debug;

use crate::cli::{Command, CommandLineArgs};
use crate::error::MarkerError;
use crate::store::{SledStore, Store};
use crate::title::Title;

/// Open the store named on the command line, expanding `~`.
pub fn open_store(args: &CommandLineArgs) -> Result<SledStore, MarkerError> {
    let path = expanduser::expanduser(&args.store)?;
    SledStore::open(path)
}

/// Run the command given on the command line.
pub fn run(args: &CommandLineArgs) -> Result<(), MarkerError> {
    let store = open_store(args)?;
    let stdout = std::io::stdout();
    run_command(&store, &args.command, &mut stdout.lock())
}

/// Run `command` against `store`, writing its output to `out`.
pub fn run_command(
    store: &dyn Store,
    command: &Command,
    out: &mut dyn Write,
) -> Result<(), MarkerError> {
    debug!(?command, "running command");
    match command {
        Command::List => {
            for title in store.titles()? {
                writeln!(out, "{}", title)?;
            }
        }
        Command::Show { title } => {
            let title: Title = title.parse()?;
            writeln!(out, "{}", show(store, &title)?)?;
        }
    }
    Ok(())
}

/// Pretty JSON of the record stored at `title`.
pub fn show(store: &dyn Store, title: &Title) -> Result<String, MarkerError> {
    let blob = store.get(title)?.ok_or_else(|| MarkerError::NotFound {
        title: title.clone(),
    })?;
    let record: Value = serde_json::from_slice(&blob)?;
    Ok(serde_json::to_string_pretty(&record)?)
}
