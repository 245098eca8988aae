//! Command dispatch: bridges CLI args -> engine and REST calls -> output formatting.

pub mod bus;
pub mod config_cmd;
pub mod faults;
pub mod plcs;
pub mod tags;
pub mod util;
pub mod watch;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

use self::util::Session;

/// Dispatch a backend-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, session: &Session, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Faults(args) => faults::handle(session, args, global).await,
        Command::Tags(args) => tags::handle(session, args, global).await,
        Command::Plcs(args) => plcs::handle(session, args, global).await,
        Command::Watch(args) => watch::handle(session, args, global).await,
        Command::Bus(args) => bus::handle(session, args, global).await,
        // Config and Completions never need a session
        Command::Config(_) | Command::Completions(_) => Err(CliError::Validation {
            field: "command".into(),
            reason: "handled without a backend session".into(),
        }),
    }
}
