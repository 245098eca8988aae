//! Bus command handlers.

use std::fmt::Write as _;

use serde::Serialize;

use eclusa_core::SubjectCatalog;

use crate::cli::{BusArgs, BusCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util::Session;

#[derive(Debug, Serialize)]
struct BusInfoView {
    url: String,
    discovered: bool,
    subjects: SubjectCatalog,
}

fn detail(info: &BusInfoView) -> String {
    let mut out = String::new();
    let source = if info.discovered { "discovered" } else { "configured" };
    let _ = writeln!(out, "Bus URL:           {} ({source})", info.url);
    let _ = writeln!(out, "Faults:            {}", info.subjects.faults);
    let _ = writeln!(out, "Acknowledgements:  {}", info.subjects.acknowledgements);
    let _ = writeln!(out, "PLC status:        {}.<plcId>", info.subjects.plc_status);
    let _ = write!(out, "Tag updates:       {}.<plcId>", info.subjects.tag_updates);
    out
}

pub async fn handle(session: &Session, args: BusArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        BusCommand::Info => {
            let (url, subjects, discovered) = session.bus_endpoint().await?;
            let view = BusInfoView {
                url: url.to_string(),
                discovered,
                subjects,
            };
            let out = output::render_single(global.output, &view, detail, |v| v.url.clone())?;
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}
