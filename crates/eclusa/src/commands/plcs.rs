//! Controller command handlers.

use tabled::Tabled;

use eclusa_core::Plc;

use crate::cli::{GlobalOpts, PlcsArgs, PlcsCommand};
use crate::error::CliError;
use crate::output;

use super::util::Session;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
pub(crate) struct PlcRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Enabled")]
    enabled: &'static str,
    #[tabled(rename = "Connected")]
    connected: &'static str,
    #[tabled(rename = "Last error")]
    last_error: String,
    #[tabled(rename = "Last read")]
    last_read: String,
}

impl From<&Plc> for PlcRow {
    fn from(p: &Plc) -> Self {
        Self {
            id: p.id.to_string(),
            name: p.name.clone(),
            address: output::cell(p.address.as_deref()),
            enabled: if p.enabled { "yes" } else { "no" },
            connected: if p.status.connected { "yes" } else { "NO" },
            last_error: output::cell(p.status.last_error.as_deref()),
            last_read: output::cell(p.status.last_read_at.as_ref().map(|t| t.as_str())),
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(session: &Session, args: PlcsArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        PlcsCommand::List => {
            let plcs: Vec<Plc> = session
                .api
                .list_plcs()
                .await?
                .into_iter()
                .map(Plc::from)
                .collect();
            let out = output::render_list(
                global.output,
                &plcs,
                |p| PlcRow::from(p),
                |p| p.id.to_string(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}
