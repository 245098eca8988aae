//! Fault command handlers.

use tabled::Tabled;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use eclusa_core::{Engine, FaultId, FaultNotification, FaultReconciler, FaultRecord, ViewMode};

use crate::cli::{FaultsArgs, FaultsCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util::Session;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
pub(crate) struct FaultRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "State")]
    state: &'static str,
    #[tabled(rename = "Ack")]
    ack: &'static str,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Lock")]
    eclusa: String,
    #[tabled(rename = "Subsystem")]
    subsystem: String,
    #[tabled(rename = "Description")]
    description: String,
    #[tabled(rename = "Since")]
    since: String,
}

impl From<&FaultRecord> for FaultRow {
    fn from(f: &FaultRecord) -> Self {
        Self {
            id: f.id.to_string(),
            state: if f.active { "ACTIVE" } else { "cleared" },
            ack: if f.acknowledged { "yes" } else { "-" },
            kind: f.kind.to_string(),
            eclusa: output::cell(f.eclusa.as_deref()),
            subsystem: output::cell(f.subsystem.as_deref()),
            description: output::cell(f.description.as_deref()),
            since: output::cell(f.started_at.as_ref().map(|t| t.as_str())),
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    session: &Session,
    args: FaultsArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        FaultsCommand::List { all } => {
            let faults: Vec<FaultRecord> = session
                .api
                .list_faults(!all)
                .await?
                .into_iter()
                .map(FaultRecord::from)
                .collect();
            let out = output::render_list(
                global.output,
                &faults,
                |f| FaultRow::from(f),
                |f| f.id.to_string(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        FaultsCommand::Ack { id, wait: false } => {
            session.api.acknowledge_fault(id.get()).await?;
            if !global.quiet {
                eprintln!("Acknowledgement sent for fault {id}");
            }
            Ok(())
        }

        FaultsCommand::Ack { id, wait: true } => {
            let notice = acknowledge_and_wait(session, id).await?;
            if !global.quiet {
                eprintln!("{}", notice.message());
            }
            Ok(())
        }
    }
}

/// Acknowledge over REST, then wait for the broadcast that makes it
/// visible to every console.
async fn acknowledge_and_wait(session: &Session, id: FaultId) -> Result<FaultNotification, CliError> {
    let engine = session.engine().await?;
    let seed = session
        .api
        .list_faults(false)
        .await?
        .into_iter()
        .map(FaultRecord::from)
        .collect();
    let faults = FaultReconciler::attach(&engine, ViewMode::All, seed)?;

    let result = acknowledge_on_bus(session, &engine, &faults, id).await;

    faults.dispose();
    engine.dispose().await;
    result
}

async fn acknowledge_on_bus(
    session: &Session,
    engine: &Engine,
    faults: &FaultReconciler,
    id: FaultId,
) -> Result<FaultNotification, CliError> {
    let mut notices = faults.notifications();
    engine.connect().await?;

    let Some(fault) = faults.get(id) else {
        return Err(CliError::NotFound {
            resource_type: "fault".into(),
            identifier: id.to_string(),
            list_command: "faults list --all".into(),
        });
    };
    let quiet_notice = || FaultNotification {
        fault_id: id,
        description: fault.description.clone(),
        user_name: None,
    };
    if fault.acknowledged {
        return Ok(quiet_notice());
    }

    session.api.acknowledge_fault(id.get()).await?;

    let timeout = session.profile.request_timeout();
    let wait = async {
        loop {
            match notices.recv().await {
                Ok(notice) if notice.fault_id == id => return Ok(notice),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "missed fault notices while waiting");
                    if faults.get(id).is_some_and(|f| f.acknowledged) {
                        return Ok(quiet_notice());
                    }
                }
                Err(RecvError::Closed) => {
                    return Err(CliError::Bus {
                        message: "fault notices closed before the acknowledgement arrived".into(),
                    });
                }
            }
        }
    };

    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| CliError::Timeout {
            seconds: timeout.as_secs(),
        })?
}
