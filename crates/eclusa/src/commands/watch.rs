//! Live watch handlers.
//!
//! Each watch attaches a reconciler, connects the bus engine and only then
//! seeds it from the REST snapshot, so no event falls between the two. The
//! view re-renders whenever the collection changes, and is reseeded after
//! every reconnect, until Ctrl-C, `--for` elapses, or (with
//! `--no-reconnect`) the connection drops.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use eclusa_bus::SessionId;
use eclusa_core::{
    CollectionStream, ConnectionState, Engine, FaultNotification, FaultReconciler, FaultRecord,
    Plc, PlcId, StatusReconciler, TagReconciler, ViewMode, tags_from_snapshot,
};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs, WatchCommand};
use crate::error::CliError;
use crate::output;

use super::faults::FaultRow;
use super::plcs::PlcRow;
use super::tags::TagRow;
use super::util::Session;

struct WatchOpts {
    duration: Option<Duration>,
    reconnect: bool,
    format: OutputFormat,
    quiet: bool,
    color: bool,
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(session: &Session, args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let opts = WatchOpts {
        duration: args.duration,
        reconnect: !args.no_reconnect,
        format: global.output.streaming(),
        quiet: global.quiet,
        color: output::should_color(global.color),
    };

    let engine = session.engine().await?;
    let result = match args.command {
        WatchCommand::Faults { all } => watch_faults(session, &engine, all, &opts).await,
        WatchCommand::Tags { plc } => watch_tags(session, &engine, plc, &opts).await,
        WatchCommand::Status => watch_status(session, &engine, &opts).await,
    };

    engine.dispose().await;
    result
}

async fn watch_faults(
    session: &Session,
    engine: &Engine,
    all: bool,
    opts: &WatchOpts,
) -> Result<(), CliError> {
    let mode = if all { ViewMode::All } else { ViewMode::ActiveOnly };
    let faults = FaultReconciler::attach(engine, mode, Vec::new())?;
    let notices = faults.notifications();
    let view = View::Faults { faults: &faults, all };
    start(session, engine, &view, opts).await?;

    follow(session, engine, &view, faults.stream(), Some(notices), opts, "faults", |snap| {
        output::render_list(opts.format, snap, |f| FaultRow::from(&**f), |f| {
            f.id.to_string()
        })
    })
    .await
}

async fn watch_tags(
    session: &Session,
    engine: &Engine,
    plc: PlcId,
    opts: &WatchOpts,
) -> Result<(), CliError> {
    let tags = TagReconciler::attach(engine, plc, Vec::new())?;
    let view = View::Tags { tags: &tags, plc };
    start(session, engine, &view, opts).await?;

    follow(session, engine, &view, tags.stream(), None, opts, "tags", |snap| {
        output::render_list(opts.format, snap, |t| TagRow::from(&**t), |t| {
            format!("{}={}", t.id, output::cell(t.value.as_ref()))
        })
    })
    .await
}

async fn watch_status(session: &Session, engine: &Engine, opts: &WatchOpts) -> Result<(), CliError> {
    // Status subjects are per controller, so the list is needed to subscribe.
    let plcs = StatusReconciler::attach(engine, fetch_plcs(session).await?)?;
    let view = View::Status { plcs: &plcs };
    start(session, engine, &view, opts).await?;

    follow(session, engine, &view, plcs.stream(), None, opts, "controllers", |snap| {
        output::render_list(opts.format, snap, |p| PlcRow::from(&**p), |p| {
            format!("{}={}", p.id, p.status.connected)
        })
    })
    .await
}

async fn fetch_plcs(session: &Session) -> Result<Vec<Plc>, CliError> {
    Ok(session
        .api
        .list_plcs()
        .await?
        .into_iter()
        .map(Plc::from)
        .collect())
}

// ── Resync ──────────────────────────────────────────────────────────

/// The reconciler behind a watch, with what it needs to refetch its seed.
enum View<'a> {
    Faults { faults: &'a FaultReconciler, all: bool },
    Tags { tags: &'a TagReconciler, plc: PlcId },
    Status { plcs: &'a StatusReconciler },
}

impl View<'_> {
    /// Replace the view with a fresh REST snapshot.
    async fn resync(&self, session: &Session) -> Result<bool, CliError> {
        match self {
            Self::Faults { faults, all } => {
                let seed: Vec<FaultRecord> = session
                    .api
                    .list_faults(!all)
                    .await?
                    .into_iter()
                    .map(FaultRecord::from)
                    .collect();
                Ok(faults.reseed(seed))
            }
            Self::Tags { tags, plc } => {
                let seed = tags_from_snapshot(session.api.list_tags(plc.get()).await?);
                Ok(tags.reseed(seed))
            }
            Self::Status { plcs } => Ok(plcs.reseed(fetch_plcs(session).await?)?),
        }
    }
}

/// Spots a new bus session, which means events may have been missed.
#[derive(Debug, Default)]
struct SessionTracker {
    seen: Option<SessionId>,
}

impl SessionTracker {
    fn new(seen: Option<SessionId>) -> Self {
        Self { seen }
    }

    /// True once per session that reaches `Connected`.
    fn observe(&mut self, state: ConnectionState, session: Option<SessionId>) -> bool {
        if state != ConnectionState::Connected || session.is_none() || session == self.seen {
            return false;
        }
        self.seen = session;
        true
    }
}

// ── Watch loop ──────────────────────────────────────────────────────

async fn start(
    session: &Session,
    engine: &Engine,
    view: &View<'_>,
    opts: &WatchOpts,
) -> Result<(), CliError> {
    engine.connect().await?;
    view.resync(session).await?;
    if opts.reconnect {
        engine.spawn_reconnect_supervisor();
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn follow<T, F>(
    session: &Session,
    engine: &Engine,
    view: &View<'_>,
    mut stream: CollectionStream<T>,
    mut notices: Option<broadcast::Receiver<FaultNotification>>,
    opts: &WatchOpts,
    noun: &str,
    render: F,
) -> Result<(), CliError>
where
    T: Send + Sync + 'static,
    F: Fn(&[Arc<T>]) -> Result<String, CliError>,
{
    let mut state = engine.connection_state();
    let mut tracker = SessionTracker::new(engine.connection().session_id());

    let deadline = async {
        match opts.duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    emit(opts, noun, &stream.latest(), &render)?;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                debug!("interrupted");
                break;
            }
            () = &mut deadline => {
                debug!("watch duration elapsed");
                break;
            }
            snapshot = stream.changed() => match snapshot {
                Some(snapshot) => emit(opts, noun, &snapshot, &render)?,
                None => break,
            },
            notice = next_notice(&mut notices) => {
                if !opts.quiet {
                    eprintln!("{}", output::paint_alert(&notice.message(), opts.color));
                }
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                report_state(engine, current, opts);
                if tracker.observe(current, engine.connection().session_id()) {
                    match view.resync(session).await {
                        Ok(changed) => debug!(changed, "view resynced after reconnect"),
                        Err(e) => warn!(error = %e, "resync after reconnect failed, view may be stale"),
                    }
                }
                if current == ConnectionState::Disconnected && !opts.reconnect {
                    return Err(CliError::ConnectionFailed {
                        url: engine.connection().endpoint(),
                        source: engine
                            .last_disconnect()
                            .map_or_else(|| "connection lost".to_owned(), |c| c.to_string())
                            .into(),
                    });
                }
            }
        }
    }
    Ok(())
}

fn emit<T, F>(opts: &WatchOpts, noun: &str, snapshot: &[Arc<T>], render: &F) -> Result<(), CliError>
where
    F: Fn(&[Arc<T>]) -> Result<String, CliError>,
{
    if opts.quiet {
        return Ok(());
    }
    if opts.format == OutputFormat::Table {
        let now = chrono::Local::now().format("%H:%M:%S");
        println!("── {now} · {} {noun} ──", snapshot.len());
    }
    output::print_output(&render(snapshot)?, false);
    Ok(())
}

fn report_state(engine: &Engine, state: ConnectionState, opts: &WatchOpts) {
    if opts.quiet {
        return;
    }
    let label = output::paint_state(state, opts.color);
    match (state, engine.last_disconnect()) {
        (ConnectionState::Disconnected, Some(cause)) => {
            let line = format!("bus {label}: {cause} (data is stale)");
            eprintln!("{}", output::paint_alert(&line, opts.color));
        }
        _ => eprintln!("bus {label}"),
    }
}

/// Next fault notice, or never when there is no notice channel.
async fn next_notice(
    notices: &mut Option<broadcast::Receiver<FaultNotification>>,
) -> FaultNotification {
    let Some(rx) = notices.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(notice) => return notice,
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "missed fault notices"),
            Err(RecvError::Closed) => return std::future::pending().await,
        }
    }
}
