//! Spool directory monitor
//!
//! Alerts and workflow callbacks are dropped into the spool directory as JSON
//! files tagged with `kind`. Each file is dispatched once and then moved to
//! `processed/` or `failed/`. Producers should write `*.tmp` and rename to
//! `*.json` so a half-written file is never picked up.

use bridge_core::{BroadcastEngine, MessageRouter, WorkflowCallback};
use bridge_types::{Alert, FlowiseCallback, N8nCallback, WorkflowVariant};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub const PROCESSED_DIR_NAME: &str = "processed";
pub const FAILED_DIR_NAME: &str = "failed";

/// One spooled unit of work
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpoolItem {
    Alert(Alert),
    N8nCallback(N8nCallback),
    FlowiseCallback(FlowiseCallback),
}

pub struct SpoolDirs {
    pub inbox: PathBuf,
    pub processed: PathBuf,
    pub failed: PathBuf,
}

impl SpoolDirs {
    pub fn create<P: AsRef<Path>>(root: P) -> std::io::Result<Self> {
        let inbox = root.as_ref().to_path_buf();
        let dirs = Self {
            processed: inbox.join(PROCESSED_DIR_NAME),
            failed: inbox.join(FAILED_DIR_NAME),
            inbox,
        };

        std::fs::create_dir_all(&dirs.processed)?;
        std::fs::create_dir_all(&dirs.failed)?;
        Ok(dirs)
    }
}

pub struct SpoolDispatcher {
    router: Arc<MessageRouter>,
    broadcast: Arc<BroadcastEngine>,
}

impl SpoolDispatcher {
    pub fn new(router: Arc<MessageRouter>, broadcast: Arc<BroadcastEngine>) -> Self {
        Self { router, broadcast }
    }

    async fn dispatch(&self, item: SpoolItem) -> Result<String, BoxError> {
        match item {
            SpoolItem::Alert(alert) => {
                let result = self.broadcast.broadcast(&alert).await?;
                Ok(format!(
                    "alert {} sent to {}/{} recipients",
                    result.ticker, result.recipients_notified, result.recipients_targeted
                ))
            }
            SpoolItem::N8nCallback(callback) => {
                let callback = WorkflowCallback::from(callback);
                let address = callback.recipient_address.clone();
                self.router.handle_callback(WorkflowVariant::N8n, callback).await?;
                Ok(format!("n8n reply delivered to {}", address))
            }
            SpoolItem::FlowiseCallback(callback) => {
                let callback = WorkflowCallback::from(callback);
                let address = callback.recipient_address.clone();
                self.router
                    .handle_callback(WorkflowVariant::Flowise, callback)
                    .await?;
                Ok(format!("Flowise reply delivered to {}", address))
            }
        }
    }

    /// Dispatch one spool file and move it out of the inbox
    pub async fn process_file(&self, dirs: &SpoolDirs, path: &Path) -> Result<(), BoxError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or("Invalid file name")?
            .to_string();

        log::info!("Processing spool file: {}", file_name);

        let outcome = match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<SpoolItem>(&content) {
                Ok(item) => self.dispatch(item).await,
                Err(e) => Err(format!("Failed to parse spool item: {}", e).into()),
            },
            Err(e) => Err(e.into()),
        };

        let destination_dir = match &outcome {
            Ok(summary) => {
                log::info!("{}: {}", file_name, summary);
                &dirs.processed
            }
            Err(e) => {
                log::error!("{} failed: {}", file_name, e);
                &dirs.failed
            }
        };

        std::fs::rename(path, destination_dir.join(&file_name))?;
        log::debug!(
            "Moved spool file to {}: {}",
            if outcome.is_ok() { PROCESSED_DIR_NAME } else { FAILED_DIR_NAME },
            file_name
        );

        // The file is accounted for either way
        Ok(())
    }
}

fn is_spool_file(path: &Path) -> bool {
    path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json")
}

/// Watch the spool inbox until `cancel` fires. Files already present are handled first.
pub async fn monitor(
    dispatcher: Arc<SpoolDispatcher>,
    dirs: SpoolDirs,
    cancel: CancellationToken,
) -> Result<(), BoxError> {
    log::info!("Monitoring spool directory {}/", dirs.inbox.display());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut watcher = RecommendedWatcher::new(
        move |result: Result<Event, notify::Error>| match result {
            Ok(event) => {
                let _ = tx.send(event);
            }
            Err(e) => log::error!("Watcher error: {}", e),
        },
        notify::Config::default(),
    )?;
    watcher.watch(&dirs.inbox, RecursiveMode::NonRecursive)?;

    let mut existing: Vec<PathBuf> = std::fs::read_dir(&dirs.inbox)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| is_spool_file(path))
        .collect();
    existing.sort();

    for path in existing {
        if let Err(e) = dispatcher.process_file(&dirs, &path).await {
            log::error!("Failed to process spool file {:?}: {}", path, e);
        }
    }

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        log::debug!("File system event: {:?}", event);

        if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            for path in event.paths {
                if is_spool_file(&path) {
                    if let Err(e) = dispatcher.process_file(&dirs, &path).await {
                        log::error!("Failed to process spool file {:?}: {}", path, e);
                    }
                }
            }
        }
    }

    log::info!("Spool monitor stopped");
    Ok(())
}
