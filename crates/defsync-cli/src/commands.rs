//! Subcommand implementations.

use anyhow::{bail, Context, Result};
use defsync_core::{
    retry_async, Dataset, Definitions, DefinitionsRequest, DefinitionsUpdate, DefsError,
    ProgressEvent, ProgressReporter, RetryConfig, SyncConfig, SyncStage,
};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Logs stage transitions and every tenth download percent.
#[derive(Default)]
struct LogProgress {
    stage: Mutex<SyncStage>,
}

impl ProgressReporter for LogProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Stage { stage } => match self.stage.lock() {
                Ok(mut current) => {
                    info!("Definitions: {} -> {}", *current, stage);
                    *current = stage;
                }
                Err(_) => info!("Definitions: {}", stage),
            },
            ProgressEvent::Download { percent } if percent % 10 == 0 => {
                info!("Definitions archive download progress {}%", percent)
            }
            ProgressEvent::Download { .. } => {}
        }
    }
}

enum Synced {
    Fresh(Arc<Dataset>),
    Current(Arc<Dataset>),
}

/// Run one request and reduce its updates to the final dataset.
async fn sync_once(
    definitions: &Definitions,
    request: &DefinitionsRequest,
) -> defsync_core::Result<Synced> {
    let mut early = None;
    let mut last = None;

    definitions
        .request_definitions(request, &LogProgress::default(), |update| match update {
            DefinitionsUpdate::Early(data) => {
                info!("Cached definitions available ({} tables)", data.len());
                early = Some(data);
            }
            other => last = Some(other),
        })
        .await;

    match last {
        Some(DefinitionsUpdate::Fresh(data)) => Ok(Synced::Fresh(data)),
        Some(DefinitionsUpdate::UpToDate) => early
            .map(Synced::Current)
            .ok_or_else(|| DefsError::Other("Up to date without cached data".into())),
        Some(DefinitionsUpdate::Failed(e)) => Err(e),
        Some(DefinitionsUpdate::Early(_)) | None => {
            Err(DefsError::Other("Sync ended without a final result".into()))
        }
    }
}

pub async fn sync(
    config: &SyncConfig,
    language: String,
    tables: Option<Vec<String>>,
    retries: u32,
    output: Option<&Path>,
) -> Result<()> {
    let definitions = Definitions::open(config).context("Failed to open definitions cache")?;
    let request = DefinitionsRequest {
        language,
        tables,
    };

    let retry = RetryConfig::new().with_max_attempts(retries);
    let (result, stats) = retry_async(&retry, || sync_once(&definitions, &request)).await;
    if stats.attempts > 1 {
        warn!("Sync took {} attempts", stats.attempts);
    }

    // Let stale-entry cleanup finish before the runtime shuts down
    definitions.wait_for_cleanup().await;

    let (data, fresh) = match result? {
        Synced::Fresh(data) => (data, true),
        Synced::Current(data) => (data, false),
    };

    if fresh {
        println!("Synced {} tables for '{}'", data.len(), request.language);
    } else {
        println!("Definitions for '{}' are already current", request.language);
    }
    for name in data.table_names() {
        let count = data.get(name).map(|records| records.len()).unwrap_or(0);
        println!("  {:<48} {:>8}", name, count);
    }

    if let Some(path) = output {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        serde_json::to_writer(std::io::BufWriter::new(file), data.as_ref())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Wrote definitions to {}", path.display());
    }

    Ok(())
}

pub async fn status(config: &SyncConfig) -> Result<()> {
    let definitions = Definitions::open(config).context("Failed to open definitions cache")?;
    let stats = definitions.stats().await?;

    println!("Cache: {}", config.cache_path.display());
    for table in &stats.tables {
        println!(
            "  {:<16} {:>6} entries {:>12} bytes",
            table.table.name(),
            table.entry_count,
            table.total_size_bytes
        );
    }
    println!(
        "  {:<16} {:>6} entries {:>12} bytes",
        "total", stats.total_entries, stats.total_size_bytes
    );
    Ok(())
}

pub async fn clear(config: &SyncConfig) -> Result<()> {
    if !config.cache_path.exists() {
        bail!("No cache at {}", config.cache_path.display());
    }
    let definitions = Definitions::open(config).context("Failed to open definitions cache")?;
    definitions.clear().await?;
    println!("Cleared {}", config.cache_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_progress_tracks_stage() {
        let progress = LogProgress::default();
        assert_eq!(*progress.stage.lock().unwrap(), SyncStage::Idle);

        progress.stage(SyncStage::Downloading);
        progress.report(ProgressEvent::Download { percent: 40 });
        progress.stage(SyncStage::Unzipping);
        assert_eq!(*progress.stage.lock().unwrap(), SyncStage::Unzipping);
    }
}
