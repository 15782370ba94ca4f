//! Stage markers reported while a sync runs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline stage of a sync request.
///
/// Stages advance `Idle → Downloading → Unzipping → ExtractingTables → Done`;
/// `Error` is reachable from any of them. `Idle` is the state before the
/// first report and is never reported itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    #[default]
    Idle,
    Downloading,
    Unzipping,
    ExtractingTables,
    Done,
    Error,
}

impl SyncStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStage::Idle => "idle",
            SyncStage::Downloading => "downloading",
            SyncStage::Unzipping => "unzipping",
            SyncStage::ExtractingTables => "extracting tables",
            SyncStage::Done => "done",
            SyncStage::Error => "error",
        }
    }

    /// Whether no further stage can follow.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStage::Done | SyncStage::Error)
    }
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One progress notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Stage { stage: SyncStage },
    /// Integer percent of the archive download, when its size is known.
    Download { percent: u8 },
}

/// Receives progress notifications. Must not block.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);

    fn stage(&self, stage: SyncStage) {
        self.report(ProgressEvent::Stage { stage });
    }
}

impl<F> ProgressReporter for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn report(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Reporter that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_closure_reporter() {
        let seen = Mutex::new(Vec::new());
        let reporter = |event: ProgressEvent| seen.lock().unwrap().push(event);
        reporter.stage(SyncStage::Downloading);
        reporter.report(ProgressEvent::Download { percent: 40 });

        let seen = seen.into_inner().unwrap();
        assert_eq!(
            seen,
            vec![
                ProgressEvent::Stage {
                    stage: SyncStage::Downloading
                },
                ProgressEvent::Download { percent: 40 },
            ]
        );
    }

    #[test]
    fn test_terminal_stages() {
        assert!(SyncStage::Done.is_terminal());
        assert!(SyncStage::Error.is_terminal());
        assert!(!SyncStage::Unzipping.is_terminal());
        assert_eq!(SyncStage::default(), SyncStage::Idle);
        assert!(!SyncStage::default().is_terminal());
        assert_eq!(SyncStage::ExtractingTables.to_string(), "extracting tables");
    }
}
