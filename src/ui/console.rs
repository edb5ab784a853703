//! Console reporter for pipeline diagnostics.
//!
//! Listens on the diagnostics broadcast channel and renders each notice as
//! human-readable console output.

use crate::diagnostics::{IntakeNotice, SkipReason};
use crate::intake::IntakeOrigin;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Callback receiving each rendered block of console text.
pub type OutputCallback = Box<dyn Fn(&str) + Send + Sync>;

const RULE_WIDTH: usize = 80;

fn name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Render a notice for the console. Notices with no console form return `None`.
pub fn render(notice: &IntakeNotice) -> Option<String> {
    let rule = "=".repeat(RULE_WIDTH);
    let thin = "-".repeat(RULE_WIDTH);

    let text = match notice {
        IntakeNotice::Detected { path, origin } => match origin {
            IntakeOrigin::Notification => format!("\nNEW FILE DETECTED: {}", name(path)),
            IntakeOrigin::Existing => format!("Queued existing file: {}", name(path)),
        },
        IntakeNotice::Skipped { path, reason } => match reason {
            SkipReason::Directory | SkipReason::Extension | SkipReason::OwnRename => {
                return None
            }
            SkipReason::QueueClosed => format!("Shutting down, not processing: {}", name(path)),
        },
        IntakeNotice::Processing { path } => format!("\nPROCESSING FILE: {}", name(path)),
        IntakeNotice::Unsettled { path, .. } => format!(
            "File still changing after timeout, processing anyway: {}",
            name(path)
        ),
        IntakeNotice::Rotated {
            latest, demoted, ..
        } => {
            let mut text = String::new();
            for (from, to) in demoted {
                text.push_str(&format!("Previous latest: {} -> {}\n", name(from), name(to)));
            }
            text.push_str(&format!("FILE RENAMED: {}\n", name(latest)));
            text
        }
        IntakeNotice::TriggerStarted {
            path,
            argument,
            dry_run,
        } => {
            let mut text = format!(
                "\n{rule}\nTRIGGERING ANALYSIS\n{rule}\nFile: {}\nPrompt: {}",
                path.display(),
                argument
            );
            if *dry_run {
                text.push_str("\nDRY RUN MODE: execution skipped");
            }
            text.push_str(&format!("\n{rule}\n"));
            text
        }
        IntakeNotice::TriggerOutput { stdout, stderr, .. } => {
            let mut text = String::new();
            if !stdout.is_empty() {
                text.push_str(&format!("OUTPUT:\n{thin}\n{}\n{thin}\n", stdout.trim_end()));
            }
            if !stderr.is_empty() {
                text.push_str(&format!("ERRORS:\n{thin}\n{}\n{thin}\n", stderr.trim_end()));
            }
            text
        }
        IntakeNotice::TriggerCompleted { .. } => {
            format!("\n{rule}\nANALYSIS COMPLETED\n{rule}\n")
        }
        IntakeNotice::Failed { path, error } => {
            format!("\nERROR processing {}: {}\n", name(path), error)
        }
        IntakeNotice::Abandoned { path } => {
            format!("Not processed (shutdown): {}", path.display())
        }
        IntakeNotice::Idle => "\nWatching for next file...\n".to_string(),
    };
    Some(text)
}

/// Prints diagnostics to the console from a background task.
pub struct ConsoleReporter {
    output: Arc<OutputCallback>,
    listener_handle: Option<tokio::task::JoinHandle<()>>,
}

impl ConsoleReporter {
    /// Create a reporter printing to stdout.
    pub fn new() -> Self {
        Self::with_output(Box::new(|text: &str| println!("{}", text)))
    }

    /// Create a reporter sending rendered text to `output`.
    pub fn with_output(output: OutputCallback) -> Self {
        Self {
            output: Arc::new(output),
            listener_handle: None,
        }
    }

    /// Print a line directly, outside of the diagnostics stream.
    pub fn print(&self, text: &str) {
        (self.output)(text);
    }

    /// Start rendering notices from `rx`.
    pub fn listen(&mut self, rx: broadcast::Receiver<IntakeNotice>) {
        let output = Arc::clone(&self.output);
        let handle = tokio::spawn(async move {
            Self::listener_loop(output, rx).await;
        });
        self.listener_handle = Some(handle);
    }

    async fn listener_loop(output: Arc<OutputCallback>, mut rx: broadcast::Receiver<IntakeNotice>) {
        loop {
            match rx.recv().await {
                Ok(notice) => {
                    if let Some(text) = render(&notice) {
                        output(text.as_str());
                    }
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    tracing::warn!("Console reporter lagged behind by {} notices", count);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!("Diagnostics channel closed, stopping console reporter");
                    break;
                }
            }
        }
    }

    /// Stop after rendering whatever is already buffered, waiting at most `grace`.
    pub async fn finish(&mut self, grace: std::time::Duration) {
        if let Some(mut handle) = self.listener_handle.take() {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                handle.abort();
            }
        }
    }

    /// Check if the listener is running.
    pub fn is_listening(&self) -> bool {
        self.listener_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}
