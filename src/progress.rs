//! Terminal progress for a sync run, driven by [`SyncEvent`]s.

use std::io::IsTerminal;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::sync::SyncEvent;

/// Length is unknown until the album has been enumerated.
pub fn create_progress_bar(no_progress_bar: bool) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(0);
    if let Ok(style) =
        ProgressStyle::with_template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}

/// Render events until the synchronizer drops its sender.
pub fn spawn_reporter(pb: ProgressBar, mut rx: UnboundedReceiver<SyncEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            apply(&pb, &event);
        }
        pb.finish_and_clear();
    })
}

fn apply(pb: &ProgressBar, event: &SyncEvent) {
    match event {
        SyncEvent::StateChanged(state) => pb.set_message(state.to_string()),
        SyncEvent::PageListed { page, items } => {
            pb.set_message(format!("page {page}: {items} items"));
        }
        SyncEvent::Enumerated { total } => pb.set_length(*total as u64),
        SyncEvent::Downloaded { identifier, .. } => {
            pb.set_message(identifier.clone());
            pb.inc(1);
        }
        SyncEvent::Failed {
            identifier, reason, ..
        } => {
            pb.suspend(|| tracing::debug!(id = %identifier, "Failed: {reason}"));
            pb.inc(1);
        }
        SyncEvent::Skipped { .. } | SyncEvent::Planned { .. } | SyncEvent::Abandoned { .. } => {
            pb.inc(1)
        }
        SyncEvent::CommentWritten { .. } => {}
    }
}
