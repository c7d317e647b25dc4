//! Progress lines on stderr, fed by captured task events.

use std::io::Write;
use taskmemo_events::{EventKind, TaskmemoEvent};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Background printer for task events
pub struct Progress {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Progress {
    /// Print events from `events` until [`Progress::finish`] is called.
    #[must_use]
    pub fn spawn(mut events: mpsc::UnboundedReceiver<TaskmemoEvent>) -> Self {
        let (stop, mut stopped) = oneshot::channel();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    Some(event) = events.recv() => print_event(&event),
                    _ = &mut stopped => {
                        while let Ok(event) = events.try_recv() {
                            print_event(&event);
                        }
                        break;
                    }
                }
            }
        });
        Self { stop, handle }
    }

    /// Flush pending events and stop printing.
    pub async fn finish(self) {
        let _ = self.stop.send(());
        let _ = self.handle.await;
    }
}

/// Whether an event is worth a progress line
#[must_use]
pub const fn is_progress(kind: EventKind) -> bool {
    !matches!(kind, EventKind::TaskCacheStored | EventKind::CacheEvicted)
}

fn print_event(event: &TaskmemoEvent) {
    if is_progress(event.kind) {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{}", event.summary_line());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_filter() {
        assert!(is_progress(EventKind::TaskStarted));
        assert!(is_progress(EventKind::RemoteUnavailable));
        assert!(!is_progress(EventKind::TaskCacheStored));
    }

    #[tokio::test]
    async fn test_finish_drains_pending_events() {
        let (tx, rx) = mpsc::unbounded_channel();
        let progress = Progress::spawn(rx);
        tx.send(TaskmemoEvent::new("taskmemo::task", EventKind::TaskStarted))
            .unwrap();
        progress.finish().await;
        assert!(tx.is_closed());
    }
}
