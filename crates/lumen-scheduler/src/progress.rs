use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgressId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Begin {
        id: ProgressId,
        title: String,
        percentage: Option<u32>,
    },
    Report {
        id: ProgressId,
        message: Option<String>,
        percentage: Option<u32>,
    },
    End {
        id: ProgressId,
    },
}

pub type ProgressReceiver = broadcast::Receiver<ProgressEvent>;

/// Broadcast side of progress reporting. Consumers subscribe; nobody
/// listening is fine.
#[derive(Clone)]
pub struct ProgressSender {
    tx: broadcast::Sender<ProgressEvent>,
    next_id: Arc<AtomicU64>,
}

impl ProgressSender {
    pub(crate) fn new(tx: broadcast::Sender<ProgressEvent>) -> Self {
        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn subscribe(&self) -> ProgressReceiver {
        self.tx.subscribe()
    }

    pub fn start(&self, title: impl Into<String>) -> Progress {
        self.begin(title, 0)
    }

    /// A batch task reporting percentage over `total` increments, like a
    /// file-count indexing pass.
    pub fn start_counted(&self, title: impl Into<String>, total: u64) -> Progress {
        self.begin(title, total)
    }

    fn begin(&self, title: impl Into<String>, total: u64) -> Progress {
        let id = ProgressId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let _ = self.tx.send(ProgressEvent::Begin {
            id,
            title: title.into(),
            percentage: (total > 0).then_some(0),
        });
        Progress {
            id,
            tx: self.tx.clone(),
            total,
            completed: Arc::new(AtomicU64::new(0)),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[derive(Clone)]
pub struct Progress {
    id: ProgressId,
    tx: broadcast::Sender<ProgressEvent>,
    total: u64,
    completed: Arc<AtomicU64>,
    finished: Arc<AtomicBool>,
}

impl Progress {
    pub fn id(&self) -> ProgressId {
        self.id
    }

    pub fn report(&self, message: impl Into<Option<String>>, percentage: Option<u32>) {
        let _ = self.tx.send(ProgressEvent::Report {
            id: self.id,
            message: message.into(),
            percentage,
        });
    }

    /// Mark one unit of a counted task done.
    pub fn increment(&self) {
        if self.total == 0 {
            return;
        }
        let done = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        let percentage = ((done.min(self.total) * 100) / self.total) as u32;
        self.report(None, Some(percentage));
    }

    pub fn finish(&self) {
        if self
            .finished
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let _ = self.tx.send(ProgressEvent::End { id: self.id });
        }
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> ProgressSender {
        let (tx, _) = broadcast::channel(64);
        ProgressSender::new(tx)
    }

    #[test]
    fn counted_task_reports_percentages() {
        let sender = sender();
        let mut rx = sender.subscribe();

        let progress = sender.start_counted("indexing", 4);
        progress.increment();
        progress.increment();
        progress.finish();

        assert!(matches!(
            rx.try_recv().unwrap(),
            ProgressEvent::Begin { percentage: Some(0), .. }
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            ProgressEvent::Report { percentage: Some(25), .. }
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            ProgressEvent::Report { percentage: Some(50), .. }
        ));
        assert!(matches!(rx.try_recv().unwrap(), ProgressEvent::End { .. }));
    }

    #[test]
    fn finish_is_idempotent_and_fires_on_drop() {
        let sender = sender();
        let mut rx = sender.subscribe();
        {
            let progress = sender.start("scan");
            progress.finish();
            progress.finish();
        }
        assert!(matches!(rx.try_recv().unwrap(), ProgressEvent::Begin { .. }));
        assert!(matches!(rx.try_recv().unwrap(), ProgressEvent::End { .. }));
        assert!(rx.try_recv().is_err());
    }
}
