//! Coalesce-within-window primitive driven by tokio time.

use std::time::Duration;

use tokio::sync::mpsc;

/// Collapses bursts of submitted values into a single flush of the latest
/// value once `window` has elapsed without a new submission.
///
/// Must be constructed inside a tokio runtime; the drain task exits when the
/// debouncer is dropped, flushing whatever value was pending.
pub struct Debouncer<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new<F>(window: Duration, mut flush: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<T>();
        tokio::spawn(async move {
            while let Some(mut latest) = rx.recv().await {
                loop {
                    tokio::select! {
                        () = tokio::time::sleep(window) => break,
                        next = rx.recv() => match next {
                            Some(value) => latest = value,
                            // Sender dropped mid-window: flush what we have.
                            None => break,
                        },
                    }
                }
                flush(latest);
            }
        });
        Self { tx }
    }

    /// Queue a value; supersedes any value still waiting out its window.
    pub fn submit(&self, value: T) {
        // Receiver lives as long as any sender, so this cannot fail.
        let _ = self.tx.send(value);
    }
}

impl<T> std::fmt::Debug for Debouncer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer").finish_non_exhaustive()
    }
}
