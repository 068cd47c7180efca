//! Event coalescing.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use super::MonitorEvent;

/// Collapse bursts of events into batches.
///
/// A batch is released once `window` passes without a new event. With a
/// zero window every event becomes its own batch. The output closes after
/// the input closes and the last batch is delivered.
pub fn debounce(
    mut events: mpsc::Receiver<MonitorEvent>,
    window: Duration,
) -> mpsc::Receiver<Vec<MonitorEvent>> {
    let (tx, rx) = mpsc::channel(16);

    tokio::spawn(async move {
        while let Some(first) = events.recv().await {
            let mut batch = vec![first];
            let mut closed = false;

            if !window.is_zero() {
                let deadline = tokio::time::sleep_until(Instant::now() + window);
                tokio::pin!(deadline);

                loop {
                    tokio::select! {
                        next = events.recv() => match next {
                            Some(event) => {
                                batch.push(event);
                                deadline.as_mut().reset(Instant::now() + window);
                            }
                            None => {
                                closed = true;
                                break;
                            }
                        },
                        _ = &mut deadline => break,
                    }
                }
            }

            if tx.send(batch).await.is_err() || closed {
                return;
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::EventKind;
    use std::path::PathBuf;

    fn touch(name: &str) -> MonitorEvent {
        MonitorEvent {
            kind: EventKind::Touch,
            path: PathBuf::from(name),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_becomes_one_batch() {
        let (tx, rx) = mpsc::channel(16);
        let mut batches = debounce(rx, Duration::from_secs(1));

        tx.send(touch("a")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        tx.send(touch("b")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        tx.send(touch("c")).await.unwrap();

        let batch = batches.recv().await.unwrap();
        assert_eq!(batch, vec![touch("a"), touch("b"), touch("c")]);

        tokio::time::sleep(Duration::from_secs(5)).await;
        tx.send(touch("d")).await.unwrap();
        assert_eq!(batches.recv().await.unwrap(), vec![touch("d")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_window_passes_through() {
        let (tx, rx) = mpsc::channel(16);
        let mut batches = debounce(rx, Duration::ZERO);

        tx.send(touch("a")).await.unwrap();
        tx.send(touch("b")).await.unwrap();

        assert_eq!(batches.recv().await.unwrap(), vec![touch("a")]);
        assert_eq!(batches.recv().await.unwrap(), vec![touch("b")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_on_close() {
        let (tx, rx) = mpsc::channel(16);
        let mut batches = debounce(rx, Duration::from_secs(10));

        tx.send(touch("a")).await.unwrap();
        drop(tx);

        assert_eq!(batches.recv().await.unwrap(), vec![touch("a")]);
        assert!(batches.recv().await.is_none());
    }
}
