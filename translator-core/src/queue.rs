use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;

use crate::envelope::Envelope;
use crate::submit::Submitter;

pub const DEFAULT_CAPACITY: usize = 10;
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Producer side, cloned into every ingestion task.
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::Sender<Envelope>,
}

/// Consumer side, a single worker forwarding envelopes in order.
pub struct Dispatcher {
    rx: mpsc::Receiver<Envelope>,
    submitter: Submitter,
    retry_interval: Duration,
}

pub fn channel(
    capacity: usize,
    submitter: Submitter,
    retry_interval: Duration,
) -> (DispatchHandle, Dispatcher) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        DispatchHandle { tx },
        Dispatcher {
            rx,
            submitter,
            retry_interval,
        },
    )
}

impl DispatchHandle {
    /// Waits for a free slot when the queue is full.
    pub async fn enqueue(&self, env: Envelope) -> Result<()> {
        self.tx
            .send(env)
            .await
            .map_err(|_| anyhow!("dispatch worker is not running"))
    }
}

impl Dispatcher {
    /// Runs until every handle has been dropped.
    pub async fn run(mut self) {
        tracing::info!(retry=?self.retry_interval, "dispatch worker started");
        while let Some(env) = self.rx.recv().await {
            self.deliver(env).await;
        }
        tracing::info!("dispatch worker stopped");
    }

    async fn deliver(&self, env: Envelope) {
        let mut attempt = 1u64;
        loop {
            match self.submitter.submit(&env).await {
                Ok(()) => return,
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        user=%env.to.user_token,
                        attempt,
                        err=%e,
                        "submission failed, retrying in {:?}",
                        self.retry_interval
                    );
                    tokio::time::sleep(self.retry_interval).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(user=%env.to.user_token, err=%e, "submission failed, dropping notification");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Recipient, Sender};
    use crate::error::ApiError;
    use crate::submit::tests::{refused, ScriptedApi};
    use std::sync::Arc;

    fn envelope(subject: &str) -> Envelope {
        Envelope {
            from: Sender {
                app_token: Some("app".into()),
                address: "app@host".into(),
                show_address: false,
            },
            to: Recipient {
                user_token: "user".into(),
                ..Default::default()
            },
            subject: subject.into(),
            body: String::new(),
            attachment: None,
        }
    }

    #[tokio::test]
    async fn retry_blocks_the_queue() {
        let api = Arc::new(ScriptedApi::default());
        api.send.lock().unwrap().extend([
            Err(ApiError::Transport("down".into())),
            Err(refused(0)),
        ]);
        let (handle, worker) = channel(4, Submitter::new(api.clone()), Duration::from_millis(5));
        handle.enqueue(envelope("A")).await.unwrap();
        handle.enqueue(envelope("B")).await.unwrap();
        drop(handle);
        worker.run().await;

        let titles = api
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.title.clone())
            .collect::<Vec<_>>();
        assert_eq!(titles, vec!["A", "A", "A", "B"]);
    }

    async fn settle() {
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_waits_for_the_interval() {
        let api = Arc::new(ScriptedApi::default());
        api.send
            .lock()
            .unwrap()
            .push_back(Err(ApiError::Transport("down".into())));
        let (handle, worker) = channel(4, Submitter::new(api.clone()), Duration::from_secs(10));
        let worker = tokio::spawn(worker.run());

        handle.enqueue(envelope("A")).await.unwrap();
        settle().await;
        assert_eq!(api.sent.lock().unwrap().len(), 1);

        tokio::time::advance(Duration::from_secs(9)).await;
        settle().await;
        assert_eq!(api.sent.lock().unwrap().len(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(api.sent.lock().unwrap().len(), 2);

        drop(handle);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn permanent_failure_is_dropped() {
        let api = Arc::new(ScriptedApi::default());
        api.validate.lock().unwrap().push_back(Err(refused(0)));
        let (handle, worker) = channel(4, Submitter::new(api.clone()), Duration::from_millis(5));
        handle.enqueue(envelope("A")).await.unwrap();
        handle.enqueue(envelope("B")).await.unwrap();
        drop(handle);
        worker.run().await;

        let sent = api.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].title, "B");
    }

    #[tokio::test]
    async fn full_queue_applies_backpressure() {
        let api = Arc::new(ScriptedApi::default());
        let (handle, worker) = channel(1, Submitter::new(api), Duration::from_millis(5));
        handle.enqueue(envelope("A")).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), handle.enqueue(envelope("B"))).await;
        assert!(blocked.is_err());

        let worker = tokio::spawn(worker.run());
        handle.enqueue(envelope("B")).await.unwrap();
        drop(handle);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn enqueue_fails_without_worker() {
        let api = Arc::new(ScriptedApi::default());
        let (handle, worker) = channel(1, Submitter::new(api), DEFAULT_RETRY_INTERVAL);
        drop(worker);
        assert!(handle.enqueue(envelope("A")).await.is_err());
    }
}
