//! Bounded lookahead fetcher.
//!
//! A background task pulls blocks by height into a channel holding at most
//! `queue` blocks, so fetching the next blocks overlaps with building and
//! committing the current one. A full channel blocks the task; that is the
//! only backpressure between node and crawler.

use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tzindex_codec::Block as RpcBlock;
use tzindex_core::IndexerError;
use tzindex_rpc::{BlockId, HeadStream, NodeApi, RetryPolicy, TransportError};

use crate::config::CrawlerConfig;

/// Head level before the first poll.
const UNKNOWN_HEAD: i64 = i64::MIN;

/// Map a node error into the crawler taxonomy.
pub fn rpc_error(height: i64, e: TransportError) -> IndexerError {
    match e {
        TransportError::Decode(d) => IndexerError::Decode {
            height,
            reason: d.to_string(),
        },
        TransportError::Deserialization(d) => IndexerError::Decode {
            height,
            reason: d.to_string(),
        },
        TransportError::NotFound { path } => IndexerError::not_found("node object", path),
        other => IndexerError::Rpc(other.to_string()),
    }
}

/// Run `op` until it succeeds, retrying transient errors and not-found
/// answers with backoff until `deadline` has passed since the first attempt.
pub async fn with_deadline<T, F, Fut>(
    policy: &RetryPolicy,
    deadline: Duration,
    cancel: &CancellationToken,
    height: i64,
    what: &str,
    mut op: F,
) -> Result<T, IndexerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let started = Instant::now();
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(IndexerError::Aborted {
                reason: "cancelled".into(),
            });
        }
        let err = match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() || e.is_not_found() => e,
            Err(e) => return Err(rpc_error(height, e)),
        };
        let elapsed = started.elapsed();
        if elapsed >= deadline {
            warn!(what, height, attempts = attempt + 1, error = %err, "Giving up on node request");
            return Err(match rpc_error(height, err) {
                IndexerError::NotFound { entity, key } => {
                    IndexerError::Rpc(format!("{entity} {key} still missing after {deadline:?}"))
                }
                e => e,
            });
        }
        attempt += 1;
        let delay = policy
            .next_delay(attempt)
            .unwrap_or(policy.config.max_backoff)
            .min(deadline - elapsed);
        debug!(what, height, attempt, delay_ms = delay.as_millis() as u64, error = %err, "Retrying node request");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {
                return Err(IndexerError::Aborted { reason: "cancelled".into() });
            }
        }
    }
}

// ─── Fetcher ──────────────────────────────────────────────────────────────────

/// Handle to the background fetch task. Dropping it stops the task.
pub struct Fetcher {
    rx: mpsc::Receiver<Result<RpcBlock, IndexerError>>,
    head: Arc<AtomicI64>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Fetcher {
    /// Start fetching at `from`. The task ends on cancellation of `parent`,
    /// after `stop_block`, or after reporting an error.
    pub fn spawn(
        node: Arc<dyn NodeApi>,
        from: i64,
        config: &CrawlerConfig,
        parent: &CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue.max(1));
        let head = Arc::new(AtomicI64::new(UNKNOWN_HEAD));
        let cancel = parent.child_token();
        let worker = Worker {
            node,
            next: from,
            delay: config.delay,
            stop_block: config.stop_block,
            enable_monitor: config.enable_monitor,
            poll_interval: config.poll_interval,
            deadline: config.fetch_deadline,
            policy: RetryPolicy::new(config.retry.clone()),
            head: head.clone(),
            monitor: None,
            tx,
            cancel: cancel.clone(),
        };
        debug!(from, queue = config.queue, "Fetcher started");
        let handle = tokio::spawn(worker.run());
        Self {
            rx,
            head,
            cancel,
            handle,
        }
    }

    /// Next block in height order, or `None` once the task has ended.
    pub async fn next(&mut self) -> Option<Result<RpcBlock, IndexerError>> {
        self.rx.recv().await
    }

    /// Latest node head seen, if any.
    pub fn node_head(&self) -> Option<i64> {
        match self.head.load(Ordering::Acquire) {
            UNKNOWN_HEAD => None,
            h => Some(h),
        }
    }

    /// Stop the task and wait for it to exit. Buffered blocks are dropped.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        self.rx.close();
        if let Err(e) = (&mut self.handle).await {
            if !e.is_cancelled() {
                warn!(error = %e, "Fetcher task panicked");
            }
        }
    }
}

impl Drop for Fetcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// How a wait for a new head ended.
enum Wake {
    Head(i64),
    MonitorClosed(Option<String>),
    Tick,
    Cancelled,
}

struct Worker {
    node: Arc<dyn NodeApi>,
    next: i64,
    delay: i64,
    stop_block: Option<i64>,
    enable_monitor: bool,
    poll_interval: Duration,
    deadline: Duration,
    policy: RetryPolicy,
    head: Arc<AtomicI64>,
    monitor: Option<HeadStream>,
    tx: mpsc::Sender<Result<RpcBlock, IndexerError>>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(mut self) {
        loop {
            if self.cancel.is_cancelled() || self.stop_block.is_some_and(|s| self.next > s) {
                break;
            }
            match self.wait_for(self.next).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    let _ = self.tx.send(Err(e)).await;
                    break;
                }
            }

            let height = self.next;
            let node = self.node.clone();
            let res = with_deadline(&self.policy, self.deadline, &self.cancel, height, "block", || {
                let node = node.clone();
                async move { node.block(&BlockId::Level(height)).await }
            })
            .await;
            if matches!(res, Err(IndexerError::Aborted { .. })) {
                break;
            }
            let failed = res.is_err();
            tokio::select! {
                sent = self.tx.send(res) => {
                    if sent.is_err() {
                        break;
                    }
                }
                _ = self.cancel.cancelled() => break,
            }
            if failed {
                break;
            }
            self.next += 1;
        }
        debug!(next = self.next, "Fetcher stopped");
    }

    fn ready(&self, height: i64) -> bool {
        let head = self.head.load(Ordering::Acquire);
        head != UNKNOWN_HEAD && head - height >= self.delay
    }

    fn set_head(&self, level: i64) {
        self.head.store(level, Ordering::Release);
    }

    async fn poll_head(&mut self) -> Result<(), IndexerError> {
        let node = self.node.clone();
        let header = with_deadline(&self.policy, self.deadline, &self.cancel, self.next, "head", || {
            let node = node.clone();
            async move { node.header(&BlockId::Head).await }
        })
        .await?;
        self.set_head(header.level);
        Ok(())
    }

    /// Wait until `height` is at least `delay` blocks below the node head.
    /// Returns `Ok(false)` when cancelled.
    async fn wait_for(&mut self, height: i64) -> Result<bool, IndexerError> {
        if self.ready(height) {
            return Ok(true);
        }
        match self.poll_head().await {
            Ok(()) => {}
            Err(IndexerError::Aborted { .. }) => return Ok(false),
            Err(e) => return Err(e),
        }
        while !self.ready(height) {
            match self.wait_head().await {
                Ok(true) => {}
                Ok(false) | Err(IndexerError::Aborted { .. }) => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Block until the head may have moved: a monitor notification, or one
    /// poll interval followed by a head poll.
    async fn wait_head(&mut self) -> Result<bool, IndexerError> {
        if self.enable_monitor && self.monitor.is_none() {
            match self.node.monitor_heads().await {
                Ok(stream) => {
                    debug!("Head monitor opened");
                    self.monitor = Some(stream);
                }
                Err(e) => {
                    warn!(error = %e, "Head monitor unavailable, polling instead");
                    self.enable_monitor = false;
                }
            }
        }

        let cancel = self.cancel.clone();
        let poll = self.poll_interval;
        let wake = match self.monitor.as_mut() {
            Some(stream) => tokio::select! {
                item = stream.next() => match item {
                    Some(Ok(h)) => Wake::Head(h.level),
                    Some(Err(e)) => Wake::MonitorClosed(Some(e.to_string())),
                    None => Wake::MonitorClosed(None),
                },
                _ = tokio::time::sleep(poll) => Wake::Tick,
                _ = cancel.cancelled() => Wake::Cancelled,
            },
            None => tokio::select! {
                _ = tokio::time::sleep(poll) => Wake::Tick,
                _ = cancel.cancelled() => Wake::Cancelled,
            },
        };

        match wake {
            Wake::Head(level) => {
                if level > self.head.load(Ordering::Acquire) {
                    self.set_head(level);
                }
            }
            Wake::MonitorClosed(reason) => {
                warn!(reason = reason.as_deref().unwrap_or("end of stream"), "Head monitor closed");
                self.monitor = None;
            }
            Wake::Tick => self.poll_head().await?,
            Wake::Cancelled => return Ok(false),
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tzindex_codec::DecodeError;
    use tzindex_rpc::RetryConfig;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries: 10,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            multiplier: 1.0,
            jitter_fraction: 0.0,
        })
    }

    #[test]
    fn worker_task_is_send() {
        fn assert_send<T: Send>(_: &T) {}
        fn check(w: Worker) {
            let task = w.run();
            assert_send(&task);
        }
        let _ = check;
    }

    #[test]
    fn error_mapping() {
        let decode = rpc_error(7, TransportError::Decode(DecodeError::UnsupportedKind { kind: "x".into() }));
        assert!(matches!(decode, IndexerError::Decode { height: 7, .. }));
        assert!(decode.is_fatal());

        let nf = rpc_error(7, TransportError::NotFound { path: "chains/main/blocks/7".into() });
        assert!(nf.is_not_found());

        let timeout = rpc_error(7, TransportError::Timeout { ms: 100 });
        assert!(timeout.is_transient());
    }

    #[tokio::test]
    async fn retries_transient_errors() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let out = with_deadline(&fast_policy(), Duration::from_secs(5), &cancel, 1, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(TransportError::Http("connection reset".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 3);
    }

    #[tokio::test]
    async fn permanent_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let err = with_deadline(&fast_policy(), Duration::from_secs(5), &cancel, 1, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(TransportError::Other("bad request".into())) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn deadline_bounds_retries() {
        let cancel = CancellationToken::new();
        let err = with_deadline(&fast_policy(), Duration::from_millis(20), &cancel, 1, "test", || async {
            Err::<(), _>(TransportError::Timeout { ms: 1 })
        })
        .await
        .unwrap_err();
        assert!(matches!(err, IndexerError::Rpc(_)));
    }

    #[tokio::test]
    async fn cancellation_interrupts_retry() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = with_deadline(&fast_policy(), Duration::from_secs(5), &cancel, 1, "test", || async {
            Err::<(), _>(TransportError::Timeout { ms: 1 })
        })
        .await
        .unwrap_err();
        assert!(matches!(err, IndexerError::Aborted { .. }));
    }
}
