//! Connected-request coordinator.
//!
//! Runs operations that need a live session. When the connection is up and
//! nothing is waiting, an operation runs right away on the caller's task.
//! Otherwise it is parked in a FIFO queue and released by a drain task once
//! the connection manager reports `Connected`. Everything parked is replayed,
//! including requests submitted before the first connect.
//!
//! An operation failing with an auth error triggers a token refresh and is
//! parked again to run once more on the refreshed connection.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cl_core::error::{ClError, ClResult};
use cl_socket::{ConnectionManager, ConnectionState, SessionInfo};

use crate::service::{Service, ServiceState};

/// A parked request with its result type erased.
trait ParkedJob: Send {
    /// The caller stopped waiting for the result.
    fn is_abandoned(&self) -> bool;

    /// Invoke the operation now and return the rest of its run, which
    /// resolves the caller once the operation completes.
    fn start(self: Box<Self>, session: SessionInfo, inner: Arc<CoordinatorInner>) -> BoxFuture<'static, ()>;

    fn reject(self: Box<Self>, error: ClError);
}

struct Job<T, F> {
    operation: Arc<F>,
    reply: oneshot::Sender<ClResult<T>>,
    retried: bool,
}

impl<T, F, Fut> ParkedJob for Job<T, F>
where
    T: Send + 'static,
    F: Fn(SessionInfo) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ClResult<T>> + Send + 'static,
{
    fn is_abandoned(&self) -> bool {
        self.reply.is_closed()
    }

    fn start(self: Box<Self>, session: SessionInfo, inner: Arc<CoordinatorInner>) -> BoxFuture<'static, ()> {
        let running = (self.operation.as_ref())(session);
        Box::pin(async move {
            let result = with_timeout(running, inner.request_timeout).await;
            match result {
                Err(e) if e.is_auth_error() && !self.retried => {
                    inner.refresh_after_auth_error(&e).await;
                    inner.park(Box::new(Job {
                        operation: self.operation,
                        reply: self.reply,
                        retried: true,
                    }));
                }
                result => {
                    let _ = self.reply.send(result);
                }
            }
        })
    }

    fn reject(self: Box<Self>, error: ClError) {
        let _ = self.reply.send(Err(error));
    }
}

async fn with_timeout<T, Fut>(running: Fut, timeout: Duration) -> ClResult<T>
where
    Fut: Future<Output = ClResult<T>>,
{
    match tokio::time::timeout(timeout, running).await {
        Ok(result) => result,
        Err(_) => Err(ClError::Timeout(format!(
            "request exceeded {}ms",
            timeout.as_millis()
        ))),
    }
}

#[derive(Default)]
struct Queue {
    jobs: VecDeque<Box<dyn ParkedJob>>,
    /// Parked jobs are being started; newcomers must queue behind them.
    draining: bool,
}

struct CoordinatorInner {
    manager: ConnectionManager,
    queue: Mutex<Queue>,
    kick: Notify,
    request_timeout: Duration,
    stopped: AtomicBool,
}

impl CoordinatorInner {
    fn park(&self, job: Box<dyn ParkedJob>) {
        let mut queue = match self.queue.lock() {
            Ok(queue) => queue,
            Err(_) => {
                job.reject(ClError::Internal("request queue is poisoned".into()));
                return;
            }
        };
        if self.stopped.load(Ordering::SeqCst) {
            drop(queue);
            job.reject(ClError::NotConnected);
            return;
        }
        queue.jobs.retain(|j| !j.is_abandoned());
        queue.jobs.push_back(job);
        debug!("request parked ({} waiting)", queue.jobs.len());
        drop(queue);
        self.kick.notify_one();
    }

    async fn refresh_after_auth_error(&self, error: &ClError) {
        info!("request failed authentication ({error}), refreshing token before retry");
        if let Err(e) = self.manager.refresh_token().await {
            warn!("could not request token refresh: {e}");
        }
    }

    fn reject_all(&self, error: ClError) {
        let jobs = match self.queue.lock() {
            Ok(mut queue) => std::mem::take(&mut queue.jobs),
            Err(_) => return,
        };
        if !jobs.is_empty() {
            warn!("rejecting {} parked request(s): {error}", jobs.len());
        }
        for job in jobs {
            job.reject(error.clone());
        }
    }

    fn set_draining(&self, draining: bool) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.draining = draining;
        }
    }

    /// Start every parked request against the current session.
    ///
    /// Operations are invoked in FIFO order and then run concurrently on
    /// their own tasks, so a slow one never holds up later requests.
    fn drain(self: &Arc<Self>) {
        let Some(session) = self.manager.session() else {
            return;
        };

        let jobs: Vec<Box<dyn ParkedJob>> = match self.queue.lock() {
            Ok(mut queue) => {
                let jobs: Vec<_> = queue.jobs.drain(..).filter(|j| !j.is_abandoned()).collect();
                queue.draining = !jobs.is_empty();
                jobs
            }
            Err(_) => return,
        };
        if jobs.is_empty() {
            return;
        }

        info!("releasing {} parked request(s)", jobs.len());
        for job in jobs {
            tokio::spawn(job.start(session.clone(), self.clone()));
        }
        self.set_draining(false);
    }

    async fn drain_loop(self: Arc<Self>) {
        let mut state_rx = self.manager.state_receiver();
        let mut was_disconnected = true;

        loop {
            let state = state_rx.borrow_and_update().clone();
            match &state {
                ConnectionState::Connected(_) => self.drain(),
                ConnectionState::Failed { reason } => {
                    self.reject_all(ClError::FatalConnection(reason.clone()))
                }
                ConnectionState::Disconnected if !was_disconnected => {
                    self.reject_all(ClError::NotConnected)
                }
                _ => {}
            }
            was_disconnected = matches!(state, ConnectionState::Disconnected);

            tokio::select! {
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        self.reject_all(ClError::NotConnected);
                        return;
                    }
                }
                _ = self.kick.notified() => {}
            }
        }
    }
}

/// Runs operations against a live session, parking them while there is none.
#[derive(Clone)]
pub struct RequestCoordinator {
    inner: Arc<CoordinatorInner>,
    drain_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl RequestCoordinator {
    /// Create a coordinator and start its drain task.
    pub fn new(manager: ConnectionManager, request_timeout: Duration) -> Self {
        let inner = Arc::new(CoordinatorInner {
            manager,
            queue: Mutex::new(Queue::default()),
            kick: Notify::new(),
            request_timeout,
            stopped: AtomicBool::new(false),
        });
        let drain_task = tokio::spawn(inner.clone().drain_loop());
        Self {
            inner,
            drain_task: Arc::new(Mutex::new(Some(drain_task))),
        }
    }

    /// Run `operation` against the current session, waiting for one if needed.
    ///
    /// Requests submitted while disconnected wait for the next successful
    /// connect. `Failed` rejects immediately with `FatalConnection`. Dropping
    /// the returned future abandons a parked request.
    pub async fn run_when_connected<T, F, Fut>(&self, operation: F) -> ClResult<T>
    where
        T: Send + 'static,
        F: Fn(SessionInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ClResult<T>> + Send + 'static,
    {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(ClError::NotConnected);
        }

        let operation = Arc::new(operation);
        let state = self.inner.manager.state();
        if let ConnectionState::Failed { reason } = &state {
            return Err(ClError::FatalConnection(reason.clone()));
        }

        let queue_idle = self
            .inner
            .queue
            .lock()
            .map(|q| !q.draining && q.jobs.iter().all(|j| j.is_abandoned()))
            .unwrap_or(false);

        if let (Some(session), true) = (state.session(), queue_idle) {
            let result = with_timeout((operation.as_ref())(session.clone()), self.inner.request_timeout).await;
            match result {
                Err(e) if e.is_auth_error() => {
                    self.inner.refresh_after_auth_error(&e).await;
                    return self.park_and_wait(operation, true).await;
                }
                result => return result,
            }
        }

        self.park_and_wait(operation, false).await
    }

    async fn park_and_wait<T, F, Fut>(&self, operation: Arc<F>, retried: bool) -> ClResult<T>
    where
        T: Send + 'static,
        F: Fn(SessionInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ClResult<T>> + Send + 'static,
    {
        let (reply, result) = oneshot::channel();
        self.inner.park(Box::new(Job {
            operation,
            reply,
            retried,
        }));
        result
            .await
            .map_err(|_| ClError::Internal("parked request was dropped".into()))?
    }

    /// Parked requests still waiting for a connection.
    pub fn pending_count(&self) -> usize {
        self.inner
            .queue
            .lock()
            .map(|q| q.jobs.iter().filter(|j| !j.is_abandoned()).count())
            .unwrap_or(0)
    }
}

impl Service for RequestCoordinator {
    fn name(&self) -> &str {
        "request_coordinator"
    }

    fn state(&self) -> ServiceState {
        if self.inner.stopped.load(Ordering::SeqCst) {
            ServiceState::Stopped
        } else {
            ServiceState::Running
        }
    }

    /// Stop draining and fail everything still parked with `NotConnected`.
    fn shutdown(&self) -> ClResult<()> {
        let already = {
            // Flipped under the queue lock so a concurrent park sees it.
            let _queue = self.inner.queue.lock();
            self.inner.stopped.swap(true, Ordering::SeqCst)
        };
        if already {
            return Ok(());
        }
        if let Ok(mut task) = self.drain_task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
        self.inner.reject_all(ClError::NotConnected);
        info!("request coordinator stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cl_core::config::ClientConfig;
    use cl_socket::{ChannelTransport, Credentials};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn manager(transport: &ChannelTransport) -> ConnectionManager {
        let mut config = ClientConfig::new("ws://localhost:3030", "key-123");
        config.reconnect.base_delay_ms = 10;
        ConnectionManager::builder(config, Arc::new(transport.clone())).spawn()
    }

    #[tokio::test]
    async fn test_runs_immediately_when_connected() {
        let transport = ChannelTransport::new();
        let manager = manager(&transport);
        let coordinator = RequestCoordinator::new(manager.clone(), Duration::from_secs(1));

        manager.connect(Credentials::anonymous("alice")).await.unwrap();
        let peer = transport.next_peer().await.unwrap();
        peer.send_health_check("conn-1", json!({"id": "alice"})).await;
        manager.wait_until_connected(Duration::from_secs(1)).await.unwrap();

        let id = coordinator
            .run_when_connected(|session: SessionInfo| async move { Ok(session.connection_id) })
            .await
            .unwrap();
        assert_eq!(id, "conn-1");
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_request_times_out() {
        let transport = ChannelTransport::new();
        let manager = manager(&transport);
        let coordinator = RequestCoordinator::new(manager.clone(), Duration::from_millis(30));

        manager.connect(Credentials::anonymous("alice")).await.unwrap();
        let peer = transport.next_peer().await.unwrap();
        peer.send_health_check("conn-1", json!({"id": "alice"})).await;
        manager.wait_until_connected(Duration::from_secs(1)).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let result: ClResult<()> = coordinator
            .run_when_connected(move |_| {
                counted.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                }
            })
            .await;
        assert!(matches!(result, Err(ClError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disconnect_rejects_parked_requests() {
        let transport = ChannelTransport::new();
        transport.push_behavior(cl_socket::OpenBehavior::Hang);
        let manager = manager(&transport);
        let coordinator = RequestCoordinator::new(manager.clone(), Duration::from_secs(1));

        manager.connect(Credentials::anonymous("alice")).await.unwrap();
        let pending = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .run_when_connected(|_| async { Ok::<_, ClError>(()) })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(coordinator.pending_count(), 1);

        manager.disconnect().await;
        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ClError::NotConnected)));
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_requests() {
        let transport = ChannelTransport::new();
        let coordinator = RequestCoordinator::new(manager(&transport), Duration::from_secs(1));
        assert!(coordinator.is_healthy());

        coordinator.shutdown().unwrap();
        coordinator.shutdown().unwrap();
        assert_eq!(coordinator.state(), ServiceState::Stopped);

        let result = coordinator
            .run_when_connected(|_| async { Ok::<_, ClError>(()) })
            .await;
        assert!(matches!(result, Err(ClError::NotConnected)));
    }

    async fn wait_for_pending(coordinator: &RequestCoordinator, count: usize) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while coordinator.pending_count() < count {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_slow_replayed_request_does_not_block_new_ones() {
        let transport = ChannelTransport::new();
        let manager = manager(&transport);
        let coordinator = RequestCoordinator::new(manager.clone(), Duration::from_secs(5));

        let slow = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .run_when_connected(|_| async {
                        tokio::time::sleep(Duration::from_millis(800)).await;
                        Ok::<_, ClError>("slow")
                    })
                    .await
            })
        };
        wait_for_pending(&coordinator, 1).await;

        manager.connect(Credentials::anonymous("alice")).await.unwrap();
        let peer = transport.next_peer().await.unwrap();
        peer.send_health_check("conn-1", json!({"id": "alice"})).await;
        manager.wait_until_connected(Duration::from_secs(1)).await.unwrap();

        let quick = tokio::time::timeout(
            Duration::from_millis(400),
            coordinator.run_when_connected(|_| async { Ok::<_, ClError>("quick") }),
        )
        .await
        .expect("new request waited for the replayed one")
        .unwrap();
        assert_eq!(quick, "quick");
        assert!(!slow.is_finished());

        let slow = tokio::time::timeout(Duration::from_secs(2), slow)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(slow.unwrap(), "slow");
    }

    #[tokio::test]
    async fn test_park_after_shutdown_is_rejected() {
        let transport = ChannelTransport::new();
        let coordinator = RequestCoordinator::new(manager(&transport), Duration::from_secs(1));
        coordinator.shutdown().unwrap();

        let operation = Arc::new(|_: SessionInfo| async { Ok::<_, ClError>(()) });
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            coordinator.park_and_wait(operation, false),
        )
        .await
        .expect("parked request was left waiting after shutdown");
        assert!(matches!(result, Err(ClError::NotConnected)));
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_request_is_skipped() {
        let transport = ChannelTransport::new();
        let manager = manager(&transport);
        let coordinator = RequestCoordinator::new(manager.clone(), Duration::from_secs(1));
        let ran = Arc::new(AtomicBool::new(false));

        {
            let ran = ran.clone();
            let attempt = coordinator.run_when_connected(move |_| {
                ran.store(true, Ordering::SeqCst);
                async { Ok::<_, ClError>(()) }
            });
            // Give up before any connection exists.
            let _ = tokio::time::timeout(Duration::from_millis(20), attempt).await;
        }
        assert_eq!(coordinator.pending_count(), 0);

        manager.connect(Credentials::anonymous("alice")).await.unwrap();
        let peer = transport.next_peer().await.unwrap();
        peer.send_health_check("conn-1", json!({"id": "alice"})).await;
        manager.wait_until_connected(Duration::from_secs(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(!ran.load(Ordering::SeqCst));
    }
}
