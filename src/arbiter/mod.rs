// Serial Access Arbiter
// Single-owner FIFO queue for everything that touches the device

pub mod cancel;
pub mod events;
pub mod settings;

pub use cancel::{checkpoint, pause, CancelToken};
pub use events::{ArbiterEvent, Ticket};
pub use settings::{ArbiterSettings, TaskOptions};

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::device::{ConnectParams, ConsoleLauncher, ConsoleSession, DeviceError, DeviceTransport};
use crate::error::{Result, SyncError};

type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

struct Job {
    ticket: Ticket,
    /// Console control jobs are never dropped by preemption
    preemptible: bool,
    /// Second argument is true when the job was preempted while queued
    run: Box<dyn FnOnce(Arc<Inner>, bool) -> JobFuture + Send>,
}

#[derive(Default)]
struct ConsoleSlot {
    session: Option<Box<dyn ConsoleSession>>,
    params: Option<ConnectParams>,
    /// Closed by the arbiter and waiting to be reopened
    suspended: bool,
}

struct Inner {
    transport: Arc<dyn DeviceTransport>,
    launcher: Option<Arc<dyn ConsoleLauncher>>,
    settings: ArbiterSettings,
    console: Mutex<ConsoleSlot>,
    /// Tickets below this value are dropped when dequeued
    epoch: AtomicU64,
    next_ticket: AtomicU64,
    skip_idle_once: AtomicBool,
    /// Token of the task currently running, replaced when the next one starts
    current: parking_lot::Mutex<CancelToken>,
    events: broadcast::Sender<ArbiterEvent>,
}

/// Serializes device access.
///
/// Tasks run one at a time in submission order on a dedicated worker. Each
/// task gets the console suspended around it and a handshake before it.
/// Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct Arbiter {
    inner: Arc<Inner>,
    jobs: mpsc::UnboundedSender<Job>,
}

impl Arbiter {
    pub fn new(transport: Arc<dyn DeviceTransport>, settings: ArbiterSettings) -> Self {
        Self::build(transport, None, settings)
    }

    /// Arbiter that can also own an interactive console
    pub fn with_console(
        transport: Arc<dyn DeviceTransport>,
        launcher: Arc<dyn ConsoleLauncher>,
        settings: ArbiterSettings,
    ) -> Self {
        Self::build(transport, Some(launcher), settings)
    }

    fn build(
        transport: Arc<dyn DeviceTransport>,
        launcher: Option<Arc<dyn ConsoleLauncher>>,
        settings: ArbiterSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        let inner = Arc::new(Inner {
            transport,
            launcher,
            settings,
            console: Mutex::new(ConsoleSlot::default()),
            epoch: AtomicU64::new(0),
            next_ticket: AtomicU64::new(0),
            skip_idle_once: AtomicBool::new(false),
            current: parking_lot::Mutex::new(CancelToken::new()),
            events,
        });

        let (jobs, receiver) = mpsc::unbounded_channel();
        tokio::spawn(worker(inner.clone(), receiver));

        Self { inner, jobs }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ArbiterEvent> {
        self.inner.events.subscribe()
    }

    /// Queue `task` and wait for its result.
    ///
    /// The task receives the transport only once it owns the device. With
    /// `options.preempt` every task queued earlier resolves with
    /// [`SyncError::Preempted`].
    pub async fn run<T, F, Fut>(&self, options: TaskOptions, task: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn DeviceTransport>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::SeqCst);
        if options.preempt {
            self.inner.epoch.fetch_max(ticket, Ordering::SeqCst);
        }

        let (done, result) = oneshot::channel();
        let job = Job {
            ticket,
            preemptible: true,
            run: Box::new(move |inner: Arc<Inner>, preempted: bool| -> JobFuture {
                Box::pin(async move {
                    let outcome = if preempted {
                        debug!(ticket, "task preempted");
                        inner.emit(ArbiterEvent::Preempted { ticket });
                        Err(SyncError::Preempted)
                    } else {
                        inner.lifecycle(ticket, options, task).await
                    };
                    let _ = done.send(outcome);
                })
            }),
        };

        self.inner.emit(ArbiterEvent::Queued { ticket });
        self.jobs
            .send(job)
            .map_err(|_| SyncError::TaskAborted("arbiter worker stopped".to_string()))?;

        result
            .await
            .map_err(|_| SyncError::TaskAborted("task dropped before completion".to_string()))?
    }

    /// Skip the handshake and idle delay for the next task only
    pub fn skip_idle_once(&self) {
        self.inner.skip_idle_once.store(true, Ordering::SeqCst);
    }

    /// Cancel the running task. Its waits end early, its in-flight transport
    /// call is killed and it resolves with `Cancelled`.
    pub fn cancel_running(&self) {
        info!("cancelling running device task");
        self.inner.current.lock().cancel();
        self.inner.transport.cancel();
    }

    /// Drop everything queued and cancel the running task
    pub fn cancel_all(&self) {
        let issued = self.inner.next_ticket.load(Ordering::SeqCst);
        self.inner.epoch.fetch_max(issued, Ordering::SeqCst);
        self.cancel_running();
    }

    /// Open the interactive console. An open console is closed first.
    ///
    /// Waits behind queued tasks so a console never opens while a task owns
    /// the device.
    pub async fn open_console(&self, params: ConnectParams) -> Result<()> {
        let launcher = self
            .inner
            .launcher
            .clone()
            .ok_or(DeviceError::Unsupported("console"))?;

        self.control(move |inner| async move {
            let mut slot = inner.console.lock().await;
            if let Some(mut session) = slot.session.take() {
                session.close().await?;
            }

            let session = launcher.open(&params).await?;
            slot.session = Some(session);
            slot.params = Some(params);
            slot.suspended = false;
            Ok(())
        })
        .await
    }

    /// Close the console and stop it from being reopened after tasks
    pub async fn close_console(&self) -> Result<()> {
        self.control(|inner| async move {
            let mut slot = inner.console.lock().await;
            slot.suspended = false;
            slot.params = None;
            if let Some(mut session) = slot.session.take() {
                session.close().await?;
            }
            Ok(())
        })
        .await
    }

    /// Run `op` on the worker between tasks, without handshake or events
    async fn control<T, F, Fut>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Inner>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (done, result) = oneshot::channel();
        let job = Job {
            ticket: self.inner.next_ticket.load(Ordering::SeqCst),
            preemptible: false,
            run: Box::new(move |inner: Arc<Inner>, _preempted: bool| -> JobFuture {
                Box::pin(async move {
                    let _ = done.send(op(inner).await);
                })
            }),
        };

        self.jobs
            .send(job)
            .map_err(|_| SyncError::TaskAborted("arbiter worker stopped".to_string()))?;
        result
            .await
            .map_err(|_| SyncError::TaskAborted("console job dropped before completion".to_string()))?
    }

    pub async fn console_is_open(&self) -> bool {
        let slot = self.inner.console.lock().await;
        slot.session.as_ref().is_some_and(|s| s.is_open())
    }

    /// Forward raw input to the console
    pub async fn send_to_console(&self, bytes: &[u8], newline: bool) -> Result<()> {
        let mut slot = self.inner.console.lock().await;
        let session = slot
            .session
            .as_mut()
            .ok_or_else(|| DeviceError::NotResponding("console is not open".to_string()))?;
        session.send_raw(bytes, newline).await?;
        Ok(())
    }
}

async fn worker(inner: Arc<Inner>, mut jobs: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = jobs.recv().await {
        let preempted = job.preemptible && job.ticket < inner.epoch.load(Ordering::SeqCst);
        (job.run)(inner.clone(), preempted).await;
    }
    debug!("arbiter worker stopped");
}

impl Inner {
    fn emit(&self, event: ArbiterEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn lifecycle<T, F, Fut>(&self, ticket: Ticket, options: TaskOptions, task: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn DeviceTransport>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let token = CancelToken::new();
        *self.current.lock() = token.clone();

        let suspended = self.suspend_console().await;

        let result = self.prepare_and_run(ticket, options, task, token).await;
        self.emit(ArbiterEvent::Finished {
            ticket,
            ok: result.is_ok(),
        });

        if suspended {
            self.resume_console().await;
        }

        result
    }

    async fn prepare_and_run<T, F, Fut>(
        &self,
        ticket: Ticket,
        options: TaskOptions,
        task: F,
        token: CancelToken,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn DeviceTransport>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let skip_once = self.skip_idle_once.swap(false, Ordering::SeqCst);
        if !(options.skip_idle || skip_once) {
            self.handshake(ticket, options.reset_first, &token).await?;
            token.sleep(self.settings.idle_delay).await?;
        }
        if token.is_cancelled() {
            return Err(DeviceError::Cancelled.into());
        }

        self.emit(ArbiterEvent::Running { ticket });

        // A panic in the task body must not skip console resume
        tokio::spawn(token.scope(task(self.transport.clone())))
            .await
            .map_err(|e| {
                if e.is_panic() {
                    SyncError::TaskAborted("device task panicked".to_string())
                } else {
                    SyncError::TaskAborted(e.to_string())
                }
            })?
    }

    async fn handshake(&self, ticket: Ticket, reset_first: bool, token: &CancelToken) -> Result<()> {
        let attempts = self.settings.handshake_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            if token.is_cancelled() {
                return Err(DeviceError::Cancelled.into());
            }
            self.emit(ArbiterEvent::Handshake { ticket, attempt });

            match self.ping(reset_first && attempt == 1).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!(attempt, error = %e, "device handshake failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        token.sleep(self.settings.handshake_backoff).await?;
                    }
                }
            }
        }

        Err(SyncError::Handshake {
            attempts,
            source: last_error
                .unwrap_or_else(|| DeviceError::NotResponding("no handshake attempted".to_string())),
        })
    }

    async fn ping(&self, reset: bool) -> std::result::Result<(), DeviceError> {
        if reset {
            self.transport.reset().await?;
        }
        // A missing root still proves the board is answering
        match self.transport.list(&self.settings.handshake_path).await {
            Ok(_) | Err(DeviceError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Close an open console. Returns true when it has to be reopened.
    async fn suspend_console(&self) -> bool {
        if !self.settings.auto_suspend {
            return false;
        }

        {
            let mut slot = self.console.lock().await;
            let open = slot.session.as_ref().is_some_and(|s| s.is_open());
            if !open {
                return false;
            }

            if let Some(mut session) = slot.session.take() {
                if let Err(e) = session.close().await {
                    warn!(error = %e, "closing console failed");
                }
            }
            slot.suspended = true;
        }

        debug!("console suspended");
        self.emit(ArbiterEvent::ConsoleSuspended);
        tokio::time::sleep(self.settings.console_settle).await;
        true
    }

    async fn resume_console(&self) {
        let mut slot = self.console.lock().await;
        if !slot.suspended {
            return;
        }
        slot.suspended = false;

        let (Some(launcher), Some(params)) = (self.launcher.clone(), slot.params.clone()) else {
            return;
        };

        match launcher.open(&params).await {
            Ok(session) => {
                slot.session = Some(session);
                debug!("console resumed");
                self.emit(ArbiterEvent::ConsoleResumed);
            }
            Err(e) => {
                warn!(error = %e, "reopening console failed");
                self.emit(ArbiterEvent::ConsoleResumeFailed {
                    error: e.to_string(),
                });
            }
        }
    }
}
