//! Background thread applying spatializer reconfigurations.
//!
//! Monitors run on the render thread, where building nodes and editing the graph is not
//! allowed. When one notices its spatializer should be using different components it
//! queues a [`ReconfigureRequest`]; this worker picks requests up in order and performs
//! the swap.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::mixer::MixerInner;
use crate::spatial::ComponentId;

/// Swap a mixer's panner and/or attenuator.
///
/// For each role, `None` leaves the slot alone and `Some(None)` empties it, which is what
/// happens when the registry has nothing enabled for that role.
///
/// The request holds a counted reference to the mixer, so a mixer released while its
/// request waits is still alive when the worker gets to it.
pub(crate) struct ReconfigureRequest {
    pub(crate) mixer: Arc<MixerInner>,
    pub(crate) panner: Option<Option<ComponentId>>,
    pub(crate) attenuator: Option<Option<ComponentId>>,
}

#[derive(Default)]
struct Idle {
    lock: Mutex<()>,
    done: Condvar,
}

/// Sending side of the reconfiguration FIFO, plus the count of requests not yet finished.
#[derive(Clone)]
pub(crate) struct ReconfigureQueue {
    sender: Sender<ReconfigureRequest>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Idle>,
}

impl ReconfigureQueue {
    pub(crate) fn is_full(&self) -> bool {
        self.sender.is_full()
    }

    /// Never blocks. Hands the request back when the queue is full, so the render thread
    /// never ends up dropping it.
    pub(crate) fn try_push(&self, request: ReconfigureRequest) -> std::result::Result<(), ReconfigureRequest> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        match self.sender.try_send(request) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(request)) | Err(TrySendError::Disconnected(request)) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                Err(request)
            }
        }
    }

    /// Blocks while the queue is full. For caller threads only.
    pub(crate) fn push(&self, request: ReconfigureRequest) -> Result<()> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.sender.send(request).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            Error::Backend("reconfiguration worker has stopped".into())
        })
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    fn finish_one(&self) {
        let _guard = self.idle.lock.lock();
        self.pending.fetch_sub(1, Ordering::AcqRel);
        self.idle.done.notify_all();
    }

    /// Block until every queued request has been applied.
    pub(crate) fn wait_idle(&self) {
        let mut guard = self.idle.lock.lock();
        while self.pending.load(Ordering::Acquire) > 0 {
            self.idle.done.wait(&mut guard);
        }
    }
}

pub(crate) struct Worker {
    queue: ReconfigureQueue,
    shutdown: Sender<()>,
    thread: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl Worker {
    pub(crate) fn spawn(capacity: usize) -> Result<Self> {
        let (sender, requests) = bounded(capacity);
        let (shutdown, shutdown_rx) = bounded(1);
        let queue = ReconfigureQueue {
            sender,
            pending: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Idle::default()),
        };

        let worker_queue = queue.clone();
        let thread = std::thread::Builder::new()
            .name("klangraum-reconfigure".into())
            .spawn(move || run(requests, shutdown_rx, worker_queue))
            .map_err(|e| Error::Backend(format!("failed to spawn reconfiguration worker: {e}")))?;
        let thread_id = thread.thread().id();
        debug!(capacity, "reconfiguration worker started");

        Ok(Self {
            queue,
            shutdown,
            thread: Some(thread),
            thread_id,
        })
    }

    pub(crate) fn queue(&self) -> &ReconfigureQueue {
        &self.queue
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let _ = self.shutdown.try_send(());
        // The last engine handle can be released by a request the worker is running.
        if std::thread::current().id() == self.thread_id {
            return;
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        debug!("reconfiguration worker stopped");
    }
}

fn run(requests: Receiver<ReconfigureRequest>, shutdown: Receiver<()>, queue: ReconfigureQueue) {
    loop {
        select! {
            recv(requests) -> request => match request {
                Ok(request) => {
                    apply(request);
                    queue.finish_one();
                }
                Err(_) => break,
            },
            recv(shutdown) -> _ => break,
        }
    }
}

fn apply(request: ReconfigureRequest) {
    let spatializer = request.mixer.spatializer();
    trace!(panner = ?request.panner, attenuator = ?request.attenuator, "applying reconfiguration");
    if let Some(id) = request.panner {
        if let Err(e) = spatializer.switch_panner(id) {
            warn!(?id, error = %e, "panner swap failed");
        }
    }
    if let Some(id) = request.attenuator {
        if let Err(e) = spatializer.switch_attenuator(id) {
            warn!(?id, error = %e, "attenuator swap failed");
        }
    }
    spatializer.reconfiguration_done();
}
