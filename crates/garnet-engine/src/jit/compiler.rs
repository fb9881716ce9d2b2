//! Background compiler thread
//!
//! Compile requests are fed through a bounded crossbeam channel to a worker
//! thread that never touches the world: it only runs the backend and queues
//! the output. The unit holding the global lock installs finished results
//! (`State::install_compiled`).
//!
//! The worker must be quiesced explicitly around fork and exec:
//! - `pause` returns only once no compilation is in flight
//! - `on_fork` (child side) forgets the vanished thread and leaves the
//!   compiler paused and restartable
//! - `shutdown` stops and joins the thread

use crate::jit::backend::traits::{CodegenError, CompileOutput, CompileRequest, JitBackend};
use crate::vm::{VmError, VmResult};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, trace, warn};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Lifecycle of the compiler thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilerState {
    /// Accepting and compiling requests
    Running,
    /// Accepting requests, compiling none
    Paused,
    /// Shut down; accepts nothing
    Stopped,
}

/// One finished compilation
#[derive(Debug)]
pub struct CompileResult {
    /// The request that produced it
    pub request: CompileRequest,
    /// Backend output
    pub output: Result<CompileOutput, CodegenError>,
    /// Time spent in the backend
    pub elapsed: Duration,
}

#[derive(Debug)]
struct Control {
    state: CompilerState,
    busy: bool,
}

struct Inner {
    control: Mutex<Control>,
    changed: Condvar,
    results: Mutex<Vec<CompileResult>>,
    backend: Arc<dyn JitBackend>,
}

/// Compiles methods on a dedicated thread
pub struct BackgroundCompiler {
    inner: Arc<Inner>,
    sender: Mutex<Option<Sender<CompileRequest>>>,
    receiver: Mutex<Receiver<CompileRequest>>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    capacity: usize,
}

impl BackgroundCompiler {
    /// Create a paused compiler with no thread yet
    pub fn new(backend: Arc<dyn JitBackend>, capacity: usize) -> Self {
        let (sender, receiver) = channel::bounded(capacity);
        Self {
            inner: Arc::new(Inner {
                control: Mutex::new(Control {
                    state: CompilerState::Paused,
                    busy: false,
                }),
                changed: Condvar::new(),
                results: Mutex::new(Vec::new()),
                backend,
            }),
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(receiver),
            handle: Mutex::new(None),
            capacity,
        }
    }

    /// Name of the backend in use
    pub fn backend_name(&self) -> &str {
        self.inner.backend.name()
    }

    /// Current lifecycle state
    pub fn state(&self) -> CompilerState {
        self.inner.control.lock().state
    }

    /// Whether a worker thread is attached
    pub fn has_thread(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Start (or resume) compiling
    pub fn start(&self) -> VmResult<()> {
        self.unpause()
    }

    fn spawn_worker(&self) -> VmResult<()> {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Ok(());
        }
        let inner = self.inner.clone();
        let receiver = self.receiver.lock().clone();
        let spawned = thread::Builder::new()
            .name("garnet-jit".to_string())
            .spawn(move || Self::run_loop(inner, receiver))
            .map_err(|e| VmError::ResourceExhausted(format!("jit thread: {}", e)))?;
        *handle = Some(spawned);
        debug!("background compiler thread started");
        Ok(())
    }

    fn run_loop(inner: Arc<Inner>, receiver: Receiver<CompileRequest>) {
        loop {
            {
                let mut control = inner.control.lock();
                while control.state == CompilerState::Paused {
                    inner.changed.wait(&mut control);
                }
                if control.state == CompilerState::Stopped {
                    break;
                }
            }

            let request = match receiver.recv_timeout(POLL_INTERVAL) {
                Ok(request) => request,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            {
                let mut control = inner.control.lock();
                while control.state == CompilerState::Paused {
                    inner.changed.wait(&mut control);
                }
                if control.state == CompilerState::Stopped {
                    break;
                }
                control.busy = true;
            }

            let started = Instant::now();
            let output = inner.backend.compile(&request);
            let elapsed = started.elapsed();
            trace!(
                "compiled {} in {:?} ({})",
                request.method,
                elapsed,
                if output.is_ok() { "ok" } else { "failed" }
            );
            inner.results.lock().push(CompileResult {
                request,
                output,
                elapsed,
            });

            let mut control = inner.control.lock();
            control.busy = false;
            inner.changed.notify_all();
        }
        trace!("background compiler thread exiting");
    }

    /// Run the backend on the calling thread
    pub fn compile_inline(&self, request: &CompileRequest) -> (Result<CompileOutput, CodegenError>, Duration) {
        let started = Instant::now();
        let output = self.inner.backend.compile(request);
        (output, started.elapsed())
    }

    /// Queue a request; false if the compiler is stopped or the queue is full
    pub fn submit(&self, request: CompileRequest) -> bool {
        if self.state() == CompilerState::Stopped {
            return false;
        }
        let sender = self.sender.lock();
        match sender.as_ref().map(|s| s.try_send(request)) {
            Some(Ok(())) => true,
            Some(Err(TrySendError::Full(_))) => {
                warn!("jit queue full ({} requests), dropping request", self.capacity);
                false
            }
            Some(Err(TrySendError::Disconnected(_))) | None => false,
        }
    }

    /// Stop compiling; returns once no compilation is in flight
    pub fn pause(&self) {
        let mut control = self.inner.control.lock();
        if control.state == CompilerState::Stopped {
            return;
        }
        control.state = CompilerState::Paused;
        self.inner.changed.notify_all();
        while control.busy {
            self.inner.changed.wait(&mut control);
        }
    }

    /// Resume compiling, respawning the worker if it is gone
    pub fn unpause(&self) -> VmResult<()> {
        {
            let mut control = self.inner.control.lock();
            if control.state == CompilerState::Stopped {
                return Ok(());
            }
            control.state = CompilerState::Running;
            self.inner.changed.notify_all();
        }
        self.spawn_worker()
    }

    /// Stop and join the worker; queued requests are discarded
    pub fn shutdown(&self) {
        {
            let mut control = self.inner.control.lock();
            control.state = CompilerState::Stopped;
            self.inner.changed.notify_all();
        }
        self.sender.lock().take();
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                warn!("background compiler thread panicked");
            }
        }
    }

    /// Bring a stopped compiler back to the paused state with a fresh queue
    pub fn restart(&self) -> VmResult<()> {
        self.shutdown();
        self.reset_channel();
        self.inner.control.lock().state = CompilerState::Paused;
        self.unpause()
    }

    fn reset_channel(&self) {
        let (sender, receiver) = channel::bounded(self.capacity);
        *self.sender.lock() = Some(sender);
        *self.receiver.lock() = receiver;
    }

    /// Child side of fork: the worker thread does not exist here.
    ///
    /// Locks the vanished worker may have held at the fork are released,
    /// the handle is forgotten rather than joined, the queue is replaced
    /// (the old one may be mid-operation in the vanished thread) and a
    /// running or paused compiler is left paused, ready for `unpause`.
    pub fn on_fork(&self) {
        if self.inner.control.is_locked() {
            // SAFETY: the only other user of these locks is the worker
            // thread, which did not survive the fork.
            unsafe { self.inner.control.force_unlock() };
        }
        if self.inner.results.is_locked() {
            // SAFETY: as above.
            unsafe { self.inner.results.force_unlock() };
        }

        if let Some(handle) = self.handle.lock().take() {
            std::mem::forget(handle);
        }

        let (sender, receiver) = channel::bounded(self.capacity);
        if let Some(old) = self.sender.lock().replace(sender) {
            std::mem::forget(old);
        }
        let old = std::mem::replace(&mut *self.receiver.lock(), receiver);
        std::mem::forget(old);

        let mut control = self.inner.control.lock();
        control.busy = false;
        if control.state != CompilerState::Stopped {
            control.state = CompilerState::Paused;
        }
    }

    /// Take every finished result
    pub fn drain_results(&self) -> Vec<CompileResult> {
        std::mem::take(&mut *self.inner.results.lock())
    }

    /// Block until `count` results are waiting or `timeout` passes.
    /// Returns whether the count was reached.
    pub fn wait_for_results(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.inner.results.lock().len() >= count {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl Drop for BackgroundCompiler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
