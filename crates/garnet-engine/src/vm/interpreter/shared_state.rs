//! Shared runtime state and per-unit execution state
//!
//! `SharedState` exists once per process. It owns the global execution lock
//! and the `World` that lock protects, plus the pieces that live outside
//! the lock (background compiler, signal registry, options).
//!
//! `State` exists once per execution unit (thread). It is the capability
//! through which a unit takes the lock and reaches the world.

use crate::jit::backend::{JitBackend, StubBackend};
use crate::jit::compiler::{BackgroundCompiler, CompileResult, CompilerState};
use crate::jit::runtime::{CodeCache, CodeManager, ResourceId};
use crate::jit::CompileRequest;
use crate::vm::config::VmOptions;
use crate::vm::dispatch::DispatchCaches;
use crate::vm::gc::{Collector, GcStats, HandleRoots, Heap};
use crate::vm::model::ObjectModel;
use crate::vm::object::{ExecutableKind, NativeFn, NativeMethod};
use crate::vm::process::{GlobalLock, LockStatus, SignalRegistry};
use crate::vm::symbol::{Symbol, SymbolTable};
use crate::vm::value::{ObjectRef, Value};
use crate::vm::{MissingReason, VmError, VmResult};
use log::{debug, trace, warn};
use rustc_hash::FxHashMap;
use std::cell::{Cell, UnsafeCell};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_UNIT: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static UNIT: UnitId = UnitId(NEXT_UNIT.fetch_add(1, Ordering::Relaxed));
    static HAS_STATE: Cell<bool> = const { Cell::new(false) };
}

/// Identity of an execution unit (one per OS thread)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(u64);

impl UnitId {
    /// The unit of the calling thread
    pub fn current() -> UnitId {
        UNIT.with(|unit| *unit)
    }

    /// Numeric id
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Everything guarded by the global execution lock
pub struct World {
    /// Managed object heap
    pub heap: Heap,
    /// Interned names
    pub symbols: SymbolTable,
    /// Classes, modules and method tables
    pub model: ObjectModel,
    /// Global and call-site caches plus the method serial
    pub caches: DispatchCaches,
    /// Registered code resources
    pub code: CodeManager,
    /// Function-dispatch table for compiled code
    pub code_cache: CodeCache,
    /// Handle tables of live foreign call contexts
    pub handle_roots: HandleRoots,
    /// Extra roots kept alive by the embedder
    pub globals: Vec<Value>,
    /// Collector statistics
    pub gc_stats: GcStats,
    primitives: FxHashMap<Symbol, NativeMethod>,
}

impl World {
    /// Bootstrap a world
    pub fn new(options: &VmOptions) -> Self {
        let mut symbols = SymbolTable::new();
        let model = ObjectModel::new(&mut symbols);
        Self {
            heap: Heap::new(options.heap_limit),
            symbols,
            model,
            caches: DispatchCaches::new(),
            code: CodeManager::new(),
            code_cache: CodeCache::new(options.code_cache_size),
            handle_roots: HandleRoots::new(),
            globals: Vec::new(),
            gc_stats: GcStats::default(),
            primitives: FxHashMap::default(),
        }
    }

    /// Implementation of a named primitive
    pub fn primitive(&self, name: Symbol) -> Option<NativeMethod> {
        self.primitives.get(&name).copied()
    }

    /// Register a named primitive
    pub fn register_primitive(&mut self, name: &str, arity: i32, func: NativeFn) -> Symbol {
        let sym = self.symbols.intern(name);
        self.primitives.insert(sym, NativeMethod { arity, func });
        sym
    }

    /// Keep `value` alive across collections; returns its root index
    pub fn add_global_root(&mut self, value: Value) -> usize {
        self.globals.push(value);
        self.globals.len() - 1
    }

    fn install(&mut self, result: CompileResult) -> Option<ResourceId> {
        let CompileResult {
            request,
            output,
            elapsed,
        } = result;
        let output = match output {
            Ok(output) => output,
            Err(e) => {
                debug!("compilation of {} failed: {}", request.method, e);
                return None;
            }
        };

        // The method may have been redefined or moved by a collection while
        // the request was in flight; addresses are never reused.
        let current = self
            .heap
            .executable(request.method)
            .map(|exec| exec.serial)
            .ok();
        if current != Some(request.serial) {
            debug!("discarding stale compilation of {}", request.method);
            return None;
        }
        if output
            .runtime_data
            .iter()
            .any(|rd| !self.heap.contains(rd.method))
        {
            debug!("discarding compilation of {} with moved callees", request.method);
            return None;
        }

        let code_size = output.artifact.code_size();
        let id = self
            .code
            .register(&self.code_cache, output.artifact, request.serial);
        if let Some(holder) = self.code.holder_mut(id) {
            for rd in &output.runtime_data {
                holder.add_runtime_data(rd.method, rd.name, rd.module);
            }
        }
        self.code.record_compile(code_size, elapsed);

        for rd in &output.runtime_data {
            if rd.method == request.method {
                continue;
            }
            if let Ok(callee) = self.heap.executable_mut(rd.method) {
                if !callee.inliners.contains(&request.method) {
                    callee.inliners.push(request.method);
                }
            }
        }

        if let Ok(exec) = self.heap.executable_mut(request.method) {
            if let Some(old) = exec.jit.replace(id) {
                self.code_cache.invalidate(old);
            }
        }
        debug!(
            "installed {} for {} ({} bytes)",
            id, request.method, code_size
        );
        Some(id)
    }

    fn compile_request(&self, method: ObjectRef) -> VmResult<CompileRequest> {
        let exec = self.heap.executable(method)?;
        let ExecutableKind::Bytecode { code, literals } = &exec.kind else {
            return Err(VmError::TypeError(format!(
                "{} is not a bytecode method",
                self.symbols.resolve(exec.name)
            )));
        };

        let inline_candidates = literals
            .iter()
            .filter_map(Value::as_object)
            .filter_map(|callee| {
                let callee_exec = self.heap.executable(callee).ok()?;
                Some(crate::jit::RuntimeData {
                    method: callee,
                    name: callee_exec.name,
                    module: callee_exec.scope?,
                })
            })
            .collect();

        Ok(CompileRequest {
            method,
            name: exec.name,
            module: exec.scope,
            serial: exec.serial,
            bytecode: code.clone(),
            layout: exec.specialized_for,
            inline_candidates,
        })
    }
}

/// Process-wide runtime state
pub struct SharedState {
    lock: GlobalLock,
    world: UnsafeCell<World>,
    compiler: BackgroundCompiler,
    signals: SignalRegistry,
    options: VmOptions,
}

// SAFETY: the world is only reached through `State::world`, which requires
// holding the global lock. Everything else is internally synchronised.
unsafe impl Sync for SharedState {}
unsafe impl Send for SharedState {}

impl SharedState {
    /// Create runtime state with the stub JIT backend
    pub fn new(options: VmOptions) -> Arc<Self> {
        Self::with_backend(options, Arc::new(StubBackend))
    }

    /// Create runtime state with a specific JIT backend
    pub fn with_backend(options: VmOptions, backend: Arc<dyn JitBackend>) -> Arc<Self> {
        let compiler = BackgroundCompiler::new(backend, options.jit_queue_capacity);
        if options.jit_enabled && options.jit_background {
            if let Err(e) = compiler.start() {
                warn!("background compiler unavailable, compiling inline: {}", e);
            }
        }
        debug!(
            "runtime created (jit: {}, backend: {})",
            options.jit_enabled,
            compiler.backend_name()
        );
        Arc::new(Self {
            lock: GlobalLock::new(),
            world: UnsafeCell::new(World::new(&options)),
            compiler,
            signals: SignalRegistry::new(),
            options,
        })
    }

    /// The global execution lock
    pub fn lock(&self) -> &GlobalLock {
        &self.lock
    }

    /// The background compiler
    pub fn compiler(&self) -> &BackgroundCompiler {
        &self.compiler
    }

    /// Process-level signal registration
    pub fn signals(&self) -> &SignalRegistry {
        &self.signals
    }

    /// Runtime options
    pub fn options(&self) -> &VmOptions {
        &self.options
    }
}

/// Execution state of one unit
pub struct State {
    shared: Arc<SharedState>,
    unit: UnitId,
    locked: bool,
    missing_reason: MissingReason,
    _not_send: PhantomData<*const ()>,
}

impl State {
    /// Attach the calling thread to `shared` and take the global lock.
    ///
    /// Fails if this thread already has a `State`.
    pub fn new(shared: Arc<SharedState>) -> VmResult<Self> {
        if HAS_STATE.with(|has| has.replace(true)) {
            return Err(VmError::RuntimeError(
                "execution unit already has a state".to_string(),
            ));
        }
        let unit = UnitId::current();
        shared.lock.lock(unit);
        Ok(Self {
            shared,
            unit,
            locked: true,
            missing_reason: MissingReason::None,
            _not_send: PhantomData,
        })
    }

    /// Shared runtime state
    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    /// This unit's id
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// Runtime options
    pub fn options(&self) -> &VmOptions {
        &self.shared.options
    }

    /// The world. The unit must hold the global lock.
    pub fn world(&mut self) -> &mut World {
        assert!(self.locked, "world accessed without the global lock");
        // SAFETY: holding the lock makes this unit the only one reaching the
        // world, and `&mut self` makes this the only borrow on the unit.
        unsafe { &mut *self.shared.world.get() }
    }

    /// Whether this unit holds the global lock
    pub fn holds_lock(&self) -> bool {
        self.locked
    }

    /// Run `f` with the global lock released, reacquiring it afterwards.
    /// `f` cannot reach managed state.
    pub fn without_lock<R>(&mut self, f: impl FnOnce() -> R) -> R {
        self.release_lock();
        let result = f();
        self.acquire_lock();
        result
    }

    pub(crate) fn release_lock(&mut self) -> LockStatus {
        let status = self.shared.lock.unlock(self.unit);
        self.locked = false;
        status
    }

    pub(crate) fn acquire_lock(&mut self) -> LockStatus {
        let status = self.shared.lock.lock(self.unit);
        self.locked = true;
        status
    }

    pub(crate) fn note_locked(&mut self) {
        self.locked = true;
    }

    /// Why the most recent dispatch check failed
    pub fn method_missing_reason(&self) -> MissingReason {
        self.missing_reason
    }

    pub(crate) fn set_missing_reason(&mut self, reason: MissingReason) {
        self.missing_reason = reason;
    }

    /// Run a full collection
    pub fn collect_garbage(&mut self) -> GcStats {
        Collector::collect(self.world())
    }

    /// Compile `method`.
    ///
    /// With the background compiler running, the request is queued and
    /// `Ok(None)` returned; the code is installed by a later
    /// `install_compiled`. Otherwise the method is compiled on this thread
    /// and the new resource returned (`None` if the backend declined).
    pub fn compile_method(&mut self, method: ObjectRef) -> VmResult<Option<ResourceId>> {
        if !self.options().jit_enabled {
            return Ok(None);
        }
        let request = self.world().compile_request(method)?;
        let shared = self.shared.clone();

        if shared.compiler.state() == CompilerState::Running && shared.compiler.submit(request.clone())
        {
            trace!("queued {} for background compilation", method);
            return Ok(None);
        }

        let (output, elapsed) = shared.compiler.compile_inline(&request);
        Ok(self.world().install(CompileResult {
            request,
            output,
            elapsed,
        }))
    }

    /// Install every finished background compilation; returns how many
    /// produced a code resource
    pub fn install_compiled(&mut self) -> usize {
        let results = self.shared.compiler.drain_results();
        let world = self.world();
        results
            .into_iter()
            .filter_map(|result| world.install(result))
            .count()
    }

    /// Watch `sig`, recording deliveries for `take_pending_signals`
    pub fn watch_signal(&self, sig: i32) -> bool {
        self.shared.signals.watch(sig)
    }

    /// Signals delivered since the last call
    pub fn take_pending_signals(&self) -> Vec<i32> {
        self.shared.signals.take_pending_signals()
    }
}

impl Drop for State {
    fn drop(&mut self) {
        if self.locked {
            self.shared.lock.unlock(self.unit);
        }
        HAS_STATE.with(|has| has.set(false));
    }
}
