//! Partitioned pool of warm execution contexts.
//!
//! Creating an interpreter and evaluating a plugin's source is the
//! expensive part of a guest call, so contexts are kept and reused. The
//! registry is split into sub-pools keyed by [`PoolKey`]; a context is
//! only ever reused for the same program, the same target function and the
//! same set of injected global names.
//!
//! ```text
//! Pool ── Mutex<HashMap<PoolKey, Arc<Subpool>>>   (lookup-or-create only)
//!           │
//!           └─ Subpool ── Mutex<Vec<ExecutionContext>>  (idle contexts)
//!                 checkout() -> Lease ──drop──> checkin()
//! ```
//!
//! A [`Lease`] owns its context exclusively, so no two calls ever run
//! inside the same interpreter at the same time.

use crate::ambient;
use crate::error::{RuntimeError, RuntimeResult};
use crate::globals::Globals;
use crate::invoke::describe;
use crate::program::Program;
use rquickjs::context::EvalOptions;
use rquickjs::{CatchResultExt, Context, Ctx, Runtime};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tracing::{debug, error, trace};

/// Default number of idle contexts kept per sub-pool.
pub const DEFAULT_MAX_IDLE: usize = 8;

/// Default interpreter memory limit (64 MiB).
pub const DEFAULT_MEMORY_LIMIT: usize = 64 * 1024 * 1024;

/// Default interpreter stack size (1 MiB).
pub const DEFAULT_MAX_STACK_SIZE: usize = 1024 * 1024;

/// Tuning for contexts created by a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Idle contexts retained per sub-pool; extra contexts are dropped on check-in.
    pub max_idle: usize,
    /// Per-interpreter memory limit in bytes, `0` for unlimited.
    pub memory_limit: usize,
    /// Per-interpreter stack size in bytes, `0` for the engine default.
    pub max_stack_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle: DEFAULT_MAX_IDLE,
            memory_limit: DEFAULT_MEMORY_LIMIT,
            max_stack_size: DEFAULT_MAX_STACK_SIZE,
        }
    }
}

/// Partition key for the context pool.
///
/// Built from the program identity, the target function and the sorted
/// *names* of the injected globals. Global values are not part of the key:
/// a sub-pool's contexts keep the values they were created with, so
/// injected globals must be call-site-invariant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    program: String,
    function: String,
    globals: Vec<String>,
}

impl PoolKey {
    /// Build a key for `function` in `program` with the given globals.
    pub fn new(program: &Program, function: &str, globals: &Globals) -> Self {
        Self {
            program: program.identity().to_string(),
            function: function.to_string(),
            globals: globals.names(),
        }
    }

    /// Program identity.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Target function name.
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Sorted injected global names.
    pub fn globals(&self) -> &[String] {
        &self.globals
    }
}

/// One initialized interpreter.
///
/// Has evaluated its program's source and installed its globals exactly once.
pub struct ExecutionContext {
    // Dropped before `runtime`.
    context: Context,
    #[allow(dead_code)]
    runtime: Runtime,
    serial: usize,
}

impl ExecutionContext {
    /// Construction sequence number within its sub-pool (1-based).
    pub fn serial(&self) -> usize {
        self.serial
    }

    /// Run `f` inside this context.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: for<'js> FnOnce(Ctx<'js>) -> R,
    {
        self.context.with(f)
    }
}

/// Reusable contexts for a single [`PoolKey`].
pub struct Subpool {
    key: PoolKey,
    program: Arc<Program>,
    globals: Globals,
    config: PoolConfig,
    idle: Mutex<Vec<ExecutionContext>>,
    created: AtomicUsize,
}

impl Subpool {
    fn new(key: PoolKey, program: Arc<Program>, globals: Globals, config: PoolConfig) -> Self {
        Self {
            key,
            program,
            globals,
            config,
            idle: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
        }
    }

    /// Key this sub-pool serves.
    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    /// Number of contexts this sub-pool has constructed.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Number of idle contexts ready for reuse.
    pub fn idle(&self) -> usize {
        lock(&self.idle).len()
    }

    /// Borrow a context, reusing an idle one or constructing a new one.
    ///
    /// The context returns to this sub-pool when the lease is dropped.
    pub fn checkout(self: &Arc<Self>) -> RuntimeResult<Lease> {
        let reused = lock(&self.idle).pop();
        let context = match reused {
            Some(context) => context,
            None => self.create()?,
        };
        trace!(program = %self.key.program, function = %self.key.function, serial = context.serial, "Checked out context");

        Ok(Lease {
            context: Some(context),
            subpool: Arc::clone(self),
        })
    }

    fn checkin(&self, context: ExecutionContext) {
        let mut idle = lock(&self.idle);
        if idle.len() < self.config.max_idle {
            idle.push(context);
        } else {
            debug!(program = %self.key.program, function = %self.key.function, serial = context.serial, "Evicting surplus context");
        }
    }

    fn create(&self) -> RuntimeResult<ExecutionContext> {
        let identity = self.program.identity();
        let init_error = |message: String| {
            error!(program = %identity, function = %self.key.function, "Execution context setup failed: {}", message);
            RuntimeError::ContextInit {
                identity: identity.to_string(),
                message,
            }
        };

        let runtime = Runtime::new().map_err(|e| init_error(e.to_string()))?;
        if self.config.memory_limit > 0 {
            runtime.set_memory_limit(self.config.memory_limit);
        }
        if self.config.max_stack_size > 0 {
            runtime.set_max_stack_size(self.config.max_stack_size);
        }
        let context = Context::full(&runtime).map_err(|e| init_error(e.to_string()))?;

        context.with(|ctx| -> RuntimeResult<()> {
            ambient::install(&ctx, identity)
                .catch(&ctx)
                .map_err(|e| init_error(describe(e)))?;

            let mut options = EvalOptions::default();
            options.strict = false;
            ctx.eval_with_options::<(), _>(self.program.source(), options)
                .catch(&ctx)
                .map_err(|e| init_error(describe(e)))?;

            let globals = ctx.globals();
            for (name, binding) in self.globals.iter() {
                let value = binding
                    .into_guest(&ctx)
                    .catch(&ctx)
                    .map_err(|e| init_error(format!("global '{}': {}", name, describe(e))))?;
                globals
                    .set(name, value)
                    .catch(&ctx)
                    .map_err(|e| init_error(format!("global '{}': {}", name, describe(e))))?;
            }
            Ok(())
        })?;

        let serial = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            program = %identity,
            function = %self.key.function,
            globals = ?self.key.globals,
            serial,
            "Created execution context"
        );

        Ok(ExecutionContext {
            context,
            runtime,
            serial,
        })
    }
}

/// Exclusive borrow of one execution context.
///
/// Dropping the lease returns the context to its sub-pool, including when
/// the call inside it failed.
pub struct Lease {
    context: Option<ExecutionContext>,
    subpool: Arc<Subpool>,
}

impl Lease {
    /// The borrowed context.
    pub fn context(&self) -> &ExecutionContext {
        // Only `Drop` takes the context out.
        self.context.as_ref().unwrap_or_else(|| unreachable!("lease used after release"))
    }

    /// Run `f` inside the borrowed context.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: for<'js> FnOnce(Ctx<'js>) -> R,
    {
        self.context().with(f)
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            self.subpool.checkin(context);
        }
    }
}

/// Registry of sub-pools.
pub struct Pool {
    config: PoolConfig,
    subpools: Mutex<HashMap<PoolKey, Arc<Subpool>>>,
}

impl Pool {
    /// Create an empty registry.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            subpools: Mutex::new(HashMap::new()),
        }
    }

    /// Process-wide registry.
    ///
    /// Initialized empty on first use with `config`; later calls return
    /// the existing registry and ignore their argument.
    pub fn init_global(config: PoolConfig) -> Arc<Pool> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Pool::new(config))))
    }

    /// Process-wide registry with default tuning if not yet initialized.
    pub fn global() -> Arc<Pool> {
        Self::init_global(PoolConfig::default())
    }

    /// Tuning applied to new contexts.
    pub fn config(&self) -> PoolConfig {
        self.config
    }

    /// Get or create the sub-pool for `function` in `program` with `globals`.
    ///
    /// The registry lock is held only for this lookup. When the sub-pool
    /// is created here, `globals` become the values every one of its
    /// contexts is warmed with.
    pub fn subpool(&self, program: &Arc<Program>, function: &str, globals: &Globals) -> Arc<Subpool> {
        let key = PoolKey::new(program, function, globals);
        let mut subpools = lock(&self.subpools);
        let subpool = subpools.entry(key).or_insert_with_key(|key| {
            debug!(program = %key.program, function = %key.function, globals = ?key.globals, "Created sub-pool");
            Arc::new(Subpool::new(key.clone(), Arc::clone(program), globals.clone(), self.config))
        });
        Arc::clone(subpool)
    }

    /// Look up an existing sub-pool.
    pub fn get(&self, key: &PoolKey) -> Option<Arc<Subpool>> {
        lock(&self.subpools).get(key).cloned()
    }

    /// Number of sub-pools.
    pub fn len(&self) -> usize {
        lock(&self.subpools).len()
    }

    /// Whether the registry has no sub-pools.
    pub fn is_empty(&self) -> bool {
        lock(&self.subpools).is_empty()
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

static GLOBAL: OnceLock<Arc<Pool>> = OnceLock::new();

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn program(source: &str) -> Arc<Program> {
        Program::compile("pool-test", source).unwrap()
    }

    #[test]
    fn test_key_ignores_global_values() {
        let p = program("function f() {}");
        let a = Globals::new().with("limit", Arc::new(json!(1)));
        let b = Globals::new().with("limit", Arc::new(json!(2)));
        assert_eq!(PoolKey::new(&p, "f", &a), PoolKey::new(&p, "f", &b));
        assert_ne!(PoolKey::new(&p, "f", &a), PoolKey::new(&p, "g", &a));
        assert_ne!(PoolKey::new(&p, "f", &a), PoolKey::new(&p, "f", &Globals::new()));
    }

    #[test]
    fn test_subpool_reuses_returned_context() {
        let pool = Pool::default();
        let p = program("function f() { return 1; }");
        let subpool = pool.subpool(&p, "f", &Globals::new());

        let first = subpool.checkout().unwrap();
        let serial = first.context().serial();
        drop(first);
        assert_eq!(subpool.idle(), 1);

        let second = subpool.checkout().unwrap();
        assert_eq!(second.context().serial(), serial);
        assert_eq!(subpool.created(), 1);
    }

    #[test]
    fn test_concurrent_leases_get_distinct_contexts() {
        let pool = Pool::default();
        let p = program("function f() {}");
        let subpool = pool.subpool(&p, "f", &Globals::new());

        let a = subpool.checkout().unwrap();
        let b = subpool.checkout().unwrap();
        assert_ne!(a.context().serial(), b.context().serial());
        assert_eq!(subpool.created(), 2);
    }

    #[test]
    fn test_surplus_contexts_are_evicted() {
        let pool = Pool::new(PoolConfig {
            max_idle: 1,
            ..PoolConfig::default()
        });
        let p = program("function f() {}");
        let subpool = pool.subpool(&p, "f", &Globals::new());

        let a = subpool.checkout().unwrap();
        let b = subpool.checkout().unwrap();
        drop(a);
        drop(b);
        assert_eq!(subpool.idle(), 1);
    }

    #[test]
    fn test_globals_installed_at_creation() {
        let pool = Pool::default();
        let p = program("function f() { return limit; }");
        let globals = Globals::new().with("limit", Arc::new(json!(42)));
        let lease = pool.subpool(&p, "f", &globals).checkout().unwrap();

        let limit: i32 = lease.with(|ctx| ctx.eval("limit").unwrap());
        assert_eq!(limit, 42);
    }

    #[test]
    fn test_failing_top_level_code_is_context_init_error() {
        let pool = Pool::default();
        let p = program("throw new Error('bad plugin');");
        let err = pool.subpool(&p, "f", &Globals::new()).checkout().err().unwrap();
        match err {
            RuntimeError::ContextInit { message, .. } => assert!(message.contains("bad plugin")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_registry_counts_subpools() {
        let pool = Pool::default();
        let p = program("function f() {} function g() {}");
        pool.subpool(&p, "f", &Globals::new());
        pool.subpool(&p, "f", &Globals::new());
        pool.subpool(&p, "g", &Globals::new());
        assert_eq!(pool.len(), 2);
    }
}
