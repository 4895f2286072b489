//! Process-wide initialisation and shutdown.
//!
//! [`Lifecycle`] owns every piece of global interposer state: the
//! configuration, the registries, the render display, the extension
//! string cache and the resolved symbol table. It is the only place that
//! ends the process.
//!
//! ## Shutdown
//!
//! Under the critical section the first caller of
//! [`shutdown`](Lifecycle::shutdown) sets the dead flag, tears everything
//! down and exits the process. Any thread arriving after that only ends
//! itself, except the main thread: it waits for a pending exit to land,
//! or exits with its own code when teardown came from an
//! [`exit_guard`](Lifecycle::exit_guard). Teardown order:
//!
//! 1. registries, in [`TEARDOWN_ORDER`](crate::registry::resources::TEARDOWN_ORDER)
//! 2. the extension string cache
//! 3. the symbol table, then the resolver's `unload`

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::config::{EnvSource, FakerConfig};
use crate::critical::{self, CriticalGuard, CriticalSection};
use crate::error::RelayError;
use crate::registry::{DisplayHandle, Registries, Registry};

// ── Collaborators ────────────────────────────────────────────────

/// An opaque address of an external entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryPoint(pub usize);

/// Finds the real graphics-library entry points.
pub trait SymbolResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Result<EntryPoint, String>;

    /// Release whatever `resolve` loaded. Called once, at teardown.
    fn unload(&self) {}
}

/// Opens the display rendering actually happens on.
pub trait RenderBackend: Send + Sync {
    /// `name` is empty for the default display.
    fn open_display(&self, name: &str) -> Result<DisplayHandle, String>;
}

/// Diagnostic hooks run during initialisation.
pub trait InitHooks {
    /// Give a developer the chance to attach a debugger.
    fn attach_debugger(&self, pid: u32) {
        eprintln!("[relaygl] Attach debugger to process {pid} ...");
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
    }

    /// Route protocol errors to `handler` instead of the default handler.
    fn install_error_trap(&self, handler: fn(&ProtocolError)) {
        let _ = handler;
    }
}

/// The stock hooks: debugger attach waits on stdin, no error trap.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl InitHooks for DefaultHooks {}

/// A protocol error reported by the display server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    pub code: u8,
    pub resource_id: u64,
    pub text: String,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {}, XID {:#010x})", self.text, self.code, self.resource_id)
    }
}

/// Trap handler: log and carry on.
pub fn log_trapped_error(e: &ProtocolError) {
    warn!(
        code = e.code,
        resource = format_args!("{:#010x}", e.resource_id),
        "protocol error trapped: {}",
        e.text
    );
}

// ── Shutdown roles ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownRole {
    /// This thread set the dead flag and ran teardown.
    Primary,
    /// Teardown had already happened.
    AlreadyDead,
}

/// Unwind payload of a thread ended by a late [`Lifecycle::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadTerminated;

/// Runs the secondary teardown path when dropped.
#[must_use = "teardown runs as soon as the guard is dropped"]
pub struct TeardownGuard<'a> {
    lifecycle: &'a Lifecycle,
}

impl Drop for TeardownGuard<'_> {
    fn drop(&mut self) {
        self.lifecycle.begin_shutdown();
    }
}

// ── Lifecycle ────────────────────────────────────────────────────

pub struct Lifecycle {
    critical: &'static CriticalSection,
    dead_yet: AtomicBool,
    init_done: AtomicBool,
    exit_code: OnceCell<i32>,
    config: OnceCell<Arc<FakerConfig>>,
    registries: Registries,
    render_display: OnceCell<DisplayHandle>,
    extensions: Mutex<Option<String>>,
    symbols: Registry<&'static str, EntryPoint>,
    resolver: OnceCell<Arc<dyn SymbolResolver>>,
}

/// The process-wide lifecycle controller.
pub fn global() -> &'static Lifecycle {
    static GLOBAL: OnceCell<Lifecycle> = OnceCell::new();
    GLOBAL.get_or_init(Lifecycle::new)
}

impl Lifecycle {
    /// A controller serialised on the process-wide critical section.
    pub fn new() -> Self {
        Self::with_critical_section(critical::global())
    }

    pub fn with_critical_section(critical: &'static CriticalSection) -> Self {
        Self {
            critical,
            dead_yet: AtomicBool::new(false),
            init_done: AtomicBool::new(false),
            exit_code: OnceCell::new(),
            config: OnceCell::new(),
            registries: Registries::new(),
            render_display: OnceCell::new(),
            extensions: Mutex::new(None),
            symbols: Registry::new("symbols"),
            resolver: OnceCell::new(),
        }
    }

    // ── Initialisation ───────────────────────────────────────────

    /// Load the configuration and run the diagnostic hooks, once per
    /// controller no matter how many threads race here.
    ///
    /// Other threads wait until the hooks have run. A hook that calls back
    /// in on the initialising thread gets the configuration loaded so far.
    pub fn initialize_once(&self, env: &dyn EnvSource, hooks: &dyn InitHooks) -> Arc<FakerConfig> {
        if self.init_done.load(Ordering::Acquire) {
            return self.config();
        }
        let _cs = self.critical.acquire();
        if let Some(config) = self.config.get() {
            return config.clone();
        }

        let config = Arc::new(FakerConfig::load(env));
        let _ = self.config.set(config.clone());
        if config.verbose {
            info!(
                version = env!("CARGO_PKG_VERSION"),
                bits = usize::BITS,
                "relaygl interposer initialised"
            );
        }
        if config.debug {
            hooks.attach_debugger(std::process::id());
        }
        if config.trap_x11 {
            hooks.install_error_trap(log_trapped_error);
        }
        self.init_done.store(true, Ordering::Release);
        config
    }

    pub fn is_initialized(&self) -> bool {
        self.init_done.load(Ordering::Acquire)
    }

    /// The loaded configuration, or defaults before initialisation.
    pub fn config(&self) -> Arc<FakerConfig> {
        self.config.get().cloned().unwrap_or_default()
    }

    /// Open the render display on first use.
    pub fn try_init_3d(&self, backend: &dyn RenderBackend) -> Result<DisplayHandle, RelayError> {
        if let Some(display) = self.render_display.get() {
            return Ok(*display);
        }
        let _cs = self.critical.acquire();
        if let Some(display) = self.render_display.get() {
            return Ok(*display);
        }
        if self.is_dead() {
            return Err(RelayError::Resource("interposer is shutting down".into()));
        }

        let config = self.config();
        let name = config.local_display.as_str();
        let shown = if name.is_empty() { "(default)" } else { name };
        if config.verbose {
            info!("opening connection to render display {shown}");
        }
        let display = backend
            .open_display(name)
            .map_err(|reason| RelayError::Resource(format!("could not open display {shown}: {reason}")))?;
        let _ = self.render_display.set(display);
        Ok(display)
    }

    /// Like [`try_init_3d`](Self::try_init_3d), but failure ends the process.
    pub fn init_3d(&self, backend: &dyn RenderBackend) -> DisplayHandle {
        match self.try_init_3d(backend) {
            Ok(display) => display,
            Err(e) => {
                fatal(&e);
                self.shutdown(1)
            }
        }
    }

    pub fn render_display(&self) -> Option<DisplayHandle> {
        self.render_display.get().copied()
    }

    // ── Global state ─────────────────────────────────────────────

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    /// Run `f` on the registries unless teardown has started.
    pub fn with_registries<R>(&self, f: impl FnOnce(&Registries) -> R) -> Option<R> {
        if self.is_dead() {
            return None;
        }
        Some(f(&self.registries))
    }

    /// The cached extension string, computing it with `query` on first use.
    pub fn extension_string(&self, query: impl FnOnce() -> String) -> String {
        if self.is_dead() {
            return query();
        }
        self.extensions.lock().get_or_insert_with(query).clone()
    }

    /// Install the symbol resolver. Only the first call has any effect.
    pub fn set_resolver(&self, resolver: Arc<dyn SymbolResolver>) -> bool {
        self.resolver.set(resolver).is_ok()
    }

    /// Resolve `name`, caching the result.
    pub fn try_resolve(&self, name: &'static str) -> Result<EntryPoint, RelayError> {
        if let Some(entry) = self.symbols.find(&name) {
            return Ok(entry);
        }
        let _cs = self.critical.acquire();
        if let Some(entry) = self.symbols.find(&name) {
            return Ok(entry);
        }
        let symbol_error = |reason: String| RelayError::Symbol {
            name: name.to_string(),
            reason,
        };
        if self.is_dead() {
            return Err(symbol_error("interposer is shutting down".into()));
        }
        let resolver = self
            .resolver
            .get()
            .ok_or_else(|| symbol_error("no symbol resolver installed".into()))?;
        let entry = resolver.resolve(name).map_err(symbol_error)?;
        self.symbols.insert(name, entry);
        Ok(entry)
    }

    /// Like [`try_resolve`](Self::try_resolve), but failure ends the process.
    pub fn resolve_required(&self, name: &'static str) -> EntryPoint {
        match self.try_resolve(name) {
            Ok(entry) => entry,
            Err(e) => {
                fatal(&e);
                self.shutdown(1)
            }
        }
    }

    // ── Shutdown ─────────────────────────────────────────────────

    pub fn is_dead(&self) -> bool {
        self.dead_yet.load(Ordering::Acquire)
    }

    /// Set the dead flag and tear down, unless another thread already did.
    pub fn begin_shutdown(&self) -> ShutdownRole {
        self.begin_shutdown_with(None)
    }

    /// The code the primary [`shutdown`](Self::shutdown) is exiting with.
    pub fn pending_exit(&self) -> Option<i32> {
        self.exit_code.get().copied()
    }

    /// End the process with `code`, or just this thread if shutdown is
    /// already under way.
    ///
    /// A terminated thread unwinds with a [`ThreadTerminated`] payload.
    /// The main thread never unwinds: it parks while another thread's
    /// exit is pending, and exits with `code` otherwise.
    pub fn shutdown(&self, code: i32) -> ! {
        match self.begin_shutdown_with(Some(code)) {
            ShutdownRole::Primary => std::process::exit(code),
            ShutdownRole::AlreadyDead if !on_main_thread() => terminate_thread(),
            ShutdownRole::AlreadyDead => match self.pending_exit() {
                Some(_) => loop {
                    std::thread::park();
                },
                None => std::process::exit(code),
            },
        }
    }

    /// A guard whose drop runs the secondary teardown path.
    pub fn exit_guard(&self) -> TeardownGuard<'_> {
        TeardownGuard { lifecycle: self }
    }

    fn begin_shutdown_with(&self, exit: Option<i32>) -> ShutdownRole {
        let cs = self.critical.acquire();
        if self.dead_yet.swap(true, Ordering::AcqRel) {
            return ShutdownRole::AlreadyDead;
        }
        if let Some(code) = exit {
            let _ = self.exit_code.set(code);
        }
        self.teardown(&cs);
        ShutdownRole::Primary
    }

    fn teardown(&self, cs: &CriticalGuard<'_>) {
        let killed = self.registries.kill_all(cs);
        self.extensions.lock().take();
        let symbols = self.symbols.kill(cs);
        if let Some(resolver) = self.resolver.get() {
            resolver.unload();
        }
        info!(registries = ?killed, symbols, "interposer torn down");
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Report a process-fatal condition on the log and on stderr.
pub fn fatal(e: &RelayError) {
    error!("{e}");
    eprintln!("[relaygl] ERROR: {e}");
}

fn on_main_thread() -> bool {
    std::thread::current().name() == Some("main")
}

fn terminate_thread() -> ! {
    std::panic::resume_unwind(Box::new(ThreadTerminated))
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use super::*;
    use crate::registry::{ContextHandle, ContextState, DrawableHandle, TargetHandle};

    #[derive(Default)]
    struct CountingHooks {
        attaches: AtomicUsize,
        traps: AtomicUsize,
    }

    impl InitHooks for CountingHooks {
        fn attach_debugger(&self, _pid: u32) {
            self.attaches.fetch_add(1, Ordering::SeqCst);
        }

        fn install_error_trap(&self, handler: fn(&ProtocolError)) {
            handler(&ProtocolError {
                code: 3,
                resource_id: 0x0420_0001,
                text: "BadWindow".into(),
            });
            self.traps.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct CountingResolver {
        resolves: AtomicUsize,
        unloads: AtomicUsize,
    }

    impl SymbolResolver for CountingResolver {
        fn resolve(&self, name: &str) -> Result<EntryPoint, String> {
            self.resolves.fetch_add(1, Ordering::SeqCst);
            if name.starts_with("gl") {
                Ok(EntryPoint(0x1000 + name.len()))
            } else {
                Err("undefined symbol".into())
            }
        }

        fn unload(&self) {
            self.unloads.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeBackend {
        opens: AtomicUsize,
    }

    impl RenderBackend for FakeBackend {
        fn open_display(&self, name: &str) -> Result<DisplayHandle, String> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if name == "broken:0" {
                Err("no such display".into())
            } else {
                Ok(DisplayHandle(0xd15))
            }
        }
    }

    const THREADS: usize = 16;

    #[test]
    fn initialization_runs_exactly_once() {
        let lifecycle = Lifecycle::new();
        let hooks = CountingHooks::default();
        let env = [("RELAYGL_DEBUG", "1"), ("RELAYGL_TRAPX11", "1")];
        let barrier = Barrier::new(THREADS);

        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    barrier.wait();
                    let config = lifecycle.initialize_once(&env, &hooks);
                    assert!(config.debug);
                });
            }
        });

        assert!(lifecycle.is_initialized());
        assert_eq!(hooks.attaches.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.traps.load(Ordering::SeqCst), 1);
    }

    /// Calls back into `initialize_once` from inside the debugger hook.
    struct ReentrantHooks {
        lifecycle: Arc<Lifecycle>,
        nested_debug: AtomicUsize,
        attaches: AtomicUsize,
    }

    impl InitHooks for ReentrantHooks {
        fn attach_debugger(&self, _pid: u32) {
            self.attaches.fetch_add(1, Ordering::SeqCst);
            let config = self
                .lifecycle
                .initialize_once(&[("RELAYGL_DEBUG", "1")], self);
            if config.debug {
                self.nested_debug.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn hooks_may_reenter_initialization() {
        let lifecycle = Arc::new(Lifecycle::new());
        let (tx, rx) = std::sync::mpsc::channel();
        let worker = Arc::clone(&lifecycle);
        thread::spawn(move || {
            let hooks = ReentrantHooks {
                lifecycle: Arc::clone(&worker),
                nested_debug: AtomicUsize::new(0),
                attaches: AtomicUsize::new(0),
            };
            let config = worker.initialize_once(&[("RELAYGL_DEBUG", "1")], &hooks);
            let _ = tx.send((
                config.debug,
                hooks.attaches.load(Ordering::SeqCst),
                hooks.nested_debug.load(Ordering::SeqCst),
            ));
        });

        let (debug, attaches, nested) = rx
            .recv_timeout(std::time::Duration::from_secs(10))
            .expect("initialisation deadlocked");
        assert!(debug);
        assert_eq!(attaches, 1);
        assert_eq!(nested, 1);
        assert!(lifecycle.is_initialized());
    }

    #[test]
    fn other_threads_wait_for_the_hooks() {
        struct SlowHooks(AtomicUsize);
        impl InitHooks for SlowHooks {
            fn attach_debugger(&self, _pid: u32) {
                thread::sleep(std::time::Duration::from_millis(100));
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let lifecycle = Lifecycle::new();
        let hooks = SlowHooks(AtomicUsize::new(0));
        let env = [("RELAYGL_DEBUG", "1")];
        let barrier = Barrier::new(4);
        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    barrier.wait();
                    lifecycle.initialize_once(&env, &hooks);
                    assert_eq!(hooks.0.load(Ordering::SeqCst), 1);
                    assert!(lifecycle.is_initialized());
                });
            }
        });
    }

    #[test]
    fn shutdown_tears_down_exactly_once() {
        let lifecycle = Lifecycle::new();
        let resolver = Arc::new(CountingResolver::default());
        lifecycle.set_resolver(resolver.clone());
        lifecycle.try_resolve("glXSwapBuffers").unwrap();
        lifecycle
            .registries()
            .add_window(DisplayHandle(1), DrawableHandle(2), TargetHandle(3), 64, 64);
        let barrier = Barrier::new(THREADS);
        let primaries = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    barrier.wait();
                    if lifecycle.begin_shutdown() == ShutdownRole::Primary {
                        primaries.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(primaries.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.unloads.load(Ordering::SeqCst), 1);
        assert!(lifecycle.is_dead());
        assert!(lifecycle.registries().windows.is_killed());
        assert!(lifecycle.with_registries(|r| r.windows.len()).is_none());
    }

    #[test]
    fn late_shutdown_ends_only_the_calling_thread() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.begin_shutdown(), ShutdownRole::Primary);

        let outcome = thread::scope(|s| s.spawn(|| lifecycle.shutdown(0)).join());
        let payload = outcome.unwrap_err();
        assert!(payload.downcast_ref::<ThreadTerminated>().is_some());
    }

    #[test]
    fn exit_guard_is_the_secondary_path() {
        let lifecycle = Lifecycle::new();
        lifecycle
            .registries()
            .contexts
            .insert(ContextHandle(7), ContextState::default());
        drop(lifecycle.exit_guard());
        assert!(lifecycle.is_dead());
        assert_eq!(lifecycle.pending_exit(), None);
        assert!(lifecycle.registries().contexts.is_killed());
        assert_eq!(lifecycle.begin_shutdown(), ShutdownRole::AlreadyDead);
    }

    #[test]
    fn symbols_are_cached_until_teardown() {
        let lifecycle = Lifecycle::new();
        let resolver = Arc::new(CountingResolver::default());
        assert!(lifecycle.set_resolver(resolver.clone()));
        assert!(!lifecycle.set_resolver(Arc::new(CountingResolver::default())));

        let a = lifecycle.try_resolve("glFinish").unwrap();
        let b = lifecycle.try_resolve("glFinish").unwrap();
        assert_eq!(a, b);
        assert_eq!(resolver.resolves.load(Ordering::SeqCst), 1);

        let err = lifecycle.try_resolve("dlopen").unwrap_err();
        assert!(err.to_string().contains("\"dlopen\""));

        lifecycle.begin_shutdown();
        assert!(lifecycle.try_resolve("glFinish").is_err());
    }

    #[test]
    fn unresolved_without_resolver() {
        let lifecycle = Lifecycle::new();
        assert!(matches!(
            lifecycle.try_resolve("glFlush"),
            Err(RelayError::Symbol { .. })
        ));
    }

    #[test]
    fn render_display_opens_once() {
        let lifecycle = Lifecycle::new();
        let backend = FakeBackend {
            opens: AtomicUsize::new(0),
        };
        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| lifecycle.try_init_3d(&backend).unwrap());
            }
        });
        assert_eq!(backend.opens.load(Ordering::SeqCst), 1);
        assert_eq!(lifecycle.render_display(), Some(DisplayHandle(0xd15)));
    }

    #[test]
    fn render_display_failure_is_a_resource_error() {
        let lifecycle = Lifecycle::new();
        lifecycle.initialize_once(&[("RELAYGL_DISPLAY", "broken:0")], &DefaultHooks);
        let backend = FakeBackend {
            opens: AtomicUsize::new(0),
        };
        let err = lifecycle.try_init_3d(&backend).unwrap_err();
        assert!(matches!(err, RelayError::Resource(msg) if msg.contains("broken:0")));
    }

    #[test]
    fn extension_cache_is_released_at_teardown() {
        let lifecycle = Lifecycle::new();
        let queries = AtomicUsize::new(0);
        let query = || {
            queries.fetch_add(1, Ordering::SeqCst);
            "GLX_ARB_create_context".to_string()
        };
        lifecycle.extension_string(query);
        lifecycle.extension_string(query);
        assert_eq!(queries.load(Ordering::SeqCst), 1);

        lifecycle.begin_shutdown();
        lifecycle.extension_string(query);
        assert_eq!(queries.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn trapped_errors_format() {
        let e = ProtocolError {
            code: 9,
            resource_id: 0x2a,
            text: "BadDrawable".into(),
        };
        assert_eq!(e.to_string(), "BadDrawable (code 9, XID 0x0000002a)");
        log_trapped_error(&e);
    }
}
