//! Process-exit tests for `Lifecycle::shutdown` and the fatal paths.
//!
//! Each scenario has to end its own process, so the harness re-runs this
//! binary once per scenario and checks the exit status and stderr.

use std::process::Command;
use std::sync::Mutex;
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::Duration;

use relaygl_core::lifecycle::{self, EntryPoint, RenderBackend, SymbolResolver};
use relaygl_core::registry::DisplayHandle;

const SCENARIO: &str = "RELAYGL_SHUTDOWN_SCENARIO";

// ── Scenarios (run in the child) ─────────────────────────────────

/// Signals when teardown reaches `unload`, then holds teardown open.
struct SlowUnload(Mutex<Option<Sender<()>>>);

impl SymbolResolver for SlowUnload {
    fn resolve(&self, name: &str) -> Result<EntryPoint, String> {
        Err(format!("{name} is not exported"))
    }

    fn unload(&self) {
        if let Some(tx) = self.0.lock().unwrap().take() {
            let _ = tx.send(());
        }
        thread::sleep(Duration::from_millis(200));
    }
}

struct NoDisplay;

impl RenderBackend for NoDisplay {
    fn open_display(&self, _name: &str) -> Result<DisplayHandle, String> {
        Err("connection refused".into())
    }
}

fn run_scenario(name: &str) -> ! {
    let lifecycle = lifecycle::global();
    match name {
        "main-primary" => lifecycle.shutdown(4),
        "main-late" => {
            let (tx, rx) = mpsc::channel();
            lifecycle.set_resolver(std::sync::Arc::new(SlowUnload(Mutex::new(Some(tx)))));
            thread::spawn(move || lifecycle.shutdown(3));
            rx.recv().unwrap();
            lifecycle.shutdown(9)
        }
        "main-after-guard" => {
            thread::spawn(move || drop(lifecycle.exit_guard()))
                .join()
                .unwrap();
            assert!(lifecycle.is_dead());
            lifecycle.shutdown(5)
        }
        "init-3d" => {
            lifecycle.init_3d(&NoDisplay);
            unreachable!("init_3d returned without a display")
        }
        "resolve" => {
            lifecycle.resolve_required("glXMissingEntry");
            unreachable!("resolve_required returned without a resolver")
        }
        other => panic!("unknown scenario {other}"),
    }
}

// ── Harness (run in the parent) ──────────────────────────────────

fn spawn(name: &str) -> (Option<i32>, String) {
    let exe = std::env::current_exe().unwrap();
    let output = Command::new(exe).env(SCENARIO, name).output().unwrap();
    (
        output.status.code(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    )
}

fn check(name: &str, code: i32, stderr_has: Option<&str>) {
    let (got, stderr) = spawn(name);
    assert_eq!(got, Some(code), "{name}: stderr was\n{stderr}");
    if let Some(needle) = stderr_has {
        assert!(stderr.contains(needle), "{name}: stderr was\n{stderr}");
    }
    println!("test {name} ... ok");
}

fn main() {
    if let Ok(name) = std::env::var(SCENARIO) {
        run_scenario(&name);
    }

    check("main-primary", 4, None);
    check("main-late", 3, None);
    check("main-after-guard", 5, None);
    check("init-3d", 1, Some("[relaygl] ERROR: resource error: could not open display"));
    check("resolve", 1, Some("could not load function \"glXMissingEntry\""));
}
