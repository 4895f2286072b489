//! Per-thread interposer state.
//!
//! Each field lives in native thread-local storage, is created lazily on
//! first access by a thread, and is never visible to any other thread.
//!
//! | Field               | Default | Meaning                                   |
//! |---------------------|---------|-------------------------------------------|
//! | `trace_level`       | `0`     | Nesting depth of traced calls             |
//! | `faker_level`       | `0`     | Interception disable depth                |
//! | `exclude_current`   | `false` | Current context bypasses the interposer   |
//! | `autotest_color`    | `-1`    | Last left-eye colour marker               |
//! | `autotest_rcolor`   | `-1`    | Last right-eye colour marker              |
//! | `autotest_frame`    | `-1`    | Last frame marker                         |
//! | `autotest_display`  | unset   | Display the markers belong to             |
//! | `autotest_drawable` | unset   | Drawable the markers belong to            |

use std::cell::Cell;

use crate::registry::{DisplayHandle, DrawableHandle};

macro_rules! thread_field {
    ($(#[$meta:meta])* $key:ident, $get:ident, $set:ident, $ty:ty, $default:expr) => {
        thread_local! {
            static $key: Cell<$ty> = const { Cell::new($default) };
        }

        $(#[$meta])*
        pub fn $get() -> $ty {
            $key.with(Cell::get)
        }

        pub fn $set(value: $ty) {
            $key.with(|cell| cell.set(value));
        }
    };
}

thread_field!(
    /// Nesting depth of traced calls on this thread.
    TRACE_LEVEL, trace_level, set_trace_level, i64, 0
);
thread_field!(
    /// How many times interception has been disabled on this thread.
    FAKER_LEVEL, faker_level, set_faker_level, i64, 0
);
thread_field!(
    /// Whether the current context on this thread bypasses the interposer.
    EXCLUDE_CURRENT, exclude_current, set_exclude_current, bool, false
);
thread_field!(AUTOTEST_COLOR, autotest_color_raw, set_autotest_color, i64, -1);
thread_field!(AUTOTEST_RCOLOR, autotest_rcolor_raw, set_autotest_rcolor, i64, -1);
thread_field!(AUTOTEST_FRAME, autotest_frame_raw, set_autotest_frame, i64, -1);
thread_field!(
    AUTOTEST_DISPLAY,
    autotest_display,
    set_autotest_display,
    Option<DisplayHandle>,
    None
);
thread_field!(
    AUTOTEST_DRAWABLE,
    autotest_drawable,
    set_autotest_drawable,
    Option<DrawableHandle>,
    None
);

// ── Interception control ─────────────────────────────────────────

/// Temporarily stop intercepting calls made by this thread.
///
/// Every call must be paired with [`enable`] on the same thread. Pairing
/// is not checked, so an extra `enable` drives the depth negative.
pub fn disable() {
    set_faker_level(faker_level() + 1);
    set_exclude_current(true);
}

/// Undo one [`disable`].
pub fn enable() {
    let depth = faker_level() - 1;
    set_faker_level(depth);
    if depth <= 0 {
        set_exclude_current(false);
    }
}

/// Whether calls made by this thread should be intercepted.
pub fn is_intercepting() -> bool {
    faker_level() <= 0 && !exclude_current()
}

/// RAII pairing of [`disable`] and [`enable`].
#[must_use = "interception resumes as soon as the pause is dropped"]
pub struct InterceptionPause {
    // Thread-local state: the pause must be dropped on the thread that made it.
    _not_send: std::marker::PhantomData<*const ()>,
}

impl InterceptionPause {
    pub fn new() -> Self {
        disable();
        Self {
            _not_send: std::marker::PhantomData,
        }
    }
}

impl Default for InterceptionPause {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterceptionPause {
    fn drop(&mut self) {
        enable();
    }
}

// ── Diagnostic markers ───────────────────────────────────────────

/// Record the markers of the frame this thread just produced.
pub fn set_autotest_markers(
    display: DisplayHandle,
    drawable: DrawableHandle,
    color: i64,
    rcolor: i64,
    frame: i64,
) {
    set_autotest_display(Some(display));
    set_autotest_drawable(Some(drawable));
    set_autotest_color(color);
    set_autotest_rcolor(rcolor);
    set_autotest_frame(frame);
}

fn markers_match(display: DisplayHandle, drawable: DrawableHandle) -> bool {
    autotest_display() == Some(display) && autotest_drawable() == Some(drawable)
}

/// Colour marker for `drawable`, or `-1` if the markers on this thread
/// belong to a different drawable.
pub fn autotest_color(display: DisplayHandle, drawable: DrawableHandle, right_eye: bool) -> i64 {
    if !markers_match(display, drawable) {
        return -1;
    }
    if right_eye {
        autotest_rcolor_raw()
    } else {
        autotest_color_raw()
    }
}

/// Frame marker for `drawable`, or `-1` if the markers on this thread
/// belong to a different drawable.
pub fn autotest_frame(display: DisplayHandle, drawable: DrawableHandle) -> i64 {
    if markers_match(display, drawable) {
        autotest_frame_raw()
    } else {
        -1
    }
}

/// A copy of every field, for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub trace_level: i64,
    pub faker_level: i64,
    pub exclude_current: bool,
    pub autotest_color: i64,
    pub autotest_rcolor: i64,
    pub autotest_frame: i64,
    pub autotest_display: Option<DisplayHandle>,
    pub autotest_drawable: Option<DrawableHandle>,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        trace_level: trace_level(),
        faker_level: faker_level(),
        exclude_current: exclude_current(),
        autotest_color: autotest_color_raw(),
        autotest_rcolor: autotest_rcolor_raw(),
        autotest_frame: autotest_frame_raw(),
        autotest_display: autotest_display(),
        autotest_drawable: autotest_drawable(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    // Each test runs on its own thread, so thread-local state starts fresh.

    #[test]
    fn defaults() {
        let s = snapshot();
        assert_eq!(s.trace_level, 0);
        assert_eq!(s.faker_level, 0);
        assert!(!s.exclude_current);
        assert_eq!(s.autotest_color, -1);
        assert_eq!(s.autotest_rcolor, -1);
        assert_eq!(s.autotest_frame, -1);
        assert_eq!(s.autotest_display, None);
        assert_eq!(s.autotest_drawable, None);
        assert!(is_intercepting());
    }

    #[test]
    fn nested_disable_enable() {
        disable();
        disable();
        assert_eq!(faker_level(), 2);
        assert!(exclude_current());

        enable();
        assert_eq!(faker_level(), 1);
        assert!(exclude_current(), "still disabled at depth 1");
        assert!(!is_intercepting());

        enable();
        assert_eq!(faker_level(), 0);
        assert!(!exclude_current());
        assert!(is_intercepting());
    }

    #[test]
    fn unbalanced_enable_goes_negative() {
        enable();
        assert_eq!(faker_level(), -1);
        assert!(!exclude_current());
        disable();
        assert_eq!(faker_level(), 0);
    }

    #[test]
    fn pause_guard_restores() {
        {
            let _pause = InterceptionPause::new();
            assert!(!is_intercepting());
        }
        assert!(is_intercepting());
        assert_eq!(faker_level(), 0);
    }

    #[test]
    fn state_is_not_shared_between_threads() {
        set_trace_level(7);
        disable();
        let other = thread::spawn(|| (trace_level(), faker_level())).join().unwrap();
        assert_eq!(other, (0, 0));
        assert_eq!(trace_level(), 7);
        enable();
    }

    #[test]
    fn autotest_markers_match_only_their_drawable() {
        let dpy = DisplayHandle(1);
        let win = DrawableHandle(0x20);
        set_autotest_markers(dpy, win, 0xff0000, 0x00ff00, 12);

        assert_eq!(autotest_color(dpy, win, false), 0xff0000);
        assert_eq!(autotest_color(dpy, win, true), 0x00ff00);
        assert_eq!(autotest_frame(dpy, win), 12);

        assert_eq!(autotest_color(dpy, DrawableHandle(0x21), false), -1);
        assert_eq!(autotest_frame(DisplayHandle(2), win), -1);
    }
}
