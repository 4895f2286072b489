//! Resource classes tracked by the interposer.
//!
//! Every handle here is supplied by the intercepted API; relaygl never
//! mints one. The tracking states record what the interposer substituted
//! for the application's resource (an off-screen render target) plus the
//! bookkeeping the frame path needs (dimensions, frame sequence).

use std::fmt;

use tracing::debug;

use super::Registry;
use crate::critical::CriticalGuard;

macro_rules! native_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl $name {
            pub const fn raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }
    };
}

native_handle!(
    /// A connection to a display server (the application's 2D display or
    /// the 3D render display).
    DisplayHandle
);
native_handle!(
    /// A rendering context.
    ContextHandle
);
native_handle!(
    /// A window, pixmap or GLX drawable.
    DrawableHandle
);
native_handle!(
    /// A visual identifier.
    VisualId
);
native_handle!(
    /// The off-screen surface substituted for an application drawable.
    TargetHandle
);
#[cfg(feature = "egl")]
native_handle!(
    /// An EGL framebuffer configuration.
    EglConfigHandle
);
#[cfg(feature = "egl")]
native_handle!(
    /// An EGL pbuffer surface.
    EglSurfaceHandle
);

// ── Tracking states ──────────────────────────────────────────────

/// Windows are keyed by display and window, since window ids are only
/// unique per display connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowKey {
    pub display: DisplayHandle,
    pub window: DrawableHandle,
}

/// State for an application rendering context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextState {
    /// Framebuffer configuration the context was created with.
    pub config: u64,
    /// Whether the application asked for a direct context.
    pub direct: bool,
    /// Off-screen target the context is currently bound to.
    pub bound_target: Option<TargetHandle>,
}

/// State for an application window redirected to an off-screen target.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowState {
    pub target: TargetHandle,
    pub width: u32,
    pub height: u32,
    /// Sequence number the next frame read back from this window gets.
    pub pending_frame: u64,
    /// Set when the application deleted the window while a context was
    /// still bound to it.
    pub deleted: bool,
}

/// State for an application pixmap backed by an off-screen target.
#[derive(Debug, Clone, PartialEq)]
pub struct PixmapState {
    pub display: DisplayHandle,
    pub target: TargetHandle,
    pub width: u32,
    pub height: u32,
    pub depth: u8,
}

/// Mapping from a 2D visual to the framebuffer configuration matched to it.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualState {
    pub display: DisplayHandle,
    pub screen: i32,
    pub config: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawableKind {
    Window,
    Pixmap,
    Pbuffer,
}

/// Which display a GLX drawable was created on.
#[derive(Debug, Clone, PartialEq)]
pub struct GlxDrawableState {
    pub display: DisplayHandle,
    pub kind: DrawableKind,
}

#[cfg(feature = "egl")]
#[derive(Debug, Clone, PartialEq)]
pub struct EglConfigState {
    pub display: DisplayHandle,
    pub visual: Option<VisualId>,
}

#[cfg(feature = "egl")]
#[derive(Debug, Clone, PartialEq)]
pub struct EglContextState {
    pub display: DisplayHandle,
    pub config: EglConfigHandle,
}

#[cfg(feature = "egl")]
#[derive(Debug, Clone, PartialEq)]
pub struct EglPbufferState {
    pub display: DisplayHandle,
    pub width: u32,
    pub height: u32,
}

// ── Registries ───────────────────────────────────────────────────

/// Registry teardown order. Pixmaps and visuals reference nothing else;
/// contexts reference drawables; windows go last because contexts and
/// GLX drawables may still point at them.
pub const TEARDOWN_ORDER: &[&str] = &[
    "pixmaps",
    "visuals",
    "contexts",
    "glx-drawables",
    "windows",
    #[cfg(feature = "egl")]
    "egl-pbuffers",
    #[cfg(feature = "egl")]
    "egl-contexts",
    #[cfg(feature = "egl")]
    "egl-configs",
];

/// The full set of per-class registries owned by the lifecycle controller.
pub struct Registries {
    pub contexts: Registry<ContextHandle, ContextState>,
    pub pixmaps: Registry<DrawableHandle, PixmapState>,
    pub visuals: Registry<VisualId, VisualState>,
    pub windows: Registry<WindowKey, WindowState>,
    pub glx_drawables: Registry<DrawableHandle, GlxDrawableState>,
    #[cfg(feature = "egl")]
    pub egl_configs: Registry<EglConfigHandle, EglConfigState>,
    #[cfg(feature = "egl")]
    pub egl_contexts: Registry<ContextHandle, EglContextState>,
    #[cfg(feature = "egl")]
    pub egl_pbuffers: Registry<EglSurfaceHandle, EglPbufferState>,
}

impl Registries {
    pub const fn new() -> Self {
        Self {
            contexts: Registry::new("contexts"),
            pixmaps: Registry::new("pixmaps"),
            visuals: Registry::new("visuals"),
            windows: Registry::new("windows"),
            glx_drawables: Registry::new("glx-drawables"),
            #[cfg(feature = "egl")]
            egl_configs: Registry::new("egl-configs"),
            #[cfg(feature = "egl")]
            egl_contexts: Registry::new("egl-contexts"),
            #[cfg(feature = "egl")]
            egl_pbuffers: Registry::new("egl-pbuffers"),
        }
    }

    /// Kill every allocated registry in [`TEARDOWN_ORDER`].
    ///
    /// Returns the names of the registries that held a table.
    pub fn kill_all(&self, cs: &CriticalGuard<'_>) -> Vec<&'static str> {
        let mut killed = Vec::new();
        macro_rules! kill_if_alloc {
            ($reg:expr) => {
                if $reg.is_allocated() {
                    $reg.kill(cs);
                    killed.push($reg.name());
                } else {
                    $reg.kill(cs);
                }
            };
        }
        kill_if_alloc!(self.pixmaps);
        kill_if_alloc!(self.visuals);
        kill_if_alloc!(self.contexts);
        kill_if_alloc!(self.glx_drawables);
        kill_if_alloc!(self.windows);
        #[cfg(feature = "egl")]
        {
            kill_if_alloc!(self.egl_pbuffers);
            kill_if_alloc!(self.egl_contexts);
            kill_if_alloc!(self.egl_configs);
        }
        killed
    }

    // ── Window bookkeeping ───────────────────────────────────────

    /// Start tracking `window` with the off-screen target that replaces it.
    pub fn add_window(
        &self,
        display: DisplayHandle,
        window: DrawableHandle,
        target: TargetHandle,
        width: u32,
        height: u32,
    ) {
        let key = WindowKey { display, window };
        let state = WindowState {
            target,
            width,
            height,
            pending_frame: 0,
            deleted: false,
        };
        if self.windows.insert(key, state).is_some() {
            let dpy = display;
            debug!(display = %dpy, window = %window, "window re-registered");
        }
        self.glx_drawables.insert(
            window,
            GlxDrawableState {
                display,
                kind: DrawableKind::Window,
            },
        );
    }

    /// Record a new size for `window`. Returns `true` if the size changed.
    pub fn resize_window(
        &self,
        display: DisplayHandle,
        window: DrawableHandle,
        width: u32,
        height: u32,
    ) -> bool {
        self.windows
            .update(&WindowKey { display, window }, |w| {
                let changed = w.width != width || w.height != height;
                w.width = width;
                w.height = height;
                changed
            })
            .unwrap_or(false)
    }

    /// Hand out the next frame sequence number for `window`.
    pub fn next_frame_sequence(
        &self,
        display: DisplayHandle,
        window: DrawableHandle,
    ) -> Option<u64> {
        self.windows.update(&WindowKey { display, window }, |w| {
            let seq = w.pending_frame;
            w.pending_frame += 1;
            seq
        })
    }

    /// Stop tracking `window`; returns its final state.
    ///
    /// The GLX drawable entry goes only if it belongs to `display`.
    pub fn remove_window(
        &self,
        display: DisplayHandle,
        window: DrawableHandle,
    ) -> Option<WindowState> {
        self.glx_drawables.remove_if(&window, |d| d.display == display);
        self.windows.remove(&WindowKey { display, window })
    }

    // ── Context bookkeeping ──────────────────────────────────────

    /// Bind `ctx` to `target` (or unbind with `None`). Returns the
    /// previously bound target.
    pub fn bind_context(
        &self,
        ctx: ContextHandle,
        target: Option<TargetHandle>,
    ) -> Option<TargetHandle> {
        self.contexts
            .update(&ctx, |c| std::mem::replace(&mut c.bound_target, target))
            .flatten()
    }

    /// The off-screen target `ctx` currently renders into.
    pub fn context_target(&self, ctx: ContextHandle) -> Option<TargetHandle> {
        self.contexts.find(&ctx).and_then(|c| c.bound_target)
    }

    /// Which display a GLX drawable belongs to.
    pub fn drawable_display(&self, drawable: DrawableHandle) -> Option<DisplayHandle> {
        self.glx_drawables.find(&drawable).map(|d| d.display)
    }
}

impl Default for Registries {
    fn default() -> Self {
        Self::new()
    }
}
