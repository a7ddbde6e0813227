//! The live-reload loop: watches one hot module, recompiles it on change and rebinds its
//! `update`/`terminate` entry points while the heap, timer and watcher stay alive.

pub mod timer;
pub mod watcher;

pub use timer::Timer;
pub use watcher::{ChangeSource, FileWatcher};

use crate::{
    language::compiler::{Compiler, FunctionHandle, Module},
    project::graph::ModuleLoader,
    runtime::error::RuntimeResult,
};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Unloaded,
    Compiling,
    Loaded,
    Stale,
}

/// A rebindable zero-argument entry point. Calling an unbound slot does nothing.
#[derive(Debug)]
pub struct EntryPoint {
    name: &'static str,
    handle: Option<FunctionHandle>,
}

impl EntryPoint {
    pub fn new(name: &'static str) -> Self {
        Self { name, handle: None }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_bound(&self) -> bool {
        self.handle.is_some()
    }

    pub fn bind(&mut self, module: &Module) {
        self.handle = match module.function(self.name) {
            Some(handle) if handle.arity() == 0 => Some(handle),
            Some(handle) => {
                log::warn!(
                    "`{}` in `{}` takes {} arguments; entry points take none",
                    self.name,
                    module.name(),
                    handle.arity()
                );
                None
            }
            None => {
                log::info!("`{}` has no `{}`; using a no-op", module.name(), self.name);
                None
            }
        };
    }

    pub fn unbind(&mut self) {
        self.handle = None;
    }

    pub fn call(&self, compiler: &mut Compiler) -> RuntimeResult<()> {
        match &self.handle {
            Some(handle) => compiler.call(handle, Vec::new()).map(|_| ()),
            None => Ok(()),
        }
    }
}

pub struct HotReloader<S: ChangeSource = FileWatcher> {
    loader: ModuleLoader,
    deps: Vec<Module>,
    path: PathBuf,
    source: S,
    current: Option<Module>,
    state: SlotState,
    update: EntryPoint,
    terminate: EntryPoint,
    timer: Timer,
    frame: Duration,
    reloads: usize,
}

impl<S: ChangeSource> HotReloader<S> {
    /// Compiles the hot module once. A failed initial compile leaves both entry points
    /// unbound; the loop keeps running and retries on the next change.
    pub fn new(
        loader: ModuleLoader,
        deps: Vec<Module>,
        path: impl Into<PathBuf>,
        source: S,
        frame: Duration,
    ) -> Self {
        let mut reloader = Self {
            loader,
            deps,
            path: path.into(),
            source,
            current: None,
            state: SlotState::Unloaded,
            update: EntryPoint::new("update"),
            terminate: EntryPoint::new("terminate"),
            timer: Timer::start(),
            frame,
            reloads: 0,
        };
        reloader.state = SlotState::Compiling;
        match reloader.loader.load_module(&reloader.path, &reloader.deps) {
            Some(module) => reloader.install(module),
            None => {
                log::warn!(
                    "initial compile of {} failed; update is a no-op until it is fixed",
                    reloader.path.display()
                );
                reloader.state = SlotState::Unloaded;
            }
        }
        reloader
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn current(&self) -> Option<&Module> {
        self.current.as_ref()
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    pub fn reload_count(&self) -> usize {
        self.reloads
    }

    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    pub fn loader_mut(&mut self) -> &mut ModuleLoader {
        &mut self.loader
    }

    pub fn compiler_mut(&mut self) -> &mut Compiler {
        self.loader.compiler_mut()
    }

    pub fn update(&self) -> &EntryPoint {
        &self.update
    }

    pub fn terminate(&self) -> &EntryPoint {
        &self.terminate
    }

    /// Drains every pending notification; true when at least one arrived.
    pub fn poll_changes(&mut self) -> bool {
        let mut changed = false;
        while let Some(path) = self.source.poll_event() {
            log::debug!("change detected: {}", path.display());
            changed = true;
        }
        if changed && self.current.is_some() {
            self.state = SlotState::Stale;
        }
        changed
    }

    /// Compiles the hot module afresh and swaps it in. On failure the old module stays
    /// loaded and bound; returns whether a swap happened.
    pub fn reload(&mut self) -> bool {
        let had_module = self.current.is_some();
        self.state = SlotState::Compiling;
        let Some(fresh) = self.loader.load_module(&self.path, &self.deps) else {
            log::warn!("keeping the previous version of {}", self.path.display());
            self.state = if had_module {
                SlotState::Loaded
            } else {
                SlotState::Unloaded
            };
            return false;
        };

        if let Some(old) = self.current.take() {
            self.state = SlotState::Stale;
            let terminate = self.terminate.call(self.loader.compiler_mut());
            if let Err(err) = terminate {
                log::error!("`terminate` of `{}` failed: {err}", old.name());
            }
            self.update.unbind();
            self.terminate.unbind();
            self.loader.unload_module(&old);
            self.state = SlotState::Unloaded;
        }
        self.install(fresh);
        self.reloads += 1;
        log::info!("reloaded {} (reload #{})", self.path.display(), self.reloads);
        true
    }

    fn install(&mut self, module: Module) {
        self.update.bind(&module);
        self.terminate.bind(&module);
        self.current = Some(module);
        self.state = SlotState::Loaded;
    }

    /// One frame: pick up changes, then call `update`. An `update` that fails is unbound
    /// until the next successful reload.
    pub fn run_frame(&mut self) {
        if self.poll_changes() {
            self.reload();
        }
        let result = self.update.call(self.loader.compiler_mut());
        if let Err(err) = result {
            log::error!("`update` failed: {err}; disabled until the next reload");
            self.update.unbind();
        }
    }

    /// Runs frames at the configured cadence, forever or for `max_frames` frames.
    pub fn run(&mut self, max_frames: Option<u64>) {
        let mut frames = 0u64;
        loop {
            let started = Instant::now();
            self.run_frame();
            frames += 1;
            if max_frames.is_some_and(|max| frames >= max) {
                break;
            }
            thread::sleep(self.frame.saturating_sub(started.elapsed()));
        }
        log::debug!("frame loop stopped after {frames} frames");
    }

    /// Calls `terminate` on the live module and unloads it.
    pub fn shutdown(&mut self) {
        let result = self.terminate.call(self.loader.compiler_mut());
        if let Err(err) = result {
            log::error!("`terminate` failed: {err}");
        }
        self.update.unbind();
        self.terminate.unbind();
        if let Some(module) = self.current.take() {
            self.loader.unload_module(&module);
        }
        self.state = SlotState::Unloaded;
    }
}
