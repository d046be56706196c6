use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::execution::engine::{CompiledFunction, FunctionRegistry, Linker};
use crate::graph::OpGraph;
use crate::model::FnId;

use super::report::{self, ReportLimits};
use super::session::ProfileSession;
use super::wrapper;

/// A profiling configuration: one shared session plus the hooks that feed it
///
/// Compiling through a mode seeds the session and accumulates compile time;
/// calling through it wraps every node with the timing callback and tracks
/// function-level call counts and time.
pub struct ProfileMode {
    session: Arc<Mutex<ProfileSession>>,
    limits: ReportLimits,
}

impl ProfileMode {
    pub fn new() -> Self {
        Self::with_limits(ReportLimits::default())
    }

    pub fn with_limits(limits: ReportLimits) -> Self {
        Self {
            session: Arc::new(Mutex::new(ProfileSession::new())),
            limits,
        }
    }

    /// Adopt an existing session, e.g. one restored from a snapshot
    pub fn from_session(session: ProfileSession, limits: ReportLimits) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            limits,
        }
    }

    pub fn session(&self) -> Arc<Mutex<ProfileSession>> {
        Arc::clone(&self.session)
    }

    pub fn limits(&self) -> ReportLimits {
        self.limits
    }

    /// Link `graph` and register the result, instrumenting it for this mode
    ///
    /// Compile wall time is charged to the session.
    pub fn compile(
        &self,
        functions: &mut FunctionRegistry,
        linker: &Linker,
        graph: &OpGraph,
        name: &str,
    ) -> Result<FnId> {
        let start = Instant::now();
        let function = linker.link(graph, name)?;
        let id = functions.insert(function);
        if let Some(function) = functions.get(id) {
            self.instrument(function);
        }
        let elapsed = start.elapsed().as_secs_f64();
        if let Ok(mut session) = self.session.lock() {
            session.add_compile_time(elapsed);
        }
        debug!("compiled '{}' in {:.3}s under profiling", name, elapsed);
        Ok(id)
    }

    /// Seed the session for a freshly compiled function
    ///
    /// Runs once, after the node list is final and before the first call:
    /// creates zero apply entries and folds each node's native-path probe
    /// into its op's flag. A node group with anything but exactly one thunk
    /// means the executor is malformed; that is fatal here.
    fn instrument(&self, function: &CompiledFunction) {
        let Ok(mut session) = self.session.lock() else {
            return;
        };
        for (index, node) in function.nodes().iter().enumerate() {
            let group = function.thunk_group(index);
            assert_eq!(
                group.len(),
                1,
                "node '{}' resolved {} thunks; a profiled function must map each node \
                 to exactly one",
                node.name,
                group.len()
            );
            session.seed_apply(index, node.id);
            session.observe_native(node.op.id(), group[0].is_native());
        }
    }

    /// Invoke a compiled function with per-node timing
    pub fn call(&self, functions: &mut FunctionRegistry, id: FnId) -> Result<()> {
        let function = functions.get_mut(id).ok_or(Error::UnknownFunction(id.0))?;
        let start = Instant::now();
        let session = &self.session;
        let result = function.call_with(&mut |index, node, thunk| {
            wrapper::profile_node(session, index, node, thunk)
        });
        let elapsed = start.elapsed().as_secs_f64();
        if let Ok(mut session) = self.session.lock() {
            session.record_call(id, elapsed);
        }
        trace!("profiled call of function {} took {:.3}s", id.0, elapsed);
        result
    }

    /// Total seconds accumulated across all nodes
    pub fn local_time(&self) -> f64 {
        self.session
            .lock()
            .map(|session| session.local_time())
            .unwrap_or(0.0)
    }

    pub fn write_summary<W: Write>(
        &self,
        w: &mut W,
        functions: &FunctionRegistry,
        limits: Option<ReportLimits>,
    ) -> io::Result<()> {
        let limits = limits.unwrap_or(self.limits);
        if let Ok(session) = self.session.lock() {
            report::write_summary(w, &session, functions, limits)?;
        }
        Ok(())
    }

    pub fn print_summary(
        &self,
        functions: &FunctionRegistry,
        limits: Option<ReportLimits>,
    ) -> io::Result<()> {
        self.write_summary(&mut io::stdout().lock(), functions, limits)
    }

    /// Report the difference between this mode's session and `other`'s
    pub fn write_diff_summary<W: Write>(
        &self,
        w: &mut W,
        other: &ProfileMode,
        functions: &FunctionRegistry,
        limits: Option<ReportLimits>,
    ) -> io::Result<()> {
        let limits = limits.unwrap_or(self.limits);
        // Diffing a mode against itself would lock the same session twice.
        let diffed = if Arc::ptr_eq(&self.session, &other.session) {
            let Ok(mine) = self.session.lock() else {
                return Ok(());
            };
            let copy = mine.clone();
            mine.diff(&copy)
        } else {
            let (Ok(mine), Ok(theirs)) = (self.session.lock(), other.session.lock()) else {
                return Ok(());
            };
            mine.diff(&theirs)
        };
        report::write_diff_summary(w, &diffed, functions, limits)
    }

    pub fn print_diff_summary(
        &self,
        other: &ProfileMode,
        functions: &FunctionRegistry,
        limits: Option<ReportLimits>,
    ) -> io::Result<()> {
        self.write_diff_summary(&mut io::stdout().lock(), other, functions, limits)
    }
}

impl Default for ProfileMode {
    fn default() -> Self {
        Self::new()
    }
}

/// Named registry of profiling modes
///
/// An explicit application-level object: the host registers modes under
/// string keys, optionally designates a default, and invokes `shutdown`
/// from its orderly-shutdown path to flush summaries. There is no implicit
/// process-exit hook; modes stay usable as plain library objects.
#[derive(Default)]
pub struct ModeRegistry {
    modes: HashMap<String, Arc<ProfileMode>>,
    order: Vec<String>,
    default_key: Option<String>,
    flushed: bool,
}

impl ModeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mode under `key`; the first registration becomes the default
    pub fn register(&mut self, key: &str, mode: Arc<ProfileMode>) -> Result<()> {
        if self.modes.contains_key(key) {
            return Err(Error::DuplicateMode(key.to_string()));
        }
        self.modes.insert(key.to_string(), mode);
        self.order.push(key.to_string());
        if self.default_key.is_none() {
            self.default_key = Some(key.to_string());
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<Arc<ProfileMode>> {
        self.modes.get(key).cloned()
    }

    pub fn set_default(&mut self, key: &str) -> Result<()> {
        if !self.modes.contains_key(key) {
            return Err(Error::Operation(format!("no mode registered as '{}'", key)));
        }
        self.default_key = Some(key.to_string());
        Ok(())
    }

    pub fn default_mode(&self) -> Option<Arc<ProfileMode>> {
        self.default_key.as_deref().and_then(|key| self.get(key))
    }

    /// Flush the summary of every mode that collected data
    ///
    /// Intended for the host's orderly-shutdown path. Idempotent: the
    /// second and later invocations write nothing.
    pub fn shutdown<W: Write>(
        &mut self,
        functions: &FunctionRegistry,
        w: &mut W,
    ) -> io::Result<()> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        for key in &self.order {
            let mode = &self.modes[key];
            if mode.local_time() > 0.0 {
                debug!("flushing profile mode '{}'", key);
                mode.write_summary(w, functions, None)?;
            } else {
                trace!("profile mode '{}' collected no data; skipped", key);
            }
        }
        Ok(())
    }
}
