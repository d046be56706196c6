// Read-side rollups over a session's raw per-node map. Recomputed on every
// report request; sessions are bounded by graph size, so no caching.

use std::collections::HashMap;
use std::sync::Arc;

use log::warn;

use crate::execution::engine::FunctionRegistry;
use crate::model::{ExecutionLocale, OpId, Operation};

use super::session::ProfileSession;

/// Timing rollup for one operation instance
#[derive(Debug, Clone)]
pub struct OpRollup {
    pub op: Arc<Operation>,
    /// Seconds attributed to nodes backed by this instance
    pub self_time: f64,
    /// Owning-function call counts, added once per matching node
    pub call_count: i64,
    /// Number of distinct nodes backed by this instance
    pub apply_count: usize,
    /// True iff every backing node ran the native path
    pub native: bool,
    /// Millions of work units per second, when the op carries a cost hint
    pub mflops: Option<f64>,
}

/// Timing rollup for one operation class
#[derive(Debug, Clone)]
pub struct ClassRollup {
    pub name: String,
    pub locale: ExecutionLocale,
    pub self_time: f64,
    pub call_count: i64,
    /// Sum of the member instances' apply counts
    pub apply_count: usize,
    pub instance_count: usize,
    /// True iff every member instance is native
    pub native: bool,
    pub mflops: Option<f64>,
}

/// Group the session's apply times by operation instance
pub fn op_rollups(session: &ProfileSession, functions: &FunctionRegistry) -> Vec<OpRollup> {
    let mut by_op: HashMap<OpId, OpRollup> = HashMap::new();

    for (key, &seconds) in &session.apply_time {
        let Some((function, node)) = functions.find_node(key.node) else {
            warn!("node {:?} has apply time but no registered function; skipped", key.node);
            continue;
        };
        let calls = session
            .fct_call_count
            .get(&function.id())
            .copied()
            .unwrap_or(0);
        let entry = by_op.entry(node.op.id()).or_insert_with(|| OpRollup {
            op: Arc::clone(&node.op),
            self_time: 0.0,
            call_count: 0,
            apply_count: 0,
            native: session.op_is_native.get(&node.op.id()).copied().unwrap_or(false),
            mflops: None,
        });
        entry.self_time += seconds;
        entry.call_count += calls;
        entry.apply_count += 1;
    }

    let mut rollups: Vec<OpRollup> = by_op.into_values().collect();
    for rollup in &mut rollups {
        if let Some(hint) = rollup.op.flops_hint() {
            if rollup.self_time > 0.0 {
                rollup.mflops = Some(hint * rollup.call_count as f64 / rollup.self_time / 1e6);
            }
        }
    }
    rollups
}

/// Group op-instance rollups by class
pub fn class_rollups(ops: &[OpRollup]) -> Vec<ClassRollup> {
    let mut by_class: HashMap<String, ClassRollup> = HashMap::new();
    let mut hinted_work: HashMap<String, f64> = HashMap::new();

    for op in ops {
        let class = op.op.class();
        let entry = by_class
            .entry(class.name.clone())
            .or_insert_with(|| ClassRollup {
                name: class.name.clone(),
                locale: class.locale,
                self_time: 0.0,
                call_count: 0,
                apply_count: 0,
                instance_count: 0,
                native: true,
                mflops: None,
            });
        entry.self_time += op.self_time;
        entry.call_count += op.call_count;
        entry.apply_count += op.apply_count;
        entry.instance_count += 1;
        entry.native = entry.native && op.native;
        if let Some(hint) = op.op.flops_hint() {
            *hinted_work.entry(class.name.clone()).or_insert(0.0) += hint * op.call_count as f64;
        }
    }

    let mut rollups: Vec<ClassRollup> = by_class.into_values().collect();
    for rollup in &mut rollups {
        if let Some(&work) = hinted_work.get(&rollup.name) {
            if rollup.self_time > 0.0 {
                rollup.mflops = Some(work / rollup.self_time / 1e6);
            }
        }
    }
    rollups
}
