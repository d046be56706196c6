use std::collections::HashMap;
use std::hash::Hash;
use std::ops::Sub;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{FnId, NodeId, OpId};

/// Snapshot format version accepted by `ProfileSession::restore`
pub const SNAPSHOT_VERSION: u32 = 1;

/// Timing key for one node placement: its position in the owning function's
/// topological order plus the node's id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplyKey {
    pub index: usize,
    pub node: NodeId,
}

/// Accumulated timing and call state for one profiling configuration
///
/// Mutated by the execution wrapper (node level) and the call dispatcher
/// (function level); read by the aggregator and report generator at any
/// point between calls. All counters start at zero and only grow, except in
/// the synthetic sessions produced by `diff`, where values may be negative.
#[derive(Debug, Clone)]
pub struct ProfileSession {
    epoch: Instant,
    /// Cumulative seconds spent executing each node, across all invocations
    /// of its owning function
    pub apply_time: HashMap<ApplyKey, f64>,
    /// True iff every node backed by the op instance executed via the
    /// native path; fixed at compile time
    pub op_is_native: HashMap<OpId, bool>,
    /// Seconds spent compiling functions under this session
    pub compile_time: f64,
    /// Cumulative seconds inside calls to each function, dispatch included
    pub fct_call_time: HashMap<FnId, f64>,
    /// Number of invocations of each function
    pub fct_call_count: HashMap<FnId, i64>,
}

impl ProfileSession {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            apply_time: HashMap::new(),
            op_is_native: HashMap::new(),
            compile_time: 0.0,
            fct_call_time: HashMap::new(),
            fct_call_count: HashMap::new(),
        }
    }

    /// Create a zero-valued apply entry if absent
    pub fn seed_apply(&mut self, index: usize, node: NodeId) {
        self.apply_time.entry(ApplyKey { index, node }).or_insert(0.0);
    }

    /// Add one execution's elapsed seconds to a node's accumulator
    pub fn add_apply_time(&mut self, index: usize, node: NodeId, seconds: f64) {
        *self.apply_time.entry(ApplyKey { index, node }).or_insert(0.0) += seconds;
    }

    /// Fold one node's native-path observation into its op instance's flag
    ///
    /// The first observation stands alone; later ones AND in, so the flag
    /// stays true only while every backing node uses the native path.
    pub fn observe_native(&mut self, op: OpId, native: bool) {
        self.op_is_native
            .entry(op)
            .and_modify(|v| *v = *v && native)
            .or_insert(native);
    }

    pub fn add_compile_time(&mut self, seconds: f64) {
        self.compile_time += seconds;
    }

    /// Record one completed invocation of `function`
    pub fn record_call(&mut self, function: FnId, seconds: f64) {
        *self.fct_call_time.entry(function).or_insert(0.0) += seconds;
        *self.fct_call_count.entry(function).or_insert(0) += 1;
    }

    /// Total seconds attributed directly to nodes
    pub fn local_time(&self) -> f64 {
        self.apply_time.values().sum()
    }

    /// Seconds since this session's reference epoch
    pub fn elapsed(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    pub fn total_fct_time(&self) -> f64 {
        self.fct_call_time.values().sum()
    }

    pub fn total_fct_calls(&self) -> i64 {
        self.fct_call_count.values().sum()
    }

    /// Combine two sessions into a synthetic difference session
    ///
    /// Numeric fields subtract over the union of keys, missing sides
    /// counting as zero; negative results are expected. The native map is
    /// combined by AND (missing sides count as true, the same default the
    /// instrumentation hook starts from), so an op observed in only one
    /// session keeps its flag and diffing a session against itself returns
    /// the original map. The result inherits this session's epoch.
    pub fn diff(&self, other: &ProfileSession) -> ProfileSession {
        let mut op_is_native = HashMap::new();
        for (&op, &native) in &self.op_is_native {
            op_is_native.insert(op, native && other.op_is_native.get(&op).copied().unwrap_or(true));
        }
        for (&op, &native) in &other.op_is_native {
            op_is_native.entry(op).or_insert(native);
        }

        ProfileSession {
            epoch: self.epoch,
            apply_time: diff_map(&self.apply_time, &other.apply_time),
            op_is_native,
            compile_time: self.compile_time - other.compile_time,
            fct_call_time: diff_map(&self.fct_call_time, &other.fct_call_time),
            fct_call_count: diff_map(&self.fct_call_count, &other.fct_call_count),
        }
    }

    /// Export all counters into a plain serializable structure
    pub fn snapshot(&self) -> SessionSnapshot {
        let mut apply_time: Vec<_> = self.apply_time.iter().map(|(k, v)| (*k, *v)).collect();
        apply_time.sort_by_key(|(k, _)| *k);
        let mut op_is_native: Vec<_> = self.op_is_native.iter().map(|(k, v)| (*k, *v)).collect();
        op_is_native.sort_by_key(|(k, _)| *k);
        let mut fct_call_time: Vec<_> = self.fct_call_time.iter().map(|(k, v)| (*k, *v)).collect();
        fct_call_time.sort_by_key(|(k, _)| *k);
        let mut fct_call_count: Vec<_> = self.fct_call_count.iter().map(|(k, v)| (*k, *v)).collect();
        fct_call_count.sort_by_key(|(k, _)| *k);

        SessionSnapshot {
            version: SNAPSHOT_VERSION,
            elapsed_secs: self.elapsed(),
            compile_time: self.compile_time,
            apply_time,
            op_is_native,
            fct_call_time,
            fct_call_count,
        }
    }

    /// Reconstruct a session from a snapshot
    ///
    /// The epoch is rebased so `elapsed()` continues from the snapshot's
    /// recorded value.
    pub fn restore(snapshot: SessionSnapshot) -> Result<ProfileSession> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::UnsupportedSnapshot(snapshot.version));
        }
        let offset = Duration::from_secs_f64(snapshot.elapsed_secs.max(0.0));
        let epoch = Instant::now().checked_sub(offset).unwrap_or_else(Instant::now);
        Ok(ProfileSession {
            epoch,
            apply_time: snapshot.apply_time.into_iter().collect(),
            op_is_native: snapshot.op_is_native.into_iter().collect(),
            compile_time: snapshot.compile_time,
            fct_call_time: snapshot.fct_call_time.into_iter().collect(),
            fct_call_count: snapshot.fct_call_count.into_iter().collect(),
        })
    }
}

impl Default for ProfileSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Versioned, serializable image of a session's counters
///
/// Maps are stored as sorted pairs so snapshots are deterministic and JSON
/// keys stay plain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub version: u32,
    pub elapsed_secs: f64,
    pub compile_time: f64,
    pub apply_time: Vec<(ApplyKey, f64)>,
    pub op_is_native: Vec<(OpId, bool)>,
    pub fct_call_time: Vec<(FnId, f64)>,
    pub fct_call_count: Vec<(FnId, i64)>,
}

impl SessionSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn diff_map<K, V>(a: &HashMap<K, V>, b: &HashMap<K, V>) -> HashMap<K, V>
where
    K: Eq + Hash + Copy,
    V: Copy + Default + Sub<Output = V>,
{
    let mut out = HashMap::with_capacity(a.len().max(b.len()));
    for (&k, &va) in a {
        out.insert(k, va - b.get(&k).copied().unwrap_or_default());
    }
    for (&k, &vb) in b {
        out.entry(k).or_insert(V::default() - vb);
    }
    out
}
