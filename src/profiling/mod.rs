// Profiling module
//
// Accumulates per-node wall-clock timings into a session, rolls them up by
// op instance and op class, renders ranked report tables, and diffs two
// sessions.

mod aggregate;
mod mode;
mod report;
mod session;
mod wrapper;

// Re-export public API
pub use aggregate::{class_rollups, op_rollups, ClassRollup, OpRollup};
pub use mode::{ModeRegistry, ProfileMode};
pub use report::{write_diff_summary, write_summary, ReportLimits};
pub use session::{ApplyKey, ProfileSession, SessionSnapshot, SNAPSHOT_VERSION};
pub use wrapper::profile_node;
