use std::sync::Mutex;
use std::time::Instant;

use crate::error::{Error, Result};
use crate::execution::engine::Thunk;
use crate::model::Node;

use super::session::ProfileSession;

/// Execute one node's thunk, timing it into the session
///
/// Purely additive: the thunk choice and its result are untouched. Native
/// thunks signal failure through their flag; that becomes
/// `Error::NativeExecution`, which tells the caller the underlying fault
/// was lost at the native boundary. Interpreted thunk errors propagate
/// unmodified. A failing node contributes no apply time.
pub fn profile_node(
    session: &Mutex<ProfileSession>,
    index: usize,
    node: &Node,
    thunk: &mut Thunk,
) -> Result<()> {
    let elapsed = match thunk {
        Thunk::Native(run) => {
            let start = Instant::now();
            let failed = run();
            let elapsed = start.elapsed().as_secs_f64();
            if failed {
                return Err(Error::NativeExecution {
                    node: node.name.clone(),
                    op: node.op.label().to_string(),
                });
            }
            elapsed
        }
        Thunk::Interpreted(run) => {
            let start = Instant::now();
            run()?;
            start.elapsed().as_secs_f64()
        }
    };

    if let Ok(mut session) = session.lock() {
        session.add_apply_time(index, node.id, elapsed);
    }
    Ok(())
}
