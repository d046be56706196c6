// Renders a session into ranked, percentage-annotated tables plus global
// summaries. Everything here is read-only over a session snapshot.

use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use crate::execution::engine::FunctionRegistry;
use crate::model::ExecutionLocale;

use super::aggregate::{self, ClassRollup, OpRollup};
use super::session::ProfileSession;

/// Row-count limits for the ranked tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportLimits {
    /// Rows shown in the per-node (apply) table
    pub n_apply_rows: usize,
    /// Rows shown in each of the op-instance and op-class tables
    pub n_op_rows: usize,
}

impl Default for ReportLimits {
    fn default() -> Self {
        Self {
            n_apply_rows: 15,
            n_op_rows: 20,
        }
    }
}

impl ReportLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_apply_rows(mut self, rows: usize) -> Self {
        self.n_apply_rows = rows;
        self
    }

    pub fn with_op_rows(mut self, rows: usize) -> Self {
        self.n_op_rows = rows;
        self
    }
}

/// Write the full summary report for a session
pub fn write_summary<W: Write>(
    w: &mut W,
    session: &ProfileSession,
    functions: &FunctionRegistry,
    limits: ReportLimits,
) -> io::Result<()> {
    write_report(w, "Profile summary", session, functions, limits, true)
}

/// Write the report for a difference session
///
/// The apply table is suppressed: node positions from two independently
/// compiled graphs are not comparable.
pub fn write_diff_summary<W: Write>(
    w: &mut W,
    session: &ProfileSession,
    functions: &FunctionRegistry,
    limits: ReportLimits,
) -> io::Result<()> {
    write_report(w, "Profile diff summary", session, functions, limits, false)
}

fn write_report<W: Write>(
    w: &mut W,
    title: &str,
    session: &ProfileSession,
    functions: &FunctionRegistry,
    limits: ReportLimits,
    print_apply: bool,
) -> io::Result<()> {
    let local_time = session.local_time();

    writeln!(w)?;
    writeln!(w, "{}", title)?;
    writeln!(w, "{}", "-".repeat(title.len()))?;
    writeln!(w)?;
    writeln!(w, "local_time {:.3}s (time spent running thunks)", local_time)?;

    if print_apply {
        write_apply_table(w, session, functions, local_time, limits.n_apply_rows)?;
    }

    let ops = aggregate::op_rollups(session, functions);
    write_op_table(w, &ops, local_time, limits.n_op_rows)?;

    let classes = aggregate::class_rollups(&ops);
    write_class_table(w, &classes, local_time, limits.n_op_rows)?;

    write_function_summary(w, session, functions)?;
    write_promotion_scan(w, functions)?;
    write_locale_split(w, &classes, local_time)?;
    Ok(())
}

struct ApplyRow {
    share: f64,
    time: f64,
    index: usize,
    name: String,
    nb_call: i64,
}

fn write_apply_table<W: Write>(
    w: &mut W,
    session: &ProfileSession,
    functions: &FunctionRegistry,
    local_time: f64,
    n_rows: usize,
) -> io::Result<()> {
    writeln!(w)?;
    writeln!(
        w,
        "Apply-wise summary: <% of local_time at this position> <cumulative %> \
         <apply time> <cumulative seconds> <time per call> <nb_call> <position> <node name>"
    )?;

    let mut rows = Vec::new();
    for (key, &time) in &session.apply_time {
        let Some((function, node)) = functions.find_node(key.node) else {
            continue;
        };
        let nb_call = session
            .fct_call_count
            .get(&function.id())
            .copied()
            .unwrap_or(0);
        if nb_call == 0 {
            assert!(
                time == 0.0,
                "node '{}' accumulated {:.6}s but its function was never called",
                node.name,
                time
            );
            continue;
        }
        rows.push(ApplyRow {
            share: pct(time, local_time),
            time,
            index: key.index,
            name: node.name.clone(),
            nb_call,
        });
    }
    rows.sort_by(|a, b| {
        b.time
            .total_cmp(&a.time)
            .then(a.index.cmp(&b.index))
            .then(a.name.cmp(&b.name))
    });

    let mut cumulative = 0.0;
    for row in rows.iter().take(n_rows) {
        cumulative += row.time;
        writeln!(
            w,
            "   {:4.1}%  {:5.1}%  {:6.3}s  {:6.3}s  {:.2e}s  {:5}  {:3}  {}",
            row.share,
            pct(cumulative, local_time),
            row.time,
            cumulative,
            row.time / row.nb_call as f64,
            row.nb_call,
            row.index,
            row.name
        )?;
    }

    let rest = &rows[n_rows.min(rows.len())..];
    writeln!(
        w,
        "   ... (remaining {} Apply instances account for {:.2}%({:.2}s) of the runtime)",
        rest.len(),
        rest.iter().map(|r| r.share).sum::<f64>() + 0.0,
        rest.iter().map(|r| r.time).sum::<f64>() + 0.0
    )?;
    Ok(())
}

fn write_op_table<W: Write>(
    w: &mut W,
    ops: &[OpRollup],
    local_time: f64,
    n_rows: usize,
) -> io::Result<()> {
    let show_flops = ops.iter().any(|op| op.mflops.is_some());

    writeln!(w)?;
    if show_flops {
        writeln!(
            w,
            "Throughput figures come from static per-op cost hints; treat them as estimates."
        )?;
    }
    writeln!(
        w,
        "Op-wise summary: <% of local_time on this Op> <cumulative %> <self seconds> \
         <cumulative seconds> <time per call>{} <nb_call> <nb apply> <Op name>",
        if show_flops { " <MFlops/s>" } else { "" }
    )?;

    let mut rows: Vec<&OpRollup> = Vec::new();
    for op in ops {
        if op.call_count == 0 {
            assert!(
                op.self_time == 0.0,
                "op '{}' accumulated {:.6}s with a zero call count",
                op.op.label(),
                op.self_time
            );
            continue;
        }
        rows.push(op);
    }
    rows.sort_by(|a, b| {
        b.self_time
            .total_cmp(&a.self_time)
            .then_with(|| a.op.label().cmp(b.op.label()))
            .then(a.op.id().cmp(&b.op.id()))
    });

    let mut cumulative = 0.0;
    for op in rows.iter().take(n_rows) {
        cumulative += op.self_time;
        let marker = if op.native { '*' } else { ' ' };
        let flops_col = match (show_flops, op.mflops) {
            (true, Some(f)) => format!(" {:9.1}", f),
            (true, None) => format!(" {:>9}", "-"),
            (false, _) => String::new(),
        };
        writeln!(
            w,
            "   {:4.1}%  {:5.1}%  {:6.3}s  {:6.3}s  {:.2e}s {}{} {:5} {:3} {}",
            pct(op.self_time, local_time),
            pct(cumulative, local_time),
            op.self_time,
            cumulative,
            op.self_time / op.call_count as f64,
            marker,
            flops_col,
            op.call_count,
            op.apply_count,
            op.op.label()
        )?;
    }

    let rest = &rows[n_rows.min(rows.len())..];
    writeln!(
        w,
        "   ... (remaining {} Ops account for {:.2}%({:.2}s) of the runtime)",
        rest.len(),
        rest.iter().map(|op| pct(op.self_time, local_time)).sum::<f64>() + 0.0,
        rest.iter().map(|op| op.self_time).sum::<f64>() + 0.0
    )?;
    writeln!(w, "(*) Op runs a native implementation")?;
    Ok(())
}

fn write_class_table<W: Write>(
    w: &mut W,
    classes: &[ClassRollup],
    local_time: f64,
    n_rows: usize,
) -> io::Result<()> {
    let show_flops = classes.iter().any(|class| class.mflops.is_some());

    writeln!(w)?;
    writeln!(
        w,
        "Class-wise summary: <% of local_time on this class> <cumulative %> <self seconds> \
         <cumulative seconds> <time per call>{} <nb_call> <nb apply> <nb op> <Class name>",
        if show_flops { " <MFlops/s>" } else { "" }
    )?;

    let mut rows: Vec<&ClassRollup> = Vec::new();
    for class in classes {
        if class.call_count == 0 {
            assert!(
                class.self_time == 0.0,
                "class '{}' accumulated {:.6}s with a zero call count",
                class.name,
                class.self_time
            );
            continue;
        }
        rows.push(class);
    }
    rows.sort_by(|a, b| {
        b.self_time
            .total_cmp(&a.self_time)
            .then_with(|| a.name.cmp(&b.name))
    });

    let mut cumulative = 0.0;
    for class in rows.iter().take(n_rows) {
        cumulative += class.self_time;
        let marker = if class.native { '*' } else { ' ' };
        let flops_col = match (show_flops, class.mflops) {
            (true, Some(f)) => format!(" {:9.1}", f),
            (true, None) => format!(" {:>9}", "-"),
            (false, _) => String::new(),
        };
        writeln!(
            w,
            "   {:4.1}%  {:5.1}%  {:6.3}s  {:6.3}s  {:.2e}s {}{} {:5} {:3} {:3} {}",
            pct(class.self_time, local_time),
            pct(cumulative, local_time),
            class.self_time,
            cumulative,
            class.self_time / class.call_count as f64,
            marker,
            flops_col,
            class.call_count,
            class.apply_count,
            class.instance_count,
            class.name
        )?;
    }

    let rest = &rows[n_rows.min(rows.len())..];
    writeln!(
        w,
        "   ... (remaining {} classes account for {:.2}%({:.2}s) of the runtime)",
        rest.len(),
        rest.iter().map(|c| pct(c.self_time, local_time)).sum::<f64>() + 0.0,
        rest.iter().map(|c| c.self_time).sum::<f64>() + 0.0
    )?;
    writeln!(w, "(*) Class runs a native implementation")?;
    Ok(())
}

fn write_function_summary<W: Write>(
    w: &mut W,
    session: &ProfileSession,
    functions: &FunctionRegistry,
) -> io::Result<()> {
    let total_time = session.elapsed();
    let local_time = session.local_time();
    let compile_time = session.compile_time;
    let total_fct_time = session.total_fct_time();
    let total_fct_calls = session.total_fct_calls();
    let other_time = total_time - local_time - compile_time;

    writeln!(w)?;
    writeln!(
        w,
        "Function summary: <% of total fct time> <total time> <time per call> <nb call> <fct name>"
    )?;
    for function in functions.iter() {
        let count = session
            .fct_call_count
            .get(&function.id())
            .copied()
            .unwrap_or(0);
        if count > 0 {
            let time = session
                .fct_call_time
                .get(&function.id())
                .copied()
                .unwrap_or(0.0);
            writeln!(
                w,
                "   {:4.1}% {:.3}s {:.2e}s {} {}",
                pct(time, total_fct_time),
                time,
                time / count as f64,
                count,
                function.name()
            )?;
        } else {
            writeln!(w, "   NOT CALLED  {}", function.name())?;
        }
    }

    let time_in_fct = if total_fct_time > 0.0 {
        pct(local_time, total_fct_time)
    } else {
        0.0
    };
    let time_per_call = if total_fct_calls != 0 {
        total_fct_time / total_fct_calls as f64
    } else {
        0.0
    };

    writeln!(w)?;
    writeln!(w, "Time since profiler start {:.3}s", total_time)?;
    writeln!(
        w,
        "Compile time: {:.3}s {:.1}%",
        compile_time,
        pct(compile_time, total_time)
    )?;
    writeln!(
        w,
        "Function call time: {:.3}s {:.1}%",
        total_fct_time,
        pct(total_fct_time, total_time)
    )?;
    writeln!(
        w,
        "   Op time (included in fct call, time spent running thunks) {:.3}s \
         {:.1}%(of total) {:.1}%(of fct call)",
        local_time,
        pct(local_time, total_time),
        time_in_fct
    )?;
    writeln!(
        w,
        "Other time since profiler start {:.3}s {:.1}%",
        other_time,
        pct(other_time, total_time)
    )?;
    writeln!(
        w,
        "{} function calls, {:.3}s per call",
        total_fct_calls, time_per_call
    )?;
    Ok(())
}

fn write_promotion_scan<W: Write>(w: &mut W, functions: &FunctionRegistry) -> io::Result<()> {
    writeln!(w)?;
    writeln!(
        w,
        "Nodes with a high-precision output but no high-precision input. Useful to \
         catch forgotten casts when targeting lower-precision types."
    )?;
    writeln!(w, "<node> <input types> <output types>")?;
    for function in functions.iter() {
        for node in function.nodes() {
            if node.promotes_precision() {
                let inputs: Vec<String> =
                    node.input_dtypes.iter().map(|d| d.to_string()).collect();
                let outputs: Vec<String> =
                    node.output_dtypes.iter().map(|d| d.to_string()).collect();
                writeln!(
                    w,
                    "   {} [{}] [{}]",
                    node.name,
                    inputs.join(", "),
                    outputs.join(", ")
                )?;
            }
        }
    }
    Ok(())
}

fn write_locale_split<W: Write>(
    w: &mut W,
    classes: &[ClassRollup],
    local_time: f64,
) -> io::Result<()> {
    if !classes.iter().any(|c| c.locale == ExecutionLocale::Device) {
        return Ok(());
    }

    let mut host = 0.0;
    let mut device = 0.0;
    let mut transfer = 0.0;
    for class in classes {
        match class.locale {
            ExecutionLocale::Host => host += class.self_time,
            ExecutionLocale::Device => device += class.self_time,
            ExecutionLocale::Transfer => transfer += class.self_time,
        }
    }

    writeln!(w)?;
    writeln!(
        w,
        "Spent {:.3}s({:.3}%) in host ops, {:.3}s({:.3}%) in device ops and \
         {:.3}s({:.3}%) in transfer ops",
        host,
        pct(host, local_time),
        device,
        pct(device, local_time),
        transfer,
        pct(transfer, local_time)
    )?;
    Ok(())
}

fn pct(value: f64, total: f64) -> f64 {
    if total != 0.0 {
        100.0 * value / total
    } else {
        0.0
    }
}
