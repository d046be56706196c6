// Profiles a small two-function workload and prints the summary and a diff.

use std::sync::Arc;

use ndarray::Array2;

use dataflow_profiler::{
    DataType, ExecutionStrategy, FunctionRegistry, Linker, ModeRegistry, Node, OpClass, OpGraph,
    Operation, ProfileMode, Result, Thunk,
};

// Matmul runs "natively" (failure-flag contract), element-wise ops fall
// back to interpreted closures.
struct DemoBackend;

impl ExecutionStrategy for DemoBackend {
    fn thunk_for(&self, node: &Node) -> Result<Thunk> {
        let a = Array2::<f64>::ones((64, 64));
        let b = Array2::<f64>::ones((64, 64));
        if node.op.class().name == "Gemm" {
            Ok(Thunk::native(move || {
                std::hint::black_box(a.dot(&b));
                false
            }))
        } else {
            Ok(Thunk::interpreted(move || {
                std::hint::black_box(&a + &b);
                Ok(())
            }))
        }
    }
}

fn pipeline(gemm: &Arc<Operation>, add: &Arc<Operation>, sum: &Arc<Operation>) -> OpGraph {
    let f64s = [DataType::Float64, DataType::Float64];
    let mut graph = OpGraph::new();
    let product = graph.add_node(gemm, "gemm", &f64s, &[DataType::Float64]);
    let shifted = graph.add_node(add, "bias_add", &f64s, &[DataType::Float64]);
    let total = graph.add_node(sum, "reduce_sum", &[DataType::Float64], &[DataType::Float64]);
    graph.add_dependency(shifted, product).unwrap();
    graph.add_dependency(total, shifted).unwrap();
    graph
}

fn main() -> Result<()> {
    let gemm = Operation::with_flops_hint(OpClass::host("Gemm"), "Gemm{64x64}", 2.0 * 64.0 * 64.0 * 64.0);
    let add = Operation::new(OpClass::host("Add"), "Add{f64}");
    let sum = Operation::new(OpClass::host("Sum"), "Sum{f64}");

    let linker = Linker::new(vec![Box::new(DemoBackend)]);
    let mut functions = FunctionRegistry::new();

    let mode = Arc::new(ProfileMode::new());
    let id = mode.compile(&mut functions, &linker, &pipeline(&gemm, &add, &sum), "pipeline")?;
    for _ in 0..100 {
        mode.call(&mut functions, id)?;
    }

    // A second round, e.g. after tuning, for the diff report
    let tuned = Arc::new(ProfileMode::new());
    let tuned_id = tuned.compile(
        &mut functions,
        &linker,
        &pipeline(&gemm, &add, &sum),
        "pipeline_tuned",
    )?;
    for _ in 0..50 {
        tuned.call(&mut functions, tuned_id)?;
    }

    mode.print_summary(&functions, None)?;
    tuned.print_diff_summary(&mode, &functions, None)?;

    let mut registry = ModeRegistry::new();
    registry.register("demo", Arc::clone(&mode))?;
    // Already reported above, so route the shutdown flush to a sink
    registry.shutdown(&functions, &mut std::io::sink())?;
    Ok(())
}
