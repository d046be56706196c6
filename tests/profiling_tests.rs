use std::sync::Arc;

use dataflow_profiler::{
    ApplyKey, DataType, Error, ExecutionStrategy, FunctionRegistry, Linker, Node, OpClass,
    OpGraph, Operation, ProfileMode, ProfileSession, Result, SessionSnapshot, Thunk,
};

// Strategy that interprets every node as a trivial closure
struct Interpreter;

impl ExecutionStrategy for Interpreter {
    fn thunk_for(&self, _node: &Node) -> Result<Thunk> {
        Ok(Thunk::interpreted(|| Ok(())))
    }
}

// Strategy that runs every node natively, optionally failing at one node
struct NativeBackend {
    fail_at: Option<String>,
}

impl NativeBackend {
    fn new() -> Self {
        Self { fail_at: None }
    }

    fn failing_at(name: &str) -> Self {
        Self {
            fail_at: Some(name.to_string()),
        }
    }
}

impl ExecutionStrategy for NativeBackend {
    fn thunk_for(&self, node: &Node) -> Result<Thunk> {
        let fail = self.fail_at.as_deref() == Some(node.name.as_str());
        Ok(Thunk::native(move || fail))
    }
}

// Strategy mirroring a backend with partial native coverage: nodes whose
// name starts with "slow_" fall back to the interpreter
struct MixedBackend;

impl ExecutionStrategy for MixedBackend {
    fn thunk_for(&self, node: &Node) -> Result<Thunk> {
        if node.name.starts_with("slow_") {
            Ok(Thunk::interpreted(|| Ok(())))
        } else {
            Ok(Thunk::native(|| false))
        }
    }
}

fn host_op(class: &str, label: &str) -> Arc<Operation> {
    Operation::new(OpClass::host(class), label)
}

const F32: DataType = DataType::Float32;

// The 3-Add/1-Mul scenario: two Add nodes share one instance (native), a
// third Add node uses a second instance (interpreted), and one Mul node is
// native. Times are overwritten to 0.01/0.02/0.03/0.04 seconds.
fn add_mul_scenario(
    mode: &ProfileMode,
    functions: &mut FunctionRegistry,
) -> dataflow_profiler::FnId {
    let add_shared = host_op("Add", "Add{shared}");
    let add_solo = host_op("Add", "Add{solo}");
    let mul = host_op("Mul", "Mul{f32}");

    let mut graph = OpGraph::new();
    graph.add_node(&add_shared, "add_1", &[F32, F32], &[F32]);
    graph.add_node(&add_shared, "add_2", &[F32, F32], &[F32]);
    graph.add_node(&add_solo, "slow_add_3", &[F32, F32], &[F32]);
    graph.add_node(&mul, "mul_1", &[F32, F32], &[F32]);

    let linker = Linker::new(vec![Box::new(MixedBackend)]);
    let id = mode.compile(functions, &linker, &graph, "add_mul").unwrap();
    mode.call(functions, id).unwrap();

    let function = functions.get(id).unwrap();
    let session = mode.session();
    let mut session = session.lock().unwrap();
    for (index, node) in function.nodes().iter().enumerate() {
        let seconds = match node.name.as_str() {
            "add_1" => 0.01,
            "add_2" => 0.02,
            "slow_add_3" => 0.03,
            "mul_1" => 0.04,
            other => panic!("unexpected node {}", other),
        };
        session
            .apply_time
            .insert(ApplyKey { index, node: node.id }, seconds);
    }
    id
}

fn assert_close(a: f64, b: f64) {
    assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
}

#[test]
fn test_wrapper_accumulates_without_altering_results() {
    let op = host_op("Add", "Add{f32}");
    let mut graph = OpGraph::new();
    let a = graph.add_node(&op, "a", &[F32], &[F32]);
    let b = graph.add_node(&op, "b", &[F32], &[F32]);
    graph.add_dependency(b, a).unwrap();

    let mode = ProfileMode::new();
    let mut functions = FunctionRegistry::new();
    let linker = Linker::new(vec![Box::new(Interpreter)]);
    let id = mode.compile(&mut functions, &linker, &graph, "chain").unwrap();

    mode.call(&mut functions, id).unwrap();
    mode.call(&mut functions, id).unwrap();

    let session = mode.session();
    let session = session.lock().unwrap();
    assert_eq!(session.apply_time.len(), 2);
    assert!(session.apply_time.values().all(|&t| t >= 0.0));
    assert_eq!(session.fct_call_count.values().sum::<i64>(), 2);
    // Function call time includes dispatch, so it dominates node time
    assert!(session.total_fct_time() >= session.local_time());
    assert!(session.compile_time > 0.0);
}

#[test]
fn test_instrumentation_seeds_zeroes_and_native_flags() {
    let mode = ProfileMode::new();
    let mut functions = FunctionRegistry::new();

    let native_op = host_op("Add", "Add{native}");
    let slow_op = host_op("Add", "Add{slow}");
    let mut graph = OpGraph::new();
    graph.add_node(&native_op, "fast", &[F32], &[F32]);
    graph.add_node(&slow_op, "slow_path", &[F32], &[F32]);

    let linker = Linker::new(vec![Box::new(MixedBackend)]);
    mode.compile(&mut functions, &linker, &graph, "seeded").unwrap();

    let session = mode.session();
    let session = session.lock().unwrap();
    assert_eq!(session.apply_time.len(), 2);
    assert!(session.apply_time.values().all(|&t| t == 0.0));
    assert_eq!(session.local_time(), 0.0);
    assert_eq!(session.op_is_native.get(&native_op.id()), Some(&true));
    assert_eq!(session.op_is_native.get(&slow_op.id()), Some(&false));
}

#[test]
fn test_native_flag_is_and_across_nodes() {
    // The same instance backs a native node in one function and an
    // interpreted node in another; the flag must end up false.
    let op = host_op("Add", "Add{two-homes}");
    let mode = ProfileMode::new();
    let mut functions = FunctionRegistry::new();

    let mut native_graph = OpGraph::new();
    native_graph.add_node(&op, "fast", &[F32], &[F32]);
    let native_linker = Linker::new(vec![Box::new(NativeBackend::new())]);
    mode.compile(&mut functions, &native_linker, &native_graph, "native")
        .unwrap();
    {
        let session = mode.session();
        let session = session.lock().unwrap();
        assert_eq!(session.op_is_native.get(&op.id()), Some(&true));
    }

    let mut interp_graph = OpGraph::new();
    interp_graph.add_node(&op, "slow", &[F32], &[F32]);
    let interp_linker = Linker::new(vec![Box::new(Interpreter)]);
    mode.compile(&mut functions, &interp_linker, &interp_graph, "interp")
        .unwrap();
    let session = mode.session();
    let session = session.lock().unwrap();
    assert_eq!(session.op_is_native.get(&op.id()), Some(&false));
}

#[test]
fn test_native_failure_is_translated() {
    let op = host_op("Add", "Add{f32}");
    let mut graph = OpGraph::new();
    graph.add_node(&op, "broken", &[F32], &[F32]);

    let mode = ProfileMode::new();
    let mut functions = FunctionRegistry::new();
    let linker = Linker::new(vec![Box::new(NativeBackend::failing_at("broken"))]);
    let id = mode.compile(&mut functions, &linker, &graph, "failing").unwrap();

    let err = mode.call(&mut functions, id).unwrap_err();
    match &err {
        Error::NativeExecution { node, .. } => assert_eq!(node, "broken"),
        other => panic!("expected NativeExecution, got {:?}", other),
    }
    assert!(err.to_string().contains("non-instrumented"));

    // The failing node contributes no apply time
    let session = mode.session();
    let session = session.lock().unwrap();
    assert_eq!(session.local_time(), 0.0);
}

#[test]
fn test_interpreted_error_passes_through() {
    struct Failing;
    impl ExecutionStrategy for Failing {
        fn thunk_for(&self, _node: &Node) -> Result<Thunk> {
            Ok(Thunk::interpreted(|| {
                Err(Error::Operation("boom".to_string()))
            }))
        }
    }

    let op = host_op("Add", "Add{f32}");
    let mut graph = OpGraph::new();
    graph.add_node(&op, "a", &[F32], &[F32]);

    let mode = ProfileMode::new();
    let mut functions = FunctionRegistry::new();
    let linker = Linker::new(vec![Box::new(Failing)]);
    let id = mode.compile(&mut functions, &linker, &graph, "failing").unwrap();

    let err = mode.call(&mut functions, id).unwrap_err();
    match err {
        Error::Operation(message) => assert_eq!(message, "boom"),
        other => panic!("expected Operation to pass through, got {:?}", other),
    }
}

#[test]
fn test_scenario_rollups() {
    let mode = ProfileMode::new();
    let mut functions = FunctionRegistry::new();
    add_mul_scenario(&mode, &mut functions);

    let session = mode.session();
    let session = session.lock().unwrap();
    let ops = dataflow_profiler::profiling::op_rollups(&session, &functions);
    let classes = dataflow_profiler::profiling::class_rollups(&ops);

    let add = classes.iter().find(|c| c.name == "Add").unwrap();
    assert_close(add.self_time, 0.06);
    assert_eq!(add.apply_count, 3);
    assert_eq!(add.instance_count, 2);
    assert!(!add.native, "one Add node ran interpreted");

    let mul = classes.iter().find(|c| c.name == "Mul").unwrap();
    assert_close(mul.self_time, 0.04);
    assert_eq!(mul.apply_count, 1);
    assert!(mul.native);

    // Instance-level counts: the shared instance backs two nodes
    let shared = ops.iter().find(|o| o.op.label() == "Add{shared}").unwrap();
    assert_eq!(shared.apply_count, 2);
    assert_close(shared.self_time, 0.03);
    // Per-call credit comes from the owning function, once per node
    assert_eq!(shared.call_count, 2);
}

#[test]
fn test_grouping_conserves_time() {
    let mode = ProfileMode::new();
    let mut functions = FunctionRegistry::new();
    add_mul_scenario(&mode, &mut functions);

    let session = mode.session();
    let session = session.lock().unwrap();
    let ops = dataflow_profiler::profiling::op_rollups(&session, &functions);
    let classes = dataflow_profiler::profiling::class_rollups(&ops);

    let local = session.local_time();
    assert_close(local, ops.iter().map(|o| o.self_time).sum::<f64>());
    assert_close(local, classes.iter().map(|c| c.self_time).sum::<f64>());
}

#[test]
fn test_call_count_uses_owning_function() {
    // One instance shared by two functions with different call counts:
    // the rollup credits each node with its own function's count.
    let op = host_op("Dot", "Dot{64x64}");
    let mode = ProfileMode::new();
    let mut functions = FunctionRegistry::new();
    let linker = Linker::new(vec![Box::new(Interpreter)]);

    let mut first = OpGraph::new();
    first.add_node(&op, "dot_in_first", &[F32, F32], &[F32]);
    let first_id = mode.compile(&mut functions, &linker, &first, "first").unwrap();

    let mut second = OpGraph::new();
    second.add_node(&op, "dot_in_second", &[F32, F32], &[F32]);
    let second_id = mode
        .compile(&mut functions, &linker, &second, "second")
        .unwrap();

    for _ in 0..3 {
        mode.call(&mut functions, first_id).unwrap();
    }
    for _ in 0..2 {
        mode.call(&mut functions, second_id).unwrap();
    }

    let session = mode.session();
    let session = session.lock().unwrap();
    let ops = dataflow_profiler::profiling::op_rollups(&session, &functions);
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].apply_count, 2);
    assert_eq!(ops[0].call_count, 5);
}

#[test]
fn test_throughput_from_cost_hint() {
    let hinted = Operation::with_flops_hint(OpClass::host("Gemm"), "Gemm{32}", 2_000_000.0);
    let plain = host_op("Relu", "Relu{32}");

    let mode = ProfileMode::new();
    let mut functions = FunctionRegistry::new();
    let mut graph = OpGraph::new();
    graph.add_node(&hinted, "gemm", &[F32, F32], &[F32]);
    graph.add_node(&plain, "relu", &[F32], &[F32]);
    let linker = Linker::new(vec![Box::new(Interpreter)]);
    let id = mode.compile(&mut functions, &linker, &graph, "hinted").unwrap();
    mode.call(&mut functions, id).unwrap();

    let session = mode.session();
    let mut session = session.lock().unwrap();
    // Pin times: 2 MFlop in 0.5s at one call = 4 MFlops/s
    let function = functions.get(id).unwrap();
    for (index, node) in function.nodes().iter().enumerate() {
        session
            .apply_time
            .insert(ApplyKey { index, node: node.id }, 0.5);
    }

    let ops = dataflow_profiler::profiling::op_rollups(&session, &functions);
    let gemm = ops.iter().find(|o| o.op.label() == "Gemm{32}").unwrap();
    assert_close(gemm.mflops.unwrap(), 4.0);
    let relu = ops.iter().find(|o| o.op.label() == "Relu{32}").unwrap();
    assert!(relu.mflops.is_none());

    let classes = dataflow_profiler::profiling::class_rollups(&ops);
    let gemm_class = classes.iter().find(|c| c.name == "Gemm").unwrap();
    assert_close(gemm_class.mflops.unwrap(), 4.0);
    assert!(classes
        .iter()
        .find(|c| c.name == "Relu")
        .unwrap()
        .mflops
        .is_none());
}

#[test]
fn test_diff_against_self_is_zero() {
    let mode = ProfileMode::new();
    let mut functions = FunctionRegistry::new();
    add_mul_scenario(&mode, &mut functions);

    let session = mode.session();
    let session = session.lock().unwrap();
    let diffed = session.diff(&session);

    assert!(diffed.apply_time.values().all(|&t| t == 0.0));
    assert!(diffed.fct_call_time.values().all(|&t| t == 0.0));
    assert!(diffed.fct_call_count.values().all(|&c| c == 0));
    assert_eq!(diffed.compile_time, 0.0);
    assert_eq!(diffed.op_is_native, session.op_is_native);
}

#[test]
fn test_diff_is_antisymmetric() {
    let mut a = ProfileSession::new();
    let mut b = ProfileSession::new();

    let shared = dataflow_profiler::NodeId(9000);
    let only_a = dataflow_profiler::NodeId(9001);
    let only_b = dataflow_profiler::NodeId(9002);
    a.add_apply_time(0, shared, 0.5);
    b.add_apply_time(0, shared, 0.2);
    a.add_apply_time(1, only_a, 0.3);
    b.add_apply_time(2, only_b, 0.7);
    a.add_compile_time(1.5);
    b.add_compile_time(0.5);
    a.record_call(dataflow_profiler::FnId(0), 1.0);
    b.record_call(dataflow_profiler::FnId(0), 0.25);
    b.record_call(dataflow_profiler::FnId(1), 0.25);

    let ab = a.diff(&b);
    let ba = b.diff(&a);

    assert_eq!(ab.apply_time.len(), ba.apply_time.len());
    for (key, &value) in &ab.apply_time {
        assert_close(value, -ba.apply_time[key]);
    }
    for (key, &value) in &ab.fct_call_time {
        assert_close(value, -ba.fct_call_time[key]);
    }
    for (key, &value) in &ab.fct_call_count {
        assert_eq!(value, -ba.fct_call_count[key]);
    }
    assert_close(ab.compile_time, -ba.compile_time);

    // Keys present on one side only count as zero on the other
    let only_b_key = ApplyKey { index: 2, node: only_b };
    assert_close(ab.apply_time[&only_b_key], -0.7);
    assert_close(ba.apply_time[&only_b_key], 0.7);
}

#[test]
fn test_snapshot_round_trip_through_file() {
    let mode = ProfileMode::new();
    let mut functions = FunctionRegistry::new();
    add_mul_scenario(&mode, &mut functions);

    let session = mode.session();
    let session = session.lock().unwrap();
    let snapshot = session.snapshot();
    let json = snapshot.to_json().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    std::fs::write(&path, &json).unwrap();
    let loaded = SessionSnapshot::from_json(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let restored = ProfileSession::restore(loaded).unwrap();

    assert_eq!(restored.apply_time, session.apply_time);
    assert_eq!(restored.op_is_native, session.op_is_native);
    assert_eq!(restored.fct_call_time, session.fct_call_time);
    assert_eq!(restored.fct_call_count, session.fct_call_count);
    assert_close(restored.compile_time, session.compile_time);
    // The restored epoch is rebased, not reset
    assert!(restored.elapsed() >= snapshot.elapsed_secs);
}

#[test]
fn test_snapshot_version_is_checked() {
    let mut snapshot = ProfileSession::new().snapshot();
    snapshot.version = 99;
    match ProfileSession::restore(snapshot) {
        Err(Error::UnsupportedSnapshot(99)) => {}
        other => panic!("expected UnsupportedSnapshot, got {:?}", other),
    }
}

#[test]
fn test_cyclic_graph_is_rejected() {
    let op = host_op("Add", "Add{f32}");
    let mut graph = OpGraph::new();
    let a = graph.add_node(&op, "a", &[F32], &[F32]);
    let b = graph.add_node(&op, "b", &[F32], &[F32]);
    graph.add_dependency(b, a).unwrap();
    graph.add_dependency(a, b).unwrap();

    let linker = Linker::new(vec![Box::new(Interpreter)]);
    match linker.link(&graph, "cyclic") {
        Err(Error::CyclicGraph(_)) => {}
        other => panic!("expected CyclicGraph, got {:?}", other.map(|f| f.name().to_string())),
    }
}

#[test]
#[should_panic(expected = "exactly one")]
fn test_multiple_thunks_per_node_are_fatal() {
    let op = host_op("Add", "Add{f32}");
    let mut graph = OpGraph::new();
    graph.add_node(&op, "a", &[F32], &[F32]);

    let mode = ProfileMode::new();
    let mut functions = FunctionRegistry::new();
    let linker = Linker::new(vec![Box::new(Interpreter), Box::new(NativeBackend::new())]);
    let _ = mode.compile(&mut functions, &linker, &graph, "ambiguous");
}

#[test]
fn test_mode_registry_register_and_default() {
    let mut registry = dataflow_profiler::ModeRegistry::new();
    let first = Arc::new(ProfileMode::new());
    let second = Arc::new(ProfileMode::new());

    registry.register("profile", Arc::clone(&first)).unwrap();
    registry.register("profile-verbose", second).unwrap();
    assert!(registry.get("profile").is_some());
    assert!(Arc::ptr_eq(&registry.default_mode().unwrap(), &first));

    match registry.register("profile", Arc::new(ProfileMode::new())) {
        Err(Error::DuplicateMode(key)) => assert_eq!(key, "profile"),
        other => panic!("expected DuplicateMode, got {:?}", other.err()),
    }

    registry.set_default("profile-verbose").unwrap();
    assert!(!Arc::ptr_eq(&registry.default_mode().unwrap(), &first));
    assert!(registry.set_default("missing").is_err());
}
