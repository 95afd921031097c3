//! Property tests for the quantified invariants in spec.md §8: no
//! use-after-free across GC cycles, string identity⇔equality, and correct
//! results under maximum GC pressure (`set_gc_stress_mode(true)` forces a
//! collection on every allocation, per spec.md §4.4's stress flag).
//!
//! These drive `Vm::interpret` end-to-end rather than poking at heap
//! internals directly — the invariants are about observable behavior, and
//! the GC's job is that a program's result never depends on when a cycle
//! happened to run.

use std::io::Write;
use std::sync::{Arc, Mutex};

use proptest::prelude::*;
use rowan_script::Vm;

#[derive(Clone)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn new() -> Self {
        SharedBuffer(Arc::new(Mutex::new(Vec::new())))
    }

    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).expect("script output is valid UTF-8")
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Runs `source` under GC stress mode (a collection before every single
/// allocation), returning everything it printed.
fn run_under_stress(source: &str) -> String {
    let buf = SharedBuffer::new();
    let mut vm = Vm::with_writer(Box::new(buf.clone()));
    vm.set_gc_stress_mode(true);
    vm.interpret(source).unwrap_or_else(|e| panic!("expected {source:?} to run under GC stress, got: {e}"));
    buf.contents()
}

proptest! {
    // Each case here runs a whole program under stress mode (a GC cycle on
    // every single allocation); the default case count would make this
    // file by far the slowest in the suite, so it's trimmed down.
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// ∀ reachable Value after any number of GC cycles, `deref` is valid:
    /// building a list of `n` squares with a cycle forced on every push
    /// still produces the right list, so no element was collected while
    /// still reachable from the list on the stack.
    #[test]
    fn list_building_survives_gc_on_every_allocation(n in 1usize..40) {
        let source = format!(
            "var xs = []; for i in 1..{n} {{ push(xs, i * i); }} print xs;",
        );
        let expected: Vec<String> = (1..=n).map(|i| ((i * i) as f64).to_string()).collect();
        prop_assert_eq!(run_under_stress(&source), format!("[{}]\n", expected.join(", ")));
    }

    /// String identity = string equality (data model invariant 1): interning
    /// the same text twice, with a GC cycle forced between the two
    /// constants being materialized, still yields `==`.
    #[test]
    fn repeated_string_literals_stay_equal_under_gc_stress(word in "[a-z]{1,12}") {
        let source = format!(r#"var a = "{word}"; var b = "{word}"; print a == b;"#);
        prop_assert_eq!(run_under_stress(&source), "true\n");
    }

    /// Closures captured inside a loop each close over their own upvalue;
    /// forcing a cycle on every allocation while the loop runs exercises
    /// the open-upvalue list (capture, share, close) without corrupting any
    /// closure still reachable from the returned list.
    #[test]
    fn closures_built_in_a_loop_keep_independent_state_under_gc_stress(n in 1usize..20) {
        let source = format!(
            r#"
            var makers = [];
            for i in 0..{n} {{
                fun make() {{
                    var n = i;
                    fun get() {{ return n; }}
                    return get;
                }}
                push(makers, make());
            }}
            for i in 0..{n} {{
                print makers[i]();
            }}
            "#,
        );
        let expected: String = (0..=n).map(|i| format!("{i}\n")).collect();
        prop_assert_eq!(run_under_stress(&source), expected);
    }

    /// Recursive calls allocate a fresh call frame and (for fib) a fresh
    /// number per addition; running under stress mode exercises collection
    /// mid-recursion without disturbing any frame still on the call stack.
    #[test]
    fn recursive_fibonacci_is_unaffected_by_gc_stress(n in 1u32..14) {
        let source = format!(
            "fun fib(n) {{ if (n < 2) return n; return fib(n - 1) + fib(n - 2); }} print fib({n});",
        );
        let (mut a, mut b) = (0u64, 1u64);
        for _ in 0..n {
            let next = a + b;
            a = b;
            b = next;
        }
        prop_assert_eq!(run_under_stress(&source), format!("{a}\n"));
    }

    /// A class instance's fields are reachable only through the instance;
    /// building and reading several fields back under stress mode checks
    /// that no field value is swept while the instance itself is live.
    #[test]
    fn instance_fields_survive_gc_stress(values in proptest::collection::vec(0i32..1000, 1..10)) {
        let mut source = String::from("class Box { init() {} } var b = Box();\n");
        for (i, v) in values.iter().enumerate() {
            source.push_str(&format!("b.f{i} = {v};\n"));
        }
        for i in 0..values.len() {
            source.push_str(&format!("print b.f{i};\n"));
        }
        let expected: String = values.iter().map(|v| format!("{v}\n")).collect();
        prop_assert_eq!(run_under_stress(&source), expected);
    }
}

/// ∀ Chunk, the operand stack is empty at the end of a normal `interpret`
/// call (spec.md §8's last round-trip law) — checked indirectly: a second,
/// unrelated `interpret` call on the same `Vm` must succeed, which would
/// fail fast if the first call had left stale operands or frames behind.
#[test]
fn successive_interprets_on_one_vm_leave_no_residue_under_gc_stress() {
    let mut vm = Vm::with_writer(Box::new(SharedBuffer::new()));
    vm.set_gc_stress_mode(true);
    for i in 0..20 {
        let source = format!("var x = {i}; print x + 1;");
        vm.interpret(&source).unwrap_or_else(|e| panic!("iteration {i} failed: {e}"));
    }
}

/// A runtime error under GC stress still leaves the VM clean and reusable —
/// the reset-stack path (spec.md §7) must run regardless of how many
/// objects a cycle happened to sweep on the way to the error.
#[test]
fn runtime_error_recovery_is_unaffected_by_gc_stress() {
    let mut vm = Vm::with_writer(Box::new(SharedBuffer::new()));
    vm.set_gc_stress_mode(true);
    assert!(vm.interpret("var xs = [1,2,3]; xs[9] = 1;").is_err());
    assert!(vm.interpret("print 1 + 1;").is_ok());
}
