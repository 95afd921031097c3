//! End-to-end tests driving `Vm::interpret` against inline source strings,
//! asserting on captured `print` output and on compile/runtime error shapes.

use std::io::Write;
use std::sync::{Arc, Mutex};

use rowan_script::{InterpretError, Vm};

/// A `Write` sink that appends into a shared buffer, so the test can read
/// back everything a script printed after `interpret` returns.
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

/// Runs `source` to completion against a fresh `Vm`, returning everything it
/// printed. Panics with the interpret error's `Display` on failure.
fn run_ok(source: &str) -> String {
    let buf = SharedBuffer::new();
    let mut vm = Vm::with_writer(Box::new(buf.clone()));
    match vm.interpret(source) {
        Ok(()) => buf.contents(),
        Err(e) => panic!("expected {source:?} to run, got error: {e}"),
    }
}

fn run_err(source: &str) -> InterpretError {
    let mut vm = Vm::with_writer(Box::new(SharedBuffer::new()));
    vm.interpret(source).expect_err("expected interpret to fail")
}

// ---- round-trip / law tests (spec §8) ----

#[test]
fn prints_a_declared_variable() {
    assert_eq!(run_ok("var a = 2; print a;"), "2\n");
}

#[test]
fn number_plus_string_coerces_number_to_string() {
    assert_eq!(run_ok(r#"print 1 + "x";"#), "1x\n");
}

#[test]
fn string_plus_number_coerces_number_to_string() {
    assert_eq!(run_ok(r#"print "x" + 1;"#), "x1\n");
}

#[test]
fn for_in_ascending_range_counts_up() {
    assert_eq!(run_ok("for i in 1..3 { print i; }"), "1\n2\n3\n");
}

#[test]
fn for_in_descending_range_counts_down() {
    assert_eq!(run_ok("for i in 3..1 { print i; }"), "3\n2\n1\n");
}

#[test]
fn list_index_assignment_then_read_back() {
    assert_eq!(run_ok("var xs = [1,2,3]; xs[1] = 9; print xs[1];"), "9\n");
}

#[test]
fn match_range_pattern_with_guard() {
    assert_eq!(run_ok(r#"match 3 { 1..5 if true: print "in"; _: print "out"; }"#), "in\n");
}

#[test]
fn closure_upvalue_increments_independently_per_outer_call() {
    let source = r#"
        fun outer() {
            var x = 1;
            fun inner() { x = x + 1; return x; }
            return inner;
        }
        var a = outer();
        print a();
        print a();
        print a();
        var b = outer();
        print b();
    "#;
    assert_eq!(run_ok(source), "2\n3\n4\n2\n");
}

// ---- boundary behaviors (spec §8) ----

#[test]
fn call_arity_mismatch_is_a_runtime_error_naming_expected_and_actual() {
    let err = run_err("fun f(a, b) { return a + b; } f(1);");
    let InterpretError::Runtime(e) = err else { panic!("expected a runtime error") };
    assert!(e.message.contains("Expected 2 arguments but got 1"), "message was: {}", e.message);
}

#[test]
fn deep_recursion_overflows_the_frame_stack_and_recovers() {
    let mut vm = Vm::new();
    let err = vm.interpret("fun rec(n) { return rec(n + 1); } rec(0);").expect_err("should stack overflow");
    let InterpretError::Runtime(e) = err else { panic!("expected a runtime error") };
    assert!(e.message.to_lowercase().contains("stack overflow"), "message was: {}", e.message);

    // The VM is left in a clean, reusable state after a runtime error.
    assert!(vm.interpret("print 1;").is_ok());
}

#[test]
fn out_of_bounds_list_read_is_nil() {
    assert_eq!(run_ok("var xs = [1,2,3]; print xs[9];"), "nil\n");
}

#[test]
fn out_of_bounds_range_read_is_nil() {
    assert_eq!(run_ok("var r = 1..3; print r[9];"), "nil\n");
}

#[test]
fn out_of_bounds_string_read_is_nil() {
    assert_eq!(run_ok(r#"var s = "abc"; print s[9];"#), "nil\n");
}

#[test]
fn out_of_bounds_list_store_is_runtime_error() {
    let err = run_err("var xs = [1,2,3]; xs[9] = 1;");
    assert!(matches!(err, InterpretError::Runtime(_)));
}

#[test]
fn out_of_bounds_string_store_is_runtime_error() {
    let err = run_err(r#"var s = "abc"; s[9] = "Z";"#);
    assert!(matches!(err, InterpretError::Runtime(_)));
}

#[test]
fn assigning_a_multi_char_string_to_a_string_index_is_a_runtime_error() {
    let err = run_err(r#"var s = "abc"; s[0] = "Zz";"#);
    assert!(matches!(err, InterpretError::Runtime(_)));
}

#[test]
fn assigning_to_a_const_binding_is_a_compile_error() {
    let err = run_err("const a = 1; a = 2;");
    assert!(matches!(err, InterpretError::Compile(_)));
}

#[test]
fn assigning_to_a_const_binding_in_a_nested_scope_is_a_compile_error() {
    let err = run_err("{ const a = 1; a = 2; }");
    assert!(matches!(err, InterpretError::Compile(_)));
}

#[test]
fn reading_a_local_in_its_own_initializer_is_a_compile_error() {
    let err = run_err("{ var a = a; }");
    assert!(matches!(err, InterpretError::Compile(_)));
}

// ---- end-to-end scenarios (spec §8) ----

#[test]
fn scenario_arithmetic_precedence() {
    assert_eq!(run_ok("print 1 + 2 * 3;"), "7\n");
}

#[test]
fn scenario_class_init_and_method() {
    let source = r#"
        class Greeter {
            init(who) { this.who = who; }
            hi() { print "Hello, " + this.who; }
        }
        Greeter("world").hi();
    "#;
    assert_eq!(run_ok(source), "Hello, world\n");
}

#[test]
fn scenario_build_list_with_push_in_a_for_in_loop() {
    let source = "var xs = []; for i in 1..5 { push(xs, i * i); } print xs;";
    assert_eq!(run_ok(source), "[1, 4, 9, 16, 25]\n");
}

#[test]
fn scenario_map_with_a_lambda() {
    let source = "print map([1,2,3], fun(x){ return x + 10; });";
    assert_eq!(run_ok(source), "[11, 12, 13]\n");
}

#[test]
fn scenario_recursive_fibonacci() {
    let source = "fun fib(n){ if (n < 2) return n; return fib(n-1) + fib(n-2); } print fib(10);";
    assert_eq!(run_ok(source), "55\n");
}

#[test]
fn scenario_string_index_assignment() {
    let source = r#"var s = "abc"; s[1] = "Z"; print s;"#;
    assert_eq!(run_ok(source), "aZc\n");
}

// ---- additional coverage grounded in spec.md §4/§6 ----

#[test]
fn undefined_global_is_a_runtime_error() {
    let err = run_err("print nope;");
    assert!(matches!(err, InterpretError::Runtime(_)));
}

#[test]
fn bound_method_and_field_shadowing() {
    let source = r#"
        class Counter {
            init() { this.n = 0; }
            bump() { this.n = this.n + 1; return this.n; }
        }
        var c = Counter();
        print c.bump();
        print c.bump();
    "#;
    assert_eq!(run_ok(source), "1\n2\n");
}

#[test]
fn math_native_class_exposes_pi_abs_min() {
    assert_eq!(run_ok("print Math().abs(-5);"), "5\n");
    assert_eq!(run_ok("print Math().min(3, 1);"), "1\n");
}

#[test]
fn math_pi_is_set_on_init() {
    assert_eq!(run_ok("print Math().PI > 3.14;"), "true\n");
}

#[test]
fn reduce_native_has_arity_three() {
    assert_eq!(run_ok("print reduce([1,2,3,4], fun(acc, x){ return acc + x; }, 0);"), "10\n");
}

#[test]
fn force_long_ops_produces_the_same_results_as_short_form() {
    let source = r#"
        class Greeter {
            init(who) { this.who = who; }
            hi() { print "Hello, " + this.who; }
        }
        Greeter("world").hi();
        fun fib(n){ if (n < 2) return n; return fib(n-1) + fib(n-2); }
        print fib(10);
        var xs = []; for i in 1..5 { push(xs, i * i); } print xs;
    "#;

    let buf = SharedBuffer::new();
    let mut vm = Vm::with_writer(Box::new(buf.clone()));
    vm.set_force_long_ops(true);
    vm.interpret(source).unwrap_or_else(|e| panic!("expected to run under forced long ops, got: {e}"));
    assert_eq!(buf.contents(), "Hello, world\n55\n[1, 4, 9, 16, 25]\n");
}
