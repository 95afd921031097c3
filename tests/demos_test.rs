//! Runs every script under `demos/` end-to-end and checks its printed
//! output, the way the teacher's own test suite drives fixture scripts
//! through its VM — except these are `include_str!`'d directly rather than
//! read from disk at test time, since a library crate has no guaranteed
//! working directory for its integration tests.

use std::io::Write;
use std::sync::{Arc, Mutex};

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

fn run_demo(source: &str) -> String {
    let buf = SharedBuffer::new();
    let mut vm = Vm::with_writer(Box::new(buf.clone()));
    vm.interpret(source).unwrap_or_else(|e| panic!("demo script failed: {e}"));
    buf.contents()
}

#[test]
fn fibonacci_demo_prints_the_first_eleven_terms() {
    let source = include_str!("../demos/fibonacci.rsn");
    assert_eq!(run_demo(source), "0\n1\n1\n2\n3\n5\n8\n13\n21\n34\n55\n");
}

#[test]
fn classes_demo_uses_init_fields_and_to_string() {
    let source = include_str!("../demos/classes.rsn");
    assert_eq!(run_demo(source), "(1, 2)\n(4, 6)\n");
}

#[test]
fn list_pipeline_demo_chains_the_iterable_natives() {
    let source = include_str!("../demos/list_pipeline.rsn");
    let expected = "[2, 4, 6, 8, 10, 12]\n[4, 8, 12]\n21\ntrue\n4\n5\n";
    assert_eq!(run_demo(source), expected);
}

#[test]
fn closures_demo_keeps_independent_counters() {
    let source = include_str!("../demos/closures.rsn");
    assert_eq!(run_demo(source), "1\n2\n101\n3\n102\n");
}

#[test]
fn pattern_match_demo_classifies_every_arm() {
    let source = include_str!("../demos/pattern_match.rsn");
    let expected = "zero\nsmall odd\nsmall even\nsmall odd\nsmall even\nsmall odd\nsmall even\nsmall odd\nsmall even\nsmall odd\nlarge\nlarge\nlarge\n";
    assert_eq!(run_demo(source), expected);
}
