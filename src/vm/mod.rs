//! The stack-based bytecode interpreter: call frames, the operand stack,
//! the open-upvalue list, and the pieces of the GC protocol that only the
//! VM can supply (root marking, the allocation-threshold check).
//!
//! [`dispatch`] holds the opcode handlers; everything here is frame/stack
//! bookkeeping, call machinery, and the two public entry points
//! ([`Vm::interpret`] and [`Vm::call_function`]).

mod dispatch;
mod format;
mod natives;

use std::io::{self, Write};

use crate::chunk::OpCode;
use crate::compiler::Compiler;
use crate::error::{CompileError, FrameTrace, InterpretError, RuntimeError};
use crate::gc::Heap;
use crate::object::{Class, Closure, Function, Instance, NativeFn, ObjKind, ObjRef, Upvalue};
use crate::value::Value;

const STACK_MAX: usize = 256;
const FRAMES_MAX: usize = 255;

pub(crate) struct CallFrame {
    pub closure: ObjRef,
    pub ip: usize,
    pub slot_base: usize,
}

impl CallFrame {
    fn function(&self) -> &'static Function {
        self.closure.as_closure().expect("call frame closure is always a Closure").function.as_function().expect("closure always wraps a Function")
    }
}

/// What a dispatched opcode asks the main loop to do next.
pub(crate) enum Signal {
    Continue,
    Returned,
}

/// The interpreter: owns the heap, the operand/frame stacks, globals, and
/// the output sink scripts print through.
pub struct Vm {
    pub(crate) heap: Heap,
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<CallFrame>,
    pub(crate) open_upvalues: Option<ObjRef>,
    pub(crate) globals: std::collections::HashMap<ObjRef, Value>,
    output: Box<dyn Write>,
    external_marking_func: Option<Box<dyn FnMut(&mut Vm)>>,
    natives_defined: bool,
    force_long_ops: bool,
}

impl Vm {
    pub fn new() -> Self {
        Vm::with_writer(Box::new(io::stdout()))
    }

    /// Builds a VM that prints through `writer` instead of stdout, so tests
    /// can assert on `print` output.
    pub fn with_writer(writer: Box<dyn Write>) -> Self {
        Vm {
            heap: Heap::new(),
            stack: Vec::with_capacity(STACK_MAX),
            frames: Vec::with_capacity(FRAMES_MAX),
            open_upvalues: None,
            globals: std::collections::HashMap::new(),
            output: writer,
            external_marking_func: None,
            natives_defined: false,
            force_long_ops: false,
        }
    }

    /// Lets an embedder trace extra roots (e.g. values it is holding
    /// outside the VM) during every collection.
    pub fn set_external_marking_func(&mut self, func: Box<dyn FnMut(&mut Vm)>) {
        self.external_marking_func = Some(func);
    }

    /// Forces a collection cycle on every allocation instead of waiting for
    /// `bytes_allocated` to cross `next_gc`. Exists for tests that want
    /// maximum GC pressure per program run (spec.md §4.4's stress flag).
    pub fn set_gc_stress_mode(&mut self, enabled: bool) {
        self.heap.stress_gc = enabled;
    }

    /// Forces every short/long opcode pair the compiler emits to its long
    /// (4-byte operand) form, regardless of whether the index would fit in
    /// a byte. A debug/test convenience (spec.md §4.2's `FORCE_LONG_OPS`)
    /// for exercising the long-form decode paths without needing a program
    /// with 256+ locals or constants to trigger them naturally.
    pub fn set_force_long_ops(&mut self, enabled: bool) {
        self.force_long_ops = enabled;
    }

    fn ensure_natives_defined(&mut self) {
        if self.natives_defined {
            return;
        }
        self.natives_defined = true;
        natives::register(self);
    }

    // ---- operand stack --------------------------------------------------

    pub(crate) fn push(&mut self, value: Value) -> Result<(), String> {
        if self.stack.len() >= STACK_MAX {
            return Err("Stack overflow.".to_string());
        }
        self.stack.push(value);
        Ok(())
    }

    /// Push used internally in contexts the data model guarantees can
    /// never overflow (e.g. right after popping the same number of slots).
    pub(crate) fn push_unchecked(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Value {
        self.stack.pop().expect("pop on an empty operand stack")
    }

    pub fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn reset_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues = None;
    }

    // ---- native registration ---------------------------------------------

    /// Registers `name` as a global bound to a native function.
    pub fn define_native(&mut self, name: &str, arity: u8, function: NativeFn) {
        let interned = self.heap.intern(name);
        let native = self.heap.alloc_native(crate::object::Native { function, arity, is_method: false });
        self.globals.insert(interned, Value::Obj(native));
    }

    /// Registers `name` as a global class whose methods are all native.
    /// A method literally named `init` becomes the class's initializer.
    pub fn define_native_class(&mut self, name: &str, methods: &[(&str, u8, NativeFn)]) {
        let class_name = self.heap.intern(name);
        let class_ref = self.heap.alloc_class(Class::new(class_name));

        for &(method_name, arity, function) in methods {
            let native = self.heap.alloc_native(crate::object::Native { function, arity, is_method: true });
            let class = class_ref.as_class_mut().expect("just allocated a Class");
            if method_name == "init" {
                class.initializer = Some(Value::Obj(native));
            } else {
                let interned = self.heap.intern(method_name);
                class.methods.insert(interned, Value::Obj(native));
            }
        }

        self.globals.insert(class_name, Value::Obj(class_ref));
    }

    // ---- entry points -----------------------------------------------------

    /// Compiles and runs `source` as a fresh top-level script.
    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        self.ensure_natives_defined();

        let function_ref = match Compiler::compile_with_options(source, &mut self.heap, self.force_long_ops) {
            Ok(f) => f,
            Err(errors) => return Err(InterpretError::Compile(errors)),
        };

        self.push_unchecked(Value::Obj(function_ref));
        let closure_ref = self.heap.alloc_closure(Closure { function: function_ref, upvalues: Vec::new() });
        self.pop();
        self.push_unchecked(Value::Obj(closure_ref));

        if let Err(msg) = self.call(closure_ref, 0) {
            let err = self.runtime_error(&msg);
            self.reset_stack();
            return Err(err.into());
        }

        match self.run(0) {
            Ok(()) => {
                // The top-level frame's own slot (the closure pushed above)
                // is never reclaimed by its own OP_RETURN, since frameCount
                // reaching zero short-circuits before any stack truncation.
                // Clearing here keeps "stack is empty after a successful
                // interpret" true regardless of that low-level detail.
                self.stack.clear();
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Re-enters the dispatch loop to invoke `callable` with `args`, used by
    /// higher-order natives (`map`, `filter`, `reduce`, `findIf`) that must
    /// call back into user code. The callable and its arguments are pushed
    /// onto the operand stack for the duration of the call so the GC can
    /// never see them as unreachable intermediates mid-dispatch.
    pub fn call_function(&mut self, callable: Value, args: &[Value]) -> Result<Value, RuntimeError> {
        let depth = self.frames.len();

        if let Err(msg) = self.push(callable) {
            return Err(self.runtime_error(&msg));
        }
        for &arg in args {
            if let Err(msg) = self.push(arg) {
                return Err(self.runtime_error(&msg));
            }
        }

        if let Err(msg) = self.call_value(callable, args.len() as u8) {
            return Err(self.runtime_error(&msg));
        }

        if self.frames.len() > depth {
            self.run(depth)?;
        }

        Ok(self.pop())
    }

    // ---- main dispatch loop -------------------------------------------------

    /// Runs until the frame stack unwinds back to `depth` (0 for a
    /// top-level script, `frames.len()` at call time for a re-entrant
    /// `call_function`).
    pub(crate) fn run(&mut self, depth: usize) -> Result<(), RuntimeError> {
        loop {
            if self.heap.should_collect() {
                self.collect_garbage();
            }

            let op_byte = self.read_byte();
            let Some(op) = OpCode::from_byte(op_byte) else {
                return Err(self.runtime_error("Corrupt bytecode: unknown opcode."));
            };

            match dispatch::execute(self, op) {
                Ok(Signal::Continue) => {}
                Ok(Signal::Returned) => {
                    if self.frames.len() == depth {
                        return Ok(());
                    }
                }
                Err(msg) => return Err(self.runtime_error(&msg)),
            }
        }
    }

    // ---- bytecode reading ---------------------------------------------------

    fn frame(&self) -> &CallFrame {
        self.frames.last().expect("read with an empty frame stack")
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("read with an empty frame stack")
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frame_mut();
        let byte = frame.function().chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let frame = self.frame_mut();
        let value = frame.function().chunk.read_u16(frame.ip);
        frame.ip += 2;
        value
    }

    fn read_u32(&mut self) -> u32 {
        let frame = self.frame_mut();
        let value = frame.function().chunk.read_u32(frame.ip);
        frame.ip += 4;
        value
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        self.frame().function().chunk.constants[index]
    }

    fn read_constant_long(&mut self) -> Value {
        let index = self.read_u32() as usize;
        self.frame().function().chunk.constants[index]
    }

    fn read_string(&mut self) -> ObjRef {
        self.read_constant().as_obj().expect("name constant is always a string")
    }

    fn read_string_long(&mut self) -> ObjRef {
        self.read_constant_long().as_obj().expect("name constant is always a string")
    }

    fn current_line(&self) -> u32 {
        let frame = self.frame();
        frame.function().chunk.line_at(frame.ip.saturating_sub(1))
    }

    // ---- calls --------------------------------------------------------------

    pub(crate) fn call(&mut self, closure: ObjRef, arg_count: u8) -> Result<(), String> {
        let function = closure.as_closure().expect("call on a non-Closure").function.as_function().expect("closure always wraps a Function");
        if arg_count != function.arity {
            return Err(format!("Expected {} arguments but got {}.", function.arity, arg_count));
        }
        if self.frames.len() == FRAMES_MAX {
            return Err("Stack overflow.".to_string());
        }

        let slot_base = self.stack.len() - arg_count as usize - 1;
        self.frames.push(CallFrame { closure, ip: 0, slot_base });
        Ok(())
    }

    pub(crate) fn call_value(&mut self, callee: Value, arg_count: u8) -> Result<(), String> {
        if let Value::Obj(obj) = callee {
            match obj.kind() {
                ObjKind::BoundMethod => {
                    let bound = obj.as_bound_method().expect("checked kind");
                    let base = self.stack.len() - arg_count as usize - 1;
                    self.stack[base] = bound.receiver;
                    return self.call_value(bound.method, arg_count);
                }
                ObjKind::Class => {
                    let class = obj.as_class().expect("checked kind");
                    let instance = self.heap.alloc_instance(Instance::new(obj));
                    let base = self.stack.len() - arg_count as usize - 1;
                    self.stack[base] = Value::Obj(instance);

                    if let Some(initializer) = class.initializer {
                        return self.call_value(initializer, arg_count);
                    }
                    if arg_count != 0 {
                        return Err(format!("Expected 0 arguments but got {arg_count}."));
                    }
                    return Ok(());
                }
                ObjKind::Closure => return self.call(obj, arg_count),
                ObjKind::Native => {
                    let native = obj.as_native().expect("checked kind");
                    if arg_count != native.arity {
                        return Err(format!("Expected {} arguments but got {}.", native.arity, arg_count));
                    }
                    let from = if native.is_method { self.stack.len() - arg_count as usize - 1 } else { self.stack.len() - arg_count as usize };
                    let args: Vec<Value> = self.stack[from..].to_vec();
                    let result = (native.function)(self, &args);
                    self.stack.truncate(self.stack.len() - arg_count as usize - 1);
                    self.push_unchecked(result);
                    return Ok(());
                }
                _ => {}
            }
        }
        Err("Can only call functions and classes.".to_string())
    }

    fn invoke_from_class(&mut self, class: ObjRef, name: ObjRef, arg_count: u8) -> Result<(), String> {
        let method = class.as_class().expect("invoke_from_class on a non-Class").methods.get(&name).copied();
        match method {
            Some(method) => self.call_value(method, arg_count),
            None => Err(format!("Undefined property '{}'.", name.as_string().expect("method names are interned strings").as_str())),
        }
    }

    fn invoke(&mut self, name: ObjRef, arg_count: u8) -> Result<(), String> {
        let receiver = self.peek(arg_count as usize);
        let Value::Obj(obj) = receiver else {
            return Err("Only instances have methods.".to_string());
        };
        if obj.kind() != ObjKind::Instance {
            return Err("Only instances have methods.".to_string());
        }
        let instance = obj.as_instance().expect("checked kind");

        if let Some(&value) = instance.fields.get(&name) {
            let base = self.stack.len() - arg_count as usize - 1;
            self.stack[base] = value;
            return self.call_value(value, arg_count);
        }

        self.invoke_from_class(instance.class, name, arg_count)
    }

    /// Replaces the instance on top of the stack with a bound method (or
    /// `nil` if `name` is not a method), per `GET_PROPERTY`'s fallback path.
    fn bind_method(&mut self, instance: ObjRef, name: ObjRef) -> bool {
        let class = instance.as_instance().expect("bind_method on a non-Instance").class;
        let method = class.as_class().expect("instance class is always a Class").methods.get(&name).copied();
        match method {
            Some(method) => {
                let bound = self.heap.alloc_bound_method(crate::object::BoundMethod { receiver: Value::Obj(instance), method });
                self.pop();
                self.push_unchecked(Value::Obj(bound));
                true
            }
            None => {
                self.pop();
                self.push_unchecked(Value::Nil);
                false
            }
        }
    }

    fn capture_upvalue(&mut self, local: *mut Value) -> ObjRef {
        let mut prev: Option<ObjRef> = None;
        let mut current = self.open_upvalues;

        while let Some(up) = current {
            let up_data = up.as_upvalue().expect("open_upvalues list only holds upvalues");
            if up_data.location <= local {
                break;
            }
            prev = current;
            current = up_data.next_open;
        }

        if let Some(up) = current {
            if up.as_upvalue().expect("checked above").location == local {
                return up;
            }
        }

        let created = self.heap.alloc_upvalue(Upvalue { location: local, closed: Value::Nil, next_open: current });
        match prev {
            Some(p) => p.as_upvalue_mut().expect("checked above").next_open = Some(created),
            None => self.open_upvalues = Some(created),
        }
        debug_assert!(self.open_upvalues_descending(), "open upvalue list must stay sorted by decreasing stack address");
        created
    }

    /// `debug_assert`-only check for the data model's invariant 4: the open
    /// upvalue list is sorted by strictly decreasing `location`.
    fn open_upvalues_descending(&self) -> bool {
        let mut current = self.open_upvalues;
        let mut last: Option<*mut Value> = None;
        while let Some(up) = current {
            let data = up.as_upvalue().expect("open_upvalues list only holds upvalues");
            if let Some(prev_loc) = last {
                if data.location >= prev_loc {
                    return false;
                }
            }
            last = Some(data.location);
            current = data.next_open;
        }
        true
    }

    fn close_upvalues(&mut self, last: *mut Value) {
        while let Some(up) = self.open_upvalues {
            let data = up.as_upvalue_mut().expect("open_upvalues list only holds upvalues");
            if data.location < last {
                break;
            }
            data.closed = unsafe { *data.location };
            data.location = &mut data.closed as *mut Value;
            self.open_upvalues = data.next_open;
        }
    }

    fn define_method(&mut self, name: ObjRef) {
        let method = self.peek(0);
        let Value::Obj(class_ref) = self.peek(1) else {
            unreachable!("METHOD always runs with the class two slots down");
        };
        let class = class_ref.as_class_mut().expect("checked by the compiler's METHOD emission");
        if name.as_string().expect("method names are interned strings").as_str() == "init" {
            class.initializer = Some(method);
        } else {
            class.methods.insert(name, method);
        }
        self.pop();
    }

    /// Converts an instance to its `toString()` result if it defines one,
    /// consuming the value passed in either case.
    fn instance_to_string(&mut self, instance_val: Value) -> Result<Value, String> {
        let Value::Obj(instance) = instance_val else {
            unreachable!("instance_to_string is only called on Instance values");
        };
        let to_string = self.heap.intern("toString");
        let class = instance.as_instance().expect("checked by caller").class;
        let has_method = class.as_class().expect("instance class is always a Class").methods.contains_key(&to_string);
        if !has_method {
            return Ok(Value::Nil);
        }

        self.push(instance_val)?;
        self.bind_method(instance, to_string);
        let bound = self.pop();
        self.call_function(bound, &[]).map_err(|e| e.message)
    }

    // ---- errors -------------------------------------------------------------

    /// Builds a [`RuntimeError`] from `message` plus the live frame stack
    /// (newest first), then resets the VM to a clean, reusable state.
    pub(crate) fn runtime_error(&mut self, message: &str) -> RuntimeError {
        tracing::debug!(message, "runtime error, unwinding");
        let mut trace = Vec::with_capacity(self.frames.len());
        for frame in self.frames.iter().rev() {
            let function = frame.function();
            let line = function.chunk.line_at(frame.ip.saturating_sub(1));
            let function_name = function.name.map(|n| n.as_string().expect("function names are interned strings").as_str().to_string()).unwrap_or_else(|| "script".to_string());
            trace.push(FrameTrace { line, function_name });
        }
        self.reset_stack();
        RuntimeError { message: message.to_string(), frames: trace }
    }

    // ---- GC -------------------------------------------------------------------

    fn collect_garbage(&mut self) {
        tracing::debug!(bytes_allocated = self.heap.bytes_allocated, "gc cycle starting");
        if let Some(mut func) = self.external_marking_func.take() {
            func(self);
            self.external_marking_func = Some(func);
        }
        self.mark_roots();
        self.heap.blacken_all();
        self.heap.sweep();
        self.heap.grow_threshold();
    }

    fn mark_roots(&mut self) {
        let stack_values: Vec<Value> = self.stack.clone();
        for value in stack_values {
            self.heap.mark_value(value);
        }

        let closures: Vec<ObjRef> = self.frames.iter().map(|f| f.closure).collect();
        for closure in closures {
            self.heap.mark_object(closure);
        }

        let mut upvalue = self.open_upvalues;
        while let Some(up) = upvalue {
            self.heap.mark_object(up);
            upvalue = up.as_upvalue().expect("open_upvalues list only holds upvalues").next_open;
        }

        let globals: Vec<(ObjRef, Value)> = self.globals.iter().map(|(&k, &v)| (k, v)).collect();
        for (name, value) in globals {
            self.heap.mark_object(name);
            self.heap.mark_value(value);
        }
    }

    // ---- printing -------------------------------------------------------------

    pub(crate) fn write_line(&mut self, text: &str) {
        let _ = writeln!(self.output, "{text}");
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
