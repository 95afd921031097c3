//! Literals, stack plumbing, branches, calls, closures, and classes.

use crate::object::{Class, Closure, ObjKind};
use crate::value::Value;
use crate::vm::{Signal, Vm, format};

fn is_instance(value: Value) -> bool {
    matches!(value, Value::Obj(o) if o.kind() == ObjKind::Instance)
}

impl Vm {
    fn op_constant(&mut self) -> Result<Signal, String> {
        let value = self.read_constant();
        self.push(value)?;
        Ok(Signal::Continue)
    }

    fn op_constant_long(&mut self) -> Result<Signal, String> {
        let value = self.read_constant_long();
        self.push(value)?;
        Ok(Signal::Continue)
    }

    fn op_nil(&mut self) -> Result<Signal, String> {
        self.push(Value::Nil)?;
        Ok(Signal::Continue)
    }

    fn op_true(&mut self) -> Result<Signal, String> {
        self.push(Value::Bool(true))?;
        Ok(Signal::Continue)
    }

    fn op_false(&mut self) -> Result<Signal, String> {
        self.push(Value::Bool(false))?;
        Ok(Signal::Continue)
    }

    fn op_pop(&mut self) -> Result<Signal, String> {
        self.pop();
        Ok(Signal::Continue)
    }

    fn op_jump(&mut self) -> Result<Signal, String> {
        let offset = self.read_u16();
        self.frame_mut().ip += offset as usize;
        Ok(Signal::Continue)
    }

    fn op_jump_if_false(&mut self) -> Result<Signal, String> {
        let offset = self.read_u16();
        if self.peek(0).is_falsey() {
            self.frame_mut().ip += offset as usize;
        }
        Ok(Signal::Continue)
    }

    fn op_loop(&mut self) -> Result<Signal, String> {
        let offset = self.read_u16();
        self.frame_mut().ip -= offset as usize;
        Ok(Signal::Continue)
    }

    fn op_call(&mut self) -> Result<Signal, String> {
        let arg_count = self.read_byte();
        let callee = self.peek(arg_count as usize);
        self.call_value(callee, arg_count)?;
        Ok(Signal::Continue)
    }

    fn op_invoke(&mut self, long: bool) -> Result<Signal, String> {
        let method = if long { self.read_string_long() } else { self.read_string() };
        let arg_count = self.read_byte();
        self.invoke(method, arg_count)?;
        Ok(Signal::Continue)
    }

    fn op_closure(&mut self, long: bool) -> Result<Signal, String> {
        let function_val = if long { self.read_constant_long() } else { self.read_constant() };
        let function = function_val.as_obj().expect("CLOSURE operand is always a Function constant");
        let upvalue_count = function.as_function().expect("CLOSURE operand is always a Function").upvalue_count;

        let closure = self.heap.alloc_closure(Closure { function, upvalues: Vec::with_capacity(upvalue_count as usize) });
        self.push(Value::Obj(closure))?;

        for _ in 0..upvalue_count {
            let is_local = self.read_byte();
            let index = self.read_byte();
            let captured = if is_local != 0 {
                let slot = self.frame().slot_base + index as usize;
                // Safety: the stack never reallocates past `STACK_MAX`
                // capacity, so this pointer stays valid for as long as the
                // upvalue (open or closed) outlives it.
                let local_ptr = unsafe { self.stack.as_mut_ptr().add(slot) };
                self.capture_upvalue(local_ptr)
            } else {
                let enclosing = self.frame().closure.as_closure().expect("frame closure is always a Closure");
                enclosing.upvalues[index as usize]
            };
            closure.as_closure_mut().expect("just allocated as a Closure").upvalues.push(captured);
        }
        Ok(Signal::Continue)
    }

    fn op_close_upvalue(&mut self) -> Result<Signal, String> {
        let last = unsafe { self.stack.as_mut_ptr().add(self.stack.len() - 1) };
        self.close_upvalues(last);
        self.pop();
        Ok(Signal::Continue)
    }

    fn op_return(&mut self) -> Result<Signal, String> {
        let result = self.pop();
        let slot_base = self.frame().slot_base;
        let last = unsafe { self.stack.as_mut_ptr().add(slot_base) };
        self.close_upvalues(last);
        self.frames.pop();

        if self.frames.is_empty() {
            return Ok(Signal::Returned);
        }

        self.stack.truncate(slot_base);
        self.push_unchecked(result);
        Ok(Signal::Returned)
    }

    fn op_class(&mut self, long: bool) -> Result<Signal, String> {
        let name = if long { self.read_string_long() } else { self.read_string() };
        let class = self.heap.alloc_class(Class::new(name));
        self.push(Value::Obj(class))?;
        Ok(Signal::Continue)
    }

    fn op_method(&mut self, long: bool) -> Result<Signal, String> {
        let name = if long { self.read_string_long() } else { self.read_string() };
        self.define_method(name);
        Ok(Signal::Continue)
    }

    /// Instances with a `toString` method print its result; everything
    /// else prints through [`format::display_value`]. Always pops exactly
    /// the one value the expression pushed.
    fn op_print(&mut self) -> Result<Signal, String> {
        let original = self.peek(0);
        let rendered = if is_instance(original) {
            match self.instance_to_string(original)? {
                Value::Nil => format::display_value(original),
                coerced => format::display_value(coerced),
            }
        } else {
            format::display_value(original)
        };
        self.pop();
        self.write_line(&rendered);
        Ok(Signal::Continue)
    }
}
