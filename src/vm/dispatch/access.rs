//! Variable access (locals, upvalues, globals), property access, and
//! iterable subscripting (list/range/string index and store).

use crate::object::{List, ObjKind};
use crate::value::Value;
use crate::vm::{Signal, Vm};

fn is_instance(value: Value) -> bool {
    matches!(value, Value::Obj(o) if o.kind() == ObjKind::Instance)
}

fn is_string(value: Value) -> bool {
    matches!(value, Value::Obj(o) if o.kind() == ObjKind::String)
}

fn is_list(value: Value) -> bool {
    matches!(value, Value::Obj(o) if o.kind() == ObjKind::List)
}

fn is_range(value: Value) -> bool {
    matches!(value, Value::Obj(o) if o.kind() == ObjKind::Range)
}

impl Vm {
    fn op_get_local(&mut self, long: bool) -> Result<Signal, String> {
        let slot = if long { self.read_u32() as usize } else { self.read_byte() as usize };
        let value = self.stack[self.frame().slot_base + slot];
        self.push(value)?;
        Ok(Signal::Continue)
    }

    fn op_set_local(&mut self, long: bool) -> Result<Signal, String> {
        let slot = if long { self.read_u32() as usize } else { self.read_byte() as usize };
        let value = self.peek(0);
        let base = self.frame().slot_base;
        self.stack[base + slot] = value;
        Ok(Signal::Continue)
    }

    fn op_get_upvalue(&mut self) -> Result<Signal, String> {
        let slot = self.read_byte() as usize;
        let upvalue = self.frame().closure.as_closure().expect("frame closure is always a Closure").upvalues[slot];
        let value = unsafe { *upvalue.as_upvalue().expect("upvalue slot holds an Upvalue").location };
        self.push(value)?;
        Ok(Signal::Continue)
    }

    fn op_set_upvalue(&mut self) -> Result<Signal, String> {
        let slot = self.read_byte() as usize;
        let value = self.peek(0);
        let upvalue = self.frame().closure.as_closure().expect("frame closure is always a Closure").upvalues[slot];
        unsafe { *upvalue.as_upvalue().expect("upvalue slot holds an Upvalue").location = value };
        Ok(Signal::Continue)
    }

    fn op_get_global(&mut self, long: bool) -> Result<Signal, String> {
        let name = if long { self.read_string_long() } else { self.read_string() };
        let Some(&value) = self.globals.get(&name) else {
            let text = name.as_string().expect("global names are always strings").as_str();
            return Err(format!("Undefined variable '{text}'."));
        };
        self.push(value)?;
        Ok(Signal::Continue)
    }

    fn op_define_global(&mut self, long: bool) -> Result<Signal, String> {
        let name = if long { self.read_string_long() } else { self.read_string() };
        self.globals.insert(name, self.peek(0));
        self.pop();
        Ok(Signal::Continue)
    }

    fn op_set_global(&mut self, long: bool) -> Result<Signal, String> {
        let name = if long { self.read_string_long() } else { self.read_string() };
        if !self.globals.contains_key(&name) {
            let text = name.as_string().expect("global names are always strings").as_str();
            return Err(format!("Undefined variable '{text}'."));
        }
        self.globals.insert(name, self.peek(0));
        Ok(Signal::Continue)
    }

    fn op_get_property(&mut self, long: bool) -> Result<Signal, String> {
        let receiver = self.peek(0);
        if !is_instance(receiver) {
            return Err("Only instances have properties.".to_string());
        }
        let Value::Obj(obj) = receiver else { unreachable!() };
        let instance = obj.as_instance().expect("checked is_instance");
        let name = if long { self.read_string_long() } else { self.read_string() };

        if let Some(&value) = instance.fields.get(&name) {
            self.pop();
            self.push(value)?;
            return Ok(Signal::Continue);
        }

        if self.bind_method(obj, name) {
            return Ok(Signal::Continue);
        }

        self.pop();
        self.push(Value::Nil)?;
        Ok(Signal::Continue)
    }

    fn op_set_property(&mut self, long: bool) -> Result<Signal, String> {
        let receiver = self.peek(1);
        if !is_instance(receiver) {
            return Err("Only instances have fields.".to_string());
        }
        let Value::Obj(obj) = receiver else { unreachable!() };
        let name = if long { self.read_string_long() } else { self.read_string() };
        let value = self.peek(0);
        obj.as_instance_mut().expect("checked is_instance").fields.insert(name, value);

        let value = self.pop();
        self.pop();
        self.push(value)?;
        Ok(Signal::Continue)
    }

    fn op_build_list(&mut self) -> Result<Signal, String> {
        let item_count = self.read_byte() as usize;
        let list = self.heap.alloc_list(List::new());
        self.push(Value::Obj(list))?;
        for i in (1..=item_count).rev() {
            let item = self.peek(i);
            list.as_list_mut().expect("just allocated as a List").items.push(item);
        }
        self.pop();
        for _ in 0..item_count {
            self.pop();
        }
        self.push(Value::Obj(list))?;
        Ok(Signal::Continue)
    }

    fn op_index_subscr(&mut self) -> Result<Signal, String> {
        let index = self.pop();
        let source = self.pop();

        if is_instance(source) {
            if !is_string(index) {
                return Err("Fields can only be accessed by strings.".to_string());
            }
            let Value::Obj(obj) = source else { unreachable!() };
            let Value::Obj(name) = index else { unreachable!() };
            let instance = obj.as_instance().expect("checked is_instance");

            if let Some(&value) = instance.fields.get(&name) {
                self.push(value)?;
                return Ok(Signal::Continue);
            }

            self.push(source)?;
            if self.bind_method(obj, name) {
                return Ok(Signal::Continue);
            }
            self.push(Value::Nil)?;
            return Ok(Signal::Continue);
        }

        let Value::Number(idx_f) = index else {
            return Err("Index is not a number.".to_string());
        };
        let idx = idx_f as i64;

        match source {
            Value::Obj(obj) if is_list(source) => {
                let list = obj.as_list().expect("checked is_list");
                if list.is_in_bounds(idx) {
                    self.push(list.items[idx as usize])?;
                } else {
                    self.push(Value::Nil)?;
                }
            }
            Value::Obj(obj) if is_range(source) => {
                let range = obj.as_range().expect("checked is_range");
                if range.is_in_bounds(idx) {
                    self.push(Value::Number(range.value_at(idx)))?;
                } else {
                    self.push(Value::Nil)?;
                }
            }
            Value::Obj(obj) if is_string(source) => {
                let s = obj.as_string().expect("checked is_string");
                if idx >= 0 && (idx as usize) < s.as_str().len() {
                    let byte = s.as_str().as_bytes()[idx as usize];
                    let ch = self.heap.intern(std::str::from_utf8(&[byte]).unwrap_or("?"));
                    self.push(Value::Obj(ch))?;
                } else {
                    self.push(Value::Nil)?;
                }
            }
            _ => return Err("Invalid range type.".to_string()),
        }
        Ok(Signal::Continue)
    }

    /// Lists and instance fields mutate their heap object in place; strings
    /// are interned and immutable here, so assigning into one produces a
    /// fresh interned string rather than mutating the original binding's
    /// referent.
    fn op_store_subscr(&mut self) -> Result<Signal, String> {
        let item = self.pop();
        let index = self.pop();
        let source = self.pop();

        if is_instance(source) {
            if !is_string(index) {
                return Err("Fields can only be accessed by strings.".to_string());
            }
            let Value::Obj(obj) = source else { unreachable!() };
            let Value::Obj(name) = index else { unreachable!() };
            obj.as_instance_mut().expect("checked is_instance").fields.insert(name, item);
            self.push(item)?;
            return Ok(Signal::Continue);
        }

        let Value::Number(idx_f) = index else {
            return Err("List index is not a number.".to_string());
        };
        let idx = idx_f as i64;

        match source {
            Value::Obj(obj) if is_list(source) => {
                let list = obj.as_list_mut().expect("checked is_list");
                if !list.is_in_bounds(idx) {
                    return Err("Invalid list index.".to_string());
                }
                list.items[idx as usize] = item;
                self.push(item)?;
            }
            Value::Obj(obj) if is_string(source) => {
                let Value::Obj(char_obj) = item else {
                    return Err("You can only assign characters.".to_string());
                };
                if char_obj.kind() != ObjKind::String {
                    return Err("You can only assign characters.".to_string());
                }
                let replacement = char_obj.as_string().expect("checked kind").as_str();
                if replacement.chars().count() != 1 {
                    return Err("Invalid string length.".to_string());
                }
                let replacement_byte = replacement.as_bytes()[0];
                let target = obj.as_string_mut().expect("checked is_string");
                if idx < 0 || (idx as usize) >= target.as_str().len() {
                    return Err("Invalid string index.".to_string());
                }
                target.set_byte(idx as usize, replacement_byte);
                self.push(item)?;
            }
            _ => return Err("Cannot store value.".to_string()),
        }
        Ok(Signal::Continue)
    }

    fn op_range_in_bounds(&mut self) -> Result<Signal, String> {
        let Value::Number(idx_f) = self.peek(0) else {
            return Err("List index is not a number.".to_string());
        };
        self.pop();
        let idx = idx_f as i64;
        let source = self.pop();

        let in_bounds = match source {
            Value::Obj(obj) if is_range(source) => obj.as_range().expect("checked is_range").is_in_bounds(idx),
            Value::Obj(obj) if is_list(source) => obj.as_list().expect("checked is_list").is_in_bounds(idx),
            Value::Obj(obj) if is_string(source) => idx >= 0 && (idx as usize) < obj.as_string().expect("checked is_string").as_str().len(),
            _ => return Err("Invalid range type.".to_string()),
        };
        self.push(Value::Bool(in_bounds))?;
        Ok(Signal::Continue)
    }
}
