//! Numeric and string arithmetic, list concatenation, and range construction.

use crate::object::{List, ObjKind};
use crate::value::Value;
use crate::vm::{Signal, Vm, format};

fn is_instance(value: Value) -> bool {
    matches!(value, Value::Obj(o) if o.kind() == ObjKind::Instance)
}

fn is_string(value: Value) -> bool {
    matches!(value, Value::Obj(o) if o.kind() == ObjKind::String)
}

fn is_list(value: Value) -> bool {
    matches!(value, Value::Obj(o) if o.kind() == ObjKind::List)
}

fn as_str(value: Value) -> &'static str {
    let Value::Obj(obj) = value else { unreachable!() };
    obj.as_string().expect("checked is_string").as_str()
}

impl Vm {
    fn validate_binary_operands(&mut self) -> Result<(), String> {
        if self.peek(0).as_number().is_none() || self.peek(1).as_number().is_none() {
            return Err("Operands must be numbers.".to_string());
        }
        Ok(())
    }

    fn op_negate(&mut self) -> Result<Signal, String> {
        let Some(n) = self.peek(0).as_number() else {
            return Err("Operand must be a number".to_string());
        };
        self.pop();
        self.push(Value::Number(-n))?;
        Ok(Signal::Continue)
    }

    /// Operand kinds in priority order: two strings concatenate, two
    /// numbers add, two lists concatenate, and otherwise any `String` side
    /// coerces the other operand (through an instance's `toString` first,
    /// if it has one).
    fn op_add(&mut self) -> Result<Signal, String> {
        let top = self.peek(0);
        let under = self.peek(1);

        if is_string(top) && is_string(under) {
            let b = as_str(top);
            let a = as_str(under);
            let joined = self.heap.intern(&format!("{a}{b}"));
            self.pop();
            self.pop();
            self.push(Value::Obj(joined))?;
        } else if let (Some(b), Some(a)) = (top.as_number(), under.as_number()) {
            self.pop();
            self.pop();
            self.push(Value::Number(a + b))?;
        } else if is_list(top) && is_list(under) {
            let Value::Obj(b_obj) = top else { unreachable!() };
            let Value::Obj(a_obj) = under else { unreachable!() };
            let mut items = a_obj.as_list().expect("checked is_list").items.clone();
            items.extend(b_obj.as_list().expect("checked is_list").items.iter().copied());
            let concat = self.heap.alloc_list(List { items });
            self.pop();
            self.pop();
            self.push(Value::Obj(concat))?;
        } else if is_string(top) {
            let coerced = if is_instance(under) {
                match self.instance_to_string(under)? {
                    Value::Obj(o) if o.kind() == ObjKind::String => o.as_string().unwrap().as_str().to_string(),
                    _ => format::coerce_to_string(under),
                }
            } else {
                format::coerce_to_string(under)
            };
            let b = as_str(self.peek(0));
            let joined = self.heap.intern(&format!("{coerced}{b}"));
            self.pop();
            self.pop();
            self.push(Value::Obj(joined))?;
        } else if is_string(under) {
            let coerced = if is_instance(top) {
                match self.instance_to_string(top)? {
                    Value::Obj(o) if o.kind() == ObjKind::String => o.as_string().unwrap().as_str().to_string(),
                    _ => format::coerce_to_string(top),
                }
            } else {
                format::coerce_to_string(top)
            };
            let b = as_str(self.peek(1));
            let joined = self.heap.intern(&format!("{b}{coerced}"));
            self.pop();
            self.pop();
            self.push(Value::Obj(joined))?;
        } else {
            return Err("Operands must be two numbers or two strings.".to_string());
        }
        Ok(Signal::Continue)
    }

    fn op_subtract(&mut self) -> Result<Signal, String> {
        self.validate_binary_operands()?;
        let b = self.pop().as_number().expect("validated numeric");
        let a = self.pop().as_number().expect("validated numeric");
        self.push(Value::Number(a - b))?;
        Ok(Signal::Continue)
    }

    fn op_multiply(&mut self) -> Result<Signal, String> {
        self.validate_binary_operands()?;
        let b = self.pop().as_number().expect("validated numeric");
        let a = self.pop().as_number().expect("validated numeric");
        self.push(Value::Number(a * b))?;
        Ok(Signal::Continue)
    }

    fn op_divide(&mut self) -> Result<Signal, String> {
        self.validate_binary_operands()?;
        let b = self.pop().as_number().expect("validated numeric");
        let a = self.pop().as_number().expect("validated numeric");
        self.push(Value::Number(a / b))?;
        Ok(Signal::Continue)
    }

    fn op_modulo(&mut self) -> Result<Signal, String> {
        self.validate_binary_operands()?;
        let b = self.pop().as_number().expect("validated numeric");
        let a = self.pop().as_number().expect("validated numeric");
        self.push(Value::Number(a % b))?;
        Ok(Signal::Continue)
    }

    fn op_increment(&mut self) -> Result<Signal, String> {
        let Some(n) = self.peek(0).as_number() else {
            return Err("Can only increment numbers".to_string());
        };
        self.pop();
        self.push(Value::Number(n + 1.0))?;
        Ok(Signal::Continue)
    }

    fn op_build_range(&mut self) -> Result<Signal, String> {
        self.validate_binary_operands()?;
        let max = self.pop().as_number().expect("validated numeric");
        let min = self.pop().as_number().expect("validated numeric");
        let range = self.heap.alloc_range(crate::object::Range::new(min, max));
        self.push(Value::Obj(range))?;
        Ok(Signal::Continue)
    }
}
