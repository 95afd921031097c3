//! Equality, pattern matching, ordering, and boolean negation.

use crate::object::ObjKind;
use crate::value::Value;
use crate::vm::{Signal, Vm};

fn is_range(value: Value) -> bool {
    matches!(value, Value::Obj(o) if o.kind() == ObjKind::Range)
}

impl Vm {
    fn op_equal(&mut self) -> Result<Signal, String> {
        let b = self.pop();
        let a = self.pop();
        self.push(Value::Bool(a == b))?;
        Ok(Signal::Continue)
    }

    /// `case` arm matching: a `Range` pattern matches by membership, every
    /// other pattern by structural equality.
    fn op_match(&mut self) -> Result<Signal, String> {
        let pattern = self.pop();
        let value = self.pop();
        let matched = if is_range(pattern) {
            match value {
                Value::Number(n) => {
                    let Value::Obj(obj) = pattern else { unreachable!() };
                    obj.as_range().expect("checked is_range").contains(n)
                }
                _ => false,
            }
        } else {
            value == pattern
        };
        self.push(Value::Bool(matched))?;
        Ok(Signal::Continue)
    }

    fn op_greater(&mut self) -> Result<Signal, String> {
        self.validate_binary_operands()?;
        let b = self.pop().as_number().expect("validated numeric");
        let a = self.pop().as_number().expect("validated numeric");
        self.push(Value::Bool(a > b))?;
        Ok(Signal::Continue)
    }

    fn op_less(&mut self) -> Result<Signal, String> {
        self.validate_binary_operands()?;
        let b = self.pop().as_number().expect("validated numeric");
        let a = self.pop().as_number().expect("validated numeric");
        self.push(Value::Bool(a < b))?;
        Ok(Signal::Continue)
    }

    fn op_not(&mut self) -> Result<Signal, String> {
        let value = self.pop();
        self.push(Value::Bool(value.is_falsey()))?;
        Ok(Signal::Continue)
    }
}
