use super::ObjRef;
use crate::chunk::Chunk;
use crate::value::Value;
use crate::vm::Vm;

/// A compiled function prototype: fixed arity, captured-upvalue count, a
/// chunk of bytecode, and an optional name for stack traces.
pub struct Function {
    pub arity: u8,
    pub upvalue_count: u8,
    pub chunk: Chunk,
    pub name: Option<ObjRef>,
}

impl Function {
    pub fn new(name: Option<ObjRef>) -> Self {
        Function { arity: 0, upvalue_count: 0, chunk: Chunk::new(), name }
    }
}

/// A function paired with the upvalues it closed over.
pub struct Closure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

/// A captured variable. `location` points into a live stack slot while the
/// upvalue is open; closing copies the value into `closed` and repoints
/// `location` at that field, which is then stable for the object's lifetime.
pub struct Upvalue {
    pub location: *mut Value,
    pub closed: Value,
    /// Links the open-upvalue list, kept in descending stack-address order.
    pub next_open: Option<ObjRef>,
}

/// Receiver bound to a method or native-method value, produced by property
/// access on an instance (`obj.method` without an immediate call).
pub struct BoundMethod {
    pub receiver: Value,
    pub method: Value,
}

pub type NativeFn = fn(vm: &mut Vm, args: &[Value]) -> Value;

/// A Rust function exposed to scripts. `is_method` natives receive the
/// receiver as `args[0]`.
pub struct Native {
    pub function: NativeFn,
    pub arity: u8,
    pub is_method: bool,
}
