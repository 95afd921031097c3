//! Value-to-text conversions. Two distinct paths, matching the reference
//! interpreter's split between what `print` shows and what string
//! coercion (`+`, no-`toString()` instance interpolation) produces:
//! printing brackets and comma-spaces a list, coercion runs its items
//! together with bare commas and no brackets.

use crate::object::ObjKind;
use crate::value::Value;

fn primitive_str(value: Value) -> Option<String> {
    match value {
        Value::Nil => Some("nil".to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Obj(_) => None,
    }
}

/// What `print` writes for a value that is not (or has already been
/// resolved past) a class instance with a `toString` method.
pub(crate) fn display_value(value: Value) -> String {
    if let Some(s) = primitive_str(value) {
        return s;
    }
    let Value::Obj(obj) = value else { unreachable!() };
    match obj.kind() {
        ObjKind::String => obj.as_string().unwrap().as_str().to_string(),
        ObjKind::Native => "<native fn>".to_string(),
        ObjKind::Upvalue => "upvalue".to_string(),
        ObjKind::Function => display_function(obj),
        ObjKind::Closure => display_function(obj.as_closure().unwrap().function),
        ObjKind::BoundMethod => display_value(obj.as_bound_method().unwrap().method),
        ObjKind::Range => {
            let r = obj.as_range().unwrap();
            format!("{}..{}", r.min, r.max)
        }
        ObjKind::List => {
            let items = &obj.as_list().unwrap().items;
            let rendered: Vec<String> = items.iter().map(|&v| display_value(v)).collect();
            format!("[{}]", rendered.join(", "))
        }
        ObjKind::Class => obj.as_class().unwrap().name.as_string().unwrap().as_str().to_string(),
        ObjKind::Instance => {
            format!("{} instance", obj.as_instance().unwrap().class.as_class().unwrap().name.as_string().unwrap().as_str())
        }
    }
}

fn display_function(obj: crate::object::ObjRef) -> String {
    match obj.as_function().unwrap().name {
        Some(name) => format!("<fn {}>", name.as_string().unwrap().as_str()),
        None => "<script>".to_string(),
    }
}

/// What string coercion (`"x" + value`, list-as-string) produces for a
/// value that is not (or has already been resolved past) a class instance
/// with a `toString` method.
pub(crate) fn coerce_to_string(value: Value) -> String {
    if let Some(s) = primitive_str(value) {
        return s;
    }
    let Value::Obj(obj) = value else { unreachable!() };
    match obj.kind() {
        ObjKind::String => obj.as_string().unwrap().as_str().to_string(),
        ObjKind::Native => "<native fn>".to_string(),
        ObjKind::Function => display_function(obj),
        ObjKind::Closure => display_function(obj.as_closure().unwrap().function),
        ObjKind::BoundMethod => coerce_to_string(obj.as_bound_method().unwrap().method),
        ObjKind::Range => {
            let r = obj.as_range().unwrap();
            format!("{}..{}", r.min, r.max)
        }
        ObjKind::List => {
            let items = &obj.as_list().unwrap().items;
            let rendered: Vec<String> = items.iter().map(|&v| coerce_to_string(v)).collect();
            rendered.join(",")
        }
        ObjKind::Class => obj.as_class().unwrap().name.as_string().unwrap().as_str().to_string(),
        ObjKind::Instance => {
            format!("{} instance", obj.as_instance().unwrap().class.as_class().unwrap().name.as_string().unwrap().as_str())
        }
        ObjKind::Upvalue => "upvalue".to_string(),
    }
}
