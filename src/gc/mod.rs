//! The tracing mark-and-sweep heap.
//!
//! Every heap object is allocated through [`Heap::alloc`] (or one of its
//! typed wrappers), which boxes a `GcObject<T>`, leaks it onto an intrusive
//! singly-linked list, and returns a type-erased [`ObjRef`] handle. Nothing
//! owns the boxes except this list; [`Heap::sweep`] is the only code that
//! ever reconstructs and drops one.

use std::collections::HashMap;
use std::ptr::NonNull;

use crate::object::{
    BoundMethod, Class, Closure, Function, GcHeader, GcObject, Instance, LString, List, Native, ObjKind, ObjRef, Range, Upvalue, fnv1a,
};
use crate::value::Value;

/// Starting `next_gc` threshold in bytes, per the data model.
const INITIAL_NEXT_GC: usize = 256;
/// Growth factor applied to `bytes_allocated` after a cycle.
const GC_HEAP_GROW_FACTOR: usize = 2;

pub struct Heap {
    objects: Option<NonNull<GcHeader>>,
    strings: HashMap<Box<str>, ObjRef>,
    gray: Vec<ObjRef>,
    pub bytes_allocated: usize,
    pub next_gc: usize,
    /// Forces a collection on every allocation; used by the property tests.
    pub stress_gc: bool,
    /// Lets an embedder defer collection while building multi-object state.
    pub can_collect: bool,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            objects: None,
            strings: HashMap::new(),
            gray: Vec::new(),
            bytes_allocated: 0,
            next_gc: INITIAL_NEXT_GC,
            stress_gc: false,
            can_collect: true,
        }
    }

    pub fn should_collect(&self) -> bool {
        self.can_collect && (self.stress_gc || self.bytes_allocated > self.next_gc)
    }

    pub fn grow_threshold(&mut self) {
        self.next_gc = self.bytes_allocated * GC_HEAP_GROW_FACTOR;
    }

    fn alloc<T>(&mut self, data: T, kind: ObjKind) -> ObjRef {
        let size = std::mem::size_of::<GcObject<T>>();
        let boxed = Box::new(GcObject { marked: false, kind, size, next: self.objects, data });
        let ptr = Box::into_raw(boxed);
        // Safety: `Box::into_raw` never returns null.
        let header = unsafe { NonNull::new_unchecked(ptr as *mut GcHeader) };
        self.objects = Some(header);
        self.bytes_allocated += size;
        ObjRef::from_header(header)
    }

    /// Interns `s`, returning the existing object if an equal string is
    /// already live.
    pub fn intern(&mut self, s: &str) -> ObjRef {
        if let Some(existing) = self.strings.get(s) {
            return *existing;
        }
        let hash = fnv1a(s.as_bytes());
        let obj = self.alloc(LString { bytes: s.into(), hash }, ObjKind::String);
        self.strings.insert(s.into(), obj);
        obj
    }

    pub fn alloc_function(&mut self, f: Function) -> ObjRef {
        self.alloc(f, ObjKind::Function)
    }

    pub fn alloc_closure(&mut self, c: Closure) -> ObjRef {
        self.alloc(c, ObjKind::Closure)
    }

    pub fn alloc_upvalue(&mut self, u: Upvalue) -> ObjRef {
        self.alloc(u, ObjKind::Upvalue)
    }

    pub fn alloc_bound_method(&mut self, b: BoundMethod) -> ObjRef {
        self.alloc(b, ObjKind::BoundMethod)
    }

    pub fn alloc_class(&mut self, c: Class) -> ObjRef {
        self.alloc(c, ObjKind::Class)
    }

    pub fn alloc_instance(&mut self, i: Instance) -> ObjRef {
        self.alloc(i, ObjKind::Instance)
    }

    pub fn alloc_range(&mut self, r: Range) -> ObjRef {
        self.alloc(r, ObjKind::Range)
    }

    pub fn alloc_list(&mut self, l: List) -> ObjRef {
        self.alloc(l, ObjKind::List)
    }

    pub fn alloc_native(&mut self, n: Native) -> ObjRef {
        self.alloc(n, ObjKind::Native)
    }

    /// Marks `obj`, pushing it onto the gray work list the first time.
    pub fn mark_object(&mut self, obj: ObjRef) {
        if obj.is_marked() {
            return;
        }
        obj.set_marked(true);
        self.gray.push(obj);
    }

    pub fn mark_value(&mut self, value: Value) {
        if let Value::Obj(obj) = value {
            self.mark_object(obj);
        }
    }

    /// Drains the gray work list, marking every object each gray object
    /// references, per the blacken table in the component design.
    pub fn blacken_all(&mut self) {
        while let Some(obj) = self.gray.pop() {
            match obj.kind() {
                ObjKind::String | ObjKind::Native | ObjKind::Range => {}
                ObjKind::List => {
                    let items = obj.as_list().unwrap().items.clone();
                    for item in items {
                        self.mark_value(item);
                    }
                }
                ObjKind::Upvalue => {
                    let closed = obj.as_upvalue().unwrap().closed;
                    self.mark_value(closed);
                }
                ObjKind::Function => {
                    let f = obj.as_function().unwrap();
                    if let Some(name) = f.name {
                        self.mark_object(name);
                    }
                    let constants = f.chunk.constants.clone();
                    for c in constants {
                        self.mark_value(c);
                    }
                }
                ObjKind::Closure => {
                    let c = obj.as_closure().unwrap();
                    self.mark_object(c.function);
                    for up in c.upvalues.clone() {
                        self.mark_object(up);
                    }
                }
                ObjKind::BoundMethod => {
                    let b = obj.as_bound_method().unwrap();
                    self.mark_value(b.receiver);
                    self.mark_value(b.method);
                }
                ObjKind::Class => {
                    let c = obj.as_class().unwrap();
                    self.mark_object(c.name);
                    if let Some(init) = c.initializer {
                        self.mark_value(init);
                    }
                    let methods: Vec<(ObjRef, Value)> = c.methods.iter().map(|(&k, &v)| (k, v)).collect();
                    for (name, method) in methods {
                        self.mark_object(name);
                        self.mark_value(method);
                    }
                }
                ObjKind::Instance => {
                    let i = obj.as_instance().unwrap();
                    self.mark_object(i.class);
                    let fields: Vec<(ObjRef, Value)> = i.fields.iter().map(|(&k, &v)| (k, v)).collect();
                    for (name, value) in fields {
                        self.mark_object(name);
                        self.mark_value(value);
                    }
                }
            }
        }
    }

    /// Unlinks and drops every unmarked object, clearing survivors back to
    /// white. The intern table is pruned first so no entry can outlive the
    /// `String` it names.
    pub fn sweep(&mut self) {
        self.strings.retain(|_, obj| obj.is_marked());

        let mut current = self.objects;
        let mut prev: Option<NonNull<GcHeader>> = None;

        while let Some(node) = current {
            let (marked, size, next) = unsafe {
                let header = node.as_ref();
                (header.marked, header.size, header.next)
            };

            if marked {
                unsafe { (*node.as_ptr()).marked = false };
                prev = Some(node);
                current = next;
            } else {
                match prev {
                    Some(p) => unsafe { (*p.as_ptr()).next = next },
                    None => self.objects = next,
                }
                self.bytes_allocated -= size;
                unsafe { free_object(node) };
                current = next;
            }
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_the_same_bytes_returns_the_same_object() {
        let mut heap = Heap::new();
        let a = heap.intern("hello");
        let b = heap.intern("hello");
        assert_eq!(a, b);
    }

    #[test]
    fn interning_different_bytes_returns_different_objects() {
        let mut heap = Heap::new();
        let a = heap.intern("hello");
        let b = heap.intern("world");
        assert_ne!(a, b);
    }

    /// An unreached string is swept; a string reachable only through the
    /// intern table's own entry for it still counts as a root for this
    /// test's purposes, so mark it explicitly before sweeping.
    #[test]
    fn sweep_frees_unmarked_objects_and_keeps_marked_ones() {
        let mut heap = Heap::new();
        let kept = heap.intern("kept");
        let _dropped = heap.intern("dropped");
        assert_eq!(heap.strings.len(), 2);

        heap.mark_object(kept);
        heap.sweep();

        assert_eq!(heap.strings.len(), 1);
        assert!(heap.strings.contains_key("kept"));
        assert!(!heap.strings.contains_key("dropped"));
    }

    #[test]
    fn sweep_unmarks_survivors_for_the_next_cycle() {
        let mut heap = Heap::new();
        let kept = heap.intern("kept");
        heap.mark_object(kept);
        heap.sweep();
        assert!(!kept.is_marked());
    }

    #[test]
    fn blacken_all_marks_a_lists_elements_transitively() {
        let mut heap = Heap::new();
        let inner = heap.intern("nested");
        let list = heap.alloc_list(List { items: vec![Value::Obj(inner)] });

        heap.mark_object(list);
        heap.blacken_all();

        assert!(inner.is_marked());
    }

    #[test]
    fn an_object_reachable_only_through_an_unmarked_list_is_swept() {
        let mut heap = Heap::new();
        let inner = heap.intern("nested");
        let _list = heap.alloc_list(List { items: vec![Value::Obj(inner)] });

        // Nothing marks `_list` (and so never reaches `inner`) before this
        // sweep, mirroring a list that fell out of scope before a cycle.
        heap.sweep();

        assert!(!heap.strings.contains_key("nested"));
    }

    #[test]
    fn growing_the_threshold_doubles_bytes_allocated() {
        let mut heap = Heap::new();
        heap.intern("x");
        let before = heap.bytes_allocated;
        heap.grow_threshold();
        assert_eq!(heap.next_gc, before * GC_HEAP_GROW_FACTOR);
    }

    #[test]
    fn should_collect_respects_can_collect_and_stress_gc() {
        let mut heap = Heap::new();
        heap.can_collect = false;
        heap.stress_gc = true;
        assert!(!heap.should_collect());

        heap.can_collect = true;
        assert!(heap.should_collect());

        heap.stress_gc = false;
        heap.next_gc = usize::MAX;
        assert!(!heap.should_collect());
    }
}

/// Reconstructs the `Box<GcObject<T>>` matching the kind the object was
/// allocated with and drops it. Sound only because every object's `kind`
/// field is set at `alloc` time to exactly the `T` used there.
unsafe fn free_object(node: NonNull<GcHeader>) {
    let kind = unsafe { node.as_ref().kind };
    macro_rules! drop_typed {
        ($t:ty) => {
            drop(unsafe { Box::from_raw(node.cast::<GcObject<$t>>().as_ptr()) })
        };
    }
    match kind {
        ObjKind::String => drop_typed!(LString),
        ObjKind::Upvalue => drop_typed!(Upvalue),
        ObjKind::Function => drop_typed!(Function),
        ObjKind::Closure => drop_typed!(Closure),
        ObjKind::BoundMethod => drop_typed!(BoundMethod),
        ObjKind::Class => drop_typed!(Class),
        ObjKind::Instance => drop_typed!(Instance),
        ObjKind::Range => drop_typed!(Range),
        ObjKind::List => drop_typed!(List),
        ObjKind::Native => drop_typed!(Native),
    }
}
