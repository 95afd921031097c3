//! Compile-time scope chain: locals, captured upvalues, and the chunk being
//! assembled for one function body.

use crate::chunk::Chunk;
use crate::lexer::Token;
use crate::object::ObjRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

/// A local variable's slot. `depth = None` means "declared but not yet
/// initialized" — the sentinel that makes `var a = a;` a compile error.
/// Hidden locals synthesized by `for..in`/`match` skip that window by being
/// marked initialized the instant they're declared, since nothing can read
/// them before their first assignment.
pub struct Local<'src> {
    pub name: Token<'src>,
    pub depth: Option<u32>,
    pub is_captured: bool,
    pub is_const: bool,
}

pub struct UpvalueDesc {
    pub index: u8,
    pub is_local: bool,
}

/// One function's worth of compiler state. Owns its `enclosing` scope so a
/// nested function body can resolve variables up the chain without the
/// compiler juggling raw pointers.
pub struct Scope<'src> {
    pub enclosing: Option<Box<Scope<'src>>>,
    pub kind: FunctionKind,
    pub name: Option<ObjRef>,
    pub arity: u8,
    pub chunk: Chunk,
    pub locals: Vec<Local<'src>>,
    pub upvalues: Vec<UpvalueDesc>,
    pub scope_depth: u32,
}

impl<'src> Scope<'src> {
    /// Slot 0 is reserved: `this` for methods/initializers, an unnamed
    /// placeholder otherwise, matching the receiver's runtime stack slot.
    pub fn new(kind: FunctionKind, name: Option<ObjRef>, enclosing: Option<Box<Scope<'src>>>) -> Self {
        let receiver_name = if kind == FunctionKind::Function { "" } else { "this" };
        let reserved = Local {
            name: Token { kind: crate::lexer::TokenKind::Identifier, lexeme: receiver_name, line: 0 },
            depth: Some(0),
            is_captured: false,
            is_const: false,
        };
        Scope {
            enclosing,
            kind,
            name,
            arity: 0,
            chunk: Chunk::new(),
            locals: vec![reserved],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

/// Tracks nested class bodies purely so `this` (and the always-failing
/// `super`) know whether they're syntactically inside a class.
pub struct ClassScope {
    pub enclosing: Option<Box<ClassScope>>,
}

fn identifiers_equal(a: &Token, b: &Token) -> bool {
    a.lexeme == b.lexeme
}

/// Walks `scope`'s locals back-to-front looking for `name`, erroring if the
/// match is still mid-declaration (its own initializer referencing itself).
/// Returns the slot index, or `None` plus whether the "own initializer"
/// error already fired.
pub fn resolve_local(scope: &Scope<'_>, name: &Token) -> Result<Option<u8>, ()> {
    for (i, local) in scope.locals.iter().enumerate().rev() {
        if identifiers_equal(name, &local.name) {
            if local.depth.is_none() {
                return Err(());
            }
            return Ok(Some(i as u8));
        }
    }
    Ok(None)
}

pub fn is_local_const(scope: &Scope<'_>, index: u8) -> bool {
    scope.locals[index as usize].is_const
}

fn add_upvalue(scope: &mut Scope<'_>, index: u8, is_local: bool) -> Result<u8, ()> {
    for (i, up) in scope.upvalues.iter().enumerate() {
        if up.index == index && up.is_local == is_local {
            return Ok(i as u8);
        }
    }
    if scope.upvalues.len() == u8::MAX as usize + 1 {
        return Err(());
    }
    scope.upvalues.push(UpvalueDesc { index, is_local });
    Ok((scope.upvalues.len() - 1) as u8)
}

/// Recursively resolves `name` as an upvalue, capturing the enclosing
/// local (marking it captured so the VM knows to close it) or chaining
/// through an already-captured upvalue further up.
pub fn resolve_upvalue(scope: &mut Scope<'_>, name: &Token) -> Result<Option<u8>, ()> {
    let Some(enclosing) = scope.enclosing.as_deref_mut() else {
        return Ok(None);
    };

    match resolve_local(enclosing, name)? {
        Some(local) => {
            enclosing.locals[local as usize].is_captured = true;
            Ok(Some(add_upvalue(scope, local, true)?))
        }
        None => match resolve_upvalue(enclosing, name)? {
            Some(up) => Ok(Some(add_upvalue(scope, up, false)?)),
            None => Ok(None),
        },
    }
}

/// Whether the upvalue at `index` ultimately resolves to a `const` local,
/// walking the upvalue chain the same way `resolve_upvalue` built it.
pub fn is_upvalue_const(scope: &Scope<'_>, index: u8) -> bool {
    fn find<'a, 'src>(scope: &'a Scope<'src>, index: u8) -> Option<&'a Local<'src>> {
        let enclosing = scope.enclosing.as_deref()?;
        let up = &scope.upvalues[index as usize];
        if up.is_local {
            Some(&enclosing.locals[up.index as usize])
        } else {
            find(enclosing, up.index)
        }
    }
    find(scope, index).map(|l| l.is_const).unwrap_or(false)
}
