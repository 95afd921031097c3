//! Single-pass Pratt compiler: tokens to bytecode with no intermediate AST.
//!
//! Expression parsing climbs precedence directly off the token stream
//! (`parse_precedence`); every statement form emits its bytecode as it's
//! recognized. Local/upvalue/global resolution, constant enforcement, and
//! scope bookkeeping live in [`scope`]; the prefix/infix dispatch table
//! lives in [`rules`].

mod rules;
mod scope;

use std::collections::HashSet;

use crate::chunk::OpCode;
use crate::error::CompileError;
use crate::gc::Heap;
use crate::lexer::{Lexer, Token, TokenKind};
use crate::object::{Function, ObjRef};
use crate::value::Value;

use rules::{ParseFnKind, Precedence, rule_for};
use scope::{ClassScope, FunctionKind, Local, Scope, UpvalueDesc, is_local_const, is_upvalue_const, resolve_local, resolve_upvalue};

/// Where a name ultimately resolved: a local slot, a captured upvalue, or
/// a global (stored as a constant-pool index into the name string).
enum Resolved {
    Local(u8),
    Upvalue(u8),
    Global(u32),
}

pub struct Compiler<'src, 'heap> {
    lexer: Lexer<'src>,
    previous: Token<'src>,
    current: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,
    scope: Box<Scope<'src>>,
    class_scope: Option<Box<ClassScope>>,
    /// Constant-pool indices of `const`-declared globals. Always indexes
    /// into the top-level chunk: a `var`/`const` only becomes global at
    /// `scope_depth == 0`, which a function body can never be inside.
    const_globals: HashSet<u32>,
    heap: &'heap mut Heap,
    /// When set, every short/long opcode pair emits its long form
    /// regardless of whether the index would fit in a byte. A test/debug
    /// convenience (spec.md §4.2's `FORCE_LONG_OPS`), never set by
    /// [`Compiler::compile`] itself.
    force_long_ops: bool,
}

impl<'src, 'heap> Compiler<'src, 'heap> {
    /// Compiles `source` to a top-level function, or the diagnostics
    /// collected along the way if any statement failed to parse.
    pub fn compile(source: &'src str, heap: &'heap mut Heap) -> Result<ObjRef, Vec<CompileError>> {
        Self::compile_with_options(source, heap, false)
    }

    /// As [`Compiler::compile`], but with `force_long_ops` forcing every
    /// short/long opcode pair to its long (4-byte operand) form. Exists for
    /// tests exercising the long-form decode paths without needing 256+
    /// locals or constants to trigger them naturally.
    pub fn compile_with_options(source: &'src str, heap: &'heap mut Heap, force_long_ops: bool) -> Result<ObjRef, Vec<CompileError>> {
        let mut lexer = Lexer::new(source);
        let placeholder = lexer.scan_token();
        let mut compiler = Compiler {
            lexer,
            previous: placeholder,
            current: placeholder,
            had_error: false,
            panic_mode: false,
            errors: Vec::new(),
            scope: Box::new(Scope::new(FunctionKind::Script, None, None)),
            class_scope: None,
            const_globals: HashSet::new(),
            heap,
            force_long_ops,
        };
        // Re-lex from the start: `placeholder` above primed `current`, but
        // `advance()` expects to shift a real `current` into `previous`.
        compiler.lexer = Lexer::new(source);
        compiler.current = compiler.lexer.scan_token();
        compiler.advance();

        while !compiler.match_kind(TokenKind::Eof) {
            compiler.declaration();
        }

        compiler.emit_return();
        let top = std::mem::replace(&mut compiler.scope, Box::new(Scope::new(FunctionKind::Script, None, None)));
        let (function_ref, _upvalues) = compiler.finish_scope(top);

        if compiler.had_error { Err(compiler.errors) } else { Ok(function_ref) }
    }

    // ---- token stream -----------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.lexer.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme.to_string();
            self.error_at_current(&message);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_kind(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn error_at_current(&mut self, message: &str) {
        let token = self.current;
        self.error_at(token, message);
    }

    fn error(&mut self, message: &str) {
        let token = self.previous;
        self.error_at(token, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        tracing::debug!(line = token.line, message, "compiler entering panic mode");
        let at = match token.kind {
            TokenKind::Eof => " at end".to_string(),
            TokenKind::Error => String::new(),
            _ => format!(" at '{}'", token.lexeme),
        };
        self.errors.push(CompileError { line: token.line, at, message: message.to_string() });
        self.had_error = true;
    }

    fn synchronize(&mut self) {
        tracing::debug!("synchronizing after compile error");
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::Const
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Match
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // ---- bytecode emission -------------------------------------------

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.scope.chunk.write_byte(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_bytes(&mut self, a: u8, b: u8) {
        self.emit_byte(a);
        self.emit_byte(b);
    }

    fn emit_indexed(&mut self, op: OpCode, long_op: OpCode, index: usize) {
        let line = self.previous.line;
        let force_long = self.force_long_ops;
        self.scope.chunk.write_indexed(op, long_op, index, line, force_long);
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        let line = self.previous.line;
        self.scope.chunk.write_u16(0xffff, line);
        self.scope.chunk.code.len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.scope.chunk.code.len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }
        let bytes = (jump as u16).to_le_bytes();
        self.scope.chunk.code[offset] = bytes[0];
        self.scope.chunk.code[offset + 1] = bytes[1];
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.scope.chunk.code.len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        let line = self.previous.line;
        self.scope.chunk.write_u16(offset as u16, line);
    }

    fn emit_return(&mut self) {
        if self.scope.kind == FunctionKind::Initializer {
            self.emit_bytes(OpCode::GetLocal as u8, 0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> usize {
        self.scope.chunk.add_constant(value)
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_indexed(OpCode::Constant, OpCode::ConstantLong, index);
    }

    fn identifier_constant(&mut self, name: &Token<'src>) -> u32 {
        let interned = self.heap.intern(name.lexeme);
        self.make_constant(Value::Obj(interned)) as u32
    }

    // ---- variable resolution ------------------------------------------

    fn resolve_variable(&mut self, name: &Token<'src>) -> Resolved {
        match resolve_local(&self.scope, name) {
            Ok(Some(slot)) => return Resolved::Local(slot),
            Ok(None) => {}
            Err(()) => {
                self.error("Can't read local variable in its own initializer.");
                return Resolved::Local(0);
            }
        }
        match resolve_upvalue(&mut self.scope, name) {
            Ok(Some(slot)) => return Resolved::Upvalue(slot),
            Ok(None) => {}
            Err(()) => {
                self.error("Too many closure variables in function.");
                return Resolved::Upvalue(0);
            }
        }
        Resolved::Global(self.identifier_constant(name))
    }

    fn is_const(&self, resolved: &Resolved) -> bool {
        match *resolved {
            Resolved::Local(i) => is_local_const(&self.scope, i),
            Resolved::Upvalue(i) => is_upvalue_const(&self.scope, i),
            Resolved::Global(i) => self.const_globals.contains(&i),
        }
    }

    fn emit_get(&mut self, resolved: Resolved) {
        match resolved {
            Resolved::Local(i) => self.emit_indexed(OpCode::GetLocal, OpCode::GetLocalLong, i as usize),
            Resolved::Upvalue(i) => self.emit_bytes(OpCode::GetUpvalue as u8, i),
            Resolved::Global(i) => self.emit_indexed(OpCode::GetGlobal, OpCode::GetGlobalLong, i as usize),
        }
    }

    fn emit_set(&mut self, resolved: Resolved) {
        match resolved {
            Resolved::Local(i) => self.emit_indexed(OpCode::SetLocal, OpCode::SetLocalLong, i as usize),
            Resolved::Upvalue(i) => self.emit_bytes(OpCode::SetUpvalue as u8, i),
            Resolved::Global(i) => self.emit_indexed(OpCode::SetGlobal, OpCode::SetGlobalLong, i as usize),
        }
    }

    /// Get-or-set on a user-written identifier expression: consumes a
    /// trailing `= expr` itself when `can_assign` allows it.
    fn named_variable(&mut self, name: Token<'src>, can_assign: bool) {
        let resolved = self.resolve_variable(&name);
        if can_assign && self.match_kind(TokenKind::Equal) {
            if self.is_const(&resolved) {
                self.error("Can't reassign a const variable");
            }
            self.expression();
            self.emit_set(resolved);
        } else {
            self.emit_get(resolved);
        }
    }

    /// Get-or-set on a name the compiler itself supplies (hidden locals for
    /// `for..in`/`match`), where the value is already on the stack — no
    /// expression is parsed here.
    fn emit_variable(&mut self, name: Token<'src>, should_assign: bool, ignore_const: bool) {
        let resolved = self.resolve_variable(&name);
        if should_assign {
            if !ignore_const && self.is_const(&resolved) {
                self.error("Can't reassign a const variable");
            }
            self.emit_set(resolved);
        } else {
            self.emit_get(resolved);
        }
    }

    // ---- local declaration ---------------------------------------------

    fn add_local(&mut self, name: Token<'src>, is_const: bool) {
        if self.scope.locals.len() > u8::MAX as usize {
            self.error("Too many local variables in function.");
            return;
        }
        self.scope.locals.push(Local { name, depth: None, is_captured: false, is_const });
    }

    fn mark_initialized(&mut self) {
        if self.scope.scope_depth == 0 {
            return;
        }
        let depth = self.scope.scope_depth;
        self.scope.locals.last_mut().expect("mark_initialized with no pending local").depth = Some(depth);
    }

    /// Declares and immediately initializes a compiler-synthesized local
    /// (`__iter`, `__range`, `__match`, a `for..in`/pattern binder). These
    /// are always assigned before any code can read them, so they skip the
    /// "own initializer" sentinel that guards user declarations.
    fn declare_hidden_local(&mut self, name: Token<'src>, is_const: bool) {
        self.add_local(name, is_const);
        self.mark_initialized();
    }

    fn declare_variable(&mut self, is_const: bool) {
        if self.scope.scope_depth == 0 {
            return;
        }
        let name = self.previous;
        for local in self.scope.locals.iter().rev() {
            if let Some(depth) = local.depth {
                if depth < self.scope.scope_depth {
                    break;
                }
            }
            if local.name.lexeme == name.lexeme {
                self.error("Already a variable with this name in this scope.");
            }
        }
        self.add_local(name, is_const);
    }

    fn parse_variable(&mut self, error_message: &str, is_const: bool) -> u32 {
        self.consume(TokenKind::Identifier, error_message);
        let name = self.previous;
        self.declare_variable(is_const);
        if self.scope.scope_depth > 0 {
            return 0;
        }
        let constant = self.identifier_constant(&name);
        if is_const {
            self.const_globals.insert(constant);
        }
        constant
    }

    fn define_variable(&mut self, global: u32) {
        if self.scope.scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_indexed(OpCode::DefineGlobal, OpCode::DefineGlobalLong, global as usize);
    }

    fn begin_scope(&mut self) {
        self.scope.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.scope.scope_depth -= 1;
        let floor = self.scope.scope_depth;
        while let Some(local) = self.scope.locals.last() {
            if local.depth.is_some_and(|d| d > floor) {
                if local.is_captured {
                    self.emit_op(OpCode::CloseUpvalue);
                } else {
                    self.emit_op(OpCode::Pop);
                }
                self.scope.locals.pop();
            } else {
                break;
            }
        }
    }

    // ---- expressions ----------------------------------------------------

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = rule_for(self.previous.kind).prefix else {
            self.error("Expect expression.");
            return;
        };
        let can_assign = precedence <= Precedence::Assignment;
        self.run_prefix(prefix, can_assign);

        while precedence <= rule_for(self.current.kind).precedence {
            self.advance();
            let infix = rule_for(self.previous.kind).infix.expect("infix precedence without an infix rule");
            self.run_infix(infix, can_assign);
        }

        if can_assign && self.match_kind(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn run_prefix(&mut self, kind: ParseFnKind, can_assign: bool) {
        use ParseFnKind::*;
        match kind {
            Grouping => self.grouping(),
            List => self.list(),
            Unary => self.unary(),
            Number => self.number(),
            String => self.string_literal(),
            Literal => self.literal(),
            FunExpr => self.fun_expr(),
            Variable => self.variable(can_assign),
            This => self.this_expr(),
            Super => self.super_expr(),
            Call | Subscript | Dot | Binary | And | Or => unreachable!("{kind:?} has no prefix rule"),
        }
    }

    fn run_infix(&mut self, kind: ParseFnKind, can_assign: bool) {
        use ParseFnKind::*;
        match kind {
            Call => self.call(),
            Subscript => self.subscript(can_assign),
            Dot => self.dot(can_assign),
            Binary => self.binary(),
            And => self.and_expr(),
            Or => self.or_expr(),
            Grouping | List | Unary | Number | String | Literal | FunExpr | Variable | This | Super => {
                unreachable!("{kind:?} has no infix rule")
            }
        }
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn number(&mut self) {
        let value: f64 = self.previous.lexeme.parse().unwrap_or(0.0);
        self.emit_constant(Value::Number(value));
    }

    fn string_literal(&mut self) {
        let lexeme = self.previous.lexeme;
        let content = &lexeme[1..lexeme.len() - 1];
        let interned = self.heap.intern(content);
        self.emit_constant(Value::Obj(interned));
    }

    fn literal(&mut self) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            TokenKind::True => self.emit_op(OpCode::True),
            _ => unreachable!("literal() called on a non-literal token"),
        }
    }

    fn unary(&mut self) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Bang => self.emit_op(OpCode::Not),
            _ => unreachable!("unary() called on a non-unary token"),
        }
    }

    fn binary(&mut self) {
        let operator = self.previous.kind;
        let precedence = rule_for(operator).precedence;
        self.parse_precedence(precedence.next());
        match operator {
            TokenKind::BangEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            TokenKind::Percent => self.emit_op(OpCode::Modulo),
            TokenKind::DotDot => self.emit_op(OpCode::BuildRange),
            _ => unreachable!("binary() called on a non-binary token"),
        }
    }

    fn and_expr(&mut self) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_expr(&mut self) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self) {
        let arg_count = self.argument_list();
        self.emit_bytes(OpCode::Call as u8, arg_count);
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: u32 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                count += 1;
                if count > 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                if !self.match_kind(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count.min(255) as u8
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.previous;
        let constant = self.identifier_constant(&name);
        if can_assign && self.match_kind(TokenKind::Equal) {
            self.expression();
            self.emit_indexed(OpCode::SetProperty, OpCode::SetPropertyLong, constant as usize);
        } else if self.match_kind(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            self.emit_indexed(OpCode::Invoke, OpCode::InvokeLong, constant as usize);
            self.emit_byte(arg_count);
        } else {
            self.emit_indexed(OpCode::GetProperty, OpCode::GetPropertyLong, constant as usize);
        }
    }

    fn subscript(&mut self, can_assign: bool) {
        self.parse_precedence(Precedence::Or);
        self.consume(TokenKind::RightBracket, "Expect closing brackets ']'.");
        if can_assign && self.match_kind(TokenKind::Equal) {
            self.expression();
            self.emit_op(OpCode::StoreSubscr);
        } else {
            self.emit_op(OpCode::IndexSubscr);
        }
    }

    fn list(&mut self) {
        let mut item_count: u32 = 0;
        if !self.check(TokenKind::RightBracket) {
            loop {
                if self.check(TokenKind::RightBracket) {
                    break;
                }
                self.parse_precedence(Precedence::Or);
                item_count += 1;
                if item_count == 256 {
                    self.error("Cannot have more than 256 items in a list literal.");
                }
                if !self.match_kind(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightBracket, "Expect ']' after list literal.");
        self.emit_op(OpCode::BuildList);
        self.emit_byte(item_count as u8);
    }

    fn fun_expr(&mut self) {
        self.function(FunctionKind::Function);
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous;
        self.named_variable(name, can_assign);
    }

    fn this_expr(&mut self) {
        if self.class_scope.is_none() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        let name = self.previous;
        self.named_variable(name, false);
    }

    fn super_expr(&mut self) {
        self.error("Can't use 'super' outside of a class with a superclass.");
    }

    // ---- statements -----------------------------------------------------

    fn declaration(&mut self) {
        if self.match_kind(TokenKind::Class) {
            self.class_declaration();
        } else if self.match_kind(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_kind(TokenKind::Var) {
            self.var_declaration(false);
        } else if self.match_kind(TokenKind::Const) {
            self.var_declaration(true);
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn statement(&mut self) {
        if self.match_kind(TokenKind::Print) {
            self.print_statement();
        } else if self.match_kind(TokenKind::For) {
            self.for_statement();
        } else if self.match_kind(TokenKind::If) {
            self.if_statement();
        } else if self.match_kind(TokenKind::Return) {
            self.return_statement();
        } else if self.match_kind(TokenKind::While) {
            self.while_statement();
        } else if self.match_kind(TokenKind::Match) {
            self.match_statement();
        } else if self.match_kind(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn var_declaration(&mut self, is_const: bool) {
        let global = self.parse_variable("Expect variable name.", is_const);
        if self.match_kind(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        if !self.check(TokenKind::LeftParen) {
            self.for_in_statement();
            return;
        }

        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");

        if self.match_kind(TokenKind::Semicolon) {
            // No initializer.
        } else if self.match_kind(TokenKind::Const) {
            self.var_declaration(true);
        } else if self.match_kind(TokenKind::Var) {
            self.var_declaration(false);
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.scope.chunk.code.len();
        let mut exit_jump = None;

        if !self.match_kind(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_kind(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.scope.chunk.code.len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }

        self.end_scope();
    }

    /// `for x in range/string { ... }`, desugared into two hidden locals
    /// (`__iter`, the loop counter; `__range`, the iterable) and a manual
    /// bounds-check/index/increment loop.
    fn for_in_statement(&mut self) {
        self.begin_scope();

        self.consume(TokenKind::Identifier, "Expected variable after 'for'");
        let loop_var_token = self.previous;

        let iter_token = Token { kind: TokenKind::Identifier, lexeme: "__iter", line: self.current.line };
        self.declare_hidden_local(iter_token, false);
        self.emit_constant(Value::Number(0.0));
        self.emit_variable(iter_token, true, false);

        self.consume(TokenKind::In, "Expect 'in' after loop variable.");

        let range_token = Token { kind: TokenKind::Identifier, lexeme: "__range", line: self.current.line };
        self.declare_hidden_local(range_token, false);
        self.expression();
        self.emit_variable(range_token, true, false);

        let loop_start = self.scope.chunk.code.len();

        self.named_variable(range_token, false);
        self.named_variable(iter_token, false);
        self.emit_op(OpCode::RangeInBounds);

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);

        self.begin_scope();
        self.declare_hidden_local(loop_var_token, true);

        self.named_variable(range_token, false);
        self.named_variable(iter_token, false);
        self.emit_op(OpCode::IndexSubscr);
        self.emit_variable(loop_var_token, true, true);

        self.statement();

        self.end_scope();

        self.named_variable(iter_token, false);
        self.emit_op(OpCode::Increment);
        self.emit_variable(iter_token, true, false);
        self.emit_op(OpCode::Pop);

        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);

        self.end_scope();
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.match_kind(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn return_statement(&mut self) {
        if self.scope.kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }

        if self.match_kind(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.scope.kind == FunctionKind::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }

    fn while_statement(&mut self) {
        let loop_start = self.scope.chunk.code.len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    /// `match expr { pattern [if guard]: stmt ... }`. Each arm gets its own
    /// scope (for an optional pattern binder); since control leaves an arm
    /// via `JUMP` rather than falling off the end, the usual `end_scope`
    /// can't run mid-arm, so the locals it introduced are popped by hand
    /// before the jump to the shared exit.
    ///
    /// Pattern match and guard are two independent `JUMP_IF_FALSE` checks
    /// sharing one "next arm" landing pad: MATCH leaves its bool on the
    /// stack for `JUMP_IF_FALSE` to peek, a `POP` on the fallthrough path
    /// consumes it, and the landing pad's own `POP` consumes whichever bool
    /// (match or guard) caused the jump there. An identifier pattern's
    /// bound local survives underneath both checks (see `pattern`); a
    /// guard failure reaches the landing pad without running the body's
    /// own teardown, so the landing pad pops that local too when present.
    fn match_statement(&mut self) {
        self.begin_scope();

        self.expression();

        let match_token = Token { kind: TokenKind::Identifier, lexeme: "__match", line: self.current.line };
        self.declare_hidden_local(match_token, true);

        self.consume(TokenKind::LeftBrace, "Expect '{' after 'match expression'.");

        let mut exit_jumps = Vec::new();

        while !self.check(TokenKind::RightBrace) {
            self.begin_scope();

            let bound_local = self.pattern(match_token);
            self.emit_op(OpCode::Match);
            let next_case_jump = self.emit_jump(OpCode::JumpIfFalse);
            self.emit_op(OpCode::Pop);

            let guard_jump = if self.match_kind(TokenKind::If) {
                self.expression();
                let jump = self.emit_jump(OpCode::JumpIfFalse);
                self.emit_op(OpCode::Pop);
                Some(jump)
            } else {
                None
            };

            // A guard failure jumps straight here, skipping the body and
            // the floor-pop loop below, so the binder's persisted copy
            // (still on the stack under the failing guard bool) has to be
            // cleaned up on this path too.
            let bound_captured = bound_local && self.scope.locals.last().is_some_and(|l| l.is_captured);

            self.consume(TokenKind::Colon, "Expect ':' after pattern.");

            self.statement();

            let floor = self.scope.scope_depth - 1;
            while let Some(local) = self.scope.locals.last() {
                if local.depth.is_some_and(|d| d > floor) {
                    if local.is_captured {
                        self.emit_op(OpCode::CloseUpvalue);
                    } else {
                        self.emit_op(OpCode::Pop);
                    }
                    self.scope.locals.pop();
                } else {
                    break;
                }
            }

            let exit_jump = self.emit_jump(OpCode::Jump);
            exit_jumps.push(exit_jump);

            self.patch_jump(next_case_jump);
            if let Some(guard_jump) = guard_jump {
                self.patch_jump(guard_jump);
            }
            self.emit_op(OpCode::Pop);
            if bound_local {
                self.emit_op(if bound_captured { OpCode::CloseUpvalue } else { OpCode::Pop });
            }

            self.end_scope();
        }

        self.consume(TokenKind::RightBrace, "Expect '}' after 'match expression cases'.");

        for exit_jump in exit_jumps {
            self.patch_jump(exit_jump);
        }

        self.end_scope();
    }

    /// Pushes the two operands `MATCH` needs: the scrutinee as its "value"
    /// operand, then the pattern as its "pattern" operand.
    ///
    /// An identifier (`_` or any other name) always matches: rather than
    /// comparing the scrutinee to anything, it binds the scrutinee to a new
    /// local (skipped for `_`) and pushes `true`/`true`, an operand pair
    /// `MATCH` always accepts. The bound copy is pushed *before* the two
    /// comparison operands so `MATCH`'s pops never touch it — it survives
    /// on the stack under the arm's result for the body to read, and the
    /// arm's own scope teardown pops it along with any other locals the
    /// body introduced. Any other expression is compared structurally (or
    /// by range membership against a Number scrutinee), consuming the
    /// scrutinee as `MATCH`'s other operand directly.
    ///
    /// Returns whether a new local was bound (always false for `_` and for
    /// an expression pattern), so the caller can clean it up on a guard
    /// failure, which skips the body's own teardown.
    fn pattern(&mut self, match_token: Token<'src>) -> bool {
        if self.check(TokenKind::Identifier) {
            let pattern_var_token = self.current;
            self.consume(TokenKind::Identifier, "Expect pattern identifier");

            let is_wildcard = pattern_var_token.lexeme == "_";
            if !is_wildcard {
                self.emit_variable(match_token, false, false);
                self.declare_hidden_local(pattern_var_token, true);
            }
            self.emit_op(OpCode::True);
            self.emit_op(OpCode::True);
            return !is_wildcard;
        }
        self.emit_variable(match_token, false, false);
        self.expression();
        false
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous;
        let name_constant = self.identifier_constant(&class_name);
        self.declare_variable(false);

        self.emit_indexed(OpCode::Class, OpCode::ClassLong, name_constant as usize);
        self.define_variable(name_constant);

        let enclosing_class = self.class_scope.take();
        self.class_scope = Some(Box::new(ClassScope { enclosing: enclosing_class }));

        self.named_variable(class_name, false);

        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop);

        self.class_scope = self.class_scope.take().and_then(|scope| scope.enclosing);
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let name_token = self.previous;
        let constant = self.identifier_constant(&name_token);

        let kind = if name_token.lexeme == "init" { FunctionKind::Initializer } else { FunctionKind::Method };
        self.function(kind);

        self.emit_indexed(OpCode::Method, OpCode::MethodLong, constant as usize);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.", false);
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    /// Compiles a function/method body in a fresh nested [`Scope`], then
    /// splices a `CLOSURE` op (plus one is-local/index byte pair per
    /// upvalue) into the enclosing chunk.
    fn function(&mut self, kind: FunctionKind) {
        let name = self.heap.intern(self.previous.lexeme);
        let enclosing = std::mem::replace(&mut self.scope, Box::new(Scope::new(kind, Some(name), None)));
        self.scope.enclosing = Some(enclosing);
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        let mut arity: u32 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                arity += 1;
                if arity > 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                let constant = self.parse_variable("Expect parameter name.", false);
                self.define_variable(constant);
                if !self.match_kind(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.scope.arity = arity.min(255) as u8;

        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let (function_ref, upvalues) = self.end_function();
        let constant = self.make_constant(Value::Obj(function_ref));
        self.emit_indexed(OpCode::Closure, OpCode::ClosureLong, constant);

        for up in upvalues {
            self.emit_byte(if up.is_local { 1 } else { 0 });
            self.emit_byte(up.index);
        }
    }

    fn end_function(&mut self) -> (ObjRef, Vec<UpvalueDesc>) {
        self.emit_return();
        let enclosing = self.scope.enclosing.take().expect("end_function outside a nested scope");
        let finished = std::mem::replace(&mut self.scope, enclosing);
        self.finish_scope(finished)
    }

    fn finish_scope(&mut self, finished: Box<Scope<'src>>) -> (ObjRef, Vec<UpvalueDesc>) {
        let mut function = Function::new(finished.name);
        function.arity = finished.arity;
        function.upvalue_count = finished.upvalues.len() as u8;
        function.chunk = finished.chunk;
        let function_ref = self.heap.alloc_function(function);
        (function_ref, finished.upvalues)
    }
}
