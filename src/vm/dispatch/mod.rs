//! Central opcode dispatch: one `match` arm per [`OpCode`], delegating to
//! handler methods grouped by concern in the sibling modules.

mod access;
mod arithmetic;
mod compare;
mod control;

use crate::chunk::OpCode;
use crate::vm::{Signal, Vm};

pub(super) fn execute(vm: &mut Vm, op: OpCode) -> Result<Signal, String> {
    match op {
        OpCode::Constant => vm.op_constant(),
        OpCode::ConstantLong => vm.op_constant_long(),
        OpCode::Nil => vm.op_nil(),
        OpCode::True => vm.op_true(),
        OpCode::False => vm.op_false(),

        OpCode::Pop => vm.op_pop(),

        OpCode::GetLocal => vm.op_get_local(false),
        OpCode::GetLocalLong => vm.op_get_local(true),
        OpCode::SetLocal => vm.op_set_local(false),
        OpCode::SetLocalLong => vm.op_set_local(true),
        OpCode::GetUpvalue => vm.op_get_upvalue(),
        OpCode::SetUpvalue => vm.op_set_upvalue(),
        OpCode::GetGlobal => vm.op_get_global(false),
        OpCode::GetGlobalLong => vm.op_get_global(true),
        OpCode::DefineGlobal => vm.op_define_global(false),
        OpCode::DefineGlobalLong => vm.op_define_global(true),
        OpCode::SetGlobal => vm.op_set_global(false),
        OpCode::SetGlobalLong => vm.op_set_global(true),

        OpCode::GetProperty => vm.op_get_property(false),
        OpCode::GetPropertyLong => vm.op_get_property(true),
        OpCode::SetProperty => vm.op_set_property(false),
        OpCode::SetPropertyLong => vm.op_set_property(true),

        OpCode::Equal => vm.op_equal(),
        OpCode::Match => vm.op_match(),
        OpCode::Greater => vm.op_greater(),
        OpCode::Less => vm.op_less(),

        OpCode::Negate => vm.op_negate(),
        OpCode::Add => vm.op_add(),
        OpCode::Subtract => vm.op_subtract(),
        OpCode::Multiply => vm.op_multiply(),
        OpCode::Divide => vm.op_divide(),
        OpCode::Modulo => vm.op_modulo(),
        OpCode::Increment => vm.op_increment(),

        OpCode::BuildRange => vm.op_build_range(),
        OpCode::BuildList => vm.op_build_list(),
        OpCode::IndexSubscr => vm.op_index_subscr(),
        OpCode::StoreSubscr => vm.op_store_subscr(),
        OpCode::RangeInBounds => vm.op_range_in_bounds(),

        OpCode::Not => vm.op_not(),

        OpCode::Print => vm.op_print(),

        OpCode::Jump => vm.op_jump(),
        OpCode::JumpIfFalse => vm.op_jump_if_false(),
        OpCode::Loop => vm.op_loop(),

        OpCode::Call => vm.op_call(),
        OpCode::Invoke => vm.op_invoke(false),
        OpCode::InvokeLong => vm.op_invoke(true),
        OpCode::Closure => vm.op_closure(false),
        OpCode::ClosureLong => vm.op_closure(true),
        OpCode::CloseUpvalue => vm.op_close_upvalue(),
        OpCode::Return => vm.op_return(),

        OpCode::Class => vm.op_class(false),
        OpCode::ClassLong => vm.op_class(true),
        OpCode::Method => vm.op_method(false),
        OpCode::MethodLong => vm.op_method(true),
    }
}
