//! Unit tests for the graph builder.
//!
//! Paths are assembled with `PathBuilder`; assertions look at the shape of
//! the resulting graph from `End` backwards.

use super::*;
use crate::ir::operators::{BranchHint, Constant32Value, FrameStateInfo, ParameterIndex};
use seaflow_bytecode::{
    BinaryOp, CompareOp, FieldRef, FunctionInfo, Likelihood, PathBuilder, TypeHandle, Width,
};

const R0: Register = Register(0);
const R1: Register = Register(1);
const R2: Register = Register(2);
const R3: Register = Register(3);

fn root(parameters: u16, registers: u16) -> FunctionInfo {
    FunctionInfo::new(FunctionId(0), "root", parameters, registers)
}

fn build(path: PathBuilder) -> Result<Graph, BuildError> {
    let info = path.finish().expect("labels bound");
    GraphBuilder::build(&info)
}

/// The single terminator wired into `End`.
fn only_exit(graph: &Graph) -> NodeId {
    let end = graph.end();
    assert_eq!(graph.input_count(end), 1);
    graph.input(end, 0)
}

fn constant(graph: &Graph, node: NodeId) -> i32 {
    graph.op_param::<Constant32Value>(node).as_i32()
}

// =============================================================================
// Straight-line Code
// =============================================================================

#[test]
fn test_straight_line_add() {
    let mut b = PathBuilder::new(root(2, 3));
    b.load_parameter(R0, 0);
    b.load_parameter(R1, 1);
    b.binary(BinaryOp::Add, Width::I32, R2, R0, R1);
    b.ret(R2);
    let g = build(b).unwrap();

    let ret = only_exit(&g);
    assert_eq!(g.opcode(ret), Opcode::Return);
    assert_eq!(g.control_input(ret, 0), g.start());
    assert_eq!(g.effect_input(ret, 0), g.start());

    let add = g.value_input(ret, 0);
    assert_eq!(g.opcode(add), Opcode::Int32Add);
    let (p0, p1) = (g.value_input(add, 0), g.value_input(add, 1));
    assert_eq!(g.op_param::<ParameterIndex>(p0).0, 0);
    assert_eq!(g.op_param::<ParameterIndex>(p1).0, 1);
    assert_eq!(g.ty(p0), NodeType::Int32);
}

#[test]
fn test_parameters_are_shared() {
    let mut b = PathBuilder::new(root(1, 2));
    b.load_parameter(R0, 0);
    b.load_parameter(R1, 0);
    b.binary(BinaryOp::Mul, Width::I32, R0, R0, R1);
    b.ret(R0);
    let g = build(b).unwrap();

    let mul = g.value_input(only_exit(&g), 0);
    assert_eq!(g.value_input(mul, 0), g.value_input(mul, 1));
}

#[test]
fn test_move_and_widths() {
    let mut b = PathBuilder::new(root(0, 3));
    b.load_immediate(R0, Immediate::U8(250));
    b.mov(R1, R0);
    b.binary(BinaryOp::Add, Width::U8, R2, R0, R1);
    b.ret(R2);
    let g = build(b).unwrap();

    let add = g.value_input(only_exit(&g), 0);
    assert_eq!(g.opcode(add), Opcode::Uint8Add);
    assert_eq!(g.ty(add), NodeType::Uint8);
    assert_eq!(g.value_input(add, 0), g.value_input(add, 1));
}

#[test]
fn test_field_access_threads_effects() {
    let field = FieldRef {
        offset: 8,
        width: Width::I32,
        holder: TypeHandle(3),
    };
    let mut b = PathBuilder::new(root(2, 3));
    b.load_parameter(R0, 0);
    b.load_parameter(R1, 1);
    b.store_field(R0, field, R1);
    b.load_field(R2, R0, field);
    b.ret(R2);
    let g = build(b).unwrap();

    let ret = only_exit(&g);
    let load = g.value_input(ret, 0);
    assert_eq!(g.opcode(load), Opcode::LoadField);
    assert_eq!(g.effect_input(ret, 0), load);

    let store = g.effect_input(load, 0);
    assert_eq!(g.opcode(store), Opcode::StoreField);
    assert_eq!(g.effect_input(store, 0), g.start());
    assert_eq!(g.op_param::<FieldAccess>(store).offset, 8);
}

#[test]
fn test_call_is_on_effect_chain() {
    let mut b = PathBuilder::new(root(1, 2));
    b.load_parameter(R0, 0);
    b.emit(Instruction::Call {
        dst: R1,
        callee: FunctionId(9),
        args: vec![R0, R0],
    });
    b.ret(R1);
    let g = build(b).unwrap();

    let ret = only_exit(&g);
    let call = g.value_input(ret, 0);
    assert_eq!(g.opcode(call), Opcode::Call);
    assert_eq!(g.input_count(call), 4);
    assert_eq!(g.effect_input(ret, 0), call);
}

// =============================================================================
// Control Flow
// =============================================================================

#[test]
fn test_diamond_creates_phi() {
    let mut b = PathBuilder::new(root(1, 4));
    let then = b.create_label();
    let join = b.create_label();
    b.load_parameter(R0, 0);
    b.load_immediate(R1, Immediate::I32(1));
    b.compare(CompareOp::Lt, Width::I32, R2, R0, R1);
    b.jump_if(R2, then, Likelihood::Likely);
    b.load_immediate(R3, Immediate::I32(2));
    b.jump(join);
    b.bind_label(then);
    b.load_immediate(R3, Immediate::I32(1));
    b.bind_label(join);
    b.ret(R3);
    let g = build(b).unwrap();

    let ret = only_exit(&g);
    let merge = g.control_input(ret, 0);
    assert_eq!(g.opcode(merge), Opcode::Merge);
    assert_eq!(g.opcode(g.control_input(merge, 0)), Opcode::IfFalse);
    assert_eq!(g.opcode(g.control_input(merge, 1)), Opcode::IfTrue);

    let phi = g.value_input(ret, 0);
    assert_eq!(g.opcode(phi), Opcode::Phi);
    assert_eq!(g.control_input(phi, 0), merge);
    assert_eq!(constant(&g, g.value_input(phi, 0)), 2);
    assert_eq!(constant(&g, g.value_input(phi, 1)), 1);

    // Untouched effects need no EffectPhi.
    assert_eq!(g.effect_input(ret, 0), g.start());

    let branch = g.control_input(g.control_input(merge, 0), 0);
    assert_eq!(g.opcode(branch), Opcode::Branch);
    assert_eq!(g.op_param::<BranchHint>(branch), BranchHint::True);
    assert_eq!(g.opcode(g.value_input(branch, 0)), Opcode::Int32LessThan);
}

#[test]
fn test_loop_creates_header_phis() {
    let mut b = PathBuilder::new(root(1, 4));
    let head = b.create_label();
    let body = b.create_label();
    let exit = b.create_label();
    b.load_parameter(R0, 0);
    b.load_immediate(R1, Immediate::I32(0));
    b.load_immediate(R2, Immediate::I32(1));
    b.bind_label(head);
    b.compare(CompareOp::Lt, Width::I32, R3, R1, R0);
    b.jump_if(R3, body, Likelihood::Unknown);
    b.jump(exit);
    b.bind_label(body);
    b.binary(BinaryOp::Add, Width::I32, R1, R1, R2);
    b.jump(head);
    b.bind_label(exit);
    b.ret(R1);
    let g = build(b).unwrap();

    let ret = only_exit(&g);
    let counter = g.value_input(ret, 0);
    assert_eq!(g.opcode(counter), Opcode::Phi);

    let header = g.control_input(counter, 0);
    assert_eq!(g.opcode(header), Opcode::Loop);
    assert_eq!(g.input_count(header), 2);
    assert_eq!(g.control_input(header, 0), g.start());
    assert_eq!(g.opcode(g.control_input(header, 1)), Opcode::IfTrue);

    assert_eq!(constant(&g, g.value_input(counter, 0)), 0);
    let next = g.value_input(counter, 1);
    assert_eq!(g.opcode(next), Opcode::Int32Add);
    assert_eq!(g.value_input(next, 0), counter);

    // Exit leaves through the false projection of the loop test.
    assert_eq!(g.opcode(g.control_input(ret, 0)), Opcode::IfFalse);

    let effect = g.effect_input(ret, 0);
    assert_eq!(g.opcode(effect), Opcode::EffectPhi);
    assert_eq!(g.control_input(effect, 0), header);
}

#[test]
fn test_throw_and_deoptimize_reach_end() {
    let mut b = PathBuilder::new(root(1, 2));
    let slow = b.create_label();
    b.load_parameter(R0, 0);
    b.jump_if(R0, slow, Likelihood::Unlikely);
    b.emit(Instruction::Throw { value: R0 });
    b.bind_label(slow);
    b.set_pc(40);
    b.emit(Instruction::Deoptimize);
    let g = build(b).unwrap();

    let end = g.end();
    assert_eq!(g.input_count(end), 2);
    assert_eq!(g.opcode(g.input(end, 0)), Opcode::Throw);

    let deopt = g.input(end, 1);
    assert_eq!(g.opcode(deopt), Opcode::Deoptimize);
    let state = g.value_input(deopt, 0);
    assert_eq!(
        g.op_param::<FrameStateInfo>(state),
        FrameStateInfo {
            pc: 40,
            function: FunctionId(0)
        }
    );
}

// =============================================================================
// Inlining
// =============================================================================

#[test]
fn test_inlined_call_is_flattened() {
    let callee = FunctionInfo::new(FunctionId(1), "callee", 1, 2);
    let mut b = PathBuilder::new(root(1, 2));
    b.add_function(callee);
    b.load_parameter(R0, 0);
    b.enter_inlined(FunctionId(1), 2, vec![R0], Some(R1)).unwrap();
    b.load_parameter(R0, 0);
    b.load_immediate(R1, Immediate::I32(1));
    b.binary(BinaryOp::Add, Width::I32, R0, R0, R1);
    b.ret(R0);
    b.ret(R1);
    let g = build(b).unwrap();

    let ret = only_exit(&g);
    let add = g.value_input(ret, 0);
    assert_eq!(g.opcode(add), Opcode::Int32Add);
    assert_eq!(g.opcode(g.value_input(add, 0)), Opcode::Parameter);
    assert_eq!(constant(&g, g.value_input(add, 1)), 1);
}

// =============================================================================
// Errors
// =============================================================================

#[test]
fn test_empty_path() {
    let b = PathBuilder::new(root(0, 1));
    assert_eq!(build(b).unwrap_err(), BuildError::EmptyPath);
}

#[test]
fn test_undefined_register() {
    let mut b = PathBuilder::new(root(0, 8));
    b.ret(Register(5));
    assert_eq!(
        build(b).unwrap_err(),
        BuildError::UndefinedRegister {
            position: 0,
            register: Register(5)
        }
    );
}

#[test]
fn test_register_out_of_range() {
    let mut b = PathBuilder::new(root(0, 1));
    b.load_immediate(R2, Immediate::I32(0));
    b.ret(R2);
    assert!(matches!(
        build(b),
        Err(BuildError::RegisterOutOfRange { position: 0, .. })
    ));
}

#[test]
fn test_parameter_out_of_range() {
    let mut b = PathBuilder::new(root(1, 1));
    b.load_parameter(R0, 1);
    b.ret(R0);
    assert_eq!(
        build(b).unwrap_err(),
        BuildError::ParameterOutOfRange {
            position: 0,
            index: 1
        }
    );
}

#[test]
fn test_jump_out_of_range() {
    let mut b = PathBuilder::new(root(0, 1));
    b.emit(Instruction::Jump { target: 10 });
    assert_eq!(
        build(b).unwrap_err(),
        BuildError::JumpTargetOutOfRange {
            position: 0,
            target: 10
        }
    );
}

#[test]
fn test_falls_off_end() {
    let mut b = PathBuilder::new(root(0, 1));
    b.load_immediate(R0, Immediate::I32(0));
    assert_eq!(build(b).unwrap_err(), BuildError::FallsOffEnd);
}

#[test]
fn test_pc_table_mismatch() {
    let mut b = PathBuilder::new(root(0, 1));
    b.load_immediate(R0, Immediate::I32(0));
    b.ret(R0);
    let mut info = b.finish().unwrap();
    info.pcs.pop();
    assert_eq!(
        GraphBuilder::build(&info).unwrap_err(),
        BuildError::PcTableMismatch { path: 2, pcs: 1 }
    );
}
