//! IR Graph Builder: compilation path to Sea-of-Nodes translation.
//!
//! The builder walks the decoded path once, in order, abstractly
//! interpreting it:
//!
//! - **Environment**: every frame slot holds the node currently defining it,
//!   plus the current control and effect nodes
//! - **Forward joins**: environments arriving at a jump target are merged
//!   with a `Merge`, `Phi`s for differing slots and an `EffectPhi`
//! - **Loops**: a backward jump target opens a `Loop` with a phi per live
//!   slot; every back edge appends its control, values and effect
//! - **Inlined frames**: an invocation entry pushes a frame whose registers
//!   are rebased by its `local_base`; the callee's `Return` writes the
//!   caller's result register and pops it

mod control;

#[cfg(test)]
mod tests;

use rustc_hash::{FxHashMap, FxHashSet};
use seaflow_bytecode::{CompilationInfo, FunctionId, Immediate, Instruction, Register};

use crate::error::BuildError;
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::{FieldAccess, Opcode, Operator};
use crate::ir::types::NodeType;

// =============================================================================
// Environment
// =============================================================================

/// An active function on the path.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Frame {
    function: FunctionId,
    local_base: u16,
    /// Argument values captured at the invocation entry.
    arguments: Vec<NodeId>,
    /// Absolute caller slot that receives the return value.
    result_slot: Option<usize>,
}

/// Abstract machine state at one path position.
#[derive(Clone, Debug)]
pub(crate) struct Environment {
    slots: Vec<Option<NodeId>>,
    control: NodeId,
    effect: NodeId,
    frames: Vec<Frame>,
}

impl Environment {
    #[inline]
    fn frame(&self) -> &Frame {
        // The root frame is never popped.
        &self.frames[self.frames.len() - 1]
    }

    /// Whether two environments run the same chain of functions.
    fn same_frames(&self, other: &Environment) -> bool {
        self.frames.len() == other.frames.len()
            && self
                .frames
                .iter()
                .zip(&other.frames)
                .all(|(a, b)| a.function == b.function && a.local_base == b.local_base)
    }
}

/// A loop opened at a backward jump target.
#[derive(Debug)]
struct LoopHeader {
    node: NodeId,
    /// `(slot, phi)` for every slot live on entry.
    phis: Vec<(usize, NodeId)>,
    effect_phi: NodeId,
    frame_depth: usize,
}

// =============================================================================
// Graph Builder
// =============================================================================

/// Builder for constructing a graph from a [`CompilationInfo`].
pub struct GraphBuilder<'a> {
    info: &'a CompilationInfo,
    pub(crate) graph: Graph,
    /// Environments waiting at forward jump targets, in arrival order.
    pending: FxHashMap<u32, Vec<Environment>>,
    /// Positions targeted by a backward jump.
    loop_targets: FxHashSet<u32>,
    loops: FxHashMap<u32, LoopHeader>,
    /// Root parameters, created on first use.
    parameters: FxHashMap<u16, NodeId>,
    slot_count: usize,
    position: u32,
}

impl<'a> GraphBuilder<'a> {
    /// Translate a whole compilation path.
    pub fn build(info: &'a CompilationInfo) -> Result<Graph, BuildError> {
        let mut builder = GraphBuilder::new(info)?;
        builder.run()?;
        Ok(builder.graph)
    }

    /// Validate `info` and set up an empty graph.
    fn new(info: &'a CompilationInfo) -> Result<Self, BuildError> {
        if info.is_empty() {
            return Err(BuildError::EmptyPath);
        }
        if info.pcs.len() != info.path.len() {
            return Err(BuildError::PcTableMismatch {
                path: info.path.len(),
                pcs: info.pcs.len(),
            });
        }
        if info.root().is_none() {
            return Err(BuildError::MissingFunctionInfo(info.function));
        }
        if let Some(inv) = info
            .invocations
            .values()
            .find(|inv| info.function_info(inv.function).is_none())
        {
            return Err(BuildError::MissingFunctionInfo(inv.function));
        }

        let len = info.path.len() as u32;
        let mut loop_targets = FxHashSet::default();
        for (position, inst) in info.path.iter().enumerate() {
            let position = position as u32;
            if let Some(target) = inst.jump_target() {
                if target >= len {
                    return Err(BuildError::JumpTargetOutOfRange { position, target });
                }
                if target <= position {
                    loop_targets.insert(target);
                }
            }
        }

        Ok(GraphBuilder {
            info,
            graph: Graph::new(),
            pending: FxHashMap::default(),
            loop_targets,
            loops: FxHashMap::default(),
            parameters: FxHashMap::default(),
            slot_count: info.frame_slot_count(),
            position: 0,
        })
    }

    fn run(&mut self) -> Result<(), BuildError> {
        tracing::debug!(
            function = %self.info.function,
            instructions = self.info.len(),
            slots = self.slot_count,
            "building graph"
        );

        let start = self.graph.start();
        let mut current = Some(Environment {
            slots: vec![None; self.slot_count],
            control: start,
            effect: start,
            frames: vec![Frame {
                function: self.info.function,
                local_base: 0,
                arguments: Vec::new(),
                result_slot: None,
            }],
        });

        let info = self.info;
        for (position, inst) in info.path.iter().enumerate() {
            self.position = position as u32;
            let Some(mut env) = self.enter_position(current.take())? else {
                continue;
            };
            if info.invocation_at(self.position).is_some() {
                self.enter_invocation(&mut env)?;
            }
            current = self.translate(inst, env)?;
        }

        if current.is_some() {
            return Err(BuildError::FallsOffEnd);
        }

        tracing::debug!(
            nodes = self.graph.len(),
            loops = self.loops.len(),
            "graph built"
        );
        Ok(())
    }

    // =========================================================================
    // Register Access
    // =========================================================================

    fn slot(&self, env: &Environment, register: Register) -> Result<usize, BuildError> {
        let slot = env.frame().local_base as usize + register.0 as usize;
        if slot < self.slot_count {
            Ok(slot)
        } else {
            Err(BuildError::RegisterOutOfRange {
                position: self.position,
                register,
            })
        }
    }

    fn read(&self, env: &Environment, register: Register) -> Result<NodeId, BuildError> {
        let slot = self.slot(env, register)?;
        env.slots[slot].ok_or(BuildError::UndefinedRegister {
            position: self.position,
            register,
        })
    }

    fn read_all(&self, env: &Environment, registers: &[Register]) -> Result<Vec<NodeId>, BuildError> {
        registers.iter().map(|&r| self.read(env, r)).collect()
    }

    fn write(
        &self,
        env: &mut Environment,
        register: Register,
        value: NodeId,
    ) -> Result<(), BuildError> {
        let slot = self.slot(env, register)?;
        env.slots[slot] = Some(value);
        Ok(())
    }

    // =========================================================================
    // Inlined Frames
    // =========================================================================

    fn enter_invocation(&mut self, env: &mut Environment) -> Result<(), BuildError> {
        let info = self.info;
        let Some(inv) = info.invocation_at(self.position) else {
            return Ok(());
        };
        if inv.depth as usize != env.frames.len() {
            return Err(BuildError::UnbalancedFrames {
                position: self.position,
            });
        }
        let arguments = self.read_all(env, &inv.arguments)?;
        let result_slot = match inv.result {
            Some(r) => Some(self.slot(env, r)?),
            None => None,
        };
        tracing::trace!(
            position = self.position,
            callee = %inv.function,
            depth = inv.depth,
            "entering inlined frame"
        );
        env.frames.push(Frame {
            function: inv.function,
            local_base: inv.local_base,
            arguments,
            result_slot,
        });
        Ok(())
    }

    fn parameter(&mut self, env: &Environment, index: u16) -> Result<NodeId, BuildError> {
        let out_of_range = BuildError::ParameterOutOfRange {
            position: self.position,
            index,
        };
        if env.frames.len() > 1 {
            return env
                .frame()
                .arguments
                .get(index as usize)
                .copied()
                .ok_or(out_of_range);
        }
        let count = self
            .info
            .root()
            .map(|f| f.parameter_count)
            .unwrap_or_default();
        if index >= count {
            return Err(out_of_range);
        }
        let graph = &mut self.graph;
        Ok(*self
            .parameters
            .entry(index)
            .or_insert_with(|| graph.parameter(index, NodeType::Int32)))
    }

    // =========================================================================
    // Translation
    // =========================================================================

    /// Translate one instruction. Returns the fall-through environment, or
    /// `None` if control does not continue to the next position.
    fn translate(
        &mut self,
        inst: &Instruction,
        mut env: Environment,
    ) -> Result<Option<Environment>, BuildError> {
        match inst {
            Instruction::LoadImmediate { dst, value } => {
                let node = match *value {
                    Immediate::I8(v) => self.graph.int8_constant(v),
                    Immediate::U8(v) => self.graph.uint8_constant(v),
                    Immediate::I32(v) => self.graph.int32_constant(v),
                    Immediate::U32(v) => self.graph.uint32_constant(v),
                };
                self.write(&mut env, *dst, node)?;
            }
            Instruction::LoadParameter { dst, index } => {
                let node = self.parameter(&env, *index)?;
                self.write(&mut env, *dst, node)?;
            }
            Instruction::Move { dst, src } => {
                let node = self.read(&env, *src)?;
                self.write(&mut env, *dst, node)?;
            }
            Instruction::Binary {
                op,
                width,
                dst,
                lhs,
                rhs,
            } => {
                let (l, r) = (self.read(&env, *lhs)?, self.read(&env, *rhs)?);
                let node = self.graph.binary(Opcode::arith(*op, *width), l, r);
                self.write(&mut env, *dst, node)?;
            }
            Instruction::Compare {
                op,
                width,
                dst,
                lhs,
                rhs,
            } => {
                let (l, r) = (self.read(&env, *lhs)?, self.read(&env, *rhs)?);
                let node = self.graph.binary(Opcode::compare(*op, *width), l, r);
                self.write(&mut env, *dst, node)?;
            }
            Instruction::LoadField { dst, object, field } => {
                let object = self.read(&env, *object)?;
                let access = FieldAccess {
                    offset: field.offset,
                    width: field.width,
                    holder: field.holder,
                };
                let node = self.graph.new_node_with_type(
                    Operator::load_field(access),
                    &[env.control, object, env.effect],
                    NodeType::from_width(field.width),
                );
                env.effect = node;
                self.write(&mut env, *dst, node)?;
            }
            Instruction::StoreField {
                object,
                field,
                value,
            } => {
                let (object, value) = (self.read(&env, *object)?, self.read(&env, *value)?);
                let access = FieldAccess {
                    offset: field.offset,
                    width: field.width,
                    holder: field.holder,
                };
                env.effect = self.graph.new_node(
                    Operator::store_field(access),
                    &[env.control, object, value, env.effect],
                );
            }
            Instruction::Call { dst, callee, args } => {
                let node = self.call(Opcode::Call, &env, *callee, args)?;
                env.effect = node;
                self.write(&mut env, *dst, node)?;
            }
            Instruction::Jump { target } => {
                self.goto(*target, env)?;
                return Ok(None);
            }
            Instruction::JumpIf {
                condition,
                target,
                likelihood,
            } => {
                let condition = self.read(&env, *condition)?;
                return self.branch(condition, *target, *likelihood, env);
            }
            Instruction::Return { value } => {
                let value = self.read(&env, *value)?;
                return Ok(self.return_value(value, env));
            }
            Instruction::Throw { value } => {
                let value = self.read(&env, *value)?;
                self.terminate(Operator::new(Opcode::Throw), &[env.control, value, env.effect]);
                return Ok(None);
            }
            Instruction::Deoptimize => {
                let pc = self.info.pc_at(self.position).unwrap_or_default();
                let state = self
                    .graph
                    .new_node(Operator::frame_state(pc, env.frame().function), &[]);
                self.terminate(
                    Operator::new(Opcode::Deoptimize),
                    &[env.control, state, env.effect],
                );
                return Ok(None);
            }
            Instruction::TailCall { callee, args } => {
                self.call(Opcode::TailCall, &env, *callee, args)?;
                return Ok(None);
            }
        }
        Ok(Some(env))
    }

    /// `Call` or `TailCall` with `[control, args.., effect]` inputs.
    fn call(
        &mut self,
        opcode: Opcode,
        env: &Environment,
        callee: FunctionId,
        args: &[Register],
    ) -> Result<NodeId, BuildError> {
        let mut inputs = Vec::with_capacity(args.len() + 2);
        inputs.push(env.control);
        inputs.extend(self.read_all(env, args)?);
        inputs.push(env.effect);
        let op = Operator::call(opcode, callee, args.len() as u16);
        Ok(if opcode == Opcode::TailCall {
            self.terminate(op, &inputs)
        } else {
            self.graph.new_node_with_type(op, &inputs, NodeType::Int32)
        })
    }
}
