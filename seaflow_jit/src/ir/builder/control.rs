//! Control flow translation: joins, loops, branches and terminators.

use seaflow_bytecode::Likelihood;

use super::{Environment, GraphBuilder, LoopHeader};
use crate::error::BuildError;
use crate::ir::node::NodeId;
use crate::ir::operators::{BranchHint, Operator};

impl GraphBuilder<'_> {
    /// Combine the fall-through environment with everything that jumped to
    /// the current position. Returns `None` if the position is unreachable.
    pub(super) fn enter_position(
        &mut self,
        fall_through: Option<Environment>,
    ) -> Result<Option<Environment>, BuildError> {
        let position = self.position;
        let mut incoming = self.pending.remove(&position).unwrap_or_default();
        incoming.extend(fall_through);

        let mut env = if incoming.len() > 1 {
            self.merge_environments(incoming)?
        } else {
            match incoming.pop() {
                Some(env) => env,
                None => return Ok(None),
            }
        };

        if self.loop_targets.contains(&position) {
            env = self.open_loop(env);
        }
        Ok(Some(env))
    }

    /// Join several environments with a `Merge`.
    fn merge_environments(&mut self, envs: Vec<Environment>) -> Result<Environment, BuildError> {
        let first = &envs[0];
        if envs.iter().any(|e| !e.same_frames(first)) {
            return Err(BuildError::UnbalancedFrames {
                position: self.position,
            });
        }

        let controls: Vec<NodeId> = envs.iter().map(|e| e.control).collect();
        let merge = self.graph.merge(&controls);

        let mut slots = Vec::with_capacity(self.slot_count);
        let mut phis = 0usize;
        for slot in 0..self.slot_count {
            let values: Option<Vec<NodeId>> = envs.iter().map(|e| e.slots[slot]).collect();
            slots.push(values.map(|values| {
                if values.iter().all(|&v| v == values[0]) {
                    values[0]
                } else {
                    phis += 1;
                    let ty = self.graph.ty(values[0]);
                    self.graph.phi(ty, merge, &values)
                }
            }));
        }

        let effects: Vec<NodeId> = envs.iter().map(|e| e.effect).collect();
        let effect = if effects.iter().all(|&e| e == effects[0]) {
            effects[0]
        } else {
            self.graph.effect_phi(merge, &effects)
        };

        tracing::trace!(
            position = self.position,
            predecessors = envs.len(),
            phis,
            "merge"
        );

        Ok(Environment {
            slots,
            control: merge,
            effect,
            frames: envs[0].frames.clone(),
        })
    }

    /// Open a loop at the current position with a phi per live slot.
    fn open_loop(&mut self, mut env: Environment) -> Environment {
        let node = self.graph.loop_header(env.control);
        let mut phis = Vec::new();
        for (slot, value) in env.slots.iter_mut().enumerate() {
            if let Some(v) = *value {
                let ty = self.graph.ty(v);
                let phi = self.graph.phi(ty, node, &[v]);
                *value = Some(phi);
                phis.push((slot, phi));
            }
        }
        let effect_phi = self.graph.effect_phi(node, &[env.effect]);

        tracing::trace!(position = self.position, loop_node = %node, phis = phis.len(), "loop header");

        env.control = node;
        env.effect = effect_phi;
        self.loops.insert(
            self.position,
            LoopHeader {
                node,
                phis,
                effect_phi,
                frame_depth: env.frames.len(),
            },
        );
        env
    }

    /// Feed a back edge into the loop opened at `target`.
    fn close_loop(&mut self, target: u32, env: Environment) -> Result<(), BuildError> {
        let Some(header) = self.loops.get(&target) else {
            return Err(BuildError::IrreducibleLoop {
                position: self.position,
            });
        };
        if header.frame_depth != env.frames.len() {
            return Err(BuildError::UnbalancedFrames {
                position: self.position,
            });
        }
        self.graph.append_input(header.node, env.control);
        for &(slot, phi) in &header.phis {
            // A slot cleared inside the body keeps its header value.
            let value = env.slots[slot].unwrap_or(phi);
            self.graph.append_input(phi, value);
        }
        self.graph.append_input(header.effect_phi, env.effect);
        Ok(())
    }

    /// Transfer `env` to `target`.
    pub(super) fn goto(&mut self, target: u32, env: Environment) -> Result<(), BuildError> {
        if target <= self.position {
            self.close_loop(target, env)
        } else {
            self.pending.entry(target).or_default().push(env);
            Ok(())
        }
    }

    /// Conditional jump: `IfTrue` goes to `target`, `IfFalse` falls through.
    pub(super) fn branch(
        &mut self,
        condition: NodeId,
        target: u32,
        likelihood: Likelihood,
        mut env: Environment,
    ) -> Result<Option<Environment>, BuildError> {
        let hint = match likelihood {
            Likelihood::Unknown => BranchHint::None,
            Likelihood::Likely => BranchHint::True,
            Likelihood::Unlikely => BranchHint::False,
        };
        let branch = self.graph.branch(condition, env.control, hint);
        let if_true = self.graph.if_true(branch);
        let if_false = self.graph.if_false(branch);

        let mut taken = env.clone();
        taken.control = if_true;
        self.goto(target, taken)?;

        env.control = if_false;
        Ok(Some(env))
    }

    /// `Return`: leaves an inlined frame, or the compiled function.
    pub(super) fn return_value(&mut self, value: NodeId, mut env: Environment) -> Option<Environment> {
        if env.frames.len() > 1 {
            if let Some(frame) = env.frames.pop() {
                if let Some(slot) = frame.result_slot {
                    env.slots[slot] = Some(value);
                }
                tracing::trace!(position = self.position, callee = %frame.function, "leaving inlined frame");
            }
            return Some(env);
        }
        self.graph.return_value(env.control, value, env.effect);
        None
    }

    /// Create a terminator and wire it into `End`.
    pub(super) fn terminate(&mut self, op: Operator, inputs: &[NodeId]) -> NodeId {
        let node = self.graph.new_node(op, inputs);
        let end = self.graph.end();
        self.graph.append_input(end, node);
        node
    }
}
