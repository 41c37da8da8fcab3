//! Recomputes `max_stack` and `max_locals` after a method has been edited, and checks that the
//! operand stack is consistent on every path.

use std::collections::HashMap;

use super::{
    class::{FieldOp, Insn, InvokeOp, JumpOp, Label, MethodNode, Op, TypeOp},
    descriptor::{field_size, MethodDescriptor},
    TransformError,
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("stack underflow at instruction {index}")]
    Underflow { index: usize },

    #[error("stack height at instruction {index} is {found} on one path and {expected} on another")]
    HeightMismatch {
        index: usize,
        expected: u16,
        found: u16,
    },

    #[error("operand stack grows past {} slots at instruction {index}", u16::MAX)]
    StackOverflow { index: usize },

    #[error("local variable at instruction {index} lies past slot {}", u16::MAX)]
    TooManyLocals { index: usize },

    #[error("execution can run off the end of the method")]
    FallOffEnd,

    #[error("jump to unknown label {0:?}")]
    UnknownLabel(Label),

    #[error("bad descriptor '{0}'")]
    BadDescriptor(String),
}

impl From<TransformError> for VerifyError {
    fn from(err: TransformError) -> VerifyError {
        match err {
            TransformError::BadDescriptor(desc) => VerifyError::BadDescriptor(desc),
            other => VerifyError::BadDescriptor(other.to_string()),
        }
    }
}

/// How an instruction affects the operand stack, in slots.
struct Effect {
    pop: u16,
    push: u16,
}

impl Effect {
    fn new(pop: u16, push: u16) -> Effect {
        Effect { pop, push }
    }
}

fn effect(insn: &Insn) -> Result<Effect, VerifyError> {
    Ok(match insn {
        Insn::Op(op) => match op {
            Op::Nop | Op::Return => Effect::new(0, 0),
            Op::AconstNull => Effect::new(0, 1),
            Op::Pop | Op::Athrow | Op::Ireturn | Op::Areturn => Effect::new(1, 0),
            Op::MonitorEnter | Op::MonitorExit => Effect::new(1, 0),
            Op::Pop2 | Op::Lreturn => Effect::new(2, 0),
            Op::Dup => Effect::new(1, 2),
            Op::DupX1 => Effect::new(2, 3),
            Op::Swap => Effect::new(2, 2),
            Op::Iadd | Op::Isub => Effect::new(2, 1),
            Op::Arraylength => Effect::new(1, 1),
        },

        Insn::Var(op, _) if op.is_store() => Effect::new(op.size(), 0),
        Insn::Var(op, _) => Effect::new(0, op.size()),
        Insn::Iinc { .. } => Effect::new(0, 0),
        Insn::Push(_) => Effect::new(0, 1),
        Insn::Ldc(constant) => match constant {
            super::class::Constant::Long(_) => Effect::new(0, 2),
            _ => Effect::new(0, 1),
        },

        Insn::Type(op, _) => match op {
            TypeOp::New => Effect::new(0, 1),
            TypeOp::Checkcast | TypeOp::Instanceof | TypeOp::Anewarray => Effect::new(1, 1),
        },

        Insn::Field { op, desc, .. } => {
            let size = field_size(desc)?;

            match op {
                FieldOp::GetStatic => Effect::new(0, size),
                FieldOp::PutStatic => Effect::new(size, 0),
                FieldOp::GetField => Effect::new(1, size),
                FieldOp::PutField => Effect::new(1 + size, 0),
            }
        }

        Insn::Invoke { op, desc, .. } => {
            let desc = MethodDescriptor::parse(desc)?;
            let receiver = u16::from(*op != InvokeOp::Static);

            Effect::new(desc.param_slots() + receiver, desc.ret)
        }

        Insn::Jump(op, _) => match op {
            JumpOp::Goto => Effect::new(0, 0),
            JumpOp::Ifeq | JumpOp::Ifne | JumpOp::Ifnull | JumpOp::Ifnonnull => Effect::new(1, 0),
            JumpOp::IfIcmpeq | JumpOp::IfIcmpne | JumpOp::IfAcmpeq | JumpOp::IfAcmpne => {
                Effect::new(2, 0)
            }
        },

        Insn::Label(_) | Insn::Line(_) => Effect::new(0, 0),
    })
}

/// Whether control never continues to the next instruction.
fn ends_flow(insn: &Insn) -> bool {
    matches!(
        insn,
        Insn::Op(Op::Return | Op::Ireturn | Op::Lreturn | Op::Areturn | Op::Athrow)
            | Insn::Jump(JumpOp::Goto, _)
    )
}

/// Recomputes the method's `max_stack` and `max_locals` in place. On error the method is left
/// untouched.
pub fn compute_maxs(method: &mut MethodNode) -> Result<(), VerifyError> {
    let insns = &method.instructions;

    let labels: HashMap<Label, usize> = insns
        .iter()
        .enumerate()
        .filter_map(|(index, insn)| match insn {
            Insn::Label(label) => Some((*label, index)),
            _ => None,
        })
        .collect();

    let target = |label: &Label| {
        labels
            .get(label)
            .copied()
            .ok_or(VerifyError::UnknownLabel(*label))
    };

    let mut heights: Vec<Option<u16>> = vec![None; insns.len()];
    let mut pending: Vec<(usize, u16)> = vec![(0, 0)];
    let mut max_stack = 0u16;

    // Exception handlers start with just the exception on the stack.
    for block in &method.try_catch {
        target(&block.start)?;
        target(&block.end)?;
        pending.push((target(&block.handler)?, 1));
        max_stack = max_stack.max(1);
    }

    while let Some((index, height)) = pending.pop() {
        if index >= insns.len() {
            return Err(VerifyError::FallOffEnd);
        }

        match heights[index] {
            Some(expected) if expected != height => {
                return Err(VerifyError::HeightMismatch {
                    index,
                    expected,
                    found: height,
                });
            }

            Some(_) => continue,
            None => heights[index] = Some(height),
        }

        let insn = &insns[index];
        let Effect { pop, push } = effect(insn)?;

        let after = height
            .checked_sub(pop)
            .ok_or(VerifyError::Underflow { index })?
            .checked_add(push)
            .ok_or(VerifyError::StackOverflow { index })?;
        max_stack = max_stack.max(after);

        if let Insn::Jump(_, label) = insn {
            pending.push((target(label)?, after));
        }

        if !ends_flow(insn) {
            pending.push((index + 1, after));
        }
    }

    let descriptor = MethodDescriptor::parse(&method.descriptor)?;
    let receiver = u16::from(!method.is_static());

    let max_locals = insns
        .iter()
        .enumerate()
        .filter_map(|(index, insn)| match insn {
            Insn::Var(op, slot) => Some((index, slot.checked_add(op.size()))),
            Insn::Iinc { slot, .. } => Some((index, slot.checked_add(1))),
            _ => None,
        })
        .try_fold(descriptor.param_slots() + receiver, |max, (index, end)| {
            end.map(|end| max.max(end))
                .ok_or(VerifyError::TooManyLocals { index })
        })?;

    method.max_stack = max_stack;
    method.max_locals = max_locals;

    Ok(())
}
