//! Finding where in a method to put new code, and describing that code in terms of what the
//! locals *mean* rather than which slot they happen to be in.

use super::class::{Insn, JumpOp, Op, TypeOp, VarOp};

/// A local variable identified by its meaning in the entrypoint invocation routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalRole {
    /// The entrypoint key, the routine's first parameter.
    EntrypointName,

    /// The entrypoint's `Class`, the second parameter.
    EntrypointType,

    /// The loop variable holding the current entrypoint container.
    Container,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Role(LocalRole),
    Fixed(u16),
}

/// Where each role lives in one particular method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotTable {
    pub entrypoint_name: u16,
    pub entrypoint_type: u16,
    pub container: u16,
}

impl SlotTable {
    /// The layout of an entrypoint invocation routine. An instance method has `this` in slot 0,
    /// which pushes everything else along by one.
    pub fn invocation(container: u16, instance: bool) -> SlotTable {
        let offset = u16::from(instance);

        SlotTable {
            entrypoint_name: offset,
            entrypoint_type: 1 + offset,
            container: container + offset,
        }
    }

    /// For methods whose injected code doesn't refer to any role.
    pub fn none() -> SlotTable {
        SlotTable {
            entrypoint_name: 0,
            entrypoint_type: 1,
            container: 0,
        }
    }

    pub fn resolve(&self, slot: Slot) -> u16 {
        match slot {
            Slot::Fixed(slot) => slot,
            Slot::Role(LocalRole::EntrypointName) => self.entrypoint_name,
            Slot::Role(LocalRole::EntrypointType) => self.entrypoint_type,
            Slot::Role(LocalRole::Container) => self.container,
        }
    }
}

/// A predicate on a single instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    Op(Op),
    Store { op: VarOp, slot: Slot },
    TypeCheck { op: TypeOp, class: String },
    Jump(JumpOp),
}

impl Matcher {
    fn resolve(&self, slots: &SlotTable) -> Matcher {
        match self {
            Matcher::Store { op, slot } => Matcher::Store {
                op: *op,
                slot: Slot::Fixed(slots.resolve(*slot)),
            },
            other => other.clone(),
        }
    }

    pub fn matches(&self, insn: &Insn) -> bool {
        match (self, insn) {
            (Matcher::Op(expected), Insn::Op(op)) => expected == op,

            (
                Matcher::Store {
                    op: expected,
                    slot: Slot::Fixed(slot),
                },
                Insn::Var(op, var),
            ) => expected == op && slot == var,

            (
                Matcher::TypeCheck {
                    op: expected,
                    class,
                },
                Insn::Type(op, operand),
            ) => expected == op && class == operand,

            (Matcher::Jump(expected), Insn::Jump(op, _)) => expected == op,

            _ => false,
        }
    }
}

/// Where an injection goes relative to the scan cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// Right at the cursor, without scanning.
    AtCursor,

    /// Immediately before the next matching instruction.
    Before(Matcher),

    /// Immediately after the next matching instruction.
    After(Matcher),

    /// Before the real instruction `n` places ahead of the next match. Used to get in front of
    /// the load that feeds a conditional jump.
    BeforeLeading(Matcher, usize),
}

impl Locator {
    fn resolve(&self, slots: &SlotTable) -> Locator {
        match self {
            Locator::AtCursor => Locator::AtCursor,
            Locator::Before(matcher) => Locator::Before(matcher.resolve(slots)),
            Locator::After(matcher) => Locator::After(matcher.resolve(slots)),
            Locator::BeforeLeading(matcher, n) => {
                Locator::BeforeLeading(matcher.resolve(slots), *n)
            }
        }
    }

    /// Returns the index to insert at, scanning forward from `cursor`. Never returns an index
    /// before the cursor.
    pub fn find(&self, insns: &[Insn], cursor: usize) -> Option<usize> {
        let next_match = |matcher: &Matcher| {
            insns
                .iter()
                .enumerate()
                .skip(cursor)
                .find(|(_, insn)| matcher.matches(insn))
                .map(|(index, _)| index)
        };

        match self {
            Locator::AtCursor => (cursor <= insns.len()).then_some(cursor),
            Locator::Before(matcher) => next_match(matcher),
            Locator::After(matcher) => next_match(matcher).map(|index| index + 1),

            Locator::BeforeLeading(matcher, n) => {
                let mut index = next_match(matcher)?;
                let mut remaining = *n;

                while remaining > 0 {
                    if index <= cursor {
                        return None;
                    }

                    index -= 1;

                    if insns[index].is_real() {
                        remaining -= 1;
                    }
                }

                Some(index)
            }
        }
    }
}

/// One element of an injected fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    Insn(Insn),
    Load(VarOp, Slot),
}

impl From<Insn> for Piece {
    fn from(insn: Insn) -> Piece {
        Piece::Insn(insn)
    }
}

/// A declarative injection: where, and what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionSpec {
    pub name: &'static str,
    pub locator: Locator,
    pub fragment: Vec<Piece>,
}

impl InjectionSpec {
    pub fn new(name: &'static str, locator: Locator, fragment: Vec<Piece>) -> InjectionSpec {
        InjectionSpec {
            name,
            locator,
            fragment,
        }
    }

    /// Binds every role to a concrete slot.
    pub fn resolve(&self, slots: &SlotTable) -> Injection {
        Injection {
            name: self.name,
            locator: self.locator.resolve(slots),
            code: self
                .fragment
                .iter()
                .map(|piece| match piece {
                    Piece::Insn(insn) => insn.clone(),
                    Piece::Load(op, slot) => Insn::Var(*op, slots.resolve(*slot)),
                })
                .collect(),
        }
    }
}

/// An injection with all slots resolved, ready to splice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Injection {
    pub name: &'static str,
    pub locator: Locator,
    pub code: Vec<Insn>,
}

/// Shorthand for loading a local by role.
pub fn load(role: LocalRole) -> Piece {
    Piece::Load(VarOp::Aload, Slot::Role(role))
}
