//! The class container and the instruction model that rules operate on.
//!
//! A class file is a four byte big-endian magic followed by a `bincode` encoding of a
//! [`ClassNode`]. Instructions are kept as an ordered list in which labels and line markers
//! are pseudo-instructions, so inserting code never has to patch branch offsets.

use byteorder::{ReadBytesExt, WriteBytesExt, BE};
use serde::{Deserialize, Serialize};

use super::TransformError;

pub const CLASS_MAGIC: u32 = 0xCAFE_BABE;

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_PRIVATE: u16 = 0x0002;
pub const ACC_STATIC: u16 = 0x0008;

/// A branch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label(pub u32);

/// Instructions without operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Nop,
    AconstNull,
    Pop,
    Pop2,
    Dup,
    DupX1,
    Swap,
    Iadd,
    Isub,
    Arraylength,
    Athrow,
    Return,
    Ireturn,
    Lreturn,
    Areturn,
    MonitorEnter,
    MonitorExit,
}

/// Local variable loads and stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarOp {
    Iload,
    Lload,
    Aload,
    Istore,
    Lstore,
    Astore,
}

impl VarOp {
    pub fn is_store(self) -> bool {
        matches!(self, VarOp::Istore | VarOp::Lstore | VarOp::Astore)
    }

    /// The number of slots the value occupies, both on the stack and in the locals.
    pub fn size(self) -> u16 {
        match self {
            VarOp::Lload | VarOp::Lstore => 2,
            _ => 1,
        }
    }
}

/// Instructions with a class operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeOp {
    New,
    Checkcast,
    Instanceof,
    Anewarray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldOp {
    GetStatic,
    PutStatic,
    GetField,
    PutField,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvokeOp {
    Virtual,
    Special,
    Static,
    Interface,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JumpOp {
    Ifeq,
    Ifne,
    Ifnull,
    Ifnonnull,
    IfIcmpeq,
    IfIcmpne,
    IfAcmpeq,
    IfAcmpne,
    Goto,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Constant {
    Int(i32),
    Long(i64),
    String(String),
    Class(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Insn {
    Op(Op),
    Var(VarOp, u16),
    Iinc {
        slot: u16,
        delta: i16,
    },
    Push(i32),
    Ldc(Constant),
    Type(TypeOp, String),
    Field {
        op: FieldOp,
        owner: String,
        name: String,
        desc: String,
    },
    Invoke {
        op: InvokeOp,
        owner: String,
        name: String,
        desc: String,
        interface: bool,
    },
    Jump(JumpOp, Label),

    /// Marks a branch target. Not a real instruction.
    Label(Label),

    /// Source line marker. Not a real instruction.
    Line(u32),
}

impl Insn {
    pub fn aload(slot: u16) -> Insn {
        Insn::Var(VarOp::Aload, slot)
    }

    pub fn astore(slot: u16) -> Insn {
        Insn::Var(VarOp::Astore, slot)
    }

    pub fn type_insn(op: TypeOp, class: &str) -> Insn {
        Insn::Type(op, class.to_string())
    }

    pub fn get_field(owner: &str, name: &str, desc: &str) -> Insn {
        Insn::Field {
            op: FieldOp::GetField,
            owner: owner.to_string(),
            name: name.to_string(),
            desc: desc.to_string(),
        }
    }

    fn invoke(op: InvokeOp, owner: &str, name: &str, desc: &str) -> Insn {
        Insn::Invoke {
            op,
            owner: owner.to_string(),
            name: name.to_string(),
            desc: desc.to_string(),
            interface: op == InvokeOp::Interface,
        }
    }

    pub fn invoke_static(owner: &str, name: &str, desc: &str) -> Insn {
        Insn::invoke(InvokeOp::Static, owner, name, desc)
    }

    pub fn invoke_virtual(owner: &str, name: &str, desc: &str) -> Insn {
        Insn::invoke(InvokeOp::Virtual, owner, name, desc)
    }

    pub fn invoke_special(owner: &str, name: &str, desc: &str) -> Insn {
        Insn::invoke(InvokeOp::Special, owner, name, desc)
    }

    pub fn invoke_interface(owner: &str, name: &str, desc: &str) -> Insn {
        Insn::invoke(InvokeOp::Interface, owner, name, desc)
    }

    /// Whether this is an instruction the VM executes, as opposed to a label or line marker.
    pub fn is_real(&self) -> bool {
        !matches!(self, Insn::Label(_) | Insn::Line(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TryCatch {
    pub start: Label,
    pub end: Label,
    pub handler: Label,

    /// `None` catches everything (`finally`).
    pub catch_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodNode {
    pub name: String,
    pub descriptor: String,
    pub access: u16,
    pub instructions: Vec<Insn>,
    pub try_catch: Vec<TryCatch>,
    pub max_stack: u16,
    pub max_locals: u16,
}

impl MethodNode {
    pub fn new(name: &str, descriptor: &str, access: u16, instructions: Vec<Insn>) -> MethodNode {
        MethodNode {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            access,
            instructions,
            try_catch: vec![],
            max_stack: 0,
            max_locals: 0,
        }
    }

    pub fn is_static(&self) -> bool {
        self.access & ACC_STATIC != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassNode {
    /// Internal name, e.g. `net/fabricmc/loader/impl/FabricLoaderImpl`.
    pub name: String,
    pub super_name: Option<String>,
    pub access: u16,
    pub methods: Vec<MethodNode>,
}

impl ClassNode {
    pub fn read(bytes: &[u8]) -> Result<ClassNode, TransformError> {
        let mut reader = bytes;

        let magic = reader
            .read_u32::<BE>()
            .map_err(|_| TransformError::BadMagic(None))?;

        if magic != CLASS_MAGIC {
            return Err(TransformError::BadMagic(Some(magic)));
        }

        bincode::deserialize(reader).map_err(TransformError::Decode)
    }

    pub fn write(&self) -> Result<Vec<u8>, TransformError> {
        let body = bincode::serialize(self).map_err(TransformError::Encode)?;

        let mut bytes = Vec::with_capacity(body.len() + 4);
        bytes
            .write_u32::<BE>(CLASS_MAGIC)
            .map_err(|err| TransformError::Encode(Box::new(bincode::ErrorKind::Io(err))))?;
        bytes.extend_from_slice(&body);

        Ok(bytes)
    }

    /// The first method called `name`. Loader methods we patch aren't overloaded.
    pub fn method_mut(&mut self, name: &str) -> Option<&mut MethodNode> {
        self.methods.iter_mut().find(|method| method.name == name)
    }

    pub fn method(&self, name: &str) -> Option<&MethodNode> {
        self.methods.iter().find(|method| method.name == name)
    }
}
