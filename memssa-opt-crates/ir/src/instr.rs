use std::fmt;

use super::id::*;
use strum_macros::{EnumString, IntoStaticStr};

// load/storeは暗黙に決まるので、callだけが宣言する
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum MemoryEffect {
    #[default]
    None,
    Read,
    Write,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstrCall {
    pub callee: String,
    pub args: Vec<LocalId>,
    pub effect: MemoryEffect,
}

impl fmt::Display for InstrCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call")?;
        if self.effect != MemoryEffect::None {
            let effect: &'static str = self.effect.into();
            write!(f, ".{}", effect)?;
        }
        write!(f, " {}(", self.callee)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ")")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhiIncoming {
    pub bb: BasicBlockId,
    pub local: LocalId,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InstrKind {
    Nop,
    Int(i64),
    Add(LocalId, LocalId),
    Sub(LocalId, LocalId),
    Mul(LocalId, LocalId),
    // ポインタ
    Load(LocalId),
    // ポインタ, 値
    Store(LocalId, LocalId),
    Call(InstrCall),
    Phi(Vec<PhiIncoming>),
}

impl InstrKind {
    pub fn is_load(&self) -> bool {
        matches!(self, InstrKind::Load(_))
    }

    pub fn is_store(&self) -> bool {
        matches!(self, InstrKind::Store(_, _))
    }

    // ポインタはLocalIdの同一性でしか比較しない
    pub fn pointer_operand(&self) -> Option<LocalId> {
        match self {
            InstrKind::Load(ptr) | InstrKind::Store(ptr, _) => Some(*ptr),
            _ => None,
        }
    }

    pub fn memory_effect(&self) -> MemoryEffect {
        match self {
            InstrKind::Load(_) => MemoryEffect::Read,
            InstrKind::Store(_, _) => MemoryEffect::Write,
            InstrKind::Call(call) => call.effect,
            InstrKind::Nop
            | InstrKind::Int(_)
            | InstrKind::Add(_, _)
            | InstrKind::Sub(_, _)
            | InstrKind::Mul(_, _)
            | InstrKind::Phi(_) => MemoryEffect::None,
        }
    }
}

impl fmt::Display for InstrKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrKind::Nop => write!(f, "nop"),
            InstrKind::Int(i) => write!(f, "int {}", i),
            InstrKind::Add(a, b) => write!(f, "add {}, {}", a, b),
            InstrKind::Sub(a, b) => write!(f, "sub {}, {}", a, b),
            InstrKind::Mul(a, b) => write!(f, "mul {}, {}", a, b),
            InstrKind::Load(ptr) => write!(f, "load {}", ptr),
            InstrKind::Store(ptr, value) => write!(f, "store {}, {}", ptr, value),
            InstrKind::Call(call) => write!(f, "{}", call),
            InstrKind::Phi(incomings) => {
                write!(f, "phi ")?;
                for (i, incoming) in incomings.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "[{}: {}]", incoming.bb, incoming.local)?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instr {
    pub local: Option<LocalId>,
    pub kind: InstrKind,
}

impl Instr {
    pub fn new(local: Option<LocalId>, kind: InstrKind) -> Self {
        Self { local, kind }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(local) = self.local {
            write!(f, "{} = ", local)?;
        }
        write!(f, "{}", self.kind)
    }
}
