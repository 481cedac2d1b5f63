use std::fmt;

use super::id::*;
use super::instr::*;
use rustc_hash::{FxHashMap, FxHashSet};
use vec_map::{HasId, VecMap};

pub const DISPLAY_INDENT: &str = "  ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminatorInstr {
    If(LocalId, BasicBlockId, BasicBlockId),
    Jump(BasicBlockId),
    Return(Option<LocalId>),
}

impl TerminatorInstr {
    pub fn successors(&self) -> impl Iterator<Item = BasicBlockId> {
        let (first, second) = match *self {
            TerminatorInstr::If(_, bb1, bb2) => (Some(bb1), Some(bb2)),
            TerminatorInstr::Jump(bb) => (Some(bb), None),
            TerminatorInstr::Return(_) => (None, None),
        };
        first.into_iter().chain(second)
    }
}

impl fmt::Display for TerminatorInstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminatorInstr::If(cond, bb1, bb2) => {
                write!(f, "if {} then {} else {}", cond, bb1, bb2)
            }
            TerminatorInstr::Jump(bb) => write!(f, "jump {}", bb),
            TerminatorInstr::Return(Some(local)) => write!(f, "return {}", local),
            TerminatorInstr::Return(None) => write!(f, "return"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    pub id: BasicBlockId,
    pub instrs: Vec<Instr>,
    pub next: TerminatorInstr,
}

impl HasId for BasicBlock {
    type Id = BasicBlockId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // きれいな実装ではないがインデントは決め打ちする
        writeln!(f, "{}{}:", DISPLAY_INDENT, self.id)?;
        for instr in &self.instrs {
            writeln!(f, "{}{}{}", DISPLAY_INDENT, DISPLAY_INDENT, instr)?;
        }
        writeln!(f, "{}{}{}", DISPLAY_INDENT, DISPLAY_INDENT, self.next)
    }
}

#[derive(Debug, Clone)]
pub struct Func {
    pub id: FuncId,
    pub name: String,
    pub args: Vec<LocalId>,
    pub bb_entry: BasicBlockId,
    pub bbs: VecMap<BasicBlockId, BasicBlock>,
    // 書かれた順。先頭がbb_entry
    pub bb_order: Vec<BasicBlockId>,
}

impl HasId for Func {
    type Id = FuncId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl Func {
    pub fn bb_ids(&self) -> Vec<BasicBlockId> {
        self.bb_order
            .iter()
            .copied()
            .filter(|&bb_id| self.bbs.contains_key(bb_id))
            .collect()
    }

    pub fn instr(&self, instr_ref: InstrRef) -> Option<&Instr> {
        self.bbs
            .get(instr_ref.bb_id)
            .and_then(|bb| bb.instrs.get(instr_ref.instr_idx))
    }

    pub fn instr_mut(&mut self, instr_ref: InstrRef) -> Option<&mut Instr> {
        self.bbs
            .get_mut(instr_ref.bb_id)
            .and_then(|bb| bb.instrs.get_mut(instr_ref.instr_idx))
    }

    // 指定された命令だけ取り除いて詰める
    // 返り値は残った命令の旧位置から新位置への対応
    pub fn remove_instrs(
        &mut self,
        removed: &FxHashSet<InstrRef>,
    ) -> FxHashMap<InstrRef, InstrRef> {
        let mut mapping = FxHashMap::default();
        for (bb_id, bb) in self.bbs.iter_mut() {
            let mut new_idx = 0;
            let mut old_idx = 0;
            bb.instrs.retain(|_| {
                let old = InstrRef::new(bb_id, old_idx);
                old_idx += 1;
                if removed.contains(&old) {
                    false
                } else {
                    mapping.insert(old, InstrRef::new(bb_id, new_idx));
                    new_idx += 1;
                    true
                }
            });
        }
        mapping
    }
}

impl fmt::Display for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "func {}(", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        writeln!(f, ") {{")?;
        for bb_id in self.bb_ids() {
            write!(f, "{}", self.bbs[bb_id])?;
        }
        writeln!(f, "}}")
    }
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    pub funcs: VecMap<FuncId, Func>,
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, func) in self.funcs.values().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", func)?;
        }
        Ok(())
    }
}
