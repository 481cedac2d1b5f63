use std::fmt;

use derive_more::{Display, From, Into};
use rustc_hash::{FxHashMap, FxHashSet};
use vec_map::VecMap;

use crate::error::Result;
use crate::ir::*;
use crate::mem_ssa_error;

#[derive(Debug, Clone, Copy, From, Into, Hash, PartialEq, Eq, Ord, PartialOrd, Display)]
#[display("{_0}")]
pub struct MemoryAccessId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryDef {
    pub id: MemoryAccessId,
    // Noneなら命令に対応しない書き込み (関数入口の状態など)
    pub instr: Option<InstrRef>,
    pub defining: Option<MemoryAccessId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUse {
    pub id: MemoryAccessId,
    pub instr: InstrRef,
    pub defining: Option<MemoryAccessId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryMergeIncoming {
    pub bb: BasicBlockId,
    pub access: MemoryAccessId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMerge {
    pub id: MemoryAccessId,
    pub bb: BasicBlockId,
    pub incomings: Vec<MemoryMergeIncoming>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryAccess {
    Def(MemoryDef),
    Use(MemoryUse),
    Merge(MemoryMerge),
}

impl MemoryAccess {
    pub fn id(&self) -> MemoryAccessId {
        match self {
            MemoryAccess::Def(def) => def.id,
            MemoryAccess::Use(use_) => use_.id,
            MemoryAccess::Merge(merge) => merge.id,
        }
    }

    pub fn instr(&self) -> Option<InstrRef> {
        match self {
            MemoryAccess::Def(def) => def.instr,
            MemoryAccess::Use(use_) => Some(use_.instr),
            MemoryAccess::Merge(_) => None,
        }
    }

    pub fn defining_access(&self) -> Option<MemoryAccessId> {
        match self {
            MemoryAccess::Def(def) => def.defining,
            MemoryAccess::Use(use_) => use_.defining,
            MemoryAccess::Merge(_) => None,
        }
    }

    pub fn as_def(&self) -> Option<&MemoryDef> {
        match self {
            MemoryAccess::Def(def) => Some(def),
            _ => None,
        }
    }

    pub fn as_merge(&self) -> Option<&MemoryMerge> {
        match self {
            MemoryAccess::Merge(merge) => Some(merge),
            _ => None,
        }
    }

    fn replace_reference(
        &mut self,
        old: MemoryAccessId,
        new: Option<MemoryAccessId>,
        entry: Option<MemoryAccessId>,
    ) {
        match self {
            MemoryAccess::Def(MemoryDef { defining, .. })
            | MemoryAccess::Use(MemoryUse { defining, .. }) => {
                if *defining == Some(old) {
                    *defining = new;
                }
            }
            MemoryAccess::Merge(merge) => {
                for incoming in merge.incomings.iter_mut() {
                    if incoming.access == old
                        && let Some(replacement) = new.or(entry)
                    {
                        incoming.access = replacement;
                    }
                }
            }
        }
    }

    fn references(&self, target: MemoryAccessId) -> bool {
        match self {
            MemoryAccess::Def(_) | MemoryAccess::Use(_) => self.defining_access() == Some(target),
            MemoryAccess::Merge(merge) => merge
                .incomings
                .iter()
                .any(|incoming| incoming.access == target),
        }
    }
}

struct DisplayDefining(Option<MemoryAccessId>);

impl fmt::Display for DisplayDefining {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(id) => write!(f, "{}", id),
            None => write!(f, "liveOnEntry"),
        }
    }
}

impl fmt::Display for MemoryAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryAccess::Def(def) => {
                write!(f, "{} = MemoryDef({})", def.id, DisplayDefining(def.defining))
            }
            MemoryAccess::Use(use_) => write!(f, "MemoryUse({})", DisplayDefining(use_.defining)),
            MemoryAccess::Merge(merge) => {
                write!(f, "{} = MemoryMerge(", merge.id)?;
                for (i, incoming) in merge.incomings.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{{{},{}}}", incoming.bb, incoming.access)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemorySsa {
    accesses: VecMap<MemoryAccessId, MemoryAccess>,
    instr_accesses: FxHashMap<InstrRef, MemoryAccessId>,
    block_merges: FxHashMap<BasicBlockId, MemoryAccessId>,
    // Mergeの入力に関数入口の状態を渡すときだけ作る
    live_on_entry: Option<MemoryAccessId>,
}

impl MemorySsa {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_exists(&self, id: Option<MemoryAccessId>) -> Result<()> {
        match id {
            Some(id) if !self.accesses.contains_key(id) => {
                Err(mem_ssa_error!("memory access {} does not exist", id))
            }
            _ => Ok(()),
        }
    }

    fn check_instr_free(&self, instr: InstrRef) -> Result<()> {
        if let Some(existing) = self.instr_accesses.get(&instr) {
            return Err(mem_ssa_error!(
                "instruction {} already has memory access {}",
                instr,
                existing
            ));
        }
        Ok(())
    }

    pub fn create_def(
        &mut self,
        instr: Option<InstrRef>,
        defining: Option<MemoryAccessId>,
    ) -> Result<MemoryAccessId> {
        self.check_exists(defining)?;
        if let Some(instr) = instr {
            self.check_instr_free(instr)?;
        }
        let id = self.accesses.push_with(|id| {
            MemoryAccess::Def(MemoryDef {
                id,
                instr,
                defining,
            })
        });
        if let Some(instr) = instr {
            self.instr_accesses.insert(instr, id);
        }
        Ok(id)
    }

    pub fn create_use(
        &mut self,
        instr: InstrRef,
        defining: Option<MemoryAccessId>,
    ) -> Result<MemoryAccessId> {
        self.check_exists(defining)?;
        self.check_instr_free(instr)?;
        let id = self.accesses.push_with(|id| {
            MemoryAccess::Use(MemoryUse {
                id,
                instr,
                defining,
            })
        });
        self.instr_accesses.insert(instr, id);
        Ok(id)
    }

    // incomingsは後からset_merge_incomingsで埋める
    pub fn create_merge(&mut self, bb: BasicBlockId) -> Result<MemoryAccessId> {
        if let Some(existing) = self.block_merges.get(&bb) {
            return Err(mem_ssa_error!("{} already has merge {}", bb, existing));
        }
        let id = self.accesses.push_with(|id| {
            MemoryAccess::Merge(MemoryMerge {
                id,
                bb,
                incomings: Vec::new(),
            })
        });
        self.block_merges.insert(bb, id);
        Ok(id)
    }

    pub fn set_merge_incomings(
        &mut self,
        id: MemoryAccessId,
        incomings: Vec<MemoryMergeIncoming>,
    ) -> Result<()> {
        for incoming in &incomings {
            self.check_exists(Some(incoming.access))?;
        }
        match self.accesses.get_mut(id) {
            Some(MemoryAccess::Merge(merge)) => {
                merge.incomings = incomings;
                Ok(())
            }
            _ => Err(mem_ssa_error!("memory access {} is not a merge", id)),
        }
    }

    pub fn live_on_entry(&mut self) -> MemoryAccessId {
        if let Some(id) = self.live_on_entry {
            return id;
        }
        let id = self.accesses.push_with(|id| {
            MemoryAccess::Def(MemoryDef {
                id,
                instr: None,
                defining: None,
            })
        });
        self.live_on_entry = Some(id);
        id
    }

    pub fn is_live_on_entry(&self, id: MemoryAccessId) -> bool {
        self.live_on_entry == Some(id)
    }

    pub fn access(&self, id: MemoryAccessId) -> Option<&MemoryAccess> {
        self.accesses.get(id)
    }

    pub fn accesses(&self) -> impl Iterator<Item = &MemoryAccess> {
        self.accesses.values()
    }

    pub fn instr_access(&self, instr: InstrRef) -> Option<MemoryAccessId> {
        self.instr_accesses.get(&instr).copied()
    }

    pub fn block_merge(&self, bb: BasicBlockId) -> Option<MemoryAccessId> {
        self.block_merges.get(&bb).copied()
    }

    pub fn defining_access(&self, id: MemoryAccessId) -> Option<MemoryAccessId> {
        self.accesses.get(id).and_then(MemoryAccess::defining_access)
    }

    pub fn merge_incomings(&self, id: MemoryAccessId) -> Option<&[MemoryMergeIncoming]> {
        self.accesses
            .get(id)
            .and_then(MemoryAccess::as_merge)
            .map(|merge| merge.incomings.as_slice())
    }

    pub fn has_users(&self, id: MemoryAccessId) -> bool {
        self.accesses.values().any(|access| access.references(id))
    }

    // Mergeのincomingは空にできないので、入口状態はliveOnEntryで置き換える
    pub fn replace_all_uses_with(&mut self, old: MemoryAccessId, new: Option<MemoryAccessId>) {
        let entry = if new.is_none()
            && self
                .accesses
                .values()
                .any(|access| matches!(access, MemoryAccess::Merge(_)) && access.references(old))
        {
            Some(self.live_on_entry())
        } else {
            None
        };
        for access in self.accesses.values_mut() {
            access.replace_reference(old, new, entry);
        }
    }

    /// Deletes a definition and splices its users onto its own defining
    /// access.
    pub fn remove_def(&mut self, id: MemoryAccessId) -> Result<MemoryDef> {
        let def = match self.accesses.get(id) {
            Some(MemoryAccess::Def(def)) => *def,
            Some(_) => return Err(mem_ssa_error!("memory access {} is not a def", id)),
            None => return Err(mem_ssa_error!("memory access {} does not exist", id)),
        };
        if self.is_live_on_entry(id) {
            return Err(mem_ssa_error!("cannot remove the live-on-entry def"));
        }
        self.replace_all_uses_with(id, def.defining);
        self.accesses.remove(id);
        if let Some(instr) = def.instr {
            self.instr_accesses.remove(&instr);
        }
        Ok(def)
    }

    pub fn remove_merge(
        &mut self,
        id: MemoryAccessId,
        replacement: Option<MemoryAccessId>,
    ) -> Result<MemoryMerge> {
        let merge = match self.accesses.get(id) {
            Some(MemoryAccess::Merge(merge)) => merge.clone(),
            _ => return Err(mem_ssa_error!("memory access {} is not a merge", id)),
        };
        if replacement == Some(id) {
            return Err(mem_ssa_error!("merge {} cannot replace itself", id));
        }
        self.replace_all_uses_with(id, replacement);
        self.accesses.remove(id);
        self.block_merges.remove(&merge.bb);
        Ok(merge)
    }

    // 誰からも参照されなくなったlive-on-entryを消す
    pub fn prune_live_on_entry(&mut self) {
        if let Some(id) = self.live_on_entry
            && !self.has_users(id)
        {
            self.accesses.remove(id);
            self.live_on_entry = None;
        }
    }

    // Func::remove_instrsの返す対応に追従する
    pub fn remap_instrs(&mut self, mapping: &FxHashMap<InstrRef, InstrRef>) -> Result<()> {
        let mut instr_accesses = FxHashMap::default();
        for (&old, &id) in &self.instr_accesses {
            let Some(&new) = mapping.get(&old) else {
                return Err(mem_ssa_error!(
                    "memory access {} refers to removed instruction {}",
                    id,
                    old
                ));
            };
            instr_accesses.insert(new, id);
        }
        for access in self.accesses.values_mut() {
            match access {
                MemoryAccess::Def(MemoryDef {
                    instr: Some(instr), ..
                })
                | MemoryAccess::Use(MemoryUse { instr, .. }) => {
                    if let Some(&new) = mapping.get(instr) {
                        *instr = new;
                    }
                }
                MemoryAccess::Def(_) | MemoryAccess::Merge(_) => {}
            }
        }
        self.instr_accesses = instr_accesses;
        Ok(())
    }

    pub fn verify(&self, func: &Func) -> Result<()> {
        let mut seen_instrs = FxHashSet::default();
        for access in self.accesses.values() {
            match access {
                MemoryAccess::Def(def) => {
                    self.check_exists(def.defining)?;
                    if def.defining == Some(def.id) {
                        return Err(mem_ssa_error!("def {} defines itself", def.id));
                    }
                    if let Some(instr) = def.instr {
                        self.verify_instr(func, access, instr, MemoryEffect::Write)?;
                        seen_instrs.insert(instr);
                    }
                }
                MemoryAccess::Use(use_) => {
                    self.check_exists(use_.defining)?;
                    self.verify_instr(func, access, use_.instr, MemoryEffect::Read)?;
                    seen_instrs.insert(use_.instr);
                }
                MemoryAccess::Merge(merge) => {
                    if !func.bbs.contains_key(merge.bb) {
                        return Err(mem_ssa_error!("merge {} is in unknown block {}", merge.id, merge.bb));
                    }
                    if self.block_merge(merge.bb) != Some(merge.id) {
                        return Err(mem_ssa_error!("merge {} is not registered for {}", merge.id, merge.bb));
                    }
                    for incoming in &merge.incomings {
                        self.check_exists(Some(incoming.access))?;
                    }
                }
            }
        }
        if seen_instrs.len() != self.instr_accesses.len() {
            return Err(mem_ssa_error!("instruction table has stale entries"));
        }
        Ok(())
    }

    fn verify_instr(
        &self,
        func: &Func,
        access: &MemoryAccess,
        instr_ref: InstrRef,
        effect: MemoryEffect,
    ) -> Result<()> {
        let Some(instr) = func.instr(instr_ref) else {
            return Err(mem_ssa_error!("{} refers to missing instruction {}", access, instr_ref));
        };
        if instr.kind.memory_effect() != effect {
            return Err(mem_ssa_error!("{} is attached to `{}`", access, instr));
        }
        if self.instr_access(instr_ref) != Some(access.id()) {
            return Err(mem_ssa_error!("{} is not registered for {}", access, instr_ref));
        }
        Ok(())
    }
}
