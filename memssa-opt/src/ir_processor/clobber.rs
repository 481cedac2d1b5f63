use rustc_hash::FxHashSet;

use crate::ir_processor::memory_ssa::{MemoryAccess, MemoryAccessId, MemorySsa};

/// Answers "which access last wrote the memory this access touches".
pub trait ClobberWalker {
    fn clobbering_access(&self, mssa: &MemorySsa, id: MemoryAccessId) -> Option<MemoryAccessId>;
}

// エイリアス情報がないので直前のDefがclobber
// 全incomingが同じアクセスに行き着くMergeは透過する
#[derive(Debug, Clone, Copy, Default)]
pub struct DefiningAccessWalker;

impl ClobberWalker for DefiningAccessWalker {
    fn clobbering_access(&self, mssa: &MemorySsa, id: MemoryAccessId) -> Option<MemoryAccessId> {
        let defining = mssa.defining_access(id)?;
        Some(look_through_merge(mssa, defining))
    }
}

fn look_through_merge(mssa: &MemorySsa, id: MemoryAccessId) -> MemoryAccessId {
    if !matches!(mssa.access(id), Some(MemoryAccess::Merge(_))) {
        return id;
    }
    let mut visited = FxHashSet::default();
    let mut leaves = FxHashSet::default();
    collect_merge_leaves(mssa, id, &mut visited, &mut leaves);
    match leaves.iter().next() {
        Some(&leaf) if leaves.len() == 1 => leaf,
        _ => id,
    }
}

// ループ上のMergeは一度しか辿らない
fn collect_merge_leaves(
    mssa: &MemorySsa,
    id: MemoryAccessId,
    visited: &mut FxHashSet<MemoryAccessId>,
    leaves: &mut FxHashSet<MemoryAccessId>,
) {
    match mssa.access(id) {
        Some(MemoryAccess::Merge(merge)) => {
            if !visited.insert(id) {
                return;
            }
            for incoming in &merge.incomings {
                collect_merge_leaves(mssa, incoming.access, visited, leaves);
            }
        }
        _ => {
            leaves.insert(id);
        }
    }
}

// Noneなら関数入口まで遡った
pub fn clobber_of(
    walker: &impl ClobberWalker,
    mssa: &MemorySsa,
    id: MemoryAccessId,
) -> Option<MemoryAccessId> {
    walker.clobbering_access(mssa, id)
}
