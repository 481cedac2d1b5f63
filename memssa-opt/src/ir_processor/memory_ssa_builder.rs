use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::ir::*;
use crate::ir_processor::cfg_analyzer::{calc_predecessors, calculate_rpo, rpo_order};
use crate::ir_processor::memory_ssa::{MemoryAccessId, MemorySsa, MemoryMergeIncoming};
use crate::mem_ssa_error;

// 全てのメモリアクセスは同じ1つのメモリ状態を読み書きするとみなす
// 到達不能なブロックの命令にはアクセスを作らない
pub fn build_memory_ssa(func: &Func) -> Result<MemorySsa> {
    let mut mssa = MemorySsa::new();
    let rpo = calculate_rpo(&func.bbs, func.bb_entry);
    let order = rpo_order(&rpo);
    let predecessors = calc_predecessors(&func.bbs, &func.bb_ids())
        .into_iter()
        .map(|(bb_id, preds)| {
            let reachable = preds
                .into_iter()
                .filter(|pred| rpo.contains_key(pred))
                .collect::<Vec<_>>();
            (bb_id, reachable)
        })
        .collect::<FxHashMap<_, _>>();

    if predecessors
        .get(&func.bb_entry)
        .is_some_and(|preds| !preds.is_empty())
    {
        return Err(mem_ssa_error!(
            "entry block {} of {} must not have predecessors",
            func.bb_entry,
            func.name
        ));
    }

    // 合流点には先にMergeを置いておく (ループの後方辺から参照されるため)
    for &bb_id in &order {
        if predecessors.get(&bb_id).is_some_and(|preds| preds.len() >= 2) {
            mssa.create_merge(bb_id)?;
        }
    }

    let mut out_states: FxHashMap<BasicBlockId, Option<MemoryAccessId>> = FxHashMap::default();
    for &bb_id in &order {
        let mut state = if let Some(merge) = mssa.block_merge(bb_id) {
            Some(merge)
        } else {
            match predecessors.get(&bb_id).and_then(|preds| preds.first()) {
                // 先行ブロックが1つならRPOで先に処理済み
                Some(pred) => out_states.get(pred).copied().flatten(),
                None => None,
            }
        };

        for (instr_idx, instr) in func.bbs[bb_id].instrs.iter().enumerate() {
            let instr_ref = InstrRef::new(bb_id, instr_idx);
            match instr.kind.memory_effect() {
                MemoryEffect::Write => {
                    state = Some(mssa.create_def(Some(instr_ref), state)?);
                }
                MemoryEffect::Read => {
                    mssa.create_use(instr_ref, state)?;
                }
                MemoryEffect::None => {}
            }
        }
        out_states.insert(bb_id, state);
    }

    for &bb_id in &order {
        let Some(merge) = mssa.block_merge(bb_id) else {
            continue;
        };
        let mut incomings = Vec::new();
        for &pred in &predecessors[&bb_id] {
            let access = match out_states.get(&pred).copied().flatten() {
                Some(access) => access,
                None => mssa.live_on_entry(),
            };
            incomings.push(MemoryMergeIncoming { bb: pred, access });
        }
        mssa.set_merge_incomings(merge, incomings)?;
    }

    remove_trivial_merges(&mut mssa)?;

    if cfg!(debug_assertions) {
        mssa.verify(func)?;
    }

    Ok(mssa)
}

// 自己参照を除いた入力が1種類しかないMergeを取り除く
// 置き換えで別のMergeが自明になることがあるので不動点まで繰り返す
fn remove_trivial_merges(mssa: &mut MemorySsa) -> Result<()> {
    let mut changed = true;
    while changed {
        changed = false;
        let merges = mssa
            .accesses()
            .filter_map(|access| access.as_merge())
            .map(|merge| merge.id)
            .collect::<Vec<_>>();
        for merge in merges {
            let Some(incomings) = mssa.merge_incomings(merge) else {
                continue;
            };
            let mut unique = None;
            let mut trivial = true;
            for incoming in incomings {
                if incoming.access == merge || Some(incoming.access) == unique {
                    continue;
                }
                if unique.is_some() {
                    trivial = false;
                    break;
                }
                unique = Some(incoming.access);
            }
            if !trivial {
                continue;
            }
            let replacement = unique.filter(|&access| !mssa.is_live_on_entry(access));
            mssa.remove_merge(merge, replacement)?;
            changed = true;
        }
    }
    mssa.prune_live_on_entry();
    Ok(())
}
