use rustc_hash::{FxHashMap, FxHashSet};

use crate::{VecMap, ir::*};

// 先行ブロックはorderの順で、同じ辺は一度だけ数える
pub fn calc_predecessors(
    cfg: &VecMap<BasicBlockId, BasicBlock>,
    order: &[BasicBlockId],
) -> FxHashMap<BasicBlockId, Vec<BasicBlockId>> {
    let mut predecessors: FxHashMap<BasicBlockId, Vec<BasicBlockId>> = FxHashMap::default();
    for &id in order {
        let Some(block) = cfg.get(id) else {
            continue;
        };
        for successor in block.next.successors() {
            let preds = predecessors.entry(successor).or_default();
            if !preds.contains(&id) {
                preds.push(id);
            }
        }
    }
    predecessors
}

pub fn calculate_rpo(
    cfg: &VecMap<BasicBlockId, BasicBlock>,
    entry_id: BasicBlockId,
) -> FxHashMap<BasicBlockId, usize> {
    let mut visited = FxHashSet::default();
    let mut postorder = Vec::new();

    // DFSを行い、帰りがけ順でノードを記録する
    dfs_postorder(entry_id, cfg, &mut visited, &mut postorder);

    // 帰りがけ順 (postorder) を反転させたものが逆後順序 (RPO)
    postorder.reverse();

    postorder
        .into_iter()
        .enumerate()
        .map(|(i, id)| (id, i))
        .collect()
}

fn dfs_postorder(
    current_id: BasicBlockId,
    cfg: &VecMap<BasicBlockId, BasicBlock>,
    visited: &mut FxHashSet<BasicBlockId>,
    postorder: &mut Vec<BasicBlockId>,
) {
    visited.insert(current_id);
    let Some(node) = cfg.get(current_id) else {
        return;
    };

    for successor in node.next.successors() {
        if !visited.contains(&successor) {
            dfs_postorder(successor, cfg, visited, postorder);
        }
    }

    postorder.push(current_id);
}

pub fn rpo_order(rpo: &FxHashMap<BasicBlockId, usize>) -> Vec<BasicBlockId> {
    let mut nodes = rpo.keys().copied().collect::<Vec<_>>();
    nodes.sort_by_key(|id| rpo[id]);
    nodes
}
