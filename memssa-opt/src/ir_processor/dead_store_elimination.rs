use rustc_hash::FxHashSet;

use crate::diagnostic::Reporter;
use crate::error::Result;
use crate::ir::*;
use crate::ir_processor::clobber::{ClobberWalker, DefiningAccessWalker, clobber_of};
use crate::ir_processor::memory_ssa::{MemoryAccess, MemoryAccessId, MemorySsa};
use crate::pass::{FunctionPass, PassContext, PassOutcome};

pub const DSE_PASS_NAME: &str = "memssa-dse";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadStore {
    pub access: MemoryAccessId,
    pub instr: InstrRef,
    // このストアを上書きしたストア
    pub killed_by: InstrRef,
}

// 制限事項: 間にあるloadしか見ない。callやvolatileなアクセスは読まないものとして扱う
pub fn has_intervening_load(func: &Func, prev: InstrRef, cur: InstrRef) -> bool {
    if prev.bb_id != cur.bb_id || prev.instr_idx >= cur.instr_idx {
        return true;
    }
    let Some(ptr) = func.instr(prev).and_then(|instr| instr.kind.pointer_operand()) else {
        return true;
    };
    let Some(between) = func
        .bbs
        .get(prev.bb_id)
        .and_then(|bb| bb.instrs.get(prev.instr_idx + 1..cur.instr_idx))
    else {
        return true;
    };
    between
        .iter()
        .any(|instr| matches!(instr.kind, InstrKind::Load(p) if p == ptr))
}

fn store_of(func: &Func, mssa: &MemorySsa, id: MemoryAccessId) -> Option<(InstrRef, LocalId)> {
    let MemoryAccess::Def(def) = mssa.access(id)? else {
        return None;
    };
    // 命令を持たないDefはストアとみなさない
    let instr_ref = def.instr?;
    match func.instr(instr_ref)?.kind {
        InstrKind::Store(ptr, _) => Some((instr_ref, ptr)),
        _ => None,
    }
}

// 読むだけのフェーズ。同じブロック内で同じポインタへ後から上書きされ、
// 間にそのポインタのloadがないストアを集める
pub fn find_dead_stores(
    func: &Func,
    mssa: &MemorySsa,
    walker: &impl ClobberWalker,
    reporter: &mut Reporter<'_>,
) -> Vec<DeadStore> {
    let mut dead_stores = Vec::new();

    for bb_id in func.bb_ids().into_iter().rev() {
        let bb = &func.bbs[bb_id];
        for instr_idx in (0..bb.instrs.len()).rev() {
            let Some(cur_access) = mssa.instr_access(InstrRef::new(bb_id, instr_idx)) else {
                continue;
            };
            let Some((cur, cur_ptr)) = store_of(func, mssa, cur_access) else {
                continue;
            };

            let Some(prev_access) = clobber_of(walker, mssa, cur_access) else {
                continue;
            };
            let Some((prev, prev_ptr)) = store_of(func, mssa, prev_access) else {
                continue;
            };

            // 同じSSA値のポインタだけをmust-aliasとみなす
            if cur_ptr != prev_ptr {
                reporter.debug(format!(
                    "keeping {}: overwritten through a different pointer {}",
                    prev, cur_ptr
                ));
                continue;
            }
            if prev.bb_id != cur.bb_id {
                reporter.debug(format!("keeping {}: overwritten in another block", prev));
                continue;
            }
            if has_intervening_load(func, prev, cur) {
                reporter.debug(format!("keeping {}: {} is read before {}", prev, prev_ptr, cur));
                continue;
            }

            if let Some(instr) = func.instr(prev) {
                reporter.info(format!("removing dead store: {}", instr));
            }
            dead_stores.push(DeadStore {
                access: prev_access,
                instr: prev,
                killed_by: cur,
            });
        }
    }

    dead_stores
}

// 走査が終わるまでは何も書き換えない
pub fn eliminate_dead_stores(
    func: &mut Func,
    mssa: &mut MemorySsa,
    walker: &impl ClobberWalker,
    reporter: &mut Reporter<'_>,
) -> Result<bool> {
    let dead_stores = find_dead_stores(func, mssa, walker, reporter);
    if dead_stores.is_empty() {
        return Ok(false);
    }

    let mut removed = FxHashSet::default();
    for dead in &dead_stores {
        if !removed.insert(dead.instr) {
            continue;
        }
        mssa.remove_def(dead.access)?;
    }

    // 消したストアだけを詰める。元からあるnopには触らない
    let mapping = func.remove_instrs(&removed);
    mssa.remap_instrs(&mapping)?;

    Ok(true)
}

#[derive(Debug, Clone, Default)]
pub struct DeadStoreEliminationPass<W = DefiningAccessWalker> {
    walker: W,
}

impl DeadStoreEliminationPass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<W: ClobberWalker> DeadStoreEliminationPass<W> {
    pub fn with_walker(walker: W) -> Self {
        Self { walker }
    }
}

impl<W: ClobberWalker> FunctionPass for DeadStoreEliminationPass<W> {
    fn name(&self) -> &'static str {
        DSE_PASS_NAME
    }

    fn run(
        &mut self,
        func: &mut Func,
        mssa: &mut MemorySsa,
        ctx: &mut PassContext<'_>,
    ) -> Result<PassOutcome> {
        let mut reporter = ctx.reporter(DSE_PASS_NAME, &func.name);
        reporter.info(format!("running on function: {}", func.name));
        let changed = eliminate_dead_stores(func, mssa, &self.walker, &mut reporter)?;
        Ok(PassOutcome::from_changed(changed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::{Severity, VecSink};
    use crate::ir_parser::parse_module;
    use crate::ir_processor::memory_ssa_builder::build_memory_ssa;

    struct Run {
        func: Func,
        mssa: MemorySsa,
        changed: bool,
        sink: VecSink,
    }

    fn run_dse(input: &str) -> Run {
        let module = parse_module(input).unwrap();
        let mut func = module.funcs.values().next().unwrap().clone();
        let mut mssa = build_memory_ssa(&func).unwrap();
        let mut sink = VecSink::new();
        let changed = {
            let mut reporter = Reporter::new(&mut sink, DSE_PASS_NAME, func.name.clone());
            eliminate_dead_stores(&mut func, &mut mssa, &DefiningAccessWalker, &mut reporter)
                .unwrap()
        };
        Run {
            func,
            mssa,
            changed,
            sink,
        }
    }

    fn stores(func: &Func) -> Vec<String> {
        func.bbs
            .values()
            .flat_map(|bb| bb.instrs.iter())
            .filter(|instr| instr.kind.is_store())
            .map(|instr| instr.to_string())
            .collect()
    }

    #[test]
    fn test_consecutive_stores_keep_only_last() {
        let run = run_dse(
            r#"
            func dse_must1(l0, l1) {
              bb0:
                l2 = int 10
                store l0, l2
                l3 = int 20
                store l0, l3
                l4 = int 30
                store l0, l4
                l5 = load l0
                return l5
            }
            "#,
        );
        assert!(run.changed);
        assert_eq!(stores(&run.func), vec!["store l0, l4"]);
        insta::assert_snapshot!(run.func.to_string(), @r"
        func dse_must1(l0, l1) {
          bb0:
            l2 = int 10
            l3 = int 20
            l4 = int 30
            store l0, l4
            l5 = load l0
            return l5
        }
        ");
        assert_eq!(
            run.sink.messages(Severity::Info),
            vec![
                "removing dead store: store l0, l3",
                "removing dead store: store l0, l2",
            ]
        );

        // グラフも命令の移動に追従している
        run.mssa.verify(&run.func).unwrap();
        let bb0 = BasicBlockId::from(0);
        let def = run.mssa.instr_access(InstrRef::new(bb0, 3)).unwrap();
        let use_ = run.mssa.instr_access(InstrRef::new(bb0, 4)).unwrap();
        assert_eq!(run.mssa.defining_access(def), None);
        assert_eq!(run.mssa.defining_access(use_), Some(def));
    }

    #[test]
    fn test_existing_nop_is_kept() {
        let run = run_dse(
            r#"
            func with_nop(l0, l1, l2) {
              bb0:
                nop
                store l0, l1
                store l0, l2
                return
            }
            "#,
        );
        assert!(run.changed);
        insta::assert_snapshot!(run.func.to_string(), @r"
        func with_nop(l0, l1, l2) {
          bb0:
            nop
            store l0, l2
            return
        }
        ");
        run.mssa.verify(&run.func).unwrap();
        let bb0 = BasicBlockId::from(0);
        assert!(run.mssa.instr_access(InstrRef::new(bb0, 0)).is_none());
        assert!(run.mssa.instr_access(InstrRef::new(bb0, 1)).is_some());
    }

    #[test]
    fn test_distinct_pointers_never_eliminate() {
        let run = run_dse(
            r#"
            func dse_may1(l0, l1) {
              bb0:
                l2 = int 10
                store l0, l2
                l3 = int 20
                store l1, l3
                l4 = load l0
                return l4
            }
            "#,
        );
        assert!(!run.changed);
        assert_eq!(stores(&run.func), vec!["store l0, l2", "store l1, l3"]);
    }

    #[test]
    fn test_derived_pointers_are_distinct() {
        let run = run_dse(
            r#"
            func dse_may_alt(l0, l1, l2) {
              bb0:
                l3 = add l0, l1
                l4 = add l0, l2
                store l3, l1
                store l4, l2
                l5 = load l3
                return l5
            }
            "#,
        );
        assert!(!run.changed);
        assert_eq!(stores(&run.func).len(), 2);
    }

    #[test]
    fn test_unrelated_computation_between_stores() {
        let run = run_dse(
            r#"
            func dse_must_basic2(l0, l1) {
              bb0:
                store l0, l1
                l2 = call f(l1)
                store l0, l2
                l3 = load l0
                return l3
            }
            "#,
        );
        assert!(run.changed);
        assert_eq!(stores(&run.func), vec!["store l0, l2"]);
    }

    #[test]
    fn test_load_between_stores_keeps_both() {
        let run = run_dse(
            r#"
            func f(l0, l1, l2) {
              bb0:
                store l0, l1
                l3 = load l0
                store l0, l2
                l4 = load l0
                l5 = add l3, l4
                return l5
            }
            "#,
        );
        assert!(!run.changed);
        assert_eq!(stores(&run.func).len(), 2);
        assert!(
            run.sink
                .messages(Severity::Debug)
                .iter()
                .any(|message| message.contains("is read before"))
        );
    }

    #[test]
    fn test_stores_in_different_blocks_are_kept() {
        let run = run_dse(
            r#"
            func f(l0, l1, l2) {
              bb0:
                store l0, l1
                jump bb1
              bb1:
                store l0, l2
                l3 = load l0
                return l3
            }
            "#,
        );
        assert!(!run.changed);
        assert_eq!(stores(&run.func).len(), 2);
    }

    #[test]
    fn test_stores_after_merge_are_kept() {
        let run = run_dse(
            r#"
            func dse_must_simple(l0, l1) {
              bb0:
                store l0, l1
                if l1 then bb1 else bb2
              bb1:
                jump bb3
              bb2:
                jump bb3
              bb3:
                store l0, l1
                l2 = load l0
                return l2
            }
            "#,
        );
        assert!(!run.changed);
        assert_eq!(stores(&run.func).len(), 2);
    }

    #[test]
    fn test_read_only_call_does_not_block() {
        // callが読むかどうかは見ないので、このストアは消える
        let run = run_dse(
            r#"
            func f(l0, l1, l2) {
              bb0:
                store l0, l1
                l3 = call.read observe(l0)
                store l0, l2
                return l3
            }
            "#,
        );
        assert!(run.changed);
        assert_eq!(stores(&run.func), vec!["store l0, l2"]);
        run.mssa.verify(&run.func).unwrap();
    }

    #[test]
    fn test_writing_call_is_not_a_store() {
        let run = run_dse(
            r#"
            func f(l0, l1, l2) {
              bb0:
                store l0, l1
                call.write clobber(l0)
                store l0, l2
                return
            }
            "#,
        );
        assert!(!run.changed);
        assert_eq!(stores(&run.func).len(), 2);
    }

    #[test]
    fn test_second_run_is_noop() {
        let input = r#"
            func f(l0, l1, l2) {
              bb0:
                store l0, l1
                store l0, l2
                store l0, l1
                return
            }
            "#;
        let mut run = run_dse(input);
        assert!(run.changed);
        assert_eq!(stores(&run.func), vec!["store l0, l1"]);

        let mut sink = VecSink::new();
        let mut reporter = Reporter::new(&mut sink, DSE_PASS_NAME, "f");
        let changed = eliminate_dead_stores(
            &mut run.func,
            &mut run.mssa,
            &DefiningAccessWalker,
            &mut reporter,
        )
        .unwrap();
        assert!(!changed);
        assert_eq!(stores(&run.func), vec!["store l0, l1"]);
    }

    #[test]
    fn test_unmodeled_def_is_never_a_candidate() {
        let bb0 = BasicBlockId::from(0);
        let module = parse_module(
            r#"
            func f(l0, l1) {
              bb0:
                store l0, l1
                return
            }
            "#,
        )
        .unwrap();
        let mut func = module.funcs.values().next().unwrap().clone();
        let mut mssa = MemorySsa::new();
        let opaque = mssa.create_def(None, None).unwrap();
        mssa.create_def(Some(InstrRef::new(bb0, 0)), Some(opaque))
            .unwrap();

        let mut sink = VecSink::new();
        let mut reporter = Reporter::new(&mut sink, DSE_PASS_NAME, "f");
        assert!(
            !eliminate_dead_stores(&mut func, &mut mssa, &DefiningAccessWalker, &mut reporter)
                .unwrap()
        );
        assert!(mssa.access(opaque).is_some());
    }

    #[test]
    fn test_has_intervening_load() {
        let module = parse_module(
            r#"
            func f(l0, l1, l2) {
              bb0:
                store l0, l1
                l3 = load l1
                store l0, l2
                l4 = load l0
                store l0, l2
                return
              bb1:
                store l0, l2
                return
            }
            "#,
        )
        .unwrap();
        let func = module.funcs.values().next().unwrap();
        let at = |bb: usize, idx: usize| InstrRef::new(BasicBlockId::from(bb), idx);
        assert!(!has_intervening_load(func, at(0, 0), at(0, 2)));
        assert!(has_intervening_load(func, at(0, 2), at(0, 4)));
        assert!(has_intervening_load(func, at(0, 0), at(1, 0)));
        assert!(has_intervening_load(func, at(0, 2), at(0, 0)));
    }
}
