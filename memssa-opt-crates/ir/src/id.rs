use derive_more::{Display, From, Into};

#[derive(Debug, Clone, Copy, From, Into, Hash, PartialEq, Eq, Ord, PartialOrd, Display)]
#[display("f{_0}")]
pub struct FuncId(usize);

#[derive(Debug, Clone, Copy, From, Into, Hash, PartialEq, Eq, Ord, PartialOrd, Display)]
#[display("l{_0}")]
pub struct LocalId(usize);

// 並び順はFunc::bb_orderが持つ
#[derive(Debug, Clone, Copy, From, Into, Hash, PartialEq, Eq, Ord, PartialOrd, Display)]
#[display("bb{_0}")]
pub struct BasicBlockId(usize);

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Ord, PartialOrd, Display)]
#[display("{bb_id}[{instr_idx}]")]
pub struct InstrRef {
    pub bb_id: BasicBlockId,
    pub instr_idx: usize,
}

impl InstrRef {
    pub fn new(bb_id: BasicBlockId, instr_idx: usize) -> Self {
        Self { bb_id, instr_idx }
    }
}
