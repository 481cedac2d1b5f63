mod id;
mod instr;
mod ir;

pub use id::*;
pub use instr::*;
pub use ir::*;
