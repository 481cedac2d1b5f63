pub mod diagnostic;
pub mod graph_export;
pub mod ir;
pub mod ir_parser;
pub mod ir_processor;
pub mod pass;

pub use memssa_opt_error as error;
pub use memssa_opt_error::mem_ssa_error;
pub use vec_map::VecMap;
