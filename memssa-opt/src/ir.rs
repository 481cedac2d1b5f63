pub use memssa_opt_ir::*;
