pub mod cfg_analyzer;
pub mod clobber;
pub mod dead_store_elimination;
pub mod memory_ssa;
pub mod memory_ssa_builder;
