use std::path::PathBuf;

use rustc_hash::FxHashMap;

use crate::diagnostic::{DiagnosticSink, Reporter};
use crate::error::Result;
use crate::ir::*;
use crate::ir_processor::memory_ssa::MemorySsa;
use crate::ir_processor::memory_ssa_builder::build_memory_ssa;
use crate::mem_ssa_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Modified,
    Unmodified,
}

impl PassOutcome {
    pub fn from_changed(changed: bool) -> Self {
        if changed {
            PassOutcome::Modified
        } else {
            PassOutcome::Unmodified
        }
    }

    pub fn is_modified(self) -> bool {
        self == PassOutcome::Modified
    }
}

#[derive(Debug, Clone)]
pub struct FlatConfig {
    pub dot_dir: Option<PathBuf>,
    pub verify_memory_ssa: bool,
}

impl From<FlatConfig> for Config {
    fn from(config: FlatConfig) -> Self {
        Self {
            dot_dir: config.dot_dir.unwrap_or_else(|| PathBuf::from(".")),
            verify_memory_ssa: config.verify_memory_ssa,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // memssa-dotの出力先
    pub dot_dir: PathBuf,
    // パスごとにグラフの整合性を検査する
    pub verify_memory_ssa: bool,
}

impl Default for Config {
    fn default() -> Self {
        FlatConfig {
            dot_dir: None,
            verify_memory_ssa: cfg!(debug_assertions),
        }
        .into()
    }
}

pub struct PassContext<'a> {
    pub config: &'a Config,
    pub sink: &'a mut dyn DiagnosticSink,
}

impl<'a> PassContext<'a> {
    pub fn new(config: &'a Config, sink: &'a mut dyn DiagnosticSink) -> Self {
        Self { config, sink }
    }

    pub fn reporter(&mut self, pass: &'static str, func: impl Into<String>) -> Reporter<'_> {
        Reporter::new(&mut *self.sink, pass, func)
    }
}

/// A transformation or analysis run on one function at a time. A pass that
/// changes `func` must keep the graph in sync or report `Modified` so the
/// pipeline rebuilds it.
pub trait FunctionPass {
    fn name(&self) -> &'static str;

    fn run(
        &mut self,
        func: &mut Func,
        mssa: &mut MemorySsa,
        ctx: &mut PassContext<'_>,
    ) -> Result<PassOutcome>;
}

pub type PassConstructor = fn() -> Box<dyn FunctionPass>;

#[derive(Debug, Clone, Default)]
pub struct PassRegistry {
    constructors: FxHashMap<String, PassConstructor>,
}

impl PassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, constructor: PassConstructor) -> Result<()> {
        if self.constructors.contains_key(name) {
            return Err(mem_ssa_error!("pass {} is already registered", name));
        }
        self.constructors.insert(name.to_string(), constructor);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names = self
            .constructors
            .keys()
            .map(String::as_str)
            .collect::<Vec<_>>();
        names.sort_unstable();
        names
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn FunctionPass>> {
        match self.constructors.get(name) {
            Some(constructor) => Ok(constructor()),
            None => Err(mem_ssa_error!(
                "unknown pass: {} (available: {})",
                name,
                self.names().join(", ")
            )),
        }
    }
}

pub struct Pipeline {
    passes: Vec<Box<dyn FunctionPass>>,
}

impl Pipeline {
    pub fn new(passes: Vec<Box<dyn FunctionPass>>) -> Self {
        Self { passes }
    }

    // e.g. "memssa-dot,memssa-dse"
    pub fn parse(pipeline: &str, registry: &PassRegistry) -> Result<Self> {
        let mut passes = Vec::new();
        for name in pipeline.split(',').map(str::trim) {
            if name.is_empty() {
                return Err(mem_ssa_error!("empty pass name in pipeline \"{}\"", pipeline));
            }
            passes.push(registry.create(name)?);
        }
        Ok(Self::new(passes))
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|pass| pass.name()).collect()
    }

    pub fn run_on_func(&mut self, func: &mut Func, ctx: &mut PassContext<'_>) -> Result<bool> {
        let mut mssa = build_memory_ssa(func)?;
        let mut stale = false;
        let mut changed = false;
        for pass in self.passes.iter_mut() {
            if stale {
                mssa = build_memory_ssa(func)?;
                stale = false;
            }
            log::debug!("running {} on {}", pass.name(), func.name);
            let outcome = pass.run(func, &mut mssa, ctx)?;
            if ctx.config.verify_memory_ssa {
                mssa.verify(func)?;
            }
            if outcome.is_modified() {
                // 依存する解析は作り直す
                stale = true;
                changed = true;
            }
        }
        Ok(changed)
    }

    pub fn run_on_module(&mut self, module: &mut Module, ctx: &mut PassContext<'_>) -> Result<bool> {
        let mut changed = false;
        for func in module.funcs.values_mut() {
            changed |= self.run_on_func(func, ctx)?;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::{Severity, VecSink};
    use crate::graph_export::{DOT_PASS_NAME, GraphExportPass};
    use crate::ir_parser::parse_module;
    use crate::ir_processor::dead_store_elimination::{DSE_PASS_NAME, DeadStoreEliminationPass};

    fn registry() -> PassRegistry {
        let mut registry = PassRegistry::new();
        registry
            .register(DSE_PASS_NAME, || Box::new(DeadStoreEliminationPass::new()))
            .unwrap();
        registry
            .register(DOT_PASS_NAME, || Box::new(GraphExportPass))
            .unwrap();
        registry
    }

    const INPUT: &str = r#"
        func f(l0, l1, l2) {
          bb0:
            store l0, l1
            store l0, l2
            l3 = load l0
            return l3
        }

        func g(l0, l1) {
          bb0:
            store l0, l1
            return
        }
        "#;

    #[test]
    fn test_registry() {
        let mut registry = registry();
        assert_eq!(registry.names(), vec![DOT_PASS_NAME, DSE_PASS_NAME]);
        assert!(registry.contains(DSE_PASS_NAME));
        assert!(
            registry
                .register(DSE_PASS_NAME, || Box::new(GraphExportPass))
                .is_err()
        );
        assert_eq!(registry.create(DSE_PASS_NAME).unwrap().name(), DSE_PASS_NAME);
    }

    #[test]
    fn test_pipeline_parse() {
        let registry = registry();
        let pipeline = Pipeline::parse("memssa-dot, memssa-dse", &registry).unwrap();
        assert_eq!(pipeline.pass_names(), vec![DOT_PASS_NAME, DSE_PASS_NAME]);
        assert!(Pipeline::parse("memssa-dse,,memssa-dot", &registry).is_err());
        let err = Pipeline::parse("memssa-licm", &registry).err().unwrap();
        assert!(err.to_string().contains("unknown pass: memssa-licm"));
    }

    #[test]
    fn test_run_on_module_is_idempotent() {
        let mut module = parse_module(INPUT).unwrap();
        let config = Config::default();
        let mut sink = VecSink::new();
        let mut pipeline = Pipeline::parse(DSE_PASS_NAME, &registry()).unwrap();

        let mut ctx = PassContext::new(&config, &mut sink);
        assert!(pipeline.run_on_module(&mut module, &mut ctx).unwrap());
        assert!(!pipeline.run_on_module(&mut module, &mut ctx).unwrap());

        insta::assert_snapshot!(module.to_string(), @r"
        func f(l0, l1, l2) {
          bb0:
            store l0, l2
            l3 = load l0
            return l3
        }

        func g(l0, l1) {
          bb0:
            store l0, l1
            return
        }
        ");
    }

    #[test]
    fn test_export_failure_does_not_stop_pipeline() {
        let mut module = parse_module(INPUT).unwrap();
        let config = Config {
            dot_dir: std::env::temp_dir()
                .join("memssa-opt-missing")
                .join("nested"),
            verify_memory_ssa: true,
        };
        let mut sink = VecSink::new();
        let mut pipeline = Pipeline::parse("memssa-dot,memssa-dse", &registry()).unwrap();
        let changed = {
            let mut ctx = PassContext::new(&config, &mut sink);
            pipeline.run_on_module(&mut module, &mut ctx).unwrap()
        };
        assert!(changed);
        let warnings = sink.messages(Severity::Warning);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].starts_with("cannot write"));
    }

    #[test]
    fn test_flat_config() {
        let config = Config::from(FlatConfig {
            dot_dir: None,
            verify_memory_ssa: false,
        });
        assert_eq!(config.dot_dir, PathBuf::from("."));
        assert!(!config.verify_memory_ssa);
    }
}
