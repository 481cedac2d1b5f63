use std::fmt::{self, Write};
use std::path::{Path, PathBuf};

use derive_more::{Display, From, Into};
use rustc_hash::FxHashMap;
use typed_index_collections::TiVec;

use crate::error::Result;
use crate::ir::*;
use crate::ir_processor::memory_ssa::{MemoryAccess, MemoryAccessId, MemorySsa};
use crate::mem_ssa_error;
use crate::pass::{FunctionPass, PassContext, PassOutcome};

pub const DOT_PASS_NAME: &str = "memssa-dot";

#[derive(Debug, Clone, Copy, From, Into, Hash, PartialEq, Eq, Ord, PartialOrd, Display)]
#[display("n{_0}")]
pub struct GraphNodeId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    pub id: GraphNodeId,
    pub access: MemoryAccessId,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphEdge {
    pub from: GraphNodeId,
    pub to: GraphNodeId,
}

#[derive(Debug, Clone)]
pub struct MemoryGraph {
    pub name: String,
    pub nodes: TiVec<GraphNodeId, GraphNode>,
    pub edges: Vec<GraphEdge>,
    // ブロックごとのアクセス一覧。dotと同じ順に並ぶ
    pub listing: Vec<String>,
}

impl MemoryGraph {
    pub fn to_dot(&self) -> String {
        let mut out = String::new();
        // Stringへの書き込みは失敗しない
        let _ = self.write_dot(&mut out);
        out
    }

    fn write_dot(&self, out: &mut impl Write) -> fmt::Result {
        writeln!(out, "digraph \"MSSA_{}\" {{", escape(&self.name))?;
        writeln!(out, "  node [shape=box,fontname=\"Courier\"];")?;
        for node in &self.nodes {
            writeln!(out, "  {} [label=\"{}\"];", node.id, escape(&node.label))?;
        }
        for edge in &self.edges {
            writeln!(out, "  {} -> {};", edge.from, edge.to)?;
        }
        writeln!(out, "}}")
    }
}

fn escape(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            // 左寄せの改行
            '\n' => escaped.push_str("\\l"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn label(func: &Func, access: &MemoryAccess) -> String {
    match access
        .instr()
        .and_then(|instr_ref| func.instr(instr_ref))
    {
        Some(instr) => format!("{}\n{}", access, instr),
        None => access.to_string(),
    }
}

struct GraphBuilder<'a> {
    func: &'a Func,
    mssa: &'a MemorySsa,
    node_ids: FxHashMap<MemoryAccessId, GraphNodeId>,
    nodes: TiVec<GraphNodeId, GraphNode>,
    edges: Vec<GraphEdge>,
    listing: Vec<String>,
}

impl<'a> GraphBuilder<'a> {
    // 初めて見たアクセスにだけ番号を振る
    fn node_id(&mut self, access: MemoryAccessId) -> GraphNodeId {
        if let Some(&id) = self.node_ids.get(&access) {
            return id;
        }
        let label = match self.mssa.access(access) {
            Some(memory_access) => label(self.func, memory_access),
            None => format!("<removed {}>", access),
        };
        let id = GraphNodeId::from(self.nodes.len());
        self.nodes.push(GraphNode { id, access, label });
        self.node_ids.insert(access, id);
        id
    }

    fn edge(&mut self, from: MemoryAccessId, to: GraphNodeId) {
        let from = self.node_id(from);
        self.edges.push(GraphEdge { from, to });
    }

    fn describe(&self, access: MemoryAccessId) -> String {
        match self.mssa.access(access) {
            Some(memory_access) => memory_access.to_string(),
            None => format!("<removed {}>", access),
        }
    }

    fn visit_merge(&mut self, bb_id: BasicBlockId, merge: MemoryAccessId) {
        let to = self.node_id(merge);
        self.listing.push(format!("  MemoryPhi for block {}:", bb_id));
        let incomings = self
            .mssa
            .merge_incomings(merge)
            .map(<[_]>::to_vec)
            .unwrap_or_default();
        for incoming in incomings {
            let line = format!("    from {}: {}", incoming.bb, self.describe(incoming.access));
            self.listing.push(line);
            self.edge(incoming.access, to);
        }
    }

    fn visit_access(&mut self, access: MemoryAccessId) {
        let to = self.node_id(access);
        let line = format!("  {}", self.describe(access));
        self.listing.push(line);
        if let Some(defining) = self.mssa.defining_access(access) {
            self.edge(defining, to);
        }
    }
}

pub fn export_graph(func: &Func, mssa: &MemorySsa) -> MemoryGraph {
    let mut builder = GraphBuilder {
        func,
        mssa,
        node_ids: FxHashMap::default(),
        nodes: TiVec::new(),
        edges: Vec::new(),
        listing: Vec::new(),
    };

    for bb_id in func.bb_ids() {
        builder.listing.push(format!("BasicBlock: {}", bb_id));
        if let Some(merge) = mssa.block_merge(bb_id) {
            builder.visit_merge(bb_id, merge);
        }
        for instr_idx in 0..func.bbs[bb_id].instrs.len() {
            if let Some(access) = mssa.instr_access(InstrRef::new(bb_id, instr_idx)) {
                builder.visit_access(access);
            }
        }
    }

    MemoryGraph {
        name: func.name.clone(),
        nodes: builder.nodes,
        edges: builder.edges,
        listing: builder.listing,
    }
}

pub fn write_dot(dir: &Path, graph: &MemoryGraph) -> Result<PathBuf> {
    let path = dir.join(format!("mssa_{}.dot", graph.name));
    std::fs::write(&path, graph.to_dot())
        .map_err(|e| mem_ssa_error!("cannot write {}: {}", path.display(), e))?;
    Ok(path)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GraphExportPass;

impl FunctionPass for GraphExportPass {
    fn name(&self) -> &'static str {
        DOT_PASS_NAME
    }

    fn run(
        &mut self,
        func: &mut Func,
        mssa: &mut MemorySsa,
        ctx: &mut PassContext<'_>,
    ) -> Result<PassOutcome> {
        let config = ctx.config;
        let mut reporter = ctx.reporter(DOT_PASS_NAME, &func.name);
        reporter.info(format!("analyzing function: {}", func.name));
        let graph = export_graph(func, mssa);
        match write_dot(&config.dot_dir, &graph) {
            Ok(path) => {
                reporter.info(format!("writing '{}'", path.display()));
                for line in graph.listing {
                    reporter.info(line);
                }
            }
            // 出力できなくてもパイプラインは止めない
            Err(e) => reporter.warn(e.0),
        }
        Ok(PassOutcome::Unmodified)
    }
}
