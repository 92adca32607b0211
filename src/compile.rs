use crate::compile_expr::ExprAst;
use crate::error::CompileError;
use crate::ops::{OpCode, OperatorRegistry, StateSpec};
use crate::plan::{BuildManifest, LogicalParam, NodeKind, TreeNode, TreePlan};
use std::collections::HashMap;
use std::time::Instant;

/// Structural identity of a node. Literals are keyed by bit pattern so that
/// signatures stay hashable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum NodeSignature {
    Field(String),
    Literal(u64),
    Op {
        op: OpCode,
        children: Vec<usize>,
        param: LogicalParam,
    },
}

#[derive(Debug, Default)]
struct LowerStats {
    op_count: usize,
    stateful_count: usize,
    cse_hit_count: usize,
}

struct LowerCtx<'a> {
    nodes: &'a mut Vec<TreeNode>,
    fields: &'a mut Vec<String>,
    node_by_sig: HashMap<NodeSignature, usize>,
    lower_stats: LowerStats,
}

impl<'a> LowerCtx<'a> {
    fn lower(&mut self, ast: &ExprAst) -> Result<usize, CompileError> {
        match ast {
            ExprAst::Field(name) => {
                let sig = NodeSignature::Field(name.clone());
                Ok(self.intern(sig, || NodeKind::Field(name.clone()), Vec::new()))
            }
            ExprAst::Literal(value) => {
                // -0.0 and 0.0 share one node.
                let value = if *value == 0.0 { 0.0 } else { *value };
                let sig = NodeSignature::Literal(value.to_bits());
                Ok(self.intern(sig, || NodeKind::Literal(value), Vec::new()))
            }
            ExprAst::Call {
                op,
                children,
                params,
            } => {
                let meta = OperatorRegistry::get_by_op(*op).ok_or_else(|| {
                    CompileError::UnknownOperator {
                        name: format!("{op:?}"),
                    }
                })?;
                let param = meta.param_spec.build(meta.name, params)?;
                let mut child_ids = Vec::with_capacity(children.len());
                for child in children {
                    child_ids.push(self.lower(child)?);
                }
                let stateful = !matches!(meta.state_spec, StateSpec::Stateless);
                let sig = NodeSignature::Op {
                    op: *op,
                    children: child_ids.clone(),
                    param,
                };
                let before = self.nodes.len();
                let node_id = self.intern(sig, || NodeKind::Op { op: *op, param }, child_ids);
                if self.nodes.len() > before {
                    self.lower_stats.op_count += 1;
                    if stateful {
                        self.lower_stats.stateful_count += 1;
                    }
                }
                Ok(node_id)
            }
        }
    }

    fn intern(
        &mut self,
        sig: NodeSignature,
        kind: impl FnOnce() -> NodeKind,
        children: Vec<usize>,
    ) -> usize {
        if let Some(existing) = self.node_by_sig.get(&sig).copied() {
            self.lower_stats.cse_hit_count += 1;
            return existing;
        }
        let node_id = self.nodes.len();
        debug_assert!(children.iter().all(|child| *child < node_id));
        let kind = kind();
        if let NodeKind::Field(name) = &kind {
            self.fields.push(name.clone());
        }
        self.nodes.push(TreeNode {
            node_id,
            kind,
            children,
        });
        self.node_by_sig.insert(sig, node_id);
        node_id
    }
}

/// Lowers a parsed expression into a deduplicated node table.
///
/// Post-order traversal guarantees every child precedes its parents, so the
/// table order is directly usable as the evaluation order.
pub fn build(ast: &ExprAst) -> Result<(TreePlan, BuildManifest), CompileError> {
    let started_at = Instant::now();
    let mut nodes = Vec::new();
    let mut fields = Vec::new();
    let (root, stats) = {
        let mut ctx = LowerCtx {
            nodes: &mut nodes,
            fields: &mut fields,
            node_by_sig: HashMap::new(),
            lower_stats: LowerStats::default(),
        };
        let root = ctx.lower(ast)?;
        (root, ctx.lower_stats)
    };
    let plan = TreePlan {
        nodes,
        root,
        fields,
    };
    let manifest = BuildManifest {
        node_count: plan.nodes.len(),
        field_count: plan.fields.len(),
        op_count: stats.op_count,
        stateful_count: stats.stateful_count,
        cse_hit_count: stats.cse_hit_count,
        build_time_us: started_at.elapsed().as_micros() as u64,
    };
    tracing::debug!(target: "factor_tree::compile", "{}", manifest.summary_line());
    Ok((plan, manifest))
}
