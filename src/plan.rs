use crate::compile_expr::normalize_number_token;
use crate::ops::{OpCode, OperatorRegistry};

/// Upper bound for `window` and `lag` parameters, in days.
pub const MAX_WINDOW: usize = 10_000;

/// Deepest operator nesting the parser accepts.
pub const MAX_EXPR_DEPTH: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalParam {
    None,
    Window(usize),
    Lag(usize),
}

impl LogicalParam {
    #[inline]
    pub const fn window(self) -> Option<usize> {
        match self {
            Self::Window(window) => Some(window),
            _ => None,
        }
    }

    #[inline]
    pub const fn lag(self) -> Option<usize> {
        match self {
            Self::Lag(lag) => Some(lag),
            _ => None,
        }
    }

    /// Number of closed days the node must remember. A window of `n` days
    /// covers the running day plus `n - 1` closed ones.
    #[inline]
    pub const fn history_len(self) -> usize {
        match self {
            Self::None => 0,
            Self::Window(n) => n.saturating_sub(1),
            Self::Lag(n) => n,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Field(String),
    Literal(f64),
    Op { op: OpCode, param: LogicalParam },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub node_id: usize,
    pub kind: NodeKind,
    /// Indices into the node table; always smaller than `node_id`.
    pub children: Vec<usize>,
}

/// Deduplicated node table in dependency-safe order.
#[derive(Debug, Clone, PartialEq)]
pub struct TreePlan {
    pub nodes: Vec<TreeNode>,
    pub root: usize,
    /// Distinct field names in first-reference order.
    pub fields: Vec<String>,
}

impl TreePlan {
    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Renders the sub-tree rooted at `node_id` back to canonical call form.
    pub fn render(&self, node_id: usize) -> String {
        let mut out = String::new();
        self.render_into(node_id, &mut out);
        out
    }

    fn render_into(&self, node_id: usize, out: &mut String) {
        let node = &self.nodes[node_id];
        match &node.kind {
            NodeKind::Field(name) => {
                out.push('@');
                out.push_str(name);
            }
            NodeKind::Literal(value) => out.push_str(&normalize_number_token(*value)),
            NodeKind::Op { op, param } => {
                let name = OperatorRegistry::get_by_op(*op)
                    .map(|meta| meta.name)
                    .unwrap_or("?");
                out.push_str(name);
                out.push('(');
                for (idx, child) in node.children.iter().enumerate() {
                    if idx > 0 {
                        out.push_str(", ");
                    }
                    self.render_into(*child, out);
                }
                if let LogicalParam::Window(n) | LogicalParam::Lag(n) = param {
                    out.push_str(", ");
                    out.push_str(&n.to_string());
                }
                out.push(')');
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildManifest {
    pub node_count: usize,
    pub field_count: usize,
    /// Operator nodes, shared ones counted once.
    pub op_count: usize,
    /// Windowed or intraday nodes carrying per-instrument state.
    pub stateful_count: usize,
    /// Common-subexpression hits from node signature lookup.
    pub cse_hit_count: usize,
    /// End-to-end build latency in microseconds.
    pub build_time_us: u64,
}

impl BuildManifest {
    #[inline]
    pub fn summary_line(&self) -> String {
        format!(
            "nodes={} fields={} ops={} stateful={} cse_hits={} build_us={}",
            self.node_count,
            self.field_count,
            self.op_count,
            self.stateful_count,
            self.cse_hit_count,
            self.build_time_us
        )
    }
}
