use crate::checkpoint::{self, TreeSnapshot};
use crate::compile::build;
use crate::compile_expr::parse_expression;
use crate::error::{CheckpointError, CompileError, ConfigError, EngineError, SetupError};
use crate::ops::{cs, elem, ts, Domain, OperatorRegistry};
use crate::plan::{BuildManifest, NodeKind, TreePlan};
use crate::state::{NodeState, RuntimeState};
use crate::types::{DayPhase, FieldSource, InitArgs, InputFieldCatalog};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone)]
struct CompiledTree {
    /// Canonical form, as produced by `to_string`.
    expression: String,
    plan: TreePlan,
    manifest: BuildManifest,
    runtime: RuntimeState,
}

impl CompiledTree {
    fn compile(expression: &str, nstock: usize) -> Result<Self, CompileError> {
        let ast = parse_expression(expression)?;
        let (plan, manifest) = build(&ast)?;
        let runtime = RuntimeState::from_plan(&plan, nstock);
        Ok(Self {
            expression: plan.render(plan.root),
            plan,
            manifest,
            runtime,
        })
    }

    fn root_output(&self) -> &[f64] {
        self.runtime.node_output(self.plan.root)
    }
}

/// One compiled factor expression evaluated batch by batch across trading days.
#[derive(Debug, Clone)]
pub struct FactorTree {
    init_args: InitArgs,
    compiled: Option<CompiledTree>,
    phase: DayPhase,
    current_day_index: u64,
    current_batch_in_day: u64,
}

impl FactorTree {
    /// Empty tree for `init_args`; both dimensions must be positive.
    pub fn new(init_args: InitArgs) -> Result<Self, ConfigError> {
        init_args.validate()?;
        Ok(Self {
            init_args,
            compiled: None,
            phase: DayPhase::Idle,
            current_day_index: 0,
            current_batch_in_day: 0,
        })
    }

    pub fn with_expression(expression: &str, init_args: InitArgs) -> Result<Self, SetupError> {
        let mut tree = Self::new(init_args)?;
        tree.create_tree(expression)?;
        Ok(tree)
    }

    /// Compiles `expression` and installs it, discarding any previous tree and
    /// all of its state. On error the current tree is left untouched.
    pub fn create_tree(&mut self, expression: &str) -> Result<(), CompileError> {
        let compiled = CompiledTree::compile(expression, self.init_args.nstock)?;
        debug!(
            expression = %compiled.expression,
            nstock = self.init_args.nstock,
            "factor tree created"
        );
        self.install(compiled);
        Ok(())
    }

    fn install(&mut self, compiled: CompiledTree) {
        self.compiled = Some(compiled);
        self.phase = DayPhase::Idle;
        self.current_day_index = 0;
        self.current_batch_in_day = 0;
    }

    /// Canonical text of `expression` without building a tree around it.
    pub fn normalize_expression(expression: &str) -> Result<String, CompileError> {
        let ast = parse_expression(expression)?;
        let (plan, _) = build(&ast)?;
        Ok(plan.render(plan.root))
    }

    /// Checks every referenced field against `catalog` ahead of the first batch.
    pub fn bind_catalog(&self, catalog: &InputFieldCatalog) -> Result<(), EngineError> {
        let compiled = self.compiled.as_ref().ok_or(EngineError::NoTree)?;
        for field in &compiled.plan.fields {
            if !catalog.contains(field) {
                return Err(EngineError::UnboundField {
                    field: field.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn on_day_begin(&mut self) -> Result<(), EngineError> {
        let compiled = self.compiled.as_mut().ok_or(EngineError::NoTree)?;
        if self.phase == DayPhase::DayOpen {
            return Err(EngineError::DayAlreadyOpen {
                day_index: self.current_day_index,
            });
        }
        compiled.runtime.begin_day();
        self.current_day_index += 1;
        self.current_batch_in_day = 0;
        self.phase = DayPhase::DayOpen;
        debug!(day_index = self.current_day_index, "day opened");
        Ok(())
    }

    pub fn on_day_end(&mut self) -> Result<(), EngineError> {
        let compiled = self.compiled.as_mut().ok_or(EngineError::NoTree)?;
        if self.phase != DayPhase::DayOpen {
            return Err(EngineError::DayNotOpen);
        }
        self.phase = DayPhase::DayClosing;
        if self.current_batch_in_day == 0 {
            warn!(
                day_index = self.current_day_index,
                "day closed without batches, windows not rolled"
            );
        } else {
            compiled.runtime.close_day();
        }
        self.phase = DayPhase::Idle;
        debug!(
            day_index = self.current_day_index,
            batches = self.current_batch_in_day,
            "day closed"
        );
        Ok(())
    }

    /// Evaluates one batch and returns the root output, one value per instrument.
    ///
    /// All fields are validated before any state changes, so a failing call
    /// leaves the tree exactly as it was.
    pub fn update(&mut self, fields: &impl FieldSource) -> Result<Vec<f64>, EngineError> {
        let compiled = self.compiled.as_mut().ok_or(EngineError::NoTree)?;
        if self.phase != DayPhase::DayOpen {
            return Err(EngineError::DayNotOpen);
        }
        let nstock = self.init_args.nstock;
        let mut inputs = Vec::with_capacity(compiled.plan.fields.len());
        for name in &compiled.plan.fields {
            let values = fields.field(name).ok_or_else(|| EngineError::MissingField {
                field: name.clone(),
            })?;
            if values.len() != nstock {
                return Err(EngineError::FieldLengthMismatch {
                    field: name.clone(),
                    expected: nstock,
                    actual: values.len(),
                });
            }
            inputs.push(values);
        }

        if self.current_batch_in_day >= self.init_args.batch_per_day as u64 {
            warn!(
                day_index = self.current_day_index,
                batch = self.current_batch_in_day + 1,
                batch_per_day = self.init_args.batch_per_day,
                "more batches than configured for this day"
            );
        }

        evaluate(&compiled.plan, &mut compiled.runtime, &inputs);
        self.current_batch_in_day += 1;
        trace!(
            day_index = self.current_day_index,
            batch = self.current_batch_in_day,
            "batch evaluated"
        );
        Ok(compiled.root_output().to_vec())
    }

    /// Root output of the most recent batch; NaN before the first one.
    pub fn output(&self) -> Option<&[f64]> {
        self.compiled.as_ref().map(CompiledTree::root_output)
    }

    pub fn phase(&self) -> DayPhase {
        self.phase
    }

    pub fn current_day_index(&self) -> u64 {
        self.current_day_index
    }

    pub fn current_batch_in_day(&self) -> u64 {
        self.current_batch_in_day
    }

    pub fn init_args(&self) -> InitArgs {
        self.init_args
    }

    pub fn manifest(&self) -> Option<&BuildManifest> {
        self.compiled.as_ref().map(|c| &c.manifest)
    }

    /// Input fields the tree reads, in first-reference order.
    pub fn referenced_fields(&self) -> &[String] {
        self.compiled
            .as_ref()
            .map(|c| c.plan.fields.as_slice())
            .unwrap_or(&[])
    }

    pub fn checkpoint_bytes(&self) -> Result<Vec<u8>, CheckpointError> {
        let compiled = self
            .compiled
            .as_ref()
            .ok_or_else(|| CheckpointError::incompatible("no tree to snapshot"))?;
        let snapshot = TreeSnapshot {
            expression: compiled.expression.clone(),
            nstock: self.init_args.nstock as u64,
            batch_per_day: self.init_args.batch_per_day as u64,
            day_index: self.current_day_index,
            batch_in_day: self.current_batch_in_day,
            phase: self.phase.tag(),
            nodes: TreeSnapshot::capture_nodes(&compiled.runtime),
        };
        checkpoint::encode(&snapshot)
    }

    /// Replaces all mutable state from a snapshot. Nothing changes unless the
    /// whole snapshot decodes and matches this tree.
    pub fn restore_checkpoint_bytes(&mut self, bytes: &[u8]) -> Result<(), CheckpointError> {
        let snapshot = checkpoint::decode(bytes)?;
        let stored_args = snapshot.init_args()?;
        if stored_args != self.init_args {
            return Err(CheckpointError::incompatible(format!(
                "checkpoint init args {:?}, tree has {:?}",
                stored_args, self.init_args
            )));
        }
        let phase = snapshot.phase()?;

        let mut fresh = None;
        let plan = match &self.compiled {
            Some(compiled) => {
                if compiled.expression != snapshot.expression {
                    return Err(CheckpointError::incompatible(format!(
                        "checkpoint expression `{}`, tree has `{}`",
                        snapshot.expression, compiled.expression
                    )));
                }
                &compiled.plan
            }
            None => {
                let compiled = CompiledTree::compile(&snapshot.expression, self.init_args.nstock)
                    .map_err(|err| {
                        CheckpointError::corrupt(format!("stored expression does not compile: {err}"))
                    })?;
                &fresh.insert(compiled).plan
            }
        };
        let runtime = snapshot.restore_runtime(plan, self.init_args.nstock)?;

        match fresh {
            Some(mut compiled) => {
                compiled.runtime = runtime;
                self.compiled = Some(compiled);
            }
            None => {
                if let Some(compiled) = self.compiled.as_mut() {
                    compiled.runtime = runtime;
                }
            }
        }
        self.phase = phase;
        self.current_day_index = snapshot.day_index;
        self.current_batch_in_day = snapshot.batch_in_day;
        Ok(())
    }

    pub fn save_checkpoint(&self, path: impl AsRef<Path>) -> Result<(), CheckpointError> {
        let path = path.as_ref();
        let bytes = self.checkpoint_bytes()?;
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        info!(path = %path.display(), bytes = bytes.len(), "checkpoint saved");
        Ok(())
    }

    pub fn load_checkpoint(&mut self, path: impl AsRef<Path>) -> Result<(), CheckpointError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        self.restore_checkpoint_bytes(&bytes)?;
        info!(
            path = %path.display(),
            bytes = bytes.len(),
            day_index = self.current_day_index,
            "checkpoint loaded"
        );
        Ok(())
    }
}

impl fmt::Display for FactorTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.compiled {
            Some(compiled) => f.write_str(&compiled.expression),
            None => Ok(()),
        }
    }
}

#[inline]
fn node_slice(outputs: &[f64], node_id: usize, nstock: usize) -> &[f64] {
    let start = node_id * nstock;
    &outputs[start..start + nstock]
}

/// Single pass over the node table in stored (topological) order.
///
/// The k-th field node reads `inputs[k]`, which follows `plan.fields`.
fn evaluate(plan: &TreePlan, runtime: &mut RuntimeState, inputs: &[&[f64]]) {
    let nstock = runtime.nstock;
    let RuntimeState {
        outputs,
        node_states,
        scratch,
        ..
    } = runtime;
    let mut field_cursor = 0usize;

    for node in &plan.nodes {
        let (before, rest) = outputs.split_at_mut(node.node_id * nstock);
        let out = &mut rest[..nstock];
        match &node.kind {
            NodeKind::Field(_) => {
                out.copy_from_slice(inputs[field_cursor]);
                field_cursor += 1;
            }
            NodeKind::Literal(value) => out.fill(*value),
            NodeKind::Op { op, param } => {
                let Some(meta) = OperatorRegistry::get_by_op(*op) else {
                    out.fill(f64::NAN);
                    continue;
                };
                let x = node_slice(before, node.children[0], nstock);
                let y = node
                    .children
                    .get(1)
                    .map(|child| node_slice(before, *child, nstock));
                match (meta.domain, &mut node_states[node.node_id], y) {
                    (Domain::Elem, _, None) => elem::eval_unary(*op, x, out),
                    (Domain::Elem, _, Some(y)) => elem::eval_binary(*op, x, y, out),
                    (Domain::Cs, _, _) => cs::eval(*op, x, out, scratch),
                    (Domain::Ts, NodeState::Window(state), _) => {
                        ts::eval_window(*op, *param, state, x, out, scratch)
                    }
                    (Domain::Ts, NodeState::PairWindow(state), Some(y)) => ts::eval_pair(
                        *op,
                        param.window().unwrap_or(0),
                        state,
                        x,
                        y,
                        out,
                        scratch,
                    ),
                    (Domain::Intraday, NodeState::Intraday(moments), _) => {
                        ts::eval_intraday(*op, moments, x, out)
                    }
                    (Domain::Intraday, NodeState::IntradayEma(emas), _) => {
                        ts::eval_intraday_ema(param.window().unwrap_or(1), emas, x, out)
                    }
                    _ => out.fill(f64::NAN),
                }
            }
        }
    }
}
