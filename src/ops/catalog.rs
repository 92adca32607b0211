use crate::compile_expr::ExprAst;
use crate::error::CompileError;
use crate::ops::{CallArg, CompileArgSpec, DayFold, Domain, OpCode};
use crate::plan::{LogicalParam, MAX_WINDOW};
use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelParamSpec {
    /// Operator does not take a static parameter.
    None,
    /// Operator expects one `window` param.
    Window,
    /// Operator expects one `lag` param.
    Lag,
}

impl KernelParamSpec {
    /// Validates raw numeric params from the AST into a typed parameter.
    pub fn build(self, op_name: &'static str, raw: &[f64]) -> Result<LogicalParam, CompileError> {
        match self {
            Self::None => {
                if raw.is_empty() {
                    Ok(LogicalParam::None)
                } else {
                    Err(CompileError::InvalidParameter {
                        op: op_name,
                        param: "param",
                        value: format!("{raw:?}"),
                    })
                }
            }
            Self::Window => Ok(LogicalParam::Window(positive_days(op_name, "window", raw)?)),
            Self::Lag => Ok(LogicalParam::Lag(positive_days(op_name, "lag", raw)?)),
        }
    }
}

fn positive_days(
    op_name: &'static str,
    param: &'static str,
    raw: &[f64],
) -> Result<usize, CompileError> {
    let invalid = |value: String| CompileError::InvalidParameter {
        op: op_name,
        param,
        value,
    };
    let [value] = raw else {
        return Err(invalid(format!("{raw:?}")));
    };
    let value = *value;
    if !value.is_finite() || value.fract() != 0.0 || value < 1.0 || value > MAX_WINDOW as f64 {
        return Err(invalid(value.to_string()));
    }
    Ok(value as usize)
}

/// Shape of the per-node runtime state an operator needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateSpec {
    Stateless,
    /// One day accumulator and one closed-day ring per instrument.
    Window,
    /// Two accumulators and two rings per instrument.
    PairWindow,
    /// Running moments since the day began.
    Intraday,
    /// Running exponential average since the day began.
    IntradayEma,
}

#[derive(Debug, Clone, Copy)]
pub struct OpMeta {
    /// DSL operator name, used at parse time and when rendering.
    pub name: &'static str,
    /// Internal opcode stored in the node table.
    pub op: OpCode,
    /// Domain tag selecting the evaluation path.
    pub domain: Domain,
    /// Operand count and static parameter shape.
    pub arg_spec: CompileArgSpec,
    /// Static param type built from the raw AST params.
    pub param_spec: KernelParamSpec,
    /// Runtime state shape allocated at build time.
    pub state_spec: StateSpec,
    /// Current-day running value rule for window operators.
    pub day_fold: Option<DayFold>,
    /// Whether numeric literals may appear in operand positions.
    pub allow_scalar_literals: bool,
}

impl OpMeta {
    /// Resolves parsed call arguments into an AST call node.
    pub fn parse_call(&self, args: Vec<CallArg>, expr: &str) -> Result<ExprAst, CompileError> {
        let parsed = self.arg_spec.parse(self.name, args, expr)?;
        if !self.allow_scalar_literals {
            if let Some(ExprAst::Literal(value)) = parsed
                .children
                .iter()
                .find(|child| matches!(child, ExprAst::Literal(_)))
            {
                return Err(CompileError::syntax(
                    expr,
                    format!(
                        "scalar literal `{value}` is not allowed as an operand of `{}`",
                        self.name
                    ),
                ));
            }
        }
        Ok(ExprAst::Call {
            op: self.op,
            children: parsed.children,
            params: parsed.params,
        })
    }
}

pub struct OperatorRegistry;

impl OperatorRegistry {
    pub fn get(name: &str) -> Option<&'static OpMeta> {
        let index = REGISTRY_INDEX.get_or_init(build_registry_index);
        index.by_name.get(name).map(|idx| &OP_METAS[*idx])
    }

    pub fn get_by_op(op: OpCode) -> Option<&'static OpMeta> {
        let index = REGISTRY_INDEX.get_or_init(build_registry_index);
        let idx = index.by_op[op.as_usize()];
        if idx == MISSING_IDX {
            None
        } else {
            Some(&OP_METAS[idx])
        }
    }

    pub fn all() -> &'static [OpMeta] {
        &OP_METAS
    }
}

struct RegistryIndex {
    by_name: HashMap<&'static str, usize>,
    by_op: [usize; OP_CODE_COUNT],
}

static REGISTRY_INDEX: OnceLock<RegistryIndex> = OnceLock::new();
const MISSING_IDX: usize = usize::MAX;
const OP_CODE_COUNT: usize = OpCode::COUNT;

fn build_registry_index() -> RegistryIndex {
    let mut by_name = HashMap::with_capacity(OP_METAS.len());
    let mut by_op = [MISSING_IDX; OP_CODE_COUNT];

    for (idx, meta) in OP_METAS.iter().enumerate() {
        validate_meta(meta);
        if by_name.insert(meta.name, idx).is_some() {
            panic!("duplicate operator name in registry: {}", meta.name);
        }
        let op_slot = meta.op.as_usize();
        if by_op[op_slot] != MISSING_IDX {
            panic!("duplicate opcode in registry: {:?}", meta.op);
        }
        by_op[op_slot] = idx;
    }

    for (op_slot, idx) in by_op.iter().enumerate() {
        if *idx == MISSING_IDX {
            panic!("opcode slot not registered: {}", op_slot);
        }
    }

    RegistryIndex { by_name, by_op }
}

fn validate_meta(meta: &OpMeta) {
    let param_matches = match meta.arg_spec {
        CompileArgSpec::Operand | CompileArgSpec::TwoOperands => {
            matches!(meta.param_spec, KernelParamSpec::None)
        }
        CompileArgSpec::OperandWindow | CompileArgSpec::TwoOperandsWindow => {
            matches!(meta.param_spec, KernelParamSpec::Window)
        }
        CompileArgSpec::OperandLag => matches!(meta.param_spec, KernelParamSpec::Lag),
    };
    if !param_matches {
        panic!(
            "operator `{}` has incompatible arg_spec {:?} and param_spec {:?}",
            meta.name, meta.arg_spec, meta.param_spec
        );
    }

    let state_matches = match meta.domain {
        Domain::Elem | Domain::Cs => matches!(meta.state_spec, StateSpec::Stateless),
        Domain::Intraday => match meta.arg_spec {
            CompileArgSpec::Operand => matches!(meta.state_spec, StateSpec::Intraday),
            CompileArgSpec::OperandWindow => matches!(meta.state_spec, StateSpec::IntradayEma),
            _ => false,
        },
        Domain::Ts => match meta.arg_spec {
            CompileArgSpec::TwoOperandsWindow => matches!(meta.state_spec, StateSpec::PairWindow),
            CompileArgSpec::OperandWindow | CompileArgSpec::OperandLag => {
                matches!(meta.state_spec, StateSpec::Window)
            }
            _ => false,
        },
    };
    if !state_matches {
        panic!(
            "operator `{}` has incompatible domain {:?} and state_spec {:?}",
            meta.name, meta.domain, meta.state_spec
        );
    }

    if matches!(meta.domain, Domain::Ts) != meta.day_fold.is_some() {
        panic!(
            "operator `{}` must declare a day_fold exactly when it is a Ts operator",
            meta.name
        );
    }
    if meta.allow_scalar_literals && !matches!(meta.domain, Domain::Elem) {
        panic!(
            "operator `{}` allows scalar operands outside the Elem domain",
            meta.name
        );
    }
}

const fn elem_unary(name: &'static str, op: OpCode) -> OpMeta {
    OpMeta {
        name,
        op,
        domain: Domain::Elem,
        arg_spec: CompileArgSpec::Operand,
        param_spec: KernelParamSpec::None,
        state_spec: StateSpec::Stateless,
        day_fold: None,
        allow_scalar_literals: true,
    }
}

const fn elem_binary(name: &'static str, op: OpCode) -> OpMeta {
    OpMeta {
        name,
        op,
        domain: Domain::Elem,
        arg_spec: CompileArgSpec::TwoOperands,
        param_spec: KernelParamSpec::None,
        state_spec: StateSpec::Stateless,
        day_fold: None,
        allow_scalar_literals: true,
    }
}

const fn cs_unary(name: &'static str, op: OpCode) -> OpMeta {
    OpMeta {
        name,
        op,
        domain: Domain::Cs,
        arg_spec: CompileArgSpec::Operand,
        param_spec: KernelParamSpec::None,
        state_spec: StateSpec::Stateless,
        day_fold: None,
        allow_scalar_literals: false,
    }
}

const fn ts_window(name: &'static str, op: OpCode, fold: DayFold) -> OpMeta {
    OpMeta {
        name,
        op,
        domain: Domain::Ts,
        arg_spec: CompileArgSpec::OperandWindow,
        param_spec: KernelParamSpec::Window,
        state_spec: StateSpec::Window,
        day_fold: Some(fold),
        allow_scalar_literals: false,
    }
}

const fn ts_lag(name: &'static str, op: OpCode) -> OpMeta {
    OpMeta {
        name,
        op,
        domain: Domain::Ts,
        arg_spec: CompileArgSpec::OperandLag,
        param_spec: KernelParamSpec::Lag,
        state_spec: StateSpec::Window,
        day_fold: Some(DayFold::Last),
        allow_scalar_literals: false,
    }
}

const fn ts_pair_window(name: &'static str, op: OpCode) -> OpMeta {
    OpMeta {
        name,
        op,
        domain: Domain::Ts,
        arg_spec: CompileArgSpec::TwoOperandsWindow,
        param_spec: KernelParamSpec::Window,
        state_spec: StateSpec::PairWindow,
        day_fold: Some(DayFold::Mean),
        allow_scalar_literals: false,
    }
}

const fn intraday(name: &'static str, op: OpCode) -> OpMeta {
    OpMeta {
        name,
        op,
        domain: Domain::Intraday,
        arg_spec: CompileArgSpec::Operand,
        param_spec: KernelParamSpec::None,
        state_spec: StateSpec::Intraday,
        day_fold: None,
        allow_scalar_literals: false,
    }
}

const fn intraday_ema(name: &'static str, op: OpCode) -> OpMeta {
    OpMeta {
        name,
        op,
        domain: Domain::Intraday,
        arg_spec: CompileArgSpec::OperandWindow,
        param_spec: KernelParamSpec::Window,
        state_spec: StateSpec::IntradayEma,
        day_fold: None,
        allow_scalar_literals: false,
    }
}

const OP_METAS: [OpMeta; 42] = [
    elem_unary("abs", OpCode::ElemAbs),
    elem_unary("neg", OpCode::ElemNeg),
    elem_unary("sign", OpCode::ElemSign),
    elem_unary("sqrt", OpCode::ElemSqrt),
    elem_unary("log", OpCode::ElemLog),
    elem_unary("log1p", OpCode::ElemLog1p),
    elem_unary("exp", OpCode::ElemExp),
    elem_unary("relu", OpCode::ElemRelu),
    elem_unary("inv", OpCode::ElemInv),
    elem_unary("square", OpCode::ElemSquare),
    elem_binary("add", OpCode::ElemAdd),
    elem_binary("sub", OpCode::ElemSub),
    elem_binary("mul", OpCode::ElemMul),
    elem_binary("div", OpCode::ElemDiv),
    elem_binary("pow", OpCode::ElemPow),
    elem_binary("min", OpCode::ElemMin),
    elem_binary("max", OpCode::ElemMax),
    elem_binary("less", OpCode::ElemLess),
    elem_binary("greater", OpCode::ElemGreater),
    cs_unary("cs_rank", OpCode::CsRank),
    cs_unary("cs_zscore", OpCode::CsZscore),
    cs_unary("cs_demean", OpCode::CsDemean),
    cs_unary("cs_mean", OpCode::CsMean),
    cs_unary("cs_sum", OpCode::CsSum),
    cs_unary("cs_std", OpCode::CsStd),
    ts_window("ts_mean", OpCode::TsMean, DayFold::Mean),
    ts_window("ts_sum", OpCode::TsSum, DayFold::Mean),
    ts_window("ts_std", OpCode::TsStd, DayFold::Mean),
    ts_window("ts_zscore", OpCode::TsZscore, DayFold::Mean),
    ts_window("ts_ema", OpCode::TsEma, DayFold::Mean),
    ts_window("ts_rank", OpCode::TsRank, DayFold::Mean),
    ts_window("ts_max", OpCode::TsMax, DayFold::Max),
    ts_window("ts_min", OpCode::TsMin, DayFold::Min),
    ts_lag("ts_delay", OpCode::TsDelay),
    ts_lag("ts_diff", OpCode::TsDiff),
    ts_lag("ts_ret", OpCode::TsRet),
    ts_pair_window("ts_corr", OpCode::TsCorr),
    ts_pair_window("ts_cov", OpCode::TsCov),
    intraday("in_ts_mean", OpCode::InTsMean),
    intraday("in_ts_std", OpCode::InTsStd),
    intraday_ema("in_ts_ema", OpCode::InTsEma),
    intraday("in_ts_sum", OpCode::InTsSum),
];
