use crate::compile_expr::ExprAst;
use crate::error::CompileError;

/// One argument as written inside a call's parentheses.
#[derive(Debug, Clone, PartialEq)]
pub enum CallArg {
    Positional(ExprAst),
    Keyword { name: String, value: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCompileArgs {
    pub children: Vec<ExprAst>,
    pub params: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompileArgSpec {
    Operand,
    TwoOperands,
    OperandWindow,
    OperandLag,
    TwoOperandsWindow,
}

impl CompileArgSpec {
    #[inline]
    pub const fn arity(self) -> usize {
        match self {
            Self::Operand => 1,
            Self::TwoOperands => 2,
            Self::OperandWindow => 2,
            Self::OperandLag => 2,
            Self::TwoOperandsWindow => 3,
        }
    }

    #[inline]
    pub const fn operand_count(self) -> usize {
        match self {
            Self::Operand | Self::OperandWindow | Self::OperandLag => 1,
            Self::TwoOperands | Self::TwoOperandsWindow => 2,
        }
    }

    /// Keyword accepted for the trailing static parameter, if any.
    #[inline]
    pub const fn param_name(self) -> Option<&'static str> {
        match self {
            Self::Operand | Self::TwoOperands => None,
            Self::OperandWindow | Self::TwoOperandsWindow => Some("window"),
            Self::OperandLag => Some("lag"),
        }
    }

    pub fn parse(
        self,
        op_name: &str,
        args: Vec<CallArg>,
        expr: &str,
    ) -> Result<ParsedCompileArgs, CompileError> {
        if args.len() != self.arity() {
            return Err(CompileError::InvalidArity {
                name: op_name.to_string(),
                expected: self.arity(),
                actual: args.len(),
            });
        }
        let operand_count = self.operand_count();
        let mut children = Vec::with_capacity(operand_count);
        let mut params = Vec::with_capacity(self.arity() - operand_count);
        for (position, arg) in args.into_iter().enumerate() {
            if position < operand_count {
                children.push(parse_operand(arg, op_name, expr)?);
            } else {
                params.push(parse_param(self, arg, op_name, expr)?);
            }
        }
        Ok(ParsedCompileArgs { children, params })
    }
}

fn parse_operand(arg: CallArg, op_name: &str, expr: &str) -> Result<ExprAst, CompileError> {
    match arg {
        CallArg::Positional(ast) => Ok(ast),
        CallArg::Keyword { name, .. } => Err(CompileError::syntax(
            expr,
            format!("keyword `{name}` given where `{op_name}` expects an operand"),
        )),
    }
}

fn parse_param(
    spec: CompileArgSpec,
    arg: CallArg,
    op_name: &str,
    expr: &str,
) -> Result<f64, CompileError> {
    let expected = spec.param_name().unwrap_or("param");
    match arg {
        CallArg::Positional(ExprAst::Literal(value)) => Ok(value),
        CallArg::Positional(_) => Err(CompileError::syntax(
            expr,
            format!("`{op_name}` expects a numeric `{expected}`, got an operand"),
        )),
        CallArg::Keyword { name, value } => {
            if name == expected {
                Ok(value)
            } else {
                Err(CompileError::syntax(
                    expr,
                    format!("unknown keyword `{name}` for `{op_name}`, expected `{expected}`"),
                ))
            }
        }
    }
}
