//! Semantic checker for BSQ
//!
//! One walk per subroutine: infers the types of compound expressions into
//! their `ty` slots and enforces the typing rules. Subroutine signatures
//! are snapshotted up front so recursive and mutually recursive calls check
//! against stable data while the current body is borrowed mutably. The walk
//! stops at the first violation.

use crate::ast::{
    identifier_type, DataType, Expr, ExprKind, Operation, Program, Statement, Variable,
};
use thiserror::Error;

/// Type checking errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TypeError {
    #[error("'{op}' operands have different types: {lhs} and {rhs}")]
    OperandTypeMismatch {
        op: Operation,
        lhs: DataType,
        rhs: DataType,
    },

    #[error("'{op}' does not apply to operands of type {ty}")]
    OperatorNotApplicable { op: Operation, ty: DataType },

    #[error("'{op}' operand has type {found}, but must be {expected}")]
    UnaryOperandMismatch {
        op: Operation,
        expected: DataType,
        found: DataType,
    },

    #[error("the condition of {construct} has type {found}, but must be BOOLEAN")]
    ConditionNotBoolean {
        construct: &'static str,
        found: DataType,
    },

    #[error("the FOR variable has type {0}, but must be NUMERIC")]
    ForVariableNotNumeric(DataType),

    #[error("the FOR {which} bound has type {found}, but must be NUMERIC")]
    ForBoundNotNumeric {
        which: &'static str,
        found: DataType,
    },

    #[error("the FOR step is zero")]
    ForZeroStep,

    #[error("the array size must be a positive integer")]
    BadDimSize,

    #[error("only variables of type ARRAY can be indexed")]
    NotAnArray,

    #[error("the index expression must be NUMERIC, not {0}")]
    IndexNotNumeric(DataType),

    #[error("a variable of type {variable} is assigned an expression of type {value}")]
    AssignmentTypeMismatch { variable: DataType, value: DataType },

    #[error("subroutine Main must not take parameters")]
    MainWithParameters,

    #[error("subroutine {0} is not a function")]
    NotAFunction(String),

    #[error("expected {expected} arguments, got {found}")]
    ArityMismatch { expected: usize, found: usize },

    #[error("parameter {index} has type {expected}, but argument {index} has type {found}")]
    ArgumentTypeMismatch {
        index: usize,
        expected: DataType,
        found: DataType,
    },

    #[error("the INPUT target must be NUMERIC or TEXTUAL, not {0}")]
    InputTargetNotReadable(DataType),
}

/// Check result
pub type TypeResult<T> = Result<T, TypeError>;

/// Immutable view of a subroutine signature, taken before bodies are walked
struct Signature {
    name: String,
    param_types: Vec<DataType>,
    is_returning_value: bool,
}

/// Check the whole program, filling in inferred expression types
pub fn check(program: &mut Program) -> TypeResult<()> {
    let signatures: Vec<Signature> = program
        .subs
        .iter()
        .map(|s| Signature {
            name: s.name.clone(),
            param_types: s.params.iter().map(|p| identifier_type(p)).collect(),
            is_returning_value: s.is_returning_value,
        })
        .collect();

    for sub in &mut program.subs {
        if sub.name == "Main" && !sub.params.is_empty() {
            return Err(TypeError::MainWithParameters);
        }
        check_statement(&mut sub.body, &mut sub.locals, &signatures)?;
    }

    Ok(())
}

fn check_statement(
    statement: &mut Statement,
    locals: &mut Vec<Variable>,
    signatures: &[Signature],
) -> TypeResult<()> {
    match statement {
        Statement::Seq(items) => {
            for item in items {
                check_statement(item, locals, signatures)?;
            }
            Ok(())
        }

        Statement::Let { var, index, value } => {
            if let Some(index) = index {
                if locals[*var].ty != DataType::Array {
                    return Err(TypeError::NotAnArray);
                }
                check_expression(index, locals, signatures)?;
                if index.ty != DataType::Numeric {
                    return Err(TypeError::IndexNotNumeric(index.ty));
                }
                check_expression(value, locals, signatures)?;
                if value.ty != DataType::Numeric {
                    return Err(TypeError::AssignmentTypeMismatch {
                        variable: DataType::Numeric,
                        value: value.ty,
                    });
                }
                return Ok(());
            }

            check_expression(value, locals, signatures)?;
            if value.ty != locals[*var].ty {
                return Err(TypeError::AssignmentTypeMismatch {
                    variable: locals[*var].ty,
                    value: value.ty,
                });
            }
            Ok(())
        }

        Statement::Dim { var, size } => {
            if *size <= 0.0 || size.fract() != 0.0 {
                return Err(TypeError::BadDimSize);
            }
            locals[*var].ty = DataType::Array;
            locals[*var].array_size = *size as usize;
            Ok(())
        }

        Statement::Input { var, index, .. } => {
            if let Some(index) = index {
                if locals[*var].ty != DataType::Array {
                    return Err(TypeError::NotAnArray);
                }
                check_expression(index, locals, signatures)?;
                if index.ty != DataType::Numeric {
                    return Err(TypeError::IndexNotNumeric(index.ty));
                }
                return Ok(());
            }
            match locals[*var].ty {
                DataType::Numeric | DataType::Textual => Ok(()),
                other => Err(TypeError::InputTargetNotReadable(other)),
            }
        }

        Statement::Print(expression) => check_expression(expression, locals, signatures),

        Statement::If {
            cond,
            then,
            otherwise,
        } => {
            check_expression(cond, locals, signatures)?;
            if cond.ty != DataType::Boolean {
                return Err(TypeError::ConditionNotBoolean {
                    construct: "IF",
                    found: cond.ty,
                });
            }
            check_statement(then, locals, signatures)?;
            if let Some(otherwise) = otherwise {
                check_statement(otherwise, locals, signatures)?;
            }
            Ok(())
        }

        Statement::While { cond, body } => {
            check_expression(cond, locals, signatures)?;
            if cond.ty != DataType::Boolean {
                return Err(TypeError::ConditionNotBoolean {
                    construct: "WHILE",
                    found: cond.ty,
                });
            }
            check_statement(body, locals, signatures)
        }

        Statement::For {
            var,
            begin,
            end,
            step,
            body,
        } => {
            if locals[*var].ty != DataType::Numeric {
                return Err(TypeError::ForVariableNotNumeric(locals[*var].ty));
            }
            check_expression(begin, locals, signatures)?;
            if begin.ty != DataType::Numeric {
                return Err(TypeError::ForBoundNotNumeric {
                    which: "begin",
                    found: begin.ty,
                });
            }
            check_expression(end, locals, signatures)?;
            if end.ty != DataType::Numeric {
                return Err(TypeError::ForBoundNotNumeric {
                    which: "end",
                    found: end.ty,
                });
            }
            if *step == 0.0 {
                return Err(TypeError::ForZeroStep);
            }
            check_statement(body, locals, signatures)
        }

        Statement::Call(apply) => {
            // A procedure may be invoked here, so the returning-value
            // requirement of the shared apply check is waived.
            check_apply_arguments(apply, locals, signatures)?;
            apply.ty = identifier_type(&signatures[apply.callee].name);
            Ok(())
        }
    }
}

fn check_expression(
    expression: &mut Expr,
    locals: &mut Vec<Variable>,
    signatures: &[Signature],
) -> TypeResult<()> {
    match &mut expression.kind {
        ExprKind::Boolean(_) | ExprKind::Number(_) | ExprKind::Text(_) => Ok(()),

        ExprKind::Variable(var) => {
            expression.ty = locals[*var].ty;
            Ok(())
        }

        ExprKind::Item { array, index } => {
            if locals[*array].ty != DataType::Array {
                return Err(TypeError::NotAnArray);
            }
            check_expression(index, locals, signatures)?;
            if index.ty != DataType::Numeric {
                return Err(TypeError::IndexNotNumeric(index.ty));
            }
            expression.ty = DataType::Numeric;
            Ok(())
        }

        ExprKind::Unary { op, operand } => {
            check_expression(operand, locals, signatures)?;
            let ty = match op {
                Operation::Not => DataType::Boolean,
                _ => DataType::Numeric,
            };
            if operand.ty != ty {
                return Err(TypeError::UnaryOperandMismatch {
                    op: *op,
                    expected: ty,
                    found: operand.ty,
                });
            }
            expression.ty = ty;
            Ok(())
        }

        ExprKind::Binary { op, lhs, rhs } => {
            check_expression(lhs, locals, signatures)?;
            check_expression(rhs, locals, signatures)?;

            if lhs.ty != rhs.ty {
                return Err(TypeError::OperandTypeMismatch {
                    op: *op,
                    lhs: lhs.ty,
                    rhs: rhs.ty,
                });
            }

            expression.ty = match lhs.ty {
                DataType::Boolean => {
                    let is_allowed = matches!(
                        op,
                        Operation::And | Operation::Or | Operation::Eq | Operation::Ne
                    );
                    if !is_allowed {
                        return Err(TypeError::OperatorNotApplicable {
                            op: *op,
                            ty: DataType::Boolean,
                        });
                    }
                    DataType::Boolean
                }
                DataType::Numeric => {
                    if matches!(op, Operation::Conc | Operation::And | Operation::Or) {
                        return Err(TypeError::OperatorNotApplicable {
                            op: *op,
                            ty: DataType::Numeric,
                        });
                    }
                    if op.is_comparison() {
                        DataType::Boolean
                    } else {
                        DataType::Numeric
                    }
                }
                DataType::Textual => {
                    if *op == Operation::Conc {
                        DataType::Textual
                    } else if op.is_comparison() {
                        DataType::Boolean
                    } else {
                        return Err(TypeError::OperatorNotApplicable {
                            op: *op,
                            ty: DataType::Textual,
                        });
                    }
                }
                other => {
                    return Err(TypeError::OperatorNotApplicable { op: *op, ty: other });
                }
            };
            Ok(())
        }

        ExprKind::Apply(apply) => {
            let signature = &signatures[apply.callee];
            if !signature.is_returning_value {
                return Err(TypeError::NotAFunction(signature.name.clone()));
            }
            check_apply_arguments(apply, locals, signatures)?;
            apply.ty = identifier_type(&signatures[apply.callee].name);
            expression.ty = apply.ty;
            Ok(())
        }
    }
}

/// Arity and per-argument type agreement, shared by `Apply` and `CALL`
fn check_apply_arguments(
    apply: &mut crate::ast::Apply,
    locals: &mut Vec<Variable>,
    signatures: &[Signature],
) -> TypeResult<()> {
    let signature = &signatures[apply.callee];

    if signature.param_types.len() != apply.args.len() {
        return Err(TypeError::ArityMismatch {
            expected: signature.param_types.len(),
            found: apply.args.len(),
        });
    }

    for (i, argument) in apply.args.iter_mut().enumerate() {
        check_expression(argument, locals, signatures)?;
        let expected = signatures[apply.callee].param_types[i];
        if argument.ty != expected {
            return Err(TypeError::ArgumentTypeMismatch {
                index: i + 1,
                expected,
                found: argument.ty,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    fn checked(source: &str) -> Program {
        let mut program = parser::parse(source, "test.bas").expect("program should parse");
        check(&mut program).expect("program should type check");
        program
    }

    fn check_err(source: &str) -> TypeError {
        let mut program = parser::parse(source, "test.bas").expect("program should parse");
        check(&mut program).expect_err("program should not type check")
    }

    #[test]
    fn test_text_plus_number_is_an_operand_mismatch() {
        let err = check_err("SUB Main\n  LET X = \"abc\" + 1\nEND SUB\n");
        assert_eq!(
            err,
            TypeError::OperandTypeMismatch {
                op: Operation::Add,
                lhs: DataType::Textual,
                rhs: DataType::Numeric,
            }
        );
    }

    #[test]
    fn test_if_condition_must_be_boolean() {
        let err = check_err("SUB Main\n  IF 1 + 2 THEN\n    PRINT 1\n  END IF\nEND SUB\n");
        assert_eq!(
            err,
            TypeError::ConditionNotBoolean {
                construct: "IF",
                found: DataType::Numeric,
            }
        );
    }

    #[test]
    fn test_while_condition_must_be_boolean() {
        let err = check_err("SUB Main\n  WHILE 1\n    PRINT 1\n  END WHILE\nEND SUB\n");
        assert_eq!(
            err,
            TypeError::ConditionNotBoolean {
                construct: "WHILE",
                found: DataType::Numeric,
            }
        );
    }

    #[test]
    fn test_for_variable_must_be_numeric() {
        let err = check_err("SUB Main\n  FOR I$ = 1 TO 3\n    PRINT 1\n  END FOR\nEND SUB\n");
        assert_eq!(err, TypeError::ForVariableNotNumeric(DataType::Textual));
    }

    #[test]
    fn test_for_step_must_not_be_zero() {
        let err = check_err("SUB Main\n  FOR I = 1 TO 3 STEP 0\n    PRINT I\n  END FOR\nEND SUB\n");
        assert_eq!(err, TypeError::ForZeroStep);
    }

    #[test]
    fn test_dim_size_must_be_a_positive_integer() {
        assert_eq!(
            check_err("SUB Main\n  DIM A(0)\nEND SUB\n"),
            TypeError::BadDimSize
        );
        assert_eq!(
            check_err("SUB Main\n  DIM A(2.5)\nEND SUB\n"),
            TypeError::BadDimSize
        );
    }

    #[test]
    fn test_dim_grants_the_array_type() {
        let program = checked("SUB Main\n  DIM A(3)\n  LET A(1) = 10\nEND SUB\n");
        let main = &program.subs[0];
        let a = main.find_local("A").unwrap();
        assert_eq!(main.locals[a].ty, DataType::Array);
        assert_eq!(main.locals[a].array_size, 3);
    }

    #[test]
    fn test_indexing_requires_an_array() {
        let err = check_err("SUB Main\n  LET X = 1\n  LET X(1) = 2\nEND SUB\n");
        assert_eq!(err, TypeError::NotAnArray);
    }

    #[test]
    fn test_index_must_be_numeric() {
        let err = check_err("SUB Main\n  DIM A(3)\n  LET A(TRUE) = 1\nEND SUB\n");
        assert_eq!(err, TypeError::IndexNotNumeric(DataType::Boolean));
    }

    #[test]
    fn test_assignment_type_mismatch() {
        let err = check_err("SUB Main\n  LET X = \"abc\"\nEND SUB\n");
        assert_eq!(
            err,
            TypeError::AssignmentTypeMismatch {
                variable: DataType::Numeric,
                value: DataType::Textual,
            }
        );
    }

    #[test]
    fn test_main_must_not_take_parameters() {
        let err = check_err("SUB Main(x)\n  PRINT x\nEND SUB\n");
        assert_eq!(err, TypeError::MainWithParameters);
    }

    #[test]
    fn test_apply_requires_a_function() {
        let source = "\
SUB Main
  PRINT Noise(1)
END SUB
SUB Noise(n)
  PRINT n
END SUB
";
        assert_eq!(check_err(source), TypeError::NotAFunction("Noise".into()));
    }

    #[test]
    fn test_call_accepts_a_procedure() {
        let source = "\
SUB Main
  CALL Noise 1
END SUB
SUB Noise(n)
  PRINT n
END SUB
";
        checked(source);
    }

    #[test]
    fn test_arity_mismatch() {
        let source = "\
SUB Main
  CALL Noise 1, 2
END SUB
SUB Noise(n)
  PRINT n
END SUB
";
        assert_eq!(
            check_err(source),
            TypeError::ArityMismatch {
                expected: 1,
                found: 2,
            }
        );
    }

    #[test]
    fn test_argument_type_mismatch() {
        let source = "\
SUB Main
  CALL Greet 5
END SUB
SUB Greet(m$)
  PRINT m$
END SUB
";
        assert_eq!(
            check_err(source),
            TypeError::ArgumentTypeMismatch {
                index: 1,
                expected: DataType::Textual,
                found: DataType::Numeric,
            }
        );
    }

    #[test]
    fn test_compound_arguments_are_inferred_before_comparison() {
        let source = "\
SUB Main
  PRINT Twice(1 + 2)
END SUB
SUB Twice(n)
  LET Twice = 2 * n
END SUB
";
        checked(source);
    }

    #[test]
    fn test_not_requires_and_yields_boolean() {
        let program = checked("SUB Main\n  LET B? = NOT TRUE\nEND SUB\n");
        let body = match &program.subs[0].body {
            Statement::Seq(items) => items,
            _ => unreachable!(),
        };
        match &body[0] {
            Statement::Let { value, .. } => assert_eq!(value.ty, DataType::Boolean),
            other => panic!("expected let, got {:?}", other),
        }

        assert_eq!(
            check_err("SUB Main\n  LET B? = NOT 1\nEND SUB\n"),
            TypeError::UnaryOperandMismatch {
                op: Operation::Not,
                expected: DataType::Boolean,
                found: DataType::Numeric,
            }
        );
    }

    #[test]
    fn test_negation_requires_numeric() {
        assert_eq!(
            check_err("SUB Main\n  LET X = -TRUE\nEND SUB\n"),
            TypeError::UnaryOperandMismatch {
                op: Operation::Sub,
                expected: DataType::Numeric,
                found: DataType::Boolean,
            }
        );
    }

    #[test]
    fn test_textual_operators() {
        // Concatenation yields text, comparison yields boolean
        checked("SUB Main\n  LET A$ = \"x\" & \"y\"\n  LET B? = \"x\" < \"y\"\nEND SUB\n");

        assert_eq!(
            check_err("SUB Main\n  LET A$ = \"x\" * \"y\"\nEND SUB\n"),
            TypeError::OperatorNotApplicable {
                op: Operation::Mul,
                ty: DataType::Textual,
            }
        );
    }

    #[test]
    fn test_numeric_concatenation_is_rejected() {
        assert_eq!(
            check_err("SUB Main\n  LET X = 1 & 2\nEND SUB\n"),
            TypeError::OperatorNotApplicable {
                op: Operation::Conc,
                ty: DataType::Numeric,
            }
        );
    }

    #[test]
    fn test_boolean_operators() {
        checked("SUB Main\n  LET B? = TRUE AND FALSE OR TRUE = FALSE\nEND SUB\n");

        assert_eq!(
            check_err("SUB Main\n  LET B? = TRUE < FALSE\nEND SUB\n"),
            TypeError::OperatorNotApplicable {
                op: Operation::Lt,
                ty: DataType::Boolean,
            }
        );
    }

    #[test]
    fn test_input_into_boolean_is_rejected() {
        assert_eq!(
            check_err("SUB Main\n  INPUT B?\nEND SUB\n"),
            TypeError::InputTargetNotReadable(DataType::Boolean)
        );
    }

    #[test]
    fn test_checking_is_idempotent() {
        let source = "\
SUB Main
  DIM A(3)
  LET A(1) = 10
  LET S$ = \"x\" & \"y\"
  PRINT Even(4)
END SUB
SUB Even?(n)
  IF n = 0 THEN
    LET Even? = TRUE
  ELSE
    LET Even? = NOT Even(n - 2)
  END IF
END SUB
";
        let mut program = parser::parse(source, "test.bas").unwrap();
        check(&mut program).expect("first pass");
        check(&mut program).expect("second pass produces no diagnostic");
    }
}
