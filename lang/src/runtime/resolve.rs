//! Token-to-formula resolution. This is not a grammar-driven parser:
//! whether a name denotes an operator is decided by looking it up in the
//! live scope graph, so resolution runs interleaved with evaluation, one
//! top-level formula at a time.

use crate::{
    runtime::{builtins::Builtin, Closure, NameLiteral, RunStack, RuntimeError, Value},
    syntax::tree::{Fixity, Token},
};

/// A resolved expression-tree node.
#[derive(Debug)]
pub enum Formula {
    /// An already-reduced value (constants, builtins, frozen bindings).
    Constant(Value),
    /// An assignment target (`:name`), pinned to its resolution scope.
    Name(NameLiteral),
    /// A name unbound at resolution time; re-resolved at evaluation.
    Unresolved(String),
    /// A function value, capturing the scope it was resolved in.
    ClosureRef(Closure),
    /// Terms joined by mid operators; `mid_ops[i]` sits between
    /// `terms[i]` and `terms[i + 1]`. Operator-less sequences come from
    /// multi-formula groups.
    Sequence {
        terms: Vec<Formula>,
        mid_ops: Vec<Closure>,
    },
    /// A core formula wrapped by prefix and suffix operator runs.
    Modified {
        prefix: Vec<Closure>,
        core: Box<Formula>,
        suffix: Vec<Closure>,
    },
    Call {
        callee: Box<Formula>,
        args: Vec<Formula>,
    },
    Void,
}

/// Resolve one formula starting at `index`: terms chained by mid
/// operators, ending at the first token that is neither.
pub fn next_formula(
    stack: &RunStack,
    tokens: &[Token],
    mut index: usize,
) -> Result<(usize, Formula), RuntimeError> {
    let mut terms = Vec::new();
    let mut mid_ops = Vec::new();

    while index < tokens.len() {
        let (next, term) = next_term(stack, tokens, index)?;
        index = next;
        terms.push(term);

        match next_mid_operator(stack, tokens, index) {
            Some((next, op)) => {
                index = next;
                mid_ops.push(op);
            }
            None => break,
        }
    }

    // A term/operator chain can only terminate on a non-operator, so a
    // trailing operator leaves the counts out of step.
    if terms.len().saturating_sub(1) != mid_ops.len() {
        return Err(RuntimeError::OperatorMismatch {
            terms: terms.len(),
            operators: mid_ops.len(),
        });
    }

    let formula = if mid_ops.is_empty() && terms.len() == 1 {
        terms.pop().unwrap()
    } else if terms.is_empty() {
        Formula::Void
    } else {
        Formula::Sequence { terms, mid_ops }
    };
    Ok((index, formula))
}

fn next_mid_operator(stack: &RunStack, tokens: &[Token], index: usize) -> Option<(usize, Closure)> {
    let name = match tokens.get(index) {
        Some(Token::Var(name)) => name,
        _ => return None,
    };
    match stack.lookup(name) {
        Some(Value::Function(closure)) if closure.fixity() == Fixity::Mid => {
            Some((index + 1, closure))
        }
        _ => None,
    }
}

/// One term: a maximal prefix-operator run, a core unit, a maximal
/// suffix-operator run. Delimiters not touching an operator run are
/// transparent.
fn next_term(
    stack: &RunStack,
    tokens: &[Token],
    index: usize,
) -> Result<(usize, Formula), RuntimeError> {
    let (index, prefix) = read_fix_operators(stack, tokens, index, Fixity::Prefix);

    if index >= tokens.len() {
        return Ok((index, trailing_operator(prefix)));
    }
    if let Token::Delimiter = tokens[index] {
        if prefix.is_empty() {
            return next_term(stack, tokens, index + 1);
        }
        return Ok((index, trailing_operator(prefix)));
    }

    let core = read_core(stack, &tokens[index])?;
    let (index, suffix) = read_fix_operators(stack, tokens, index + 1, Fixity::Suffix);

    if prefix.is_empty() && suffix.is_empty() {
        return Ok((index, core));
    }
    Ok((
        index,
        Formula::Modified {
            prefix,
            core: Box::new(core),
            suffix,
        },
    ))
}

// A prefix run cut short by a delimiter or the end of input degenerates
// to the last collected operator as a plain value.
fn trailing_operator(mut prefix: Vec<Closure>) -> Formula {
    match prefix.pop() {
        Some(op) => Formula::ClosureRef(op),
        None => Formula::Void,
    }
}

fn read_fix_operators(
    stack: &RunStack,
    tokens: &[Token],
    mut index: usize,
    fixity: Fixity,
) -> (usize, Vec<Closure>) {
    let mut operators = Vec::new();
    while index < tokens.len() {
        let name = match &tokens[index] {
            Token::Var(name) => name,
            _ => break,
        };
        match stack.lookup(name) {
            Some(Value::Function(closure)) if closure.fixity() == fixity => {
                operators.push(closure);
                index += 1;
            }
            _ => break,
        }
    }
    (index, operators)
}

/// Resolve one core unit.
fn read_core(stack: &RunStack, token: &Token) -> Result<Formula, RuntimeError> {
    match token {
        Token::Str(text) => Ok(Formula::Constant(Value::Str(text.clone()))),
        Token::Fun(def) => Ok(Formula::ClosureRef(Closure::new(
            stack.current(),
            def.clone(),
        ))),
        Token::Group(inner) => {
            let mut formulas = resolve_all(stack, inner)?;
            Ok(match formulas.len() {
                0 => Formula::Void,
                1 => formulas.pop().unwrap(),
                _ => Formula::Sequence {
                    terms: formulas,
                    mid_ops: Vec::new(),
                },
            })
        }
        Token::Call(callee, arg_tokens) => {
            let args = resolve_all(stack, arg_tokens)?;
            let callee = read_core(stack, callee)?;
            Ok(Formula::Call {
                callee: Box::new(callee),
                args,
            })
        }
        Token::Var(name) => resolve_name(stack, name),
        Token::Delimiter => unreachable!("delimiters are consumed by term reading"),
    }
}

/// Resolve an entire token list into consecutive formulas (group bodies,
/// call argument lists).
fn resolve_all(stack: &RunStack, tokens: &[Token]) -> Result<Vec<Formula>, RuntimeError> {
    let mut formulas = Vec::new();
    let mut index = 0;
    while index < tokens.len() {
        let (next, formula) = next_formula(stack, tokens, index)?;
        index = next;
        formulas.push(formula);
    }
    Ok(formulas)
}

/// A bare name resolves, in order: current binding (frozen into the
/// formula), name-literal sigil, builtin, integer literal, unresolved.
fn resolve_name(stack: &RunStack, name: &str) -> Result<Formula, RuntimeError> {
    if let Some(value) = stack.lookup(name) {
        return Ok(match value {
            Value::Function(closure) => Formula::ClosureRef(closure),
            value => Formula::Constant(value),
        });
    }
    if let Some(rest) = name.strip_prefix(':') {
        if rest.is_empty() {
            return Err(RuntimeError::EmptyNameLiteral);
        }
        return Ok(Formula::Name(NameLiteral {
            name: rest.to_owned(),
            scope: stack.current(),
        }));
    }
    if let Some(builtin) = Builtin::lookup(name) {
        return Ok(Formula::Constant(Value::Builtin(builtin, Vec::new())));
    }
    if let Ok(value) = name.parse::<i64>() {
        return Ok(Formula::Constant(Value::Int(value)));
    }
    Ok(Formula::Unresolved(name.to_owned()))
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::syntax::{
        parse::GrimParser,
        tree::{Fixity, FunctionDef},
    };

    fn operator(fixity: Fixity, priority: i64) -> Value {
        let count = match fixity {
            Fixity::Mid => 2,
            _ => 1,
        };
        let params = (0..count).map(|i| format!("p{}", i)).collect();
        Value::Function(Closure::new(
            0,
            Rc::new(FunctionDef {
                fixity,
                params,
                body: Vec::new(),
                priority: priority.unsigned_abs() as u32,
                left_assoc: priority < 0,
            }),
        ))
    }

    fn stack_with(ops: &[(&str, Fixity)]) -> RunStack {
        let mut stack = RunStack::new();
        for (name, fixity) in ops {
            stack.set_local(0, (*name).to_owned(), operator(*fixity, 10));
        }
        stack
    }

    fn resolve(stack: &RunStack, source: &str) -> (usize, Formula) {
        let tokens = GrimParser::tokens(source).unwrap();
        next_formula(stack, &tokens, 0).unwrap()
    }

    #[test]
    fn single_term_is_returned_unwrapped() {
        let stack = RunStack::new();
        let (index, formula) = resolve(&stack, "42");
        assert_eq!(index, 1);
        assert!(matches!(formula, Formula::Constant(Value::Int(42))));
    }

    #[test]
    fn operator_chain_wraps_iff_more_than_one_term() {
        let stack = stack_with(&[("+", Fixity::Mid)]);
        match resolve(&stack, "1 + 2 + 3").1 {
            Formula::Sequence { terms, mid_ops } => {
                assert_eq!(terms.len(), 3);
                assert_eq!(mid_ops.len(), 2);
            }
            other => panic!("expected a sequence, got {:?}", other),
        }
        assert!(matches!(
            resolve(&stack, "1").1,
            Formula::Constant(Value::Int(1))
        ));
    }

    #[test]
    fn trailing_mid_operator_is_a_parse_fault() {
        let stack = stack_with(&[("+", Fixity::Mid)]);
        let tokens = GrimParser::tokens("1 +").unwrap();
        assert!(matches!(
            next_formula(&stack, &tokens, 0),
            Err(RuntimeError::OperatorMismatch {
                terms: 1,
                operators: 1
            })
        ));
    }

    #[test]
    fn delimiters_are_transparent_between_statements() {
        let stack = RunStack::new();
        let (index, formula) = resolve(&stack, "; ; 7");
        assert_eq!(index, 3);
        assert!(matches!(formula, Formula::Constant(Value::Int(7))));
    }

    #[test]
    fn name_literal_carries_the_current_scope() {
        let mut stack = RunStack::new();
        stack.push(None);
        match resolve(&stack, ":x").1 {
            Formula::Name(literal) => {
                assert_eq!(literal.name, "x");
                assert_eq!(literal.scope, stack.current());
            }
            other => panic!("expected a name literal, got {:?}", other),
        }
    }

    #[test]
    fn bare_sigil_is_a_parse_fault() {
        let stack = RunStack::new();
        let tokens = GrimParser::tokens(":").unwrap();
        assert!(matches!(
            next_formula(&stack, &tokens, 0),
            Err(RuntimeError::EmptyNameLiteral)
        ));
    }

    #[test]
    fn unbound_names_fall_through_builtin_then_integer() {
        let stack = RunStack::new();
        assert!(matches!(
            resolve(&stack, "__put").1,
            Formula::Constant(Value::Builtin(Builtin::Put, _))
        ));
        assert!(matches!(
            resolve(&stack, "-42").1,
            Formula::Constant(Value::Int(-42))
        ));
        assert!(matches!(resolve(&stack, "flob").1, Formula::Unresolved(_)));
    }

    #[test]
    fn bound_values_are_frozen_at_resolution() {
        let mut stack = RunStack::new();
        stack.set_local(0, "x".to_owned(), Value::Int(9));
        assert!(matches!(
            resolve(&stack, "x").1,
            Formula::Constant(Value::Int(9))
        ));
        // A binding shadows the builtin reading of the same name.
        stack.set_local(0, "__put".to_owned(), Value::Int(1));
        assert!(matches!(
            resolve(&stack, "__put").1,
            Formula::Constant(Value::Int(1))
        ));
    }

    #[test]
    fn fix_operators_wrap_the_core() {
        let stack = stack_with(&[("neg", Fixity::Prefix), ("bang", Fixity::Suffix)]);
        match resolve(&stack, "neg neg 1 bang").1 {
            Formula::Modified {
                prefix,
                core,
                suffix,
            } => {
                assert_eq!(prefix.len(), 2);
                assert_eq!(suffix.len(), 1);
                assert!(matches!(*core, Formula::Constant(Value::Int(1))));
            }
            other => panic!("expected a modified term, got {:?}", other),
        }
    }

    #[test]
    fn groups_unwrap_single_formulas() {
        let stack = RunStack::new();
        assert!(matches!(
            resolve(&stack, "(7)").1,
            Formula::Constant(Value::Int(7))
        ));
        match resolve(&stack, "(1; 2; 3)").1 {
            Formula::Sequence { terms, mid_ops } => {
                assert_eq!(terms.len(), 3);
                assert!(mid_ops.is_empty());
            }
            other => panic!("expected a sequence, got {:?}", other),
        }
    }

    #[test]
    fn call_arguments_resolve_to_separate_formulas() {
        let stack = RunStack::new();
        match resolve(&stack, "f(1, 2)").1 {
            Formula::Call { callee, args } => {
                assert!(matches!(*callee, Formula::Unresolved(_)));
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected a call, got {:?}", other),
        }
    }

    #[test]
    fn operator_bindings_are_consulted_per_position() {
        // The same name is an operator only where a binding says so: here
        // `f` is a plain function, so it never reads as a mid operator.
        let mut stack = RunStack::new();
        stack.set_local(
            0,
            "f".to_owned(),
            operator(Fixity::General, 0),
        );
        let tokens = GrimParser::tokens("1 f 2").unwrap();
        let (index, formula) = next_formula(&stack, &tokens, 0).unwrap();
        assert_eq!(index, 1);
        assert!(matches!(formula, Formula::Constant(Value::Int(1))));
    }
}
