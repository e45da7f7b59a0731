use std::collections::HashMap;

use crate::{
    runtime::{
        builtins::Builtin,
        resolve::{self, Formula},
        Closure, Io, RunStack, RuntimeError, ScopeId, Value,
    },
    syntax::tree::Token,
};

/// The evaluator. Owns the scope graph and the injected I/O endpoints;
/// the resolver borrows the scope graph between evaluation steps.
pub struct Interpreter {
    pub stack: RunStack,
    pub(crate) io: Io,
    pub trace: bool,
}

impl Interpreter {
    pub fn new() -> Interpreter {
        Interpreter::with_io(Io::stdio())
    }

    pub fn with_io(io: Io) -> Interpreter {
        Interpreter {
            stack: RunStack::new(),
            io,
            trace: false,
        }
    }

    /// Run a program in a fresh frame.
    pub fn run(&mut self, tokens: &[Token]) -> Result<Value, RuntimeError> {
        self.execute(tokens, None, HashMap::new(), true, 0)
    }

    /// Run a program in the current frame, sharing its bindings. Used by
    /// `__eval` and by REPL lines, so that assignments persist.
    pub fn run_shared(&mut self, tokens: &[Token]) -> Result<Value, RuntimeError> {
        self.execute(tokens, None, HashMap::new(), false, 0)
    }

    /// Resolve and evaluate a token list, formula by formula, so that each
    /// formula's side effects are visible to the resolution of the next.
    /// `framed` pushes a scope whose lexical parent is `lexical` (the
    /// current scope when absent) and installs `args` into it; the pop
    /// runs on every exit path.
    pub(crate) fn execute(
        &mut self,
        tokens: &[Token],
        lexical: Option<ScopeId>,
        args: HashMap<String, Value>,
        framed: bool,
        depth: usize,
    ) -> Result<Value, RuntimeError> {
        if !framed {
            return self.execute_block(tokens, depth);
        }

        let scope = self.stack.push(lexical);
        for (name, value) in args {
            self.stack.set_local(scope, name, value);
        }
        let result = match self.execute_block(tokens, depth) {
            Ok(value) => value,
            err => {
                self.stack.pop()?;
                return err;
            }
        };
        self.stack.pop()?;
        Ok(result)
    }

    fn execute_block(&mut self, tokens: &[Token], depth: usize) -> Result<Value, RuntimeError> {
        let mut result = Value::Void;
        let mut index = 0;
        while index < tokens.len() {
            let (next, formula) = resolve::next_formula(&self.stack, tokens, index)?;
            index = next;
            if self.trace {
                self.debug(depth, &format!("resolved {:?}", formula));
            }
            let value = self.evaluate(formula, depth + 1)?;
            result = self.chain(result, value, depth)?;
        }
        Ok(result)
    }

    fn evaluate(&mut self, formula: Formula, depth: usize) -> Result<Value, RuntimeError> {
        match formula {
            Formula::Constant(value) => Ok(value),
            Formula::ClosureRef(closure) => Ok(Value::Function(closure)),
            Formula::Name(literal) => Ok(Value::Name(literal)),
            Formula::Void => Ok(Value::Void),
            Formula::Unresolved(name) => self
                .stack
                .lookup(&name)
                .ok_or(RuntimeError::VariableNotFound(name)),
            Formula::Call { callee, args } => self.eval_call(*callee, args, depth),
            Formula::Modified {
                prefix,
                core,
                suffix,
            } => self.eval_modified(prefix, *core, suffix, depth),
            Formula::Sequence { terms, mid_ops } => self.eval_sequence(terms, mid_ops, depth),
        }
    }

    fn eval_call(
        &mut self,
        callee: Formula,
        args: Vec<Formula>,
        depth: usize,
    ) -> Result<Value, RuntimeError> {
        match self.evaluate(callee, depth + 1)? {
            Value::Function(closure) => self.call_closure(&closure, args, depth),
            Value::Builtin(builtin, applied) => self.call_builtin(builtin, applied, args, depth),
            value => Err(RuntimeError::NotCallable(value.to_string())),
        }
    }

    /// Operator-precedence reduction: highest priority first; within one
    /// priority, left-associative operators reduce front to back before
    /// right-associative ones reduce back to front. Whatever terms remain
    /// evaluate left to right; the sequence value is the last result.
    fn eval_sequence(
        &mut self,
        mut terms: Vec<Formula>,
        mut mid_ops: Vec<Closure>,
        depth: usize,
    ) -> Result<Value, RuntimeError> {
        while let Some(max) = mid_ops.iter().map(Closure::priority).max() {
            while let Some(i) = mid_ops
                .iter()
                .position(|op| op.priority() == max && op.left_assoc())
            {
                self.reduce_at(&mut terms, &mut mid_ops, i, depth)?;
            }
            while let Some(i) = mid_ops.iter().rposition(|op| op.priority() == max) {
                self.reduce_at(&mut terms, &mut mid_ops, i, depth)?;
            }
        }

        let mut result = Value::Void;
        for term in terms {
            let value = self.evaluate(term, depth + 1)?;
            result = self.chain(result, value, depth)?;
        }
        Ok(result)
    }

    fn reduce_at(
        &mut self,
        terms: &mut Vec<Formula>,
        mid_ops: &mut Vec<Closure>,
        i: usize,
        depth: usize,
    ) -> Result<(), RuntimeError> {
        let op = mid_ops.remove(i);
        let rhs = terms.remove(i + 1);
        let lhs = std::mem::replace(&mut terms[i], Formula::Void);
        if self.trace {
            self.debug(depth, &format!("reduce {}", op));
        }
        let value = self.call_closure(&op, vec![lhs, rhs], depth + 1)?;
        terms[i] = Formula::Constant(value);
        Ok(())
    }

    /// A name literal flowing into an unsaturated callable becomes its
    /// first argument; this is what makes `:x __assign(5)` bind `x`. Any
    /// other previous result is discarded.
    fn chain(
        &mut self,
        previous: Value,
        value: Value,
        depth: usize,
    ) -> Result<Value, RuntimeError> {
        let unsaturated = match &value {
            Value::Function(closure) => closure.applied.len() < closure.def.params.len(),
            Value::Builtin(builtin, applied) => applied.len() < builtin.arity(),
            _ => false,
        };
        if !unsaturated || !matches!(previous, Value::Name(_)) {
            return Ok(value);
        }

        match value {
            Value::Function(closure) => {
                let mut applied = Vec::with_capacity(closure.applied.len() + 1);
                applied.push(previous);
                applied.extend(closure.applied.iter().cloned());
                if applied.len() == closure.def.params.len() {
                    self.enter_closure(&closure, applied, depth)
                } else {
                    Ok(Value::Function(Closure { applied, ..closure }))
                }
            }
            Value::Builtin(builtin, prior) => {
                let mut applied = Vec::with_capacity(prior.len() + 1);
                applied.push(previous);
                applied.extend(prior);
                if applied.len() == builtin.arity() {
                    self.dispatch_builtin(builtin, applied, depth)
                } else {
                    Ok(Value::Builtin(builtin, applied))
                }
            }
            value => Ok(value),
        }
    }

    /// Fold prefix and suffix operator runs around an evaluated core.
    /// The strictly higher priority applies first; on a tie the suffix
    /// wins only when both sides are right-associative; an exhausted side
    /// drains the other in source order.
    fn eval_modified(
        &mut self,
        prefix: Vec<Closure>,
        core: Formula,
        suffix: Vec<Closure>,
        depth: usize,
    ) -> Result<Value, RuntimeError> {
        let mut result = self.evaluate(core, depth + 1)?;

        let mut p = 0;
        let mut s = 0;
        while p < prefix.len() && s < suffix.len() {
            let pf = &prefix[p];
            let sf = &suffix[s];
            let suffix_first = if pf.priority() != sf.priority() {
                sf.priority() > pf.priority()
            } else {
                !pf.left_assoc() && !sf.left_assoc()
            };
            if suffix_first {
                result = self.apply_operator(sf, result, depth)?;
                s += 1;
            } else {
                result = self.apply_operator(pf, result, depth)?;
                p += 1;
            }
        }
        for op in &prefix[p..] {
            result = self.apply_operator(op, result, depth)?;
        }
        for op in &suffix[s..] {
            result = self.apply_operator(op, result, depth)?;
        }
        Ok(result)
    }

    fn apply_operator(
        &mut self,
        op: &Closure,
        value: Value,
        depth: usize,
    ) -> Result<Value, RuntimeError> {
        self.call_closure(op, vec![Formula::Constant(value)], depth + 1)
    }

    /// Curried application. Over-saturation is fatal; under-saturation
    /// with arguments extends a copy of the closure; an exact fit binds
    /// the parameters in a fresh frame over the defining scope and runs
    /// the body.
    pub fn call_closure(
        &mut self,
        closure: &Closure,
        args: Vec<Formula>,
        depth: usize,
    ) -> Result<Value, RuntimeError> {
        let want = closure.def.params.len();
        let have = closure.applied.len() + args.len();
        if have > want {
            return Err(RuntimeError::ArityMismatch {
                expected: want,
                got: have,
            });
        }

        if have < want {
            if args.is_empty() {
                return Ok(Value::Function(closure.clone()));
            }
            let mut applied = closure.applied.clone();
            for arg in args {
                applied.push(self.evaluate(arg, depth + 1)?);
            }
            return Ok(Value::Function(Closure {
                applied,
                ..closure.clone()
            }));
        }

        let mut values = closure.applied.clone();
        for arg in args {
            values.push(self.evaluate(arg, depth + 1)?);
        }
        self.enter_closure(closure, values, depth)
    }

    pub(crate) fn enter_closure(
        &mut self,
        closure: &Closure,
        values: Vec<Value>,
        depth: usize,
    ) -> Result<Value, RuntimeError> {
        debug_assert_eq!(values.len(), closure.def.params.len());
        if self.trace {
            self.debug(depth, &format!("call {}", closure));
        }
        let mut bindings = HashMap::with_capacity(values.len());
        for (param, value) in closure.def.params.iter().zip(values) {
            bindings.insert(param.clone(), value);
        }
        self.execute(&closure.def.body, Some(closure.scope), bindings, true, depth)
    }

    fn call_builtin(
        &mut self,
        builtin: Builtin,
        applied: Vec<Value>,
        args: Vec<Formula>,
        depth: usize,
    ) -> Result<Value, RuntimeError> {
        let want = builtin.arity();
        let have = applied.len() + args.len();
        if have > want {
            return Err(RuntimeError::ArityMismatch {
                expected: want,
                got: have,
            });
        }
        let mut values = applied;
        for arg in args {
            values.push(self.evaluate(arg, depth + 1)?);
        }
        if have < want {
            return Ok(Value::Builtin(builtin, values));
        }
        self.dispatch_builtin(builtin, values, depth)
    }

    pub(crate) fn debug(&self, depth: usize, text: &str) {
        eprintln!("[grim] {}{}{}", depth, " ".repeat(depth * 2 + 1), text);
    }
}
