use std::{
    collections::HashMap,
    fmt::{self, Formatter},
    io::Write,
    rc::Rc,
};

use crate::syntax::tree::{Fixity, FunctionDef, Name};

pub mod builtins;
pub mod eval;
pub mod resolve;

pub use crate::runtime::builtins::Builtin;
pub use crate::runtime::eval::Interpreter;

#[derive(Debug)]
pub enum RuntimeError {
    StackUnderflow,
    VariableNotFound(String),
    NotCallable(String),
    OperatorMismatch { terms: usize, operators: usize },
    EmptyNameLiteral,
    ArityMismatch { expected: usize, got: usize },
    AssignTarget(String),
    AddMismatch(String, String),
    TypeMismatch { expected: &'static str, got: String },
    IndexOutOfRange { index: i64, length: usize },
    BranchNotThunk(String),
    SyntaxError(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::StackUnderflow => write!(f, "RuntimeError: scope stack underflow"),
            RuntimeError::VariableNotFound(name) => {
                write!(f, "NameError: variable '{}' not found", name)
            }
            RuntimeError::NotCallable(value) => {
                write!(f, "TypeError: '{}' is not a function", value)
            }
            RuntimeError::OperatorMismatch { terms, operators } => write!(
                f,
                "ParseError: {} terms cannot carry {} mid operators",
                terms, operators
            ),
            RuntimeError::EmptyNameLiteral => {
                write!(f, "ParseError: ':' must be followed by a name")
            }
            RuntimeError::ArityMismatch { expected, got } => write!(
                f,
                "ArityError: expected {} arguments, got {}",
                expected, got
            ),
            RuntimeError::AssignTarget(value) => write!(
                f,
                "TypeError: assignment target '{}' is not a name literal",
                value
            ),
            RuntimeError::AddMismatch(lhs, rhs) => {
                write!(f, "TypeError: cannot add '{}' and '{}'", lhs, rhs)
            }
            RuntimeError::TypeMismatch { expected, got } => {
                write!(f, "TypeError: expected {}, got '{}'", expected, got)
            }
            RuntimeError::IndexOutOfRange { index, length } => write!(
                f,
                "RangeError: index {} out of range for string of length {}",
                index, length
            ),
            RuntimeError::BranchNotThunk(value) => write!(
                f,
                "TypeError: '{}' is not a zero-argument function",
                value
            ),
            RuntimeError::SyntaxError(message) => write!(f, "ParseError: {}", message),
        }
    }
}

pub type ScopeId = usize;

/// A runtime value. Values are immutable; mutation is always rebinding a
/// name in a scope.
#[derive(Debug, Clone)]
pub enum Value {
    Str(String),
    Int(i64),
    Function(Closure),
    Builtin(Builtin, Vec<Value>),
    Name(NameLiteral),
    Void,
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Str(lhs), Value::Str(rhs)) => lhs == rhs,
            (Value::Int(lhs), Value::Int(rhs)) => lhs == rhs,
            (Value::Name(lhs), Value::Name(rhs)) => lhs == rhs,
            (Value::Void, Value::Void) => true,
            (Value::Builtin(lhs, la), Value::Builtin(rhs, ra)) => lhs == rhs && la == ra,
            (Value::Function(lhs), Value::Function(rhs)) => {
                Rc::ptr_eq(&lhs.def, &rhs.def)
                    && lhs.scope == rhs.scope
                    && lhs.applied == rhs.applied
            }
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{}", s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Function(closure) => write!(f, "{}", closure),
            Value::Builtin(builtin, _) => write!(f, "{}", builtin.name()),
            Value::Name(literal) => write!(f, ":{}", literal.name),
            Value::Void => write!(f, "Void"),
        }
    }
}

/// An assignment target resolved from a `:name` form, pinned to the scope
/// it was resolved in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameLiteral {
    pub name: Name,
    pub scope: ScopeId,
}

/// A function value: shared definition, captured defining scope, and the
/// arguments applied so far. Application never mutates a closure; a curry
/// step always produces a new one.
#[derive(Debug, Clone)]
pub struct Closure {
    pub def: Rc<FunctionDef>,
    pub scope: ScopeId,
    pub applied: Vec<Value>,
}

impl Closure {
    pub fn new(scope: ScopeId, def: Rc<FunctionDef>) -> Closure {
        Closure {
            def,
            scope,
            applied: Vec::new(),
        }
    }

    pub fn fixity(&self) -> Fixity {
        self.def.fixity
    }

    pub fn priority(&self) -> u32 {
        self.def.priority
    }

    pub fn left_assoc(&self) -> bool {
        self.def.left_assoc
    }
}

impl fmt::Display for Closure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let params = self.def.params.join(" ");
        match self.def.fixity {
            Fixity::General => write!(f, "fun({})", params),
            fixity => {
                let kw = match fixity {
                    Fixity::Prefix => "opp",
                    Fixity::Suffix => "ops",
                    _ => "opm",
                };
                let sign = if self.def.left_assoc { "-" } else { "" };
                write!(f, "{} {}{}({})", kw, sign, self.def.priority, params)
            }
        }
    }
}

#[derive(Debug)]
pub struct Scope {
    pub lexical_parent: Option<ScopeId>,
    pub dynamic_parent: Option<ScopeId>,
    vars: HashMap<Name, Value>,
}

/// The scope graph and the cursor into it. Scopes form two interleaved
/// trees over one arena: the lexical tree (where closures were written)
/// and the dynamic tree (who called whom). Scopes are never freed before
/// the interpreter itself: closures and name literals may hold ids past
/// the frame's pop.
#[derive(Debug)]
pub struct RunStack {
    scopes: Vec<Scope>,
    current: ScopeId,
}

impl RunStack {
    pub fn new() -> RunStack {
        RunStack {
            scopes: vec![Scope {
                lexical_parent: None,
                dynamic_parent: None,
                vars: HashMap::new(),
            }],
            current: 0,
        }
    }

    pub fn current(&self) -> ScopeId {
        self.current
    }

    /// Create and enter a child scope. The dynamic parent is always the
    /// current scope; the lexical parent defaults to it when no captured
    /// scope is supplied.
    pub fn push(&mut self, lexical_parent: Option<ScopeId>) -> ScopeId {
        let id = self.scopes.len();
        self.scopes.push(Scope {
            lexical_parent: Some(lexical_parent.unwrap_or(self.current)),
            dynamic_parent: Some(self.current),
            vars: HashMap::new(),
        });
        self.current = id;
        id
    }

    /// Return to the dynamic parent. Popping the root frame is an engine
    /// bug, not a user error.
    pub fn pop(&mut self) -> Result<(), RuntimeError> {
        self.current = self.scopes[self.current]
            .dynamic_parent
            .ok_or(RuntimeError::StackUnderflow)?;
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.lookup_from(self.current, name)
    }

    /// Walk the lexical chain, or the dynamic chain when the name carries
    /// the `@` sigil. Exhaustion is not an error at this layer.
    pub fn lookup_from(&self, scope: ScopeId, name: &str) -> Option<Value> {
        match name.strip_prefix('@') {
            Some(rest) => self.walk(scope, rest, |s| s.dynamic_parent),
            None => self.walk(scope, name, |s| s.lexical_parent),
        }
    }

    fn walk(
        &self,
        mut scope: ScopeId,
        name: &str,
        parent: impl Fn(&Scope) -> Option<ScopeId>,
    ) -> Option<Value> {
        loop {
            let node = &self.scopes[scope];
            if let Some(value) = node.vars.get(name) {
                return Some(value.clone());
            }
            scope = parent(node)?;
        }
    }

    /// Direct write into a specific scope, bypassing chain search. Used to
    /// install call arguments.
    pub fn set_local(&mut self, scope: ScopeId, name: Name, value: Value) {
        self.scopes[scope].vars.insert(name, value);
    }

    /// Write-through assignment. Plain names rebind the nearest lexical
    /// ancestor already holding the name, else bind in the literal's own
    /// scope. `@` names rebind along the dynamic chain starting at the
    /// calling frame, else bind directly in the calling frame.
    pub fn assign(&mut self, literal: &NameLiteral, value: Value) {
        match literal.name.strip_prefix('@') {
            Some(rest) => {
                let target = match self.scopes[literal.scope].dynamic_parent {
                    Some(caller) => self
                        .find_bound(caller, rest, |s| s.dynamic_parent)
                        .unwrap_or(caller),
                    None => literal.scope,
                };
                self.scopes[target].vars.insert(rest.to_owned(), value);
            }
            None => {
                let target = self
                    .find_bound(literal.scope, &literal.name, |s| s.lexical_parent)
                    .unwrap_or(literal.scope);
                self.scopes[target].vars.insert(literal.name.clone(), value);
            }
        }
    }

    fn find_bound(
        &self,
        mut scope: ScopeId,
        name: &str,
        parent: impl Fn(&Scope) -> Option<ScopeId>,
    ) -> Option<ScopeId> {
        loop {
            let node = &self.scopes[scope];
            if node.vars.contains_key(name) {
                return Some(scope);
            }
            scope = parent(node)?;
        }
    }
}

/// Injected I/O endpoints. The driver wires these to stdio; the test
/// harness substitutes scripted closures. Single-threaded by design.
pub struct Io {
    pub output: Box<dyn FnMut(&str)>,
    pub error: Box<dyn FnMut(&str)>,
    pub input: Box<dyn FnMut() -> Option<String>>,
}

impl Io {
    pub fn stdio() -> Io {
        Io {
            output: Box::new(|text| {
                print!("{}", text);
                let _ = std::io::stdout().flush();
            }),
            error: Box::new(|text| eprint!("{}", text)),
            input: Box::new(|| {
                let mut line = String::new();
                match std::io::stdin().read_line(&mut line) {
                    Ok(0) | Err(_) => None,
                    Ok(_) => {
                        while line.ends_with('\n') || line.ends_with('\r') {
                            line.pop();
                        }
                        Some(line)
                    }
                }
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_follows_the_lexical_chain() {
        let mut stack = RunStack::new();
        stack.set_local(0, "x".to_owned(), Value::Int(1));
        let inner = stack.push(None);
        assert_eq!(stack.lookup("x"), Some(Value::Int(1)));
        stack.set_local(inner, "x".to_owned(), Value::Int(2));
        assert_eq!(stack.lookup("x"), Some(Value::Int(2)));
        stack.pop().unwrap();
        assert_eq!(stack.lookup("x"), Some(Value::Int(1)));
    }

    #[test]
    fn dynamic_lookup_follows_the_call_chain() {
        let mut stack = RunStack::new();
        stack.set_local(0, "x".to_owned(), Value::Int(1));
        // Lexically detached frame whose dynamic parent is the root.
        let detached = stack.push(None);
        // Give it a lexical parent that does not know `x`.
        let orphan = stack.push(Some(detached));
        stack.set_local(detached, "y".to_owned(), Value::Int(9));
        assert_eq!(stack.lookup_from(orphan, "@y"), Some(Value::Int(9)));
        assert_eq!(stack.lookup_from(orphan, "@x"), Some(Value::Int(1)));
    }

    #[test]
    fn popping_the_root_is_an_underflow() {
        let mut stack = RunStack::new();
        assert!(matches!(stack.pop(), Err(RuntimeError::StackUnderflow)));
    }

    #[test]
    fn assignment_writes_through_to_ancestor_bindings() {
        let mut stack = RunStack::new();
        stack.set_local(0, "x".to_owned(), Value::Int(1));
        let inner = stack.push(None);
        stack.assign(
            &NameLiteral {
                name: "x".to_owned(),
                scope: inner,
            },
            Value::Int(5),
        );
        stack.pop().unwrap();
        assert_eq!(stack.lookup("x"), Some(Value::Int(5)));
    }

    #[test]
    fn fresh_names_bind_locally() {
        let mut stack = RunStack::new();
        let inner = stack.push(None);
        stack.assign(
            &NameLiteral {
                name: "x".to_owned(),
                scope: inner,
            },
            Value::Int(5),
        );
        assert_eq!(stack.lookup_from(inner, "x"), Some(Value::Int(5)));
        stack.pop().unwrap();
        assert_eq!(stack.lookup("x"), None);
    }

    #[test]
    fn dynamic_assignment_targets_the_calling_frame() {
        let mut stack = RunStack::new();
        let caller = stack.push(None);
        // Lexically rooted, dynamically a child of `caller`.
        let callee = stack.push(Some(0));
        stack.assign(
            &NameLiteral {
                name: "@r".to_owned(),
                scope: callee,
            },
            Value::Int(7),
        );
        assert_eq!(stack.lookup_from(caller, "r"), Some(Value::Int(7)));
        assert_eq!(stack.lookup_from(callee, "r"), None);
    }
}
