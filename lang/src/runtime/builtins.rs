use std::{collections::HashMap, fs};

use lazy_static::lazy_static;

use crate::{
    runtime::{eval::Interpreter, RuntimeError, Value},
    syntax::parse::GrimParser,
};

/// The fixed primitive set. Builtins curry like user closures against the
/// arity table below; only the control-flow ones receive closures and
/// invoke them lazily.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Assign,
    Put,
    PutError,
    Input,
    Add,
    Negate,
    Equal,
    If,
    IfElse,
    While,
    ReadFile,
    StrAt,
    Eval,
}

lazy_static! {
    static ref BUILTIN_NAMES: HashMap<&'static str, Builtin> = {
        let mut table = HashMap::new();
        table.insert("__assign", Builtin::Assign);
        table.insert("__put", Builtin::Put);
        table.insert("__perror", Builtin::PutError);
        table.insert("__input", Builtin::Input);
        table.insert("__add", Builtin::Add);
        table.insert("__negate", Builtin::Negate);
        table.insert("__equal", Builtin::Equal);
        table.insert("__if", Builtin::If);
        table.insert("__ifElse", Builtin::IfElse);
        table.insert("__while", Builtin::While);
        table.insert("__read", Builtin::ReadFile);
        table.insert("__strAt", Builtin::StrAt);
        table.insert("__eval", Builtin::Eval);
        table
    };
}

impl Builtin {
    pub fn lookup(name: &str) -> Option<Builtin> {
        BUILTIN_NAMES.get(name).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Assign => "__assign",
            Builtin::Put => "__put",
            Builtin::PutError => "__perror",
            Builtin::Input => "__input",
            Builtin::Add => "__add",
            Builtin::Negate => "__negate",
            Builtin::Equal => "__equal",
            Builtin::If => "__if",
            Builtin::IfElse => "__ifElse",
            Builtin::While => "__while",
            Builtin::ReadFile => "__read",
            Builtin::StrAt => "__strAt",
            Builtin::Eval => "__eval",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Builtin::Input => 0,
            Builtin::Put
            | Builtin::PutError
            | Builtin::Negate
            | Builtin::ReadFile
            | Builtin::Eval => 1,
            Builtin::Assign
            | Builtin::Add
            | Builtin::Equal
            | Builtin::If
            | Builtin::While
            | Builtin::StrAt => 2,
            Builtin::IfElse => 3,
        }
    }
}

impl Interpreter {
    /// Run a saturated builtin over its evaluated arguments.
    pub(crate) fn dispatch_builtin(
        &mut self,
        builtin: Builtin,
        mut values: Vec<Value>,
        depth: usize,
    ) -> Result<Value, RuntimeError> {
        debug_assert_eq!(values.len(), builtin.arity());
        if self.trace {
            self.debug(depth, builtin.name());
        }
        match builtin {
            Builtin::Assign => {
                let value = values.pop().unwrap();
                match values.pop().unwrap() {
                    Value::Name(literal) => {
                        self.stack.assign(&literal, value.clone());
                        Ok(value)
                    }
                    target => Err(RuntimeError::AssignTarget(target.to_string())),
                }
            }
            Builtin::Put => {
                let text = values.pop().unwrap().to_string();
                (self.io.output)(&text);
                Ok(Value::Str(text))
            }
            Builtin::PutError => {
                let text = values.pop().unwrap().to_string();
                (self.io.error)(&text);
                Ok(Value::Void)
            }
            Builtin::Input => {
                let line = (self.io.input)().unwrap_or_default();
                Ok(Value::Str(line))
            }
            Builtin::Add => {
                let rhs = values.pop().unwrap();
                let lhs = values.pop().unwrap();
                add(lhs, rhs)
            }
            Builtin::Negate => match values.pop().unwrap() {
                Value::Int(value) => Ok(Value::Int(value.wrapping_neg())),
                value => Err(RuntimeError::TypeMismatch {
                    expected: "an integer",
                    got: value.to_string(),
                }),
            },
            Builtin::Equal => {
                let rhs = values.pop().unwrap();
                let lhs = values.pop().unwrap();
                Ok(Value::Int((lhs == rhs) as i64))
            }
            Builtin::If => {
                let branch = values.pop().unwrap();
                let condition = values.pop().unwrap();
                if condition == Value::Int(1) {
                    self.invoke_thunk(&branch, depth)?;
                }
                Ok(Value::Void)
            }
            Builtin::IfElse => {
                let otherwise = values.pop().unwrap();
                let branch = values.pop().unwrap();
                let condition = values.pop().unwrap();
                if condition == Value::Int(1) {
                    self.invoke_thunk(&branch, depth)?;
                } else {
                    self.invoke_thunk(&otherwise, depth)?;
                }
                Ok(Value::Void)
            }
            Builtin::While => {
                let body = values.pop().unwrap();
                let condition = values.pop().unwrap();
                while self.invoke_thunk(&condition, depth)? == Value::Int(1) {
                    self.invoke_thunk(&body, depth)?;
                }
                Ok(Value::Void)
            }
            Builtin::ReadFile => match values.pop().unwrap() {
                // The one non-fatal miss in the system: probing for a file
                // that is not there yields Void, not an error.
                Value::Str(path) => {
                    Ok(fs::read_to_string(&path).map(Value::Str).unwrap_or(Value::Void))
                }
                value => Err(RuntimeError::TypeMismatch {
                    expected: "a file path string",
                    got: value.to_string(),
                }),
            },
            Builtin::StrAt => {
                let index = values.pop().unwrap();
                let text = values.pop().unwrap();
                str_at(text, index)
            }
            Builtin::Eval => match values.pop().unwrap() {
                Value::Str(source) => {
                    let tokens = GrimParser::tokens(&source)
                        .map_err(|e| RuntimeError::SyntaxError(e.0.to_string()))?;
                    // Stackless: the nested program shares the caller's
                    // frame, so it can rebind the running program's names.
                    self.execute(&tokens, None, HashMap::new(), false, depth)
                }
                value => Err(RuntimeError::TypeMismatch {
                    expected: "a program string",
                    got: value.to_string(),
                }),
            },
        }
    }

    /// Invoke a branch or condition value: it must be a closure awaiting
    /// no further arguments.
    fn invoke_thunk(&mut self, value: &Value, depth: usize) -> Result<Value, RuntimeError> {
        match value {
            Value::Function(closure) if closure.applied.len() == closure.def.params.len() => {
                self.call_closure(closure, Vec::new(), depth + 1)
            }
            value => Err(RuntimeError::BranchNotThunk(value.to_string())),
        }
    }
}

fn add(lhs: Value, rhs: Value) -> Result<Value, RuntimeError> {
    match (lhs, rhs) {
        (Value::Int(lhs), Value::Int(rhs)) => Ok(Value::Int(lhs.wrapping_add(rhs))),
        (Value::Str(lhs), Value::Str(rhs)) => Ok(Value::Str(format!("{}{}", lhs, rhs))),
        (Value::Str(lhs), Value::Int(rhs)) => Ok(Value::Str(format!("{}{}", lhs, rhs))),
        (Value::Int(lhs), Value::Str(rhs)) => Ok(Value::Str(format!("{}{}", lhs, rhs))),
        (lhs, rhs) => Err(RuntimeError::AddMismatch(lhs.to_string(), rhs.to_string())),
    }
}

fn str_at(text: Value, index: Value) -> Result<Value, RuntimeError> {
    let (text, index) = match (text, index) {
        (Value::Str(text), Value::Int(index)) => (text, index),
        (text, index) => {
            return Err(RuntimeError::TypeMismatch {
                expected: "a string and an integer index",
                got: format!("{}, {}", text, index),
            });
        }
    };
    if index < 0 {
        return Err(RuntimeError::IndexOutOfRange {
            index,
            length: text.chars().count(),
        });
    }
    match text.chars().nth(index as usize) {
        Some(ch) => Ok(Value::Str(ch.to_string())),
        None => Err(RuntimeError::IndexOutOfRange {
            index,
            length: text.chars().count(),
        }),
    }
}
