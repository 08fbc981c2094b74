//! Source transformation: turns a file into an evaluable `Script` whose
//! sandbox evaluation result exposes the module wrapper under a property
//! this module names. The default transformer compiles the module
//! dialect; alternative transformers plug in through the `Transformer`
//! trait.

mod scanner;

pub use scanner::{parse, Expr, Stmt};

use crate::config::Config;
use crate::coverage::COVERAGE_PRAGMA;
use crate::error::{Error, Result};
use crate::runtime::{ModuleRecord, RequireFunction, TestFacade};
use crate::value::Value;
use ahash::AHashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Property name under which a script's evaluation result carries the
/// module wrapper.
pub const WRAPPER_KEY: &str = "moduleWrapper";

/// The local environment a module body runs against. Slots are listed in
/// the order the wrapper receives them: receiver (`this`, the exports
/// bag), module record, exports, require, dirname, filename, sandbox
/// global, test facade, coverage store.
#[derive(Clone)]
pub struct ModuleScope {
    pub receiver: Value,
    pub module: Rc<ModuleRecord>,
    pub exports: Value,
    pub require: RequireFunction,
    pub dirname: PathBuf,
    pub filename: PathBuf,
    pub global: Value,
    pub rig: TestFacade,
    pub coverage: Value,
}

pub type ModuleWrapper = Rc<dyn Fn(ModuleScope) -> Result<()>>;

/// Evaluation result of a script: a property table the runtime indexes
/// with `WRAPPER_KEY`.
pub struct EvalResult {
    entries: AHashMap<String, ModuleWrapper>,
}

impl EvalResult {
    pub fn get(&self, name: &str) -> Option<ModuleWrapper> {
        self.entries.get(name).cloned()
    }
}

/// An evaluable script produced by a transformer.
pub struct Script {
    filename: PathBuf,
    wrapper: ModuleWrapper,
}

impl Script {
    pub fn new(filename: impl Into<PathBuf>, wrapper: ModuleWrapper) -> Self {
        Self {
            filename: filename.into(),
            wrapper,
        }
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    pub(crate) fn evaluate(&self) -> EvalResult {
        let mut entries = AHashMap::new();
        entries.insert(WRAPPER_KEY.to_string(), self.wrapper.clone());
        EvalResult { entries }
    }
}

/// Per-transform options. The instrumentation hook, when present, maps
/// source to collector-annotated source before compilation.
#[derive(Clone, Default)]
pub struct TransformOptions {
    pub instrument: Option<Rc<dyn Fn(&str, &Path) -> String>>,
}

pub trait Transformer {
    fn transform(
        &self,
        filename: &Path,
        config: &Config,
        options: &TransformOptions,
    ) -> Result<Script>;
}

/// Default transformer: parses the module dialect and closes the program
/// over an interpreter.
#[derive(Debug, Default)]
pub struct SourceTransformer;

impl Transformer for SourceTransformer {
    fn transform(
        &self,
        filename: &Path,
        _config: &Config,
        options: &TransformOptions,
    ) -> Result<Script> {
        let mut source = std::fs::read_to_string(filename)
            .map_err(|e| Error::io(format!("cannot read module source: {}", e)).with_file(filename))?;
        if let Some(hook) = &options.instrument {
            source = hook(&source, filename);
        }
        // The pragma line is consumed here so statement line numbers keep
        // matching the original file.
        let instrumented = source.starts_with(COVERAGE_PRAGMA);
        if instrumented {
            source = match source.split_once('\n') {
                Some((_, rest)) => rest.to_string(),
                None => String::new(),
            };
        }
        let program = Rc::new(parse(&source).map_err(|e| e.with_file(filename))?);

        let wrapper: ModuleWrapper = Rc::new(move |scope| {
            Interpreter::new(scope, instrumented).run_module(&program)
        });
        Ok(Script::new(filename, wrapper))
    }
}

type Env = AHashMap<String, Value>;

/// Walks dialect statements against a module scope. Function literals
/// capture the scope and their defining environment by value.
struct Interpreter {
    scope: ModuleScope,
    instrumented: bool,
}

impl Interpreter {
    fn new(scope: ModuleScope, instrumented: bool) -> Self {
        Self {
            scope,
            instrumented,
        }
    }

    fn run_module(&self, program: &[Stmt]) -> Result<()> {
        let mut env = Env::new();
        self.exec_block(program, &mut env).map(|_| ())
    }

    fn exec_block(&self, statements: &[Stmt], env: &mut Env) -> Result<Option<Value>> {
        for statement in statements {
            self.record_line(statement.line());
            match statement {
                Stmt::Assign {
                    object,
                    property,
                    value,
                    ..
                } => {
                    let value = self.eval(value, env)?;
                    if matches!(object, Expr::Ident(name) if name == "module")
                        && property == "exports"
                    {
                        self.scope.module.set_exports(value);
                    } else {
                        self.eval(object, env)?.set(property.clone(), value);
                    }
                }
                Stmt::VarDecl { name, value, .. } => {
                    let value = self.eval(value, env)?;
                    env.insert(name.clone(), value);
                }
                Stmt::Return { value, .. } => {
                    let value = match value {
                        Some(expr) => self.eval(expr, env)?,
                        None => Value::Undefined,
                    };
                    return Ok(Some(value));
                }
                Stmt::Expression { value, .. } => {
                    self.eval(value, env)?;
                }
            }
        }
        Ok(None)
    }

    fn record_line(&self, line: u32) {
        if self.instrumented {
            self.scope
                .coverage
                .get("lines")
                .push(Value::Number(line as f64));
        }
    }

    fn eval(&self, expr: &Expr, env: &mut Env) -> Result<Value> {
        match expr {
            Expr::Undefined => Ok(Value::Undefined),
            Expr::Null => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::String(s.clone())),
            Expr::Ident(name) => self.lookup(name, env),
            Expr::Member { object, property } => {
                if matches!(&**object, Expr::Ident(name) if name == "module") {
                    return self.module_member(property);
                }
                Ok(self.eval(object, env)?.get(property))
            }
            Expr::Object(entries) => {
                let bag = Value::object();
                for (key, entry) in entries {
                    bag.set(key.clone(), self.eval(entry, env)?);
                }
                Ok(bag)
            }
            Expr::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, env)?);
                }
                Ok(Value::array(values))
            }
            Expr::Call { callee, args } => self.eval_call(callee, args, env),
            Expr::Function { params, body } => {
                let captured = env.clone();
                let scope = self.scope.clone();
                let instrumented = self.instrumented;
                let params = params.clone();
                let body = Rc::new(body.clone());
                Ok(Value::function("anonymous", move |args| {
                    let interpreter = Interpreter::new(scope.clone(), instrumented);
                    let mut env = captured.clone();
                    for (i, param) in params.iter().enumerate() {
                        env.insert(
                            param.clone(),
                            args.get(i).cloned().unwrap_or(Value::Undefined),
                        );
                    }
                    Ok(interpreter
                        .exec_block(&body, &mut env)?
                        .unwrap_or(Value::Undefined))
                }))
            }
        }
    }

    fn lookup(&self, name: &str, env: &Env) -> Result<Value> {
        match name {
            "exports" => Ok(self.scope.exports.clone()),
            "global" => Ok(self.scope.global.clone()),
            "__dirname" => Ok(Value::String(self.scope.dirname.display().to_string())),
            "__filename" => Ok(Value::String(self.scope.filename.display().to_string())),
            _ => env.get(name).cloned().ok_or_else(|| {
                Error::execution(format!("'{}' is not defined", name))
                    .with_file(&self.scope.filename)
            }),
        }
    }

    /// `module.<property>`: the record's own surface, including the
    /// sentinel parent view.
    fn module_member(&self, property: &str) -> Result<Value> {
        let record = &self.scope.module;
        Ok(match property {
            "exports" => record.exports(),
            "filename" => Value::String(record.filename.display().to_string()),
            "id" => Value::String(record.id.clone()),
            "parent" => match record.parent() {
                Some(parent) => Value::object_from([
                    (
                        "filename".to_string(),
                        Value::String(parent.filename.display().to_string()),
                    ),
                    ("id".to_string(), Value::String(parent.id.clone())),
                    ("exports".to_string(), parent.exports()),
                ]),
                None => Value::Undefined,
            },
            _ => Value::Undefined,
        })
    }

    fn eval_call(&self, callee: &Expr, args: &[Expr], env: &mut Env) -> Result<Value> {
        // require and its sibling entry points are special forms.
        if let Expr::Ident(name) = callee {
            if name == "require" {
                return self.scope.require.require(&self.call_specifier(args, env)?);
            }
        }
        if let Expr::Member { object, property } = callee {
            if matches!(&**object, Expr::Ident(name) if name == "require") {
                let specifier = self.call_specifier(args, env)?;
                return match property.as_str() {
                    "requireActual" => self.scope.require.require_actual(&specifier),
                    "requireMock" => self.scope.require.require_mock(&specifier),
                    "resolve" => self
                        .scope
                        .require
                        .resolve(&specifier)
                        .map(|p| Value::String(p.display().to_string())),
                    other => Err(Error::execution(format!(
                        "require.{} is not a function",
                        other
                    ))),
                };
            }
        }

        let callee = self.eval(callee, env)?;
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, env)?);
        }
        callee.call(&values)
    }

    fn call_specifier(&self, args: &[Expr], env: &mut Env) -> Result<String> {
        let first = args
            .first()
            .ok_or_else(|| Error::execution("require expects a specifier"))?;
        match self.eval(first, env)? {
            Value::String(s) => Ok(s),
            other => Err(Error::execution(format!(
                "require expects a string specifier, got {}",
                other.type_name()
            ))),
        }
    }
}
