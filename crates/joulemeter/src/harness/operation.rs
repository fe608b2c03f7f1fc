//! Named operations and how the harness finds them.
//!
//! Operations are grouped into modules and addressed as `(module, operation)`.
//! Each declares its parameter names; the harness rejects invocations that
//! pass undeclared names before anything is measured.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::args::{Arguments, Value};

/// Failure raised by an operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct OperationError {
    message: String,
}

impl OperationError {
    /// Error with a free-form message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// A required argument was not supplied.
    pub fn missing_argument(name: &str) -> Self {
        Self::new(format!("missing required argument '{name}'"))
    }

    /// An argument had the wrong type.
    pub fn wrong_type(name: &str, expected: &str, got: &Value) -> Self {
        Self::new(format!(
            "argument '{name}' must be {expected}, got {} ({got})",
            got.type_name()
        ))
    }

    /// The message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<fmt::Error> for OperationError {
    fn from(_: fmt::Error) -> Self {
        Self::new("failed to format output")
    }
}

impl From<crate::data::DataError> for OperationError {
    fn from(e: crate::data::DataError) -> Self {
        Self::new(e.to_string())
    }
}

/// Something the harness can invoke and measure.
pub trait Operation: Send + Sync {
    /// Declared parameter names.
    fn params(&self) -> &[String];

    /// Run once. Text written to `out` becomes part of the run output.
    fn invoke(&self, args: &Arguments, out: &mut String) -> Result<Value, OperationError>;
}

/// An [`Operation`] backed by a closure.
pub struct FnOperation<F> {
    params: Vec<String>,
    func: F,
}

impl<F> FnOperation<F>
where
    F: Fn(&Arguments, &mut String) -> Result<Value, OperationError> + Send + Sync,
{
    /// Wrap `func` declaring `params`.
    pub fn new(params: &[&str], func: F) -> Self {
        Self {
            params: params.iter().map(|p| p.to_string()).collect(),
            func,
        }
    }
}

impl<F> Operation for FnOperation<F>
where
    F: Fn(&Arguments, &mut String) -> Result<Value, OperationError> + Send + Sync,
{
    fn params(&self) -> &[String] {
        &self.params
    }

    fn invoke(&self, args: &Arguments, out: &mut String) -> Result<Value, OperationError> {
        (self.func)(args, out)
    }
}

/// Lookup failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocateError {
    /// No module with that name.
    #[error("No module named '{0}'")]
    UnknownModule(String),
    /// The module has no such operation.
    #[error("Module '{module}' has no operation '{operation}'")]
    UnknownOperation {
        /// Module searched.
        module: String,
        /// Operation requested.
        operation: String,
    },
}

/// Resolves `(module, operation)` to an invocable operation.
pub trait OperationLocator: Send + Sync {
    /// Find the operation.
    fn locate(&self, module: &str, operation: &str) -> Result<Arc<dyn Operation>, LocateError>;
}

/// Static table of operations, built once at startup.
#[derive(Clone, Default)]
pub struct OperationRegistry {
    modules: BTreeMap<String, BTreeMap<String, Arc<dyn Operation>>>,
}

impl fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (module, ops) in &self.modules {
            map.entry(module, &ops.keys().collect::<Vec<_>>());
        }
        map.finish()
    }
}

impl OperationRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure as `module.name` with parameters `params`.
    pub fn register<F>(&mut self, module: &str, name: &str, params: &[&str], func: F) -> &mut Self
    where
        F: Fn(&Arguments, &mut String) -> Result<Value, OperationError> + Send + Sync + 'static,
    {
        self.register_operation(module, name, Arc::new(FnOperation::new(params, func)))
    }

    /// Register an existing operation, replacing any previous one.
    pub fn register_operation(
        &mut self,
        module: &str,
        name: &str,
        operation: Arc<dyn Operation>,
    ) -> &mut Self {
        self.modules
            .entry(module.to_string())
            .or_default()
            .insert(name.to_string(), operation);
        self
    }

    /// Module names, sorted.
    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// Operations of `module` with their parameters, sorted by name.
    pub fn operations(&self, module: &str) -> Vec<(&str, &[String])> {
        self.modules
            .get(module)
            .map(|ops| {
                ops.iter()
                    .map(|(name, op)| (name.as_str(), op.params()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl OperationLocator for OperationRegistry {
    fn locate(&self, module: &str, operation: &str) -> Result<Arc<dyn Operation>, LocateError> {
        let ops = self
            .modules
            .get(module)
            .ok_or_else(|| LocateError::UnknownModule(module.to_string()))?;
        ops.get(operation)
            .cloned()
            .ok_or_else(|| LocateError::UnknownOperation {
                module: module.to_string(),
                operation: operation.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write;

    fn registry() -> OperationRegistry {
        let mut ops = OperationRegistry::new();
        ops.register("math", "double", &["x"], |args, out| {
            let x = args.i64("x")?;
            writeln!(out, "doubling {x}")?;
            Ok(Value::Int(x * 2))
        })
        .register("math", "zero", &[], |_, _| Ok(Value::Int(0)));
        ops
    }

    #[test]
    fn test_locate_and_invoke() {
        let ops = registry();
        let double = ops.locate("math", "double").unwrap();
        assert_eq!(double.params(), ["x"]);

        let mut args = Arguments::new();
        args.insert("x", Value::Int(21));
        let mut out = String::new();
        assert_eq!(double.invoke(&args, &mut out).unwrap(), Value::Int(42));
        assert_eq!(out, "doubling 21\n");
    }

    #[test]
    fn test_locate_errors() {
        let ops = registry();
        assert_eq!(
            ops.locate("nope", "double").err(),
            Some(LocateError::UnknownModule("nope".into()))
        );
        assert!(matches!(
            ops.locate("math", "triple"),
            Err(LocateError::UnknownOperation { .. })
        ));
    }

    #[test]
    fn test_listing_is_sorted() {
        let ops = registry();
        assert_eq!(ops.modules().collect::<Vec<_>>(), ["math"]);
        let names: Vec<&str> = ops.operations("math").into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["double", "zero"]);
        assert!(ops.operations("missing").is_empty());
    }

    #[test]
    fn test_missing_argument_message() {
        let ops = registry();
        let err = ops
            .locate("math", "double")
            .unwrap()
            .invoke(&Arguments::new(), &mut String::new())
            .unwrap_err();
        assert_eq!(err.message(), "missing required argument 'x'");
    }
}
