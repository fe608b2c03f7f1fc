//! Explicit state shared by the front-end and the harness.
//!
//! A [`MeterContext`] starts empty. Operations are registered into it and
//! datasets are added with [`MeterContext::add_dataset`], which binds each one
//! under the next free name `df_0`, `df_1`, ... so that arguments can refer to
//! it by name.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::data::{load_csv, DataError, Dataset};
use crate::harness::{OperationRegistry, Value};

/// Prefix of generated dataset names.
pub const DATASET_PREFIX: &str = "df_";

/// Named values visible to argument coercion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    values: BTreeMap<String, Value>,
}

impl Bindings {
    /// No bindings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name`, replacing any previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Value bound to `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Whether `name` is bound.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Iterate over bindings sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Operations and bindings available to runs.
#[derive(Debug, Clone, Default)]
pub struct MeterContext {
    operations: OperationRegistry,
    bindings: Bindings,
    next_dataset: usize,
}

impl MeterContext {
    /// Empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered operations.
    pub fn operations(&self) -> &OperationRegistry {
        &self.operations
    }

    /// Registered operations, for adding more.
    pub fn operations_mut(&mut self) -> &mut OperationRegistry {
        &mut self.operations
    }

    /// Current bindings.
    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Bind an arbitrary value.
    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name, value);
    }

    /// Bind `dataset` under the next `df_<n>` name and return that name.
    pub fn insert_dataset(&mut self, dataset: Dataset) -> String {
        let name = loop {
            let candidate = format!("{DATASET_PREFIX}{}", self.next_dataset);
            self.next_dataset += 1;
            if !self.bindings.contains(&candidate) {
                break candidate;
            }
        };
        tracing::debug!(
            name = %name,
            rows = dataset.n_rows(),
            cols = dataset.n_cols(),
            "registered dataset"
        );
        self.bindings
            .insert(name.clone(), Value::Dataset(Arc::new(dataset)));
        name
    }

    /// Load a CSV file and bind it under the next `df_<n>` name.
    pub fn add_dataset(&mut self, path: &Path) -> Result<String, DataError> {
        let dataset = load_csv(path)?;
        Ok(self.insert_dataset(dataset))
    }
}
