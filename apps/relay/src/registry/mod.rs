//! Resolution of local user code
//!
//! A deployed function points at `module.handler`. On the developer machine
//! the same reference is resolved through a [`Loader`], and the result is
//! cached so each code unit is loaded once per process.

use async_trait::async_trait;
use dev_tunnel_common::{InvocationContext, validation::ValidationError};
use serde_json::Value;
use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    sync::{Arc, RwLock},
};
use tracing::info;

mod local;
mod process;
mod remote;

pub use local::{FnFunction, StaticLoader};
pub use process::ProcessLoader;
pub use remote::HttpLoader;

/// Reference to a handler: code unit plus exported function
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionRef {
    pub module: String,
    pub function: String,
}

impl FunctionRef {
    pub fn new(module: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            function: function.into(),
        }
    }
}

impl FromStr for FunctionRef {
    type Err = ValidationError;

    /// Parse `module.handler`; the last `.` separates the function name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once('.') {
            Some((module, function)) if !module.is_empty() && !function.is_empty() => {
                Ok(Self::new(module, function))
            }
            _ => Err(ValidationError::InvalidFunctionRef(s.to_string())),
        }
    }
}

impl fmt::Display for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.function)
    }
}

/// Locally runnable user code
#[async_trait]
pub trait Function: Send + Sync {
    async fn invoke(&self, event: Value, context: InvocationContext) -> anyhow::Result<Value>;
}

/// Turns a reference into runnable code
#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(&self, reference: &FunctionRef) -> anyhow::Result<Arc<dyn Function>>;
}

/// Cache of loaded functions in front of a loader
pub struct FunctionRegistry {
    loader: Arc<dyn Loader>,
    loaded: RwLock<HashMap<FunctionRef, Arc<dyn Function>>>,
}

impl FunctionRegistry {
    pub fn new(loader: Arc<dyn Loader>) -> Self {
        Self {
            loader,
            loaded: RwLock::new(HashMap::new()),
        }
    }

    /// Return the function for `reference`, loading it on first use
    pub async fn resolve(&self, reference: &FunctionRef) -> anyhow::Result<Arc<dyn Function>> {
        if let Some(function) = self.cached(reference) {
            return Ok(function);
        }

        let function = self.loader.load(reference).await?;
        info!("Loaded {}", reference);

        let mut loaded = self
            .loaded
            .write()
            .map_err(|_| anyhow::anyhow!("Function cache lock poisoned"))?;
        Ok(loaded.entry(reference.clone()).or_insert(function).clone())
    }

    pub fn is_loaded(&self, reference: &FunctionRef) -> bool {
        self.cached(reference).is_some()
    }

    fn cached(&self, reference: &FunctionRef) -> Option<Arc<dyn Function>> {
        self.loaded.read().ok()?.get(reference).cloned()
    }
}
