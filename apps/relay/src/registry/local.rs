use async_trait::async_trait;
use dev_tunnel_common::{InvocationContext, TunnelError};
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};

use super::{Function, FunctionRef, Loader};

/// Function backed by a plain Rust closure
///
/// The closure runs synchronously on the task that invokes it.
pub struct FnFunction<F>(pub F);

#[async_trait]
impl<F> Function for FnFunction<F>
where
    F: Fn(Value, InvocationContext) -> anyhow::Result<Value> + Send + Sync,
{
    async fn invoke(&self, event: Value, context: InvocationContext) -> anyhow::Result<Value> {
        (self.0)(event, context)
    }
}

/// Loader over functions compiled into the embedding program
#[derive(Default)]
pub struct StaticLoader {
    functions: HashMap<FunctionRef, Arc<dyn Function>>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, reference: FunctionRef, function: Arc<dyn Function>) {
        self.functions.insert(reference, function);
    }

    pub fn register_fn<F>(&mut self, reference: FunctionRef, f: F)
    where
        F: Fn(Value, InvocationContext) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.register(reference, Arc::new(FnFunction(f)));
    }
}

#[async_trait]
impl Loader for StaticLoader {
    async fn load(&self, reference: &FunctionRef) -> anyhow::Result<Arc<dyn Function>> {
        self.functions
            .get(reference)
            .cloned()
            .ok_or_else(|| TunnelError::HandlerNotFound(reference.to_string()).into())
    }
}
