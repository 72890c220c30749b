//! Named groups of callable functions.

use super::function::{CallContext, FunctionDescriptor, HandlerError, HandlerResult};
use crate::value::{Value, ValueType};
use crate::{ProcallError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Per-collection check that runs after argument validation and before the
/// handler. Returning an error skips the handler and becomes the response.
pub trait DispatchHook: Send + Sync + 'static {
    fn before_call(&self, ctx: &CallContext, args: &[Value]) -> std::result::Result<(), HandlerError>;
}

impl<F> DispatchHook for F
where
    F: Fn(&CallContext, &[Value]) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
{
    fn before_call(&self, ctx: &CallContext, args: &[Value]) -> std::result::Result<(), HandlerError> {
        (self)(ctx, args)
    }
}

/// A named group of functions, analogous to a remote interface.
pub struct Collection {
    name: String,
    functions: HashMap<String, Arc<FunctionDescriptor>>,
    hook: Option<Arc<dyn DispatchHook>>,
}

impl Collection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: HashMap::new(),
            hook: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a function; a name that is already registered is rejected.
    pub fn register_function(&mut self, descriptor: FunctionDescriptor) -> Result<()> {
        if self.functions.contains_key(descriptor.name()) {
            return Err(ProcallError::DuplicateFunction {
                collection: self.name.clone(),
                function: descriptor.name().to_string(),
            });
        }
        self.functions
            .insert(descriptor.name().to_string(), Arc::new(descriptor));
        Ok(())
    }

    /// Chaining form of [`register_function`](Self::register_function) for
    /// async closures.
    ///
    /// ```rust,ignore
    /// let properties = Collection::new("Properties")
    ///     .with_function("Clicked", &[ValueType::UInt64, ValueType::String], clicked)?
    ///     .with_function("Modified", &[ValueType::UInt64, ValueType::String, ValueType::String], modified)?;
    /// ```
    pub fn with_function<F, Fut>(
        mut self,
        name: impl Into<String>,
        params: &[ValueType],
        f: F,
    ) -> Result<Self>
    where
        F: Fn(CallContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register_function(FunctionDescriptor::from_fn(name, params, f))?;
        Ok(self)
    }

    /// Chaining form for a prebuilt descriptor (struct or blocking handlers).
    pub fn with_descriptor(mut self, descriptor: FunctionDescriptor) -> Result<Self> {
        self.register_function(descriptor)?;
        Ok(self)
    }

    pub fn set_hook(&mut self, hook: impl DispatchHook) {
        self.hook = Some(Arc::new(hook));
    }

    pub fn with_hook(mut self, hook: impl DispatchHook) -> Self {
        self.set_hook(hook);
        self
    }

    pub fn hook(&self) -> Option<&Arc<dyn DispatchHook>> {
        self.hook.as_ref()
    }

    pub fn get(&self, function: &str) -> Option<&Arc<FunctionDescriptor>> {
        self.functions.get(function)
    }

    /// Registered functions, sorted by name.
    pub fn functions(&self) -> Vec<&Arc<FunctionDescriptor>> {
        let mut functions: Vec<_> = self.functions.values().collect();
        functions.sort_by(|a, b| a.name().cmp(b.name()));
        functions
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Function names and signatures, sorted by name.
    pub fn summary(&self) -> CollectionSummary {
        CollectionSummary {
            name: self.name.clone(),
            functions: self
                .functions()
                .into_iter()
                .map(|f| FunctionSummary {
                    name: f.name().to_string(),
                    params: f.params().to_vec(),
                })
                .collect(),
        }
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("functions", &names)
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

/// Serializable description of a collection, for introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSummary {
    pub name: String,
    pub functions: Vec<FunctionSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSummary {
    pub name: String,
    pub params: Vec<ValueType>,
}
