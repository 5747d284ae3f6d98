//! Namespace routing for IPC handlers.
//!
//! `"case.confirm"` is split on the first `.` and dispatched to the `"case"`
//! handler as `handle("confirm", params)`. Methods without a recognised
//! namespace go to the default handler, if one is set.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::protocol::RpcError;
use crate::server::{HandlerResult, IpcHandler};

pub struct NamespacedHandler {
    handlers: HashMap<String, Arc<dyn IpcHandler>>,
    default: Option<Arc<dyn IpcHandler>>,
}

impl NamespacedHandler {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            default: None,
        }
    }

    pub fn add_namespace(&mut self, prefix: &str, handler: Arc<dyn IpcHandler>) {
        self.handlers.insert(prefix.to_string(), handler);
    }

    pub fn set_default(&mut self, handler: Arc<dyn IpcHandler>) {
        self.default = Some(handler);
    }

    /// Registered namespace prefixes, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for NamespacedHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl IpcHandler for NamespacedHandler {
    fn handle(&self, method: &str, params: Option<Value>) -> HandlerResult<'_> {
        let (handler, stripped) = match method.split_once('.') {
            Some((ns, rest)) => match self.handlers.get(ns) {
                Some(h) => (Some(h), rest.to_string()),
                None => (self.default.as_ref(), method.to_string()),
            },
            None => (self.default.as_ref(), method.to_string()),
        };

        match handler {
            Some(h) => h.handle(&stripped, params),
            None => {
                let err = RpcError::method_not_found(method);
                Box::pin(async move { Err(err) })
            }
        }
    }
}
