use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::instrumentation::{Interceptor, OperationDescriptor};

type HookKey = (&'static str, &'static str);

/// Installed interceptors keyed by (vendor, method).
///
/// Read on every decorated call, written only by install and uninstall.
#[derive(Default)]
pub struct HookTable {
    hooks: RwLock<HashMap<HookKey, Arc<Interceptor>>>,
}

impl HookTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `interceptor` for the descriptor's method, returning the one it replaces.
    pub fn replace(
        &self,
        descriptor: &'static OperationDescriptor,
        interceptor: Arc<Interceptor>,
    ) -> Option<Arc<Interceptor>> {
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((descriptor.vendor.system, descriptor.method), interceptor)
    }

    pub fn lookup(&self, vendor: &'static str, method: &'static str) -> Option<Arc<Interceptor>> {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(vendor, method))
            .cloned()
    }

    /// Drop every hook of `vendor`; returns how many were removed.
    pub fn remove_vendor(&self, vendor: &str) -> usize {
        let mut hooks = self.hooks.write().unwrap_or_else(PoisonError::into_inner);
        let before = hooks.len();
        hooks.retain(|(v, _), _| *v != vendor);
        before - hooks.len()
    }

    pub fn len(&self) -> usize {
        self.hooks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
