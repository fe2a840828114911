//! Named global bindings injected into execution contexts.

use crate::marshal::IntoGuest;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A set of global bindings installed into a context when it is created.
///
/// Only the binding *names* take part in pool partitioning; values are
/// installed once per context and then frozen for its lifetime.
#[derive(Clone, Default)]
pub struct Globals {
    bindings: BTreeMap<String, Arc<dyn IntoGuest>>,
}

impl Globals {
    /// Create an empty binding set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding, replacing any previous binding of the same name.
    pub fn with(mut self, name: impl Into<String>, value: Arc<dyn IntoGuest>) -> Self {
        self.insert(name, value);
        self
    }

    /// Add a binding, replacing any previous binding of the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: Arc<dyn IntoGuest>) {
        self.bindings.insert(name.into(), value);
    }

    /// Binding names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.bindings.keys().cloned().collect()
    }

    /// Iterate over `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn IntoGuest>)> {
        self.bindings.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl fmt::Debug for Globals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.bindings.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_names_are_sorted() {
        let globals = Globals::new()
            .with("zeta", Arc::new(json!(1)))
            .with("alpha", Arc::new(json!(2)));
        assert_eq!(globals.names(), vec!["alpha".to_string(), "zeta".to_string()]);
        assert_eq!(globals.len(), 2);
    }

    #[test]
    fn test_insert_replaces() {
        let mut globals = Globals::new();
        globals.insert("x", Arc::new(json!(1)));
        globals.insert("x", Arc::new(json!(2)));
        assert_eq!(globals.len(), 1);
    }
}
