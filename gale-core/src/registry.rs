//! Name-keyed lookup tables, one per component domain.
//!
//! Registries are populated once at startup by explicit `register` calls and
//! are then only read. Lookups never construct anything; they hand the
//! stored entry back so the caller can instantiate it.

use crate::error::RegistryError;
use std::collections::BTreeMap;
use tracing::debug;

/// A named lookup table for one component domain (backbones, heads, ...).
#[derive(Debug, Clone)]
pub struct Registry<E> {
    domain: &'static str,
    entries: BTreeMap<String, E>,
}

impl<E> Registry<E> {
    pub fn new(domain: &'static str) -> Self {
        Self {
            domain,
            entries: BTreeMap::new(),
        }
    }

    /// Label used in log lines and error messages.
    pub fn domain(&self) -> &'static str {
        self.domain
    }

    /// Register an entry. Returns error if the name is already taken.
    pub fn register(&mut self, name: impl Into<String>, entry: E) -> Result<(), RegistryError> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(RegistryError::DuplicateKey {
                domain: self.domain.to_string(),
                name,
            });
        }
        debug!(domain = self.domain, name = %name, "Registering entry");
        self.entries.insert(name, entry);
        Ok(())
    }

    /// Get an entry by name. The error lists every valid name.
    pub fn get(&self, name: &str) -> Result<&E, RegistryError> {
        self.entries.get(name).ok_or_else(|| RegistryError::NotFound {
            domain: self.domain.to_string(),
            name: name.to_string(),
            available: self.names(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &E)> {
        self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_new() {
        let registry: Registry<u32> = Registry::new("widget");
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert_eq!(registry.domain(), "widget");
    }

    #[test]
    fn test_register_then_get() {
        let mut registry = Registry::new("widget");
        registry.register("gear", 7u32).unwrap();
        assert_eq!(registry.get("gear").unwrap(), &7);
        assert!(registry.contains("gear"));
    }

    #[test]
    fn test_register_duplicate() {
        let mut registry = Registry::new("widget");
        registry.register("gear", 1u32).unwrap();

        let result = registry.register("gear", 2u32);
        match result.unwrap_err() {
            RegistryError::DuplicateKey { domain, name } => {
                assert_eq!(domain, "widget");
                assert_eq!(name, "gear");
            }
            other => panic!("Expected DuplicateKey error, got {other:?}"),
        }
        // first registration wins
        assert_eq!(registry.get("gear").unwrap(), &1);
    }

    #[test]
    fn test_get_missing_lists_names() {
        let mut registry = Registry::new("widget");
        registry.register("sprocket", 1u32).unwrap();
        registry.register("gear", 2u32).unwrap();

        match registry.get("cog").unwrap_err() {
            RegistryError::NotFound {
                name, available, ..
            } => {
                assert_eq!(name, "cog");
                assert_eq!(available, vec!["gear", "sprocket"]);
            }
            other => panic!("Expected NotFound error, got {other:?}"),
        }
    }

    #[test]
    fn test_registries_are_independent() {
        let mut backbones = Registry::new("backbone");
        let heads: Registry<u32> = Registry::new("head");
        backbones.register("shared", 1u32).unwrap();
        assert!(!heads.contains("shared"));
    }
}
