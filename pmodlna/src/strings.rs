//! Registre de chaînes internées.
//!
//! Le parseur XML produit sans cesse les mêmes noms de nœuds ; le registre
//! les interne pour que les occurrences répétées partagent une seule
//! allocation. Les adresses retournées restent stables pendant toute la vie
//! du registre.

use std::collections::HashSet;
use std::sync::Arc;

/// Ensemble de chaînes internées.
#[derive(Debug, Default)]
pub struct StringRegistry {
    entries: HashSet<Arc<str>>,
}

impl StringRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retourne la chaîne internée, en l'ajoutant au registre si besoin.
    pub fn intern(&mut self, value: &str) -> Arc<str> {
        if let Some(existing) = self.entries.get(value) {
            return existing.clone();
        }
        let entry: Arc<str> = Arc::from(value);
        self.entries.insert(entry.clone());
        entry
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
    fn test_intern_shares_storage() {
        let mut registry = StringRegistry::new();
        let first = registry.intern("serviceType");
        let second = registry.intern("serviceType");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_intern_distinct() {
        let mut registry = StringRegistry::new();
        let a = registry.intern("UDN");
        let b = registry.intern("URLBase");
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 2);
    }
}
