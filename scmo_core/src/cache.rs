use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::class::ScmoClass;
use crate::config::EngineConfig;
use crate::definition::ClassDefinition;
use crate::error::Result;
use crate::instance::ScmoInstance;

/// Source of class metadata for the cache.
pub trait ClassProvider: Send + Sync {
    fn class_definition(&self, namespace: &str, class_name: &str) -> Option<ClassDefinition>;
}

fn cache_key(namespace: &str, class_name: &str) -> (String, String) {
    (namespace.to_lowercase(), class_name.to_lowercase())
}

/// Provider over an in-memory set of definitions.
#[derive(Debug, Default, Clone)]
pub struct MemoryClassProvider {
    definitions: HashMap<(String, String), ClassDefinition>,
}

impl MemoryClassProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, definition: ClassDefinition) {
        let key = cache_key(&definition.namespace, &definition.class_name);
        self.definitions.insert(key, definition);
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl FromIterator<ClassDefinition> for MemoryClassProvider {
    fn from_iter<I: IntoIterator<Item = ClassDefinition>>(iter: I) -> Self {
        let mut provider = MemoryClassProvider::new();
        for definition in iter {
            provider.insert(definition);
        }
        provider
    }
}

impl ClassProvider for MemoryClassProvider {
    fn class_definition(&self, namespace: &str, class_name: &str) -> Option<ClassDefinition> {
        self.definitions.get(&cache_key(namespace, class_name)).cloned()
    }
}

/// Built classes keyed by case-folded namespace and class name. Lookups
/// share one `ScmoClass` handle per class.
pub struct ClassCache<P: ClassProvider> {
    provider: P,
    config: EngineConfig,
    classes: RwLock<HashMap<(String, String), ScmoClass>>,
}

impl<P: ClassProvider> ClassCache<P> {
    pub fn new(provider: P, config: EngineConfig) -> Self {
        Self {
            provider,
            config,
            classes: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// The cached class, building it through the provider on a miss.
    /// `Ok(None)` when the provider does not know the class.
    pub fn get(&self, namespace: &str, class_name: &str) -> Result<Option<ScmoClass>> {
        let key = cache_key(namespace, class_name);
        if let Some(class) = self.classes.read().get(&key) {
            return Ok(Some(class.clone()));
        }

        debug!(namespace, class = class_name, "class cache miss");
        let Some(definition) = self.provider.class_definition(namespace, class_name) else {
            return Ok(None);
        };
        let built = ScmoClass::build_with_config(&definition, &self.config)?;

        // Another thread may have built it meanwhile; keep the first one.
        let mut classes = self.classes.write();
        let class = classes.entry(key).or_insert(built);
        Ok(Some(class.clone()))
    }

    pub fn remove(&self, namespace: &str, class_name: &str) -> Option<ScmoClass> {
        self.classes.write().remove(&cache_key(namespace, class_name))
    }

    pub fn clear(&self) {
        self.classes.write().clear();
    }

    pub fn len(&self) -> usize {
        self.classes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.read().is_empty()
    }

    /// A fresh instance of the cached class. An unknown class yields an
    /// instance flagged as having no class.
    pub fn instance_for(&self, namespace: &str, class_name: &str) -> Result<ScmoInstance> {
        match self.get(namespace, class_name)? {
            Some(class) => ScmoInstance::with_config(&class, &self.config),
            None => ScmoInstance::without_class(namespace, class_name, &self.config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::PropertyDecl;
    use crate::types::CimType;
    use std::sync::Arc;
    use std::thread;

    fn provider() -> MemoryClassProvider {
        [
            ClassDefinition::new("root/cimv2", "CIM_Foo")
                .with_property(PropertyDecl::new("Id", CimType::String).key()),
            ClassDefinition::new("root/cimv2", "CIM_Bar"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn hits_share_one_class() {
        let cache = ClassCache::new(provider(), EngineConfig::default());
        let a = cache.get("root/cimv2", "CIM_Foo").unwrap().unwrap();
        let b = cache.get("ROOT/CIMV2", "cim_foo").unwrap().unwrap();
        assert!(a.is_same(&b));
        assert_eq!(cache.len(), 1);
        assert!(cache.get("root/cimv2", "Missing").unwrap().is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn remove_and_clear() {
        let cache = ClassCache::new(provider(), EngineConfig::default());
        let first = cache.get("root/cimv2", "CIM_Foo").unwrap().unwrap();
        cache.get("root/cimv2", "CIM_Bar").unwrap();
        assert_eq!(cache.len(), 2);

        assert!(cache.remove("root/cimv2", "cim_foo").is_some());
        let rebuilt = cache.get("root/cimv2", "CIM_Foo").unwrap().unwrap();
        assert!(!rebuilt.is_same(&first));

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn instance_for_unknown_class() {
        let cache = ClassCache::new(provider(), EngineConfig::default());
        let known = cache.instance_for("root/cimv2", "CIM_Foo").unwrap();
        assert!(!known.no_class_for_instance());
        assert_eq!(known.key_binding_count(), 1);

        let unknown = cache.instance_for("root/cimv2", "CIM_Gone").unwrap();
        assert!(unknown.no_class_for_instance());
        assert_eq!(unknown.class_name(), "CIM_Gone");
        assert_eq!(unknown.property_count(), 0);
    }

    #[test]
    fn concurrent_lookups() {
        let cache = Arc::new(ClassCache::new(provider(), EngineConfig::default()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.get("root/cimv2", "CIM_Foo").unwrap().unwrap())
            })
            .collect();
        let classes: Vec<ScmoClass> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let cached = cache.get("root/cimv2", "CIM_Foo").unwrap().unwrap();
        assert!(classes.iter().all(|c| c.is_same(&cached)));
    }
}
