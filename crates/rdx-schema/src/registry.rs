use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rdx_core::types::{FileTypeTag, SchemaId};
use rdx_core::{RdxError, Result};
use rdx_lcm::LcmStore;

use crate::builtin::BuiltinSchema;
use crate::definition::SchemaDefinition;

#[derive(Default)]
struct Cache {
    by_id: HashMap<SchemaId, Arc<SchemaDefinition>>,
    by_key: HashMap<(String, i32), SchemaId>,
}

/// Owns the schema cache and is the only path that writes schema
/// definitions into the corpus store.
pub struct SchemaRegistry {
    store: Arc<dyn LcmStore>,
    cache: RwLock<Cache>,
    builtin_ids: [SchemaId; 7],
}

impl SchemaRegistry {
    /// Registers the built-in catalogue in order.
    pub fn new(store: Arc<dyn LcmStore>) -> Result<Self> {
        let mut registry = Self {
            store,
            cache: RwLock::new(Cache::default()),
            builtin_ids: [0; 7],
        };
        for builtin in BuiltinSchema::ALL {
            let id = registry.register(builtin.definition())?;
            if id != builtin.well_known_id() {
                tracing::warn!(
                    schema = builtin.name(),
                    expected = builtin.well_known_id(),
                    assigned = id,
                    "Built-in schema registered under a non-standard id"
                );
            }
            registry.builtin_ids[builtin.index()] = id;
        }
        tracing::debug!("Schema registry initialized with {} built-ins", BuiltinSchema::ALL.len());
        Ok(registry)
    }

    /// Validate, persist and cache a definition. `(name, version)` is the
    /// idempotency key: registering it again returns the same id.
    pub fn register(&self, definition: SchemaDefinition) -> Result<SchemaId> {
        let mut compiled = definition.compile()?;
        let key = (compiled.name.clone(), compiled.version);
        if let Some(&id) = self.cache.read().by_key.get(&key) {
            return Ok(id);
        }

        let json = compiled.to_json()?;
        let id = self
            .store
            .get_or_create_schema_id(&compiled.name, compiled.version, &json)?;
        compiled.schema_id = id;

        let mut cache = self.cache.write();
        cache.by_key.entry(key).or_insert(id);
        cache.by_id.entry(id).or_insert_with(|| Arc::new(compiled));
        Ok(id)
    }

    /// Cached id for this definition's `(name, version)`, registering it if needed.
    pub fn resolve_id(&self, definition: &SchemaDefinition) -> Result<SchemaId> {
        if let Some(id) = self.schema_id(&definition.name, definition.version) {
            return Ok(id);
        }
        self.register(definition.clone())
    }

    pub fn schema_id(&self, name: &str, version: i32) -> Option<SchemaId> {
        self.cache
            .read()
            .by_key
            .get(&(name.to_string(), version))
            .copied()
    }

    /// Served from cache, else loaded from the store and re-compiled.
    pub fn schema_by_id(&self, id: SchemaId) -> Result<Arc<SchemaDefinition>> {
        if let Some(def) = self.cache.read().by_id.get(&id) {
            return Ok(Arc::clone(def));
        }
        let json = self
            .store
            .load_schema_definition(id)?
            .ok_or(RdxError::SchemaNotFound(id))?;
        let mut def = SchemaDefinition::from_json(&json)?;
        def.schema_id = id;

        let mut cache = self.cache.write();
        cache
            .by_key
            .entry((def.name.clone(), def.version))
            .or_insert(id);
        let def = cache.by_id.entry(id).or_insert_with(|| Arc::new(def));
        Ok(Arc::clone(def))
    }

    pub fn builtin(&self, which: BuiltinSchema) -> Result<Arc<SchemaDefinition>> {
        self.schema_by_id(self.builtin_ids[which.index()])
    }

    pub fn builtin_id(&self, which: BuiltinSchema) -> SchemaId {
        self.builtin_ids[which.index()]
    }

    pub fn default_schema_for(&self, file_type: FileTypeTag) -> Result<Arc<SchemaDefinition>> {
        self.builtin(BuiltinSchema::for_file_type(file_type))
    }

    /// Every cached schema, by id.
    pub fn list(&self) -> Vec<Arc<SchemaDefinition>> {
        let cache = self.cache.read();
        let mut all: Vec<Arc<SchemaDefinition>> = cache.by_id.values().cloned().collect();
        all.sort_by_key(|d| d.schema_id);
        all
    }
}
