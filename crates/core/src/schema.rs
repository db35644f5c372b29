use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::error::CoreError;
use crate::field_value::FieldMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    /// The host embeds many documents, addressed by member id.
    Collection,
    /// The host embeds at most one document.
    Singular,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub host: String,
    pub name: String,
    pub cardinality: Cardinality,
    pub target: String,
}

/// Per-type history tracking settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackingOptions {
    /// Field that records who last modified the document.
    pub modifier_field: Option<String>,
    /// Fields that must be present and non-null for the document to persist.
    pub required: Vec<String>,
}

impl TrackingOptions {
    pub fn with_modifier_field(field: impl Into<String>) -> Self {
        Self {
            modifier_field: Some(field.into()),
            required: Vec::new(),
        }
    }

    pub fn require(mut self, field: impl Into<String>) -> Self {
        self.required.push(field.into());
        self
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SchemaFile {
    roots: Vec<String>,
    types: BTreeMap<String, TrackingOptions>,
    relations: Vec<Relation>,
}

/// Document hierarchy description: which types live at the root, how types
/// embed each other, and how each type is tracked.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    roots: BTreeSet<String>,
    types: BTreeMap<String, TrackingOptions>,
    relations: BTreeMap<(String, String), Relation>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a type that lives at the root of the hierarchy.
    pub fn root(mut self, doc_type: impl Into<String>) -> Self {
        self.roots.insert(doc_type.into());
        self
    }

    pub fn track(mut self, doc_type: impl Into<String>, options: TrackingOptions) -> Self {
        self.types.insert(doc_type.into(), options);
        self
    }

    pub fn embeds_many(
        self,
        host: impl Into<String>,
        name: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        self.relate(host.into(), name.into(), Cardinality::Collection, target.into())
    }

    pub fn embeds_one(
        self,
        host: impl Into<String>,
        name: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        self.relate(host.into(), name.into(), Cardinality::Singular, target.into())
    }

    fn relate(mut self, host: String, name: String, cardinality: Cardinality, target: String) -> Self {
        self.relations.insert(
            (host.clone(), name.clone()),
            Relation {
                host,
                name,
                cardinality,
                target,
            },
        );
        self
    }

    pub fn from_toml_str(s: &str) -> Result<Self, CoreError> {
        let file: SchemaFile =
            toml::from_str(s).map_err(|e| CoreError::Config(format!("failed to parse schema: {e}")))?;

        let mut schema = Schema::new();
        for root in file.roots {
            schema = schema.root(root);
        }
        for (doc_type, options) in file.types {
            schema = schema.track(doc_type, options);
        }
        for relation in file.relations {
            let key = (relation.host.clone(), relation.name.clone());
            if schema.relations.contains_key(&key) {
                return Err(CoreError::InvalidSchema(format!(
                    "relation {}.{} declared twice",
                    relation.host, relation.name
                )));
            }
            schema.relations.insert(key, relation);
        }
        schema.validate()?;
        Ok(schema)
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml_str(&contents)
    }

    /// Every relation host must be reachable: a root or the target of another relation.
    pub fn validate(&self) -> Result<(), CoreError> {
        let targets: BTreeSet<&str> = self.relations.values().map(|r| r.target.as_str()).collect();
        for relation in self.relations.values() {
            if !self.roots.contains(&relation.host) && !targets.contains(relation.host.as_str()) {
                return Err(CoreError::InvalidSchema(format!(
                    "relation {}.{} hangs off unreachable type {}",
                    relation.host, relation.name, relation.host
                )));
            }
        }
        Ok(())
    }

    pub fn is_root(&self, doc_type: &str) -> bool {
        self.roots.contains(doc_type)
    }

    pub fn relation(&self, host: &str, name: &str) -> Option<&Relation> {
        self.relations.get(&(host.to_string(), name.to_string()))
    }

    pub fn options(&self, doc_type: &str) -> Option<&TrackingOptions> {
        self.types.get(doc_type)
    }

    pub fn modifier_field(&self, doc_type: &str) -> Option<&str> {
        self.options(doc_type)
            .and_then(|o| o.modifier_field.as_deref())
    }

    /// Required fields of `doc_type` that are absent or null in `fields`.
    pub fn missing_required<'a>(&'a self, doc_type: &str, fields: &FieldMap) -> Vec<&'a str> {
        let Some(options) = self.options(doc_type) else {
            return Vec::new();
        };
        options
            .required
            .iter()
            .filter(|f| fields.get(f.as_str()).is_none_or(|v| v.is_null()))
            .map(String::as_str)
            .collect()
    }
}
