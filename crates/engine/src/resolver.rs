use tracing::{debug, trace, warn};

use nestlog_core::{history::AssociationStep, schema::Cardinality, Schema};
use nestlog_storage::{DocumentRecord, DocumentStore};

use crate::error::EngineError;

/// Live documents matching an association chain step for step, root first.
/// An entry is `None` when that step no longer resolves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedChain {
    entries: Vec<Option<DocumentRecord>>,
}

impl ResolvedChain {
    pub fn entries(&self) -> &[Option<DocumentRecord>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The document the record describes.
    pub fn trackable(&self) -> Option<&DocumentRecord> {
        self.entries.last().and_then(Option::as_ref)
    }

    pub fn trackable_root(&self) -> Option<&DocumentRecord> {
        self.entries.first().and_then(Option::as_ref)
    }

    /// Every entry except the trackable.
    pub fn trackable_parents(&self) -> &[Option<DocumentRecord>] {
        match self.entries.split_last() {
            Some((_, parents)) => parents,
            None => &[],
        }
    }

    /// Direct parent of the trackable, if the trackable is embedded.
    pub fn trackable_parent(&self) -> Option<&DocumentRecord> {
        self.trackable_parents().last().and_then(Option::as_ref)
    }

    /// Index of the first step that did not resolve.
    pub fn first_gap(&self) -> Option<usize> {
        self.entries.iter().position(Option::is_none)
    }
}

/// Walks an association chain through the live hierarchy.
pub struct PathResolver<'a, S: DocumentStore + ?Sized> {
    schema: &'a Schema,
    store: &'a S,
}

impl<'a, S: DocumentStore + ?Sized> PathResolver<'a, S> {
    pub fn new(schema: &'a Schema, store: &'a S) -> Self {
        Self { schema, store }
    }

    pub fn resolve(&self, chain: &[AssociationStep]) -> Result<ResolvedChain, EngineError> {
        let (root, rest) = chain.split_first().ok_or(EngineError::EmptyChain)?;

        let mut entries = Vec::with_capacity(chain.len());
        let mut doc = self.resolve_root(root)?;

        for (offset, step) in rest.iter().enumerate() {
            let Some(parent) = doc.as_ref() else {
                break;
            };
            let next = self.resolve_step(parent, step)?;
            trace!(step = offset + 1, name = %step.name, found = next.is_some(), "resolved step");
            entries.push(doc);
            doc = next;
        }
        entries.push(doc);
        // Steps past a gap have no parent to resolve against.
        entries.resize(chain.len(), None);

        if let Some(step) = entries.iter().position(Option::is_none) {
            debug!(step, name = %chain[step].name, "association chain has a gap");
        }

        Ok(ResolvedChain { entries })
    }

    fn resolve_root(&self, step: &AssociationStep) -> Result<Option<DocumentRecord>, EngineError> {
        if !self.schema.is_root(&step.name) {
            return Err(EngineError::UnknownRootType(step.name.clone()));
        }
        let Some(id) = step.id else {
            warn!(name = %step.name, "root step carries no id");
            return Ok(None);
        };
        let doc = self.store.find_root(&step.name, id)?;
        trace!(step = 0, name = %step.name, found = doc.is_some(), "resolved root");
        Ok(doc)
    }

    fn resolve_step(
        &self,
        parent: &DocumentRecord,
        step: &AssociationStep,
    ) -> Result<Option<DocumentRecord>, EngineError> {
        let relation = self
            .schema
            .relation(&parent.doc_type, &step.name)
            .ok_or_else(|| EngineError::UnknownRelation {
                host: parent.doc_type.clone(),
                name: step.name.clone(),
            })?;

        match relation.cardinality {
            Cardinality::Collection => match step.id {
                Some(id) => Ok(self.store.find_member(parent.doc_id, &relation.name, id)?),
                None => {
                    warn!(host = %parent.doc_type, name = %step.name, "collection step carries no id");
                    Ok(None)
                }
            },
            Cardinality::Singular => Ok(self.store.find_singular(parent.doc_id, &relation.name)?),
        }
    }

    /// Declared type of the document the chain ends at, derived from the
    /// schema alone so it is known even when the chain does not resolve.
    pub fn trackable_type(&self, chain: &[AssociationStep]) -> Result<String, EngineError> {
        let (root, rest) = chain.split_first().ok_or(EngineError::EmptyChain)?;
        if !self.schema.is_root(&root.name) {
            return Err(EngineError::UnknownRootType(root.name.clone()));
        }
        let mut doc_type = root.name.clone();
        for step in rest {
            let relation = self.schema.relation(&doc_type, &step.name).ok_or_else(|| {
                EngineError::UnknownRelation {
                    host: doc_type.clone(),
                    name: step.name.clone(),
                }
            })?;
            doc_type = relation.target.clone();
        }
        Ok(doc_type)
    }
}
