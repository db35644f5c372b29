use tracing::{debug, info, warn};

use nestlog_core::{
    field_value::{FieldMap, FieldValue},
    history::{Action, HistoryRecord},
    ids::{ActorId, DocumentId},
    Schema,
};
use nestlog_storage::DocumentStore;

use crate::error::EngineError;
use crate::resolver::{PathResolver, ResolvedChain};

/// What an undo or redo did to the document store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Field assignments applied to an existing trackable.
    Updated {
        doc_id: DocumentId,
        attributes: FieldMap,
    },
    /// The trackable was brought back under its recorded id.
    Recreated { doc_id: DocumentId },
    Destroyed { doc_id: DocumentId },
    /// Nothing to destroy; the trackable is already gone.
    AlreadyAbsent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Undo,
    Redo,
}

/// Current value of every affected field: live from the trackable when it
/// resolves, otherwise the recorded post-mutation value.
pub fn affected(record: &HistoryRecord, chain: &ResolvedChain) -> FieldMap {
    let trackable = chain.trackable();
    record
        .affected_keys()
        .into_iter()
        .map(|key| {
            let value = match trackable {
                Some(doc) => doc.fields.get(key),
                None => record.modified.get(key),
            };
            (key.to_string(), value.cloned().unwrap_or(FieldValue::Null))
        })
        .collect()
}

/// Computes and applies undo/redo of history records against a document store.
pub struct ChangeReconciler<'a, S: DocumentStore + ?Sized> {
    schema: &'a Schema,
    store: &'a mut S,
}

impl<'a, S: DocumentStore + ?Sized> ChangeReconciler<'a, S> {
    pub fn new(schema: &'a Schema, store: &'a mut S) -> Self {
        Self { schema, store }
    }

    fn resolver(&self) -> PathResolver<'_, S> {
        PathResolver::new(self.schema, &*self.store)
    }

    pub fn resolve(&self, record: &HistoryRecord) -> Result<ResolvedChain, EngineError> {
        self.resolver().resolve(&record.association_chain)
    }

    pub fn undo(&mut self, record: &HistoryRecord, modifier: ActorId) -> Result<Outcome, EngineError> {
        debug!(record_id = %record.record_id, action = record.action.as_str(), "undo");
        match record.action {
            Action::Destroy => self.re_create(record),
            Action::Create => self.re_destroy(record),
            Action::Update => self.apply_update(record, modifier, Direction::Undo),
        }
    }

    /// Redo of a destroy assumes an earlier undo brought the document back.
    pub fn redo(&mut self, record: &HistoryRecord, modifier: ActorId) -> Result<Outcome, EngineError> {
        debug!(record_id = %record.record_id, action = record.action.as_str(), "redo");
        match record.action {
            Action::Destroy => self.re_destroy(record),
            Action::Create => self.re_create(record),
            Action::Update => self.apply_update(record, modifier, Direction::Redo),
        }
    }

    /// Affected values minus the recorded changes, with `original` restored
    /// and the modifier stamped. Fields the mutation introduced become null.
    pub fn undo_attributes(
        &self,
        record: &HistoryRecord,
        chain: &ResolvedChain,
        modifier: ActorId,
    ) -> Result<FieldMap, EngineError> {
        self.attributes(record, chain, modifier, Direction::Undo)
    }

    /// Affected values minus the pre-mutation keys, with `modified` reapplied
    /// and the modifier stamped. Fields the mutation removed become null.
    pub fn redo_attributes(
        &self,
        record: &HistoryRecord,
        chain: &ResolvedChain,
        modifier: ActorId,
    ) -> Result<FieldMap, EngineError> {
        self.attributes(record, chain, modifier, Direction::Redo)
    }

    fn attributes(
        &self,
        record: &HistoryRecord,
        chain: &ResolvedChain,
        modifier: ActorId,
        direction: Direction,
    ) -> Result<FieldMap, EngineError> {
        let (dropped, restored) = match direction {
            Direction::Undo => (&record.modified, &record.original),
            Direction::Redo => (&record.original, &record.modified),
        };

        let mut attrs = affected(record, chain);
        attrs.retain(|key, _| !dropped.contains_key(key));
        attrs.extend(restored.iter().map(|(k, v)| (k.clone(), v.clone())));
        // A key present on only one side had no value on the other.
        for key in dropped.keys() {
            attrs.entry(key.clone()).or_insert(FieldValue::Null);
        }

        let modifier_field = self.modifier_field(record, chain)?;
        attrs.insert(modifier_field, FieldValue::ActorRef(modifier));
        Ok(attrs)
    }

    fn modifier_field(&self, record: &HistoryRecord, chain: &ResolvedChain) -> Result<String, EngineError> {
        let doc_type = match chain.trackable() {
            Some(doc) => doc.doc_type.clone(),
            None => self.resolver().trackable_type(&record.association_chain)?,
        };
        match self.schema.modifier_field(&doc_type) {
            Some(field) => Ok(field.to_string()),
            None => Err(EngineError::SchemaConfiguration { doc_type }),
        }
    }

    fn apply_update(
        &mut self,
        record: &HistoryRecord,
        modifier: ActorId,
        direction: Direction,
    ) -> Result<Outcome, EngineError> {
        let chain = self.resolve(record)?;
        let Some(trackable) = chain.trackable() else {
            let step = chain.first_gap().unwrap_or(0);
            return Err(EngineError::ResolutionGap {
                step,
                name: record.association_chain[step].name.clone(),
            });
        };
        let doc_id = trackable.doc_id;
        let attributes = self.attributes(record, &chain, modifier, direction)?;

        let mut merged = trackable.fields.clone();
        merged.extend(attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.check_required(&trackable.doc_type, &merged)?;

        self.store
            .update_fields(doc_id, &attributes)
            .map_err(EngineError::from_persist)?;
        info!(%doc_id, fields = attributes.len(), ?direction, "applied field update");
        Ok(Outcome::Updated { doc_id, attributes })
    }

    /// Bring the trackable back: under its recorded parent when embedded,
    /// otherwise as a root document. The recorded id is reused so the
    /// record's chain resolves to the new document; singular steps that
    /// carry no id get a fresh one.
    fn re_create(&mut self, record: &HistoryRecord) -> Result<Outcome, EngineError> {
        let values = recreate_values(record);
        let doc_id = record
            .trackable_step()
            .and_then(|step| step.id)
            .unwrap_or_else(DocumentId::new);

        let created = if record.is_embedded() {
            let chain = self.resolve(record)?;
            let parent_step = chain.len() - 2;
            let Some(parent) = chain.trackable_parent() else {
                let step = chain.first_gap().unwrap_or(parent_step);
                return Err(EngineError::ResolutionGap {
                    step,
                    name: record.association_chain[step].name.clone(),
                });
            };
            if chain.trackable().is_some() {
                warn!(record_id = %record.record_id, "re-creating over a trackable that still resolves");
            }
            let step_name = &record.association_chain[parent_step + 1].name;
            let relation = self
                .schema
                .relation(&parent.doc_type, step_name)
                .cloned()
                .ok_or_else(|| EngineError::UnknownRelation {
                    host: parent.doc_type.clone(),
                    name: step_name.clone(),
                })?;
            self.check_required(&relation.target, &values)?;
            self.store
                .insert_member(doc_id, parent.doc_id, &relation, &values)
                .map_err(EngineError::from_persist)?
        } else {
            let doc_type = &record.association_chain[0].name;
            if !self.schema.is_root(doc_type) {
                return Err(EngineError::UnknownRootType(doc_type.clone()));
            }
            self.check_required(doc_type, &values)?;
            self.store
                .insert_root(doc_id, doc_type, &values)
                .map_err(EngineError::from_persist)?
        };

        info!(doc_id = %created.doc_id, doc_type = %created.doc_type, "re-created document");
        Ok(Outcome::Recreated {
            doc_id: created.doc_id,
        })
    }

    fn re_destroy(&mut self, record: &HistoryRecord) -> Result<Outcome, EngineError> {
        let chain = self.resolve(record)?;
        let Some(trackable) = chain.trackable() else {
            debug!(record_id = %record.record_id, "trackable already absent; nothing to destroy");
            return Ok(Outcome::AlreadyAbsent);
        };
        let doc_id = trackable.doc_id;
        self.store.destroy(doc_id)?;
        info!(%doc_id, "re-destroyed document");
        Ok(Outcome::Destroyed { doc_id })
    }

    fn check_required(&self, doc_type: &str, fields: &FieldMap) -> Result<(), EngineError> {
        let missing = self.schema.missing_required(doc_type, fields);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Validation(format!(
                "{doc_type} is missing required fields: {}",
                missing.join(", ")
            )))
        }
    }
}

/// Initial values for a re-created document: the pre-mutation snapshot with
/// the post-mutation snapshot laid over it.
fn recreate_values(record: &HistoryRecord) -> FieldMap {
    let mut values = record.original.clone();
    values.extend(record.modified.iter().map(|(k, v)| (k.clone(), v.clone())));
    values
}
