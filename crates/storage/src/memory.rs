use std::collections::BTreeMap;

use tracing::debug;

use nestlog_core::{
    field_value::FieldMap,
    ids::DocumentId,
    schema::{Cardinality, Relation},
};

use crate::error::StorageError;
use crate::traits::{DocumentRecord, DocumentStore, Placement};

struct Node {
    seq: u64,
    record: DocumentRecord,
}

/// Map-backed document store for tests and embedding.
#[derive(Default)]
pub struct MemoryDocumentStore {
    nodes: BTreeMap<DocumentId, Node>,
    next_seq: u64,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn placed_under<'a>(
        &'a self,
        parent: DocumentId,
        relation: &'a str,
    ) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes.values().filter(move |n| {
            n.record
                .placement
                .as_ref()
                .is_some_and(|p| p.parent_id == parent && p.relation == relation)
        })
    }

    fn check_unused(&self, doc_id: DocumentId) -> Result<(), StorageError> {
        if self.nodes.contains_key(&doc_id) {
            return Err(StorageError::ConstraintViolation(format!(
                "{doc_id}: document id already in use"
            )));
        }
        Ok(())
    }

    fn insert(&mut self, record: DocumentRecord) -> DocumentRecord {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.nodes.insert(
            record.doc_id,
            Node {
                seq,
                record: record.clone(),
            },
        );
        record
    }

    /// Ids of `doc_id` and every document embedded below it.
    fn subtree(&self, doc_id: DocumentId) -> Vec<DocumentId> {
        let mut out = vec![doc_id];
        let mut cursor = 0;
        while cursor < out.len() {
            let current = out[cursor];
            out.extend(
                self.nodes
                    .values()
                    .filter(|n| n.record.placement.as_ref().is_some_and(|p| p.parent_id == current))
                    .map(|n| n.record.doc_id),
            );
            cursor += 1;
        }
        out
    }

    fn remove_subtree(&mut self, doc_id: DocumentId) -> usize {
        let ids = self.subtree(doc_id);
        for id in &ids {
            self.nodes.remove(id);
        }
        ids.len()
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn get_document(&self, doc_id: DocumentId) -> Result<Option<DocumentRecord>, StorageError> {
        Ok(self.nodes.get(&doc_id).map(|n| n.record.clone()))
    }

    fn find_root(
        &self,
        doc_type: &str,
        doc_id: DocumentId,
    ) -> Result<Option<DocumentRecord>, StorageError> {
        Ok(self
            .nodes
            .get(&doc_id)
            .filter(|n| n.record.is_root() && n.record.doc_type == doc_type)
            .map(|n| n.record.clone()))
    }

    fn find_member(
        &self,
        parent: DocumentId,
        relation: &str,
        doc_id: DocumentId,
    ) -> Result<Option<DocumentRecord>, StorageError> {
        Ok(self
            .placed_under(parent, relation)
            .find(|n| n.record.doc_id == doc_id)
            .map(|n| n.record.clone()))
    }

    fn find_singular(
        &self,
        parent: DocumentId,
        relation: &str,
    ) -> Result<Option<DocumentRecord>, StorageError> {
        Ok(self
            .placed_under(parent, relation)
            .max_by_key(|n| n.seq)
            .map(|n| n.record.clone()))
    }

    fn members(
        &self,
        parent: DocumentId,
        relation: &str,
    ) -> Result<Vec<DocumentRecord>, StorageError> {
        let mut nodes: Vec<&Node> = self.placed_under(parent, relation).collect();
        nodes.sort_by_key(|n| n.seq);
        Ok(nodes.into_iter().map(|n| n.record.clone()).collect())
    }

    fn insert_root(
        &mut self,
        doc_id: DocumentId,
        doc_type: &str,
        fields: &FieldMap,
    ) -> Result<DocumentRecord, StorageError> {
        self.check_unused(doc_id)?;
        let record = self.insert(DocumentRecord {
            doc_id,
            doc_type: doc_type.to_string(),
            placement: None,
            fields: fields.clone(),
        });
        debug!(doc_id = %record.doc_id, doc_type, "inserted root document");
        Ok(record)
    }

    fn insert_member(
        &mut self,
        doc_id: DocumentId,
        parent: DocumentId,
        relation: &Relation,
        fields: &FieldMap,
    ) -> Result<DocumentRecord, StorageError> {
        if !self.nodes.contains_key(&parent) {
            return Err(StorageError::NotFound(format!("parent document {parent}")));
        }
        let occupants: Vec<DocumentId> = match relation.cardinality {
            Cardinality::Singular => self
                .placed_under(parent, &relation.name)
                .map(|n| n.record.doc_id)
                .collect(),
            Cardinality::Collection => Vec::new(),
        };
        // The outgoing occupant's id may be reused by its replacement.
        if !occupants.contains(&doc_id) {
            self.check_unused(doc_id)?;
        }
        for occupant in occupants {
            self.remove_subtree(occupant);
            debug!(%parent, relation = %relation.name, "replaced singular occupant");
        }
        let record = self.insert(DocumentRecord {
            doc_id,
            doc_type: relation.target.clone(),
            placement: Some(Placement {
                parent_id: parent,
                relation: relation.name.clone(),
            }),
            fields: fields.clone(),
        });
        debug!(doc_id = %record.doc_id, %parent, relation = %relation.name, "inserted embedded document");
        Ok(record)
    }

    fn update_fields(&mut self, doc_id: DocumentId, fields: &FieldMap) -> Result<(), StorageError> {
        let node = self
            .nodes
            .get_mut(&doc_id)
            .ok_or_else(|| StorageError::NotFound(format!("document {doc_id}")))?;
        node.record
            .fields
            .extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    fn destroy(&mut self, doc_id: DocumentId) -> Result<(), StorageError> {
        if !self.nodes.contains_key(&doc_id) {
            return Err(StorageError::NotFound(format!("document {doc_id}")));
        }
        let removed = self.remove_subtree(doc_id);
        debug!(%doc_id, removed, "destroyed document");
        Ok(())
    }
}
