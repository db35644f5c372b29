use nestlog_core::{field_value::FieldMap, ids::DocumentId, schema::Relation};

use crate::error::StorageError;

/// Where an embedded document sits inside its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub parent_id: DocumentId,
    pub relation: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRecord {
    pub doc_id: DocumentId,
    pub doc_type: String,
    /// `None` for root documents.
    pub placement: Option<Placement>,
    pub fields: FieldMap,
}

impl DocumentRecord {
    pub fn is_root(&self) -> bool {
        self.placement.is_none()
    }
}

/// Document hierarchy capabilities the history engine reads and writes through.
///
/// Each mutating call is atomic: it either fully applies or leaves the store
/// untouched.
pub trait DocumentStore {
    fn get_document(&self, doc_id: DocumentId) -> Result<Option<DocumentRecord>, StorageError>;

    /// Global lookup of a root document of `doc_type`.
    fn find_root(
        &self,
        doc_type: &str,
        doc_id: DocumentId,
    ) -> Result<Option<DocumentRecord>, StorageError>;

    /// Member `doc_id` of the collection `relation` on `parent`.
    fn find_member(
        &self,
        parent: DocumentId,
        relation: &str,
        doc_id: DocumentId,
    ) -> Result<Option<DocumentRecord>, StorageError>;

    /// Occupant of the singular relation `relation` on `parent`.
    fn find_singular(
        &self,
        parent: DocumentId,
        relation: &str,
    ) -> Result<Option<DocumentRecord>, StorageError>;

    /// Members of `relation` on `parent`, in insertion order.
    fn members(
        &self,
        parent: DocumentId,
        relation: &str,
    ) -> Result<Vec<DocumentRecord>, StorageError>;

    /// Insert a root document. An id already in use is a constraint violation.
    fn insert_root(
        &mut self,
        doc_id: DocumentId,
        doc_type: &str,
        fields: &FieldMap,
    ) -> Result<DocumentRecord, StorageError>;

    /// Embed a new document under `parent`. Inserting into a singular
    /// relation destroys the previous occupant.
    fn insert_member(
        &mut self,
        doc_id: DocumentId,
        parent: DocumentId,
        relation: &Relation,
        fields: &FieldMap,
    ) -> Result<DocumentRecord, StorageError>;

    /// Merge `fields` into the document, leaving other fields untouched.
    fn update_fields(&mut self, doc_id: DocumentId, fields: &FieldMap) -> Result<(), StorageError>;

    /// Remove the document and everything embedded in it.
    fn destroy(&mut self, doc_id: DocumentId) -> Result<(), StorageError>;
}
