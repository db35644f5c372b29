use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use nestlog_core::{
    field_value::{FieldMap, FieldValue},
    ids::DocumentId,
    schema::{Cardinality, Relation},
};

use crate::error::StorageError;
use crate::traits::{DocumentRecord, DocumentStore, Placement};

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

type DocumentRow = (Vec<u8>, String, Option<Vec<u8>>, Option<String>);

const SELECT_DOCUMENT: &str = "SELECT doc_id, doc_type, parent_id, relation FROM documents";

pub struct SqliteDocumentStore {
    conn: Connection,
}

impl SqliteDocumentStore {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn document_count(&self) -> Result<u64, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn read_fields(&self, doc_id: DocumentId) -> Result<FieldMap, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT field_key, value FROM fields WHERE doc_id = ?1")?;
        let rows = stmt.query_map(rusqlite::params![doc_id.as_bytes().as_slice()], |row| {
            let key: String = row.get(0)?;
            let val_bytes: Vec<u8> = row.get(1)?;
            Ok((key, val_bytes))
        })?;

        let mut fields = FieldMap::new();
        for row in rows {
            let (key, val_bytes) = row?;
            let value = FieldValue::from_msgpack(&val_bytes)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            fields.insert(key, value);
        }
        Ok(fields)
    }

    fn hydrate(&self, row: DocumentRow) -> Result<DocumentRecord, StorageError> {
        let (id_bytes, doc_type, parent_bytes, relation) = row;
        let doc_id = DocumentId::from_bytes(to_array::<16>(id_bytes, "doc_id")?);
        let placement = match (parent_bytes, relation) {
            (Some(parent_bytes), Some(relation)) => Some(Placement {
                parent_id: DocumentId::from_bytes(to_array::<16>(parent_bytes, "parent_id")?),
                relation,
            }),
            _ => None,
        };
        let fields = self.read_fields(doc_id)?;
        Ok(DocumentRecord {
            doc_id,
            doc_type,
            placement,
            fields,
        })
    }

    fn query_one(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<DocumentRecord>, StorageError> {
        let row: Option<DocumentRow> = self
            .conn
            .query_row(sql, params, |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })
            .optional()?;
        row.map(|r| self.hydrate(r)).transpose()
    }

    fn exists(&self, doc_id: DocumentId) -> Result<bool, StorageError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM documents WHERE doc_id = ?1",
                rusqlite::params![doc_id.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

fn write_fields(
    tx: &rusqlite::Transaction,
    doc_id: DocumentId,
    fields: &FieldMap,
) -> Result<(), StorageError> {
    for (key, value) in fields {
        let bytes = value
            .to_msgpack()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        tx.execute(
            "INSERT INTO fields (doc_id, field_key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT (doc_id, field_key) DO UPDATE SET value = excluded.value",
            rusqlite::params![doc_id.as_bytes().as_slice(), key, bytes],
        )?;
    }
    Ok(())
}

fn map_constraint(err: rusqlite::Error, doc_id: DocumentId) -> StorageError {
    match err {
        rusqlite::Error::SqliteFailure(e, msg)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StorageError::ConstraintViolation(format!(
                "{doc_id}: {}",
                msg.unwrap_or_else(|| "constraint failed".into())
            ))
        }
        other => StorageError::Sqlite(other),
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn get_document(&self, doc_id: DocumentId) -> Result<Option<DocumentRecord>, StorageError> {
        self.query_one(
            &format!("{SELECT_DOCUMENT} WHERE doc_id = ?1"),
            rusqlite::params![doc_id.as_bytes().as_slice()],
        )
    }

    fn find_root(
        &self,
        doc_type: &str,
        doc_id: DocumentId,
    ) -> Result<Option<DocumentRecord>, StorageError> {
        self.query_one(
            &format!("{SELECT_DOCUMENT} WHERE doc_id = ?1 AND doc_type = ?2 AND parent_id IS NULL"),
            rusqlite::params![doc_id.as_bytes().as_slice(), doc_type],
        )
    }

    fn find_member(
        &self,
        parent: DocumentId,
        relation: &str,
        doc_id: DocumentId,
    ) -> Result<Option<DocumentRecord>, StorageError> {
        self.query_one(
            &format!("{SELECT_DOCUMENT} WHERE doc_id = ?1 AND parent_id = ?2 AND relation = ?3"),
            rusqlite::params![
                doc_id.as_bytes().as_slice(),
                parent.as_bytes().as_slice(),
                relation,
            ],
        )
    }

    fn find_singular(
        &self,
        parent: DocumentId,
        relation: &str,
    ) -> Result<Option<DocumentRecord>, StorageError> {
        self.query_one(
            &format!(
                "{SELECT_DOCUMENT} WHERE parent_id = ?1 AND relation = ?2 ORDER BY rowid DESC LIMIT 1"
            ),
            rusqlite::params![parent.as_bytes().as_slice(), relation],
        )
    }

    fn members(
        &self,
        parent: DocumentId,
        relation: &str,
    ) -> Result<Vec<DocumentRecord>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_DOCUMENT} WHERE parent_id = ?1 AND relation = ?2 ORDER BY rowid"
        ))?;
        let rows = stmt
            .query_map(
                rusqlite::params![parent.as_bytes().as_slice(), relation],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?
            .collect::<Result<Vec<DocumentRow>, _>>()?;
        rows.into_iter().map(|r| self.hydrate(r)).collect()
    }

    fn insert_root(
        &mut self,
        doc_id: DocumentId,
        doc_type: &str,
        fields: &FieldMap,
    ) -> Result<DocumentRecord, StorageError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO documents (doc_id, doc_type) VALUES (?1, ?2)",
            rusqlite::params![doc_id.as_bytes().as_slice(), doc_type],
        )
        .map_err(|e| map_constraint(e, doc_id))?;
        write_fields(&tx, doc_id, fields)?;
        tx.commit()?;

        debug!(%doc_id, doc_type, fields = fields.len(), "inserted root document");
        Ok(DocumentRecord {
            doc_id,
            doc_type: doc_type.to_string(),
            placement: None,
            fields: fields.clone(),
        })
    }

    fn insert_member(
        &mut self,
        doc_id: DocumentId,
        parent: DocumentId,
        relation: &Relation,
        fields: &FieldMap,
    ) -> Result<DocumentRecord, StorageError> {
        if !self.exists(parent)? {
            return Err(StorageError::NotFound(format!("parent document {parent}")));
        }

        let tx = self.conn.transaction()?;
        if relation.cardinality == Cardinality::Singular {
            let replaced = tx.execute(
                "DELETE FROM documents WHERE parent_id = ?1 AND relation = ?2",
                rusqlite::params![parent.as_bytes().as_slice(), relation.name],
            )?;
            if replaced > 0 {
                debug!(%parent, relation = %relation.name, "replaced singular occupant");
            }
        }
        tx.execute(
            "INSERT INTO documents (doc_id, doc_type, parent_id, relation) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                doc_id.as_bytes().as_slice(),
                relation.target,
                parent.as_bytes().as_slice(),
                relation.name,
            ],
        )
        .map_err(|e| map_constraint(e, doc_id))?;
        write_fields(&tx, doc_id, fields)?;
        tx.commit()?;

        debug!(%doc_id, %parent, relation = %relation.name, "inserted embedded document");
        Ok(DocumentRecord {
            doc_id,
            doc_type: relation.target.clone(),
            placement: Some(Placement {
                parent_id: parent,
                relation: relation.name.clone(),
            }),
            fields: fields.clone(),
        })
    }

    fn update_fields(&mut self, doc_id: DocumentId, fields: &FieldMap) -> Result<(), StorageError> {
        if !self.exists(doc_id)? {
            return Err(StorageError::NotFound(format!("document {doc_id}")));
        }
        let tx = self.conn.transaction()?;
        write_fields(&tx, doc_id, fields)?;
        tx.commit()?;
        debug!(%doc_id, fields = fields.len(), "updated document fields");
        Ok(())
    }

    fn destroy(&mut self, doc_id: DocumentId) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        // Embedded descendants and their fields go with it via ON DELETE CASCADE.
        let removed = tx.execute(
            "DELETE FROM documents WHERE doc_id = ?1",
            rusqlite::params![doc_id.as_bytes().as_slice()],
        )?;
        tx.commit()?;
        if removed == 0 {
            return Err(StorageError::NotFound(format!("document {doc_id}")));
        }
        debug!(%doc_id, "destroyed document");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nestlog_core::field_value::field_map;

    fn posts() -> Relation {
        Relation {
            host: "Blog".into(),
            name: "Posts".into(),
            cardinality: Cardinality::Collection,
            target: "Post".into(),
        }
    }

    fn settings() -> Relation {
        Relation {
            host: "Blog".into(),
            name: "Settings".into(),
            cardinality: Cardinality::Singular,
            target: "Setting".into(),
        }
    }

    #[test]
    fn root_lookup_is_type_scoped() -> Result<(), StorageError> {
        let mut store = SqliteDocumentStore::open_in_memory()?;
        let blog = store.insert_root(DocumentId::new(), "Blog", &field_map([("title", "Notes")]))?;

        let found = store.find_root("Blog", blog.doc_id)?;
        assert_eq!(found.as_ref().map(|d| &d.fields), Some(&blog.fields));
        assert!(store.find_root("Post", blog.doc_id)?.is_none());
        Ok(())
    }

    #[test]
    fn member_lookup_respects_parent_and_relation() -> Result<(), StorageError> {
        let mut store = SqliteDocumentStore::open_in_memory()?;
        let blog = store.insert_root(DocumentId::new(), "Blog", &FieldMap::new())?;
        let other = store.insert_root(DocumentId::new(), "Blog", &FieldMap::new())?;
        let post = store.insert_member(DocumentId::new(), blog.doc_id, &posts(), &field_map([("title", "First")]))?;

        assert!(store.find_member(blog.doc_id, "Posts", post.doc_id)?.is_some());
        assert!(store.find_member(other.doc_id, "Posts", post.doc_id)?.is_none());
        assert!(store.find_member(blog.doc_id, "Drafts", post.doc_id)?.is_none());
        assert!(store.find_root("Post", post.doc_id)?.is_none());
        Ok(())
    }

    #[test]
    fn singular_insert_replaces_occupant() -> Result<(), StorageError> {
        let mut store = SqliteDocumentStore::open_in_memory()?;
        let blog = store.insert_root(DocumentId::new(), "Blog", &FieldMap::new())?;
        let first = store.insert_member(DocumentId::new(), blog.doc_id, &settings(), &field_map([("theme", "dark")]))?;
        let second = store.insert_member(DocumentId::new(), blog.doc_id, &settings(), &field_map([("theme", "light")]))?;

        let current = store.find_singular(blog.doc_id, "Settings")?;
        assert_eq!(current.map(|d| d.doc_id), Some(second.doc_id));
        assert!(store.get_document(first.doc_id)?.is_none());
        Ok(())
    }

    #[test]
    fn update_merges_fields() -> Result<(), StorageError> {
        let mut store = SqliteDocumentStore::open_in_memory()?;
        let blog = store.insert_root(DocumentId::new(), "Blog", &field_map([("title", "Old"), ("slug", "old")]))?;
        store.update_fields(blog.doc_id, &field_map([("title", "New")]))?;

        let fields = store.get_document(blog.doc_id)?.map(|d| d.fields).unwrap_or_default();
        assert_eq!(fields, field_map([("title", "New"), ("slug", "old")]));
        Ok(())
    }

    #[test]
    fn update_of_missing_document_is_not_found() -> Result<(), StorageError> {
        let mut store = SqliteDocumentStore::open_in_memory()?;
        let result = store.update_fields(DocumentId::new(), &field_map([("title", "x")]));
        assert!(matches!(result, Err(StorageError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn destroy_cascades_to_embedded_documents() -> Result<(), StorageError> {
        let mut store = SqliteDocumentStore::open_in_memory()?;
        let blog = store.insert_root(DocumentId::new(), "Blog", &FieldMap::new())?;
        let post = store.insert_member(DocumentId::new(), blog.doc_id, &posts(), &field_map([("title", "x")]))?;
        store.insert_member(DocumentId::new(), blog.doc_id, &settings(), &FieldMap::new())?;
        assert_eq!(store.document_count()?, 3);

        store.destroy(blog.doc_id)?;
        assert_eq!(store.document_count()?, 0);
        assert!(store.get_document(post.doc_id)?.is_none());
        let orphan_fields: i64 =
            store
                .conn()
                .query_row("SELECT COUNT(*) FROM fields", [], |row| row.get(0))?;
        assert_eq!(orphan_fields, 0);
        Ok(())
    }

    #[test]
    fn destroy_of_missing_document_is_not_found() -> Result<(), StorageError> {
        let mut store = SqliteDocumentStore::open_in_memory()?;
        assert!(matches!(
            store.destroy(DocumentId::new()),
            Err(StorageError::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn members_keep_insertion_order() -> Result<(), StorageError> {
        let mut store = SqliteDocumentStore::open_in_memory()?;
        let blog = store.insert_root(DocumentId::new(), "Blog", &FieldMap::new())?;
        let a = store.insert_member(DocumentId::new(), blog.doc_id, &posts(), &field_map([("title", "a")]))?;
        let b = store.insert_member(DocumentId::new(), blog.doc_id, &posts(), &field_map([("title", "b")]))?;
        let ids: Vec<_> = store
            .members(blog.doc_id, "Posts")?
            .into_iter()
            .map(|d| d.doc_id)
            .collect();
        assert_eq!(ids, vec![a.doc_id, b.doc_id]);
        Ok(())
    }

    #[test]
    fn reused_id_is_constraint_violation() -> Result<(), StorageError> {
        let mut store = SqliteDocumentStore::open_in_memory()?;
        let blog = store.insert_root(DocumentId::new(), "Blog", &FieldMap::new())?;
        let again = store.insert_root(blog.doc_id, "Blog", &FieldMap::new());
        assert!(matches!(again, Err(StorageError::ConstraintViolation(_))));
        assert_eq!(store.document_count()?, 1);
        Ok(())
    }

    #[test]
    fn reopens_file_backed_store() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("documents.db");
        let path = path.to_str().ok_or("non-utf8 temp path")?;

        let blog_id = {
            let mut store = SqliteDocumentStore::open(path)?;
            store.insert_root(DocumentId::new(), "Blog", &field_map([("title", "Persisted")]))?.doc_id
        };

        let store = SqliteDocumentStore::open(path)?;
        let blog = store.find_root("Blog", blog_id)?.ok_or("blog missing after reopen")?;
        assert_eq!(blog.fields["title"].as_text(), Some("Persisted"));
        Ok(())
    }
}
