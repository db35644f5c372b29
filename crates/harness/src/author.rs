use nestlog_core::{
    field_value::FieldMap,
    history::{Action, AssociationStep, HistoryRecord},
    identity::ActorIdentity,
    ids::{ActorId, DocumentId},
    Schema,
};
use nestlog_engine::{Engine, EngineConfig, Outcome, PathResolver};
use nestlog_storage::{DocumentRecord, DocumentStore, SqliteDocumentStore};

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

/// An actor that edits documents through a shared engine and captures a
/// signed history record for every mutation, the way a host application would.
pub struct TestAuthor {
    pub identity: ActorIdentity,
    pub engine: Engine<SqliteDocumentStore>,
    version: u64,
}

impl TestAuthor {
    pub fn new(schema: Schema) -> TestResult<Self> {
        Self::with_store(schema, SqliteDocumentStore::open_in_memory()?)
    }

    pub fn with_store(schema: Schema, store: SqliteDocumentStore) -> TestResult<Self> {
        let config = EngineConfig {
            verify_signatures: true,
        };
        Ok(Self {
            identity: ActorIdentity::generate(),
            engine: Engine::with_config(schema, store, config),
            version: 0,
        })
    }

    pub fn actor_id(&self) -> ActorId {
        self.identity.actor_id()
    }

    fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    fn capture(
        &mut self,
        action: Action,
        chain: Vec<AssociationStep>,
        original: FieldMap,
        modified: FieldMap,
    ) -> TestResult<HistoryRecord> {
        let version = self.next_version();
        Ok(HistoryRecord::new_signed(
            &self.identity,
            action,
            chain,
            original,
            modified,
            version,
        )?)
    }

    /// Live document at the end of `chain`.
    pub fn locate(&self, chain: &[AssociationStep]) -> TestResult<Option<DocumentRecord>> {
        let resolved = PathResolver::new(self.engine.schema(), self.engine.store()).resolve(chain)?;
        Ok(resolved.trackable().cloned())
    }

    fn require(&self, chain: &[AssociationStep]) -> TestResult<DocumentRecord> {
        self.locate(chain)?
            .ok_or_else(|| format!("no document at {chain:?}").into())
    }

    /// Create a root document and capture the create.
    pub fn create_root(
        &mut self,
        doc_type: &str,
        fields: FieldMap,
    ) -> TestResult<(Vec<AssociationStep>, HistoryRecord)> {
        let doc = self.engine.store_mut().insert_root(DocumentId::new(), doc_type, &fields)?;
        let chain = vec![AssociationStep::new(doc_type, doc.doc_id)];
        let record = self.capture(Action::Create, chain.clone(), FieldMap::new(), fields)?;
        Ok((chain, record))
    }

    /// Embed a new document under the document at `parent_chain`.
    pub fn create_member(
        &mut self,
        parent_chain: &[AssociationStep],
        relation: &str,
        fields: FieldMap,
    ) -> TestResult<(Vec<AssociationStep>, HistoryRecord)> {
        let parent = self.require(parent_chain)?;
        let relation = self
            .engine
            .schema()
            .relation(&parent.doc_type, relation)
            .cloned()
            .ok_or_else(|| format!("{} has no relation {relation}", parent.doc_type))?;
        let doc = self
            .engine
            .store_mut()
            .insert_member(DocumentId::new(), parent.doc_id, &relation, &fields)?;

        let mut chain = parent_chain.to_vec();
        chain.push(AssociationStep::new(relation.name, doc.doc_id));
        let record = self.capture(Action::Create, chain.clone(), FieldMap::new(), fields)?;
        Ok((chain, record))
    }

    /// Apply `changes` to the document at `chain`, capturing the prior values
    /// of the changed fields that were set.
    pub fn update(
        &mut self,
        chain: &[AssociationStep],
        changes: FieldMap,
    ) -> TestResult<HistoryRecord> {
        let doc = self.require(chain)?;
        let original: FieldMap = changes
            .keys()
            .filter_map(|k| doc.fields.get(k).map(|v| (k.clone(), v.clone())))
            .collect();
        self.engine.store_mut().update_fields(doc.doc_id, &changes)?;
        self.capture(Action::Update, chain.to_vec(), original, changes)
    }

    /// Destroy the document at `chain`, capturing all of its fields.
    pub fn destroy(&mut self, chain: &[AssociationStep]) -> TestResult<HistoryRecord> {
        let doc = self.require(chain)?;
        self.engine.store_mut().destroy(doc.doc_id)?;
        self.capture(Action::Destroy, chain.to_vec(), doc.fields, FieldMap::new())
    }

    pub fn undo(&mut self, record: &HistoryRecord) -> TestResult<Outcome> {
        let modifier = self.actor_id();
        Ok(self.engine.undo(record, modifier)?)
    }

    pub fn redo(&mut self, record: &HistoryRecord) -> TestResult<Outcome> {
        let modifier = self.actor_id();
        Ok(self.engine.redo(record, modifier)?)
    }
}
