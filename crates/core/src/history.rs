use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::CoreError;
use crate::field_value::FieldMap;
use crate::identity::{verify_signature, ActorIdentity};
use crate::ids::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Destroy,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Destroy => "destroy",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "destroy" => Ok(Self::Destroy),
            _ => Err(CoreError::InvalidRecord(format!("unknown action: {s}"))),
        }
    }
}

/// One hop of an association chain: a root type or relationship name, plus
/// the member id when the relationship holds many documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationStep {
    pub name: String,
    pub id: Option<DocumentId>,
}

impl AssociationStep {
    pub fn new(name: impl Into<String>, id: DocumentId) -> Self {
        Self {
            name: name.into(),
            id: Some(id),
        }
    }

    /// A step through a singular relationship, which carries no member id.
    pub fn singular(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
        }
    }
}

/// Immutable description of one tracked mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub record_id: RecordId,
    /// Root-first path to the trackable; the last step names the trackable itself.
    pub association_chain: Vec<AssociationStep>,
    pub original: FieldMap,
    pub modified: FieldMap,
    pub action: Action,
    pub modifier: ActorId,
    pub version: u64,
    /// Root document type the record belongs to.
    pub scope: String,
    /// Unix millis at capture time.
    pub created_at: i64,
    pub signature: Signature,
}

#[derive(Serialize)]
struct SignedBody<'a> {
    association_chain: &'a [AssociationStep],
    original: &'a FieldMap,
    modified: &'a FieldMap,
    action: Action,
    version: u64,
    scope: &'a str,
    created_at: i64,
}

impl HistoryRecord {
    fn signing_bytes(
        record_id: &RecordId,
        modifier: &ActorId,
        body: &SignedBody<'_>,
    ) -> Result<Vec<u8>, CoreError> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(record_id.as_bytes());
        bytes.extend_from_slice(modifier.as_bytes());
        let body_bytes =
            rmp_serde::to_vec(body).map_err(|e| CoreError::Serialization(e.to_string()))?;
        bytes.extend_from_slice(&body_bytes);
        Ok(bytes)
    }

    fn body(&self) -> SignedBody<'_> {
        SignedBody {
            association_chain: &self.association_chain,
            original: &self.original,
            modified: &self.modified,
            action: self.action,
            version: self.version,
            scope: &self.scope,
            created_at: self.created_at,
        }
    }

    /// Build a record for a mutation made by `identity` and sign it.
    pub fn new_signed(
        identity: &ActorIdentity,
        action: Action,
        association_chain: Vec<AssociationStep>,
        original: FieldMap,
        modified: FieldMap,
        version: u64,
    ) -> Result<Self, CoreError> {
        let scope = association_chain
            .first()
            .map(|step| step.name.clone())
            .ok_or_else(|| CoreError::InvalidRecord("empty association chain".into()))?;
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();

        let mut record = Self {
            record_id: RecordId::new(),
            association_chain,
            original,
            modified,
            action,
            modifier: identity.actor_id(),
            version,
            scope,
            created_at,
            signature: Signature::from_bytes([0u8; 64]),
        };
        record.validate()?;

        let bytes = Self::signing_bytes(&record.record_id, &record.modifier, &record.body())?;
        record.signature = identity.sign(&bytes);
        Ok(record)
    }

    pub fn verify_signature(&self) -> Result<(), CoreError> {
        let bytes = Self::signing_bytes(&self.record_id, &self.modifier, &self.body())?;
        verify_signature(&self.modifier, &bytes, &self.signature)
    }

    /// Check the structural invariants every record must satisfy.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.association_chain.is_empty() {
            return Err(CoreError::InvalidRecord("empty association chain".into()));
        }
        match self.action {
            Action::Create if !self.original.is_empty() => Err(CoreError::InvalidRecord(
                "create record carries original values".into(),
            )),
            Action::Destroy if !self.modified.is_empty() => Err(CoreError::InvalidRecord(
                "destroy record carries modified values".into(),
            )),
            _ => Ok(()),
        }
    }

    /// Union of the field names in `original` and `modified`.
    pub fn affected_keys(&self) -> BTreeSet<&str> {
        self.original
            .keys()
            .chain(self.modified.keys())
            .map(String::as_str)
            .collect()
    }

    /// Step naming the trackable itself.
    pub fn trackable_step(&self) -> Option<&AssociationStep> {
        self.association_chain.last()
    }

    /// Whether the trackable lives inside a parent document.
    pub fn is_embedded(&self) -> bool {
        self.association_chain.len() > 1
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}
