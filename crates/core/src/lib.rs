pub mod error;
pub mod field_value;
pub mod history;
pub mod identity;
pub mod ids;
pub mod schema;

pub use error::CoreError;
pub use field_value::{FieldMap, FieldValue};
pub use history::{Action, AssociationStep, HistoryRecord};
pub use ids::*;
pub use schema::{Cardinality, Relation, Schema, TrackingOptions};
