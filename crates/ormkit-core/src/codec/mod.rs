//! Row codec: entities to storage rows and back.
//!
//! Typed entities convert to and from the dynamic [`Record`] form through
//! the [`Entity`] trait. [`RowCodec`] flattens records into rows using a
//! resolved [`Schema`](crate::catalog::Schema).

mod record;
mod row_codec;

pub use record::{Record, RelationValue};
pub use row_codec::{coerce, Decoded, RowBatch, RowCodec};

use crate::catalog::EntityDef;
use crate::error::Error;

/// A Rust type mapped to a table.
///
/// ```ignore
/// impl Entity for Cat {
///     fn entity_def() -> EntityDef {
///         EntityDef::new("Cat", "id")
///             .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Uuid))
///                 .with_default(DefaultValue::AutoUuid))
///             .with_field(FieldDef::new("name", FieldType::scalar(ScalarType::String)))
///     }
///
///     fn to_record(&self) -> Record {
///         Record::new("Cat").with_field("id", self.id).with_field("name", self.name.as_str())
///     }
///
///     fn from_record(mut record: Record) -> Result<Self, Error> {
///         Ok(Cat { id: record.take("id")?, name: record.take("name")? })
///     }
/// }
/// ```
pub trait Entity: Sized + 'static {
    /// The entity's definition. Called once per registration.
    fn entity_def() -> EntityDef;

    /// Convert to dynamic form.
    fn to_record(&self) -> Record;

    /// Convert from dynamic form.
    fn from_record(record: Record) -> Result<Self, Error>;
}
