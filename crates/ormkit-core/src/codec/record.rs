//! Dynamic entity records.

use ormkit_proto::{FromValue, Value};

use super::Entity;
use crate::error::Error;

/// The loaded state of a relation on a record.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RelationValue {
    /// One-to-one target, or none.
    One(Option<Box<Record>>),
    /// One-to-many targets in list order.
    Many(Vec<Record>),
    /// The relation was not fetched.
    #[default]
    NotLoaded,
}

/// An entity in dynamic form: ordered field values plus relation values.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Entity name.
    pub entity: String,
    /// Field values in order.
    pub fields: Vec<(String, Value)>,
    /// Relation values in order.
    pub relations: Vec<(String, RelationValue)>,
}

impl Record {
    /// Create an empty record for an entity.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }

    /// Add a field value.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Set a field value, replacing any previous one.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Get a field value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Remove a field and convert it.
    ///
    /// Fails with `MissingField` if absent and `CodecMismatch` if the value
    /// does not convert to `T`.
    pub fn take<T: FromValue>(&mut self, name: &str) -> Result<T, Error> {
        let pos = self
            .fields
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| Error::MissingField {
                entity: self.entity.clone(),
                field: name.to_string(),
            })?;
        let (_, value) = self.fields.remove(pos);
        let found = value.type_name();
        T::from_value(value).ok_or_else(|| Error::CodecMismatch {
            entity: self.entity.clone(),
            field: name.to_string(),
            expected: std::any::type_name::<T>().to_string(),
            found: found.to_string(),
        })
    }

    /// Set a relation value, replacing any previous one.
    pub fn set_relation(&mut self, name: impl Into<String>, value: RelationValue) {
        let name = name.into();
        match self.relations.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.relations.push((name, value)),
        }
    }

    /// Attach a one-to-one relation.
    pub fn with_one(mut self, name: impl Into<String>, target: Option<Record>) -> Self {
        self.set_relation(name, RelationValue::One(target.map(Box::new)));
        self
    }

    /// Attach a one-to-many relation.
    pub fn with_many(mut self, name: impl Into<String>, targets: Vec<Record>) -> Self {
        self.set_relation(name, RelationValue::Many(targets));
        self
    }

    /// Get a relation value.
    pub fn relation(&self, name: &str) -> Option<&RelationValue> {
        self.relations
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Get a mutable relation value.
    pub fn relation_mut(&mut self, name: &str) -> Option<&mut RelationValue> {
        self.relations
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    fn take_relation(&mut self, name: &str) -> RelationValue {
        match self.relations.iter().position(|(n, _)| n == name) {
            Some(pos) => self.relations.remove(pos).1,
            None => RelationValue::NotLoaded,
        }
    }

    /// Remove a one-to-one relation and convert it.
    ///
    /// A relation that was not loaded converts to `None`.
    pub fn take_one<E: Entity>(&mut self, name: &str) -> Result<Option<E>, Error> {
        match self.take_relation(name) {
            RelationValue::One(Some(target)) => E::from_record(*target).map(Some),
            RelationValue::One(None) | RelationValue::NotLoaded => Ok(None),
            RelationValue::Many(_) => Err(self.relation_shape_error(name, "one", "many")),
        }
    }

    /// Remove a one-to-many relation and convert it.
    ///
    /// A relation that was not loaded converts to an empty list.
    pub fn take_many<E: Entity>(&mut self, name: &str) -> Result<Vec<E>, Error> {
        match self.take_relation(name) {
            RelationValue::Many(targets) => targets.into_iter().map(E::from_record).collect(),
            RelationValue::NotLoaded => Ok(Vec::new()),
            RelationValue::One(_) => Err(self.relation_shape_error(name, "many", "one")),
        }
    }

    fn relation_shape_error(&self, name: &str, expected: &str, found: &str) -> Error {
        Error::CodecMismatch {
            entity: self.entity.clone(),
            field: name.to_string(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}
