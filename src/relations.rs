//! Reverse relations
//!
//! Every reference field attaches one [`GenericRelation`] to each eligible
//! subtype of its base type. The relation belongs to the field that created
//! it; the subtype only exposes it.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::directory::TypeTag;
use crate::error::{Result, TranslationError};
use crate::lookups::Condition;
use crate::model::{ModelKey, Row, Storable};
use crate::storage::StorageEngine;

/// Read-only view from a subtype to the owner rows referencing it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericRelation {
	pub(crate) related_name: String,
	pub(crate) query_name: String,
	pub(crate) owner: ModelKey,
	pub(crate) field_name: String,
	pub(crate) subtype: ModelKey,
	pub(crate) tag: TypeTag,
	pub(crate) type_field: String,
	pub(crate) id_field: String,
}

impl GenericRelation {
	/// Attribute name on the subtype, e.g. `comment_set`
	pub fn related_name(&self) -> &str {
		&self.related_name
	}

	/// Name used in query paths, e.g. `content_article`
	pub fn query_name(&self) -> &str {
		&self.query_name
	}

	pub fn owner(&self) -> &ModelKey {
		&self.owner
	}

	/// Reference field on the owner this relation mirrors
	pub fn field_name(&self) -> &str {
		&self.field_name
	}

	pub fn subtype(&self) -> &ModelKey {
		&self.subtype
	}

	pub fn tag(&self) -> TypeTag {
		self.tag
	}

	pub fn type_field(&self) -> &str {
		&self.type_field
	}

	pub fn id_field(&self) -> &str {
		&self.id_field
	}

	/// Predicate over owner rows that reference `instance`
	pub fn filter_for(&self, instance: &dyn Storable) -> Result<Condition> {
		let model = instance.model_key();
		if model != self.subtype {
			return Err(TranslationError::TypeMismatch {
				field: self.related_name.clone(),
				lookup: "exact".to_string(),
				expected: "an instance of the relation's subtype",
				found: model.to_string(),
			}
			.into());
		}
		let pk = instance
			.pk_value()
			.ok_or_else(|| TranslationError::UnsavedInstance {
				field: self.related_name.clone(),
				model,
			})?;

		Ok(Condition::all([
			Condition::eq(&self.type_field, self.tag),
			Condition::eq(&self.id_field, pk),
		]))
	}

	/// Owner rows that reference `instance`
	pub fn all(&self, storage: &dyn StorageEngine, instance: &dyn Storable) -> Result<Vec<Row>> {
		let condition = self.filter_for(instance)?;
		Ok(storage.filter(&self.owner, &condition)?)
	}
}

/// Reverse relations attached to each subtype
#[derive(Debug, Default)]
pub struct RelationIndex {
	by_subtype: RwLock<HashMap<ModelKey, Vec<GenericRelation>>>,
}

impl RelationIndex {
	pub fn new() -> Self {
		Self::default()
	}

	/// Attach a relation to its subtype; attaching the same relation twice
	/// keeps one copy
	pub fn attach(&self, relation: GenericRelation) {
		let mut by_subtype = self.by_subtype.write();
		let relations = by_subtype.entry(relation.subtype.clone()).or_default();
		if relations.contains(&relation) {
			return;
		}
		tracing::debug!(
			subtype = %relation.subtype,
			owner = %relation.owner,
			related_name = %relation.related_name,
			query_name = %relation.query_name,
			"reverse relation attached"
		);
		relations.push(relation);
	}

	/// All relations exposed on `subtype`
	pub fn relations_on(&self, subtype: &ModelKey) -> Vec<GenericRelation> {
		self.by_subtype
			.read()
			.get(subtype)
			.cloned()
			.unwrap_or_default()
	}

	/// Relation on `subtype` with the given query name
	pub fn get(&self, subtype: &ModelKey, query_name: &str) -> Option<GenericRelation> {
		self.by_subtype
			.read()
			.get(subtype)?
			.iter()
			.find(|r| r.query_name == query_name)
			.cloned()
	}

	/// Relations on `subtype` exposed under `related_name`
	pub fn named(&self, subtype: &ModelKey, related_name: &str) -> Vec<GenericRelation> {
		self.by_subtype
			.read()
			.get(subtype)
			.map(|relations| {
				relations
					.iter()
					.filter(|r| r.related_name == related_name)
					.cloned()
					.collect()
			})
			.unwrap_or_default()
	}
}
