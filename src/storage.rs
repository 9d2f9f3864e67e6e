//! Storage engine seam
//!
//! Reference fields and reverse relations only need to insert rows, load a
//! row by primary key, and filter rows by a [`Condition`]. [`MemoryStorage`]
//! implements that surface in process; SQL backends can implement it by
//! compiling conditions with [`Condition::to_sea_condition`].

use std::collections::HashMap;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::error::StorageError;
use crate::lookups::Condition;
use crate::model::{ColumnDef, ModelKey, ModelMeta, Row, Storable, Value};

/// Row storage used to materialize references
pub trait StorageEngine: Send + Sync {
	/// Create the table backing `meta`
	fn create_table(&self, meta: &ModelMeta) -> Result<(), StorageError>;

	/// Insert `row`, assigning an auto-increment key when the primary key is
	/// null, and return the stored row
	fn insert(&self, row: Row) -> Result<Row, StorageError>;

	/// Replace the stored row with the same primary key
	fn update(&self, row: Row) -> Result<(), StorageError>;

	/// Remove a row, returning whether it existed
	fn delete(&self, model: &ModelKey, pk: &Value) -> Result<bool, StorageError>;

	fn get(&self, model: &ModelKey, pk: &Value) -> Result<Option<Row>, StorageError>;

	/// Rows of `model` matching `condition`, in insertion order
	fn filter(&self, model: &ModelKey, condition: &Condition) -> Result<Vec<Row>, StorageError>;
}

#[derive(Debug)]
struct Table {
	pk: Option<ColumnDef>,
	next_id: i64,
	rows: IndexMap<Value, Row>,
}

impl Table {
	fn key_of(&self, model: &ModelKey, row: &Row) -> Result<Value, StorageError> {
		row.pk_value()
			.ok_or_else(|| StorageError::MissingPrimaryKey(model.clone()))
	}
}

/// In-process storage keyed by model and primary key
///
/// # Examples
///
/// ```
/// use reinhardt_subtyping::{MemoryStorage, ModelBuilder, Row, Storable, StorageEngine, SubtypeRegistry};
///
/// let registry = SubtypeRegistry::new();
/// let article = ModelBuilder::new("cms", "Article").build(&registry).unwrap();
/// let storage = MemoryStorage::new();
/// storage.create_table(&article).unwrap();
///
/// let saved = storage.insert(Row::new(&article)).unwrap();
/// let pk = saved.pk_value().unwrap();
/// assert_eq!(storage.get(article.key(), &pk).unwrap(), Some(saved));
/// ```
#[derive(Debug, Default)]
pub struct MemoryStorage {
	tables: RwLock<HashMap<ModelKey, Table>>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of rows stored for `model`
	pub fn count(&self, model: &ModelKey) -> usize {
		self.tables
			.read()
			.get(model)
			.map_or(0, |table| table.rows.len())
	}
}

impl StorageEngine for MemoryStorage {
	fn create_table(&self, meta: &ModelMeta) -> Result<(), StorageError> {
		let mut tables = self.tables.write();
		if tables.contains_key(meta.key()) {
			return Err(StorageError::DuplicateTable(meta.key().clone()));
		}
		tracing::debug!(model = %meta.key(), table = %meta.db_table(), "table created");
		tables.insert(
			meta.key().clone(),
			Table {
				pk: meta.pk().cloned(),
				next_id: 1,
				rows: IndexMap::new(),
			},
		);
		Ok(())
	}

	fn insert(&self, mut row: Row) -> Result<Row, StorageError> {
		let model = row.model().clone();
		let mut tables = self.tables.write();
		let table = tables
			.get_mut(&model)
			.ok_or_else(|| StorageError::NoSuchTable(model.clone()))?;

		if row.pk_value().is_none()
			&& let Some(pk) = table.pk.as_ref().filter(|pk| pk.column_type().is_auto())
		{
			row.set(pk.name(), table.next_id);
			table.next_id = table.next_id.saturating_add(1);
		}

		let key = table.key_of(&model, &row)?;
		if table.rows.contains_key(&key) {
			return Err(StorageError::DuplicatePrimaryKey {
				model,
				pk: key.to_string(),
			});
		}
		if let Value::Int(id) = key {
			table.next_id = table.next_id.max(id.saturating_add(1));
		}

		tracing::trace!(model = %model, pk = %key, "row inserted");
		table.rows.insert(key, row.clone());
		Ok(row)
	}

	fn update(&self, row: Row) -> Result<(), StorageError> {
		let model = row.model().clone();
		let mut tables = self.tables.write();
		let table = tables
			.get_mut(&model)
			.ok_or_else(|| StorageError::NoSuchTable(model.clone()))?;
		let key = table.key_of(&model, &row)?;
		table.rows.insert(key, row);
		Ok(())
	}

	fn delete(&self, model: &ModelKey, pk: &Value) -> Result<bool, StorageError> {
		let mut tables = self.tables.write();
		let table = tables
			.get_mut(model)
			.ok_or_else(|| StorageError::NoSuchTable(model.clone()))?;
		Ok(table.rows.shift_remove(pk).is_some())
	}

	fn get(&self, model: &ModelKey, pk: &Value) -> Result<Option<Row>, StorageError> {
		let tables = self.tables.read();
		let table = tables
			.get(model)
			.ok_or_else(|| StorageError::NoSuchTable(model.clone()))?;
		Ok(table.rows.get(pk).cloned())
	}

	fn filter(&self, model: &ModelKey, condition: &Condition) -> Result<Vec<Row>, StorageError> {
		let tables = self.tables.read();
		let table = tables
			.get(model)
			.ok_or_else(|| StorageError::NoSuchTable(model.clone()))?;
		Ok(table
			.rows
			.values()
			.filter(|row| condition.matches(row))
			.cloned()
			.collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::{ColumnType, ModelBuilder};
	use crate::registry::SubtypeRegistry;
	use rstest::{fixture, rstest};
	use std::sync::Arc;

	#[fixture]
	fn article() -> Arc<ModelMeta> {
		let registry = SubtypeRegistry::new();
		ModelBuilder::new("cms", "Article")
			.column(ColumnDef::new("title", ColumnType::Text))
			.build(&registry)
			.unwrap()
	}

	#[rstest]
	fn test_insert_assigns_auto_ids(article: Arc<ModelMeta>) {
		// Arrange
		let storage = MemoryStorage::new();
		storage.create_table(&article).unwrap();

		// Act
		let first = storage.insert(Row::new(&article).with("title", "a")).unwrap();
		let explicit = storage.insert(Row::new(&article).with("id", 10)).unwrap();
		let next = storage.insert(Row::new(&article)).unwrap();

		// Assert
		assert_eq!(first.pk_value(), Some(Value::Int(1)));
		assert_eq!(explicit.pk_value(), Some(Value::Int(10)));
		assert_eq!(next.pk_value(), Some(Value::Int(11)));
		assert_eq!(storage.count(article.key()), 3);
	}

	#[rstest]
	fn test_duplicate_primary_key_is_rejected(article: Arc<ModelMeta>) {
		let storage = MemoryStorage::new();
		storage.create_table(&article).unwrap();
		storage.insert(Row::new(&article).with("id", 1)).unwrap();

		let result = storage.insert(Row::new(&article).with("id", 1));

		assert_eq!(
			result,
			Err(StorageError::DuplicatePrimaryKey {
				model: article.key().clone(),
				pk: "1".to_string(),
			})
		);
	}

	#[rstest]
	fn test_missing_table(article: Arc<ModelMeta>) {
		let storage = MemoryStorage::new();

		assert_eq!(
			storage.get(article.key(), &Value::Int(1)),
			Err(StorageError::NoSuchTable(article.key().clone()))
		);
		storage.create_table(&article).unwrap();
		assert_eq!(
			storage.create_table(&article),
			Err(StorageError::DuplicateTable(article.key().clone()))
		);
	}

	#[rstest]
	fn test_filter_update_and_delete(article: Arc<ModelMeta>) {
		// Arrange
		let storage = MemoryStorage::new();
		storage.create_table(&article).unwrap();
		let saved = storage.insert(Row::new(&article).with("title", "a")).unwrap();
		storage.insert(Row::new(&article).with("title", "b")).unwrap();
		let pk = saved.pk_value().unwrap();

		// Act
		storage.update(saved.with("title", "c")).unwrap();

		// Assert
		let found = storage
			.filter(article.key(), &Condition::eq("title", "c"))
			.unwrap();
		assert_eq!(found.len(), 1);
		assert_eq!(found[0].pk_value(), Some(pk.clone()));
		assert!(storage.delete(article.key(), &pk).unwrap());
		assert!(!storage.delete(article.key(), &pk).unwrap());
		assert_eq!(storage.count(article.key()), 1);
	}

	#[rstest]
	fn test_explicit_max_key_does_not_overflow(article: Arc<ModelMeta>) {
		let storage = MemoryStorage::new();
		storage.create_table(&article).unwrap();

		let saved = storage
			.insert(Row::new(&article).with("id", i64::MAX))
			.unwrap();

		let exhausted = storage.insert(Row::new(&article));

		assert_eq!(saved.pk_value(), Some(Value::Int(i64::MAX)));
		assert!(matches!(
			exhausted,
			Err(StorageError::DuplicatePrimaryKey { .. })
		));
		assert_eq!(storage.count(article.key()), 1);
	}
}
