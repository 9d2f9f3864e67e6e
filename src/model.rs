//! Model descriptors
//!
//! A [`ModelMeta`] is the schema-build-time description of a storable type:
//! its identity, whether it is abstract, its primary key, and the final set of
//! columns handed to the storage engine. Owners never mutate after
//! [`ModelBuilder::build`]; columns contributed by reference fields are
//! composed into the column set during the build.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DeclarationError, Result};
use crate::fields::{BaseTypeForeignKey, ReferenceField};
use crate::registry::SubtypeRegistry;

/// Natural key of a model: `app_label` plus lowercase model name
///
/// # Examples
///
/// ```
/// use reinhardt_subtyping::ModelKey;
///
/// let key = ModelKey::new("cms", "Article");
/// assert_eq!(key.model(), "article");
/// assert_eq!(key.to_string(), "cms.article");
/// assert_eq!(ModelKey::parse("cms.Article"), Some(key));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelKey {
	app_label: String,
	model: String,
}

impl ModelKey {
	pub fn new(app_label: impl Into<String>, model: impl AsRef<str>) -> Self {
		Self {
			app_label: app_label.into(),
			model: model.as_ref().to_lowercase(),
		}
	}

	/// Parse an `"app_label.Model"` reference
	pub fn parse(reference: &str) -> Option<Self> {
		let (app_label, model) = reference.split_once('.')?;
		if app_label.is_empty() || model.is_empty() || model.contains('.') {
			return None;
		}
		Some(Self::new(app_label, model))
	}

	pub fn app_label(&self) -> &str {
		&self.app_label
	}

	pub fn model(&self) -> &str {
		&self.model
	}
}

impl fmt::Display for ModelKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}.{}", self.app_label, self.model)
	}
}

/// Value domain a column stores, ignoring width and auto-increment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueDomain {
	Integer,
	Text,
	Uuid,
	Boolean,
}

/// A single column value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
	Null,
	Bool(bool),
	Int(i64),
	Text(String),
	Uuid(Uuid),
}

impl Value {
	pub fn is_null(&self) -> bool {
		matches!(self, Value::Null)
	}

	/// Domain of a non-null value
	pub fn domain(&self) -> Option<ValueDomain> {
		match self {
			Value::Null => None,
			Value::Bool(_) => Some(ValueDomain::Boolean),
			Value::Int(_) => Some(ValueDomain::Integer),
			Value::Text(_) => Some(ValueDomain::Text),
			Value::Uuid(_) => Some(ValueDomain::Uuid),
		}
	}

	pub fn as_int(&self) -> Option<i64> {
		match self {
			Value::Int(v) => Some(*v),
			_ => None,
		}
	}

	/// Short description used in error messages
	pub fn kind(&self) -> &'static str {
		match self {
			Value::Null => "null",
			Value::Bool(_) => "boolean",
			Value::Int(_) => "integer",
			Value::Text(_) => "text",
			Value::Uuid(_) => "uuid",
		}
	}
}

impl fmt::Display for Value {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Value::Null => f.write_str("NULL"),
			Value::Bool(v) => write!(f, "{}", v),
			Value::Int(v) => write!(f, "{}", v),
			Value::Text(v) => write!(f, "'{}'", v),
			Value::Uuid(v) => write!(f, "'{}'", v),
		}
	}
}

impl From<i64> for Value {
	fn from(v: i64) -> Self {
		Value::Int(v)
	}
}

impl From<i32> for Value {
	fn from(v: i32) -> Self {
		Value::Int(i64::from(v))
	}
}

impl From<u32> for Value {
	fn from(v: u32) -> Self {
		Value::Int(i64::from(v))
	}
}

impl From<bool> for Value {
	fn from(v: bool) -> Self {
		Value::Bool(v)
	}
}

impl From<String> for Value {
	fn from(v: String) -> Self {
		Value::Text(v)
	}
}

impl From<&str> for Value {
	fn from(v: &str) -> Self {
		Value::Text(v.to_string())
	}
}

impl From<Uuid> for Value {
	fn from(v: Uuid) -> Self {
		Value::Uuid(v)
	}
}

impl<T: Into<Value>> From<Option<T>> for Value {
	fn from(v: Option<T>) -> Self {
		v.map_or(Value::Null, Into::into)
	}
}

/// Column types understood by the storage engine collaborator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
	AutoField,
	BigAutoField,
	Integer,
	BigInteger,
	PositiveInteger,
	Boolean,
	Char { max_length: u32 },
	Text,
	Uuid,
	/// Reference to another model, stored as that model's integer key
	ForeignKey { to: String },
}

impl ColumnType {
	/// Auto-incrementing integer primary key types
	pub fn is_auto(&self) -> bool {
		matches!(self, ColumnType::AutoField | ColumnType::BigAutoField)
	}

	pub fn domain(&self) -> ValueDomain {
		match self {
			ColumnType::AutoField
			| ColumnType::BigAutoField
			| ColumnType::Integer
			| ColumnType::BigInteger
			| ColumnType::PositiveInteger
			| ColumnType::ForeignKey { .. } => ValueDomain::Integer,
			ColumnType::Boolean => ValueDomain::Boolean,
			ColumnType::Char { .. } | ColumnType::Text => ValueDomain::Text,
			ColumnType::Uuid => ValueDomain::Uuid,
		}
	}

	/// Whether a value fits this column, ignoring nullability
	pub fn accepts(&self, value: &Value) -> bool {
		match (self, value) {
			(_, Value::Null) => true,
			(ColumnType::PositiveInteger, Value::Int(v)) => *v >= 0,
			(ColumnType::Char { max_length }, Value::Text(v)) => {
				v.chars().count() <= *max_length as usize
			}
			_ => value.domain() == Some(self.domain()),
		}
	}
}

/// Declarative column definition
///
/// # Examples
///
/// ```
/// use reinhardt_subtyping::{ColumnDef, ColumnType};
///
/// let slug = ColumnDef::new("slug", ColumnType::Char { max_length: 50 })
///     .primary_key();
/// let copy = slug.clone_shape("object_slug");
///
/// assert!(slug.is_primary_key());
/// assert!(!copy.is_primary_key());
/// assert_eq!(copy.column_type(), slug.column_type());
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
	pub name: String,
	pub column_type: ColumnType,
	pub primary_key: bool,
	pub unique: bool,
	pub null: bool,
	pub blank: bool,
	pub db_index: bool,
	pub editable: bool,
	pub related_name: Option<String>,
}

impl ColumnDef {
	pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
		Self {
			name: name.into(),
			column_type,
			primary_key: false,
			unique: false,
			null: false,
			blank: false,
			db_index: false,
			editable: true,
			related_name: None,
		}
	}

	/// The conventional `id` auto-increment primary key
	pub fn auto_id() -> Self {
		Self::new("id", ColumnType::AutoField).primary_key()
	}

	pub fn primary_key(mut self) -> Self {
		self.primary_key = true;
		self.unique = true;
		self
	}

	pub fn null(mut self, null: bool) -> Self {
		self.null = null;
		self
	}

	pub fn blank(mut self, blank: bool) -> Self {
		self.blank = blank;
		self
	}

	pub fn db_index(mut self, db_index: bool) -> Self {
		self.db_index = db_index;
		self
	}

	pub fn editable(mut self, editable: bool) -> Self {
		self.editable = editable;
		self
	}

	pub fn related_name(mut self, related_name: impl Into<String>) -> Self {
		self.related_name = Some(related_name.into());
		self
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn column_type(&self) -> &ColumnType {
		&self.column_type
	}

	pub fn is_primary_key(&self) -> bool {
		self.primary_key
	}

	/// Copy of this column's value domain under a new name, without
	/// primary-key or uniqueness status
	pub fn clone_shape(&self, name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			column_type: self.column_type.clone(),
			primary_key: false,
			unique: false,
			null: self.null,
			blank: self.blank,
			db_index: self.db_index,
			editable: self.editable,
			related_name: None,
		}
	}
}

/// A storable row instance
///
/// Implemented by anything that can be the target of a polymorphic
/// reference: it must name its model and, once saved, its primary key.
pub trait Storable {
	fn model_key(&self) -> ModelKey;

	/// Primary key value, `None` while unsaved
	fn pk_value(&self) -> Option<Value>;
}

/// Final descriptor of a declared model
#[derive(Debug)]
pub struct ModelMeta {
	key: ModelKey,
	object_name: String,
	is_abstract: bool,
	pk: Option<ColumnDef>,
	columns: Vec<ColumnDef>,
	template_columns: Vec<ColumnDef>,
	declarations: Vec<(String, BaseTypeForeignKey)>,
	references: Vec<Arc<ReferenceField>>,
	query_name: Option<String>,
}

impl ModelMeta {
	pub fn key(&self) -> &ModelKey {
		&self.key
	}

	/// Declared (case-preserving) model name
	pub fn object_name(&self) -> &str {
		&self.object_name
	}

	/// Lowercase model name
	pub fn model_name(&self) -> &str {
		self.key.model()
	}

	pub fn app_label(&self) -> &str {
		self.key.app_label()
	}

	pub fn is_abstract(&self) -> bool {
		self.is_abstract
	}

	pub fn db_table(&self) -> String {
		format!("{}_{}", self.key.app_label(), self.key.model())
	}

	pub fn pk(&self) -> Option<&ColumnDef> {
		self.pk.as_ref()
	}

	/// Storage columns, empty for abstract models
	pub fn columns(&self) -> &[ColumnDef] {
		&self.columns
	}

	pub fn column(&self, name: &str) -> Option<&ColumnDef> {
		self.columns.iter().find(|c| c.name == name)
	}

	/// Reference fields bound to this (concrete) model
	pub fn references(&self) -> &[Arc<ReferenceField>] {
		&self.references
	}

	pub fn reference(&self, name: &str) -> Option<&Arc<ReferenceField>> {
		self.references.iter().find(|f| f.name() == name)
	}

	/// Reference field declarations, as inherited by models extending this one
	pub fn declarations(&self) -> &[(String, BaseTypeForeignKey)] {
		&self.declarations
	}

	/// Whether a column or reference field of this name exists
	pub fn has_field(&self, name: &str) -> bool {
		self.columns.iter().any(|c| c.name == name)
			|| self.declarations.iter().any(|(n, _)| n == name)
	}

	/// Name used for this model in reverse-relation query paths
	pub fn query_name(&self) -> &str {
		self.query_name.as_deref().unwrap_or(self.key.model())
	}

	pub(crate) fn query_name_override(&self) -> Option<&str> {
		self.query_name.as_deref()
	}
}

/// Builder composing a model's final column set
///
/// Reference fields declared through [`ModelBuilder::reference`] contribute
/// their type and identifier columns during [`ModelBuilder::build`]; abstract
/// models keep the declarations and pass them on to the models that extend
/// them.
///
/// # Examples
///
/// ```
/// use reinhardt_subtyping::{
///     BaseTypeForeignKey, BaseTypeOptions, ColumnDef, ColumnType, ModelBuilder, SubtypeRegistry,
/// };
///
/// let registry = SubtypeRegistry::new();
/// let content = registry.declare_base(BaseTypeOptions::new("cms", "Content")).unwrap();
///
/// let comment = ModelBuilder::new("cms", "Comment")
///     .column(ColumnDef::new("body", ColumnType::Text))
///     .reference("content", BaseTypeForeignKey::new(&content))
///     .build(&registry)
///     .unwrap();
///
/// assert!(comment.column("content_type").is_some());
/// assert!(comment.column("content_id").is_some());
/// ```
#[derive(Debug)]
pub struct ModelBuilder {
	key: ModelKey,
	object_name: String,
	is_abstract: bool,
	pk: Option<ColumnDef>,
	columns: Vec<ColumnDef>,
	references: Vec<(String, BaseTypeForeignKey)>,
	parents: Vec<Arc<ModelMeta>>,
	query_name: Option<String>,
}

impl ModelBuilder {
	pub fn new(app_label: impl Into<String>, object_name: impl Into<String>) -> Self {
		let object_name = object_name.into();
		Self {
			key: ModelKey::new(app_label, &object_name),
			object_name,
			is_abstract: false,
			pk: None,
			columns: Vec::new(),
			references: Vec::new(),
			parents: Vec::new(),
			query_name: None,
		}
	}

	/// Mark the model abstract: a template that is never stored directly
	pub fn abstract_model(mut self) -> Self {
		self.is_abstract = true;
		self
	}

	pub fn primary_key(mut self, column: ColumnDef) -> Self {
		self.pk = Some(column.primary_key());
		self
	}

	pub fn column(mut self, column: ColumnDef) -> Self {
		self.columns.push(column);
		self
	}

	pub fn reference(mut self, name: impl Into<String>, field: BaseTypeForeignKey) -> Self {
		self.references.push((name.into(), field));
		self
	}

	/// Inherit columns and reference fields from an abstract model
	pub fn extends(mut self, parent: &Arc<ModelMeta>) -> Self {
		self.parents.push(Arc::clone(parent));
		self
	}

	/// Override the name used in reverse-relation query paths
	pub fn query_name(mut self, query_name: impl Into<String>) -> Self {
		self.query_name = Some(query_name.into());
		self
	}

	/// Compose the final model descriptor
	///
	/// All validation happens before any reference field is bound, so a
	/// failed build leaves no reverse relations behind.
	pub fn build(self, registry: &SubtypeRegistry) -> Result<Arc<ModelMeta>> {
		let ModelBuilder {
			key,
			object_name,
			is_abstract,
			pk,
			columns: own_columns,
			references: own_references,
			parents,
			query_name,
		} = self;

		let mut pk = pk;
		let mut columns: Vec<ColumnDef> = Vec::new();
		let mut references: Vec<(String, BaseTypeForeignKey)> = Vec::new();

		for parent in &parents {
			if !parent.is_abstract() {
				return Err(DeclarationError::ConcreteParent {
					model: key,
					parent: parent.key().clone(),
				}
				.into());
			}
			if pk.is_none() {
				pk = parent.pk.clone();
			}
			columns.extend(parent.template_columns.iter().cloned());
			references.extend(parent.declarations.iter().cloned());
		}
		columns.extend(own_columns);
		references.extend(own_references);

		if pk.is_none() && !is_abstract {
			pk = Some(ColumnDef::auto_id());
		}

		let mut names: Vec<String> = pk.iter().map(|c| c.name.clone()).collect();
		for name in columns
			.iter()
			.map(|c| c.name.as_str())
			.chain(references.iter().map(|(n, _)| n.as_str()))
		{
			if names.iter().any(|n| n == name) {
				return Err(DeclarationError::DuplicateField {
					model: key,
					field: name.to_string(),
				}
				.into());
			}
			names.push(name.to_string());
		}

		let settings = registry.settings();
		let references: Vec<(String, BaseTypeForeignKey)> = references
			.into_iter()
			.map(|(name, field)| {
				let resolved = field.resolve_names(&name, settings);
				(name, resolved)
			})
			.collect();

		let template_columns = columns.clone();
		if is_abstract {
			tracing::debug!(
				model = %key,
				references = references.len(),
				"abstract model declared, storage deferred to concrete models"
			);
			return Ok(Arc::new(ModelMeta {
				key,
				object_name,
				is_abstract,
				pk,
				columns: Vec::new(),
				template_columns,
				declarations: references,
				references: Vec::new(),
				query_name,
			}));
		}

		let mut storage_columns: Vec<ColumnDef> = pk.iter().cloned().collect();
		storage_columns.extend(columns);

		let mut plans = Vec::with_capacity(references.len());
		for (name, field) in &references {
			let plan = field.plan(name, &key, registry)?;
			for column in plan.columns() {
				if names.contains(&column.name)
					|| storage_columns.iter().any(|c| c.name == column.name)
				{
					return Err(DeclarationError::DuplicateField {
						model: key,
						field: column.name.clone(),
					}
					.into());
				}
				storage_columns.push(column.clone());
			}
			plans.push(plan);
		}

		let bound = plans
			.into_iter()
			.map(|plan| ReferenceField::bind(plan, registry))
			.collect::<Result<Vec<_>>>()?;

		tracing::debug!(
			model = %key,
			columns = storage_columns.len(),
			references = bound.len(),
			"model declared"
		);

		Ok(Arc::new(ModelMeta {
			key,
			object_name,
			is_abstract,
			pk,
			columns: storage_columns,
			template_columns,
			declarations: references,
			references: bound,
			query_name,
		}))
	}
}

/// An untyped row of a concrete model
///
/// # Examples
///
/// ```
/// use reinhardt_subtyping::{ModelBuilder, Row, Storable, SubtypeRegistry, Value};
///
/// let registry = SubtypeRegistry::new();
/// let article = ModelBuilder::new("cms", "Article").build(&registry).unwrap();
///
/// let row = Row::new(&article).with("id", 42);
/// assert_eq!(row.pk_value(), Some(Value::Int(42)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
	model: ModelKey,
	pk_column: Option<String>,
	values: IndexMap<String, Value>,
}

impl Row {
	/// A row with every column of `meta` set to null
	pub fn new(meta: &ModelMeta) -> Self {
		Self {
			model: meta.key().clone(),
			pk_column: meta.pk().map(|c| c.name.clone()),
			values: meta
				.columns()
				.iter()
				.map(|c| (c.name.clone(), Value::Null))
				.collect(),
		}
	}

	pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
		self.set(column, value);
		self
	}

	pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
		self.values.insert(column.into(), value.into());
	}

	/// Column value, null for columns the row does not carry
	pub fn get(&self, column: &str) -> &Value {
		self.values.get(column).unwrap_or(&Value::Null)
	}

	pub fn model(&self) -> &ModelKey {
		&self.model
	}

	pub fn values(&self) -> &IndexMap<String, Value> {
		&self.values
	}
}

impl Storable for Row {
	fn model_key(&self) -> ModelKey {
		self.model.clone()
	}

	fn pk_value(&self) -> Option<Value> {
		let column = self.pk_column.as_deref()?;
		match self.get(column) {
			Value::Null => None,
			value => Some(value.clone()),
		}
	}
}
