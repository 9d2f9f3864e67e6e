//! Lookup translation for polymorphic references
//!
//! A reference field has no column of its own, so lookups against it are
//! rewritten into predicates over its type and identifier columns before
//! they reach storage:
//!
//! - `exact` against an instance becomes
//!   `type_field = tag_for(instance) AND id_field = instance.pk`
//! - `exact` against `None` and `isnull` become a null check on the
//!   identifier column; the type column is null in lockstep
//! - anything else, including traversal into subtype fields, is rejected
//!   with [`TranslationError::UnsupportedLookup`]. Traversal would need a
//!   disjunction across every subtype table.

use std::fmt;

use sea_query::{Alias, Asterisk, Condition as SeaCondition, Expr, ExprTrait, PostgresQueryBuilder, Query};
use serde::{Deserialize, Serialize};

use crate::directory::TypeDirectory;
use crate::error::{Result, TranslationError};
use crate::fields::ReferenceField;
use crate::model::{ModelMeta, Row, Storable, Value};

/// Separator between path segments in a lookup, as in `content__isnull`
pub const LOOKUP_SEP: &str = "__";

/// Column-level predicate tree accepted by the storage engine
///
/// `Eq` against [`Value::Null`] means `IS NULL`, both in memory and in SQL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
	Eq { column: String, value: Value },
	IsNull { column: String },
	IsNotNull { column: String },
	In { column: String, values: Vec<Value> },
	All(Vec<Condition>),
}

impl Condition {
	/// Equality predicate; a null `value` yields [`Condition::IsNull`]
	pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
		match value.into() {
			Value::Null => Condition::is_null(column),
			value => Condition::Eq {
				column: column.into(),
				value,
			},
		}
	}

	pub fn is_null(column: impl Into<String>) -> Self {
		Condition::IsNull {
			column: column.into(),
		}
	}

	pub fn is_not_null(column: impl Into<String>) -> Self {
		Condition::IsNotNull {
			column: column.into(),
		}
	}

	pub fn is_in(column: impl Into<String>, values: Vec<Value>) -> Self {
		Condition::In {
			column: column.into(),
			values,
		}
	}

	/// Conjunction; nested conjunctions are flattened
	pub fn all(conditions: impl IntoIterator<Item = Condition>) -> Self {
		let mut flat = Vec::new();
		for condition in conditions {
			match condition {
				Condition::All(inner) => flat.extend(inner),
				other => flat.push(other),
			}
		}
		Condition::All(flat)
	}

	pub fn and(self, other: Condition) -> Self {
		Condition::all([self, other])
	}

	/// Evaluate against a row with SQL null semantics
	pub fn matches(&self, row: &Row) -> bool {
		match self {
			Condition::Eq { column, value } if value.is_null() => row.get(column).is_null(),
			Condition::Eq { column, value } => {
				let actual = row.get(column);
				!actual.is_null() && actual == value
			}
			Condition::IsNull { column } => row.get(column).is_null(),
			Condition::IsNotNull { column } => !row.get(column).is_null(),
			Condition::In { column, values } => {
				let actual = row.get(column);
				!actual.is_null() && values.contains(actual)
			}
			Condition::All(conditions) => conditions.iter().all(|c| c.matches(row)),
		}
	}

	/// Columns the predicate reads
	pub fn columns(&self) -> Vec<&str> {
		match self {
			Condition::Eq { column, .. }
			| Condition::IsNull { column }
			| Condition::IsNotNull { column }
			| Condition::In { column, .. } => vec![column.as_str()],
			Condition::All(conditions) => conditions.iter().flat_map(|c| c.columns()).collect(),
		}
	}

	pub fn to_sea_condition(&self) -> SeaCondition {
		let leaf = |expr: Expr| SeaCondition::all().add(expr);
		match self {
			Condition::Eq { column, value } => {
				let col = Expr::col(Alias::new(column.clone()));
				match value {
					Value::Null => leaf(col.is_null()),
					v => leaf(col.eq(to_sea_value(v))),
				}
			}
			Condition::IsNull { column } => leaf(Expr::col(Alias::new(column.clone())).is_null()),
			Condition::IsNotNull { column } => leaf(Expr::col(Alias::new(column.clone())).is_not_null()),
			Condition::In { column, values } => leaf(
				Expr::col(Alias::new(column.clone())).is_in(
					values
						.iter()
						.filter(|v| !v.is_null())
						.map(to_sea_value)
						.collect::<Vec<_>>(),
				),
			),
			Condition::All(conditions) => conditions
				.iter()
				.fold(SeaCondition::all(), |acc, c| acc.add(c.to_sea_condition())),
		}
	}

	/// `SELECT *` over `table` filtered by this predicate, in PostgreSQL syntax
	pub fn select_sql(&self, table: &str) -> String {
		Query::select()
			.column(Asterisk)
			.from(Alias::new(table.to_string()))
			.cond_where(self.to_sea_condition())
			.to_string(PostgresQueryBuilder)
	}
}

impl fmt::Display for Condition {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Condition::Eq { column, value } if value.is_null() => write!(f, "{} IS NULL", column),
			Condition::Eq { column, value } => write!(f, "{} = {}", column, value),
			Condition::IsNull { column } => write!(f, "{} IS NULL", column),
			Condition::IsNotNull { column } => write!(f, "{} IS NOT NULL", column),
			Condition::In { column, values } => {
				let values: Vec<String> = values.iter().map(ToString::to_string).collect();
				write!(f, "{} IN ({})", column, values.join(", "))
			}
			Condition::All(conditions) => {
				let parts: Vec<String> = conditions.iter().map(|c| format!("({})", c)).collect();
				f.write_str(&parts.join(" AND "))
			}
		}
	}
}

fn to_sea_value(value: &Value) -> sea_query::Value {
	match value {
		Value::Null => sea_query::Value::BigInt(None),
		Value::Bool(v) => sea_query::Value::from(*v),
		Value::Int(v) => sea_query::Value::from(*v),
		Value::Text(v) => sea_query::Value::from(v.clone()),
		Value::Uuid(v) => sea_query::Value::from(*v),
	}
}

/// Right-hand side of a lookup
#[derive(Clone, Copy)]
pub enum LookupValue<'a> {
	/// A stored row of some model
	Instance(&'a dyn Storable),
	/// A plain value, e.g. the flag of `isnull`
	Value(&'a Value),
	/// `None`
	Null,
}

impl<'a> LookupValue<'a> {
	pub fn instance(instance: &'a dyn Storable) -> Self {
		LookupValue::Instance(instance)
	}

	fn describe(&self) -> String {
		match self {
			LookupValue::Instance(instance) => format!("instance of {}", instance.model_key()),
			LookupValue::Value(value) => value.kind().to_string(),
			LookupValue::Null => "null".to_string(),
		}
	}
}

impl fmt::Debug for LookupValue<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			LookupValue::Instance(instance) => f
				.debug_struct("Instance")
				.field("model", &instance.model_key())
				.field("pk", &instance.pk_value())
				.finish(),
			LookupValue::Value(value) => f.debug_tuple("Value").field(value).finish(),
			LookupValue::Null => f.write_str("Null"),
		}
	}
}

impl<'a> From<&'a Row> for LookupValue<'a> {
	fn from(row: &'a Row) -> Self {
		LookupValue::Instance(row)
	}
}

impl<'a> From<&'a Value> for LookupValue<'a> {
	fn from(value: &'a Value) -> Self {
		match value {
			Value::Null => LookupValue::Null,
			v => LookupValue::Value(v),
		}
	}
}

/// Rewrite `lookup` against `field` into column predicates
///
/// `lookup` is the part of the path after the field name, e.g. `exact` or
/// `isnull`.
pub fn translate(
	field: &ReferenceField,
	directory: &dyn TypeDirectory,
	lookup: &str,
	rhs: LookupValue<'_>,
) -> Result<Condition> {
	tracing::trace!(field = field.name(), lookup, rhs = ?rhs, "translating lookup");

	let unsupported = || TranslationError::UnsupportedLookup {
		field: field.name().to_string(),
		lookup: lookup.to_string(),
	};
	if lookup.contains(LOOKUP_SEP) {
		return Err(unsupported().into());
	}

	match (lookup, rhs) {
		("exact", LookupValue::Null) => Ok(Condition::is_null(field.id_field())),
		("exact", LookupValue::Instance(instance)) => exact(field, directory, instance),
		("isnull", LookupValue::Value(Value::Bool(true))) => {
			Ok(Condition::is_null(field.id_field()))
		}
		("isnull", LookupValue::Value(Value::Bool(false))) => {
			Ok(Condition::is_not_null(field.id_field()))
		}
		("exact", other) => Err(mismatch(field, lookup, "a model instance", &other).into()),
		("isnull", other) => Err(mismatch(field, lookup, "a boolean", &other).into()),
		_ => Err(unsupported().into()),
	}
}

fn exact(
	field: &ReferenceField,
	directory: &dyn TypeDirectory,
	instance: &dyn Storable,
) -> Result<Condition> {
	let model = instance.model_key();
	let tag = directory.tag_for(&model)?;
	field.check_target(&model, "exact")?;
	let pk = instance
		.pk_value()
		.ok_or_else(|| TranslationError::UnsavedInstance {
			field: field.name().to_string(),
			model,
		})?;
	if !field.id_column().column_type().accepts(&pk) {
		return Err(TranslationError::TypeMismatch {
			field: field.name().to_string(),
			lookup: "exact".to_string(),
			expected: "a primary key fitting the identifier column",
			found: pk.kind().to_string(),
		}
		.into());
	}

	Ok(Condition::all([
		Condition::eq(field.type_field(), tag),
		Condition::eq(field.id_field(), pk),
	]))
}

fn mismatch(
	field: &ReferenceField,
	lookup: &str,
	expected: &'static str,
	found: &LookupValue<'_>,
) -> TranslationError {
	TranslationError::TypeMismatch {
		field: field.name().to_string(),
		lookup: lookup.to_string(),
		expected,
		found: found.describe(),
	}
}

/// Rewrite a filter path such as `content__isnull` on `owner`
///
/// The first segment names a reference field; the lookup defaults to
/// `exact` when the path has no further segments.
///
/// # Examples
///
/// ```
/// use reinhardt_subtyping::{
///     BaseTypeForeignKey, BaseTypeOptions, Condition, LookupValue, ModelBuilder,
///     SubtypeRegistry, Value, translate_filter,
/// };
///
/// let registry = SubtypeRegistry::new();
/// let content = registry.declare_base(BaseTypeOptions::new("cms", "Content")).unwrap();
/// let comment = ModelBuilder::new("cms", "Comment")
///     .reference("content", BaseTypeForeignKey::new(&content).null(true))
///     .build(&registry)
///     .unwrap();
///
/// let flag = Value::Bool(true);
/// let condition = translate_filter(&comment, "content__isnull", LookupValue::Value(&flag)).unwrap();
/// assert_eq!(condition, Condition::is_null("content_id"));
/// ```
pub fn translate_filter(owner: &ModelMeta, path: &str, rhs: LookupValue<'_>) -> Result<Condition> {
	let (name, lookup) = path.split_once(LOOKUP_SEP).unwrap_or((path, "exact"));
	let field = owner
		.reference(name)
		.ok_or_else(|| TranslationError::UnknownField {
			model: owner.key().clone(),
			field: name.to_string(),
		})?;
	field.lookup(lookup, rhs)
}
