//! Polymorphic reference fields
//!
//! A [`BaseTypeForeignKey`] is declared on an owner model against a base
//! type. When the owner is built it contributes two columns: a type column
//! pointing at the type directory and an identifier column holding the
//! referenced row's primary key. It also attaches a [`GenericRelation`] to
//! every eligible subtype of the base type, including subtypes registered
//! after the owner was built.
//!
//! Abstract owners keep the declaration without contributing anything; the
//! concrete models extending them contribute the columns under the names
//! resolved on the abstract declaration.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::directory::{TypeDirectory, TypeTag};
use crate::error::{DeclarationError, Result, SubtypingError, TranslationError};
use crate::lookups::{self, Condition, LookupValue};
use crate::model::{ColumnDef, ColumnType, ModelKey, Row, Storable, Value};
use crate::registry::{BaseType, SubtypeEvent, SubtypeRegistry};
use crate::relations::GenericRelation;
use crate::settings::SubtypingSettings;
use crate::storage::StorageEngine;

/// Declaration of a polymorphic reference to any subtype of a base type
///
/// # Examples
///
/// ```
/// use reinhardt_subtyping::{BaseTypeForeignKey, BaseTypeOptions, ModelBuilder, SubtypeRegistry};
///
/// let registry = SubtypeRegistry::new();
/// let content = registry.declare_base(BaseTypeOptions::new("cms", "Content")).unwrap();
///
/// let comment = ModelBuilder::new("cms", "Comment")
///     .reference(
///         "target",
///         BaseTypeForeignKey::new(&content)
///             .type_field("target_ct")
///             .id_field("target_pk")
///             .related_name("comments")
///             .null(true),
///     )
///     .build(&registry)
///     .unwrap();
///
/// let field = comment.reference("target").unwrap();
/// assert_eq!(field.type_field(), "target_ct");
/// assert_eq!(field.id_field(), "target_pk");
/// assert_eq!(field.related_name(), "comments");
/// ```
#[derive(Debug, Clone)]
pub struct BaseTypeForeignKey {
	base: Arc<BaseType>,
	related_name: Option<String>,
	type_field: Option<String>,
	id_field: Option<String>,
	query_prefix: Option<String>,
	limit_types_to: Option<Vec<ModelKey>>,
	null: bool,
	blank: bool,
	db_index: Option<bool>,
}

impl BaseTypeForeignKey {
	pub fn new(base: &Arc<BaseType>) -> Self {
		Self {
			base: Arc::clone(base),
			related_name: None,
			type_field: None,
			id_field: None,
			query_prefix: None,
			limit_types_to: None,
			null: false,
			blank: false,
			db_index: None,
		}
	}

	/// Name of the reverse relation on each subtype, `<owner>_set` by default
	pub fn related_name(mut self, related_name: impl Into<String>) -> Self {
		self.related_name = Some(related_name.into());
		self
	}

	/// Type column name, `<field>_type` by default
	pub fn type_field(mut self, type_field: impl Into<String>) -> Self {
		self.type_field = Some(type_field.into());
		self
	}

	/// Identifier column name, `<field>_id` by default
	pub fn id_field(mut self, id_field: impl Into<String>) -> Self {
		self.id_field = Some(id_field.into());
		self
	}

	/// Prefix of reverse query names, `<field>_` by default
	pub fn query_prefix(mut self, query_prefix: impl Into<String>) -> Self {
		self.query_prefix = Some(query_prefix.into());
		self
	}

	/// Restrict the advertised type choices to these models
	///
	/// The restriction only shapes [`ReferenceField::type_choices`]; storage
	/// and lookups still accept any subtype of the base type.
	pub fn limit_types_to(mut self, models: impl IntoIterator<Item = ModelKey>) -> Self {
		self.limit_types_to = Some(models.into_iter().collect());
		self
	}

	/// [`limit_types_to`](Self::limit_types_to) with `"app_label.Model"` references
	pub fn limit_types_to_labels<'a>(
		self,
		labels: impl IntoIterator<Item = &'a str>,
	) -> std::result::Result<Self, DeclarationError> {
		let models = labels
			.into_iter()
			.map(|label| {
				ModelKey::parse(label)
					.ok_or_else(|| DeclarationError::InvalidModelReference(label.to_string()))
			})
			.collect::<std::result::Result<Vec<_>, _>>()?;
		Ok(self.limit_types_to(models))
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
		self.db_index = Some(db_index);
		self
	}

	pub fn base(&self) -> &Arc<BaseType> {
		&self.base
	}

	/// Column names as resolved so far, `None` until the field is declared
	/// on a model
	pub fn column_names(&self) -> (Option<&str>, Option<&str>) {
		(self.type_field.as_deref(), self.id_field.as_deref())
	}

	/// Fix the column names against the field name
	pub(crate) fn resolve_names(&self, name: &str, settings: &SubtypingSettings) -> Self {
		let mut resolved = self.clone();
		resolved
			.type_field
			.get_or_insert_with(|| settings.type_field_for(name));
		resolved
			.id_field
			.get_or_insert_with(|| settings.id_field_for(name));
		resolved
	}

	/// Compute the columns and names this field contributes to `owner`
	/// without side effects
	pub(crate) fn plan(
		&self,
		name: &str,
		owner: &ModelKey,
		registry: &SubtypeRegistry,
	) -> Result<FieldPlan> {
		if registry.base(self.base.key()).is_none() {
			return Err(DeclarationError::UnknownBase(self.base.key().clone()).into());
		}
		let settings = registry.settings();

		let type_field = self
			.type_field
			.clone()
			.unwrap_or_else(|| settings.type_field_for(name));
		let id_field = self
			.id_field
			.clone()
			.unwrap_or_else(|| settings.id_field_for(name));
		let db_index = self.db_index.unwrap_or(settings.db_index);

		let type_column = ColumnDef::new(
			&type_field,
			ColumnType::ForeignKey {
				to: settings.directory_model.clone(),
			},
		)
		.related_name(format!("{}_{}", type_field, owner.model()));

		let base_pk = self.base.pk_or_default();
		let id_column = if base_pk.column_type().is_auto() {
			ColumnDef::new(&id_field, ColumnType::PositiveInteger)
		} else {
			base_pk.clone_shape(&id_field)
		};

		let finish = |column: ColumnDef| {
			column
				.null(self.null)
				.blank(self.blank)
				.db_index(db_index)
				.editable(false)
		};

		Ok(FieldPlan {
			name: name.to_string(),
			owner: owner.clone(),
			base: Arc::clone(&self.base),
			type_column: finish(type_column),
			id_column: finish(id_column),
			related_name: self
				.related_name
				.clone()
				.unwrap_or_else(|| settings.related_name_for(owner.model())),
			query_prefix: self
				.query_prefix
				.clone()
				.unwrap_or_else(|| settings.query_prefix_for(name)),
			limit_types_to: self.limit_types_to.clone(),
		})
	}
}

/// Resolved contribution of a reference field to one concrete owner
#[derive(Debug, Clone)]
pub(crate) struct FieldPlan {
	name: String,
	owner: ModelKey,
	base: Arc<BaseType>,
	type_column: ColumnDef,
	id_column: ColumnDef,
	related_name: String,
	query_prefix: String,
	limit_types_to: Option<Vec<ModelKey>>,
}

impl FieldPlan {
	pub(crate) fn columns(&self) -> [&ColumnDef; 2] {
		[&self.type_column, &self.id_column]
	}
}

/// A reference field bound to a concrete owner model
#[derive(Debug)]
pub struct ReferenceField {
	name: String,
	owner: ModelKey,
	base: Arc<BaseType>,
	type_column: ColumnDef,
	id_column: ColumnDef,
	related_name: String,
	query_prefix: String,
	limit_types_to: Option<Vec<ModelKey>>,
	directory: Arc<dyn TypeDirectory>,
	relations: RwLock<IndexMap<String, GenericRelation>>,
}

impl ReferenceField {
	/// Bind a planned field and subscribe it to its base type
	///
	/// Existing subtypes receive their reverse relation immediately; later
	/// registrations receive theirs as they happen.
	pub(crate) fn bind(plan: FieldPlan, registry: &SubtypeRegistry) -> Result<Arc<Self>> {
		let field = Arc::new(ReferenceField {
			name: plan.name,
			owner: plan.owner,
			base: plan.base,
			type_column: plan.type_column,
			id_column: plan.id_column,
			related_name: plan.related_name,
			query_prefix: plan.query_prefix,
			limit_types_to: plan.limit_types_to,
			directory: Arc::clone(registry.directory()),
			relations: RwLock::new(IndexMap::new()),
		});

		tracing::debug!(
			owner = %field.owner,
			field = %field.name,
			base = %field.base.key(),
			type_field = field.type_field(),
			id_field = field.id_field(),
			"reference field contributed"
		);

		let index = registry.relation_index();
		let subscriber = Arc::clone(&field);
		registry.observe_subtypes(
			&field.base,
			Arc::new(move |event: &SubtypeEvent| {
				let relation = subscriber.relation_for(event);
				subscriber
					.relations
					.write()
					.insert(relation.query_name.clone(), relation.clone());
				index.attach(relation);
			}),
		)?;

		Ok(field)
	}

	fn relation_for(&self, event: &SubtypeEvent) -> GenericRelation {
		GenericRelation {
			related_name: self.related_name.clone(),
			query_name: format!("{}{}", self.query_prefix, event.query_name),
			owner: self.owner.clone(),
			field_name: self.name.clone(),
			subtype: event.subtype.clone(),
			tag: event.tag,
			type_field: self.type_field().to_string(),
			id_field: self.id_field().to_string(),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn owner(&self) -> &ModelKey {
		&self.owner
	}

	pub fn base(&self) -> &Arc<BaseType> {
		&self.base
	}

	pub fn type_field(&self) -> &str {
		self.type_column.name()
	}

	pub fn id_field(&self) -> &str {
		self.id_column.name()
	}

	pub fn type_column(&self) -> &ColumnDef {
		&self.type_column
	}

	pub fn id_column(&self) -> &ColumnDef {
		&self.id_column
	}

	pub fn related_name(&self) -> &str {
		&self.related_name
	}

	pub fn query_prefix(&self) -> &str {
		&self.query_prefix
	}

	pub fn limit_types_to(&self) -> Option<&[ModelKey]> {
		self.limit_types_to.as_deref()
	}

	pub fn is_nullable(&self) -> bool {
		self.id_column.null
	}

	/// Reverse relations this field has attached, keyed by query name
	pub fn relations(&self) -> Vec<GenericRelation> {
		self.relations.read().values().cloned().collect()
	}

	pub fn relation(&self, query_name: &str) -> Option<GenericRelation> {
		self.relations.read().get(query_name).cloned()
	}

	/// Advisory predicate over the type directory selecting valid type
	/// choices, evaluated against the registry as it is now
	///
	/// Models named in `limit_types_to` are installed in the directory if
	/// needed. Members of an explicit subtype set that have not been
	/// registered yet are left out.
	pub fn type_choices(&self, registry: &SubtypeRegistry) -> Result<Condition> {
		let models = match &self.limit_types_to {
			Some(models) => {
				for model in models {
					self.directory.get_or_create(model);
				}
				models.clone()
			}
			None => registry
				.subtypes_of(&self.base)
				.into_iter()
				.filter(|model| self.directory.tag_for(model).is_ok())
				.collect(),
		};
		Ok(self.directory.tags_in(&models)?)
	}

	/// Whether `model` is a subtype this field can point at
	///
	/// Holds for every subtype of the base type that received a reverse
	/// relation from this field.
	pub fn accepts_model(&self, model: &ModelKey) -> bool {
		self.relations
			.read()
			.values()
			.any(|relation| &relation.subtype == model)
	}

	/// Reject targets outside this field's base type
	pub(crate) fn check_target(&self, model: &ModelKey, operation: &str) -> Result<()> {
		if !self.accepts_model(model) {
			return Err(TranslationError::TypeMismatch {
				field: self.name.clone(),
				lookup: operation.to_string(),
				expected: "an instance of a subtype of the field's base type",
				found: model.to_string(),
			}
			.into());
		}
		Ok(())
	}

	/// Rewrite a lookup such as `exact` or `isnull` against this field
	///
	/// # Examples
	///
	/// ```
	/// use reinhardt_subtyping::{
	///     BaseTypeForeignKey, BaseTypeOptions, Condition, LookupValue, ModelBuilder, Row,
	///     SubtypeRegistry, TypeDirectory,
	/// };
	///
	/// let registry = SubtypeRegistry::new();
	/// let content = registry.declare_base(BaseTypeOptions::new("cms", "Content")).unwrap();
	/// let article = ModelBuilder::new("cms", "Article").build(&registry).unwrap();
	/// registry.register_subtype(&content, &article).unwrap();
	/// let comment = ModelBuilder::new("cms", "Comment")
	///     .reference("content", BaseTypeForeignKey::new(&content))
	///     .build(&registry)
	///     .unwrap();
	///
	/// let instance = Row::new(&article).with("id", 42);
	/// let field = comment.reference("content").unwrap();
	/// let condition = field.lookup("exact", LookupValue::from(&instance)).unwrap();
	///
	/// let tag = registry.directory().tag_for(article.key()).unwrap();
	/// assert_eq!(
	///     condition,
	///     Condition::all([Condition::eq("content_type", tag), Condition::eq("content_id", 42)])
	/// );
	/// ```
	pub fn lookup(&self, lookup: &str, rhs: LookupValue<'_>) -> Result<Condition> {
		lookups::translate(self, self.directory.as_ref(), lookup, rhs)
	}

	/// Point `row` at `target`, or clear the reference
	pub fn set(&self, row: &mut Row, target: Option<&dyn Storable>) -> Result<()> {
		self.check_owner(row, "set")?;
		let Some(target) = target else {
			row.set(self.type_field(), Value::Null);
			row.set(self.id_field(), Value::Null);
			return Ok(());
		};

		let model = target.model_key();
		let tag = self.directory.tag_for(&model)?;
		self.check_target(&model, "set")?;
		let pk = target
			.pk_value()
			.ok_or_else(|| TranslationError::UnsavedInstance {
				field: self.name.clone(),
				model,
			})?;
		if !self.id_column.column_type().accepts(&pk) {
			return Err(TranslationError::TypeMismatch {
				field: self.name.clone(),
				lookup: "set".to_string(),
				expected: "a primary key fitting the identifier column",
				found: pk.kind().to_string(),
			}
			.into());
		}

		row.set(self.type_field(), tag);
		row.set(self.id_field(), pk);
		Ok(())
	}

	/// Model and primary key `row` points at, `None` for a null reference
	pub fn target(&self, row: &Row) -> Result<Option<(ModelKey, Value)>> {
		self.check_owner(row, "target")?;
		let inconsistent = || SubtypingError::InconsistentReference {
			field: self.name.clone(),
		};

		match (row.get(self.type_field()), row.get(self.id_field())) {
			(Value::Null, Value::Null) => Ok(None),
			(Value::Int(tag), id) if !id.is_null() => {
				let model = self.directory.type_for(TypeTag(*tag))?;
				Ok(Some((model, id.clone())))
			}
			_ => Err(inconsistent()),
		}
	}

	/// Load the row `row` points at through `storage`
	pub fn get(&self, row: &Row, storage: &dyn StorageEngine) -> Result<Option<Row>> {
		match self.target(row)? {
			Some((model, pk)) => Ok(storage.get(&model, &pk)?),
			None => Ok(None),
		}
	}

	fn check_owner(&self, row: &Row, operation: &str) -> Result<()> {
		if row.model() != &self.owner {
			return Err(TranslationError::TypeMismatch {
				field: self.name.clone(),
				lookup: operation.to_string(),
				expected: "a row of the owner model",
				found: row.model().to_string(),
			}
			.into());
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::ModelBuilder;
	use crate::registry::BaseTypeOptions;
	use rstest::{fixture, rstest};

	struct Cms {
		registry: SubtypeRegistry,
		content: Arc<BaseType>,
	}

	#[fixture]
	fn cms() -> Cms {
		let registry = SubtypeRegistry::new();
		let content = registry
			.declare_base(BaseTypeOptions::new("cms", "Content"))
			.unwrap();
		Cms { registry, content }
	}

	#[rstest]
	fn test_default_columns(cms: Cms) {
		// Act
		let comment = ModelBuilder::new("cms", "Comment")
			.reference("content", BaseTypeForeignKey::new(&cms.content))
			.build(&cms.registry)
			.unwrap();

		// Assert
		let type_column = comment.column("content_type").unwrap();
		assert_eq!(
			type_column.column_type(),
			&ColumnType::ForeignKey {
				to: "contenttypes.ContentType".to_string()
			}
		);
		assert_eq!(
			type_column.related_name.as_deref(),
			Some("content_type_comment")
		);
		assert!(!type_column.editable);
		assert!(type_column.db_index);

		let id_column = comment.column("content_id").unwrap();
		assert_eq!(id_column.column_type(), &ColumnType::PositiveInteger);
		assert!(!id_column.null);

		let field = comment.reference("content").unwrap();
		assert_eq!(field.related_name(), "comment_set");
		assert_eq!(field.query_prefix(), "content_");
	}

	#[rstest]
	fn test_identifier_clones_non_auto_base_pk() {
		let registry = SubtypeRegistry::new();
		let media = registry
			.declare_base(
				BaseTypeOptions::new("cms", "Media")
					.primary_key(ColumnDef::new("uid", ColumnType::Uuid)),
			)
			.unwrap();

		let note = ModelBuilder::new("cms", "Note")
			.reference("media", BaseTypeForeignKey::new(&media).null(true))
			.build(&registry)
			.unwrap();

		let id_column = note.column("media_id").unwrap();
		assert_eq!(id_column.column_type(), &ColumnType::Uuid);
		assert!(!id_column.is_primary_key());
		assert!(!id_column.unique);
		assert!(id_column.null);
	}

	#[rstest]
	fn test_big_auto_base_pk_uses_positive_integer() {
		let registry = SubtypeRegistry::new();
		let media = registry
			.declare_base(
				BaseTypeOptions::new("cms", "Media")
					.primary_key(ColumnDef::new("id", ColumnType::BigAutoField)),
			)
			.unwrap();

		let note = ModelBuilder::new("cms", "Note")
			.reference("media", BaseTypeForeignKey::new(&media))
			.build(&registry)
			.unwrap();

		assert_eq!(
			note.column("media_id").unwrap().column_type(),
			&ColumnType::PositiveInteger
		);
	}

	#[rstest]
	fn test_abstract_owner_defers_columns_and_children_inherit_names(cms: Cms) {
		// Arrange
		let template = ModelBuilder::new("cms", "Annotation")
			.abstract_model()
			.reference(
				"target",
				BaseTypeForeignKey::new(&cms.content).id_field("target_pk"),
			)
			.build(&cms.registry)
			.unwrap();

		// Act
		let note = ModelBuilder::new("cms", "Note")
			.extends(&template)
			.build(&cms.registry)
			.unwrap();

		// Assert
		assert!(template.columns().is_empty());
		assert!(template.references().is_empty());
		assert_eq!(
			template.declarations()[0].1.column_names(),
			(Some("target_type"), Some("target_pk"))
		);
		assert!(note.column("target_type").is_some());
		assert!(note.column("target_pk").is_some());
		assert_eq!(note.reference("target").unwrap().related_name(), "note_set");
	}

	#[rstest]
	fn test_abstract_owner_attaches_no_relations(cms: Cms) {
		let article = ModelBuilder::new("cms", "Article")
			.build(&cms.registry)
			.unwrap();
		cms.registry.register_subtype(&cms.content, &article).unwrap();

		ModelBuilder::new("cms", "Annotation")
			.abstract_model()
			.reference("target", BaseTypeForeignKey::new(&cms.content))
			.build(&cms.registry)
			.unwrap();

		assert!(cms.registry.relations().relations_on(article.key()).is_empty());
	}

	#[rstest]
	fn test_column_collision_is_rejected(cms: Cms) {
		let result = ModelBuilder::new("cms", "Comment")
			.column(ColumnDef::new("content_id", ColumnType::Integer))
			.reference("content", BaseTypeForeignKey::new(&cms.content))
			.build(&cms.registry);

		assert!(matches!(
			result,
			Err(SubtypingError::Declaration(
				DeclarationError::DuplicateField { .. }
			))
		));
	}

	#[rstest]
	fn test_failed_build_attaches_nothing(cms: Cms) {
		let article = ModelBuilder::new("cms", "Article")
			.build(&cms.registry)
			.unwrap();
		cms.registry.register_subtype(&cms.content, &article).unwrap();

		let result = ModelBuilder::new("cms", "Comment")
			.reference("content", BaseTypeForeignKey::new(&cms.content))
			.reference(
				"other",
				BaseTypeForeignKey::new(&cms.content).type_field("content_type"),
			)
			.build(&cms.registry);

		assert!(result.is_err());
		assert!(cms.registry.relations().relations_on(article.key()).is_empty());
	}

	#[rstest]
	fn test_relations_attach_for_late_subtypes(cms: Cms) {
		// Arrange
		let comment = ModelBuilder::new("cms", "Comment")
			.reference("content", BaseTypeForeignKey::new(&cms.content))
			.build(&cms.registry)
			.unwrap();
		let video = ModelBuilder::new("cms", "Video")
			.build(&cms.registry)
			.unwrap();

		// Act
		cms.registry.register_subtype(&cms.content, &video).unwrap();

		// Assert
		let field = comment.reference("content").unwrap();
		let relation = field.relation("content_video").unwrap();
		assert_eq!(relation.related_name(), "comment_set");
		assert_eq!(relation.subtype(), video.key());
		assert_eq!(
			cms.registry.relations().get(video.key(), "content_video"),
			Some(relation)
		);
	}

	#[rstest]
	fn test_query_prefix_and_subtype_query_name(cms: Cms) {
		let clip = ModelBuilder::new("cms", "VideoClip")
			.query_name("clip")
			.build(&cms.registry)
			.unwrap();
		cms.registry.register_subtype(&cms.content, &clip).unwrap();

		let comment = ModelBuilder::new("cms", "Comment")
			.reference(
				"content",
				BaseTypeForeignKey::new(&cms.content).query_prefix("about_"),
			)
			.build(&cms.registry)
			.unwrap();

		let field = comment.reference("content").unwrap();
		assert!(field.relation("about_clip").is_some());
	}

	#[rstest]
	fn test_type_choices_follow_registry_and_restriction(cms: Cms) {
		// Arrange
		let article = ModelBuilder::new("cms", "Article")
			.build(&cms.registry)
			.unwrap();
		let video = ModelBuilder::new("cms", "Video")
			.build(&cms.registry)
			.unwrap();
		let comment = ModelBuilder::new("cms", "Comment")
			.reference("content", BaseTypeForeignKey::new(&cms.content))
			.reference(
				"featured",
				BaseTypeForeignKey::new(&cms.content)
					.limit_types_to_labels(["cms.Video"])
					.unwrap(),
			)
			.build(&cms.registry)
			.unwrap();
		let a = cms.registry.register_subtype(&cms.content, &article).unwrap();
		let v = cms.registry.register_subtype(&cms.content, &video).unwrap();

		// Act
		let all = comment
			.reference("content")
			.unwrap()
			.type_choices(&cms.registry)
			.unwrap();
		let limited = comment
			.reference("featured")
			.unwrap()
			.type_choices(&cms.registry)
			.unwrap();

		// Assert
		assert_eq!(all, Condition::is_in("id", vec![a.into(), v.into()]));
		assert_eq!(limited, Condition::is_in("id", vec![v.into()]));
	}

	#[rstest]
	fn test_invalid_label_is_rejected(cms: Cms) {
		let result = BaseTypeForeignKey::new(&cms.content).limit_types_to_labels(["Video"]);

		assert_eq!(
			result.err(),
			Some(DeclarationError::InvalidModelReference("Video".to_string()))
		);
	}

	#[rstest]
	fn test_set_target_and_clear(cms: Cms) {
		// Arrange
		let article = ModelBuilder::new("cms", "Article")
			.build(&cms.registry)
			.unwrap();
		let tag = cms.registry.register_subtype(&cms.content, &article).unwrap();
		let comment = ModelBuilder::new("cms", "Comment")
			.reference("content", BaseTypeForeignKey::new(&cms.content).null(true))
			.build(&cms.registry)
			.unwrap();
		let field = comment.reference("content").unwrap();
		let instance = Row::new(&article).with("id", 42);
		let mut row = Row::new(&comment).with("id", 1);

		// Act
		field.set(&mut row, Some(&instance)).unwrap();

		// Assert
		assert_eq!(row.get("content_type"), &Value::from(tag));
		assert_eq!(
			field.target(&row).unwrap(),
			Some((article.key().clone(), Value::Int(42)))
		);

		field.set(&mut row, None).unwrap();
		assert_eq!(field.target(&row).unwrap(), None);
		assert!(row.get("content_type").is_null());
	}

	#[rstest]
	fn test_half_set_reference_is_inconsistent(cms: Cms) {
		let comment = ModelBuilder::new("cms", "Comment")
			.reference("content", BaseTypeForeignKey::new(&cms.content).null(true))
			.build(&cms.registry)
			.unwrap();
		let field = comment.reference("content").unwrap();
		let row = Row::new(&comment).with("content_id", 5);

		assert_eq!(
			field.target(&row),
			Err(SubtypingError::InconsistentReference {
				field: "content".to_string()
			})
		);
	}

	#[rstest]
	fn test_set_rejects_unsaved_and_foreign_rows(cms: Cms) {
		let article = ModelBuilder::new("cms", "Article")
			.build(&cms.registry)
			.unwrap();
		cms.registry.register_subtype(&cms.content, &article).unwrap();
		let comment = ModelBuilder::new("cms", "Comment")
			.reference("content", BaseTypeForeignKey::new(&cms.content))
			.build(&cms.registry)
			.unwrap();
		let field = comment.reference("content").unwrap();

		let unsaved = Row::new(&article);
		let mut row = Row::new(&comment);
		assert!(matches!(
			field.set(&mut row, Some(&unsaved)),
			Err(SubtypingError::Translation(
				TranslationError::UnsavedInstance { .. }
			))
		));

		let mut not_owner = Row::new(&article).with("id", 1);
		let target = Row::new(&article).with("id", 2);
		assert!(matches!(
			field.set(&mut not_owner, Some(&target)),
			Err(SubtypingError::Translation(
				TranslationError::TypeMismatch { .. }
			))
		));
	}

	#[rstest]
	fn test_set_rejects_unregistered_target(cms: Cms) {
		let stray = ModelBuilder::new("cms", "Stray")
			.build(&cms.registry)
			.unwrap();
		let comment = ModelBuilder::new("cms", "Comment")
			.reference("content", BaseTypeForeignKey::new(&cms.content))
			.build(&cms.registry)
			.unwrap();
		let field = comment.reference("content").unwrap();
		let mut row = Row::new(&comment);

		let result = field.set(&mut row, Some(&Row::new(&stray).with("id", 1)));

		assert!(matches!(
			result,
			Err(SubtypingError::Directory(
				crate::error::DirectoryError::NotRegistered(_)
			))
		));
	}

	#[rstest]
	fn test_type_choices_skip_unregistered_members_of_explicit_set() {
		// Arrange
		let registry = SubtypeRegistry::new();
		let content = registry
			.declare_base(
				BaseTypeOptions::new("cms", "Content").subtypes([
					ModelKey::new("cms", "Article"),
					ModelKey::new("cms", "Video"),
				]),
			)
			.unwrap();
		let comment = ModelBuilder::new("cms", "Comment")
			.reference("content", BaseTypeForeignKey::new(&content))
			.build(&registry)
			.unwrap();
		let field = comment.reference("content").unwrap();
		let article = ModelBuilder::new("cms", "Article").build(&registry).unwrap();
		let tag = registry.register_subtype(&content, &article).unwrap();

		// Act
		let choices = field.type_choices(&registry).unwrap();

		// Assert
		assert_eq!(choices, Condition::is_in("id", vec![tag.into()]));
	}

	#[rstest]
	fn test_type_choices_install_restricted_models(cms: Cms) {
		// Arrange
		let comment = ModelBuilder::new("cms", "Comment")
			.reference(
				"content",
				BaseTypeForeignKey::new(&cms.content)
					.limit_types_to([ModelKey::new("cms", "Podcast")]),
			)
			.build(&cms.registry)
			.unwrap();
		let field = comment.reference("content").unwrap();

		// Act
		let choices = field.type_choices(&cms.registry).unwrap();

		// Assert
		let podcast = cms
			.registry
			.directory()
			.tag_for(&ModelKey::new("cms", "Podcast"))
			.unwrap();
		assert_eq!(choices, Condition::is_in("id", vec![podcast.into()]));
	}

	#[rstest]
	fn test_subtype_of_another_base_is_rejected(cms: Cms) {
		// Arrange
		let media = cms
			.registry
			.declare_base(BaseTypeOptions::new("cms", "Media"))
			.unwrap();
		let photo = ModelBuilder::new("cms", "Photo")
			.build(&cms.registry)
			.unwrap();
		cms.registry.register_subtype(&media, &photo).unwrap();
		let comment = ModelBuilder::new("cms", "Comment")
			.reference("content", BaseTypeForeignKey::new(&cms.content))
			.build(&cms.registry)
			.unwrap();
		let field = comment.reference("content").unwrap();
		let instance = Row::new(&photo).with("id", 1);
		let mut row = Row::new(&comment);

		// Act
		let set = field.set(&mut row, Some(&instance));
		let exact = field.lookup("exact", LookupValue::from(&instance));

		// Assert
		for result in [set.map(|_| ()), exact.map(|_| ())] {
			assert!(matches!(
				result,
				Err(SubtypingError::Translation(
					TranslationError::TypeMismatch { .. }
				))
			));
		}
		assert!(!field.accepts_model(photo.key()));
		assert!(row.get("content_type").is_null());
	}

	#[rstest]
	fn test_owner_mismatch_names_the_operation(cms: Cms) {
		let article = ModelBuilder::new("cms", "Article")
			.build(&cms.registry)
			.unwrap();
		let comment = ModelBuilder::new("cms", "Comment")
			.reference("content", BaseTypeForeignKey::new(&cms.content))
			.build(&cms.registry)
			.unwrap();
		let field = comment.reference("content").unwrap();

		let result = field.target(&Row::new(&article));

		match result {
			Err(SubtypingError::Translation(TranslationError::TypeMismatch { lookup, .. })) => {
				assert_eq!(lookup, "target")
			}
			other => panic!("expected a type mismatch, got {:?}", other),
		}
	}
}
