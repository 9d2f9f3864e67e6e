//! Polymorphic Reference Integration Tests
//!
//! These tests drive the registry, reference fields, reverse relations and
//! lookup translation together against in-memory storage.
//!
//! **Test Coverage:**
//! - Declaration order independence (field first vs subtype first)
//! - Write/read round trip through a reference field
//! - Reverse relation listing of referencing owners
//! - `exact` and `isnull` lookups evaluated against stored rows
//! - Resolver ambiguity and duplicate-base registration
//! - Abstract owners propagating fields to concrete models

use std::sync::Arc;

use reinhardt_subtyping::{
	BaseType, BaseTypeForeignKey, BaseTypeOptions, ColumnDef, ColumnType, Condition,
	DeclarationError, LookupValue, MemoryStorage, ModelBuilder, ModelMeta, Row, Storable,
	StorageEngine, SubtypeRegistry, SubtypingError, TypeDirectory, Value, resolve_reference_field,
	translate_filter,
};
use rstest::*;

struct Cms {
	registry: SubtypeRegistry,
	content: Arc<BaseType>,
	article: Arc<ModelMeta>,
	video: Arc<ModelMeta>,
	comment: Arc<ModelMeta>,
	storage: MemoryStorage,
}

#[fixture]
fn cms() -> Cms {
	let registry = SubtypeRegistry::new();
	let content = registry
		.declare_base(BaseTypeOptions::new("cms", "Content"))
		.unwrap();
	let article = ModelBuilder::new("cms", "Article")
		.column(ColumnDef::new("title", ColumnType::Char { max_length: 200 }))
		.build(&registry)
		.unwrap();
	let video = ModelBuilder::new("cms", "Video")
		.column(ColumnDef::new("url", ColumnType::Text))
		.build(&registry)
		.unwrap();
	registry.register_subtype(&content, &article).unwrap();
	registry.register_subtype(&content, &video).unwrap();
	let comment = ModelBuilder::new("cms", "Comment")
		.column(ColumnDef::new("body", ColumnType::Text))
		.reference("content", BaseTypeForeignKey::new(&content).null(true))
		.build(&registry)
		.unwrap();

	let storage = MemoryStorage::new();
	for model in [&article, &video, &comment] {
		storage.create_table(model).unwrap();
	}

	Cms {
		registry,
		content,
		article,
		video,
		comment,
		storage,
	}
}

fn relation_names(registry: &SubtypeRegistry, model: &ModelMeta) -> Vec<(String, String)> {
	registry
		.relations()
		.relations_on(model.key())
		.iter()
		.map(|r| (r.related_name().to_string(), r.query_name().to_string()))
		.collect()
}

/// Test the comment-on-article scenario end to end
///
/// **Test Intent**: Verify equality against Article 42 translates to the
/// tag/identifier conjunction and that Article's reverse relation lists the
/// referencing comment
#[rstest]
fn test_comment_on_article(cms: Cms) {
	// Arrange
	let article = cms
		.storage
		.insert(Row::new(&cms.article).with("id", 42).with("title", "Hello"))
		.unwrap();
	let field = cms.comment.reference("content").unwrap();
	let mut comment = Row::new(&cms.comment).with("body", "Nice");
	field.set(&mut comment, Some(&article)).unwrap();
	let comment = cms.storage.insert(comment).unwrap();

	// Act
	let condition = field.lookup("exact", LookupValue::from(&article)).unwrap();

	// Assert
	let tag = cms.registry.directory().tag_for(cms.article.key()).unwrap();
	assert_eq!(
		condition,
		Condition::all([
			Condition::eq("content_type", tag),
			Condition::eq("content_id", 42),
		])
	);
	assert_eq!(
		cms.storage.filter(cms.comment.key(), &condition).unwrap(),
		vec![comment.clone()]
	);

	let relation = cms
		.registry
		.relations()
		.get(cms.article.key(), "content_article")
		.unwrap();
	assert_eq!(relation.related_name(), "comment_set");
	assert_eq!(
		relation.all(&cms.storage, &article).unwrap(),
		vec![comment]
	);
}

/// Test declaration order independence
///
/// **Test Intent**: Verify a field declared before its subtypes and a field
/// declared after them end with the same reverse relations
#[rstest]
fn test_declaration_order_is_irrelevant() {
	let build = |field_first: bool| {
		let registry = SubtypeRegistry::new();
		let content = registry
			.declare_base(BaseTypeOptions::new("cms", "Content"))
			.unwrap();
		let article = ModelBuilder::new("cms", "Article").build(&registry).unwrap();
		let video = ModelBuilder::new("cms", "Video").build(&registry).unwrap();
		let declare_comment = || {
			ModelBuilder::new("cms", "Comment")
				.reference("content", BaseTypeForeignKey::new(&content))
				.build(&registry)
				.unwrap()
		};

		let comment = if field_first {
			let comment = declare_comment();
			registry.register_subtype(&content, &article).unwrap();
			registry.register_subtype(&content, &video).unwrap();
			comment
		} else {
			registry.register_subtype(&content, &article).unwrap();
			registry.register_subtype(&content, &video).unwrap();
			declare_comment()
		};

		let field = comment.reference("content").unwrap();
		let field_relations: Vec<String> = field
			.relations()
			.iter()
			.map(|r| r.query_name().to_string())
			.collect();
		(
			registry.subtypes_of(&content),
			relation_names(&registry, &article),
			relation_names(&registry, &video),
			field_relations,
		)
	};

	let field_first = build(true);
	let subtype_first = build(false);

	assert_eq!(field_first, subtype_first);
	assert_eq!(
		field_first.1,
		vec![("comment_set".to_string(), "content_article".to_string())]
	);
	assert_eq!(
		field_first.3,
		vec!["content_article".to_string(), "content_video".to_string()]
	);
}

/// Test writing and reading back a reference for each subtype
#[rstest]
fn test_round_trip_across_subtypes(cms: Cms) {
	let field = cms.comment.reference("content").unwrap();
	let article = cms
		.storage
		.insert(Row::new(&cms.article).with("title", "A"))
		.unwrap();
	let video = cms
		.storage
		.insert(Row::new(&cms.video).with("url", "https://example.com/v"))
		.unwrap();

	for target in [&article, &video] {
		let mut row = Row::new(&cms.comment);
		field.set(&mut row, Some(target)).unwrap();
		let row = cms.storage.insert(row).unwrap();

		let loaded = field.get(&row, &cms.storage).unwrap().unwrap();

		assert_eq!(&loaded, target);
		assert_eq!(loaded.model_key(), target.model_key());
	}
}

/// Test that same identifiers under different subtypes stay distinct
#[rstest]
fn test_same_identifier_different_subtypes(cms: Cms) {
	// Arrange
	let article = cms.storage.insert(Row::new(&cms.article).with("id", 7)).unwrap();
	let video = cms.storage.insert(Row::new(&cms.video).with("id", 7)).unwrap();
	let field = cms.comment.reference("content").unwrap();
	let mut on_article = Row::new(&cms.comment);
	field.set(&mut on_article, Some(&article)).unwrap();
	let on_article = cms.storage.insert(on_article).unwrap();
	let mut on_video = Row::new(&cms.comment);
	field.set(&mut on_video, Some(&video)).unwrap();
	let on_video = cms.storage.insert(on_video).unwrap();

	// Act
	let for_article = field.lookup("exact", LookupValue::from(&article)).unwrap();
	let for_video = field.lookup("exact", LookupValue::from(&video)).unwrap();

	// Assert
	assert_ne!(for_article, for_video);
	assert_eq!(
		cms.storage.filter(cms.comment.key(), &for_article).unwrap(),
		vec![on_article]
	);
	assert_eq!(
		cms.storage.filter(cms.comment.key(), &for_video).unwrap(),
		vec![on_video]
	);
}

/// Test the `content__isnull` scenario
///
/// **Test Intent**: Verify a comment without a reference matches
/// `isnull=True` until the reference is set
#[rstest]
fn test_isnull_follows_reference(cms: Cms) {
	// Arrange
	let article = cms.storage.insert(Row::new(&cms.article)).unwrap();
	let comment = cms.storage.insert(Row::new(&cms.comment)).unwrap();
	let flag = Value::Bool(true);
	let isnull = translate_filter(&cms.comment, "content__isnull", LookupValue::Value(&flag))
		.unwrap();

	// Act
	let before = cms.storage.filter(cms.comment.key(), &isnull).unwrap();
	let field = cms.comment.reference("content").unwrap();
	let mut comment = comment;
	field.set(&mut comment, Some(&article)).unwrap();
	cms.storage.update(comment.clone()).unwrap();
	let after = cms.storage.filter(cms.comment.key(), &isnull).unwrap();

	// Assert
	assert_eq!(before.len(), 1);
	assert!(after.is_empty());
	assert_eq!(
		translate_filter(&cms.comment, "content", LookupValue::Null).unwrap(),
		isnull
	);
	let by_type_column = Condition::is_null("content_type");
	assert_eq!(
		cms.storage.filter(cms.comment.key(), &by_type_column).unwrap(),
		after
	);
}

/// Test traversal through the reference is refused
#[rstest]
fn test_traversal_is_unsupported(cms: Cms) {
	let title = Value::from("Hello");

	let result = translate_filter(&cms.comment, "content__title", LookupValue::Value(&title));

	assert!(matches!(
		result,
		Err(SubtypingError::Translation(
			reinhardt_subtyping::TranslationError::UnsupportedLookup { .. }
		))
	));
}

/// Test resolving "the" reference field with two candidates
#[rstest]
fn test_resolve_requires_disambiguation(cms: Cms) {
	let link = ModelBuilder::new("cms", "Link")
		.reference("source", BaseTypeForeignKey::new(&cms.content))
		.reference("target", BaseTypeForeignKey::new(&cms.content))
		.build(&cms.registry)
		.unwrap();

	let result = resolve_reference_field(&link, &cms.content, None);

	match result {
		Err(SubtypingError::Declaration(DeclarationError::AmbiguousReferenceField {
			candidates,
			..
		})) => assert_eq!(candidates, vec!["source", "target"]),
		other => panic!("expected an ambiguous field error, got {:?}", other),
	}
	assert_eq!(
		resolve_reference_field(&cms.comment, &cms.content, None)
			.unwrap()
			.name(),
		"content"
	);
}

/// Test registering one subtype under two base types
#[rstest]
fn test_duplicate_base_is_rejected(cms: Cms) {
	// Arrange
	let media = cms
		.registry
		.declare_base(BaseTypeOptions::new("cms", "Media"))
		.unwrap();

	// Act
	let result = cms.registry.register_subtype(&media, &cms.video);

	// Assert
	assert!(matches!(
		result,
		Err(SubtypingError::Declaration(
			DeclarationError::DuplicateBase { .. }
		))
	));
	assert!(cms.registry.subtypes_of(&media).is_empty());
	assert_eq!(
		cms.registry.base_of(cms.video.key()).unwrap().key(),
		cms.content.key()
	);
}

/// Test an abstract owner propagating its field to concrete models
///
/// **Test Intent**: Verify each concrete model extending the abstract owner
/// gets its own columns and reverse relation, and the abstract owner gets
/// neither
#[rstest]
fn test_abstract_owner_propagates_to_children(cms: Cms) {
	// Arrange
	let annotation = ModelBuilder::new("cms", "Annotation")
		.abstract_model()
		.reference("target", BaseTypeForeignKey::new(&cms.content))
		.build(&cms.registry)
		.unwrap();

	// Act
	let note = ModelBuilder::new("cms", "Note")
		.extends(&annotation)
		.build(&cms.registry)
		.unwrap();
	let flag = ModelBuilder::new("cms", "Flag")
		.extends(&annotation)
		.build(&cms.registry)
		.unwrap();

	// Assert
	assert!(annotation.columns().is_empty());
	for child in [&note, &flag] {
		assert!(child.column("target_type").is_some());
		assert!(child.column("target_id").is_some());
	}
	let related: Vec<String> = cms
		.registry
		.relations()
		.relations_on(cms.article.key())
		.iter()
		.map(|r| r.related_name().to_string())
		.collect();
	assert_eq!(related, vec!["comment_set", "note_set", "flag_set"]);
}

/// Test that a reference to an unsaved instance cannot be written
#[rstest]
fn test_unsaved_instance_is_rejected(cms: Cms) {
	let unsaved = Row::new(&cms.article);
	let field = cms.comment.reference("content").unwrap();

	let result = field.lookup("exact", LookupValue::from(&unsaved));

	assert!(result.is_err());
	assert!(unsaved.pk_value().is_none());
}
