//! # Reinhardt Subtyping
//!
//! Polymorphic references over abstract base types.
//!
//! An abstract base type is implemented by several independent concrete
//! subtype models, each with its own table. Other models hold a single
//! reference field that can point at any row of any registered subtype. The
//! field is stored as a type tag plus a row identifier and resolved to the
//! concrete row on access.
//!
//! ## Components
//!
//! - **Type Registry** (`registry`): base types and the subtypes registered
//!   under them, with subscription to future registrations
//! - **Type Directory** (`directory`): stable tags for concrete models,
//!   backed by content types
//! - **Reference Fields** (`fields`): `BaseTypeForeignKey` declarations that
//!   contribute a type column and an identifier column to their owner
//! - **Reverse Relations** (`relations`): a `GenericRelation` on every
//!   subtype for each field that can point at it, attached automatically
//! - **Resolver** (`resolve`): find the reference field to a base type
//! - **Lookup Translator** (`lookups`): rewrite `exact` and `isnull`
//!   lookups into column predicates, rendered in memory or through `sea-query`
//!
//! Reverse relations are kept in sync no matter whether the field or the
//! subtype is declared first.
//!
//! ## Quick Start
//!
//! ```
//! use reinhardt_subtyping::{
//!     BaseTypeForeignKey, BaseTypeOptions, LookupValue, MemoryStorage, ModelBuilder, Row,
//!     StorageEngine, SubtypeRegistry,
//! };
//!
//! let registry = SubtypeRegistry::new();
//! let content = registry.declare_base(BaseTypeOptions::new("cms", "Content")).unwrap();
//!
//! let comment = ModelBuilder::new("cms", "Comment")
//!     .reference("content", BaseTypeForeignKey::new(&content))
//!     .build(&registry)
//!     .unwrap();
//! let article = ModelBuilder::new("cms", "Article").build(&registry).unwrap();
//! registry.register_subtype(&content, &article).unwrap();
//!
//! let storage = MemoryStorage::new();
//! storage.create_table(&article).unwrap();
//! storage.create_table(&comment).unwrap();
//!
//! let post = storage.insert(Row::new(&article).with("id", 42)).unwrap();
//! let field = comment.reference("content").unwrap();
//! let mut row = Row::new(&comment);
//! field.set(&mut row, Some(&post)).unwrap();
//! let row = storage.insert(row).unwrap();
//!
//! assert_eq!(field.get(&row, &storage).unwrap(), Some(post.clone()));
//!
//! let relation = registry.relations().get(article.key(), "content_article").unwrap();
//! assert_eq!(relation.all(&storage, &post).unwrap(), vec![row.clone()]);
//!
//! let condition = field.lookup("exact", LookupValue::from(&post)).unwrap();
//! assert_eq!(storage.filter(comment.key(), &condition).unwrap(), vec![row]);
//! ```
//!
//! ## Configuration
//!
//! Column naming and field defaults come from [`SubtypingSettings`], loaded
//! from TOML or JSON and overridable through `REINHARDT_SUBTYPING_*`
//! environment variables.

pub mod directory;
pub mod error;
pub mod fields;
pub mod lookups;
pub mod model;
pub mod registry;
pub mod relations;
pub mod resolve;
pub mod settings;
pub mod storage;

pub use directory::{ContentType, ContentTypeDirectory, TypeDirectory, TypeTag};
pub use error::{
	DeclarationError, DirectoryError, Result, SettingsError, StorageError, SubtypingError,
	TranslationError,
};
pub use fields::{BaseTypeForeignKey, ReferenceField};
pub use lookups::{Condition, LOOKUP_SEP, LookupValue, translate, translate_filter};
pub use model::{
	ColumnDef, ColumnType, ModelBuilder, ModelKey, ModelMeta, Row, Storable, Value, ValueDomain,
};
pub use registry::{
	BaseType, BaseTypeOptions, SubtypeEvent, SubtypeHook, SubtypeRegistry, global_registry,
};
pub use relations::{GenericRelation, RelationIndex};
pub use resolve::{resolve_reference_field, try_resolve_reference_field};
pub use settings::SubtypingSettings;
pub use storage::{MemoryStorage, StorageEngine};
