//! Error types for the subtyping layer
//!
//! Failures fall into three classes that callers are expected to treat
//! differently:
//!
//! - [`DeclarationError`]: raised while the schema is being declared. These are
//!   fatal to the declaration; a process should not continue with a schema that
//!   failed to declare.
//! - [`TranslationError`]: raised while a filter is being rewritten into column
//!   predicates. These are recoverable and usually surface as a bad-request
//!   style response.
//! - [`DirectoryError`]: the type directory was asked about a model it does not
//!   know. Outside of misuse this indicates a subtype queried before its
//!   registration completed.

use thiserror::Error;

use crate::directory::TypeTag;
use crate::model::ModelKey;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, SubtypingError>;

/// Errors raised during the load-time declaration phase
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeclarationError {
	#[error("'{subtype}' is already a subtype of '{existing}' and cannot also implement '{attempted}'")]
	DuplicateBase {
		subtype: ModelKey,
		existing: ModelKey,
		attempted: ModelKey,
	},

	#[error("Base type '{0}' is already declared")]
	DuplicateBaseDeclaration(ModelKey),

	#[error("Base type '{0}' has not been declared with this registry")]
	UnknownBase(ModelKey),

	#[error("'{0}' is not a model reference of the form 'app_label.Model'")]
	InvalidModelReference(String),

	#[error("Abstract model '{0}' cannot be registered as a subtype")]
	AbstractSubtype(ModelKey),

	#[error("Primary key of '{subtype}' does not share the identifier domain of base type '{base}'")]
	IncompatiblePrimaryKey { subtype: ModelKey, base: ModelKey },

	#[error("'{model}' cannot extend concrete model '{parent}'")]
	ConcreteParent { model: ModelKey, parent: ModelKey },

	#[error("'{model}' already declares a field or column named '{field}'")]
	DuplicateField { model: ModelKey, field: String },

	#[error("'{model}' has no field named '{field}'")]
	NoSuchField { model: ModelKey, field: String },

	#[error("Field '{field}' is not a BaseTypeForeignKey to '{base}'")]
	NotAMatch { field: String, base: ModelKey },

	#[error("'{model}' has no BaseTypeForeignKey to '{base}'")]
	NoReferenceField { model: ModelKey, base: ModelKey },

	#[error("'{model}' has more than one BaseTypeForeignKey to '{base}': {}", candidates.join(", "))]
	AmbiguousReferenceField {
		model: ModelKey,
		base: ModelKey,
		candidates: Vec<String>,
	},
}

/// Errors raised while rewriting a lookup against a reference field
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslationError {
	#[error("Lookup '{lookup}' on '{field}' expects {expected}, found {found}")]
	TypeMismatch {
		field: String,
		lookup: String,
		expected: &'static str,
		found: String,
	},

	#[error("Cannot filter '{field}' by an unsaved '{model}' instance")]
	UnsavedInstance { field: String, model: ModelKey },

	#[error("'{model}' has no polymorphic reference named '{field}'")]
	UnknownField { model: ModelKey, field: String },

	#[error("Unsupported lookup '{lookup}' on polymorphic reference '{field}'")]
	UnsupportedLookup { field: String, lookup: String },
}

/// Errors raised by the type directory
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
	#[error("Model '{0}' is not registered with the type directory")]
	NotRegistered(ModelKey),

	#[error("No model is registered under type tag {0}")]
	UnknownTag(TypeTag),
}

/// Errors raised by a storage engine collaborator
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
	#[error("No table for model '{0}'")]
	NoSuchTable(ModelKey),

	#[error("Table for model '{0}' already exists")]
	DuplicateTable(ModelKey),

	#[error("Row for '{0}' has no primary key value")]
	MissingPrimaryKey(ModelKey),

	#[error("Row for '{model}' with primary key {pk} already exists")]
	DuplicatePrimaryKey { model: ModelKey, pk: String },
}

/// Errors raised while loading [`SubtypingSettings`](crate::settings::SubtypingSettings)
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
	#[error("File error: {0}")]
	FileError(String),

	#[error("Parse error: {0}")]
	ParseError(String),

	#[error("Unsupported format: {0}")]
	UnsupportedFormat(String),
}

/// Top-level error for the subtyping layer
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubtypingError {
	#[error(transparent)]
	Declaration(#[from] DeclarationError),

	#[error(transparent)]
	Translation(#[from] TranslationError),

	#[error(transparent)]
	Directory(#[from] DirectoryError),

	#[error(transparent)]
	Storage(#[from] StorageError),

	#[error(transparent)]
	Settings(#[from] SettingsError),

	#[error("Reference '{field}' has a type tag and identifier that are not null together")]
	InconsistentReference { field: String },
}

impl SubtypingError {
	/// Whether the error belongs to the declaration phase
	pub fn is_declaration(&self) -> bool {
		matches!(self, SubtypingError::Declaration(_))
	}

	/// Whether the error was raised while translating a lookup
	pub fn is_translation(&self) -> bool {
		matches!(self, SubtypingError::Translation(_))
	}
}
