//! Type directory adapter
//!
//! The type directory maps every registered concrete model to a stable
//! [`TypeTag`] and back, in the manner of a content-type table. The core only
//! talks to it through [`TypeDirectory`]; [`ContentTypeDirectory`] is the
//! in-process implementation used when no external service is wired in.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::DirectoryError;
use crate::lookups::Condition;
use crate::model::{ModelKey, Value};

/// Stable identifier of a concrete model in the type directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeTag(pub i64);

impl TypeTag {
	pub fn get(self) -> i64 {
		self.0
	}
}

impl fmt::Display for TypeTag {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<TypeTag> for Value {
	fn from(tag: TypeTag) -> Self {
		Value::Int(tag.0)
	}
}

/// Narrow interface to the identifier/type lookup service
///
/// `tag_for` and `type_for` must be inverse to each other over every model
/// ever installed.
pub trait TypeDirectory: Send + Sync + fmt::Debug {
	/// Install `model` if needed and return its tag
	fn get_or_create(&self, model: &ModelKey) -> TypeTag;

	/// Tag of an installed model
	fn tag_for(&self, model: &ModelKey) -> Result<TypeTag, DirectoryError>;

	/// Model installed under `tag`
	fn type_for(&self, tag: TypeTag) -> Result<ModelKey, DirectoryError>;

	/// Predicate over the directory's own rows selecting the given models
	fn tags_in(&self, models: &[ModelKey]) -> Result<Condition, DirectoryError> {
		let tags = models
			.iter()
			.map(|m| self.tag_for(m).map(Value::from))
			.collect::<Result<Vec<_>, _>>()?;
		Ok(Condition::is_in("id", tags))
	}
}

/// A row of the content type table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentType {
	pub id: i64,
	pub app_label: String,
	pub model: String,
}

impl ContentType {
	pub fn tag(&self) -> TypeTag {
		TypeTag(self.id)
	}

	pub fn natural_key(&self) -> ModelKey {
		ModelKey::new(&self.app_label, &self.model)
	}
}

#[derive(Debug, Default)]
struct DirectoryState {
	by_key: HashMap<ModelKey, ContentType>,
	by_id: HashMap<i64, ContentType>,
}

/// In-memory content type directory
///
/// # Examples
///
/// ```
/// use reinhardt_subtyping::{ContentTypeDirectory, ModelKey, TypeDirectory};
///
/// let directory = ContentTypeDirectory::new();
/// let article = ModelKey::new("cms", "Article");
///
/// let tag = directory.get_or_create(&article);
/// assert_eq!(directory.tag_for(&article), Ok(tag));
/// assert_eq!(directory.type_for(tag), Ok(article));
/// ```
#[derive(Debug)]
pub struct ContentTypeDirectory {
	state: RwLock<DirectoryState>,
	next_id: AtomicI64,
}

impl ContentTypeDirectory {
	pub fn new() -> Self {
		Self {
			state: RwLock::new(DirectoryState::default()),
			next_id: AtomicI64::new(1),
		}
	}

	pub fn get(&self, model: &ModelKey) -> Option<ContentType> {
		self.state.read().by_key.get(model).cloned()
	}

	pub fn get_by_id(&self, id: i64) -> Option<ContentType> {
		self.state.read().by_id.get(&id).cloned()
	}

	pub fn all(&self) -> Vec<ContentType> {
		let mut all: Vec<_> = self.state.read().by_id.values().cloned().collect();
		all.sort_by_key(|ct| ct.id);
		all
	}

	pub fn len(&self) -> usize {
		self.state.read().by_id.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl Default for ContentTypeDirectory {
	fn default() -> Self {
		Self::new()
	}
}

impl TypeDirectory for ContentTypeDirectory {
	fn get_or_create(&self, model: &ModelKey) -> TypeTag {
		if let Some(ct) = self.state.read().by_key.get(model) {
			return ct.tag();
		}

		let mut state = self.state.write();
		// Another writer may have installed it between the two locks
		if let Some(ct) = state.by_key.get(model) {
			return ct.tag();
		}

		let ct = ContentType {
			id: self.next_id.fetch_add(1, Ordering::SeqCst),
			app_label: model.app_label().to_string(),
			model: model.model().to_string(),
		};
		tracing::debug!(model = %model, id = ct.id, "content type installed");
		state.by_id.insert(ct.id, ct.clone());
		state.by_key.insert(model.clone(), ct.clone());
		ct.tag()
	}

	fn tag_for(&self, model: &ModelKey) -> Result<TypeTag, DirectoryError> {
		self.state
			.read()
			.by_key
			.get(model)
			.map(ContentType::tag)
			.ok_or_else(|| DirectoryError::NotRegistered(model.clone()))
	}

	fn type_for(&self, tag: TypeTag) -> Result<ModelKey, DirectoryError> {
		self.state
			.read()
			.by_id
			.get(&tag.0)
			.map(ContentType::natural_key)
			.ok_or(DirectoryError::UnknownTag(tag))
	}
}
