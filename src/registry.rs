//! Subtype registry
//!
//! Tracks, for each abstract base type, the concrete subtypes implementing
//! it. Registration is a push: every reference field declared against a base
//! type subscribes to that base, and each later registration is delivered to
//! the subscribers before the subtype becomes visible through
//! [`SubtypeRegistry::subtypes_of`]. Subtypes declared after the field that
//! references their base therefore end up in the same state as subtypes
//! declared before it.
//!
//! All declaration happens in a single load-time phase. Registration and
//! field declaration are serialized by an internal lock; reads never block
//! on each other.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};

use crate::directory::{ContentTypeDirectory, TypeDirectory, TypeTag};
use crate::error::{DeclarationError, Result};
use crate::model::{ColumnDef, ModelKey, ModelMeta, ValueDomain};
use crate::relations::RelationIndex;
use crate::settings::SubtypingSettings;

/// Declaration options for a base type
///
/// # Examples
///
/// ```
/// use reinhardt_subtyping::{BaseTypeOptions, SubtypeRegistry};
///
/// let registry = SubtypeRegistry::new();
/// let content = registry
///     .declare_base(BaseTypeOptions::new("cms", "Content"))
///     .unwrap();
///
/// assert_eq!(content.default_type_field(), "content_type");
/// assert_eq!(content.default_id_field(), "content_id");
/// ```
#[derive(Debug, Clone)]
pub struct BaseTypeOptions {
	key: ModelKey,
	object_name: String,
	pk: Option<ColumnDef>,
	subtypes: Option<Vec<ModelKey>>,
	default_type_field: Option<String>,
	default_id_field: Option<String>,
}

impl BaseTypeOptions {
	pub fn new(app_label: impl Into<String>, object_name: impl Into<String>) -> Self {
		let object_name = object_name.into();
		Self {
			key: ModelKey::new(app_label, &object_name),
			object_name,
			pk: None,
			subtypes: None,
			default_type_field: None,
			default_id_field: None,
		}
	}

	/// Primary key shared by every subtype
	pub fn primary_key(mut self, column: ColumnDef) -> Self {
		self.pk = Some(column.primary_key());
		self
	}

	/// Fix the subtype set instead of accumulating registrations
	pub fn subtypes(mut self, subtypes: impl IntoIterator<Item = ModelKey>) -> Self {
		self.subtypes = Some(subtypes.into_iter().collect());
		self
	}

	pub fn default_type_field(mut self, name: impl Into<String>) -> Self {
		self.default_type_field = Some(name.into());
		self
	}

	pub fn default_id_field(mut self, name: impl Into<String>) -> Self {
		self.default_id_field = Some(name.into());
		self
	}
}

/// An abstract base type
///
/// Default column names are fixed when the base type is declared.
#[derive(Debug)]
pub struct BaseType {
	key: ModelKey,
	object_name: String,
	pk: Option<ColumnDef>,
	explicit_subtypes: Option<Vec<ModelKey>>,
	default_type_field: String,
	default_id_field: String,
}

impl BaseType {
	fn from_options(options: BaseTypeOptions, settings: &SubtypingSettings) -> Self {
		let model_name = options.key.model().to_string();
		Self {
			default_type_field: options
				.default_type_field
				.unwrap_or_else(|| settings.type_field_for(&model_name)),
			default_id_field: options
				.default_id_field
				.unwrap_or_else(|| settings.id_field_for(&model_name)),
			key: options.key,
			object_name: options.object_name,
			pk: options.pk,
			explicit_subtypes: options.subtypes,
		}
	}

	pub fn key(&self) -> &ModelKey {
		&self.key
	}

	pub fn object_name(&self) -> &str {
		&self.object_name
	}

	pub fn default_type_field(&self) -> &str {
		&self.default_type_field
	}

	pub fn default_id_field(&self) -> &str {
		&self.default_id_field
	}

	pub fn explicit_subtypes(&self) -> Option<&[ModelKey]> {
		self.explicit_subtypes.as_deref()
	}

	/// Declared primary key, if any
	pub fn pk(&self) -> Option<&ColumnDef> {
		self.pk.as_ref()
	}

	/// Primary key every subtype is assumed to share
	///
	/// Base types without a declared key get the conventional `id`
	/// auto-increment column.
	pub fn pk_or_default(&self) -> ColumnDef {
		self.pk.clone().unwrap_or_else(ColumnDef::auto_id)
	}

	pub fn identifier_domain(&self) -> ValueDomain {
		self.pk
			.as_ref()
			.map_or(ValueDomain::Integer, |pk| pk.column_type().domain())
	}
}

/// Notification delivered to subscribers when a subtype registers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtypeEvent {
	pub base: ModelKey,
	pub subtype: ModelKey,
	pub query_name: String,
	pub tag: TypeTag,
}

/// Subscriber for [`SubtypeEvent`]s
///
/// Hooks run while the registry holds its declaration lock and must not
/// register subtypes or subscribe further hooks themselves.
pub type SubtypeHook = Arc<dyn Fn(&SubtypeEvent) + Send + Sync>;

#[derive(Debug, Default)]
struct RegistryState {
	bases: IndexMap<ModelKey, Arc<BaseType>>,
	subtypes: HashMap<ModelKey, Vec<ModelKey>>,
	base_of: HashMap<ModelKey, ModelKey>,
	query_names: HashMap<ModelKey, String>,
}

/// Registry of base types and their concrete subtypes
pub struct SubtypeRegistry {
	settings: SubtypingSettings,
	directory: Arc<dyn TypeDirectory>,
	declaring: Mutex<()>,
	state: RwLock<RegistryState>,
	hooks: RwLock<HashMap<ModelKey, Vec<SubtypeHook>>>,
	relations: Arc<RelationIndex>,
}

impl std::fmt::Debug for SubtypeRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SubtypeRegistry")
			.field("settings", &self.settings)
			.field("directory", &self.directory)
			.field("state", &*self.state.read())
			.finish_non_exhaustive()
	}
}

impl SubtypeRegistry {
	/// Registry backed by a fresh in-memory content type directory
	pub fn new() -> Self {
		Self::with_directory(Arc::new(ContentTypeDirectory::new()))
	}

	pub fn with_directory(directory: Arc<dyn TypeDirectory>) -> Self {
		Self::with_settings(directory, SubtypingSettings::default())
	}

	pub fn with_settings(directory: Arc<dyn TypeDirectory>, settings: SubtypingSettings) -> Self {
		Self {
			settings,
			directory,
			declaring: Mutex::new(()),
			state: RwLock::new(RegistryState::default()),
			hooks: RwLock::new(HashMap::new()),
			relations: Arc::new(RelationIndex::new()),
		}
	}

	pub fn settings(&self) -> &SubtypingSettings {
		&self.settings
	}

	pub fn directory(&self) -> &Arc<dyn TypeDirectory> {
		&self.directory
	}

	/// Reverse relations attached to subtypes
	pub fn relations(&self) -> &RelationIndex {
		&self.relations
	}

	pub(crate) fn relation_index(&self) -> Arc<RelationIndex> {
		Arc::clone(&self.relations)
	}

	/// Declare an abstract base type
	pub fn declare_base(&self, options: BaseTypeOptions) -> Result<Arc<BaseType>> {
		let _declaring = self.declaring.lock();
		let mut state = self.state.write();
		if state.bases.contains_key(&options.key) {
			return Err(DeclarationError::DuplicateBaseDeclaration(options.key).into());
		}

		let base = Arc::new(BaseType::from_options(options, &self.settings));
		tracing::debug!(
			base = %base.key(),
			type_field = base.default_type_field(),
			id_field = base.default_id_field(),
			"base type declared"
		);
		state.bases.insert(base.key().clone(), Arc::clone(&base));
		state.subtypes.insert(base.key().clone(), Vec::new());
		Ok(base)
	}

	pub fn base(&self, key: &ModelKey) -> Option<Arc<BaseType>> {
		self.state.read().bases.get(key).cloned()
	}

	/// Base type a subtype is registered under
	pub fn base_of(&self, subtype: &ModelKey) -> Option<Arc<BaseType>> {
		let state = self.state.read();
		let base = state.base_of.get(subtype)?;
		state.bases.get(base).cloned()
	}

	/// Register a concrete model as a subtype of `base`
	///
	/// Registering the same pair again is a no-op. Subscribers for `base` are
	/// notified before the subtype becomes visible through
	/// [`subtypes_of`](Self::subtypes_of).
	///
	/// # Examples
	///
	/// ```
	/// use reinhardt_subtyping::{BaseTypeOptions, ModelBuilder, SubtypeRegistry};
	///
	/// let registry = SubtypeRegistry::new();
	/// let content = registry.declare_base(BaseTypeOptions::new("cms", "Content")).unwrap();
	/// let article = ModelBuilder::new("cms", "Article").build(&registry).unwrap();
	///
	/// registry.register_subtype(&content, &article).unwrap();
	///
	/// assert_eq!(registry.subtypes_of(&content), vec![article.key().clone()]);
	/// assert!(registry.directory().tag_for(article.key()).is_ok());
	/// ```
	pub fn register_subtype(&self, base: &BaseType, subtype: &ModelMeta) -> Result<TypeTag> {
		let _declaring = self.declaring.lock();
		let key = subtype.key();

		{
			let state = self.state.read();
			if !state.bases.contains_key(base.key()) {
				return Err(DeclarationError::UnknownBase(base.key().clone()).into());
			}
			if let Some(existing) = state.base_of.get(key) {
				if existing == base.key() {
					return Ok(self.directory.tag_for(key)?);
				}
				return Err(DeclarationError::DuplicateBase {
					subtype: key.clone(),
					existing: existing.clone(),
					attempted: base.key().clone(),
				}
				.into());
			}
		}

		if subtype.is_abstract() {
			return Err(DeclarationError::AbstractSubtype(key.clone()).into());
		}
		let compatible = subtype
			.pk()
			.is_some_and(|pk| pk.column_type().domain() == base.identifier_domain());
		if !compatible {
			return Err(DeclarationError::IncompatiblePrimaryKey {
				subtype: key.clone(),
				base: base.key().clone(),
			}
			.into());
		}

		let tag = self.directory.get_or_create(key);
		let event = SubtypeEvent {
			base: base.key().clone(),
			subtype: key.clone(),
			query_name: subtype.query_name().to_string(),
			tag,
		};

		if Self::is_eligible(base, key) {
			let hooks = self
				.hooks
				.read()
				.get(base.key())
				.cloned()
				.unwrap_or_default();
			for hook in &hooks {
				hook(&event);
			}
			tracing::debug!(
				base = %base.key(),
				subtype = %key,
				subscribers = hooks.len(),
				"subtype registered"
			);
		} else {
			tracing::debug!(
				base = %base.key(),
				subtype = %key,
				"subtype registered outside the explicit subtype set"
			);
		}

		let mut state = self.state.write();
		state.base_of.insert(key.clone(), base.key().clone());
		state
			.subtypes
			.entry(base.key().clone())
			.or_default()
			.push(key.clone());
		if let Some(query_name) = subtype.query_name_override() {
			state.query_names.insert(key.clone(), query_name.to_string());
		}
		Ok(tag)
	}

	/// Subtypes of `base`: the explicit set if one was configured, otherwise
	/// every registered subtype in registration order
	pub fn subtypes_of(&self, base: &BaseType) -> Vec<ModelKey> {
		if let Some(explicit) = base.explicit_subtypes() {
			return explicit.to_vec();
		}
		self.registered_subtypes(base)
	}

	/// Subtypes registered under `base`, ignoring any explicit set
	pub fn registered_subtypes(&self, base: &BaseType) -> Vec<ModelKey> {
		self.state
			.read()
			.subtypes
			.get(base.key())
			.cloned()
			.unwrap_or_default()
	}

	/// Name of `subtype` in reverse-relation query paths
	pub fn query_name_of(&self, subtype: &ModelKey) -> String {
		self.state
			.read()
			.query_names
			.get(subtype)
			.cloned()
			.unwrap_or_else(|| subtype.model().to_string())
	}

	/// Replay current subtypes of `base` into `hook`, then subscribe it to
	/// future registrations
	pub fn observe_subtypes(&self, base: &BaseType, hook: SubtypeHook) -> Result<()> {
		let _declaring = self.declaring.lock();
		if !self.state.read().bases.contains_key(base.key()) {
			return Err(DeclarationError::UnknownBase(base.key().clone()).into());
		}

		for subtype in self.registered_subtypes(base) {
			if !Self::is_eligible(base, &subtype) {
				continue;
			}
			let event = SubtypeEvent {
				base: base.key().clone(),
				query_name: self.query_name_of(&subtype),
				tag: self.directory.tag_for(&subtype)?,
				subtype,
			};
			hook(&event);
		}

		self.hooks
			.write()
			.entry(base.key().clone())
			.or_default()
			.push(hook);
		Ok(())
	}

	fn is_eligible(base: &BaseType, subtype: &ModelKey) -> bool {
		base.explicit_subtypes()
			.is_none_or(|explicit| explicit.contains(subtype))
	}
}

impl Default for SubtypeRegistry {
	fn default() -> Self {
		Self::new()
	}
}

static SUBTYPE_REGISTRY: Lazy<SubtypeRegistry> = Lazy::new(SubtypeRegistry::new);

/// Process-wide subtype registry
pub fn global_registry() -> &'static SubtypeRegistry {
	&SUBTYPE_REGISTRY
}
