//! Subtyping settings
//!
//! Naming policy and field defaults used when reference fields contribute
//! their columns. Settings are read once when a [`SubtypeRegistry`] is built
//! and never change afterwards.
//!
//! [`SubtypeRegistry`]: crate::registry::SubtypeRegistry

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

/// Settings for the subtyping layer
///
/// # Examples
///
/// ```
/// use reinhardt_subtyping::SubtypingSettings;
///
/// let settings = SubtypingSettings::from_toml_str(r#"
/// related_name_suffix = "_refs"
/// db_index = false
/// "#).unwrap();
///
/// assert_eq!(settings.related_name_suffix, "_refs");
/// assert_eq!(settings.type_field_suffix, "_type");
/// assert!(!settings.db_index);
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtypingSettings {
	/// Appended to a field name to form its type column
	pub type_field_suffix: String,
	/// Appended to a field name to form its identifier column
	pub id_field_suffix: String,
	/// Appended to the owner model name to form the reverse relation name
	pub related_name_suffix: String,
	/// Joins a field name and a subtype query name
	pub query_prefix_separator: String,
	/// Default for `db_index` on contributed columns
	pub db_index: bool,
	/// Model the type column points at
	pub directory_model: String,
}

impl Default for SubtypingSettings {
	fn default() -> Self {
		Self {
			type_field_suffix: "_type".to_string(),
			id_field_suffix: "_id".to_string(),
			related_name_suffix: "_set".to_string(),
			query_prefix_separator: "_".to_string(),
			db_index: true,
			directory_model: "contenttypes.ContentType".to_string(),
		}
	}
}

impl SubtypingSettings {
	pub fn from_toml_str(contents: &str) -> Result<Self, SettingsError> {
		toml::from_str(contents)
			.map_err(|e| SettingsError::ParseError(format!("TOML parse error: {}", e)))
	}

	/// Load settings from a `.toml` or `.json` file
	pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
		let path = path.into();
		let contents = std::fs::read_to_string(&path).map_err(|e| {
			SettingsError::FileError(format!("Failed to read {}: {}", path.display(), e))
		})?;

		match path.extension().and_then(|s| s.to_str()) {
			Some("toml") => Self::from_toml_str(&contents),
			Some("json") => serde_json::from_str(&contents)
				.map_err(|e| SettingsError::ParseError(format!("JSON parse error: {}", e))),
			_ => Err(SettingsError::UnsupportedFormat(
				"Supported formats: .toml, .json".to_string(),
			)),
		}
	}

	/// Overlay `REINHARDT_SUBTYPING_*` environment variables
	pub fn with_env_overrides(self) -> Result<Self, SettingsError> {
		self.with_overrides(|key| std::env::var(key).ok())
	}

	fn with_overrides(
		mut self,
		lookup: impl Fn(&str) -> Option<String>,
	) -> Result<Self, SettingsError> {
		if let Some(v) = lookup("REINHARDT_SUBTYPING_TYPE_FIELD_SUFFIX") {
			self.type_field_suffix = v;
		}
		if let Some(v) = lookup("REINHARDT_SUBTYPING_ID_FIELD_SUFFIX") {
			self.id_field_suffix = v;
		}
		if let Some(v) = lookup("REINHARDT_SUBTYPING_RELATED_NAME_SUFFIX") {
			self.related_name_suffix = v;
		}
		if let Some(v) = lookup("REINHARDT_SUBTYPING_QUERY_PREFIX_SEPARATOR") {
			self.query_prefix_separator = v;
		}
		if let Some(v) = lookup("REINHARDT_SUBTYPING_DB_INDEX") {
			self.db_index = v.parse().map_err(|_| {
				SettingsError::ParseError(format!(
					"REINHARDT_SUBTYPING_DB_INDEX must be true or false, got '{}'",
					v
				))
			})?;
		}
		if let Some(v) = lookup("REINHARDT_SUBTYPING_DIRECTORY_MODEL") {
			self.directory_model = v;
		}
		Ok(self)
	}

	pub(crate) fn type_field_for(&self, field_name: &str) -> String {
		format!("{}{}", field_name, self.type_field_suffix)
	}

	pub(crate) fn id_field_for(&self, field_name: &str) -> String {
		format!("{}{}", field_name, self.id_field_suffix)
	}

	pub(crate) fn related_name_for(&self, owner_model: &str) -> String {
		format!("{}{}", owner_model, self.related_name_suffix)
	}

	pub(crate) fn query_prefix_for(&self, field_name: &str) -> String {
		format!("{}{}", field_name, self.query_prefix_separator)
	}
}
