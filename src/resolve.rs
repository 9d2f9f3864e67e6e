//! Reference field resolution
//!
//! Helpers that build editing surfaces for an owner model need to find which
//! reference field points at a given base type.

use std::sync::Arc;

use crate::error::{DeclarationError, Result};
use crate::fields::ReferenceField;
use crate::model::ModelMeta;
use crate::registry::BaseType;

/// Find the reference field on `owner` that points at `base`
///
/// With a `name`, the field must exist and be a reference to `base`.
/// Without one, exactly one reference to `base` must exist.
///
/// # Examples
///
/// ```
/// use reinhardt_subtyping::{
///     BaseTypeForeignKey, BaseTypeOptions, ModelBuilder, SubtypeRegistry, resolve_reference_field,
/// };
///
/// let registry = SubtypeRegistry::new();
/// let content = registry.declare_base(BaseTypeOptions::new("cms", "Content")).unwrap();
/// let comment = ModelBuilder::new("cms", "Comment")
///     .reference("content", BaseTypeForeignKey::new(&content))
///     .build(&registry)
///     .unwrap();
///
/// let field = resolve_reference_field(&comment, &content, None).unwrap();
/// assert_eq!(field.name(), "content");
/// ```
pub fn resolve_reference_field(
	owner: &ModelMeta,
	base: &BaseType,
	name: Option<&str>,
) -> Result<Arc<ReferenceField>> {
	match try_resolve_reference_field(owner, base, name)? {
		Some(field) => Ok(field),
		None => Err(DeclarationError::NoReferenceField {
			model: owner.key().clone(),
			base: base.key().clone(),
		}
		.into()),
	}
}

/// [`resolve_reference_field`] that returns `None` when `owner` has no
/// bound reference to `base`
///
/// That is the case when no name was given and no reference to `base`
/// exists, or when `owner` is abstract and only declares the named field
/// for the models extending it.
pub fn try_resolve_reference_field(
	owner: &ModelMeta,
	base: &BaseType,
	name: Option<&str>,
) -> Result<Option<Arc<ReferenceField>>> {
	if let Some(name) = name {
		return match owner.reference(name) {
			Some(field) if field.base().key() == base.key() => Ok(Some(Arc::clone(field))),
			Some(_) => Err(not_a_match(name, base)),
			None if declares_reference(owner, name, base) => Ok(None),
			None if owner.has_field(name) => Err(not_a_match(name, base)),
			None => Err(DeclarationError::NoSuchField {
				model: owner.key().clone(),
				field: name.to_string(),
			}
			.into()),
		};
	}

	let mut candidates = owner
		.references()
		.iter()
		.filter(|field| field.base().key() == base.key());
	match (candidates.next(), candidates.next()) {
		(None, _) => Ok(None),
		(Some(field), None) => Ok(Some(Arc::clone(field))),
		(Some(_), Some(_)) => Err(DeclarationError::AmbiguousReferenceField {
			model: owner.key().clone(),
			base: base.key().clone(),
			candidates: owner
				.references()
				.iter()
				.filter(|field| field.base().key() == base.key())
				.map(|field| field.name().to_string())
				.collect(),
		}
		.into()),
	}
}

fn declares_reference(owner: &ModelMeta, name: &str, base: &BaseType) -> bool {
	owner
		.declarations()
		.iter()
		.any(|(declared, field)| declared == name && field.base().key() == base.key())
}

fn not_a_match(name: &str, base: &BaseType) -> crate::error::SubtypingError {
	DeclarationError::NotAMatch {
		field: name.to_string(),
		base: base.key().clone(),
	}
	.into()
}
