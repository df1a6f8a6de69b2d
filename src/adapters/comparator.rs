//! Structural Comparator
//!
//! Compares resource descriptions field by field through their serialized
//! form. The provider identifier is not part of the desired state and is
//! ignored.

use crate::domain::ports::ResourceComparator;
use crate::error::{Error, Result};
use crate::reconciler::ResourceDescription;
use serde_json::Value;

/// Serialized fields excluded from comparison
const IGNORED_FIELDS: &[&str] = &["cloudId"];

/// Structural equality over serialized resource descriptions
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralComparator;

impl StructuralComparator {
    fn comparable(resource: &ResourceDescription) -> Result<Value> {
        let mut value =
            serde_json::to_value(resource).map_err(|e| Error::Comparison(e.to_string()))?;
        if let Value::Object(fields) = &mut value {
            for field in IGNORED_FIELDS {
                fields.remove(*field);
            }
        }
        Ok(value)
    }
}

impl ResourceComparator for StructuralComparator {
    fn equal(&self, a: &ResourceDescription, b: &ResourceDescription) -> Result<bool> {
        Ok(Self::comparable(a)? == Self::comparable(b)?)
    }
}
