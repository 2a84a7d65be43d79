//! The capability trait implemented by persisted document types, plus the
//! tenant/audit metadata record.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::bson::{DateTime, Document};

/// A typed record persisted in a collection.
///
/// Implementors declare a stable identifier type, the collection the type
/// lives in, and optionally the tenant/audit facet. The facet is opted into by
/// embedding a [`TenantAudit`] value, overriding the accessors to expose it,
/// and setting `HAS_TENANT_AUDIT` so the handle declares the default tenant
/// indexes.
pub trait DbDocument: Serialize + DeserializeOwned + Send + Sync + Unpin + 'static {
    /// The type of the `_id` field.
    type Id: Serialize + DeserializeOwned + Clone + Default + PartialEq + Send + Sync;

    /// The default collection name for this type.
    const COLLECTION: &'static str;

    /// Whether this type carries the tenant/audit facet. When `true`, the
    /// default tenant indexes are declared on first handle construction.
    const HAS_TENANT_AUDIT: bool = false;

    /// The document's identifier.
    fn id(&self) -> Self::Id;

    /// The tenant/audit facet, if this type carries one.
    fn audit(&self) -> Option<&TenantAudit> {
        None
    }

    /// Mutable access to the tenant/audit facet, if this type carries one.
    fn audit_mut(&mut self) -> Option<&mut TenantAudit> {
        None
    }
}

/// The tenant/audit facet of a document: logical key, tenant key, soft-delete
/// flag, audit fields, and an open mapping for forward-compatible fields.
///
/// Embed it in a document type with `#[serde(flatten)]` so the fields land at
/// the top level of the stored document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantAudit {
    /// The logical key of the document within its tenant.
    #[serde(default)]
    pub r#ref: String,

    /// The tenant key.
    #[serde(default)]
    pub tenant: String,

    /// Soft-delete flag. Defaults to `false` at insert.
    #[serde(default)]
    pub disabled: bool,

    /// Who created the document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,

    /// When the document was inserted. Stamped by the handle at insert.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,

    /// Who last updated the document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,

    /// When the document was last updated or replaced. Stamped by the handle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,

    /// Open-ended mapping for fields not modeled by the type. Unknown fields
    /// read from the server are collected here and written back verbatim.
    #[serde(flatten)]
    pub extra_elements: Document,
}

impl TenantAudit {
    /// Stamps the insert-time audit fields.
    pub(crate) fn stamp_insert(&mut self) {
        self.created_at = Some(DateTime::now());
    }

    /// Stamps the update-time audit fields.
    pub(crate) fn stamp_update(&mut self) {
        self.updated_at = Some(DateTime::now());
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::TenantAudit;
    use crate::bson::{doc, Bson};

    #[test]
    fn extra_elements_round_trip() {
        let audit = TenantAudit {
            r#ref: "r1".to_string(),
            tenant: "t1".to_string(),
            extra_elements: doc! { "future_field": 42 },
            ..Default::default()
        };

        let rendered = crate::bson::to_document(&audit).unwrap();
        assert_eq!(rendered.get("ref"), Some(&Bson::String("r1".to_string())));
        assert_eq!(rendered.get("future_field"), Some(&Bson::Int32(42)));

        let parsed: TenantAudit = crate::bson::from_document(rendered).unwrap();
        assert_eq!(parsed, audit);
    }

    #[test]
    fn disabled_defaults_to_false() {
        let parsed: TenantAudit =
            crate::bson::from_document(doc! { "ref": "r", "tenant": "t" }).unwrap();
        assert!(!parsed.disabled);
    }
}
