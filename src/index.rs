//! Composite index declaration for a document type.

use std::marker::PhantomData;

use mongodb::{options::IndexOptions, IndexModel};

use crate::{
    bson::{doc, Document},
    document::DbDocument,
};

/// Name of the unique default index on (`tenant`, `ref`, `disabled`).
pub const IDX_TENANT_REF_DISABLED: &str = "IDX_TENANT_REF_DISABLED";
/// Name of the unique default index on `ref`.
pub const IDX_REF: &str = "IDX_REF";
/// Name of the default index on `disabled`.
pub const IDX_DISABLED: &str = "IDX_DISABLED";
/// Name of the unique default index on (`ref`, `disabled`).
pub const IDX_REF_DISABLED: &str = "IDX_REF_DISABLED";
/// Name of the default index on `tenant`.
pub const IDX_TENANT: &str = "IDX_TENANT";

/// Builds an ordered list of index specifications from chained field
/// declarations.
///
/// Successive `ascending`/`descending` calls extend the current compound key;
/// `options` attaches the current index's options; `add` seals the current
/// index and starts the next one. Materialize with `into_models`.
#[derive(Clone, Debug)]
pub struct IndexKeys<T> {
    models: Vec<IndexModel>,
    keys: Document,
    options: Option<IndexOptions>,
    _target: PhantomData<fn() -> T>,
}

impl<T> Default for IndexKeys<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IndexKeys<T> {
    /// An empty index list.
    pub fn new() -> Self {
        Self {
            models: Vec::new(),
            keys: Document::new(),
            options: None,
            _target: PhantomData,
        }
    }

    /// Adds an ascending key to the current compound index.
    pub fn ascending(mut self, field: impl Into<String>) -> Self {
        self.keys.insert(field.into(), 1);
        self
    }

    /// Adds a descending key to the current compound index.
    pub fn descending(mut self, field: impl Into<String>) -> Self {
        self.keys.insert(field.into(), -1);
        self
    }

    /// Sets the options of the current compound index.
    pub fn options(mut self, options: IndexOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Seals the current compound index and starts a new one.
    pub fn add(mut self) -> Self {
        self.seal();
        self
    }

    fn seal(&mut self) {
        if self.keys.is_empty() {
            return;
        }
        let keys = std::mem::take(&mut self.keys);
        let model = IndexModel::builder()
            .keys(keys)
            .options(self.options.take())
            .build();
        self.models.push(model);
    }

    /// Materializes the declared indexes, in declaration order.
    pub fn into_models(mut self) -> Vec<IndexModel> {
        self.seal();
        self.models
    }

    /// Whether any index has been declared.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty() && self.keys.is_empty()
    }
}

fn background_index(name: &str, unique: bool) -> IndexOptions {
    IndexOptions::builder()
        .name(name.to_string())
        .background(true)
        .unique(unique)
        .build()
}

/// The default indexes declared for every document type carrying the
/// tenant/audit facet.
pub(crate) fn tenant_default_indexes<T: DbDocument>() -> IndexKeys<T> {
    IndexKeys::new()
        .ascending("ref")
        .options(background_index(IDX_REF, true))
        .add()
        .ascending("disabled")
        .options(background_index(IDX_DISABLED, false))
        .add()
        .ascending("ref")
        .ascending("disabled")
        .options(background_index(IDX_REF_DISABLED, true))
        .add()
        .ascending("tenant")
        .options(background_index(IDX_TENANT, false))
        .add()
        .ascending("tenant")
        .ascending("ref")
        .ascending("disabled")
        .options(background_index(IDX_TENANT_REF_DISABLED, true))
}

/// The (name, fields) view of an existing index, as streamed by
/// [`DbSet::indexes`](crate::DbSet::indexes).
pub(crate) fn index_summary(model: &IndexModel) -> (String, Vec<String>) {
    let name = model
        .options
        .as_ref()
        .and_then(|options| options.name.clone())
        .unwrap_or_default();
    let fields = model.keys.keys().cloned().collect();
    (name, fields)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::document::{DbDocument, TenantAudit};

    #[derive(Serialize, Deserialize)]
    struct Account {
        #[serde(rename = "_id")]
        id: String,
        #[serde(flatten)]
        audit: TenantAudit,
    }

    impl DbDocument for Account {
        type Id = String;

        const COLLECTION: &'static str = "accounts";
        const HAS_TENANT_AUDIT: bool = true;

        fn id(&self) -> String {
            self.id.clone()
        }

        fn audit(&self) -> Option<&TenantAudit> {
            Some(&self.audit)
        }

        fn audit_mut(&mut self) -> Option<&mut TenantAudit> {
            Some(&mut self.audit)
        }
    }

    #[test]
    fn chaining_builds_compound_keys() {
        let models = IndexKeys::<Account>::new()
            .ascending("tenant")
            .descending("created_at")
            .options(IndexOptions::builder().name("by_tenant_age".to_string()).build())
            .into_models();

        assert_eq!(models.len(), 1);
        assert_eq!(models[0].keys, doc! { "tenant": 1, "created_at": -1 });
        assert_eq!(
            models[0].options.as_ref().and_then(|o| o.name.clone()),
            Some("by_tenant_age".to_string())
        );
    }

    #[test]
    fn add_starts_a_new_index() {
        let models = IndexKeys::<Account>::new()
            .ascending("a")
            .add()
            .descending("b")
            .into_models();

        assert_eq!(models.len(), 2);
        assert_eq!(models[0].keys, doc! { "a": 1 });
        assert_eq!(models[1].keys, doc! { "b": -1 });
    }

    #[test]
    fn tenant_defaults_declare_the_five_indexes() {
        let models = tenant_default_indexes::<Account>().into_models();
        let names: Vec<String> = models
            .iter()
            .map(|m| m.options.as_ref().and_then(|o| o.name.clone()).unwrap_or_default())
            .collect();
        assert_eq!(
            names,
            vec![
                IDX_REF,
                IDX_DISABLED,
                IDX_REF_DISABLED,
                IDX_TENANT,
                IDX_TENANT_REF_DISABLED
            ]
        );
    }

    #[test]
    fn tenant_ref_disabled_is_unique_on_the_triple() {
        let models = tenant_default_indexes::<Account>().into_models();
        let model = models
            .iter()
            .find(|m| m.options.as_ref().and_then(|o| o.name.as_deref()) == Some(IDX_TENANT_REF_DISABLED))
            .unwrap();

        assert_eq!(model.keys, doc! { "tenant": 1, "ref": 1, "disabled": 1 });
        assert_eq!(model.options.as_ref().and_then(|o| o.unique), Some(true));
    }

    #[test]
    fn non_unique_defaults() {
        let models = tenant_default_indexes::<Account>().into_models();
        for name in [IDX_DISABLED, IDX_TENANT] {
            let model = models
                .iter()
                .find(|m| m.options.as_ref().and_then(|o| o.name.as_deref()) == Some(name))
                .unwrap();
            assert_eq!(model.options.as_ref().and_then(|o| o.unique), Some(false));
        }
    }
}
