//! An ordered update-operator list with a single rendered update document.

use crate::bson::{doc, Bson, Document};

/// An ordered list of update operators over a document.
///
/// Operators are merged into one update document in declaration order;
/// repeated operators extend the subdocument created by the first occurrence.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Update {
    ops: Vec<(String, Document)>,
}

impl Update {
    /// An empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// An update from a raw update document, e.g. `{ "$set": { .. } }`.
    pub fn from_document(update: Document) -> Self {
        let ops = update
            .into_iter()
            .map(|(key, value)| {
                let body = match value {
                    Bson::Document(d) => d,
                    other => doc! { "value": other },
                };
                (key, body)
            })
            .collect();
        Self { ops }
    }

    fn push(mut self, op: &str, body: Document) -> Self {
        self.ops.push((op.to_string(), body));
        self
    }

    /// `$set` the given fields.
    pub fn set(self, fields: Document) -> Self {
        self.push("$set", fields)
    }

    /// `$unset` the given field.
    pub fn unset(self, field: impl Into<String>) -> Self {
        self.push("$unset", doc! { field.into(): "" })
    }

    /// `$inc` the given field by `amount`.
    pub fn inc(self, field: impl Into<String>, amount: impl Into<Bson>) -> Self {
        self.push("$inc", doc! { field.into(): amount.into() })
    }

    /// `$mul` the given field by `factor`.
    pub fn mul(self, field: impl Into<String>, factor: impl Into<Bson>) -> Self {
        self.push("$mul", doc! { field.into(): factor.into() })
    }

    /// `$min` the given field against `value`.
    pub fn min(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.push("$min", doc! { field.into(): value.into() })
    }

    /// `$max` the given field against `value`.
    pub fn max(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.push("$max", doc! { field.into(): value.into() })
    }

    /// `$rename` a field.
    pub fn rename(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.push("$rename", doc! { from.into(): to.into() })
    }

    /// `$push` a value onto an array field.
    pub fn push_value(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.push("$push", doc! { field.into(): value.into() })
    }

    /// `$pull` matching values from an array field.
    pub fn pull(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.push("$pull", doc! { field.into(): value.into() })
    }

    /// `$pop` the first element of an array field.
    pub fn pop_first(self, field: impl Into<String>) -> Self {
        self.push("$pop", doc! { field.into(): -1 })
    }

    /// `$pop` the last element of an array field.
    pub fn pop_last(self, field: impl Into<String>) -> Self {
        self.push("$pop", doc! { field.into(): 1 })
    }

    /// `$addToSet` a value on an array field.
    pub fn add_to_set(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.push("$addToSet", doc! { field.into(): value.into() })
    }

    /// `$currentDate` on the given field.
    pub fn current_date(self, field: impl Into<String>) -> Self {
        self.push("$currentDate", doc! { field.into(): true })
    }

    /// Whether no operators have been declared.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Renders the operator list to a single update document, merging
    /// repeated operators in declaration order.
    pub fn render(&self) -> Document {
        let mut update = Document::new();
        for (op, body) in &self.ops {
            match update.get_mut(op) {
                Some(Bson::Document(existing)) => {
                    existing.extend(body.clone());
                }
                _ => {
                    update.insert(op.clone(), body.clone());
                }
            }
        }
        update
    }
}
