//! A typed, composable filter representation with well-defined mappings to
//! the driver's filter documents.

mod update;
#[cfg(test)]
mod test;

use std::{fmt, marker::PhantomData, sync::Arc};

use crate::{
    bson::{doc, Bson, Document},
    coll::options::FullTextSearchOptions,
    error::{Error, Result},
};

pub use update::Update;

/// A closure factory producing a filter once its single free parameter is
/// bound via [`Query::complete_expression`].
type TemplateFn = Arc<dyn Fn(Bson) -> Document + Send + Sync>;

/// A composable filter over documents of type `T`, optionally carrying an
/// [`Update`] payload for the operations that consume one.
///
/// A query is one of: a raw JSON document string, a built filter document, a
/// filter template with one unbound parameter, a full-text search, or the
/// empty ("match all") query. Boolean combinators lower their operands to
/// filter documents and combine them with the driver's `$and`/`$or`/`$nor`
/// operators at render time.
pub struct Query<T> {
    repr: Repr,
    update: Option<Update>,
    _target: PhantomData<fn() -> T>,
}

enum Repr {
    Empty,
    Json(String),
    Filter(Document),
    Template(TemplateFn),
    Text {
        text: String,
        options: FullTextSearchOptions,
    },
    And(Box<Repr>, Box<Repr>),
    Or(Box<Repr>, Box<Repr>),
    Not(Box<Repr>),
}

impl Clone for Repr {
    fn clone(&self) -> Self {
        match self {
            Self::Empty => Self::Empty,
            Self::Json(s) => Self::Json(s.clone()),
            Self::Filter(d) => Self::Filter(d.clone()),
            Self::Template(f) => Self::Template(Arc::clone(f)),
            Self::Text { text, options } => Self::Text {
                text: text.clone(),
                options: options.clone(),
            },
            Self::And(a, b) => Self::And(a.clone(), b.clone()),
            Self::Or(a, b) => Self::Or(a.clone(), b.clone()),
            Self::Not(q) => Self::Not(q.clone()),
        }
    }
}

impl Repr {
    fn render(&self) -> Result<Document> {
        match self {
            Self::Empty => Ok(doc! {}),
            Self::Json(s) => Ok(serde_json::from_str(s)?),
            Self::Filter(d) => Ok(d.clone()),
            Self::Template(_) => Err(Error::query_incomplete(
                "cannot render a filter template before complete_expression binds its parameter",
            )),
            Self::Text { text, options } => {
                let mut spec = doc! { "$search": text.as_str() };
                if let Some(ref language) = options.language {
                    spec.insert("$language", language.as_str());
                }
                if let Some(case_sensitive) = options.case_sensitive {
                    spec.insert("$caseSensitive", case_sensitive);
                }
                if let Some(diacritic_sensitive) = options.diacritic_sensitive {
                    spec.insert("$diacriticSensitive", diacritic_sensitive);
                }
                Ok(doc! { "$text": spec })
            }
            Self::And(a, b) => Ok(doc! { "$and": [a.render()?, b.render()?] }),
            Self::Or(a, b) => Ok(doc! { "$or": [a.render()?, b.render()?] }),
            Self::Not(q) => Ok(doc! { "$nor": [q.render()?] }),
        }
    }
}

impl<T> Query<T> {
    fn from_repr(repr: Repr) -> Self {
        Self {
            repr,
            update: None,
            _target: PhantomData,
        }
    }

    /// The empty query, matching every document.
    pub fn empty() -> Self {
        Self::from_repr(Repr::Empty)
    }

    /// A query from a raw JSON document string. The string is parsed when the
    /// query is rendered; a malformed string surfaces there.
    pub fn from_json(json: impl Into<String>) -> Self {
        Self::from_repr(Repr::Json(json.into()))
    }

    /// A query from an already-built filter document.
    pub fn from_filter(filter: Document) -> Self {
        Self::from_repr(Repr::Filter(filter))
    }

    /// A query with one unbound parameter, to be completed later with
    /// [`Query::complete_expression`].
    pub fn from_template(
        template: impl Fn(Bson) -> Document + Send + Sync + 'static,
    ) -> Self {
        Self::from_repr(Repr::Template(Arc::new(template)))
    }

    /// A full-text search query over the collection's text index.
    pub fn from_text(text: impl Into<String>, options: FullTextSearchOptions) -> Self {
        Self::from_repr(Repr::Text {
            text: text.into(),
            options,
        })
    }

    /// Binds the free parameter of a template query to `value`, turning it
    /// into an ordinary filter query. Fails with a `QueryIncomplete` error
    /// when applied to any other variant.
    pub fn complete_expression(self, value: impl Into<Bson>) -> Result<Self> {
        match self.repr {
            Repr::Template(template) => Ok(Self {
                repr: Repr::Filter(template(value.into())),
                update: self.update,
                _target: PhantomData,
            }),
            _ => Err(Error::query_incomplete(
                "complete_expression applies only to queries built from a template",
            )),
        }
    }

    /// The conjunction of two queries. The update payload of `self` wins if
    /// both carry one.
    pub fn and(self, other: Query<T>) -> Self {
        Self {
            repr: Repr::And(Box::new(self.repr), Box::new(other.repr)),
            update: self.update.or(other.update),
            _target: PhantomData,
        }
    }

    /// The disjunction of two queries.
    pub fn or(self, other: Query<T>) -> Self {
        Self {
            repr: Repr::Or(Box::new(self.repr), Box::new(other.repr)),
            update: self.update.or(other.update),
            _target: PhantomData,
        }
    }

    /// The negation of a query.
    pub fn negate(self) -> Self {
        Self {
            repr: Repr::Not(Box::new(self.repr)),
            update: self.update,
            _target: PhantomData,
        }
    }

    /// Attaches an update payload. The payload travels with the query and is
    /// consumed by the update-family operations.
    pub fn with_update(mut self, update: Update) -> Self {
        self.update = Some(update);
        self
    }

    /// The attached update payload, if any.
    pub fn update(&self) -> Option<&Update> {
        self.update.as_ref()
    }

    pub(crate) fn take_update(&mut self) -> Option<Update> {
        self.update.take()
    }

    /// Renders the query to its driver filter document.
    ///
    /// The empty query renders to `{}` ("match all"); a template query fails
    /// with a `QueryIncomplete` error until its parameter is bound.
    pub fn render(&self) -> Result<Document> {
        self.repr.render()
    }

    /// Whether this query still carries an unbound template parameter.
    pub fn is_template(&self) -> bool {
        matches!(self.repr, Repr::Template(_))
    }
}

impl<T> Default for Query<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            repr: self.repr.clone(),
            update: self.update.clone(),
            _target: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("Query");
        match self.render() {
            Ok(filter) => dbg.field("filter", &filter),
            Err(_) => dbg.field("filter", &"<unbound template>"),
        };
        dbg.field("update", &self.update).finish()
    }
}

impl<T> From<Document> for Query<T> {
    fn from(filter: Document) -> Self {
        Self::from_filter(filter)
    }
}

/// Two queries are equal when their rendered filters and attached updates are
/// equal. Queries that cannot be rendered compare unequal to everything.
impl<T> PartialEq for Query<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self.render(), other.render()) {
            (Ok(a), Ok(b)) => a == b && self.update == other.update,
            _ => false,
        }
    }
}

impl<T> std::ops::BitAnd for Query<T> {
    type Output = Query<T>;

    fn bitand(self, rhs: Query<T>) -> Query<T> {
        self.and(rhs)
    }
}

impl<T> std::ops::BitOr for Query<T> {
    type Output = Query<T>;

    fn bitor(self, rhs: Query<T>) -> Query<T> {
        self.or(rhs)
    }
}

impl<T> std::ops::Not for Query<T> {
    type Output = Query<T>;

    fn not(self) -> Query<T> {
        self.negate()
    }
}
