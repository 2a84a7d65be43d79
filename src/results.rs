//! Contains the result types returned by `dbset` operations.

use std::ops::Index;

use rayon::prelude::*;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::Result;

/// An immutable page of results plus its paging metadata.
///
/// `page_count` is derived: `ceil(row_count / page_size)`. The container is
/// indexable and iterable, and convertible element-wise to another element
/// type, serially or in parallel, with a JSON round-trip fallback when no
/// conversion function applies.
#[derive(Clone, Debug, PartialEq)]
pub struct PagedResult<T> {
    results: Vec<T>,
    current_page: u64,
    page_size: u64,
    row_count: u64,
}

impl<T> PagedResult<T> {
    /// Creates a page from any container of elements.
    pub fn new(
        results: impl Into<Vec<T>>,
        current_page: u64,
        page_size: u64,
        row_count: u64,
    ) -> Self {
        Self {
            results: results.into(),
            current_page,
            page_size,
            row_count,
        }
    }

    /// The elements of this page.
    pub fn results(&self) -> &[T] {
        &self.results
    }

    /// The zero-based page index.
    pub fn current_page(&self) -> u64 {
        self.current_page
    }

    /// The requested page size. The page itself may hold fewer elements.
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// The total number of rows under the filter, observed when the page was
    /// assembled.
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// The number of pages under the filter.
    pub fn page_count(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.row_count.div_ceil(self.page_size)
    }

    /// The number of elements in this page.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether this page holds no elements.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Iterates over the elements of this page.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.results.iter()
    }

    /// Maps each element through `convert`, preserving the paging metadata.
    pub fn convert<U>(&self, convert: impl Fn(&T) -> Result<U>) -> Result<PagedResult<U>> {
        let results = self
            .results
            .iter()
            .map(convert)
            .collect::<Result<Vec<U>>>()?;
        Ok(PagedResult::new(
            results,
            self.current_page,
            self.page_size,
            self.row_count,
        ))
    }

    /// Maps each element through `convert` in parallel. Element order is
    /// preserved.
    pub fn convert_parallel<U>(
        &self,
        convert: impl Fn(&T) -> Result<U> + Send + Sync,
    ) -> Result<PagedResult<U>>
    where
        T: Sync,
        U: Send,
    {
        let results = self
            .results
            .par_iter()
            .map(convert)
            .collect::<Result<Vec<U>>>()?;
        Ok(PagedResult::new(
            results,
            self.current_page,
            self.page_size,
            self.row_count,
        ))
    }

    /// Converts each element to `U` through a JSON round trip. The fallback
    /// for element types with no direct conversion function.
    pub fn convert_json<U>(&self) -> Result<PagedResult<U>>
    where
        T: Serialize,
        U: DeserializeOwned,
    {
        self.convert(|item| {
            let json = serde_json::to_value(item)?;
            Ok(serde_json::from_value(json)?)
        })
    }
}

impl<T> Index<usize> for PagedResult<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.results[index]
    }
}

impl<T> IntoIterator for PagedResult<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a PagedResult<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// The shape deserialized from the `$facet` paging pipeline:
/// `[{ result: [..], total: [{ total: n }] }]`.
#[derive(Debug, Deserialize)]
pub(crate) struct FacetAggregate<T> {
    #[serde(default = "Vec::new")]
    pub(crate) result: Vec<T>,
    #[serde(default = "Vec::new")]
    total: Vec<FacetTotal>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FacetTotal {
    total: i64,
}

impl<T> FacetAggregate<T> {
    /// The total row count under the pipeline, 0 when the count facet came
    /// back empty.
    pub(crate) fn total_rows(&self) -> u64 {
        self.total
            .first()
            .map(|t| t.total.max(0) as u64)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::bson::doc;

    #[test]
    fn page_count_rounds_up() {
        let page = PagedResult::new(vec![0u8; 7], 5, 10, 57);
        assert_eq!(page.page_count(), 6);
        assert_eq!(page.row_count(), 57);
        assert_eq!(page.len(), 7);
    }

    #[test]
    fn page_count_is_zero_for_zero_page_size() {
        let page: PagedResult<u8> = PagedResult::new(Vec::new(), 0, 0, 42);
        assert_eq!(page.page_count(), 0);
    }

    #[test]
    fn exact_division_has_no_extra_page() {
        let page = PagedResult::new(vec![0u8; 10], 0, 10, 40);
        assert_eq!(page.page_count(), 4);
    }

    #[test]
    fn indexing_and_iteration() {
        let page = PagedResult::new(vec!["a", "b", "c"], 0, 3, 3);
        assert_eq!(page[1], "b");
        assert_eq!(page.iter().count(), 3);
        assert_eq!((&page).into_iter().last(), Some(&"c"));
        assert_eq!(page.into_iter().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[test]
    fn convert_preserves_metadata() {
        let page = PagedResult::new(vec![1i32, 2, 3], 2, 3, 9);
        let converted = page.convert(|n| Ok(n * 10)).unwrap();
        assert_eq!(converted.results(), &[10, 20, 30]);
        assert_eq!(converted.current_page(), 2);
        assert_eq!(converted.page_size(), 3);
        assert_eq!(converted.row_count(), 9);
    }

    #[test]
    fn convert_parallel_preserves_order() {
        let page = PagedResult::new((0..100i64).collect::<Vec<_>>(), 0, 100, 100);
        let converted = page.convert_parallel(|n| Ok(n + 1)).unwrap();
        assert_eq!(
            converted.results(),
            (1..=100i64).collect::<Vec<_>>().as_slice()
        );
    }

    #[test]
    fn convert_json_round_trips() {
        #[derive(serde::Serialize)]
        struct Wide {
            x: i32,
            y: i32,
        }
        #[derive(Debug, PartialEq, serde::Deserialize)]
        struct Narrow {
            x: i32,
        }

        let page = PagedResult::new(vec![Wide { x: 1, y: 2 }], 0, 1, 1);
        let narrow = page.convert_json::<Narrow>().unwrap();
        assert_eq!(narrow.results(), &[Narrow { x: 1 }]);
    }

    #[test]
    fn facet_envelope_reads_total() {
        let envelope: FacetAggregate<i32> = crate::bson::from_document(doc! {
            "result": [1, 2, 3],
            "total": [{ "total": 42 }],
        })
        .unwrap();
        assert_eq!(envelope.result, vec![1, 2, 3]);
        assert_eq!(envelope.total_rows(), 42);
    }

    #[test]
    fn facet_envelope_defaults_to_zero_total() {
        let envelope: FacetAggregate<i32> =
            crate::bson::from_document(doc! { "result": [] }).unwrap();
        assert!(envelope.result.is_empty());
        assert_eq!(envelope.total_rows(), 0);
    }
}
