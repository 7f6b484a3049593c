//! Page requests, page envelopes, and the shared ordering contract.

use std::cmp::Ordering;

use crate::cursor::{Cursor, CursorError};

/// Page size applied when a caller does not supply one.
pub const DEFAULT_LIMIT: usize = 20;

/// Largest page size a caller may request.
pub const MAX_LIMIT: usize = 100;

/// Items that can be placed in newest-first order.
pub trait Keyed {
    /// Primary ordering value, typically epoch seconds.
    fn score(&self) -> i64;

    /// Secondary ordering value used to break score ties.
    fn tie_key(&self) -> i64;
}

/// Errors raised while building a [`PageRequest`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PageRequestError {
    /// The requested page size was zero or above [`MAX_LIMIT`].
    #[error("page limit must be between 1 and {max}, got {0}", max = MAX_LIMIT)]
    LimitOutOfRange(usize),
    /// The supplied cursor token could not be decoded.
    #[error(transparent)]
    Cursor(#[from] CursorError),
}

/// A bounded request for the next page after an optional cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    cursor: Option<Cursor>,
    limit: usize,
}

impl PageRequest {
    /// Build a request, validating the page size.
    ///
    /// # Errors
    ///
    /// Returns [`PageRequestError::LimitOutOfRange`] when `limit` is zero or
    /// above [`MAX_LIMIT`].
    pub const fn new(cursor: Option<Cursor>, limit: usize) -> Result<Self, PageRequestError> {
        if limit == 0 || limit > MAX_LIMIT {
            return Err(PageRequestError::LimitOutOfRange(limit));
        }
        Ok(Self { cursor, limit })
    }

    /// Request for the newest items.
    ///
    /// # Errors
    ///
    /// Returns [`PageRequestError::LimitOutOfRange`] for invalid limits.
    pub const fn first_page(limit: usize) -> Result<Self, PageRequestError> {
        Self::new(None, limit)
    }

    /// Build a request from transport-level parameters: an optional opaque
    /// token and an optional page size.
    ///
    /// # Errors
    ///
    /// Returns [`PageRequestError`] when the token does not decode or the
    /// limit is out of range.
    ///
    /// # Examples
    ///
    /// ```
    /// use pagination::{DEFAULT_LIMIT, PageRequest};
    ///
    /// let request = PageRequest::from_params(Some("1700000000"), None).expect("valid");
    /// assert_eq!(request.limit(), DEFAULT_LIMIT);
    /// assert_eq!(request.cursor().map(|c| c.score()), Some(1_700_000_000));
    /// ```
    pub fn from_params(token: Option<&str>, limit: Option<usize>) -> Result<Self, PageRequestError> {
        let cursor = token.map(Cursor::decode).transpose()?;
        Self::new(cursor, limit.unwrap_or(DEFAULT_LIMIT))
    }

    /// Cursor after which items are returned, if any.
    #[must_use]
    pub const fn cursor(&self) -> Option<Cursor> {
        self.cursor
    }

    /// Maximum number of items in the page.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Whether an item at `score`/`key` belongs after this request's cursor.
    #[must_use]
    pub const fn admits(&self, score: i64, key: i64) -> bool {
        match self.cursor {
            Some(cursor) => cursor.admits(score, key),
            None => true,
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            cursor: None,
            limit: DEFAULT_LIMIT,
        }
    }
}

/// One page of results plus the cursor for the following page.
///
/// `next_cursor` is present only when the page is full; a short page means
/// the collection is exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    items: Vec<T>,
    next_cursor: Option<Cursor>,
}

impl<T: Keyed> Page<T> {
    /// Wrap items already ordered and truncated for `request`.
    #[must_use]
    pub fn from_ordered(items: Vec<T>, request: &PageRequest) -> Self {
        let next_cursor = if items.len() >= request.limit() {
            items
                .last()
                .map(|last| Cursor::after_item(last.score(), last.tie_key()))
        } else {
            None
        };
        Self { items, next_cursor }
    }
}

impl<T> Page<T> {
    /// Page with no items and no continuation.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
        }
    }

    /// Items in newest-first order.
    #[must_use]
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Consume the page, returning its items.
    #[must_use]
    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    /// Cursor for the next page, when more items may exist.
    #[must_use]
    pub const fn next_cursor(&self) -> Option<Cursor> {
        self.next_cursor
    }

    /// Number of items in the page.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the page holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Transform every item, keeping the continuation cursor.
    #[must_use]
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            next_cursor: self.next_cursor,
        }
    }
}

/// Newest-first comparison: descending score, then ascending tie key.
pub fn newest_first<T: Keyed>(left: &T, right: &T) -> Ordering {
    right
        .score()
        .cmp(&left.score())
        .then_with(|| left.tie_key().cmp(&right.tie_key()))
}

/// Apply a page request to an unordered collection.
///
/// Items not admitted by the request's cursor are discarded, the remainder
/// is sorted with [`newest_first`], and at most `limit` items are kept.
pub fn paginate<T: Keyed>(items: impl IntoIterator<Item = T>, request: &PageRequest) -> Page<T> {
    let mut admitted: Vec<T> = items
        .into_iter()
        .filter(|item| request.admits(item.score(), item.tie_key()))
        .collect();
    admitted.sort_by(newest_first);
    admitted.truncate(request.limit());
    Page::from_ordered(admitted, request)
}

#[cfg(test)]
mod tests {
    //! Ordering and continuation behaviour.
    use super::*;
    use rstest::{fixture, rstest};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Item {
        score: i64,
        key: i64,
    }

    impl Keyed for Item {
        fn score(&self) -> i64 {
            self.score
        }

        fn tie_key(&self) -> i64 {
            self.key
        }
    }

    #[fixture]
    fn timeline() -> Vec<Item> {
        (1..=7)
            .map(|key| Item {
                score: 100 * key,
                key,
            })
            .collect()
    }

    fn drain(items: &[Item], limit: usize) -> Vec<Vec<i64>> {
        let mut pages = Vec::new();
        let mut request = PageRequest::first_page(limit).expect("valid limit");
        loop {
            let page = paginate(items.iter().copied(), &request);
            pages.push(page.items().iter().map(|item| item.score).collect());
            match page.next_cursor() {
                Some(cursor) => {
                    request = PageRequest::new(Some(cursor), limit).expect("valid limit");
                }
                None => break,
            }
        }
        pages
    }

    #[rstest]
    #[case(0)]
    #[case(MAX_LIMIT + 1)]
    fn rejects_out_of_range_limits(#[case] limit: usize) {
        assert_eq!(
            PageRequest::first_page(limit),
            Err(PageRequestError::LimitOutOfRange(limit))
        );
    }

    #[rstest]
    fn pages_cover_every_item_once_in_descending_order(timeline: Vec<Item>) {
        let pages = drain(&timeline, 3);
        assert_eq!(
            pages,
            vec![vec![700, 600, 500], vec![400, 300, 200], vec![100]]
        );
    }

    #[rstest]
    fn exact_multiple_ends_with_an_empty_page(timeline: Vec<Item>) {
        let six = timeline.into_iter().take(6).collect::<Vec<_>>();
        let pages = drain(&six, 3);
        assert_eq!(pages.last(), Some(&Vec::new()));
        assert_eq!(pages.iter().map(Vec::len).sum::<usize>(), 6);
    }

    #[rstest]
    fn equal_scores_are_split_across_pages_without_loss() {
        let items = [
            Item { score: 50, key: 9 },
            Item { score: 50, key: 3 },
            Item { score: 50, key: 7 },
            Item { score: 40, key: 1 },
        ];
        let request = PageRequest::first_page(2).expect("valid limit");
        let first = paginate(items, &request);
        assert_eq!(
            first.items().iter().map(|i| i.key).collect::<Vec<_>>(),
            vec![3, 7]
        );

        let next = PageRequest::new(first.next_cursor(), 2).expect("valid limit");
        let second = paginate(items, &next);
        assert_eq!(
            second.items().iter().map(|i| i.key).collect::<Vec<_>>(),
            vec![9, 1]
        );
    }

    #[rstest]
    fn inserts_newer_than_the_cursor_do_not_reappear(timeline: Vec<Item>) {
        let request = PageRequest::first_page(2).expect("valid limit");
        let first = paginate(timeline.iter().copied(), &request);

        let mut grown = timeline;
        grown.push(Item { score: 900, key: 8 });
        let next = PageRequest::new(first.next_cursor(), 2).expect("valid limit");
        let second = paginate(grown, &next);

        assert!(second.items().iter().all(|item| item.score < 600));
    }

    #[rstest]
    fn default_request_uses_default_limit() {
        let request = PageRequest::default();
        assert_eq!(request.limit(), DEFAULT_LIMIT);
        assert!(request.cursor().is_none());
    }

    #[rstest]
    fn from_params_rejects_bad_tokens() {
        assert!(matches!(
            PageRequest::from_params(Some("%%%"), Some(5)),
            Err(PageRequestError::Cursor(_))
        ));
    }

    #[rstest]
    fn map_preserves_the_continuation(timeline: Vec<Item>) {
        let request = PageRequest::first_page(2).expect("valid limit");
        let page = paginate(timeline, &request);
        let cursor = page.next_cursor();
        let mapped = page.map(|item| item.key);
        assert_eq!(mapped.items(), &[7, 6]);
        assert_eq!(mapped.next_cursor(), cursor);
    }
}
