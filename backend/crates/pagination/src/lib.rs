//! Cursor pagination primitives for time-ordered collections.
//!
//! Every paginated read in the newsfeed backend (follow lists, author
//! timelines, per-user feeds) orders items by a signed 64-bit score, newest
//! first, and breaks ties on an ascending 64-bit key. A [`Cursor`] records
//! the position of the last item a caller has seen, and [`PageRequest`]
//! bundles that cursor with a bounded page size.
//!
//! Adapters that can express the ordering natively (SQL `ORDER BY`, Redis
//! sorted-set ranges) use [`PageRequest::cursor`] to build their own
//! predicates. Adapters that cannot, or that merge several partial reads,
//! use [`paginate`] to apply the same contract in memory.
//!
//! # Examples
//!
//! ```
//! use pagination::{Keyed, PageRequest, paginate};
//!
//! struct Entry(i64, i64);
//!
//! impl Keyed for Entry {
//!     fn score(&self) -> i64 { self.0 }
//!     fn tie_key(&self) -> i64 { self.1 }
//! }
//!
//! let entries = vec![Entry(100, 1), Entry(300, 2), Entry(200, 3)];
//! let request = PageRequest::first_page(2).expect("valid limit");
//! let page = paginate(entries, &request);
//!
//! let scores: Vec<i64> = page.items().iter().map(|entry| entry.0).collect();
//! assert_eq!(scores, vec![300, 200]);
//! assert!(page.next_cursor().is_some());
//! ```

mod cursor;
mod page;

pub use cursor::{Cursor, CursorError};
pub use page::{
    DEFAULT_LIMIT, Keyed, MAX_LIMIT, Page, PageRequest, PageRequestError, newest_first, paginate,
};
