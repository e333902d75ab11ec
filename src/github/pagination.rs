//! Page accumulation for paginated list endpoints.
//!
//! Pages are fetched strictly one after another and folded into a single
//! result. The fold is pure: it either merges a page into the accumulator and
//! asks for the next one, or signals that the final page has been seen.

use std::ops::ControlFlow;

/// A response shape that can be accumulated across pages.
pub trait Page: Default {
    /// Number of elements this page contributes.
    fn item_count(&self) -> usize;

    /// Append `page`'s elements after this page's elements.
    fn merge(&mut self, page: Self);
}

impl<T> Page for Vec<T> {
    fn item_count(&self) -> usize {
        self.len()
    }

    fn merge(&mut self, page: Self) {
        self.extend(page);
    }
}

/// Merges one page into the accumulator.
///
/// `Continue(acc)` carries the updated accumulator and requests the next page.
/// `Break(acc)` ends pagination and carries the final result.
pub type PageReducer<T> = fn(T, T) -> ControlFlow<T, T>;

/// Default reducer: an empty page ends pagination with the accumulator
/// unchanged, otherwise the page is appended.
pub fn fold<T: Page>(mut accumulator: T, page: T) -> ControlFlow<T, T> {
    if page.item_count() == 0 {
        return ControlFlow::Break(accumulator);
    }
    accumulator.merge(page);
    ControlFlow::Continue(accumulator)
}

/// How a list endpoint is paged.
pub struct Pagination<T> {
    pub per_page: u32,
    pub start_page: u32,
    pub reducer: PageReducer<T>,
}

impl<T: Page> Pagination<T> {
    pub fn new(per_page: u32) -> Self {
        Self {
            per_page: per_page.max(1),
            start_page: 1,
            reducer: fold::<T>,
        }
    }

    pub fn starting_at(mut self, page: u32) -> Self {
        self.start_page = page;
        self
    }

    pub fn with_reducer(mut self, reducer: PageReducer<T>) -> Self {
        self.reducer = reducer;
        self
    }
}

impl<T> Clone for Pagination<T> {
    fn clone(&self) -> Self {
        Self {
            per_page: self.per_page,
            start_page: self.start_page,
            reducer: self.reducer,
        }
    }
}

impl<T> std::fmt::Debug for Pagination<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pagination")
            .field("per_page", &self.per_page)
            .field("start_page", &self.start_page)
            .finish()
    }
}
