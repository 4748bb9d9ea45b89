//! Page window computation.

use serde::{Deserialize, Serialize};

/// Largest page size a caller may request.
pub const MAX_PAGE_SIZE: i64 = 100;
/// Page size used when none is requested.
pub const DEFAULT_PAGE_SIZE: i64 = 10;

/// A requested page. Values are clamped, never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

impl PageRequest {
    pub fn new(page: i64, limit: i64) -> Self {
        Self { page, limit }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: default_page(),
            limit: default_limit(),
        }
    }
}

fn default_page() -> i64 {
    1
}

fn default_limit() -> i64 {
    DEFAULT_PAGE_SIZE
}

/// Metadata describing a page. Derived, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub current_page: usize,
    pub page_size: usize,
    pub total_items: usize,
    pub total_pages: usize,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

/// A page window over a sequence of `total_items` elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub start_index: usize,
    pub end_index: usize,
    pub meta: PaginationMeta,
}

impl PageWindow {
    /// The part of `items` that falls inside this window.
    pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        let end = self.end_index.min(items.len());
        let start = self.start_index.min(end);
        &items[start..end]
    }
}

/// A page of items together with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: PaginationMeta,
}

/// Compute the window for `page` of size `limit` over `total_items`.
///
/// `limit` is clamped to `[1, 100]` and `page` to `[1, max(total_pages, 1)]`.
pub fn paginate(total_items: usize, page: i64, limit: i64) -> PageWindow {
    let limit = limit.clamp(1, MAX_PAGE_SIZE) as usize;
    let total_pages = total_items.div_ceil(limit);
    let last_page = total_pages.max(1);
    let page = page.clamp(1, last_page as i64) as usize;

    let start_index = (page - 1) * limit;
    let end_index = (start_index + limit).min(total_items);

    PageWindow {
        start_index,
        end_index,
        meta: PaginationMeta {
            current_page: page,
            page_size: limit,
            total_items,
            total_pages,
            has_next_page: page < total_pages,
            has_prev_page: page > 1,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_page() {
        let window = paginate(25, 1, 10);
        assert_eq!(window.start_index, 0);
        assert_eq!(window.end_index, 10);
        assert_eq!(window.meta.total_pages, 3);
        assert!(window.meta.has_next_page);
        assert!(!window.meta.has_prev_page);
    }

    #[test]
    fn test_last_partial_page() {
        let window = paginate(25, 3, 10);
        assert_eq!((window.start_index, window.end_index), (20, 25));
        assert!(!window.meta.has_next_page);
        assert!(window.meta.has_prev_page);
    }

    #[test]
    fn test_empty_sequence() {
        let window = paginate(0, 1, 10);
        assert_eq!((window.start_index, window.end_index), (0, 0));
        assert_eq!(window.meta.total_pages, 0);
        assert_eq!(window.meta.current_page, 1);
        assert!(!window.meta.has_next_page);
        assert!(!window.meta.has_prev_page);

        let items: Vec<u8> = Vec::new();
        assert!(window.slice(&items).is_empty());
    }

    #[test]
    fn test_clamping() {
        // page beyond the end lands on the last page
        let window = paginate(25, 9, 10);
        assert_eq!(window.meta.current_page, 3);

        // page below 1 lands on the first page
        let window = paginate(25, -4, 10);
        assert_eq!(window.meta.current_page, 1);

        // limit clamped to [1, 100]
        assert_eq!(paginate(500, 1, 1000).meta.page_size, 100);
        assert_eq!(paginate(5, 1, 0).meta.page_size, 1);
        assert_eq!(paginate(5, 1, 0).meta.total_pages, 5);
    }

    #[test]
    fn test_slice() {
        let items: Vec<u32> = (0..25).collect();
        let window = paginate(items.len(), 2, 10);
        assert_eq!(window.slice(&items), &items[10..20]);
    }

    #[test]
    fn test_meta_serializes_camel_case() {
        let meta = paginate(25, 1, 10).meta;
        let json = serde_json::to_value(meta).unwrap();
        assert_eq!(json["totalPages"], 3);
        assert_eq!(json["hasNextPage"], true);
        assert_eq!(json["currentPage"], 1);
    }
}
