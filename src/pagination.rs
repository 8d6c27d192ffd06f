//! Pagination (spec §6, the `[P]` decorator) — a 0-indexed page slice over
//! an already-ordered `Vec`, fixed page size, wrapped in the
//! `{items, pages}` envelope every paginated endpoint returns.
//!
//! New: the teacher returns bare arrays from its list endpoints with no
//! paging at all (`GameManager::list_games` hands back everything). This
//! module is grounded on the handler-level slicing idiom visible in
//! `kalepail-ohloss`'s leaderboard queries, adapted to pure in-memory
//! `Vec` slicing since storage here is not a SQL backend.

use serde::Serialize;

use crate::errors::KasupelError;

pub const PAGE_SIZE: usize = 100;

#[derive(Debug, Serialize)]
pub struct Page<T: Serialize> {
    pub items: Vec<T>,
    pub pages: u64,
}

/// Slices `items` into page `page` (0-indexed) of `PAGE_SIZE` entries.
/// `Err(PageOutOfRange)` when `page > 0` and it has no entries at all
/// (page 0 of an empty collection is valid and returns an empty page).
pub fn paginate<T: Clone + Serialize>(items: &[T], page: u64) -> Result<Page<T>, KasupelError> {
    let total_pages = items.len().div_ceil(PAGE_SIZE).max(1) as u64;
    if page >= total_pages && page != 0 {
        return Err(KasupelError::PageOutOfRange);
    }
    let start = (page as usize) * PAGE_SIZE;
    let end = (start + PAGE_SIZE).min(items.len());
    let slice = if start >= items.len() {
        Vec::new()
    } else {
        items[start..end].to_vec()
    };
    Ok(Page {
        items: slice,
        pages: total_pages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_collection_page_zero_is_empty_not_an_error() {
        let items: Vec<u32> = Vec::new();
        let page = paginate(&items, 0).unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.pages, 1);
    }

    #[test]
    fn page_boundary_splits_exactly_at_page_size() {
        let items: Vec<u32> = (0..(PAGE_SIZE as u32 + 1)).collect();
        let first = paginate(&items, 0).unwrap();
        assert_eq!(first.items.len(), PAGE_SIZE);
        let second = paginate(&items, 1).unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.pages, 2);
    }

    #[test]
    fn out_of_range_page_errors() {
        let items = vec![1u32, 2, 3];
        let err = paginate(&items, 5).unwrap_err();
        assert_eq!(err, KasupelError::PageOutOfRange);
    }
}
