//! Pagination for journal listings

/// Journal entries per page
pub const PAGE_SIZE: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// Current page number (1-indexed)
    pub page: i64,
    pub total_pages: i64,
    /// Offset for SQL LIMIT/OFFSET query
    pub offset: i64,
}

/// Clamp `requested_page` into `[1, total_pages]` and compute the offset
///
/// ```
/// use reclaim_api::pagination::calculate_pagination;
///
/// let p = calculate_pagination(45, 2);
/// assert_eq!(p.total_pages, 3);
/// assert_eq!(p.offset, 20);
///
/// let p = calculate_pagination(45, 99);
/// assert_eq!(p.page, 3);
/// ```
pub fn calculate_pagination(total_results: i64, requested_page: i64) -> Pagination {
    let total_pages = (total_results + PAGE_SIZE - 1) / PAGE_SIZE;
    let page = requested_page.max(1).min(total_pages.max(1));
    let offset = (page - 1) * PAGE_SIZE;

    Pagination {
        page,
        total_pages,
        offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_normal() {
        let p = calculate_pagination(50, 2);
        assert_eq!(p.page, 2);
        assert_eq!(p.total_pages, 3);
        assert_eq!(p.offset, 20);
    }

    #[test]
    fn test_pagination_empty() {
        let p = calculate_pagination(0, 1);
        assert_eq!(p.page, 1);
        assert_eq!(p.total_pages, 0);
        assert_eq!(p.offset, 0);
    }

    #[test]
    fn test_pagination_clamps() {
        assert_eq!(calculate_pagination(20, 0).page, 1);
        assert_eq!(calculate_pagination(20, -4).page, 1);
        assert_eq!(calculate_pagination(21, 7).page, 2);
        assert_eq!(calculate_pagination(21, 7).offset, 20);
    }
}
