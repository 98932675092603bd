use memo_mirror_schemas::{Memo, MemoPage, OrderBy, PageRequest, SortDirection, TagCount};
use memo_mirror_store::{Database, Result};
use std::sync::Arc;

pub const MAX_PAGE_LIMIT: usize = 500;

/// Read-only access to the local store, usable while a sync is running.
///
/// Offset paging under a concurrent sync may skip or repeat a row between
/// two requests.
#[derive(Clone)]
pub struct QueryService {
    db: Arc<Database>,
}

impl QueryService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get_page(
        &self,
        order_by: OrderBy,
        direction: SortDirection,
        offset: usize,
        limit: usize,
    ) -> Result<MemoPage> {
        self.db.get_page(&request(order_by, direction, offset, limit))
    }

    pub fn search_page(
        &self,
        query: &str,
        order_by: OrderBy,
        direction: SortDirection,
        offset: usize,
        limit: usize,
    ) -> Result<MemoPage> {
        self.db
            .search_page(query, &request(order_by, direction, offset, limit))
    }

    /// Every stored memo in the given order, read page by page
    pub fn collect_all(&self, order_by: OrderBy, direction: SortDirection) -> Result<Vec<Memo>> {
        let mut memos = Vec::new();
        let mut request = PageRequest::new(order_by, direction, 0, MAX_PAGE_LIMIT);
        loop {
            let page = self.db.get_page(&request)?;
            memos.extend(page.memos);
            if !page.has_more {
                return Ok(memos);
            }
            request = request.next();
        }
    }

    /// Every memo matching `query`, read page by page
    pub fn collect_matching(
        &self,
        query: &str,
        order_by: OrderBy,
        direction: SortDirection,
    ) -> Result<Vec<Memo>> {
        let mut memos = Vec::new();
        let mut request = PageRequest::new(order_by, direction, 0, MAX_PAGE_LIMIT);
        loop {
            let page = self.db.search_page(query, &request)?;
            memos.extend(page.memos);
            if !page.has_more {
                return Ok(memos);
            }
            request = request.next();
        }
    }

    pub fn get_memo(&self, slug: &str) -> Result<Option<Memo>> {
        self.db.get_memo(slug)
    }

    pub fn tags(&self) -> Result<Vec<TagCount>> {
        self.db.list_tags()
    }

    pub fn count(&self) -> Result<usize> {
        self.db.count_memos()
    }
}

fn request(order_by: OrderBy, direction: SortDirection, offset: usize, limit: usize) -> PageRequest {
    PageRequest::new(order_by, direction, offset, limit.clamp(1, MAX_PAGE_LIMIT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn seeded(count: usize) -> (NamedTempFile, QueryService) {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Arc::new(Database::new(temp_file.path()).unwrap());
        let memos: Vec<Memo> = (0..count)
            .map(|i| Memo {
                slug: format!("s{:04}", i),
                content: format!("memo {}", i),
                created_at: "2024-01-01 00:00:00".to_string(),
                updated_at: "2024-01-01 00:00:00".to_string(),
                tags: vec![],
                url: None,
            })
            .collect();
        db.upsert_page(&memos).unwrap();
        (temp_file, QueryService::new(db))
    }

    #[test]
    fn test_limit_is_clamped() {
        let (_file, query) = seeded(3);

        let zero = query
            .get_page(OrderBy::CreatedAt, SortDirection::Desc, 0, 0)
            .unwrap();
        assert_eq!(zero.memos.len(), 1);
        assert!(zero.has_more);

        let huge = query
            .get_page(OrderBy::CreatedAt, SortDirection::Desc, 0, 10_000)
            .unwrap();
        assert_eq!(huge.memos.len(), 3);
        assert!(!huge.has_more);
    }

    #[test]
    fn test_collect_all_crosses_pages() {
        let (_file, query) = seeded(MAX_PAGE_LIMIT + 7);

        let all = query
            .collect_all(OrderBy::CreatedAt, SortDirection::Asc)
            .unwrap();
        assert_eq!(all.len(), MAX_PAGE_LIMIT + 7);
        assert_eq!(all[0].slug, "s0000");
        assert_eq!(all.last().unwrap().slug, format!("s{:04}", MAX_PAGE_LIMIT + 6));

        let matching = query
            .collect_matching("memo 1", OrderBy::CreatedAt, SortDirection::Asc)
            .unwrap();
        assert!(matching.iter().all(|m| m.content.starts_with("memo 1")));
        assert_eq!(query.count().unwrap(), MAX_PAGE_LIMIT + 7);
    }
}
