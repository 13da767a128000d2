//! 通用分页
//!
//! `get_page` 返回 `{entities, page, pageSize, hasMore}`；`for_each_page`
//! 逐页拉取并逐条回调，回调返回 `ControlFlow::Break` 或数据耗尽时停止。

use std::future::Future;
use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    /// 页码，从 1 开始。
    pub page: usize,
    pub page_size: usize,
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageQuery {
    pub fn new(page: usize, page_size: usize) -> Self {
        Self { page, page_size }.normalized()
    }

    pub fn normalized(self) -> Self {
        Self {
            page: self.page.max(1),
            page_size: self.page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> usize {
        (self.page.max(1) - 1) * self.page_size
    }

    pub fn next(&self) -> Self {
        Self {
            page: self.page + 1,
            page_size: self.page_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub entities: Vec<T>,
    pub page: usize,
    pub page_size: usize,
    pub has_more: bool,
}

/// 对已在内存中的有序集合分页。
pub fn paginate<T>(items: Vec<T>, query: PageQuery) -> Page<T> {
    let query = query.normalized();
    let total = items.len();
    let offset = query.offset();
    let entities: Vec<T> = items
        .into_iter()
        .skip(offset)
        .take(query.page_size)
        .collect();
    Page {
        has_more: offset + entities.len() < total,
        entities,
        page: query.page,
        page_size: query.page_size,
    }
}

/// 逐页遍历。
pub async fn for_each_page<T, F, Fut, V>(
    start: PageQuery,
    mut fetch: F,
    mut visit: V,
) -> Result<(), StorageError>
where
    F: FnMut(PageQuery) -> Fut,
    Fut: Future<Output = Result<Page<T>, StorageError>>,
    V: FnMut(T) -> ControlFlow<()>,
{
    let mut query = start.normalized();
    loop {
        let page = fetch(query).await?;
        let has_more = page.has_more;
        for entity in page.entities {
            if visit(entity).is_break() {
                return Ok(());
            }
        }
        if !has_more {
            return Ok(());
        }
        query = query.next();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paginate_reports_has_more() {
        let page = paginate((1..=5).collect::<Vec<_>>(), PageQuery::new(1, 2));
        assert_eq!(page.entities, vec![1, 2]);
        assert!(page.has_more);
        let last = paginate((1..=5).collect::<Vec<_>>(), PageQuery::new(3, 2));
        assert_eq!(last.entities, vec![5]);
        assert!(!last.has_more);
    }

    #[tokio::test]
    async fn for_each_page_stops_on_break() {
        let data: Vec<u32> = (1..=10).collect();
        let mut seen = Vec::new();
        for_each_page(
            PageQuery::new(1, 3),
            |query| {
                let page = paginate(data.clone(), query);
                async move { Ok(page) }
            },
            |value| {
                seen.push(value);
                if value == 7 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            },
        )
        .await
        .expect("iterate");
        assert_eq!(seen, (1..=7).collect::<Vec<_>>());
    }
}
