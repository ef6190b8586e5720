//! 分页驱动
//!
//! - 分页模式：单次有界查询，原样返回续页键，不隐藏循环；
//! - 全量模式：携带续页键循环查询直到续页键为空，只投影轻量字段。
//!
//! 全量循环中任何存储错误都会中止整个循环并向上传播；取消令牌在每页之前检查，
//! 并与进行中的查询竞争，取消后不再发出新的请求。

use crate::services::error::{QueryError, QueryResult};
use crate::services::store::{
    ContentStore, ContinuationToken, Page, Projection, QuerySpec, StoredItem, TableIndex,
};
use tokio_util::sync::CancellationToken;

pub struct Paginator<'a> {
    store: &'a dyn ContentStore,
    scan_page_size: usize,
    max_pages: Option<usize>,
}

impl<'a> Paginator<'a> {
    pub fn new(store: &'a dyn ContentStore, scan_page_size: usize, max_pages: Option<usize>) -> Self {
        Self {
            store,
            scan_page_size: scan_page_size.max(1),
            max_pages,
        }
    }

    /// 单页查询
    ///
    /// 与查询规格不匹配的起始键（例如来自另一科目的令牌）被丢弃，从头开始。
    pub async fn fetch_page(
        &self,
        spec: &QuerySpec,
        projection: &Projection,
        limit: usize,
        start: Option<ContinuationToken>,
    ) -> QueryResult<Page> {
        let start = start.filter(|token| {
            let usable = token_fits_spec(token, spec);
            if !usable {
                log::warn!(
                    "continuation token {:?} does not belong to partition {}, starting over",
                    token,
                    spec.key.partition
                );
            }
            usable
        });
        self.store
            .query(spec, projection, limit.max(1), start.as_ref())
            .await
    }

    /// 全量枚举所有匹配记录
    pub async fn collect_all(
        &self,
        spec: &QuerySpec,
        projection: &Projection,
        cancel: &CancellationToken,
    ) -> QueryResult<Vec<StoredItem>> {
        let mut items = Vec::new();
        let mut cursor: Option<ContinuationToken> = None;
        let mut pages = 0usize;

        loop {
            if cancel.is_cancelled() {
                log::info!("exhaustive scan cancelled after {} page(s)", pages);
                return Err(QueryError::Cancelled);
            }
            if let Some(max) = self.max_pages {
                if pages >= max {
                    log::warn!("exhaustive scan stopped at the {} page cap", max);
                    return Err(QueryError::ScanLimitExceeded(max));
                }
            }

            let page = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::info!("exhaustive scan cancelled during page {}", pages + 1);
                    return Err(QueryError::Cancelled);
                }
                page = self.store.query(spec, projection, self.scan_page_size, cursor.as_ref()) => page?,
            };
            pages += 1;

            log::debug!(
                "scan page {}: {} item(s), accumulated {}",
                pages,
                page.items.len(),
                items.len() + page.items.len()
            );
            items.extend(page.items);

            match page.last_evaluated_key {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        log::debug!("exhaustive scan finished: {} page(s), {} item(s)", pages, items.len());
        Ok(items)
    }
}

fn token_fits_spec(token: &ContinuationToken, spec: &QuerySpec) -> bool {
    let (partition, sort_key) = match spec.index {
        TableIndex::Primary => (Some(&token.pk), Some(&token.sk)),
        TableIndex::Gsi1 => (token.gsi1_pk.as_ref(), token.gsi1_sk.as_ref()),
    };
    let prefix_ok = match (&spec.key.sort_prefix, sort_key) {
        (Some(prefix), Some(sk)) => sk.starts_with(prefix.as_str()),
        (None, Some(_)) => true,
        (_, None) => false,
    };
    partition == Some(&spec.key.partition) && prefix_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QuestionFilters;
    use crate::services::keyspace::build_query_spec;
    use crate::services::test_support::{seed_questions, FaultyStore, FaultMode};
    use crate::services::SqliteContentStore;
    use assert_matches::assert_matches;
    use std::collections::HashSet;

    #[tokio::test]
    async fn paged_traversal_matches_exhaustive_scan() {
        let store = SqliteContentStore::in_memory().unwrap();
        seed_questions(&store, "algebra", 23).await;
        seed_questions(&store, "biology", 17).await;

        let spec = build_query_spec(&QuestionFilters::default());
        let paginator = Paginator::new(&store, 7, None);

        let mut paged = Vec::new();
        let mut token = None;
        loop {
            let page = paginator
                .fetch_page(&spec, &Projection::KeysOnly, 6, token)
                .await
                .unwrap();
            paged.extend(page.items.iter().map(StoredItem::key));
            token = page.last_evaluated_key;
            if token.is_none() {
                break;
            }
        }

        let all: Vec<_> = paginator
            .collect_all(&spec, &Projection::KeysOnly, &CancellationToken::new())
            .await
            .unwrap()
            .iter()
            .map(StoredItem::key)
            .collect();

        assert_eq!(all.len(), 40);
        assert_eq!(paged, all);
        assert_eq!(paged.iter().collect::<HashSet<_>>().len(), 40);
    }

    #[tokio::test]
    async fn foreign_token_restarts_from_the_beginning() {
        let store = SqliteContentStore::in_memory().unwrap();
        seed_questions(&store, "algebra", 3).await;
        seed_questions(&store, "biology", 3).await;

        let paginator = Paginator::new(&store, 10, None);
        let biology = build_query_spec(&QuestionFilters::for_subject("biology"));
        let algebra = build_query_spec(&QuestionFilters::for_subject("algebra"));

        let bio_page = paginator
            .fetch_page(&biology, &Projection::KeysOnly, 1, None)
            .await
            .unwrap();
        let foreign = bio_page.last_evaluated_key.unwrap();

        let page = paginator
            .fetch_page(&algebra, &Projection::KeysOnly, 10, Some(foreign))
            .await
            .unwrap();
        assert_eq!(page.items.len(), 3);
    }

    #[tokio::test]
    async fn cancelled_scan_issues_no_queries() {
        let inner = SqliteContentStore::in_memory().unwrap();
        seed_questions(&inner, "algebra", 5).await;
        let store = FaultyStore::new(inner, FaultMode::None);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let spec = build_query_spec(&QuestionFilters::default());
        let result = Paginator::new(&store, 2, None)
            .collect_all(&spec, &Projection::KeysOnly, &cancel)
            .await;
        assert_matches!(result, Err(QueryError::Cancelled));
        assert_eq!(store.query_calls(), 0);
    }

    #[tokio::test]
    async fn store_failure_aborts_the_scan() {
        let inner = SqliteContentStore::in_memory().unwrap();
        seed_questions(&inner, "algebra", 10).await;
        let store = FaultyStore::new(inner, FaultMode::FailQueryAfter(2));

        let spec = build_query_spec(&QuestionFilters::default());
        let result = Paginator::new(&store, 3, None)
            .collect_all(&spec, &Projection::KeysOnly, &CancellationToken::new())
            .await;
        assert_matches!(result, Err(QueryError::StoreUnavailable(_)));
        assert_eq!(store.query_calls(), 3);
    }

    #[tokio::test]
    async fn page_cap_stops_runaway_scans() {
        let store = SqliteContentStore::in_memory().unwrap();
        seed_questions(&store, "algebra", 10).await;

        let spec = build_query_spec(&QuestionFilters::default());
        let result = Paginator::new(&store, 2, Some(3))
            .collect_all(&spec, &Projection::KeysOnly, &CancellationToken::new())
            .await;
        assert_matches!(result, Err(QueryError::ScanLimitExceeded(3)));
    }
}
