//! Cursor pagination over a [`MessageStore`].

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::filter::ServerFilter;
use crate::model::message::MessageMetadata;

use super::MessageStore;

/// Walks a store listing one page at a time.
///
/// The cursor is the id of the last message handed out. Stores may repeat
/// that message at the head of the next page; only that exact boundary
/// duplicate is removed. An empty page ends the listing for good.
pub struct Paginator {
    store: Arc<dyn MessageStore>,
    filter: ServerFilter,
    page_size: usize,
    cursor: Option<String>,
    exhausted: bool,
}

impl Paginator {
    pub fn new(store: Arc<dyn MessageStore>, filter: ServerFilter, page_size: usize) -> Self {
        Self {
            store,
            filter,
            page_size: page_size.max(1),
            cursor: None,
            exhausted: false,
        }
    }

    /// Id of the last message returned so far.
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Whether an empty page has been observed.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Fetch the next page. Returns an empty page once the listing is done;
    /// the store is never called again after that.
    pub async fn next_page(&mut self) -> Result<Vec<MessageMetadata>> {
        if self.exhausted {
            return Ok(Vec::new());
        }

        let mut page = self
            .store
            .fetch_page(self.cursor.as_deref(), self.page_size, &self.filter)
            .await?;

        if let (Some(cursor), Some(first)) = (self.cursor.as_deref(), page.first()) {
            if first.id == cursor {
                page.remove(0);
            }
        }

        match page.last() {
            Some(last) => self.cursor = Some(last.id.clone()),
            None => self.exhausted = true,
        }

        debug!(
            count = page.len(),
            cursor = self.cursor.as_deref().unwrap_or(""),
            "Fetched metadata page"
        );
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExportError;
    use crate::model::message::FullMessage;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn meta(id: &str) -> MessageMetadata {
        MessageMetadata {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Replays canned pages and records every cursor it was called with.
    struct ScriptedStore {
        pages: Mutex<Vec<Vec<MessageMetadata>>>,
        calls: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedStore {
        fn new(pages: Vec<Vec<&str>>) -> Arc<Self> {
            let pages = pages
                .into_iter()
                .map(|p| p.into_iter().map(meta).collect())
                .collect();
            Arc::new(Self {
                pages: Mutex::new(pages),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Option<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageStore for ScriptedStore {
        async fn fetch_page(
            &self,
            cursor: Option<&str>,
            _page_size: usize,
            _filter: &ServerFilter,
        ) -> Result<Vec<MessageMetadata>> {
            self.calls.lock().unwrap().push(cursor.map(str::to_string));
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                return Ok(Vec::new());
            }
            Ok(pages.remove(0))
        }

        async fn fetch_message(&self, id: &str) -> Result<FullMessage> {
            Err(ExportError::MessageNotFound(id.to_string()))
        }
    }

    fn ids(page: &[MessageMetadata]) -> Vec<&str> {
        page.iter().map(|m| m.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_boundary_duplicate_removed() {
        let store = ScriptedStore::new(vec![vec!["a", "b", "c"], vec!["c", "d", "e"], vec!["e"]]);
        let mut pager = Paginator::new(store.clone(), ServerFilter::default(), 3);

        assert_eq!(ids(&pager.next_page().await.unwrap()), vec!["a", "b", "c"]);
        assert_eq!(ids(&pager.next_page().await.unwrap()), vec!["d", "e"]);
        assert!(pager.next_page().await.unwrap().is_empty());
        assert!(pager.is_exhausted());

        // Exhausted: the store is not called again
        assert!(pager.next_page().await.unwrap().is_empty());
        assert_eq!(
            store.calls(),
            vec![None, Some("c".to_string()), Some("e".to_string())]
        );
    }

    #[tokio::test]
    async fn test_only_leading_duplicate_removed() {
        let store = ScriptedStore::new(vec![vec!["a", "b"], vec!["x", "b", "y"]]);
        let mut pager = Paginator::new(store, ServerFilter::default(), 2);

        pager.next_page().await.unwrap();
        assert_eq!(ids(&pager.next_page().await.unwrap()), vec!["x", "b", "y"]);
        assert_eq!(pager.cursor(), Some("y"));
    }

    #[tokio::test]
    async fn test_exclusive_cursor_store() {
        let store = ScriptedStore::new(vec![vec!["a", "b"], vec!["c"], vec![]]);
        let mut pager = Paginator::new(store, ServerFilter::default(), 2);

        assert_eq!(ids(&pager.next_page().await.unwrap()), vec!["a", "b"]);
        assert_eq!(ids(&pager.next_page().await.unwrap()), vec!["c"]);
        assert!(pager.next_page().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_first_page() {
        let store = ScriptedStore::new(vec![]);
        let mut pager = Paginator::new(store.clone(), ServerFilter::default(), 10);
        assert!(pager.next_page().await.unwrap().is_empty());
        assert!(pager.cursor().is_none());
        assert!(pager.next_page().await.unwrap().is_empty());
        assert_eq!(store.calls().len(), 1);
    }
}
