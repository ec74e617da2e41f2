//! Mock source provider for tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::{ItemPage, SourceItem, SourceProvider};

/// In-memory source provider serving a fixed item set.
///
/// The upload collection for channel `X` resolves to `uploads:X`; listings
/// return the configured items newest first without paging.
pub struct MockSource {
    items: Mutex<HashMap<String, Vec<SourceItem>>>,
    fail_next: Mutex<Option<Error>>,
}

impl MockSource {
    /// Create an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            fail_next: Mutex::new(None),
        }
    }

    /// Register the items of a channel's upload collection.
    pub fn set_items(&self, channel_external_id: &str, items: Vec<SourceItem>) {
        self.items
            .lock()
            .expect("items lock poisoned")
            .insert(format!("uploads:{channel_external_id}"), items);
    }

    /// Make the next call fail with `err`.
    pub fn fail_next(&self, err: Error) {
        *self.fail_next.lock().expect("fail lock poisoned") = Some(err);
    }

    fn take_failure(&self) -> Result<()> {
        match self.fail_next.lock().expect("fail lock poisoned").take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceProvider for MockSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn resolve_upload_collection(&self, channel_external_id: &str) -> Result<String> {
        self.take_failure()?;
        Ok(format!("uploads:{channel_external_id}"))
    }

    async fn list_recent_items(
        &self,
        upload_collection_id: &str,
        limit: u32,
        _page_token: Option<&str>,
    ) -> Result<ItemPage> {
        self.take_failure()?;
        let items = self.items.lock().expect("items lock poisoned");
        let listing = items
            .get(upload_collection_id)
            .cloned()
            .unwrap_or_default();
        Ok(ItemPage {
            items: listing.into_iter().take(limit as usize).collect(),
            next_page_token: None,
        })
    }

    async fn get_item_details(&self, ids: &[String]) -> Result<Vec<SourceItem>> {
        self.take_failure()?;
        let items = self.items.lock().expect("items lock poisoned");
        let mut details = Vec::new();
        for listing in items.values() {
            for item in listing {
                if ids.contains(&item.id) {
                    details.push(item.clone());
                }
            }
        }
        Ok(details)
    }
}
