//! Remote message store abstraction and the cursor-based paginator over it.
//!
//! A [`MessageStore`] lists message metadata in pages and fetches individual
//! messages on demand. [`DumpStore`] is the in-tree implementation backed by a
//! JSON mailbox dump; network clients plug in behind the same trait.

pub mod dump;
pub mod paginator;

use async_trait::async_trait;

use crate::error::Result;
use crate::filter::ServerFilter;
use crate::model::message::{FullMessage, MessageMetadata};

pub use dump::DumpStore;
pub use paginator::Paginator;

/// A remote mailbox that can be listed page by page.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Return up to `page_size` messages accepted by `filter`, ordered by the
    /// filter's direction.
    ///
    /// `cursor` is the id of the last message of the previous page. A store
    /// may include that message again at the start of the returned page.
    async fn fetch_page(
        &self,
        cursor: Option<&str>,
        page_size: usize,
        filter: &ServerFilter,
    ) -> Result<Vec<MessageMetadata>>;

    /// Fetch one message with its body and attachments.
    async fn fetch_message(&self, id: &str) -> Result<FullMessage>;
}
