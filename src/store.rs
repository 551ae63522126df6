use crate::error::Result;
use crate::models::Message;
use crate::thread::ThreadView;
use async_trait::async_trait;

/// Keyed storage for emails and per-user read markers.
///
/// Emails are addressed by their primary id and grouped by thread id.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn contains(&self, email_id: &str) -> Result<bool>;

    /// All emails of a thread, oldest first. When `user_id` is given each
    /// email carries that user's read marker, otherwise every email is unread.
    async fn thread_messages(&self, thread_id: i64, user_id: Option<i64>) -> Result<Vec<Message>>;

    async fn thread_count(&self, thread_id: i64) -> Result<i64>;

    async fn find_all(&self) -> Result<Vec<Message>>;

    /// Fails with `Conflict` when an email with the same id is already stored.
    async fn add(&self, email: &Message) -> Result<()>;

    /// Raw source of an email. Fails with `NotFound` for an unknown id.
    async fn email_source(&self, email_id: &str) -> Result<String>;

    /// Replaces the rendered content of a stored email.
    async fn update_content(&self, email: &Message) -> Result<()>;

    async fn email_count(&self) -> Result<i64>;

    async fn mark_as_read(&self, email_id: &str, user_id: i64) -> Result<()>;

    async fn mark_as_unread(&self, email_id: &str, user_id: i64) -> Result<()>;

    /// Threaded view of a thread, as seen by `user_id` if given.
    async fn thread_view(&self, thread_id: i64, user_id: Option<i64>) -> Result<ThreadView> {
        let messages = self.thread_messages(thread_id, user_id).await?;
        Ok(ThreadView::assemble(messages))
    }
}
