use crate::error::Result;
use crate::model::*;
use uuid::Uuid;

/// Abstract storage backend. SQLite is the shipped implementation; the pipeline
/// and services are generic over this trait so tests can substitute their own.
///
/// Every method is a single atomic operation at the store level. Credit
/// mutations are in-store increments/decrements, never read-modify-write.
pub trait StorageBackend: Send + Sync {
    // -- Users & sessions --

    fn save_user(&self, user: &User) -> impl std::future::Future<Output = Result<()>> + Send;

    fn get_user(&self, id: &str) -> impl std::future::Future<Output = Result<User>> + Send;

    /// Atomically subtract `amount` if the balance covers it. Returns the new
    /// balance, or `InsufficientCredits` without touching the row. When
    /// `count_creation` is set the user's `totalCreation` is bumped in the same
    /// statement.
    fn debit_credits(
        &self,
        user_id: &str,
        amount: i64,
        count_creation: bool,
    ) -> impl std::future::Future<Output = Result<i64>> + Send;

    /// Atomically add `amount` to the balance. Returns the new balance.
    fn add_credits(
        &self,
        user_id: &str,
        amount: i64,
    ) -> impl std::future::Future<Output = Result<i64>> + Send;

    fn save_session(&self, session: &Session)
        -> impl std::future::Future<Output = Result<()>> + Send;

    /// Resolve a session token to a user id. Expired or unknown tokens yield `None`.
    fn resolve_session(
        &self,
        token: &str,
    ) -> impl std::future::Future<Output = Result<Option<String>>> + Send;

    // -- Projects --

    fn create_project(
        &self,
        project: &Project,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    fn get_project(&self, id: Uuid) -> impl std::future::Future<Output = Result<Project>> + Send;

    /// A user's projects, most recently updated first.
    fn list_projects(
        &self,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Project>>> + Send;

    /// Published projects that have code, most recently updated first.
    fn list_published(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<PublishedProject>>> + Send;

    /// Replace the current snapshot. `version_index` is a version id or `""`.
    fn set_current_code(
        &self,
        project_id: Uuid,
        code: &str,
        version_index: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Flip the published flag of a project owned by `user_id` in one update.
    /// Returns the new state; `NotFound` when no owned project matches.
    fn toggle_published(
        &self,
        project_id: Uuid,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Delete a project together with its versions and conversation.
    fn delete_project(&self, id: Uuid) -> impl std::future::Future<Output = Result<()>> + Send;

    // -- Versions --

    /// Insert a version and point its project at it, in one store transaction.
    fn commit_version(
        &self,
        version: &Version,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Versions of a project, oldest first.
    fn list_versions(
        &self,
        project_id: Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Version>>> + Send;

    fn get_version(&self, id: Uuid) -> impl std::future::Future<Output = Result<Version>> + Send;

    // -- Conversation --

    fn append_message(
        &self,
        message: &Message,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Conversation of a project, oldest first.
    fn list_messages(
        &self,
        project_id: Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Message>>> + Send;

    // -- Transactions --

    fn save_transaction(
        &self,
        transaction: &Transaction,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    fn get_transaction(
        &self,
        id: Uuid,
    ) -> impl std::future::Future<Output = Result<Transaction>> + Send;

    /// Mark a transaction paid and credit its user, once. Returns `None` when
    /// the transaction was already paid (a redelivered confirmation).
    fn settle_transaction(
        &self,
        id: Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Transaction>>> + Send;

    // -- Health --

    fn ping(&self) -> impl std::future::Future<Output = Result<()>> + Send;
}
