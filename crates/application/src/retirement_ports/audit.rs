use async_trait::async_trait;
use sunset_core::AppResult;
use sunset_domain::AuditEntry;

/// Append-only audit log port.
///
/// Implementations commit every entry on their own, independent of any open
/// dataset transaction.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Appends one entry.
    async fn append_entry(&self, entry: AuditEntry) -> AppResult<()>;
}
