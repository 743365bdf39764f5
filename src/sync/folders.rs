use crate::error::SyncError;
use crate::imap::pool::PoolIntent;
use crate::imap::MailClient;
use crate::store::entities::account;
use crate::sync::provider::FolderPlan;
use crate::sync::SyncContext;

/// Lists the remote folders and brings the local rows in line before any
/// worker starts. Returns the plan with the worker order.
pub async fn reconcile_account_folders(
    ctx: &SyncContext,
    account: &account::Model,
) -> Result<FolderPlan, SyncError> {
    let pool = ctx.session_pool(account, PoolIntent::Read);
    let mut session = pool.checkout().await?;
    let remote = session.list_folders().await?;

    let plan = ctx.provider.plan_folders(account, &remote)?;
    let delta = ctx
        .store
        .reconcile_folders(account.id, &plan.specs)
        .await?;
    if delta.unchanged() {
        tracing::debug!(account = %account.email, "Folder list unchanged");
    }
    Ok(plan)
}
