// Caller identity lookup; scopes the queue access policy to this account.
use anyhow::{Context, Result};
use tap_cloud::MessagingClient;
use tap_common::ids::AccountId;

/// Resolve the account id of the credentials in use. There is no retry: without
/// an account scope nothing else can be provisioned.
pub async fn resolve(client: &dyn MessagingClient) -> Result<AccountId> {
    let account = client
        .caller_account()
        .await
        .context("resolve caller identity")?;
    tracing::info!(account = %account, backend = client.backend_name(), "using account");
    Ok(account)
}
