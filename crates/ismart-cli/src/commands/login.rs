//! Login command - sign in and show the session

use anyhow::Result;
use ismart_client::IsmartClient;

use crate::output::OutputContext;

/// Sign in and print the token expiration
pub async fn login(client: &IsmartClient, ctx: &OutputContext) -> Result<()> {
    let login = client.login().await?;

    ctx.success("Logged in");
    let mut pairs = vec![("account", login.account.clone().unwrap_or_default())];
    if let Some(expires_at) = client.token_expiration() {
        pairs.push(("expires_at", expires_at.to_rfc3339()));
    }
    if !ctx.quiet {
        ctx.print_kv(&pairs);
    }
    Ok(())
}
