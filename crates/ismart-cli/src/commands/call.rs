//! Call command - run a raw authenticated API call

use anyhow::{bail, Context, Result};
use ismart_client::{ApiCall, IsmartClient, Method};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::output::OutputContext;

/// Arguments of the `call` command
#[derive(Debug, Clone)]
pub struct CallArgs {
    pub method: String,
    pub path: String,
    pub body: Option<String>,
    pub query: Vec<String>,
    pub headers: Vec<String>,
    pub poll: bool,
}

/// Log in, run the call and print its `data` payload
pub async fn call(
    client: &IsmartClient,
    args: &CallArgs,
    cancel: &CancellationToken,
    ctx: &OutputContext,
) -> Result<()> {
    let call = build_call(args)?;

    client.login().await.context("Login failed")?;

    let payload = if args.poll {
        client
            .execute_with_event_id_cancellable::<Value>(call, cancel)
            .await
    } else {
        client.execute::<Value>(call).await
    };

    match payload {
        Ok(payload) => {
            ctx.print(&payload);
            Ok(())
        }
        Err(e) if e.is_retryable_by_caller() => {
            ctx.warn("Session expired and was renewed, run the command again");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

fn build_call(args: &CallArgs) -> Result<ApiCall> {
    let method: Method = args
        .method
        .to_uppercase()
        .parse()
        .with_context(|| format!("Invalid HTTP method: {}", args.method))?;

    let mut call = ApiCall::new(method, args.path.clone());

    if let Some(body) = &args.body {
        let body: Value = serde_json::from_str(body).context("Invalid JSON body")?;
        call = call.json(&body)?;
    }
    for pair in &args.query {
        let (key, value) = parse_key_value(pair)?;
        call = call.query(key, value);
    }
    for pair in &args.headers {
        let (name, value) = parse_key_value(pair)?;
        call = call.header(name, value);
    }

    Ok(call)
}

/// Split a `key=value` argument
fn parse_key_value(pair: &str) -> Result<(&str, &str)> {
    match pair.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => bail!("Expected key=value, got '{}'", pair),
    }
}
