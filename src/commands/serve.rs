use anyhow::Result;
use tracing::info;

use crate::api;
use crate::context::Context;

pub async fn execute(ctx: Context, listen: Option<String>) -> Result<()> {
    let listen = listen.unwrap_or_else(|| ctx.config.listen.clone());
    info!("🚀 Starting carrier API (domain: {})", ctx.config.domain);
    api::serve(ctx, &listen).await
}
