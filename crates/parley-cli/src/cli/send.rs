// ABOUTME: Send command implementation for CLI scripting.
// ABOUTME: Sends one message and streams the reply to stdout as it arrives.

use anyhow::{Context, Result};
use parley_chat::{MessagePart, Outcome};
use std::sync::Arc;

use super::StdoutObserver;
use crate::config::Config;

pub async fn run(config: &Config, message: &str) -> Result<()> {
    let session = config.session()?;
    session.set_observer(Arc::new(StdoutObserver));

    tracing::debug!(model = %config.provider.model, "Sending message");
    let outcome = session
        .send(vec![MessagePart::text(message)])
        .await
        .context("Failed to send message")?;
    println!();

    match outcome {
        Outcome::Completed | Outcome::Stopped => Ok(()),
        Outcome::Failed(reason) => anyhow::bail!("Generation failed: {reason}"),
    }
}
