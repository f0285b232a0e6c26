//! Core Agent trait definition

use crate::{Context, Result};
use async_trait::async_trait;

/// An external, text-producing collaborator
///
/// Information agents and opinion agents both sit behind this trait: they
/// receive a plain-text request (usually carrying serialized JSON) and answer
/// with free text. Nothing about the reply is trusted; callers parse and
/// validate whatever comes back.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Process input and return the agent's raw reply
    async fn process(&self, input: String, context: &mut Context) -> Result<String>;

    /// Get the agent's name
    fn name(&self) -> &str;
}
