//! Runs the agent loop end to end without network access: an in-process
//! registry with canned tools and a scripted model.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use voice_agent::{
    register_email_prompts, LocalSessionProvider, McpServer, ModelCompletion, PromptNames,
    Registry, Result, ScriptedModel, Tool, VoiceAgent,
};

struct CannedInbox;

#[async_trait]
impl Tool for CannedInbox {
    fn name(&self) -> &str {
        "get_emails"
    }

    fn description(&self) -> &str {
        "Fetch recent emails (canned)"
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": { "days": { "type": "integer", "default": 1 } }
        }))
    }

    async fn call(&self, _input: Value) -> Result<Value> {
        let emails = json!([
            {
                "id": "1",
                "from": "Billing <billing@example.com>",
                "subject": "Invoice #4411 due Friday",
                "date": "Fri, 03 Oct 2025",
                "body": "Your invoice of $120 is due on Friday."
            },
            {
                "id": "2",
                "from": "Sam <sam@example.com>",
                "subject": "Lunch?",
                "date": "Fri, 03 Oct 2025",
                "body": "Free for lunch at noon?"
            }
        ]);
        Ok(Value::String(emails.to_string()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut registry = Registry::new();
    registry.register(CannedInbox);
    register_email_prompts(&mut registry, &PromptNames::default());
    let sessions = LocalSessionProvider::new(Arc::new(McpServer::new(registry)));

    let model = ScriptedModel::new(vec![
        ModelCompletion::tool_call("get_emails", json!({ "days": 0 })),
        ModelCompletion::text(
            "📌 Important\n• Billing: invoice #4411 ($120) is due Friday.\n\n\
             💬 Personal\n• Sam asks about lunch at noon.",
        ),
    ]);

    let agent = VoiceAgent::new(Arc::new(sessions)).with_model(model.clone());
    let outcome = agent.run_agentic_query("summarize today's emails").await?;

    println!("{}", outcome.text);
    println!("\n({} model rounds)", model.request_count());
    Ok(())
}
