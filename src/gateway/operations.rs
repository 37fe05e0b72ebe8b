//! Named gateway operations
//!
//! Typed wrappers over [`GatewayClient::request`]. Skill, browser and canvas
//! helpers check their feature toggle first and fail with
//! [`Error::Disabled`] without touching the connection.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use super::client::GatewayClient;
use super::protocol::*;
use super::stream::{StreamCallbacks, StreamHandle};
use crate::error::{Error, Result};

/// Code skills and their gateway skill names
pub mod code_skills {
    pub const REVIEW: &str = "bloop-code-review";
    pub const TEST_GEN: &str = "bloop-test-gen";
    pub const DOCS: &str = "bloop-docs";
    pub const REFACTOR: &str = "bloop-refactor";
    pub const DEBUG: &str = "bloop-debug";
    pub const OPTIMIZE: &str = "bloop-optimize";
    pub const SECURITY: &str = "bloop-security";
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScreenshotReply {
    screenshot: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CanvasReply {
    canvas_id: String,
}

impl GatewayClient {
    fn require(&self, enabled: bool, feature: &str) -> Result<()> {
        if enabled {
            Ok(())
        } else {
            Err(Error::Disabled(feature.to_string()))
        }
    }

    fn require_skills(&self) -> Result<()> {
        self.require(self.config().skills.enabled, "skills")
    }

    fn require_browser(&self) -> Result<()> {
        self.require(self.config().browser.enabled, "browser")
    }

    fn require_canvas(&self) -> Result<()> {
        self.require(self.config().canvas.enabled, "canvas")
    }

    fn message_payload(&self, message: &str, options: &MessageOptions) -> Value {
        let config = self.config();
        let mut payload = json!({
            "message": message,
            "thinkingLevel": options.thinking_level.unwrap_or(config.default_thinking_level),
        });
        if let Some(model) = options.model.as_ref().or(config.default_model.as_ref()) {
            payload["model"] = json!(model);
        }
        if let Some(session_id) = &options.session_id {
            payload["sessionId"] = json!(session_id);
        }
        payload
    }

    // ------------------------------------------------------------------
    // Status & sessions
    // ------------------------------------------------------------------

    /// Gateway status.
    ///
    /// Never fails: returns a disconnected snapshot when there is no
    /// connection, and a bare connected snapshot if the status request
    /// itself fails.
    pub async fn status(&self) -> GatewayStatus {
        let gateway = self.config().gateway;
        let fallback = |connected: bool| GatewayStatus {
            connected,
            url: gateway.url.clone(),
            port: gateway.port(),
            sessions: 0,
            uptime: 0,
            version: None,
        };

        if !self.is_connected() {
            return fallback(false);
        }
        match self.request_as::<GatewayStatus>("status", None).await {
            Ok(mut status) => {
                status.connected = true;
                status.url = gateway.url.clone();
                if status.port == 0 {
                    status.port = gateway.port();
                }
                status
            }
            Err(e) => {
                warn!("Status request failed: {}", e);
                fallback(true)
            }
        }
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        self.request_as("sessions.list", None).await
    }

    pub async fn session_history(&self, session_id: &str) -> Result<Vec<AgentMessage>> {
        self.request_as("sessions.history", json!({ "sessionId": session_id }))
            .await
    }

    /// Post a message into another session
    pub async fn send_to_session(
        &self,
        session_id: &str,
        message: &str,
        options: SendOptions,
    ) -> Result<AgentMessage> {
        let mut payload = json!({ "sessionId": session_id, "message": message });
        if let Some(reply_back) = options.reply_back {
            payload["replyBack"] = json!(reply_back);
        }
        if let Some(announce) = options.announce {
            payload["announce"] = json!(announce);
        }
        self.request_as("sessions.send", payload).await
    }

    // ------------------------------------------------------------------
    // Agent
    // ------------------------------------------------------------------

    /// Send a message to the agent. Thinking level and model fall back to
    /// the configured defaults.
    pub async fn send_message(&self, message: &str, options: MessageOptions) -> Result<AgentMessage> {
        let payload = self.message_payload(message, &options);
        self.request_as("agent.message", payload).await
    }

    /// Stream an agent reply. Chunks are text fragments; completion
    /// carries the final message.
    pub async fn stream_message(
        &self,
        message: &str,
        options: MessageOptions,
        callbacks: StreamCallbacks,
    ) -> Result<StreamHandle> {
        let payload = self.message_payload(message, &options);
        self.stream_request("agent.stream", payload, callbacks).await
    }

    /// Hand a task to another agent
    pub async fn collaborate_with(&self, agent_id: &str, task: &str) -> Result<Collaboration> {
        self.request_as("agent.collaborate", json!({ "agentId": agent_id, "task": task }))
            .await
    }

    // ------------------------------------------------------------------
    // Skills
    // ------------------------------------------------------------------

    pub async fn list_skills(&self) -> Result<Vec<Skill>> {
        self.require_skills()?;
        self.request_as("skills.list", None).await
    }

    pub async fn execute_skill(&self, request: SkillExecutionRequest) -> Result<SkillExecutionResult> {
        self.require_skills()?;
        self.request_as("skills.execute", serde_json::to_value(&request)?)
            .await
    }

    /// Run several skills in one round trip; results are in request order
    pub async fn execute_batch(
        &self,
        skills: Vec<SkillExecutionRequest>,
    ) -> Result<Vec<SkillExecutionResult>> {
        self.require_skills()?;
        if skills.is_empty() {
            return Ok(Vec::new());
        }
        self.request_as("skills.batch", json!({ "skills": skills }))
            .await
    }

    pub async fn skill_info(&self, skill_name: &str) -> Result<SkillInfo> {
        self.require_skills()?;
        self.request_as("skills.info", json!({ "skillName": skill_name }))
            .await
    }

    /// Install a skill from its SKILL.md source
    pub async fn install_skill(&self, skill_md: &str, name: &str) -> Result<()> {
        self.require_skills()?;
        self.request("skills.install", json!({ "skillMd": skill_md, "name": name }))
            .await?;
        Ok(())
    }

    async fn run_code_skill(
        &self,
        skill: &str,
        context: CodeContext,
        params: serde_json::Map<String, Value>,
    ) -> Result<SkillExecutionResult> {
        let mut request = SkillExecutionRequest::new(skill).with_context(context);
        request.params = params;
        self.execute_skill(request).await
    }

    pub async fn review_code(&self, context: CodeContext) -> Result<SkillExecutionResult> {
        self.run_code_skill(code_skills::REVIEW, context, Default::default())
            .await
    }

    pub async fn generate_tests(&self, context: CodeContext) -> Result<SkillExecutionResult> {
        self.run_code_skill(code_skills::TEST_GEN, context, Default::default())
            .await
    }

    pub async fn generate_docs(&self, context: CodeContext) -> Result<SkillExecutionResult> {
        self.run_code_skill(code_skills::DOCS, context, Default::default())
            .await
    }

    pub async fn refactor_code(
        &self,
        context: CodeContext,
        suggestions: Option<Vec<String>>,
    ) -> Result<SkillExecutionResult> {
        let mut params = serde_json::Map::new();
        if let Some(suggestions) = suggestions {
            params.insert("suggestions".into(), json!(suggestions));
        }
        self.run_code_skill(code_skills::REFACTOR, context, params).await
    }

    pub async fn debug_code(
        &self,
        context: CodeContext,
        error: Option<&str>,
    ) -> Result<SkillExecutionResult> {
        let mut params = serde_json::Map::new();
        if let Some(error) = error {
            params.insert("error".into(), json!(error));
        }
        self.run_code_skill(code_skills::DEBUG, context, params).await
    }

    pub async fn optimize_code(&self, context: CodeContext) -> Result<SkillExecutionResult> {
        self.run_code_skill(code_skills::OPTIMIZE, context, Default::default())
            .await
    }

    pub async fn scan_security(&self, context: CodeContext) -> Result<SkillExecutionResult> {
        self.run_code_skill(code_skills::SECURITY, context, Default::default())
            .await
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    pub async fn list_nodes(&self) -> Result<Vec<Node>> {
        self.request_as("nodes.list", None).await
    }

    /// Invoke a capability (e.g. `camera.snap`) on a device node
    pub async fn invoke_node(
        &self,
        node_id: &str,
        capability: &str,
        params: Option<Value>,
    ) -> Result<Value> {
        let mut payload = json!({ "nodeId": node_id, "capability": capability });
        if let Some(params) = params {
            payload["params"] = params;
        }
        self.request("node.invoke", payload).await
    }

    // ------------------------------------------------------------------
    // Browser
    // ------------------------------------------------------------------

    pub async fn browser_navigate(&self, url: &str) -> Result<BrowserSnapshot> {
        self.require_browser()?;
        self.request_as("browser.navigate", json!({ "url": url }))
            .await
    }

    pub async fn browser_action(&self, action: BrowserAction) -> Result<BrowserSnapshot> {
        self.require_browser()?;
        self.request_as("browser.action", serde_json::to_value(&action)?)
            .await
    }

    /// Screenshot of the current page, base64-encoded
    pub async fn browser_screenshot(&self) -> Result<String> {
        self.require_browser()?;
        let reply: ScreenshotReply = self.request_as("browser.screenshot", None).await?;
        Ok(reply.screenshot)
    }

    // ------------------------------------------------------------------
    // Canvas
    // ------------------------------------------------------------------

    /// Create a canvas and return its id
    pub async fn create_canvas(&self) -> Result<String> {
        self.require_canvas()?;
        let reply: CanvasReply = self.request_as("canvas.create", None).await?;
        Ok(reply.canvas_id)
    }

    pub async fn update_canvas(&self, canvas_id: &str, elements: &[CanvasElement]) -> Result<()> {
        self.require_canvas()?;
        self.request(
            "canvas.update",
            json!({ "canvasId": canvas_id, "elements": elements }),
        )
        .await?;
        Ok(())
    }
}
