//! Gateway protocol types
//!
//! Typed payloads for the named gateway operations. The transport layer
//! stays on `serde_json::Value`; helpers decode into these on demand.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::ThinkingLevel;

// ============================================================================
// Status
// ============================================================================

/// Gateway status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatus {
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub port: u16,
    /// Active session count
    #[serde(default)]
    pub sessions: u32,
    /// Uptime in seconds
    #[serde(default)]
    pub uptime: u64,
    pub version: Option<String>,
}

// ============================================================================
// Sessions
// ============================================================================

/// Channel a session is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionChannel {
    Whatsapp,
    Telegram,
    Slack,
    Discord,
    Webchat,
    Signal,
    Imessage,
    Teams,
    Main,
}

/// Session activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Idle,
    Paused,
}

/// Agent session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub channel: SessionChannel,
    pub status: SessionStatus,
    pub model: Option<String>,
    pub thinking_level: Option<ThinkingLevel>,
    pub created_at: String,
    pub last_activity: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Options for `sessions.send`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_back: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub announce: Option<bool>,
}

// ============================================================================
// Agent messages
// ============================================================================

/// Message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Agent message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: String,
    pub session_id: Option<String>,
    pub thinking_level: Option<ThinkingLevel>,
    pub model: Option<String>,
    pub usage: Option<UsageStats>,
}

/// Usage statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Per-message overrides for `agent.message` / `agent.stream`
#[derive(Debug, Clone, Default)]
pub struct MessageOptions {
    pub thinking_level: Option<ThinkingLevel>,
    pub model: Option<String>,
    pub session_id: Option<String>,
}

/// Result of `agent.collaborate`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collaboration {
    pub session_id: String,
    pub response: AgentMessage,
}

// ============================================================================
// Skills
// ============================================================================

/// Where a skill comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillSource {
    Bundled,
    Managed,
    Workspace,
}

/// Skill descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Skill {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "type")]
    pub source: SkillSource,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub version: Option<String>,
}

/// Request body for `skills.execute`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillExecutionRequest {
    pub skill_name: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<CodeContext>,
}

impl SkillExecutionRequest {
    /// Request with no parameters
    pub fn new(skill_name: impl Into<String>) -> Self {
        SkillExecutionRequest {
            skill_name: skill_name.into(),
            params: serde_json::Map::new(),
            session_id: None,
            context: None,
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Attach a code context
    pub fn with_context(mut self, context: CodeContext) -> Self {
        self.context = Some(context);
        self
    }
}

/// Skill execution outcome
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillExecutionResult {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    /// Duration in milliseconds
    pub duration: Option<u64>,
    #[serde(default)]
    pub artifacts: Vec<SkillArtifact>,
}

/// Artifact kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Code,
    File,
    Image,
    Data,
}

/// Artifact produced by a skill
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillArtifact {
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
    pub name: String,
    pub content: String,
    pub language: Option<String>,
}

/// Skill parameter description
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

/// Result of `skills.info`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub parameters: Vec<SkillParameter>,
    #[serde(default)]
    pub examples: Vec<String>,
}

/// Code under discussion, passed to code skills
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_root: Option<String>,
}

/// Selected range in a file
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Selection {
    pub start: Position,
    pub end: Position,
}

/// Line/column position
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

// ============================================================================
// Nodes
// ============================================================================

/// Device platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodePlatform {
    Macos,
    Ios,
    Android,
    Linux,
    Windows,
}

/// Node availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Offline,
    Busy,
}

/// Device node exposing capabilities such as `system.run` or `camera.snap`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub platform: NodePlatform,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub status: NodeStatus,
    #[serde(default)]
    pub permissions: HashMap<String, bool>,
}

// ============================================================================
// Browser
// ============================================================================

/// Browser action
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BrowserAction {
    Navigate { url: String },
    Click { selector: String },
    Type { selector: String, text: String },
    Screenshot,
    Scroll {
        #[serde(skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
    },
    Wait { duration: u64 },
}

/// Browser page snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserSnapshot {
    pub url: String,
    #[serde(default)]
    pub title: String,
    pub screenshot: Option<String>,
    pub html: Option<String>,
    pub timestamp: String,
}

// ============================================================================
// Canvas
// ============================================================================

/// Canvas element kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanvasElementKind {
    Text,
    Code,
    Image,
    Shape,
    Connection,
}

/// Element placed on a canvas
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasElement {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: CanvasElementKind,
    pub position: Point,
    pub size: Size,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub style: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

// ============================================================================
// Events
// ============================================================================

/// Event names
pub mod events {
    /// Link opened
    pub const CONNECTED: &str = "connected";
    /// Link closed or lost
    pub const DISCONNECTED: &str = "disconnected";
    /// Transport or connect failure
    pub const ERROR: &str = "error";
    /// Streaming chunk for `agent.stream`
    pub const AGENT_STREAM_CHUNK: &str = "agent.stream.chunk";
    /// Cancellation notice suffix for streams
    pub const CANCEL_SUFFIX: &str = ".cancel";
}
