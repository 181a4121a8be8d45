//! Payload types for the standard methods.
//!
//! These are the one canonical shape for descriptors, contents and prompt
//! messages. Anything the peer sends is decoded into them at the session
//! boundary; nothing downstream inspects raw JSON shapes.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::mcp::protocol::{RequestId, SERVER_NAME};

/// Arguments passed to a handler, keyed by parameter name.
pub type Arguments = Map<String, Value>;

/// The value type a parameter accepts. Matching is strict: a numeric
/// string is not a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    /// Returns `true` if `value` is of this type.
    #[must_use]
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }

    /// Returns the JSON Schema type name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a parameter schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Parameter name.
    pub name: String,
    /// Accepted value type.
    #[serde(rename = "type")]
    pub param_type: ParamType,
    /// Whether the parameter must be present.
    #[serde(default)]
    pub required: bool,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParameterSpec {
    #[must_use]
    pub fn required(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: true,
            description: None,
        }
    }

    #[must_use]
    pub fn optional(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: false,
            description: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Describes one resource, tool or prompt.
///
/// Built once at startup when the entry is registered and never mutated
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Catalog key: a URI (or URI template) for resources, a name otherwise.
    pub key: String,
    /// Human-readable name.
    pub display_name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Ordered parameter schema.
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    /// MIME type of a resource's contents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl Descriptor {
    #[must_use]
    pub fn new(key: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            display_name: display_name.into(),
            description: String::new(),
            parameters: Vec::new(),
            mime_type: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_parameter(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Renders the parameter schema as a JSON Schema object.
    #[must_use]
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.parameters {
            let mut property = Map::new();
            property.insert("type".to_string(), Value::from(param.param_type.as_str()));
            if let Some(description) = &param.description {
                property.insert("description".to_string(), Value::from(description.as_str()));
            }
            properties.insert(param.name.clone(), Value::Object(property));
        }

        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// A tool descriptor as listed by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolListing {
    #[serde(flatten)]
    pub descriptor: Descriptor,
    /// JSON Schema for the tool's input parameters.
    #[serde(default)]
    pub input_schema: Value,
}

impl From<&Descriptor> for ToolListing {
    fn from(descriptor: &Descriptor) -> Self {
        Self {
            descriptor: descriptor.clone(),
            input_schema: descriptor.input_schema(),
        }
    }
}

/// Per-family capability flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyCapability {
    /// Whether the catalog can change during the session.
    #[serde(default)]
    pub list_changed: bool,
}

/// Capability manifest exchanged during initialisation.
///
/// The client sends the families it intends to use; the server answers with
/// the families it offers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<FamilyCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<FamilyCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<FamilyCapability>,
}

impl Capabilities {
    /// All three families, static catalogs.
    #[must_use]
    pub fn all() -> Self {
        Self {
            resources: Some(FamilyCapability::default()),
            tools: Some(FamilyCapability::default()),
            prompts: Some(FamilyCapability::default()),
        }
    }
}

/// Client information sent during initialisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    #[serde(default)]
    pub version: Option<String>,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: format!("{SERVER_NAME}-client"),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }
    }
}

/// Server information for the initialisation response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Parameters for the initialize request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version requested by the client.
    pub protocol_version: String,
    /// Capability subset the client wants.
    #[serde(default)]
    pub capabilities: Capabilities,
    /// Client information.
    pub client_info: ClientInfo,
}

/// Result of the initialize request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol version the server settled on.
    pub protocol_version: String,
    /// Capabilities the server offers.
    #[serde(default)]
    pub capabilities: Capabilities,
    /// Server information.
    pub server_info: ServerInfo,
    /// Usage hints for the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Parameters for `notifications/cancelled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledParams {
    /// The request the client stopped waiting for.
    pub request_id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Result of `resources/list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResourcesResult {
    pub resources: Vec<Descriptor>,
}

/// Result of `resources/templates/list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResourceTemplatesResult {
    pub resource_templates: Vec<Descriptor>,
}

/// Result of `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<ToolListing>,
}

/// Result of `prompts/list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListPromptsResult {
    pub prompts: Vec<Descriptor>,
}

/// Parameters for `resources/read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadResourceParams {
    pub uri: String,
}

/// What a resource handler produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceBody {
    Text(String),
    Blob(Vec<u8>),
}

impl ResourceBody {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }
}

/// One item of a `resources/read` result. Exactly one of `text` and `blob`
/// (base64) is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    /// The concrete URI that was read.
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

impl ResourceContents {
    /// Builds wire contents from a handler's body.
    #[must_use]
    pub fn new(uri: impl Into<String>, mime_type: Option<String>, body: ResourceBody) -> Self {
        let (text, blob) = match body {
            ResourceBody::Text(text) => (Some(text), None),
            ResourceBody::Blob(bytes) => (None, Some(BASE64_STANDARD.encode(bytes))),
        };
        Self {
            uri: uri.into(),
            mime_type,
            text,
            blob,
        }
    }

    /// Decodes the binary payload, if this item carries one.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob is not valid base64.
    pub fn decode_blob(&self) -> Option<Result<Vec<u8>, base64::DecodeError>> {
        self.blob.as_ref().map(|b| BASE64_STANDARD.decode(b))
    }
}

/// Result of `resources/read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadResourceResult {
    pub contents: Vec<ResourceContents>,
}

impl ReadResourceResult {
    /// Returns the first textual item.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.contents.iter().find_map(|c| c.text.as_deref())
    }
}

/// Parameters for `tools/call`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolParams {
    /// Name of the tool to call.
    pub name: String,
    /// Arguments for the tool.
    #[serde(default)]
    pub arguments: Value,
}

/// A content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
}

impl Content {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Returns the text of a text item.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
        }
    }
}

/// Result of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    /// Human-readable rendering of the result.
    #[serde(default)]
    pub content: Vec<Content>,
    /// The value the tool returned.
    #[serde(default)]
    pub structured_content: Value,
}

impl CallToolResult {
    /// Wraps a handler's value, rendering strings verbatim and anything else
    /// as compact JSON.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        let text = match &value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self {
            content: vec![Content::text(text)],
            structured_content: value,
        }
    }
}

/// Parameters for `prompts/get`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetPromptParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// The roles a prompt message may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(format!("unsupported role '{other}'")),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        })
    }
}

/// A validated prompt message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: Content,
}

/// A message as produced by a prompt handler, before role validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    pub role: String,
    pub content: Content,
}

impl MessageDraft {
    #[must_use]
    pub fn new(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Content::text(text),
        }
    }

    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new("user", text)
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new("assistant", text)
    }
}

/// Result of `prompts/get`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetPromptResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub messages: Vec<PromptMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_types_are_strict() {
        assert!(ParamType::Number.matches(&json!(5)));
        assert!(ParamType::Number.matches(&json!(5.5)));
        assert!(!ParamType::Number.matches(&json!("5")));
        assert!(ParamType::Integer.matches(&json!(-3)));
        assert!(!ParamType::Integer.matches(&json!(3.5)));
        assert!(!ParamType::String.matches(&json!(null)));
        assert!(ParamType::Boolean.matches(&json!(false)));
    }

    #[test]
    fn input_schema_lists_required_parameters() {
        let descriptor = Descriptor::new("add", "Add")
            .with_parameter(ParameterSpec::required("a", ParamType::Number))
            .with_parameter(
                ParameterSpec::optional("precision", ParamType::Integer)
                    .with_description("Digits after the point"),
            );

        let schema = descriptor.input_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["a"]["type"], "number");
        assert_eq!(
            schema["properties"]["precision"]["description"],
            "Digits after the point"
        );
        assert_eq!(schema["required"], json!(["a"]));
    }

    #[test]
    fn descriptor_wire_shape() {
        let descriptor = Descriptor::new("mcp://hello", "Hello Resource")
            .with_description("Returns a hello message.")
            .with_mime_type("text/plain");
        let value = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(value["key"], "mcp://hello");
        assert_eq!(value["displayName"], "Hello Resource");
        assert_eq!(value["mimeType"], "text/plain");
        assert_eq!(value["parameters"], json!([]));
    }

    #[test]
    fn tool_listing_flattens_descriptor() {
        let descriptor = Descriptor::new("echo", "echo")
            .with_parameter(ParameterSpec::required("text", ParamType::String));
        let value = serde_json::to_value(ToolListing::from(&descriptor)).unwrap();
        assert_eq!(value["key"], "echo");
        assert_eq!(value["inputSchema"]["required"], json!(["text"]));

        let back: ToolListing = serde_json::from_value(value).unwrap();
        assert_eq!(back.descriptor, descriptor);
    }

    #[test]
    fn role_rejects_unknown_values() {
        assert_eq!("user".parse::<Role>(), Ok(Role::User));
        assert!("system".parse::<Role>().is_err());
        assert!(serde_json::from_value::<Role>(json!("system")).is_err());
    }

    #[test]
    fn blob_contents_are_base64() {
        let contents = ResourceContents::new(
            "mcp://logo",
            Some("image/png".to_string()),
            ResourceBody::Blob(vec![0x89, 0x50, 0x4e, 0x47]),
        );
        assert!(contents.text.is_none());
        assert_eq!(contents.blob.as_deref(), Some("iVBORw=="));
        assert_eq!(
            contents.decode_blob().unwrap().unwrap(),
            vec![0x89, 0x50, 0x4e, 0x47]
        );
    }

    #[test]
    fn tool_result_renders_text() {
        let result = CallToolResult::from_value(json!(8.0));
        assert_eq!(result.content[0].as_text(), Some("8.0"));

        let result = CallToolResult::from_value(json!("Echo: hi"));
        assert_eq!(result.content[0].as_text(), Some("Echo: hi"));
    }
}
