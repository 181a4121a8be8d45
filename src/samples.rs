//! The demonstration catalog served by `remote-mcp serve`.
//!
//! - **Resources**: `mcp://hello`, `mcp://greeting/{name}`
//! - **Tools**: `echo`, `add`
//! - **Prompts**: `introduction`

use serde_json::Value;

use crate::mcp::error::{HandlerError, RegistryError};
use crate::mcp::registry::Registry;
use crate::mcp::types::{Arguments, Descriptor, MessageDraft, ParamType, ParameterSpec, ResourceBody};

/// Builds the demonstration registry.
///
/// # Errors
///
/// Returns an error only if a key is registered twice or a template is
/// malformed, which would be a bug in this function.
pub fn sample_registry() -> Result<Registry, RegistryError> {
    let mut registry = Registry::new();

    registry.register_resource(
        Descriptor::new("mcp://hello", "Hello Resource")
            .with_description("Returns a hello message.")
            .with_mime_type("text/plain"),
        hello,
    )?;
    registry.register_resource(
        Descriptor::new("mcp://greeting/{name}", "Personalized Greeting")
            .with_description("Returns a personalized greeting.")
            .with_mime_type("text/plain"),
        greeting,
    )?;

    registry.register_tool(
        Descriptor::new("echo", "echo")
            .with_description("Echoes back the input text.")
            .with_parameter(ParameterSpec::required("text", ParamType::String)),
        echo,
    )?;
    registry.register_tool(
        Descriptor::new("add", "add")
            .with_description("Adds two numbers together.")
            .with_parameter(ParameterSpec::required("a", ParamType::Number))
            .with_parameter(ParameterSpec::required("b", ParamType::Number)),
        add,
    )?;

    registry.register_prompt(
        Descriptor::new("introduction", "introduction")
            .with_description("Creates an introduction message.")
            .with_parameter(ParameterSpec::required("name", ParamType::String))
            .with_parameter(ParameterSpec::required("role", ParamType::String)),
        introduction,
    )?;

    Ok(registry)
}

fn text_arg<'a>(arguments: &'a Arguments, name: &str) -> Result<&'a str, HandlerError> {
    arguments
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| HandlerError::new(format!("'{name}' must be a string")))
}

fn number_arg(arguments: &Arguments, name: &str) -> Result<f64, HandlerError> {
    arguments
        .get(name)
        .and_then(Value::as_f64)
        .ok_or_else(|| HandlerError::new(format!("'{name}' must be a number")))
}

async fn hello(_uri: String, _bindings: Arguments) -> Result<ResourceBody, HandlerError> {
    Ok(ResourceBody::text("Hello from MCP Server!"))
}

async fn greeting(_uri: String, bindings: Arguments) -> Result<ResourceBody, HandlerError> {
    let name = text_arg(&bindings, "name")?;
    Ok(ResourceBody::text(format!("Welcome to MCP, {name}!")))
}

async fn echo(arguments: Arguments) -> Result<Value, HandlerError> {
    let text = text_arg(&arguments, "text")?;
    Ok(Value::String(format!("Echo: {text}")))
}

async fn add(arguments: Arguments) -> Result<Value, HandlerError> {
    let sum = number_arg(&arguments, "a")? + number_arg(&arguments, "b")?;
    serde_json::Number::from_f64(sum)
        .map(Value::Number)
        .ok_or_else(|| HandlerError::new("sum is not a finite number"))
}

async fn introduction(arguments: Arguments) -> Result<Vec<MessageDraft>, HandlerError> {
    let name = text_arg(&arguments, "name")?;
    let role = text_arg(&arguments, "role")?;
    Ok(vec![
        MessageDraft::assistant("You are a helpful assistant."),
        MessageDraft::user(format!("Please introduce yourself to {name} who is a {role}.")),
    ])
}
