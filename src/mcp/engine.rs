//! Invocation engine.
//!
//! Validates an argument payload against a parameter schema, runs the
//! handler as its own task, and folds every failure into an
//! [`InvocationResult`]. Nothing a handler does (error or panic) escapes as
//! a connection-level fault.

use std::future::Future;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::task::JoinError;

use crate::mcp::error::{HandlerError, RegistryError};
use crate::mcp::protocol::{ErrorCode, ErrorObject};
use crate::mcp::registry::Registry;
use crate::mcp::types::{
    Arguments, CallToolResult, GetPromptResult, ParameterSpec, PromptMessage, ReadResourceResult,
    ResourceContents, Role,
};

/// Outcome of one invocation: the handler's value, or the error that goes
/// into the response.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationResult<T = Value> {
    Ok(T),
    Error(ErrorObject),
}

impl<T> InvocationResult<T> {
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Returns the value, discarding an error.
    #[must_use]
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Ok(value) => Some(value),
            Self::Error(_) => None,
        }
    }

    /// Returns the error, if any.
    #[must_use]
    pub const fn error(&self) -> Option<&ErrorObject> {
        match self {
            Self::Ok(_) => None,
            Self::Error(error) => Some(error),
        }
    }

    /// Converts into a standard `Result`.
    ///
    /// # Errors
    ///
    /// Returns the carried `ErrorObject` for the `Error` variant.
    pub fn into_result(self) -> Result<T, ErrorObject> {
        match self {
            Self::Ok(value) => Ok(value),
            Self::Error(error) => Err(error),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> InvocationResult<U> {
        match self {
            Self::Ok(value) => InvocationResult::Ok(f(value)),
            Self::Error(error) => InvocationResult::Error(error),
        }
    }
}

impl<T> From<Result<T, ErrorObject>> for InvocationResult<T> {
    fn from(result: Result<T, ErrorObject>) -> Self {
        match result {
            Ok(value) => Self::Ok(value),
            Err(error) => Self::Error(error),
        }
    }
}

/// Checks an argument payload against a schema.
///
/// `null` means no arguments. Required parameters must be present and
/// non-null; an optional parameter set to `null` counts as absent. Types
/// are matched strictly. Arguments not named in the schema are dropped.
///
/// # Errors
///
/// Returns an `InvalidArguments` error listing every problem found.
pub fn validate_arguments(payload: &Value, schema: &[ParameterSpec]) -> Result<Arguments, ErrorObject> {
    let supplied = match payload {
        Value::Null => Arguments::new(),
        Value::Object(map) => map.clone(),
        other => {
            return Err(ErrorObject::invalid_arguments(format!(
                "arguments must be an object, got {}",
                json_type_name(other)
            )));
        }
    };

    let mut validated = Arguments::new();
    let mut missing = Vec::new();
    let mut mismatched = Vec::new();
    let mut problems = Vec::new();

    for param in schema {
        match supplied.get(&param.name) {
            None | Some(Value::Null) => {
                if param.required {
                    problems.push(format!("missing required parameter '{}'", param.name));
                    missing.push(param.name.clone());
                }
            }
            Some(value) if param.param_type.matches(value) => {
                validated.insert(param.name.clone(), value.clone());
            }
            Some(value) => {
                problems.push(format!(
                    "parameter '{}' must be {}, got {}",
                    param.name,
                    param.param_type,
                    json_type_name(value)
                ));
                mismatched.push(param.name.clone());
            }
        }
    }

    if problems.is_empty() {
        Ok(validated)
    } else {
        Err(ErrorObject::invalid_arguments(problems.join("; "))
            .with_data(json!({ "missing": missing, "mismatched": mismatched })))
    }
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Validates `payload`, then runs `run` on its own task and awaits it.
///
/// The handler is never started when validation fails.
pub async fn invoke<T, F, Fut>(payload: &Value, schema: &[ParameterSpec], run: F) -> InvocationResult<T>
where
    T: Send + 'static,
    F: FnOnce(Arguments) -> Fut,
    Fut: Future<Output = Result<T, HandlerError>> + Send + 'static,
{
    let arguments = match validate_arguments(payload, schema) {
        Ok(arguments) => arguments,
        Err(error) => return InvocationResult::Error(error),
    };

    match tokio::spawn(run(arguments)).await {
        Ok(Ok(value)) => InvocationResult::Ok(value),
        Ok(Err(error)) => InvocationResult::Error(handler_failure(&error)),
        Err(join_error) => InvocationResult::Error(join_failure(&join_error)),
    }
}

fn handler_failure(error: &HandlerError) -> ErrorObject {
    let failure = ErrorObject::with_message(ErrorCode::HandlerFailure, error.message());
    match error.cause() {
        Some(cause) => failure.with_data(json!({ "cause": cause })),
        None => failure,
    }
}

fn join_failure(error: &JoinError) -> ErrorObject {
    if error.is_panic() {
        tracing::error!("Handler panicked");
        ErrorObject::with_message(ErrorCode::HandlerFailure, "handler panicked")
    } else {
        ErrorObject::internal("handler task was cancelled")
    }
}

fn not_found(error: &RegistryError) -> ErrorObject {
    ErrorObject::with_message(ErrorCode::NotFound, error.to_string())
}

/// Runs a tool by name.
pub async fn call_tool(registry: &Registry, name: &str, arguments: &Value) -> InvocationResult<CallToolResult> {
    let resolved = match registry.tools().resolve(name) {
        Ok(resolved) => resolved,
        Err(error) => return InvocationResult::Error(not_found(&error)),
    };
    let handler = Arc::clone(resolved.handler);

    tracing::debug!(tool = %name, "Calling tool");
    invoke(arguments, &resolved.descriptor.parameters, move |args| async move {
        handler.call(args).await
    })
    .await
    .map(CallToolResult::from_value)
}

/// Reads a resource by concrete URI, matching templates when needed.
pub async fn read_resource(registry: &Registry, uri: &str) -> InvocationResult<ReadResourceResult> {
    let resolved = match registry.resources().resolve(uri) {
        Ok(resolved) => resolved,
        Err(error) => return InvocationResult::Error(not_found(&error)),
    };
    let handler = Arc::clone(resolved.handler);
    let mime_type = resolved.descriptor.mime_type.clone();
    let owned_uri = uri.to_string();

    tracing::debug!(uri = %uri, template = %resolved.descriptor.key, "Reading resource");
    let bindings = Value::Object(resolved.bindings);
    invoke(&bindings, &resolved.descriptor.parameters, move |args| async move {
        handler.read(owned_uri, args).await
    })
    .await
    .map(|body| ReadResourceResult {
        contents: vec![ResourceContents::new(uri, mime_type, body)],
    })
}

/// Renders a prompt by name, rejecting any role other than user/assistant.
pub async fn get_prompt(registry: &Registry, name: &str, arguments: &Value) -> InvocationResult<GetPromptResult> {
    let resolved = match registry.prompts().resolve(name) {
        Ok(resolved) => resolved,
        Err(error) => return InvocationResult::Error(not_found(&error)),
    };
    let handler = Arc::clone(resolved.handler);
    let description = Some(resolved.descriptor.description.clone()).filter(|d| !d.is_empty());

    tracing::debug!(prompt = %name, "Rendering prompt");
    let drafts = match invoke(arguments, &resolved.descriptor.parameters, move |args| async move {
        handler.render(args).await
    })
    .await
    {
        InvocationResult::Ok(drafts) => drafts,
        InvocationResult::Error(error) => return InvocationResult::Error(error),
    };

    let mut messages = Vec::with_capacity(drafts.len());
    for (index, draft) in drafts.into_iter().enumerate() {
        match draft.role.parse::<Role>() {
            Ok(role) => messages.push(PromptMessage {
                role,
                content: draft.content,
            }),
            Err(reason) => {
                return InvocationResult::Error(
                    ErrorObject::with_message(
                        ErrorCode::InvalidOutput,
                        format!("prompt '{name}' message {index}: {reason}"),
                    )
                    .with_data(json!({ "role": draft.role })),
                );
            }
        }
    }

    InvocationResult::Ok(GetPromptResult {
        description,
        messages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::types::{Descriptor, MessageDraft, ParamType, ResourceBody};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn add_schema() -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::required("a", ParamType::Number),
            ParameterSpec::required("b", ParamType::Number),
        ]
    }

    #[test]
    fn validation_accepts_matching_arguments() {
        let args = validate_arguments(&json!({"a": 5, "b": 3}), &add_schema()).unwrap();
        assert_eq!(args["a"], 5);
        assert_eq!(args["b"], 3);
    }

    #[test]
    fn validation_reports_missing_parameter() {
        let err = validate_arguments(&json!({"a": 5}), &add_schema()).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArguments);
        assert!(err.message.contains("'b'"));
        assert_eq!(err.data.unwrap()["missing"], json!(["b"]));
    }

    #[test]
    fn validation_is_strict_about_types() {
        let err = validate_arguments(&json!({"a": "5", "b": 3}), &add_schema()).unwrap_err();
        assert!(err.message.contains("must be number, got string"));
        assert_eq!(err.data.unwrap()["mismatched"], json!(["a"]));
    }

    #[test]
    fn validation_reports_every_problem() {
        let err = validate_arguments(&json!({"a": true}), &add_schema()).unwrap_err();
        assert_eq!(err.message.split("; ").count(), 2);
    }

    #[test]
    fn validation_drops_unknown_arguments() {
        let args = validate_arguments(&json!({"a": 1, "b": 2, "c": 3}), &add_schema()).unwrap();
        assert!(!args.contains_key("c"));
    }

    #[test]
    fn validation_treats_null_as_absent() {
        let schema = vec![ParameterSpec::optional("limit", ParamType::Integer)];
        let args = validate_arguments(&json!({"limit": null}), &schema).unwrap();
        assert!(args.is_empty());

        let err = validate_arguments(&json!({"a": null, "b": 1}), &add_schema()).unwrap_err();
        assert_eq!(err.data.unwrap()["missing"], json!(["a"]));
    }

    #[test]
    fn validation_accepts_null_payload() {
        assert!(validate_arguments(&Value::Null, &[]).unwrap().is_empty());
        assert!(validate_arguments(&json!([1, 2]), &[]).is_err());
    }

    #[tokio::test]
    async fn handler_is_not_invoked_on_invalid_arguments() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let result: InvocationResult<Value> = invoke(&json!({"a": 5}), &add_schema(), move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        })
        .await;

        assert_eq!(result.error().map(|e| e.code), Some(ErrorCode::InvalidArguments));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_error_becomes_handler_failure() {
        let result: InvocationResult<Value> = invoke(&Value::Null, &[], |_| async {
            Err(HandlerError::with_source(
                "lookup failed",
                std::io::Error::other("disk gone"),
            ))
        })
        .await;

        let error = result.error().cloned().unwrap();
        assert_eq!(error.code, ErrorCode::HandlerFailure);
        assert_eq!(error.message, "lookup failed");
        assert_eq!(error.data.unwrap()["cause"], "disk gone");
    }

    #[tokio::test]
    async fn handler_panic_is_contained() {
        async fn explode(_arguments: Arguments) -> Result<Value, HandlerError> {
            panic!("boom")
        }

        let result = invoke(&Value::Null, &[], explode).await;
        assert_eq!(result.error().map(|e| e.code), Some(ErrorCode::HandlerFailure));
    }

    async fn add(arguments: Arguments) -> Result<Value, HandlerError> {
        let a = arguments["a"].as_f64().unwrap_or_default();
        let b = arguments["b"].as_f64().unwrap_or_default();
        Ok(json!(a + b))
    }

    async fn system_prompt(_arguments: Arguments) -> Result<Vec<MessageDraft>, HandlerError> {
        Ok(vec![
            MessageDraft::user("hi"),
            MessageDraft::new("system", "you are root"),
        ])
    }

    async fn greeting(_uri: String, bindings: Arguments) -> Result<ResourceBody, HandlerError> {
        let name = bindings["name"].as_str().unwrap_or_default();
        Ok(ResourceBody::text(format!("Welcome to MCP, {name}!")))
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register_tool(
                Descriptor::new("add", "add")
                    .with_parameter(ParameterSpec::required("a", ParamType::Number))
                    .with_parameter(ParameterSpec::required("b", ParamType::Number)),
                add,
            )
            .unwrap();
        registry
            .register_prompt(Descriptor::new("rogue", "Rogue"), system_prompt)
            .unwrap();
        registry
            .register_resource(
                Descriptor::new("mcp://greeting/{name}", "Greeting").with_mime_type("text/plain"),
                greeting,
            )
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn call_tool_adds_numbers() {
        let result = call_tool(&registry(), "add", &json!({"a": 5, "b": 3}))
            .await
            .into_result()
            .unwrap();
        assert_eq!(result.structured_content, json!(8.0));
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let result = call_tool(&registry(), "subtract", &Value::Null).await;
        assert_eq!(result.error().map(|e| e.code), Some(ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn system_role_is_invalid_output() {
        let result = get_prompt(&registry(), "rogue", &Value::Null).await;
        let error = result.error().cloned().unwrap();
        assert_eq!(error.code, ErrorCode::InvalidOutput);
        assert_eq!(error.data.unwrap()["role"], "system");
    }

    #[tokio::test]
    async fn templated_resource_reads_binding() {
        let result = read_resource(&registry(), "mcp://greeting/User")
            .await
            .into_result()
            .unwrap();
        assert_eq!(result.text(), Some("Welcome to MCP, User!"));
        assert_eq!(result.contents[0].uri, "mcp://greeting/User");
        assert_eq!(result.contents[0].mime_type.as_deref(), Some("text/plain"));
    }
}
