use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::spawn::SubagentSpawner;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// Compact call signature for the system-prompt tool table,
    /// e.g. `bash(command)`.
    pub signature: String,
    pub parameters: ToolParameters,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            signature: signature.into(),
            parameters: ToolParameters::default(),
        }
    }

    pub fn with_parameters(mut self, parameters: ToolParameters) -> Self {
        self.parameters = parameters;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameters {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(rename = "additionalProperties", default)]
    pub additional_properties: bool,
}

impl Default for ToolParameters {
    fn default() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: BTreeMap::new(),
            required: Vec::new(),
            additional_properties: false,
        }
    }
}

impl ToolParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_property(
        mut self,
        name: impl Into<String>,
        schema: PropertySchema,
        required: bool,
    ) -> Self {
        let name = name.into();
        self.properties.insert(name.clone(), schema);
        if required {
            self.required.push(name);
        }
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<PropertySchema>>,
}

impl PropertySchema {
    pub fn string(description: impl Into<String>) -> Self {
        Self {
            schema_type: "string".to_string(),
            description: Some(description.into()),
            default: None,
            items: None,
        }
    }

    pub fn integer(description: impl Into<String>) -> Self {
        Self {
            schema_type: "integer".to_string(),
            description: Some(description.into()),
            default: None,
            items: None,
        }
    }

    pub fn boolean(description: impl Into<String>) -> Self {
        Self {
            schema_type: "boolean".to_string(),
            description: Some(description.into()),
            default: None,
            items: None,
        }
    }

    pub fn object(description: impl Into<String>) -> Self {
        Self {
            schema_type: "object".to_string(),
            description: Some(description.into()),
            default: None,
            items: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Result of executing a tool.
///
/// Contract: `success` implies `error` is empty, and failure implies
/// `error` is non-empty. Use the constructors to keep it that way.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub success: bool,
    pub output: String,
    pub error: String,
}

impl ToolOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: String::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        let error = if error.is_empty() {
            "unspecified tool error".to_string()
        } else {
            error
        };
        Self {
            success: false,
            output: String::new(),
            error,
        }
    }
}

/// Ambient state handed to every tool execution.
#[derive(Clone)]
pub struct ToolContext {
    pub working_dir: PathBuf,
    pub interrupt: Arc<AtomicBool>,
    pub timeout_ms: u64,
    pub context_base: Option<PathBuf>,
    pub context_id: Option<String>,
    pub subagents: Option<Arc<dyn SubagentSpawner>>,
    /// Nesting depth of the agent loop executing this call; the main loop
    /// runs at depth 0.
    pub spawn_depth: u32,
}

impl ToolContext {
    pub fn new(working_dir: impl Into<PathBuf>, interrupt: Arc<AtomicBool>) -> Self {
        Self {
            working_dir: working_dir.into(),
            interrupt,
            timeout_ms: 120_000,
            context_base: None,
            context_id: None,
            subagents: None,
            spawn_depth: 0,
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Compact call signature shown in the system-prompt tool table.
    fn signature(&self) -> &str;

    fn definition(&self) -> ToolDefinition;

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolOutcome, Error>;
}

/// Process-wide tool catalog.
///
/// Keyed by name in a `BTreeMap` so enumeration order is stable and the
/// system-prompt tool table is deterministic. Registration happens during
/// startup only; the registry is treated as immutable once the main loop
/// begins.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Definitions for every registered tool, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// Definitions restricted to `allowed`; an empty list means all tools.
    pub fn definitions_for(&self, allowed: &[String]) -> Vec<ToolDefinition> {
        if allowed.is_empty() {
            return self.definitions();
        }
        self.tools
            .values()
            .filter(|t| allowed.iter().any(|a| a == t.name()))
            .map(|t| t.definition())
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub async fn execute(
        &self,
        name: &str,
        arguments: Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutcome, Error> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| Error::UnknownTool(name.to_string()))?;
        tool.execute(arguments, ctx).await
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the input back"
        }

        fn signature(&self) -> &str {
            "echo(text)"
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new(self.name(), self.description(), self.signature())
                .with_parameters(
                    ToolParameters::new().add_property(
                        "text",
                        PropertySchema::string("Text to echo"),
                        true,
                    ),
                )
        }

        async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutcome, Error> {
            let text = args["text"].as_str().unwrap_or_default();
            Ok(ToolOutcome::success(text))
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::new("/tmp", Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn test_definitions_sorted_by_name() {
        struct Named(&'static str);

        #[async_trait]
        impl Tool for Named {
            fn name(&self) -> &str {
                self.0
            }
            fn description(&self) -> &str {
                "d"
            }
            fn signature(&self) -> &str {
                "s()"
            }
            fn definition(&self) -> ToolDefinition {
                ToolDefinition::new(self.0, "d", "s()")
            }
            async fn execute(&self, _: Value, _: &ToolContext) -> Result<ToolOutcome, Error> {
                Ok(ToolOutcome::success(""))
            }
        }

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Named("zeta")));
        registry.register(Arc::new(Named("alpha")));
        registry.register(Arc::new(Named("mid")));

        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_definitions_for_whitelist() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        assert_eq!(registry.definitions_for(&[]).len(), 1);
        assert_eq!(
            registry.definitions_for(&["echo".to_string()]).len(),
            1
        );
        assert!(registry
            .definitions_for(&["other".to_string()])
            .is_empty());
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute("missing", Value::Null, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownTool(_)));
    }

    #[tokio::test]
    async fn test_execute_dispatch() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let outcome = registry
            .execute("echo", serde_json::json!({"text": "hi"}), &ctx())
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.output, "hi");
        assert!(outcome.error.is_empty());
    }

    #[test]
    fn test_outcome_contract() {
        let ok = ToolOutcome::success("done");
        assert!(ok.success);
        assert!(ok.error.is_empty());

        let bad = ToolOutcome::failure("");
        assert!(!bad.success);
        assert!(!bad.error.is_empty());
    }
}
