//! Agent definition documents.
//!
//! A definition is a markdown document whose first line is `---`, followed
//! by a simple `key: value` front-matter block terminated by `---`, followed
//! by the free-form instruction body.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use la_core::{Error, Result};

/// Agent names: lowercase alphanumeric segments joined by single hyphens.
static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[a-z0-9]+(-[a-z0-9]+)*$").expect("valid pattern"));

const NAME_MAX_LEN: usize = 64;
const DEFAULT_MAX_ITERATIONS: u32 = 50;
/// Per-definition iteration clamp; subagents never run longer than this.
const MAX_ITERATIONS_CLAMP: u32 = 100;

#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub name: String,
    pub description: String,
    /// Free-form instruction body below the front matter.
    pub instructions: String,
    pub allowed_tools: Vec<String>,
    pub max_iterations: u32,
    /// Unrecognized front-matter keys.
    pub metadata: HashMap<String, String>,
    /// Definition file, when discovered on disk.
    pub path: Option<PathBuf>,
    /// Directory containing the definition file.
    pub agent_dir: Option<PathBuf>,
}

impl AgentDefinition {
    /// Parse a front-matter document into a definition.
    ///
    /// Rejects documents without the leading `---`, without a terminated
    /// front-matter block, or without a valid name and description.
    pub fn parse(document: &str) -> Result<Self> {
        let mut lines = document.lines();

        if lines.next().map(str::trim) != Some("---") {
            return Err(Error::parse("agent definition must start with ---"));
        }

        let mut name = None;
        let mut description = None;
        let mut allowed_tools = Vec::new();
        let mut max_iterations = DEFAULT_MAX_ITERATIONS;
        let mut metadata = HashMap::new();
        let mut terminated = false;

        for line in lines.by_ref() {
            if line.trim() == "---" {
                terminated = true;
                break;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            match key {
                "name" => name = Some(value.to_string()),
                "description" => description = Some(value.to_string()),
                "allowed-tools" => {
                    allowed_tools = value
                        .split_whitespace()
                        .map(str::to_string)
                        .collect();
                }
                "max-iterations" => {
                    let parsed: u32 = value
                        .parse()
                        .map_err(|_| Error::parse(format!("bad max-iterations: {}", value)))?;
                    max_iterations = parsed.clamp(1, MAX_ITERATIONS_CLAMP);
                }
                other => {
                    metadata.insert(other.to_string(), value.to_string());
                }
            }
        }

        if !terminated {
            return Err(Error::parse("unterminated front matter"));
        }

        let name = name.ok_or_else(|| Error::parse("agent definition missing name"))?;
        if !is_valid_name(&name) {
            return Err(Error::parse(format!("invalid agent name: {}", name)));
        }
        let description = description
            .filter(|d| !d.is_empty())
            .ok_or_else(|| Error::parse("agent definition missing description"))?;

        let instructions: String = lines.collect::<Vec<_>>().join("\n");

        Ok(Self {
            name,
            description,
            instructions: instructions.trim().to_string(),
            allowed_tools,
            max_iterations,
            metadata,
            path: None,
            agent_dir: None,
        })
    }

    /// The generated system prompt used when this agent runs.
    pub fn system_prompt(&self) -> String {
        format!(
            "You are {}: {}\n\n{}",
            self.name, self.description, self.instructions
        )
    }
}

pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= NAME_MAX_LEN && NAME_PATTERN.is_match(name)
}
