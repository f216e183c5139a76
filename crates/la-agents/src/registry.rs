//! The agent registry: embedded definitions plus disk discovery.
//!
//! Precedence, lowest to highest: user-global directory, project-local
//! directory, embedded definitions. Search paths are walked lowest first so
//! later entries overwrite earlier ones; a disk definition whose name
//! collides with an embedded one is silently skipped.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use la_core::Result;

use crate::builtin::{EXPLORER_AGENT, PLANNING_AGENT};
use crate::definition::AgentDefinition;

const DEFINITION_FILE: &str = "AGENT.md";

#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, AgentDefinition>,
    embedded: HashSet<String>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-seeded with the embedded definitions.
    pub fn with_embedded() -> Self {
        let mut registry = Self::new();
        registry.register_embedded();
        registry
    }

    /// Seed the compiled-in definitions. Their names become reserved.
    pub fn register_embedded(&mut self) {
        for document in [PLANNING_AGENT, EXPLORER_AGENT] {
            let def = AgentDefinition::parse(document)
                .expect("embedded agent definitions must parse");
            self.embedded.insert(def.name.clone());
            self.agents.insert(def.name.clone(), def);
        }
    }

    /// Walk search paths for `<dir>/<agent>/AGENT.md` definitions.
    ///
    /// Paths are ordered lowest priority first. Invalid definitions are
    /// skipped with a warning; embedded-name collisions are skipped
    /// silently.
    pub fn discover(&mut self, search_paths: &[impl AsRef<Path>]) -> Result<()> {
        for search_path in search_paths {
            let search_path = search_path.as_ref();
            if !search_path.is_dir() {
                continue;
            }

            for entry in fs::read_dir(search_path)? {
                let entry = entry?;
                let agent_dir = entry.path();
                if !agent_dir.is_dir() {
                    continue;
                }

                let definition_path = agent_dir.join(DEFINITION_FILE);
                let Ok(document) = fs::read_to_string(&definition_path) else {
                    continue;
                };

                match AgentDefinition::parse(&document) {
                    Ok(mut def) => {
                        if self.embedded.contains(&def.name) {
                            debug!(name = %def.name, "skipping shadowed embedded agent");
                            continue;
                        }
                        def.path = Some(definition_path);
                        def.agent_dir = Some(agent_dir);
                        self.agents.insert(def.name.clone(), def);
                    }
                    Err(e) => {
                        warn!(path = %definition_path.display(), error = %e, "skipping invalid agent definition");
                    }
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&AgentDefinition> {
        self.agents.get(name)
    }

    pub fn is_embedded(&self, name: &str) -> bool {
        self.embedded.contains(name)
    }

    /// All definitions, sorted by name.
    pub fn list(&self) -> Vec<&AgentDefinition> {
        let mut all: Vec<&AgentDefinition> = self.agents.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// The `<available_agents>` XML section appended to system prompts.
    pub fn prompt_section(&self) -> String {
        let mut section = String::from("<available_agents>\n");
        for def in self.list() {
            section.push_str(&format!(
                "  <agent name=\"{}\">{}</agent>\n",
                def.name, def.description
            ));
        }
        section.push_str("</available_agents>");
        section
    }
}
