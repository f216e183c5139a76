//! Skill discovery.
//!
//! Skills are front-matter documents at `<dir>/<skill>/SKILL.md`, the same
//! format as agent definitions, so they flow through the same parser. They
//! surface to the model only as a `<skills>` section in the system prompt.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use la_agents::AgentDefinition;

const SKILL_FILE: &str = "SKILL.md";

#[derive(Debug, Clone)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub path: PathBuf,
}

/// Scan each path for immediate subdirectories holding a SKILL.md.
/// Invalid documents are skipped with a warning; later paths override
/// earlier ones on name collision.
pub fn discover_skills(paths: &[impl AsRef<Path>]) -> Vec<Skill> {
    let mut skills: Vec<Skill> = Vec::new();

    for path in paths {
        let path = path.as_ref();
        let Ok(entries) = fs::read_dir(path) else {
            continue;
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let skill_path = entry.path().join(SKILL_FILE);
            let Ok(document) = fs::read_to_string(&skill_path) else {
                continue;
            };

            match AgentDefinition::parse(&document) {
                Ok(def) => {
                    skills.retain(|s| s.name != def.name);
                    skills.push(Skill {
                        name: def.name,
                        description: def.description,
                        path: skill_path,
                    });
                }
                Err(e) => {
                    warn!(path = %skill_path.display(), error = %e, "skipping invalid skill");
                }
            }
        }
    }

    skills.sort_by(|a, b| a.name.cmp(&b.name));
    skills
}

/// The `<skills>` XML section for the system prompt.
pub fn skills_section(skills: &[Skill]) -> Option<String> {
    if skills.is_empty() {
        return None;
    }
    let mut section = String::from("<skills>\n");
    for skill in skills {
        section.push_str(&format!(
            "  <skill name=\"{}\" path=\"{}\">{}</skill>\n",
            skill.name,
            skill.path.display(),
            skill.description
        ));
    }
    section.push_str("</skills>");
    Some(section)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_skill(dir: &Path, name: &str, description: &str) {
        let skill_dir = dir.join(name);
        fs::create_dir_all(&skill_dir).unwrap();
        fs::write(
            skill_dir.join("SKILL.md"),
            format!(
                "---\nname: {}\ndescription: {}\n---\nHow to use this skill.",
                name, description
            ),
        )
        .unwrap();
    }

    #[test]
    fn test_discover_sorted() {
        let dir = tempdir().unwrap();
        write_skill(dir.path(), "review", "Review changes");
        write_skill(dir.path(), "deploy", "Deploy the app");

        let skills = discover_skills(&[dir.path()]);
        assert_eq!(skills.len(), 2);
        assert_eq!(skills[0].name, "deploy");
        assert_eq!(skills[1].name, "review");
    }

    #[test]
    fn test_later_path_overrides() {
        let low = tempdir().unwrap();
        let high = tempdir().unwrap();
        write_skill(low.path(), "deploy", "old deploy");
        write_skill(high.path(), "deploy", "new deploy");

        let skills = discover_skills(&[low.path(), high.path()]);
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].description, "new deploy");
    }

    #[test]
    fn test_invalid_skill_skipped() {
        let dir = tempdir().unwrap();
        let bad = dir.path().join("bad");
        fs::create_dir_all(&bad).unwrap();
        fs::write(bad.join("SKILL.md"), "not front matter").unwrap();

        assert!(discover_skills(&[dir.path()]).is_empty());
    }

    #[test]
    fn test_section_rendering() {
        let dir = tempdir().unwrap();
        write_skill(dir.path(), "deploy", "Deploy the app");
        let skills = discover_skills(&[dir.path()]);

        let section = skills_section(&skills).unwrap();
        assert!(section.starts_with("<skills>"));
        assert!(section.contains("name=\"deploy\""));
        assert!(skills_section(&[]).is_none());
    }
}
