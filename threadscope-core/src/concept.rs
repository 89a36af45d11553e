//! Concept configuration: the product idea under research, its target
//! communities, keywords, prompts and analysis categories.
//!
//! Concepts are TOML files. Categories are declared as an array of tables so
//! their order is preserved into the report:
//!
//! ```toml
//! concept_name = "tech_education_platform"
//! concept_description = "Platform for teaching technology to relatives"
//! target_subreddits = ["AgingParents", "TechSupport"]
//! keywords = ["tech help", "scam"]
//! filter_system_prompt = "Answer with only 'yes' or 'no'."
//! filter_user_prompt_template = "Is this relevant?\n---\n{thread_content}\n---"
//! analysis_system_prompt = "You are a market research analyst."
//! analysis_user_prompt_template = "Analyze:\n---\n{thread_context}\n---"
//! report_system_prompt = "You are a strategist."
//! report_user_prompt_template = "Write the report.\n{full_context}"
//!
//! [[analysis_categories]]
//! key = "main_pain_points"
//! name = "Learner Pain Points"
//! description = "pain points for non-tech-savvy individuals"
//! ```

use crate::error::ConfigError;
use crate::types::UNCATEGORIZED_KEY;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

pub const THREAD_CONTENT_VAR: &str = "thread_content";
pub const THREAD_CONTEXT_VAR: &str = "thread_context";
pub const FULL_CONTEXT_VAR: &str = "full_context";
pub const CONCEPT_NAME_VAR: &str = "concept_name";
pub const CONCEPT_DESCRIPTION_VAR: &str = "concept_description";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisCategory {
    pub key: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptConfig {
    pub concept_name: String,
    pub concept_description: String,
    pub target_subreddits: Vec<String>,
    pub keywords: Vec<String>,
    pub filter_system_prompt: String,
    pub filter_user_prompt_template: String,
    pub analysis_system_prompt: String,
    pub analysis_user_prompt_template: String,
    pub analysis_categories: Vec<AnalysisCategory>,
    pub report_system_prompt: String,
    pub report_user_prompt_template: String,
    #[serde(default)]
    pub output_file_prefix: Option<String>,
}

impl ConceptConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: ConceptConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        let config = Self::from_toml_str(&source)?;
        debug!(
            "Loaded concept '{}' from {} ({} subreddits, {} keywords, {} categories)",
            config.concept_name,
            path.display(),
            config.target_subreddits.len(),
            config.keywords.len(),
            config.analysis_categories.len()
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("concept_name", &self.concept_name),
            ("concept_description", &self.concept_description),
            ("filter_system_prompt", &self.filter_system_prompt),
            ("filter_user_prompt_template", &self.filter_user_prompt_template),
            ("analysis_system_prompt", &self.analysis_system_prompt),
            (
                "analysis_user_prompt_template",
                &self.analysis_user_prompt_template,
            ),
            ("report_system_prompt", &self.report_system_prompt),
            ("report_user_prompt_template", &self.report_user_prompt_template),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    field: field.to_string(),
                });
            }
        }

        if self.target_subreddits.iter().all(|s| s.trim().is_empty()) {
            return Err(ConfigError::MissingField {
                field: "target_subreddits".to_string(),
            });
        }
        if self.keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(ConfigError::invalid_value("keywords", "empty keyword"));
        }
        if self.analysis_categories.is_empty() {
            return Err(ConfigError::MissingField {
                field: "analysis_categories".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for category in &self.analysis_categories {
            if category.key.trim().is_empty() {
                return Err(ConfigError::invalid_value(
                    "analysis_categories.key",
                    "empty key",
                ));
            }
            if category.key == UNCATEGORIZED_KEY {
                return Err(ConfigError::ValidationFailed {
                    reason: format!("category key '{}' is reserved", UNCATEGORIZED_KEY),
                });
            }
            if !seen.insert(category.key.as_str()) {
                return Err(ConfigError::ValidationFailed {
                    reason: format!("duplicate category key '{}'", category.key),
                });
            }
        }

        if let Some(prefix) = &self.output_file_prefix {
            if prefix.trim().is_empty() || prefix.contains(['/', '\\']) {
                return Err(ConfigError::invalid_value("output_file_prefix", prefix));
            }
        }

        // Render every template once so unknown placeholders fail before any network call.
        check_template(
            "filter_user_prompt_template",
            &self.filter_user_prompt_template,
            &[THREAD_CONTENT_VAR],
        )?;
        check_template(
            "analysis_user_prompt_template",
            &self.analysis_user_prompt_template,
            &[THREAD_CONTEXT_VAR],
        )?;
        check_template(
            "report_user_prompt_template",
            &self.report_user_prompt_template,
            &[FULL_CONTEXT_VAR, CONCEPT_NAME_VAR, CONCEPT_DESCRIPTION_VAR],
        )?;

        Ok(())
    }

    pub fn output_prefix(&self) -> &str {
        self.output_file_prefix
            .as_deref()
            .unwrap_or(&self.concept_name)
    }

    pub fn render_filter_prompt(&self, thread_content: &str) -> Result<String, ConfigError> {
        render_template(
            &self.filter_user_prompt_template,
            &[(THREAD_CONTENT_VAR, thread_content)],
        )
    }

    pub fn render_analysis_prompt(&self, thread_context: &str) -> Result<String, ConfigError> {
        render_template(
            &self.analysis_user_prompt_template,
            &[(THREAD_CONTEXT_VAR, thread_context)],
        )
    }

    pub fn render_report_prompt(&self, full_context: &str) -> Result<String, ConfigError> {
        render_template(
            &self.report_user_prompt_template,
            &[
                (FULL_CONTEXT_VAR, full_context),
                (CONCEPT_NAME_VAR, &self.concept_name),
                (CONCEPT_DESCRIPTION_VAR, &self.concept_description),
            ],
        )
    }
}

fn check_template(field: &str, template: &str, allowed: &[&str]) -> Result<(), ConfigError> {
    let vars: Vec<(&str, &str)> = allowed.iter().map(|name| (*name, "")).collect();
    render_template(template, &vars).map_err(|e| match e {
        ConfigError::InvalidValue { value, .. } => ConfigError::InvalidValue {
            field: field.to_string(),
            value,
        },
        other => other,
    })?;
    Ok(())
}

/// Renders `{name}` placeholders. `{{` and `}}` produce literal braces, so
/// templates may embed JSON examples. Substituted values are never rescanned.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        match c {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                out.push('{');
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let rest = &template[start + 1..];
                let end = rest.find('}').ok_or_else(|| {
                    ConfigError::invalid_value("template", "unclosed '{' placeholder")
                })?;
                let name = &rest[..end];
                let value = vars
                    .iter()
                    .find(|(var, _)| *var == name)
                    .map(|(_, value)| *value)
                    .ok_or_else(|| {
                        ConfigError::invalid_value("template", format!("unknown placeholder {{{}}}", name))
                    })?;
                out.push_str(value);
                // Skip the placeholder name and its closing brace.
                for _ in 0..name.chars().count() + 1 {
                    chars.next();
                }
            }
            '}' => {
                return Err(ConfigError::invalid_value(
                    "template",
                    "unmatched '}' (use '}}' for a literal brace)",
                ));
            }
            _ => out.push(c),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"
concept_name = "tech_education_platform"
concept_description = "Platform for teaching technology to relatives"
target_subreddits = ["AgingParents", "TechSupport"]
keywords = ["tech help", "scam"]
filter_system_prompt = "Answer with only 'yes' or 'no'."
filter_user_prompt_template = "Is this relevant?\n---\n{thread_content}\n---"
analysis_system_prompt = "You are a market research analyst."
analysis_user_prompt_template = "Return {{\"main_pain_points\": []}} for:\n{thread_context}"
report_system_prompt = "You are a strategist."
report_user_prompt_template = "Report on {concept_name}.\n{full_context}"

[[analysis_categories]]
key = "main_pain_points"
name = "Learner Pain Points"
description = "pain points for non-tech-savvy individuals"

[[analysis_categories]]
key = "unmet_needs"
name = "Unmet Needs"
description = "features or solutions users wish they had"
"#;

    #[test]
    fn test_parse_sample_concept() {
        let concept = ConceptConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(concept.concept_name, "tech_education_platform");
        assert_eq!(concept.output_prefix(), "tech_education_platform");
        assert_eq!(concept.analysis_categories.len(), 2);
        assert_eq!(concept.analysis_categories[1].key, "unmet_needs");
        assert_eq!(concept.analysis_categories[0].name, "Learner Pain Points");
    }

    #[test]
    fn test_missing_key_is_a_parse_error() {
        let source = SAMPLE.replace("concept_description = ", "concept_summary = ");
        let err = ConceptConfig::from_toml_str(&source).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_empty_prompt_is_rejected() {
        let source = SAMPLE.replace(
            "filter_system_prompt = \"Answer with only 'yes' or 'no'.\"",
            "filter_system_prompt = \"  \"",
        );
        let err = ConceptConfig::from_toml_str(&source).unwrap_err();
        assert!(
            matches!(err, ConfigError::MissingField { ref field } if field == "filter_system_prompt")
        );
    }

    #[test]
    fn test_reserved_and_duplicate_category_keys() {
        let reserved = SAMPLE.replace("key = \"unmet_needs\"", "key = \"uncategorized\"");
        assert!(matches!(
            ConceptConfig::from_toml_str(&reserved).unwrap_err(),
            ConfigError::ValidationFailed { .. }
        ));

        let duplicate = SAMPLE.replace("key = \"unmet_needs\"", "key = \"main_pain_points\"");
        assert!(matches!(
            ConceptConfig::from_toml_str(&duplicate).unwrap_err(),
            ConfigError::ValidationFailed { .. }
        ));
    }

    #[test]
    fn test_unknown_placeholder_is_rejected() {
        let source = SAMPLE.replace("{thread_content}", "{thread_body}");
        let err = ConceptConfig::from_toml_str(&source).unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "filter_user_prompt_template")
        );
    }

    #[test]
    fn test_render_template_handles_escapes_and_values() {
        let rendered = render_template(
            "{{\"k\": 1}} then {name} and {name}",
            &[("name", "{inner}")],
        )
        .unwrap();
        assert_eq!(rendered, "{\"k\": 1} then {inner} and {inner}");
    }

    #[test]
    fn test_render_template_rejects_unbalanced_braces() {
        assert!(render_template("oops {name", &[("name", "x")]).is_err());
        assert!(render_template("oops }", &[]).is_err());
    }

    #[test]
    fn test_render_prompts() {
        let concept = ConceptConfig::from_toml_str(SAMPLE).unwrap();
        let analysis = concept.render_analysis_prompt("THREAD").unwrap();
        assert!(analysis.starts_with("Return {\"main_pain_points\": []} for:"));
        assert!(analysis.ends_with("THREAD"));

        let report = concept.render_report_prompt("DATA").unwrap();
        assert_eq!(report, "Report on tech_education_platform.\nDATA");
    }
}
