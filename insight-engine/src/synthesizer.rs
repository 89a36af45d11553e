use crate::prompts::{clustering_user_prompt, CLUSTERING_SYSTEM_PROMPT};
use llm_interface::json::{kind_of, parse_json_value};
use llm_interface::{ChatRequest, LlmProvider};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Write;
use threadscope_core::{
    ConceptConfig, CoreError, ErrorExt, ExtractionResult, LlmError, Snippet, SynthesisSettings,
    Theme, ThemeCluster, UNCATEGORIZED_KEY,
};
use tracing::{info, warn};

const UNCATEGORIZED_NAME: &str = "Uncategorized";
const UNCATEGORIZED_DESCRIPTION: &str = "findings filed under keys the concept does not declare";

#[derive(Debug, Clone)]
pub struct Synthesis {
    pub clusters: Vec<ThemeCluster>,
    pub report: String,
    /// Permalinks of threads the extraction flagged as high value.
    pub high_value_threads: Vec<String>,
}

/// Turns extraction results into theme clusters and a narrative report.
pub struct ThemeSynthesizer<P> {
    provider: P,
    concept: ConceptConfig,
    settings: SynthesisSettings,
}

impl<P: LlmProvider> ThemeSynthesizer<P> {
    pub fn new(provider: P, concept: ConceptConfig, settings: SynthesisSettings) -> Self {
        Self {
            provider,
            concept,
            settings,
        }
    }

    pub async fn synthesize(&self, results: &[ExtractionResult]) -> Result<Synthesis, CoreError> {
        let (mut clusters, high_value_threads) = aggregate_findings(&self.concept, results);
        for cluster in &clusters {
            info!(
                "Found {} findings for '{}'",
                cluster.count, cluster.category_key
            );
        }

        for cluster in clusters.iter_mut() {
            self.summarize(cluster).await?;
        }

        let full_context = build_report_context(&self.concept, &clusters, &high_value_threads);
        let report = self.write_report(&full_context).await?;

        info!(
            "Synthesis finished: {} clusters, {} themes, {} high-value threads",
            clusters.len(),
            clusters.iter().map(|c| c.themes.len()).sum::<usize>(),
            high_value_threads.len()
        );

        Ok(Synthesis {
            clusters,
            report,
            high_value_threads,
        })
    }

    async fn summarize(&self, cluster: &mut ThemeCluster) -> Result<(), CoreError> {
        let max_examples = self.settings.max_examples_per_theme;
        let wants_llm = !cluster.is_uncategorized()
            && cluster.count >= self.settings.clustering_min_findings.max(1);

        if wants_llm {
            match self.cluster_with_llm(cluster).await {
                Ok(themes) => {
                    cluster.themes = themes;
                    cluster.clustered = true;
                    sort_themes(&mut cluster.themes);
                    return Ok(());
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(
                    "Clustering failed for '{}', falling back to raw grouping: {}",
                    cluster.category_key, e
                ),
            }
        }

        cluster.themes = group_raw(&cluster.snippets, max_examples);
        cluster.clustered = false;
        Ok(())
    }

    async fn cluster_with_llm(&self, cluster: &ThemeCluster) -> Result<Vec<Theme>, CoreError> {
        info!(
            "Clustering {} findings for '{}'",
            cluster.count, cluster.display_name
        );
        let items: Vec<&str> = cluster.snippets.iter().map(|s| s.text.as_str()).collect();
        let request = ChatRequest::new(
            &self.settings.synthesis_model,
            CLUSTERING_SYSTEM_PROMPT,
            clustering_user_prompt(
                &cluster.display_name,
                &cluster.description,
                &items,
                self.settings.max_examples_per_theme,
            ),
        )
        .json();

        let reply = self.provider.complete(&request).await?;
        Ok(parse_themes(&reply, self.settings.max_examples_per_theme)?)
    }

    async fn write_report(&self, full_context: &str) -> Result<String, CoreError> {
        info!("Generating final report with {}", self.settings.synthesis_model);
        let request = ChatRequest::new(
            &self.settings.synthesis_model,
            &self.concept.report_system_prompt,
            self.concept.render_report_prompt(full_context)?,
        );

        let report = self.provider.complete(&request).await?;
        let report = report.trim();
        if report.is_empty() {
            return Err(LlmError::malformed("report reply is empty").into());
        }
        Ok(report.to_string())
    }
}

/// Groups the findings of successful results by category.
///
/// Declared categories come first in declared order and are always
/// present. Findings under undeclared keys land in one trailing
/// `uncategorized` cluster, which only exists when it has snippets.
pub fn aggregate_findings(
    concept: &ConceptConfig,
    results: &[ExtractionResult],
) -> (Vec<ThemeCluster>, Vec<String>) {
    let mut clusters: Vec<ThemeCluster> = concept
        .analysis_categories
        .iter()
        .map(|category| empty_cluster(&category.key, &category.name, &category.description))
        .collect();
    let mut uncategorized = empty_cluster(
        UNCATEGORIZED_KEY,
        UNCATEGORIZED_NAME,
        UNCATEGORIZED_DESCRIPTION,
    );
    let index: HashMap<&str, usize> = concept
        .analysis_categories
        .iter()
        .enumerate()
        .map(|(i, category)| (category.key.as_str(), i))
        .collect();

    let mut high_value_threads = Vec::new();
    for result in results {
        let Some(insights) = result.insights() else {
            continue;
        };
        for (key, findings) in &insights.findings {
            let cluster = match index.get(key.as_str()) {
                Some(&i) => &mut clusters[i],
                None => &mut uncategorized,
            };
            cluster.snippets.extend(findings.iter().map(|text| Snippet {
                text: text.clone(),
                source_id: result.post_id.clone(),
            }));
        }
        if insights.is_high_value {
            let link = if result.permalink.is_empty() {
                &result.post_id
            } else {
                &result.permalink
            };
            high_value_threads.push(link.clone());
        }
    }

    if !uncategorized.snippets.is_empty() {
        clusters.push(uncategorized);
    }
    for cluster in clusters.iter_mut() {
        cluster.count = cluster.snippets.len();
    }
    (clusters, high_value_threads)
}

fn empty_cluster(key: &str, name: &str, description: &str) -> ThemeCluster {
    ThemeCluster {
        category_key: key.to_string(),
        display_name: name.to_string(),
        description: description.to_string(),
        snippets: Vec::new(),
        count: 0,
        themes: Vec::new(),
        clustered: false,
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Counts identical findings (ignoring case and whitespace) as one theme
/// named after the first occurrence.
pub fn group_raw(snippets: &[Snippet], max_examples: usize) -> Vec<Theme> {
    let mut themes: Vec<Theme> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for snippet in snippets {
        let key = normalize(&snippet.text);
        if key.is_empty() {
            continue;
        }
        match index.get(&key) {
            Some(&i) => {
                let theme = &mut themes[i];
                theme.count += 1;
                let text = snippet.text.trim();
                if theme.example_items.len() < max_examples
                    && !theme.example_items.iter().any(|e| e == text)
                {
                    theme.example_items.push(text.to_string());
                }
            }
            None => {
                index.insert(key, themes.len());
                let name = snippet.text.trim().to_string();
                let example_items = if max_examples > 0 {
                    vec![name.clone()]
                } else {
                    Vec::new()
                };
                themes.push(Theme {
                    name,
                    count: 1,
                    example_items,
                });
            }
        }
    }

    sort_themes(&mut themes);
    themes
}

/// Descending by count; the sort is stable so ties keep first-seen order.
fn sort_themes(themes: &mut [Theme]) {
    themes.sort_by(|a, b| b.count.cmp(&a.count));
}

#[derive(Debug, Deserialize)]
struct ThemeReply {
    #[serde(alias = "name", alias = "theme")]
    theme_name: String,
    count: usize,
    #[serde(default, alias = "examples")]
    example_items: Vec<Value>,
}

/// Reads clustering output: a list of themes, or an object wrapping one.
fn parse_themes(reply: &str, max_examples: usize) -> Result<Vec<Theme>, LlmError> {
    let list = match parse_json_value(reply)? {
        Value::Array(items) => items,
        Value::Object(map) => map
            .into_iter()
            .find_map(|(_, value)| match value {
                Value::Array(items) => Some(items),
                _ => None,
            })
            .ok_or_else(|| LlmError::malformed("clustering object holds no theme list"))?,
        other => {
            return Err(LlmError::malformed(format!(
                "expected a list of themes, got {}",
                kind_of(&other)
            )))
        }
    };

    let mut themes = Vec::with_capacity(list.len());
    for item in list {
        let reply: ThemeReply = serde_json::from_value(item)
            .map_err(|e| LlmError::malformed(format!("invalid theme entry: {}", e)))?;
        let name = reply.theme_name.trim().to_string();
        if name.is_empty() {
            return Err(LlmError::malformed("theme without a name"));
        }
        let example_items = reply
            .example_items
            .into_iter()
            .filter_map(|value| match value {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .take(max_examples)
            .collect();
        themes.push(Theme {
            name,
            count: reply.count,
            example_items,
        });
    }

    if themes.is_empty() {
        return Err(LlmError::malformed("clustering returned no themes"));
    }
    Ok(themes)
}

/// The `{full_context}` handed to the report prompt.
pub fn build_report_context(
    concept: &ConceptConfig,
    clusters: &[ThemeCluster],
    high_value_threads: &[String],
) -> String {
    let mut context = String::new();
    let _ = writeln!(context, "# Concept: {}", concept.concept_name);
    let _ = writeln!(context, "{}\n", concept.concept_description);

    for cluster in clusters {
        let _ = writeln!(
            context,
            "## Thematic Summary for: {} ({})",
            cluster.display_name, cluster.category_key
        );
        let _ = writeln!(
            context,
            "{} ({} findings)\n",
            cluster.description, cluster.count
        );
        if cluster.themes.is_empty() {
            context.push_str("No findings.\n");
        }
        for theme in &cluster.themes {
            let _ = writeln!(context, "- **Theme:** {} (Count: {})", theme.name, theme.count);
            if !theme.example_items.is_empty() {
                let _ = writeln!(context, "  - Examples: {}", theme.example_items.join("; "));
            }
        }
        context.push_str("\n---\n");
    }

    let _ = writeln!(context, "## High-Value Threads");
    let _ = writeln!(
        context,
        "Found {} high-value discussion threads.",
        high_value_threads.len()
    );
    for link in high_value_threads {
        let _ = writeln!(context, "- {}", link);
    }
    context
}
