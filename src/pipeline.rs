use anyhow::Context;
use artifact_store::{read_json, write_json_atomic, write_text_atomic, ArtifactPaths, CheckpointStore};
use clap::ValueEnum;
use insight_engine::{InsightExtractor, ThemeSynthesizer};
use llm_interface::OpenRouterProvider;
use reddit_client::{RedditClient, ThreadCollector};
use std::fmt;
use std::time::Instant;
use threadscope_core::{ConceptConfig, ExtractionResult, Settings, ThreadRecord};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Stage {
    Fetch,
    Analyze,
    Synthesize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Fetch => f.write_str("fetch"),
            Stage::Analyze => f.write_str("analyze"),
            Stage::Synthesize => f.write_str("synthesize"),
        }
    }
}

/// Which stages run, always in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSelection {
    pub fetch: bool,
    pub analyze: bool,
    pub synthesize: bool,
}

impl StageSelection {
    /// `--steps` picks the stages (all when absent); the skip flags remove from that set.
    pub fn resolve(
        steps: &[Stage],
        skip_fetch: bool,
        skip_analyze: bool,
        skip_synthesize: bool,
    ) -> Self {
        let wanted = |stage: Stage| steps.is_empty() || steps.contains(&stage);
        Self {
            fetch: wanted(Stage::Fetch) && !skip_fetch,
            analyze: wanted(Stage::Analyze) && !skip_analyze,
            synthesize: wanted(Stage::Synthesize) && !skip_synthesize,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.fetch || self.analyze || self.synthesize)
    }

    fn needs_llm(&self) -> bool {
        self.analyze || self.synthesize
    }

    fn stages(&self) -> Vec<Stage> {
        [
            (Stage::Fetch, self.fetch),
            (Stage::Analyze, self.analyze),
            (Stage::Synthesize, self.synthesize),
        ]
        .into_iter()
        .filter_map(|(stage, on)| on.then_some(stage))
        .collect()
    }
}

pub struct Pipeline {
    concept: ConceptConfig,
    settings: Settings,
    paths: ArtifactPaths,
    selection: StageSelection,
}

impl Pipeline {
    pub fn new(concept: ConceptConfig, settings: Settings, selection: StageSelection) -> Self {
        let paths = ArtifactPaths::new(&settings.output_dir, concept.output_prefix());
        Self {
            concept,
            settings,
            paths,
            selection,
        }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let started = Instant::now();
        let stages = self.selection.stages();
        info!(
            "Running {} for concept '{}' into {}",
            stages.iter().map(Stage::to_string).collect::<Vec<_>>().join(", "),
            self.concept.concept_name,
            self.paths.dir().display()
        );

        // Missing credentials are reported before any network call.
        let reddit = if self.selection.fetch {
            Some(self.settings.require_reddit()?)
        } else {
            None
        };
        let provider = if self.selection.needs_llm() {
            let openrouter = self.settings.require_openrouter()?;
            Some(OpenRouterProvider::new(&openrouter, &self.settings.llm_pacing)?)
        } else {
            None
        };

        if let Some(credentials) = reddit {
            let client = RedditClient::new(&credentials, &self.settings.reddit_pacing)?;
            self.fetch(&client).await.context("fetch stage failed")?;
        }
        if let Some(provider) = provider.as_ref() {
            if self.selection.analyze {
                self.analyze(provider).await.context("analyze stage failed")?;
            }
            if self.selection.synthesize {
                self.synthesize(provider).await.context("synthesize stage failed")?;
            }
            let metrics = provider.metrics();
            info!(
                "LLM calls: {} retries ({} recovered), {} failed operations",
                metrics.total_retries, metrics.successful_retries, metrics.failed_operations
            );
        }

        info!("Pipeline finished in {:.1?}", started.elapsed());
        Ok(())
    }

    async fn fetch(&self, client: &RedditClient) -> anyhow::Result<()> {
        let started = Instant::now();
        client.authenticate().await?;

        let collection = ThreadCollector::new(client, self.settings.collection.clone())
            .collect(&self.concept)
            .await?;
        let path = self.paths.threads();
        write_json_atomic(&path, &collection.threads).await?;

        let metrics = client.metrics();
        info!(
            "Fetch finished in {:.1?}: {} threads saved to {} ({} Reddit retries)",
            started.elapsed(),
            collection.threads.len(),
            path.display(),
            metrics.total_retries
        );
        Ok(())
    }

    async fn analyze(&self, provider: &OpenRouterProvider) -> anyhow::Result<()> {
        let threads: Vec<ThreadRecord> = read_json(&self.paths.threads()).await?;
        let store = CheckpointStore::new(self.paths.checkpoint());

        let run = InsightExtractor::new(
            provider,
            self.concept.clone(),
            self.settings.extraction.clone(),
            store.clone(),
        )
        .process(&threads)
        .await?;

        let results_path = self.paths.analysis_results();
        let filtered_path = self.paths.filtered_out();
        write_json_atomic(&results_path, &run.relevant_subset()).await?;
        write_json_atomic(&filtered_path, &run.filtered_out()).await?;
        store.discard().await?;

        info!(
            "Analysis results saved to {} and {}",
            results_path.display(),
            filtered_path.display()
        );
        Ok(())
    }

    async fn synthesize(&self, provider: &OpenRouterProvider) -> anyhow::Result<()> {
        let results: Vec<ExtractionResult> = read_json(&self.paths.analysis_results()).await?;

        let synthesis = ThemeSynthesizer::new(
            provider,
            self.concept.clone(),
            self.settings.synthesis.clone(),
        )
        .synthesize(&results)
        .await?;

        let summary_path = self.paths.thematic_summary();
        let report_path = self.paths.report();
        write_json_atomic(&summary_path, &synthesis.clusters).await?;
        write_text_atomic(&report_path, &synthesis.report).await?;

        info!(
            "Thematic summary saved to {}, report saved to {}",
            summary_path.display(),
            report_path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_selection() {
        let all = StageSelection::resolve(&[], false, false, false);
        assert_eq!(all.stages(), vec![Stage::Fetch, Stage::Analyze, Stage::Synthesize]);

        let skip = StageSelection::resolve(&[], true, false, false);
        assert_eq!(skip.stages(), vec![Stage::Analyze, Stage::Synthesize]);
        assert!(skip.needs_llm());

        // Order follows the pipeline, not the command line.
        let picked = StageSelection::resolve(&[Stage::Synthesize, Stage::Fetch], false, false, false);
        assert_eq!(picked.stages(), vec![Stage::Fetch, Stage::Synthesize]);

        let none = StageSelection::resolve(&[Stage::Fetch], true, false, false);
        assert!(none.is_empty());
    }

    #[test]
    fn test_bundled_concept_is_valid() {
        let concept =
            ConceptConfig::from_toml_str(include_str!("../config/tech_education_platform.toml"))
                .unwrap();
        assert_eq!(concept.output_prefix(), "tech_education_platform");
        assert_eq!(concept.analysis_categories.len(), 4);

        let paths = ArtifactPaths::new("results", concept.output_prefix());
        assert!(paths
            .threads()
            .ends_with("tech_education_platform_reddit_threads.json"));
    }
}
