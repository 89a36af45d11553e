mod support;

use insight_engine::prompts::CLUSTERING_SYSTEM_PROMPT;
use insight_engine::ThemeSynthesizer;
use llm_interface::ChatRequest;
use std::collections::BTreeMap;
use support::{concept, thread, ScriptedLlm};
use threadscope_core::{
    CoreError, ExtractionOutcome, ExtractionResult, FailureStage, InsightRecord, LlmError,
    RelevanceVerdict, SynthesisSettings, UNCATEGORIZED_KEY,
};

const THEMES: &str = r#"{"themes": [
    {"theme_name": "Scam anxiety", "count": 1, "example_items": ["Scared of scam calls"]},
    {"theme_name": "Password overload", "count": 2, "example_items": ["Too many passwords", "Forgets passwords"]}
]}"#;

fn is_clustering(request: &ChatRequest) -> bool {
    request.messages[0].content == CLUSTERING_SYSTEM_PROMPT
}

fn success(id: &str, findings: Vec<(&str, Vec<&str>)>, high_value: bool) -> ExtractionResult {
    let findings: BTreeMap<String, Vec<String>> = findings
        .into_iter()
        .map(|(key, items)| (key.to_string(), items.into_iter().map(String::from).collect()))
        .collect();
    ExtractionResult::new(
        &thread(id, &format!("Thread {}", id)),
        ExtractionOutcome::Success {
            verdict: RelevanceVerdict {
                relevant: true,
                rationale: "yes".to_string(),
            },
            insights: InsightRecord {
                findings,
                is_high_value: high_value,
                attributes: BTreeMap::new(),
            },
            attempts: 1,
        },
    )
}

fn results() -> Vec<ExtractionResult> {
    vec![
        success(
            "p1",
            vec![
                ("main_pain_points", vec!["Too many passwords", "Scared of scam calls"]),
                ("competitor_mentions", vec!["GrandPad"]),
            ],
            true,
        ),
        ExtractionResult::new(
            &thread("p2", "Thread p2"),
            ExtractionOutcome::Failed {
                stage: FailureStage::Extraction,
                reason: "invalid JSON".to_string(),
                attempts: 3,
                verdict: None,
                raw_response: None,
            },
        ),
        success(
            "p3",
            vec![
                ("main_pain_points", vec!["Forgets passwords"]),
                ("unmet_needs", vec!["Large print guides"]),
                ("competitor_mentions", vec!["grandpad  "]),
            ],
            false,
        ),
    ]
}

#[tokio::test]
async fn test_clusters_cover_every_finding() {
    let llm = ScriptedLlm::new(|request: &ChatRequest| {
        if is_clustering(request) {
            Ok(THEMES.to_string())
        } else {
            Ok("# Market Validation Report\n\nPeople need help.".to_string())
        }
    });
    let synthesizer = ThemeSynthesizer::new(&llm, concept(), SynthesisSettings::default());

    let synthesis = synthesizer.synthesize(&results()).await.unwrap();

    let keys: Vec<&str> = synthesis
        .clusters
        .iter()
        .map(|c| c.category_key.as_str())
        .collect();
    assert_eq!(keys, vec!["main_pain_points", "unmet_needs", UNCATEGORIZED_KEY]);

    // No finding is lost and each snippet keeps its source.
    let snippet_total: usize = synthesis.clusters.iter().map(|c| c.snippets.len()).sum();
    assert_eq!(snippet_total, 6);
    for cluster in &synthesis.clusters {
        assert_eq!(cluster.count, cluster.snippets.len());
    }
    let pain = &synthesis.clusters[0];
    assert_eq!(pain.snippets[2].source_id, "p3");

    // Three findings reach the clustering threshold; themes come back sorted.
    assert!(pain.clustered);
    assert_eq!(pain.themes[0].name, "Password overload");
    assert_eq!(pain.themes[1].name, "Scam anxiety");

    let needs = &synthesis.clusters[1];
    assert!(!needs.clustered);
    assert_eq!(needs.themes.len(), 1);

    let uncategorized = &synthesis.clusters[2];
    assert!(!uncategorized.clustered);
    assert_eq!(uncategorized.themes.len(), 1);
    assert_eq!(uncategorized.themes[0].name, "GrandPad");
    assert_eq!(uncategorized.themes[0].count, 2);

    assert_eq!(
        synthesis.high_value_threads,
        vec!["https://reddit.com/r/AgingParents/comments/p1/"]
    );
    assert!(synthesis.report.starts_with("# Market Validation Report"));

    let calls = llm.calls();
    assert_eq!(calls.iter().filter(|r| is_clustering(r)).count(), 1);
    let report_request = calls.last().unwrap();
    let report_prompt = report_request.user_prompt();
    assert!(report_prompt.starts_with("Write the report for tech_education_platform."));
    assert!(report_prompt.contains("## Thematic Summary for: Learner Pain Points (main_pain_points)"));
    assert!(report_prompt.contains("- **Theme:** Password overload (Count: 2)"));
    assert!(report_prompt.contains("Found 1 high-value discussion threads."));
}

#[tokio::test]
async fn test_declared_clusters_exist_without_findings() {
    let llm = ScriptedLlm::new(|_: &ChatRequest| Ok("report".to_string()));
    let synthesis = ThemeSynthesizer::new(&llm, concept(), SynthesisSettings::default())
        .synthesize(&[])
        .await
        .unwrap();

    assert_eq!(synthesis.clusters.len(), 2);
    assert!(synthesis.clusters.iter().all(|c| c.count == 0 && c.themes.is_empty()));
    assert_eq!(llm.calls().len(), 1);
}

#[tokio::test]
async fn test_failed_clustering_falls_back_to_raw_grouping() {
    let llm = ScriptedLlm::new(|request: &ChatRequest| {
        if is_clustering(request) {
            Ok("these are some themes".to_string())
        } else {
            Ok("report".to_string())
        }
    });
    let synthesis = ThemeSynthesizer::new(&llm, concept(), SynthesisSettings::default())
        .synthesize(&results())
        .await
        .unwrap();

    let pain = &synthesis.clusters[0];
    assert!(!pain.clustered);
    assert_eq!(pain.themes.len(), 3);
    assert_eq!(pain.themes.iter().map(|t| t.count).sum::<usize>(), 3);
}

#[tokio::test]
async fn test_report_failures_are_fatal() {
    let empty = ScriptedLlm::new(|request: &ChatRequest| {
        if is_clustering(request) {
            Ok(THEMES.to_string())
        } else {
            Ok("   ".to_string())
        }
    });
    let err = ThemeSynthesizer::new(&empty, concept(), SynthesisSettings::default())
        .synthesize(&results())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Llm(LlmError::MalformedResponse { .. })));

    let unavailable = ScriptedLlm::new(|request: &ChatRequest| {
        if is_clustering(request) {
            Ok(THEMES.to_string())
        } else {
            Err(LlmError::ServiceUnavailable {
                provider: "scripted".to_string(),
                status_code: 502,
            }
            .into())
        }
    });
    assert!(ThemeSynthesizer::new(&unavailable, concept(), SynthesisSettings::default())
        .synthesize(&results())
        .await
        .is_err());
}

#[tokio::test]
async fn test_fatal_clustering_error_aborts() {
    let llm = ScriptedLlm::new(|_: &ChatRequest| {
        Err(LlmError::InsufficientCredits {
            provider: "scripted".to_string(),
        }
        .into())
    });
    let err = ThemeSynthesizer::new(&llm, concept(), SynthesisSettings::default())
        .synthesize(&results())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Llm(LlmError::InsufficientCredits { .. })));
    assert_eq!(llm.calls().len(), 1);
}
