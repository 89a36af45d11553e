#![allow(dead_code)]

use llm_interface::{ChatRequest, LlmProvider};
use std::env;
use std::path::PathBuf;
use std::sync::Mutex;
use threadscope_core::{ConceptConfig, CoreError, ExtractionSettings, RetryConfig, ThreadRecord};

pub const CONCEPT: &str = r#"
concept_name = "tech_education_platform"
concept_description = "Platform for teaching technology to relatives"
target_subreddits = ["AgingParents"]
keywords = ["tech help"]
filter_system_prompt = "Answer with only 'yes' or 'no'."
filter_user_prompt_template = "Is this relevant?\n---\n{thread_content}\n---"
analysis_system_prompt = "You are a market research analyst."
analysis_user_prompt_template = "Analyze:\n{thread_context}"
report_system_prompt = "You are a strategist."
report_user_prompt_template = "Write the report for {concept_name}.\n{full_context}"

[[analysis_categories]]
key = "main_pain_points"
name = "Learner Pain Points"
description = "pain points for non-tech-savvy individuals"

[[analysis_categories]]
key = "unmet_needs"
name = "Unmet Needs"
description = "features or solutions users wish they had"
"#;

pub fn concept() -> ConceptConfig {
    ConceptConfig::from_toml_str(CONCEPT).expect("sample concept")
}

type Responder = Box<dyn Fn(&ChatRequest) -> Result<String, CoreError> + Send + Sync>;

/// In-memory provider that answers from a closure and records every request.
pub struct ScriptedLlm {
    respond: Responder,
    calls: Mutex<Vec<ChatRequest>>,
}

impl ScriptedLlm {
    pub fn new(respond: impl Fn(&ChatRequest) -> Result<String, CoreError> + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<ChatRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_matching(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.user_prompt().contains(needle))
            .count()
    }
}

impl LlmProvider for ScriptedLlm {
    async fn complete(&self, request: &ChatRequest) -> Result<String, CoreError> {
        self.calls.lock().unwrap().push(request.clone());
        (self.respond)(request)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn thread(id: &str, title: &str) -> ThreadRecord {
    ThreadRecord {
        id: id.to_string(),
        title: title.to_string(),
        selftext: format!("Body of {}", title),
        url: String::new(),
        permalink: format!("https://reddit.com/r/AgingParents/comments/{}/", id),
        subreddit: "AgingParents".to_string(),
        author: "poster".to_string(),
        score: 5,
        num_comments: 0,
        created_utc: 1_700_000_000.0,
        query_origins: vec![],
        comments: vec![],
    }
}

pub fn fast_settings(progress_save_interval: usize) -> ExtractionSettings {
    ExtractionSettings {
        progress_save_interval,
        retry: RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        },
        ..Default::default()
    }
}

pub fn temp_dir() -> PathBuf {
    let dir = env::temp_dir().join(format!("threadscope_test_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}
