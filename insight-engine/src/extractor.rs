use crate::context::{build_filter_content, build_thread_context};
use artifact_store::{Checkpoint, CheckpointStore};
use llm_interface::json::{parse_json_object, strip_code_blocks};
use llm_interface::{ChatRequest, LlmProvider};
use serde_json::{Map, Value};
use std::time::Instant;
use threadscope_core::retry::calculate_delay;
use threadscope_core::text::truncate_chars;
use threadscope_core::{
    ConceptConfig, CoreError, ErrorExt, ExtractionOutcome, ExtractionResult, ExtractionSettings,
    FailureStage, InsightRecord, LlmError, ProcessingStatus, RelevanceVerdict, ThreadRecord,
};
use tokio::time::sleep;
use tracing::{debug, info, warn};

const HIGH_VALUE_KEY: &str = "is_high_value";
const MAX_RATIONALE_CHARS: usize = 300;

/// Outcome of the extraction stage, in collection order.
#[derive(Debug, Clone, Default)]
pub struct ExtractionRun {
    pub results: Vec<ExtractionResult>,
    /// Threads whose result came from the checkpoint.
    pub resumed: usize,
    pub newly_processed: usize,
}

impl ExtractionRun {
    /// Results that passed the filter stage or failed, i.e. everything except filtered-out threads.
    pub fn relevant_subset(&self) -> Vec<&ExtractionResult> {
        self.results
            .iter()
            .filter(|r| r.status() != ProcessingStatus::FilteredOut)
            .collect()
    }

    pub fn filtered_out(&self) -> Vec<&ExtractionResult> {
        self.results
            .iter()
            .filter(|r| r.status() == ProcessingStatus::FilteredOut)
            .collect()
    }

    pub fn count(&self, status: ProcessingStatus) -> usize {
        self.results.iter().filter(|r| r.status() == status).count()
    }
}

enum Attempted<T> {
    Parsed {
        value: T,
        attempts: u32,
    },
    Exhausted {
        reason: String,
        attempts: u32,
        raw_response: Option<String>,
    },
}

/// Per-thread relevance filter followed by structured extraction, with
/// progress checkpointed so an interrupted run resumes where it stopped.
pub struct InsightExtractor<P> {
    provider: P,
    concept: ConceptConfig,
    settings: ExtractionSettings,
    store: CheckpointStore,
}

impl<P: LlmProvider> InsightExtractor<P> {
    pub fn new(
        provider: P,
        concept: ConceptConfig,
        settings: ExtractionSettings,
        store: CheckpointStore,
    ) -> Self {
        Self {
            provider,
            concept,
            settings,
            store,
        }
    }

    pub async fn process(&self, threads: &[ThreadRecord]) -> Result<ExtractionRun, CoreError> {
        let started = Instant::now();
        let mut checkpoint = self.store.load(&self.concept.concept_name).await?;
        let save_interval = self.settings.progress_save_interval.max(1);
        let total = threads.len();

        let mut resumed = 0;
        let mut newly_processed = 0;
        let mut unsaved = 0;

        info!(
            "Analyzing {} threads for concept '{}' with {} (filter: {}, analysis: {})",
            total,
            self.concept.concept_name,
            self.provider.name(),
            self.settings.filter_model,
            self.settings.analysis_model
        );

        for (position, thread) in threads.iter().enumerate() {
            if checkpoint.contains(&thread.id) {
                debug!("Skipping {} (already processed)", thread.id);
                resumed += 1;
                continue;
            }

            let result = match self.process_thread(thread).await {
                Ok(result) => result,
                Err(e) => {
                    e.log_error();
                    self.flush(&mut checkpoint).await;
                    return Err(e);
                }
            };

            info!(
                "[{}/{}] {} '{}' -> {}",
                position + 1,
                total,
                thread.id,
                truncate_chars(&thread.title, 80),
                result.status()
            );
            checkpoint.upsert(result);
            newly_processed += 1;
            unsaved += 1;

            if unsaved >= save_interval {
                self.store.save(&mut checkpoint).await?;
                unsaved = 0;
            }
        }

        self.store.save(&mut checkpoint).await?;

        let results: Vec<ExtractionResult> = threads
            .iter()
            .filter_map(|t| checkpoint.get(&t.id).cloned())
            .collect();
        let run = ExtractionRun {
            results,
            resumed,
            newly_processed,
        };

        info!(
            "Extraction finished in {:.1?}: {} succeeded, {} failed, {} filtered out ({} resumed, {} newly processed)",
            started.elapsed(),
            run.count(ProcessingStatus::Success),
            run.count(ProcessingStatus::Failed),
            run.count(ProcessingStatus::FilteredOut),
            run.resumed,
            run.newly_processed
        );
        Ok(run)
    }

    /// Saves progress before a fatal error is propagated. A failing save is
    /// only logged so the original error reaches the caller.
    async fn flush(&self, checkpoint: &mut Checkpoint) {
        match self.store.save(checkpoint).await {
            Ok(()) => info!(
                "Checkpoint flushed with {} processed threads",
                checkpoint.len()
            ),
            Err(e) => {
                e.log_warn();
            }
        }
    }

    /// Runs one thread to a terminal result. Only fatal errors are returned
    /// as `Err`; everything else becomes a `failed` result.
    async fn process_thread(&self, thread: &ThreadRecord) -> Result<ExtractionResult, CoreError> {
        let mut status = ProcessingStatus::Pending;
        advance(thread, &mut status, ProcessingStatus::Filtering);

        let filter_prompt = self.concept.render_filter_prompt(&build_filter_content(
            thread,
            self.settings.max_tokens_for_analysis,
        ))?;
        let request = ChatRequest::new(
            &self.settings.filter_model,
            &self.concept.filter_system_prompt,
            filter_prompt,
        );

        let verdict = match self.call_and_parse(thread, &request, parse_verdict).await? {
            Attempted::Parsed { value, .. } => value,
            Attempted::Exhausted {
                reason,
                attempts,
                raw_response,
            } => {
                advance(thread, &mut status, ProcessingStatus::Failed);
                return Ok(ExtractionResult::new(
                    thread,
                    ExtractionOutcome::Failed {
                        stage: FailureStage::Filter,
                        reason,
                        attempts,
                        verdict: None,
                        raw_response,
                    },
                ));
            }
        };

        if !verdict.relevant {
            advance(thread, &mut status, ProcessingStatus::FilteredOut);
            return Ok(ExtractionResult::new(
                thread,
                ExtractionOutcome::FilteredOut { verdict },
            ));
        }
        advance(thread, &mut status, ProcessingStatus::Relevant);

        let context = build_thread_context(
            thread,
            self.settings.max_comments_per_post,
            self.settings.max_tokens_for_analysis,
        );
        if context.comments_included < context.comments_total || context.body_truncated {
            debug!(
                "Context for {} trimmed to {} of {} comments (body truncated: {}, ~{} tokens)",
                thread.id,
                context.comments_included,
                context.comments_total,
                context.body_truncated,
                context.estimated_tokens()
            );
        }

        advance(thread, &mut status, ProcessingStatus::Extracting);
        let request = ChatRequest::new(
            &self.settings.analysis_model,
            &self.concept.analysis_system_prompt,
            self.concept.render_analysis_prompt(&context.text)?,
        )
        .json();

        let outcome = match self.call_and_parse(thread, &request, parse_insights).await? {
            Attempted::Parsed { value, attempts } => {
                advance(thread, &mut status, ProcessingStatus::Success);
                ExtractionOutcome::Success {
                    verdict,
                    insights: value,
                    attempts,
                }
            }
            Attempted::Exhausted {
                reason,
                attempts,
                raw_response,
            } => {
                advance(thread, &mut status, ProcessingStatus::Failed);
                ExtractionOutcome::Failed {
                    stage: FailureStage::Extraction,
                    reason,
                    attempts,
                    verdict: Some(verdict),
                    raw_response,
                }
            }
        };

        Ok(ExtractionResult::new(thread, outcome))
    }

    /// Sends the request and parses the reply, retrying unparsable replies
    /// up to `max_attempts` times with backoff.
    async fn call_and_parse<T, F>(
        &self,
        thread: &ThreadRecord,
        request: &ChatRequest,
        parse: F,
    ) -> Result<Attempted<T>, CoreError>
    where
        F: Fn(&str) -> Result<T, LlmError>,
    {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut reason = String::new();
        let mut raw_response = None;

        for attempt in 1..=max_attempts {
            match self.provider.complete(request).await {
                Ok(reply) => match parse(&reply) {
                    Ok(value) => {
                        return Ok(Attempted::Parsed {
                            value,
                            attempts: attempt,
                        })
                    }
                    Err(e) => {
                        warn!(
                            "Unparsable reply from {} for {} (attempt {}/{}): {}",
                            request.model, thread.id, attempt, max_attempts, e
                        );
                        reason = e.to_string();
                        raw_response = Some(reply);
                    }
                },
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) if is_malformed(&e) => {
                    warn!(
                        "Malformed response from {} for {} (attempt {}/{}): {}",
                        request.model, thread.id, attempt, max_attempts, e
                    );
                    reason = e.to_string();
                    raw_response = None;
                }
                Err(e) => {
                    // Transport retries already happened inside the provider.
                    warn!("Request for {} failed: {}", thread.id, e);
                    return Ok(Attempted::Exhausted {
                        reason: e.to_string(),
                        attempts: attempt,
                        raw_response: None,
                    });
                }
            }

            if attempt < max_attempts {
                sleep(calculate_delay(attempt - 1, &self.settings.retry)).await;
            }
        }

        Ok(Attempted::Exhausted {
            reason,
            attempts: max_attempts,
            raw_response,
        })
    }
}

fn advance(thread: &ThreadRecord, status: &mut ProcessingStatus, next: ProcessingStatus) {
    debug!("{}: {} -> {}", thread.id, status, next);
    *status = next;
}

fn is_malformed(error: &CoreError) -> bool {
    matches!(
        error,
        CoreError::Llm(LlmError::MalformedResponse { .. })
            | CoreError::Llm(LlmError::InvalidResponseFormat { .. })
    )
}

/// Reads a relevance verdict: a JSON object with `relevant` or
/// `is_relevant`, possibly embedded in prose, otherwise the first standalone
/// yes/no word.
pub fn parse_verdict(reply: &str) -> Result<RelevanceVerdict, LlmError> {
    let stripped = strip_code_blocks(reply);
    if stripped.starts_with('{') {
        return verdict_from_object(&parse_json_object(stripped)?)
            .ok_or_else(|| LlmError::malformed("verdict object has no boolean 'relevant' field"));
    }
    if stripped.contains('{') {
        if let Some(verdict) = parse_json_object(stripped)
            .ok()
            .and_then(|object| verdict_from_object(&object))
        {
            return Ok(verdict);
        }
    }

    let relevant = stripped
        .split(|c: char| !c.is_alphanumeric())
        .find_map(|word| match word.to_ascii_lowercase().as_str() {
            "yes" => Some(true),
            "no" => Some(false),
            _ => None,
        })
        .ok_or_else(|| LlmError::malformed("reply contains no yes/no verdict"))?;

    Ok(RelevanceVerdict {
        relevant,
        rationale: truncate_chars(stripped, MAX_RATIONALE_CHARS).to_string(),
    })
}

fn verdict_from_object(object: &Map<String, Value>) -> Option<RelevanceVerdict> {
    let relevant = ["relevant", "is_relevant"]
        .iter()
        .find_map(|key| object.get(*key))
        .and_then(as_flag)?;
    let rationale = ["rationale", "reason"]
        .iter()
        .find_map(|key| object.get(*key))
        .and_then(Value::as_str)
        .unwrap_or_default();
    Some(RelevanceVerdict {
        relevant,
        rationale: truncate_chars(rationale.trim(), MAX_RATIONALE_CHARS).to_string(),
    })
}

fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Parses an extraction reply. List values become findings under their
/// key, `is_high_value` is read as a flag and other values are kept as
/// attributes.
pub fn parse_insights(reply: &str) -> Result<InsightRecord, LlmError> {
    let object = parse_json_object(reply)?;
    if object.contains_key("error") && !object.values().any(Value::is_array) {
        return Err(LlmError::malformed(format!(
            "model returned an error object: {}",
            object["error"]
        )));
    }

    let mut insights = InsightRecord::default();
    for (key, value) in object {
        match value {
            Value::Array(items) => {
                let findings = items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::String(s) => Some(s.trim().to_string()),
                        Value::Null => None,
                        other => Some(other.to_string()),
                    })
                    .filter(|s| !s.is_empty())
                    .collect();
                insights.findings.insert(key, findings);
            }
            value if key == HIGH_VALUE_KEY => {
                insights.is_high_value = as_flag(&value).ok_or_else(|| {
                    LlmError::malformed(format!("'{}' is not a boolean", HIGH_VALUE_KEY))
                })?;
            }
            value => {
                insights.attributes.insert(key, value);
            }
        }
    }

    if insights.findings.is_empty() {
        return Err(LlmError::malformed("reply has no list-valued findings"));
    }
    Ok(insights)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_from_plain_words() {
        assert!(parse_verdict("Yes").unwrap().relevant);
        assert!(parse_verdict("yes.").unwrap().relevant);
        assert!(!parse_verdict("No, this is about gaming").unwrap().relevant);
        // "yesterday" is not a standalone yes.
        assert!(!parse_verdict("Yesterday's thread: no").unwrap().relevant);
        assert!(parse_verdict("I cannot decide").is_err());
    }

    #[test]
    fn test_verdict_from_json() {
        let verdict = parse_verdict(r#"{"is_relevant": true, "rationale": "seniors and phishing"}"#)
            .unwrap();
        assert!(verdict.relevant);
        assert_eq!(verdict.rationale, "seniors and phishing");

        let verdict = parse_verdict("```json\n{\"relevant\": \"no\"}\n```").unwrap();
        assert!(!verdict.relevant);

        assert!(parse_verdict(r#"{"answer": 1}"#).is_err());
    }

    #[test]
    fn test_verdict_from_json_inside_prose() {
        let verdict = parse_verdict(r#"Here is my answer: {"relevant": true, "reason": "banking help"}"#)
            .unwrap();
        assert!(verdict.relevant);
        assert_eq!(verdict.rationale, "banking help");

        // Braces without a usable verdict fall back to the word scan.
        assert!(!parse_verdict("No {not json} here").unwrap().relevant);
        assert!(parse_verdict("Unsure {maybe}").is_err());
    }

    #[test]
    fn test_parse_insights_splits_fields() {
        let reply = r#"```json
        {
            "main_pain_points": ["Too many passwords", " ", "Scam calls"],
            "unmet_needs": [],
            "emotional_tone": "Frustration and anxiety",
            "is_high_value": true
        }
        ```"#;
        let insights = parse_insights(reply).unwrap();

        assert_eq!(
            insights.findings["main_pain_points"],
            vec!["Too many passwords", "Scam calls"]
        );
        assert!(insights.findings["unmet_needs"].is_empty());
        assert!(insights.is_high_value);
        assert_eq!(
            insights.attributes["emotional_tone"],
            Value::String("Frustration and anxiety".to_string())
        );
        assert_eq!(insights.finding_count(), 2);
    }

    #[test]
    fn test_parse_insights_rejects_bad_shapes() {
        assert!(parse_insights("not json at all").is_err());
        assert!(parse_insights(r#"["a", "b"]"#).is_err());
        assert!(parse_insights(r#"{"error": "could not analyze"}"#).is_err());
        assert!(parse_insights(r#"{"emotional_tone": "calm"}"#).is_err());
        assert!(parse_insights(r#"{"main_pain_points": [], "is_high_value": 3}"#).is_err());
    }
}
