use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Cluster key for findings whose category is not declared by the concept.
pub const UNCATEGORIZED_KEY: &str = "uncategorized";

/// The query path that surfaced a post.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryOrigin {
    Keyword { subreddit: String, keyword: String },
    Top { subreddit: String, time_filter: String },
}

impl fmt::Display for QueryOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryOrigin::Keyword { subreddit, keyword } => {
                write!(f, "search '{}' in r/{}", keyword, subreddit)
            }
            QueryOrigin::Top {
                subreddit,
                time_filter,
            } => write!(f, "top ({}) in r/{}", time_filter, subreddit),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: String,
    pub body: String,
    pub author: String,
    pub score: i64,
    pub created_utc: f64,
    pub depth: u32,
    #[serde(default)]
    pub replies: Vec<CommentRecord>,
}

impl CommentRecord {
    /// Depth of the deepest node in this subtree.
    pub fn max_depth(&self) -> u32 {
        let mut deepest = self.depth;
        let mut stack: Vec<&CommentRecord> = self.replies.iter().collect();
        while let Some(node) = stack.pop() {
            deepest = deepest.max(node.depth);
            stack.extend(node.replies.iter());
        }
        deepest
    }

    /// Largest number of direct replies held by any node in this subtree.
    pub fn max_branching(&self) -> usize {
        let mut widest = 0;
        let mut stack: Vec<&CommentRecord> = vec![self];
        while let Some(node) = stack.pop() {
            widest = widest.max(node.replies.len());
            stack.extend(node.replies.iter());
        }
        widest
    }

    pub fn subtree_len(&self) -> usize {
        let mut count = 0;
        let mut stack: Vec<&CommentRecord> = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.replies.iter());
        }
        count
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub permalink: String,
    pub subreddit: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub num_comments: u64,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub query_origins: Vec<QueryOrigin>,
    #[serde(default)]
    pub comments: Vec<CommentRecord>,
}

impl ThreadRecord {
    /// Records another discovery path. Returns false if it was already known.
    pub fn add_origin(&mut self, origin: QueryOrigin) -> bool {
        if self.query_origins.contains(&origin) {
            false
        } else {
            self.query_origins.push(origin);
            true
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelevanceVerdict {
    pub relevant: bool,
    pub rationale: String,
}

/// Structured insight extracted from one thread.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsightRecord {
    /// category key -> extracted snippets
    #[serde(default)]
    pub findings: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub is_high_value: bool,
    /// Non-list fields returned by the model, e.g. `emotional_tone`.
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl InsightRecord {
    pub fn finding_count(&self) -> usize {
        self.findings.values().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Filter,
    Extraction,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureStage::Filter => f.write_str("filter"),
            FailureStage::Extraction => f.write_str("extraction"),
        }
    }
}

/// Per-thread processing status of the extraction stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Filtering,
    FilteredOut,
    Relevant,
    Extracting,
    Success,
    Failed,
}

impl ProcessingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessingStatus::FilteredOut | ProcessingStatus::Success | ProcessingStatus::Failed
        )
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Filtering => "filtering",
            ProcessingStatus::FilteredOut => "filtered_out",
            ProcessingStatus::Relevant => "relevant",
            ProcessingStatus::Extracting => "extracting",
            ProcessingStatus::Success => "success",
            ProcessingStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Terminal outcome of the extraction stage, tagged by status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExtractionOutcome {
    FilteredOut {
        verdict: RelevanceVerdict,
    },
    Success {
        verdict: RelevanceVerdict,
        insights: InsightRecord,
        attempts: u32,
    },
    Failed {
        stage: FailureStage,
        reason: String,
        attempts: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        verdict: Option<RelevanceVerdict>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw_response: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub post_id: String,
    pub post_title: String,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub subreddit: String,
    pub processed_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: ExtractionOutcome,
}

impl ExtractionResult {
    pub fn new(thread: &ThreadRecord, outcome: ExtractionOutcome) -> Self {
        Self {
            post_id: thread.id.clone(),
            post_title: thread.title.clone(),
            permalink: thread.permalink.clone(),
            subreddit: thread.subreddit.clone(),
            processed_at: Utc::now(),
            outcome,
        }
    }

    pub fn status(&self) -> ProcessingStatus {
        match self.outcome {
            ExtractionOutcome::FilteredOut { .. } => ProcessingStatus::FilteredOut,
            ExtractionOutcome::Success { .. } => ProcessingStatus::Success,
            ExtractionOutcome::Failed { .. } => ProcessingStatus::Failed,
        }
    }

    pub fn insights(&self) -> Option<&InsightRecord> {
        match &self.outcome {
            ExtractionOutcome::Success { insights, .. } => Some(insights),
            _ => None,
        }
    }

    pub fn verdict(&self) -> Option<&RelevanceVerdict> {
        match &self.outcome {
            ExtractionOutcome::FilteredOut { verdict } => Some(verdict),
            ExtractionOutcome::Success { verdict, .. } => Some(verdict),
            ExtractionOutcome::Failed { verdict, .. } => verdict.as_ref(),
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.outcome {
            ExtractionOutcome::Failed { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// A finding with a back-reference to the thread it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snippet {
    pub text: String,
    pub source_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
    pub name: String,
    pub count: usize,
    #[serde(default)]
    pub example_items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThemeCluster {
    pub category_key: String,
    pub display_name: String,
    pub description: String,
    pub snippets: Vec<Snippet>,
    pub count: usize,
    pub themes: Vec<Theme>,
    /// True when `themes` came from the LLM clustering pass.
    pub clustered: bool,
}

impl ThemeCluster {
    pub fn is_uncategorized(&self) -> bool {
        self.category_key == UNCATEGORIZED_KEY
    }
}
