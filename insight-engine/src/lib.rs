pub mod context;
pub mod extractor;
pub mod prompts;
pub mod synthesizer;

pub use context::{build_filter_content, build_thread_context, ThreadContext};
pub use extractor::{parse_insights, parse_verdict, ExtractionRun, InsightExtractor};
pub use synthesizer::{aggregate_findings, build_report_context, group_raw, Synthesis, ThemeSynthesizer};
