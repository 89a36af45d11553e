pub mod concept;
pub mod error;
pub mod error_utils;
pub mod rate_limiter;
pub mod retry;
pub mod settings;
pub mod text;
pub mod types;

pub use concept::{AnalysisCategory, ConceptConfig};
pub use error::*;
pub use error_utils::*;
pub use rate_limiter::{RateLimitedClient, RequestPacer};
pub use retry::{RetryConfig, RetryExecutor, RetryMetrics};
pub use settings::*;
pub use types::*;
