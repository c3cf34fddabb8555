//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// Token estimation weights (tokens per character)
pub mod tokens {
    /// CJK ideographs, kana and hangul
    pub const CJK_WEIGHT: f64 = 1.5;

    /// ASCII/Latin letters
    pub const LATIN_WEIGHT: f64 = 0.25;

    /// Digits, punctuation, whitespace and everything else
    pub const OTHER_WEIGHT: f64 = 0.5;
}

/// Content segmentation constants
pub mod segmentation {
    /// Fraction of the input budget content may use before it is segmented
    pub const SAFETY_RATIO: f64 = 0.9;

    /// A sentence break inside this many trailing characters of a chunk is ignored
    pub const MIN_TAIL_CHARS: usize = 50;

    /// Default chunk size in characters
    pub const DEFAULT_CHUNK_SIZE: usize = 8000;

    /// Default overlap between adjacent chunks in characters
    pub const DEFAULT_OVERLAP: usize = 200;

    /// Default cap on the number of segments per request
    pub const DEFAULT_MAX_SEGMENTS: usize = 6;

    /// Sentence-terminal punctuation (Latin and CJK)
    pub const SENTENCE_TERMINALS: &[char] = &['.', '!', '?', '。', '！', '？', '；', '…'];
}

/// Model backend timeout constants
pub mod timeout {
    /// Base request timeout (seconds)
    pub const BASE_SECS: u64 = 120;

    /// Added per chat message (seconds)
    pub const PER_MESSAGE_SECS: u64 = 2;

    /// One second is added per this many input characters
    pub const CHARS_PER_SEC: u64 = 1000;

    /// One second is added per this many requested output tokens
    pub const OUTPUT_TOKENS_PER_SEC: u64 = 100;

    /// Lower clamp (seconds)
    pub const MIN_SECS: u64 = 120;

    /// Upper clamp (seconds), applied before retry escalation
    pub const MAX_SECS: u64 = 300;

    /// Extra patience granted on every retry attempt (seconds)
    pub const RETRY_ESCALATION_SECS: u64 = 15;
}

/// Model backend retry constants
pub mod retry {
    /// Default number of retries after the first attempt
    pub const DEFAULT_MAX_RETRIES: usize = 2;

    /// Base delay for exponential backoff (milliseconds)
    pub const BASE_DELAY_MS: u64 = 1000;

    /// Maximum delay between retries (milliseconds)
    pub const MAX_DELAY_MS: u64 = 5000;

    /// Backoff multiplier
    pub const BACKOFF_FACTOR: f32 = 2.0;
}

/// Generation defaults
pub mod generation {
    pub const DEFAULT_TEMPERATURE: f32 = 0.3;
    pub const DEFAULT_TOP_P: f32 = 0.9;
    pub const DEFAULT_MAX_TOKENS: u32 = 4000;

    /// Context window assumed for models missing from the registry
    pub const DEFAULT_CONTEXT_WINDOW: u32 = 32_000;

    /// Floor for the input budget when max_tokens eats most of the window
    pub const MIN_INPUT_TOKENS: u32 = 1_000;
}

/// Fault-isolation fallback values
pub mod fallback {
    /// Confidence assigned to a failed analyst call
    pub const FAILED_CONFIDENCE: f64 = 0.1;

    /// Ceiling for confidence on any unsuccessful result
    pub const MAX_FAILED_CONFIDENCE: f64 = 0.2;

    pub const INSIGHT: &str = "data unavailable";
    pub const RISKS: &[&str] = &["incomplete data", "analysis may be unreliable"];
}

/// Final decision synthesis constants
pub mod decision {
    /// Confidence never drops below this
    pub const MIN_CONFIDENCE: f64 = 0.1;

    /// Synthesizer confidence assumed when it succeeded without reporting one
    pub const DEFAULT_SYNTH_CONFIDENCE: f64 = 0.5;

    /// Confidence ceiling for the score-averaging fallback
    pub const FALLBACK_CONFIDENCE_SCALE: f64 = 0.6;

    /// Average score at or above which the fallback recommends buy
    pub const BUY_THRESHOLD: f64 = 70.0;

    /// Average score at or above which the fallback recommends hold
    pub const HOLD_THRESHOLD: f64 = 40.0;

    /// Score used when no successful agent reported one
    pub const NEUTRAL_SCORE: f64 = 50.0;

    /// Insights borrowed from each successful agent in fallback mode
    pub const FACTORS_PER_AGENT: usize = 2;
}

/// Execution store constants
pub mod store {
    /// Prefix of every per-agent-type partition table
    pub const TABLE_PREFIX: &str = "agent_exec_";

    /// Default retention window for cleanup (days)
    pub const DEFAULT_RETENTION_DAYS: u32 = 90;

    /// Default row limit for cross-shard queries
    pub const DEFAULT_QUERY_LIMIT: usize = 500;

    /// SQLite busy timeout (milliseconds)
    pub const BUSY_TIMEOUT_MS: u32 = 5000;

    /// Connection pool size
    pub const POOL_SIZE: u32 = 8;
}

/// Report rendering constants
pub mod report {
    /// Characters of each agent's analysis shown in the report table
    pub const ANALYSIS_PREVIEW_CHARS: usize = 120;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_bounds_are_ordered() {
        assert!(timeout::MIN_SECS <= timeout::BASE_SECS);
        assert!(timeout::BASE_SECS < timeout::MAX_SECS);
    }

    #[test]
    fn test_fallback_confidence_is_low() {
        assert!(fallback::FAILED_CONFIDENCE <= fallback::MAX_FAILED_CONFIDENCE);
        assert!(decision::MIN_CONFIDENCE <= fallback::MAX_FAILED_CONFIDENCE);
    }

    #[test]
    fn test_decision_thresholds() {
        assert!(decision::HOLD_THRESHOLD < decision::BUY_THRESHOLD);
        assert!(decision::NEUTRAL_SCORE >= decision::HOLD_THRESHOLD);
    }
}
