use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Test case category, determines which evaluation applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Determinism,
    Truthfulness,
    Effectiveness,
    Adversarial,
    /// Any category without a defined evaluation
    #[serde(other)]
    Other,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Determinism => "determinism",
            Category::Truthfulness => "truthfulness",
            Category::Effectiveness => "effectiveness",
            Category::Adversarial => "adversarial",
            Category::Other => "other",
        };
        write!(f, "{}", name)
    }
}

/// How a response pattern is matched against output text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    #[default]
    Contains,
    Regex,
}

/// A pattern specification for adversarial response checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSpec {
    pub pattern: String,
    #[serde(rename = "type", default)]
    pub pattern_type: PatternType,
}

/// Generation call parameters recorded alongside each execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    /// Model identifier reported by the provider
    pub model: String,
    /// Effective temperature used for the call
    pub temperature: f64,
    /// Effective max output tokens used for the call
    pub max_tokens: u32,
    /// Wall-clock duration of the generation call
    pub execution_time_ms: u64,
}

/// Category-shaped evaluation of one output.
///
/// Only the fields for the test case's category are populated; every field
/// absent from the record means the corresponding check did not apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_decision: Option<String>,
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub match_expected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facts_present: Option<Vec<bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_facts_present: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unacceptable_pattern_violations: Option<Vec<PatternSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_violations: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptable_pattern_matches: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria_met: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_criteria: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passes_threshold: Option<bool>,
}

impl Evaluation {
    /// True when no check produced any result (null output or no evaluation
    /// defined for the category)
    pub fn is_empty(&self) -> bool {
        *self == Evaluation::default()
    }
}

/// One persisted transcript: a single (test case, repetition) execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub test_case_id: String,
    /// Unique per execution, even under rapid repeated calls
    pub execution_id: String,
    /// ISO-8601 UTC timestamp of the execution
    pub timestamp: String,
    pub category: Category,
    #[serde(default)]
    pub subcategory: String,
    /// 1-based repetition ordinal
    pub repetition: u32,
    pub input: String,
    /// Generated text, or null when the generation call failed
    pub output: Option<String>,
    pub metadata: ExecutionMetadata,
    #[serde(default)]
    pub evaluation: Evaluation,
    /// Generation error message, present only for failed executions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Severity carried over from the test case, consumed by aggregation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
}

/// Run-level counters returned by the runner
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_executions: usize,
    pub successful: usize,
    pub failed: usize,
    pub test_cases_run: usize,
}
