use crate::models::{Category, PatternSpec};
use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A single test case from the catalog, consumed read-only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    /// Unique identifier within the catalog
    pub id: String,
    pub category: Category,
    #[serde(default)]
    pub subcategory: Option<String>,
    /// Prompt text sent to the generation provider
    pub input: String,
    /// Repetition count, required (≥ 2) for determinism cases
    #[serde(default)]
    pub repetitions: Option<u32>,
    /// Per-case temperature override
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Per-case max output tokens override
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub expected_decision: Option<String>,
    /// Expected fact entries; each may hold " OR "-separated variants
    #[serde(default)]
    pub expected_facts: Option<Vec<String>>,
    #[serde(default)]
    pub success_criteria: Option<Vec<String>>,
    /// Minimum criteria that must match; defaults to all of them
    #[serde(default)]
    pub min_criteria_met: Option<usize>,
    #[serde(default)]
    pub unacceptable_responses: Option<Vec<PatternSpec>>,
    #[serde(default)]
    pub acceptable_response_patterns: Option<Vec<PatternSpec>>,
    /// Required for adversarial cases; validated but not scored
    #[serde(default)]
    pub expected_behavior: Option<String>,
}

/// Execution defaults from the catalog's `execution_config` block
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub default_temperature: Option<f64>,
    #[serde(default)]
    pub default_max_tokens: Option<u32>,
    /// Upper bound on a single generation call
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

/// A loaded test case catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub catalog_version: Option<String>,
    #[serde(default)]
    pub use_case_id: Option<String>,
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub execution_config: Option<ExecutionConfig>,
}

impl Catalog {
    /// Load and validate a YAML catalog. Any structural or per-case
    /// validation problem is fatal; nothing executes on a bad catalog.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog: {}", path.display()))?;

        let catalog: Catalog = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML catalog: {}", path.display()))?;

        for test_case in &catalog.test_cases {
            validate_test_case(test_case)?;
        }

        Ok(catalog)
    }

    /// Look up a test case by ID
    pub fn get(&self, test_id: &str) -> Option<&TestCase> {
        self.test_cases.iter().find(|tc| tc.id == test_id)
    }

    /// Filter test cases by category, subcategory, and/or tags. A tags
    /// filter keeps cases with at least one matching tag.
    pub fn filter(
        &self,
        category: Option<Category>,
        subcategory: Option<&str>,
        tags: Option<&[String]>,
    ) -> Vec<&TestCase> {
        self.test_cases
            .iter()
            .filter(|tc| category.map_or(true, |c| tc.category == c))
            .filter(|tc| subcategory.map_or(true, |s| tc.subcategory.as_deref() == Some(s)))
            .filter(|tc| {
                tags.map_or(true, |wanted| {
                    tc.tags
                        .as_deref()
                        .map_or(false, |have| wanted.iter().any(|t| have.contains(t)))
                })
            })
            .collect()
    }
}

/// Validate category-specific requirements for one test case
pub fn validate_test_case(test_case: &TestCase) -> Result<()> {
    if test_case.category == Category::Determinism {
        match test_case.repetitions {
            None => bail!(
                "Determinism test case {} missing 'repetitions'",
                test_case.id
            ),
            Some(n) if n < 2 => bail!(
                "Test case {} 'repetitions' must be an integer >= 2",
                test_case.id
            ),
            Some(_) => {}
        }
    }

    if test_case.category == Category::Adversarial && test_case.expected_behavior.is_none() {
        bail!(
            "Adversarial test case {} missing 'expected_behavior'",
            test_case.id
        );
    }

    Ok(())
}

/// Match a test case ID against a shell-style wildcard pattern
/// (`*` matches any run of characters, `?` a single character)
pub fn matches_id_pattern(test_id: &str, pattern: &str) -> bool {
    let translated = regex::escape(pattern).replace("\\*", ".*").replace("\\?", ".");
    Regex::new(&format!("^{}$", translated))
        .map(|re| re.is_match(test_id))
        .unwrap_or(false)
}
