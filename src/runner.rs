use crate::catalog::{ExecutionConfig, TestCase};
use crate::evaluation::evaluate_output;
use crate::models::{ExecutionMetadata, ExecutionRecord, RunSummary};
use crate::provider::{GenerationOptions, Provider};
use crate::store::TranscriptStore;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Hardcoded fallbacks when neither the test case nor the execution config
/// supplies a value
const FALLBACK_TEMPERATURE: f64 = 0.0;
const FALLBACK_MAX_TOKENS: u32 = 500;
const FALLBACK_TIMEOUT_SECS: u64 = 30;

/// Drives test cases through their repetitions, invoking the provider once
/// per repetition and appending one transcript per execution.
///
/// A single failed generation never halts the run: it is captured inline in
/// the record and counted, and the remaining repetitions and test cases
/// proceed.
pub struct Runner {
    provider: Box<dyn Provider>,
    store: TranscriptStore,
    sequence: AtomicU64,
}

impl Runner {
    pub fn new(provider: Box<dyn Provider>, store: TranscriptStore) -> Self {
        Self {
            provider,
            store,
            sequence: AtomicU64::new(0),
        }
    }

    /// Path of the transcript file this run appends to
    pub fn transcript_path(&self) -> &Path {
        self.store.path()
    }

    /// Execute every test case for its repetition count, in order
    pub async fn run_test_cases(
        &mut self,
        test_cases: &[TestCase],
        config: &ExecutionConfig,
    ) -> RunSummary {
        let mut summary = RunSummary {
            test_cases_run: test_cases.len(),
            ..Default::default()
        };

        for test_case in test_cases {
            info!(test_case = %test_case.id, "running test case");
            let repetitions = test_case.repetitions.unwrap_or(1);

            for repetition in 1..=repetitions {
                if repetitions > 1 {
                    debug!(repetition, total = repetitions, "repetition");
                }

                summary.total_executions += 1;
                match self.execute_and_record(test_case, config, repetition).await {
                    Ok(true) => summary.successful += 1,
                    Ok(false) => summary.failed += 1,
                    Err(e) => {
                        error!(
                            test_case = %test_case.id,
                            error = %e,
                            "failed to persist execution record"
                        );
                        summary.failed += 1;
                    }
                }
            }
        }

        summary
    }

    /// Execute one repetition and append its record. Returns whether the
    /// generation call itself succeeded; an evaluation is never a failure.
    async fn execute_and_record(
        &mut self,
        test_case: &TestCase,
        config: &ExecutionConfig,
        repetition: u32,
    ) -> Result<bool> {
        // Effective parameters: case override, then config default, then
        // the hardcoded fallback
        let temperature = test_case
            .temperature
            .or(config.default_temperature)
            .unwrap_or(FALLBACK_TEMPERATURE);
        let max_tokens = test_case
            .max_tokens
            .or(config.default_max_tokens)
            .unwrap_or(FALLBACK_MAX_TOKENS);
        let timeout_secs = config.request_timeout_secs.unwrap_or(FALLBACK_TIMEOUT_SECS);

        let options = GenerationOptions {
            temperature,
            max_tokens,
        };

        let timestamp = Utc::now();
        let execution_id = self.next_execution_id(&test_case.id, repetition, &timestamp);

        let started = Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            self.provider.generate(&test_case.input, &options),
        )
        .await;
        let execution_time_ms = started.elapsed().as_millis() as u64;

        let (output, generation_error) = match outcome {
            Ok(Ok(text)) => (Some(text), None),
            Ok(Err(e)) => (None, Some(format!("{:#}", e))),
            Err(_) => (
                None,
                Some(format!("generation timed out after {}s", timeout_secs)),
            ),
        };

        let evaluation = evaluate_output(test_case, output.as_deref());

        let record = ExecutionRecord {
            test_case_id: test_case.id.clone(),
            execution_id,
            timestamp: timestamp.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
            category: test_case.category,
            subcategory: test_case.subcategory.clone().unwrap_or_default(),
            repetition,
            input: test_case.input.clone(),
            output,
            metadata: ExecutionMetadata {
                model: self.provider.model_info().model,
                temperature,
                max_tokens,
                execution_time_ms,
            },
            evaluation,
            error: generation_error.clone(),
            severity: test_case.severity.clone(),
        };

        self.store.append(&record)?;

        match generation_error {
            None => Ok(true),
            Some(e) => {
                warn!(test_case = %test_case.id, repetition, error = %e, "generation failed");
                Ok(false)
            }
        }
    }

    /// Build a unique execution id. Seconds-resolution timestamps collide
    /// under rapid repeated calls, so the id also carries subsecond
    /// microseconds and a monotonic sequence number.
    fn next_execution_id(
        &self,
        test_id: &str,
        repetition: u32,
        timestamp: &DateTime<Utc>,
    ) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!(
            "{}_rep{}_{}_{:06}{:04x}",
            test_id,
            repetition,
            timestamp.format("%Y%m%d_%H%M%S"),
            timestamp.timestamp_subsec_micros(),
            seq & 0xffff
        )
    }
}
