use crate::metrics::{CategorySection, MetricsOutcome, MetricsReport};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Output format options
#[derive(Debug, Clone, Copy, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    Plain,
    Json,
}

/// Print the metrics document in the selected format
pub fn print_metrics(outcome: &MetricsOutcome, format: OutputFormat) {
    match format {
        OutputFormat::Plain => println!("{}", render_plain(outcome)),
        OutputFormat::Json => match serde_json::to_string_pretty(outcome) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Error serializing metrics to JSON: {}", e),
        },
    }
}

fn rate(value: f64) -> String {
    format!("{:.3}", value)
}

fn optional_rate(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a (no data)".to_string(), rate)
}

/// Render the metrics document as human-readable sections
pub fn render_plain(outcome: &MetricsOutcome) -> String {
    let report = match outcome {
        MetricsOutcome::Empty { error } => return format!("{}.", error),
        MetricsOutcome::Report(report) => report,
    };

    let mut out = String::new();
    render_summary(&mut out, report);
    render_determinism(&mut out, report);
    render_truthfulness(&mut out, report);
    render_effectiveness(&mut out, report);
    render_adversarial(&mut out, report);
    out
}

fn section_header(out: &mut String, title: &str) {
    let _ = writeln!(out, "=== {} ===", title);
}

fn render_note(out: &mut String, note: &str) {
    let _ = writeln!(out, "{}", note);
    let _ = writeln!(out);
}

fn render_summary(out: &mut String, report: &MetricsReport) {
    let summary = &report.test_campaign_summary;
    section_header(out, "TEST CAMPAIGN SUMMARY");
    let _ = writeln!(out, "Total executions:      {}", summary.total_executions);
    let _ = writeln!(out, "Successful executions: {}", summary.successful_executions);
    let _ = writeln!(out, "Failed executions:     {}", summary.failed_executions);
    let _ = writeln!(out, "By category:");
    for (category, count) in &summary.executions_by_category {
        let _ = writeln!(out, "  • {}: {}", category, count);
    }
    let _ = writeln!(out);
}

fn render_determinism(out: &mut String, report: &MetricsReport) {
    section_header(out, "DETERMINISM");
    match &report.determinism {
        CategorySection::NoData { note } => render_note(out, note),
        CategorySection::Data(det) => {
            let _ = writeln!(
                out,
                "Mean decision consistency: {}",
                rate(det.mean_decision_consistency)
            );
            let _ = writeln!(out, "Test cases evaluated:      {}", det.test_cases_evaluated);
            if det.cases_below_threshold.is_empty() {
                let _ = writeln!(out, "All test cases at or above the consistency threshold");
            } else {
                let _ = writeln!(out, "Below threshold:");
                for case in &det.cases_below_threshold {
                    let _ = writeln!(out, "  • {}: {}", case.test_case_id, rate(case.consistency));
                }
            }
            for (test_id, score) in &det.per_test_case {
                let _ = writeln!(
                    out,
                    "  {} → consistency {} over {} decisions",
                    test_id,
                    rate(score.consistency_rate),
                    score.repetitions
                );
            }
            let _ = writeln!(out);
        }
    }
}

fn render_truthfulness(out: &mut String, report: &MetricsReport) {
    section_header(out, "TRUTHFULNESS");
    match &report.truthfulness {
        CategorySection::NoData { note } => render_note(out, note),
        CategorySection::Data(truth) => {
            let _ = writeln!(out, "Factual accuracy:     {}", optional_rate(truth.factual_accuracy));
            let _ = writeln!(out, "Hallucination rate:   {}", optional_rate(truth.hallucination_rate));
            let _ = writeln!(out, "Test cases evaluated: {}", truth.test_cases_evaluated);
            let _ = writeln!(out);
        }
    }
}

fn render_effectiveness(out: &mut String, report: &MetricsReport) {
    section_header(out, "EFFECTIVENESS");
    match &report.effectiveness {
        CategorySection::NoData { note } => render_note(out, note),
        CategorySection::Data(eff) => {
            let _ = writeln!(
                out,
                "Task completion rate: {}",
                optional_rate(eff.task_completion_rate)
            );
            let _ = writeln!(out, "Test cases evaluated: {}", eff.test_cases_evaluated);
            let _ = writeln!(out);
        }
    }
}

fn render_adversarial(out: &mut String, report: &MetricsReport) {
    section_header(out, "ADVERSARIAL");
    match &report.adversarial {
        CategorySection::NoData { note } => render_note(out, note),
        CategorySection::Data(adv) => {
            let _ = writeln!(out, "Attack resistance rate: {}", rate(adv.attack_resistance_rate));
            let _ = writeln!(out, "Safety bypass rate:     {}", rate(adv.safety_bypass_rate));
            let _ = writeln!(out, "Total tests:            {}", adv.total_tests);
            let _ = writeln!(out, "Violations:             {}", adv.violations);
            if adv.critical_failures.is_empty() {
                let _ = writeln!(out, "No critical failures");
            } else {
                let _ = writeln!(out, "Critical failures ({}):", adv.critical_failure_count);
                for failure in &adv.critical_failures {
                    let _ = writeln!(
                        out,
                        "  • {} [{}]",
                        failure.test_case_id,
                        if failure.subcategory.is_empty() {
                            "-"
                        } else {
                            &failure.subcategory
                        }
                    );
                }
            }
            let _ = writeln!(out);
        }
    }
}
