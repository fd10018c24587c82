//! Data-quality statistics and console reporting
//!
//! This module measures the extracted records of a job and prints a
//! [`JobReport`] to stdout.

use crate::catalog::ListingItem;
use crate::crawler::CategoryResult;
use crate::output::JobReport;
use serde::Serialize;
use std::collections::HashSet;

/// Completeness of the extracted records
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataQuality {
    /// Records extracted across all categories, duplicates included
    pub total_records: usize,

    /// Distinct products by item key
    pub unique_products: usize,

    /// Records dropped because another category already yielded the product
    pub duplicates_skipped: usize,

    /// Unique products with a non-empty name
    pub complete_records: usize,

    /// `complete_records / unique_products`, 0 when nothing was extracted
    pub completeness_ratio: f64,
}

impl DataQuality {
    pub fn measure(total_records: usize, unique: &[ListingItem]) -> Self {
        let complete_records = unique.iter().filter(|item| item.name().is_some()).count();
        let completeness_ratio = if unique.is_empty() {
            0.0
        } else {
            complete_records as f64 / unique.len() as f64
        };

        Self {
            total_records,
            unique_products: unique.len(),
            duplicates_skipped: total_records.saturating_sub(unique.len()),
            complete_records,
            completeness_ratio,
        }
    }
}

/// Products of all results, first occurrence of each item key kept
pub fn dedup_products(results: &[CategoryResult]) -> Vec<ListingItem> {
    let mut seen = HashSet::new();
    results
        .iter()
        .flat_map(|r| r.products.iter())
        .filter(|item| seen.insert(item.item_key.as_str()))
        .cloned()
        .collect()
}

/// Prints a job report to stdout in a formatted manner
///
/// # Arguments
///
/// * `report` - The report to display
pub fn print_report(report: &JobReport) {
    println!("=== Crawl Report ===\n");

    println!("Job:");
    println!("  Checkpoint: {}", report.checkpoint_id);
    println!("  Site: {} ({})", report.site_domain, report.job_type);
    println!("  Status: {} at step {}", report.status, report.pipeline_step);
    println!("  Elapsed: {:.1}s", report.elapsed.as_secs_f64());
    if let Some(details) = &report.error_details {
        println!("  Failure: {} [{}]", details.message, details.code);
    }
    println!();

    println!("Categories:");
    println!("  Discovered: {}", report.categories_discovered);
    println!("  Targeted: {}", report.categories_targeted);
    println!(
        "  Succeeded: {} ({:.1}%)",
        report.categories_succeeded,
        report.success_rate()
    );
    println!("  Failed: {}", report.categories_failed);
    println!("  Pages visited: {}", report.pages_visited);
    println!();

    let quality = &report.quality;
    println!("Data Quality:");
    println!("  Records extracted: {}", quality.total_records);
    println!("  Unique products: {}", quality.unique_products);
    println!("  Duplicates skipped: {}", quality.duplicates_skipped);
    println!(
        "  Complete records: {} ({:.1}%)",
        quality.complete_records,
        quality.completeness_ratio * 100.0
    );
    println!();

    if !report.errors.is_empty() {
        println!("Errors ({}):", report.errors.len());
        for failure in &report.errors {
            println!(
                "  - {} [{}]: {}",
                failure.category_url, failure.code, failure.message
            );
        }
        println!();
    }
}
