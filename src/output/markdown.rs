//! Markdown summary generation
//!
//! This module renders a [`JobReport`] as a human-readable markdown file,
//! including category outcomes, data quality, and a product sample.

use crate::output::report::{JobReport, OutputResult};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Products listed in the sample table
const PRODUCT_SAMPLE: usize = 20;

/// Writes a markdown summary of a job report
///
/// Parent directories of `output_path` are created as needed.
///
/// # Arguments
///
/// * `report` - The job report
/// * `output_path` - Path where the markdown file should be written
///
/// # Returns
///
/// * `Ok(())` - Successfully wrote markdown summary
/// * `Err(OutputError)` - Failed to write summary
pub fn write_markdown_summary(report: &JobReport, output_path: &Path) -> OutputResult<()> {
    let markdown = format_markdown_summary(report);

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a job report as markdown
pub fn format_markdown_summary(report: &JobReport) -> String {
    let mut md = String::new();

    md.push_str(&format!("# Crawl Summary: {}\n\n", report.site_domain));

    // Job metadata
    md.push_str("## Job Information\n\n");
    md.push_str(&format!("- **Checkpoint**: {}\n", report.checkpoint_id));
    md.push_str(&format!("- **Job Type**: {}\n", report.job_type));
    md.push_str(&format!("- **Status**: {}\n", report.status));
    md.push_str(&format!("- **Pipeline Step**: {}\n", report.pipeline_step));
    md.push_str(&format!(
        "- **Elapsed**: {:.2} seconds\n",
        report.elapsed.as_secs_f64()
    ));
    if let Some(details) = &report.error_details {
        md.push_str(&format!(
            "- **Failure**: {} (`{}`)\n",
            escape_cell(&details.message),
            details.code
        ));
    }
    md.push('\n');

    // Categories
    md.push_str("## Categories\n\n");
    md.push_str("| Metric | Count |\n");
    md.push_str("|--------|-------|\n");
    md.push_str(&format!("| Discovered | {} |\n", report.categories_discovered));
    md.push_str(&format!("| Targeted | {} |\n", report.categories_targeted));
    md.push_str(&format!("| Succeeded | {} |\n", report.categories_succeeded));
    md.push_str(&format!("| Failed | {} |\n", report.categories_failed));
    md.push_str(&format!("| Pages Visited | {} |\n\n", report.pages_visited));
    md.push_str(&format!(
        "- **Success Rate**: {:.2}%\n\n",
        report.success_rate()
    ));

    // Data quality
    let quality = &report.quality;
    md.push_str("## Data Quality\n\n");
    md.push_str(&format!("- **Records Extracted**: {}\n", quality.total_records));
    md.push_str(&format!("- **Unique Products**: {}\n", quality.unique_products));
    md.push_str(&format!(
        "- **Duplicates Skipped**: {}\n",
        quality.duplicates_skipped
    ));
    md.push_str(&format!(
        "- **Complete Records**: {} ({:.2}%)\n\n",
        quality.complete_records,
        quality.completeness_ratio * 100.0
    ));

    if !report.errors.is_empty() {
        md.push_str("## Category Errors\n\n");
        md.push_str("| Category | URL | Code | Message |\n");
        md.push_str("|----------|-----|------|---------|\n");
        for failure in &report.errors {
            md.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                escape_cell(&failure.category_name),
                failure.category_url,
                failure.code,
                escape_cell(&failure.message)
            ));
        }
        md.push('\n');
    }

    if !report.products.is_empty() {
        md.push_str("## Products\n\n");
        md.push_str("| Name | URL |\n");
        md.push_str("|------|-----|\n");
        for item in report.products.iter().take(PRODUCT_SAMPLE) {
            md.push_str(&format!(
                "| {} | {} |\n",
                escape_cell(item.name().unwrap_or("-")),
                item.url
            ));
        }
        if report.products.len() > PRODUCT_SAMPLE {
            md.push_str(&format!(
                "\n_{} more not shown._\n",
                report.products.len() - PRODUCT_SAMPLE
            ));
        }
        md.push('\n');
    }

    md
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}
