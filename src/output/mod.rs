//! Output module for crawl job reports
//!
//! This module handles:
//! - Building a [`JobReport`] from a checkpoint record
//! - Measuring data quality of the extracted products
//! - Printing reports and writing markdown summaries

mod markdown;
mod report;
pub mod stats;

pub use markdown::{format_markdown_summary, write_markdown_summary};
pub use report::{CategoryFailure, JobReport, OutputError, OutputResult};
pub use stats::{print_report, DataQuality};
