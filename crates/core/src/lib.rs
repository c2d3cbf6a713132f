//! Core library: feature extraction, assembly and complexity classification,
//! corpus scanning, criteria-based selection and the CSV report.

pub mod assembly;
pub mod classifier;
pub mod config;
pub mod criteria;
pub mod error;
pub mod extractor;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod revision;
pub mod scanner;
pub mod selection;
