pub mod blob_file;
pub mod diagnostics;
pub mod fade_report;
