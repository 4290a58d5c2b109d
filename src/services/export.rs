//! Journal export artifacts for the external accounting system. A journal
//! closed as successful is rendered to a journal-format CSV and handed to
//! the exporter; export failure is logged and metered, never unwinding the
//! close that already committed.

use crate::config::ExportConfig;
use crate::error::AppError;
use crate::models::{Journal, JournalRow};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

/// Snapshot of a successfully closed journal, as handed to the exporter.
#[derive(Debug, Clone)]
pub struct JournalExport {
    pub journal_id: Uuid,
    pub journal_date: chrono::NaiveDate,
    pub reference: Option<String>,
    pub amount: Decimal,
    pub rows: Vec<JournalRow>,
}

impl JournalExport {
    pub fn from_journal(journal: &Journal, rows: Vec<JournalRow>) -> Self {
        Self {
            journal_id: journal.journal_id,
            journal_date: journal.journal_date,
            reference: journal.reference.clone(),
            amount: journal.amount,
            rows,
        }
    }

    /// Render the general-ledger CSV: one line per journal row, amounts in
    /// plain decimal.
    pub fn to_csv(&self) -> String {
        let mut out = String::from("journal_date,account_id,amount,description\n");
        for row in &self.rows {
            out.push_str(&format!(
                "{},{},{},\"{}\"\n",
                self.journal_date,
                row.account_id,
                row.amount,
                row.description.replace('"', "\"\"")
            ));
        }
        out
    }
}

/// Export seam. The transfer mechanism (spool directory, queue, upload)
/// stays outside the journal lifecycle; a test exporter records calls.
#[async_trait]
pub trait JournalExporter: Send + Sync {
    async fn export(&self, export: &JournalExport) -> Result<(), AppError>;
}

/// Writes the CSV artifact into a spool directory picked up by the
/// accounting transfer job. Without a configured directory it logs and
/// reports success, mirroring disabled SMTP delivery.
pub struct CsvJournalExporter {
    output_dir: Option<PathBuf>,
}

impl CsvJournalExporter {
    pub fn new(config: &ExportConfig) -> Self {
        Self {
            output_dir: config.output_dir.clone().map(PathBuf::from),
        }
    }
}

#[async_trait]
impl JournalExporter for CsvJournalExporter {
    async fn export(&self, export: &JournalExport) -> Result<(), AppError> {
        let dir = match &self.output_dir {
            Some(dir) => dir,
            None => {
                info!(journal_id = %export.journal_id, "Export disabled, skipping artifact");
                return Ok(());
            }
        };

        let path = dir.join(format!("journal-{}.csv", export.journal_id));
        tokio::fs::write(&path, export.to_csv()).await.map_err(|e| {
            AppError::InternalError(anyhow::anyhow!(
                "Failed to write journal export {}: {}",
                path.display(),
                e
            ))
        })?;

        info!(journal_id = %export.journal_id, path = %path.display(), "Journal export written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn export_with_row(description: &str) -> JournalExport {
        JournalExport {
            journal_id: Uuid::new_v4(),
            journal_date: chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            reference: None,
            amount: Decimal::new(7500, 2),
            rows: vec![JournalRow {
                journal_row_id: Uuid::new_v4(),
                journal_id: Uuid::new_v4(),
                order_detail_id: Uuid::new_v4(),
                account_id: Uuid::new_v4(),
                amount: Decimal::new(7500, 2),
                description: description.to_string(),
                created_utc: Utc::now(),
            }],
        }
    }

    #[test]
    fn csv_has_a_header_and_one_line_per_row() {
        let export = export_with_row("widget run");
        let csv = export.to_csv();
        assert!(csv.starts_with("journal_date,account_id,amount,description\n"));
        assert_eq!(csv.lines().count(), 2);
        assert!(csv.contains("2024-03-01"));
        assert!(csv.contains("75.00"));
    }

    #[test]
    fn csv_escapes_quotes_in_descriptions() {
        let export = export_with_row("the \"big\" order");
        assert!(export.to_csv().contains("\"the \"\"big\"\" order\""));
    }
}
