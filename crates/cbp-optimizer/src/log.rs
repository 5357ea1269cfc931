//! Append-only CSV logs written while a study runs.
//!
//! Every row is flushed and synced as soon as it is written so an interrupted
//! study keeps the trials it completed.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use cbp_types::{CbpError, CbpResult};
use chrono::Local;
use tracing::info;

use crate::search::ParameterSet;

pub const STUDY_REPORT_FILE: &str = "study_report.csv";

fn csv_error(e: csv::Error) -> CbpError {
    CbpError::Csv(e.to_string())
}

struct SyncedCsv {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl SyncedCsv {
    fn new(path: PathBuf, file: File, header: &[String]) -> CbpResult<Self> {
        let mut csv = Self {
            path,
            writer: csv::Writer::from_writer(file),
        };
        csv.write_row(header)?;
        Ok(csv)
    }

    fn write_row(&mut self, row: &[String]) -> CbpResult<()> {
        self.writer.write_record(row).map_err(csv_error)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }
}

/// Per-search trial log: `Trial, MPKI, <parameters...>, Result folder`.
pub struct TrialLog {
    csv: SyncedCsv,
    parameters: Vec<String>,
}

impl TrialLog {
    /// Create `trials-<timestamp>.csv` in `dir`, never overwriting an
    /// existing log.
    pub fn create(dir: &Path, parameters: &[String]) -> CbpResult<Self> {
        std::fs::create_dir_all(dir)?;
        let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();

        let mut attempt = 0;
        let (path, file) = loop {
            let name = if attempt == 0 {
                format!("trials-{stamp}.csv")
            } else {
                format!("trials-{stamp}-{attempt}.csv")
            };
            let path = dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => break (path, file),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        };

        let mut header = vec!["Trial".to_string(), "MPKI".to_string()];
        header.extend(parameters.iter().cloned());
        header.push("Result folder".to_string());

        info!("Logging trials to {}", path.display());
        Ok(Self {
            csv: SyncedCsv::new(path, file, &header)?,
            parameters: parameters.to_vec(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.csv.path
    }

    pub fn append(
        &mut self,
        trial: usize,
        mpki: f64,
        params: &ParameterSet,
        result_dir: &Path,
    ) -> CbpResult<()> {
        let mut row = vec![trial.to_string(), mpki.to_string()];
        row.extend(
            self.parameters
                .iter()
                .map(|name| params.get(name).map(|v| v.to_string()).unwrap_or_default()),
        );
        row.push(result_dir.display().to_string());
        self.csv.write_row(&row)
    }
}

/// Study-wide report: `Index, MPKI, <study table header...>`.
pub struct StudyReport {
    csv: SyncedCsv,
}

impl StudyReport {
    /// Create (truncating) the report at `path`.
    pub fn create(path: &Path, table_header: &[String]) -> CbpResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;

        let mut header = vec!["Index".to_string(), "MPKI".to_string()];
        header.extend(table_header.iter().cloned());

        Ok(Self {
            csv: SyncedCsv::new(path.to_path_buf(), file, &header)?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.csv.path
    }

    pub fn append(&mut self, row: &[String]) -> CbpResult<()> {
        self.csv.write_row(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbp_types::ParameterValue;
    use tempfile::TempDir;

    #[test]
    fn trial_log_rows_are_visible_immediately() {
        let tmp = TempDir::new().unwrap();
        let names = vec!["PHT_SIZE".to_string(), "HYST".to_string()];
        let mut log = TrialLog::create(tmp.path(), &names).unwrap();

        let mut params = ParameterSet::new();
        params.insert("HYST", ParameterValue::Bool(true));
        params.insert("PHT_SIZE", ParameterValue::Int(12));
        log.append(0, 2.5, &params, Path::new("/r/abc")).unwrap();

        let text = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Trial,MPKI,PHT_SIZE,HYST,Result folder");
        assert_eq!(lines[1], "0,2.5,12,true,/r/abc");
    }

    #[test]
    fn trial_logs_never_collide() {
        let tmp = TempDir::new().unwrap();
        let a = TrialLog::create(tmp.path(), &[]).unwrap();
        let b = TrialLog::create(tmp.path(), &[]).unwrap();
        assert_ne!(a.path(), b.path());
        let name = a.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("trials-") && name.ends_with(".csv"));
    }

    #[test]
    fn study_report_header() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(STUDY_REPORT_FILE);
        let header = vec![
            "Config file".to_string(),
            "Result dir".to_string(),
            "Vizier iterations".to_string(),
            "PHT_SIZE".to_string(),
        ];
        let mut report = StudyReport::create(&path, &header).unwrap();
        report
            .append(&["0".into(), "1.5".into(), "a.yml".into(), "/r".into(), "0".into(), "12".into()])
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Index,MPKI,Config file,Result dir,Vizier iterations,PHT_SIZE\n"));
        assert!(text.contains("0,1.5,a.yml,/r,0,12"));
    }
}
