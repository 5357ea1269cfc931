//! Side-by-side comparison of result directories.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use cbp_types::CbpResult;
use cli_table::{Cell, CellStruct, Style, Table, TableStruct};
use serde_json::{Map, Value};

use crate::storage::RESULT_FILE;

/// Read a numeric metric out of one trace's statistics.
///
/// Numbers and numeric strings are accepted; non-finite values are not usable.
pub fn metric_value(stats: &Value, metric: &str) -> Option<f64> {
    let value = match stats.get(metric)? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    value.is_finite().then_some(value)
}

/// Load the merged `result.json` of a result directory.
pub fn load_result_map(dir: &Path) -> CbpResult<Map<String, Value>> {
    let text = std::fs::read_to_string(dir.join(RESULT_FILE))?;
    Ok(serde_json::from_str(&text)?)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonRow {
    pub trace: String,
    /// One entry per directory; `None` where the trace or metric is missing.
    pub values: Vec<Option<f64>>,
}

/// Per-trace metric values for several result directories.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub dirs: Vec<PathBuf>,
    pub metric: String,
    pub rows: Vec<ComparisonRow>,
    pub averages: Vec<Option<f64>>,
    pub counts: Vec<usize>,
    /// Set when some directory lacks a value another directory has.
    pub bad_comparison: bool,
}

impl Comparison {
    /// Order rows by the first directory's values, missing values last.
    pub fn sort_by_first(&mut self) {
        self.rows.sort_by(|a, b| {
            let a = a.values.first().copied().flatten();
            let b = b.values.first().copied().flatten();
            match (a, b) {
                (Some(a), Some(b)) => a.total_cmp(&b),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
        });
    }

    pub fn to_table(&self) -> TableStruct {
        let fmt = |v: Option<f64>| v.map(|v| format!("{v:.3}")).unwrap_or_default();

        let mut rows: Vec<Vec<CellStruct>> = self
            .rows
            .iter()
            .map(|row| {
                std::iter::once(row.trace.clone().cell())
                    .chain(row.values.iter().map(|v| fmt(*v).cell()))
                    .collect()
            })
            .collect();

        rows.push(
            std::iter::once("Average".cell().bold(true))
                .chain(self.averages.iter().map(|v| fmt(*v).cell().bold(true)))
                .collect(),
        );
        rows.push(
            std::iter::once("Number of traces".cell())
                .chain(self.counts.iter().map(|c| c.cell()))
                .collect(),
        );

        let title: Vec<CellStruct> = std::iter::once("Trace name".cell().bold(true))
            .chain(self.dirs.iter().map(|d| display_dir(d).cell().bold(true)))
            .collect();

        rows.table().title(title)
    }
}

fn display_dir(dir: &Path) -> String {
    std::env::current_dir()
        .ok()
        .and_then(|cwd| dir.strip_prefix(cwd).ok().map(Path::to_path_buf))
        .unwrap_or_else(|| dir.to_path_buf())
        .display()
        .to_string()
}

/// Build a comparison of `metric` across result directories.
pub fn compare_results(dirs: &[PathBuf], metric: &str) -> CbpResult<Comparison> {
    let mut order: Vec<String> = Vec::new();
    let mut values: HashMap<String, Vec<Option<f64>>> = HashMap::new();

    for (column, dir) in dirs.iter().enumerate() {
        let data = load_result_map(dir)?;
        tracing::debug!("Loaded {} traces from {}", data.len(), dir.display());

        for (trace, stats) in &data {
            let entry = values.entry(trace.clone()).or_insert_with(|| {
                order.push(trace.clone());
                vec![None; dirs.len()]
            });
            entry[column] = metric_value(stats, metric);
        }
    }

    let mut sums = vec![0.0; dirs.len()];
    let mut counts = vec![0usize; dirs.len()];
    let mut bad_comparison = false;

    let rows: Vec<ComparisonRow> = order
        .into_iter()
        .map(|trace| {
            let row_values = values.remove(&trace).unwrap_or_default();
            for (column, value) in row_values.iter().enumerate() {
                match value {
                    Some(v) => {
                        sums[column] += v;
                        counts[column] += 1;
                    }
                    None => bad_comparison = true,
                }
            }
            ComparisonRow {
                trace,
                values: row_values,
            }
        })
        .collect();

    let averages = sums
        .iter()
        .zip(&counts)
        .map(|(sum, count)| (*count > 0).then(|| sum / *count as f64))
        .collect();

    Ok(Comparison {
        dirs: dirs.to_vec(),
        metric: metric.to_string(),
        rows,
        averages,
        counts,
        bad_comparison,
    })
}
