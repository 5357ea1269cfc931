//! Merging per-trace simulator output and computing MPKI.

use std::path::{Path, PathBuf};

use cbp_data::{load_result_map, metric_value, RESULT_FILE};
use cbp_types::{internal_error, AggregationError, CbpResult};
use rayon::prelude::*;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Mean of a metric over the traces that reported it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub mean: f64,
    pub count: usize,
}

fn parse_trace_output(path: &Path) -> CbpResult<Map<String, Value>> {
    let text = std::fs::read_to_string(path)?;
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(AggregationError::InvalidTraceOutput {
            file: path.to_path_buf(),
            message: "top-level value is not an object".to_string(),
        }
        .into()),
        Err(e) => Err(AggregationError::InvalidTraceOutput {
            file: path.to_path_buf(),
            message: e.to_string(),
        }
        .into()),
    }
}

/// Merge every `*.json` file of `dir` (other than `result.json`) into
/// `result.json`, then delete every other file in the directory.
///
/// Unparseable outputs are logged and skipped.
pub fn merge_trace_outputs_blocking(dir: &Path) -> CbpResult<Map<String, Value>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    let outputs: Vec<&PathBuf> = files
        .iter()
        .filter(|path| {
            path.extension().map(|e| e == "json").unwrap_or(false)
                && path.file_name().map(|n| n != RESULT_FILE).unwrap_or(false)
        })
        .collect();

    let parsed: Vec<CbpResult<Map<String, Value>>> =
        outputs.par_iter().map(|path| parse_trace_output(path)).collect();

    let mut merged = Map::new();
    for result in parsed {
        match result {
            Ok(map) => merged.extend(map),
            Err(e) => warn!("Skipping trace output: {}", e),
        }
    }

    std::fs::write(dir.join(RESULT_FILE), serde_json::to_string(&merged)?)?;

    for path in files
        .iter()
        .filter(|p| p.file_name().map(|n| n != RESULT_FILE).unwrap_or(false))
    {
        std::fs::remove_file(path)?;
    }

    debug!("Merged {} trace outputs into {}", merged.len(), dir.display());
    Ok(merged)
}

pub async fn merge_trace_outputs(dir: &Path) -> CbpResult<Map<String, Value>> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || merge_trace_outputs_blocking(&dir))
        .await
        .map_err(|e| internal_error!("merge task failed: {}", e))?
}

/// Mean `metric` over traces with a finite value.
pub fn summarize(results: &Map<String, Value>, metric: &str, result_dir: &Path) -> CbpResult<Summary> {
    let values: Vec<f64> = results
        .iter()
        .filter_map(|(trace, stats)| {
            let value = metric_value(stats, metric);
            if value.is_none() {
                warn!("Trace {} has no usable {} value", trace, metric);
            }
            value
        })
        .collect();

    if values.is_empty() {
        return Err(AggregationError::NoUsableTraces {
            result_dir: result_dir.to_path_buf(),
            metric: metric.to_string(),
        }
        .into());
    }

    Ok(Summary {
        mean: values.iter().sum::<f64>() / values.len() as f64,
        count: values.len(),
    })
}

pub fn summarize_file(dir: &Path, metric: &str) -> CbpResult<Summary> {
    let results = load_result_map(dir)?;
    summarize(&results, metric, dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbp_types::{CbpError, MPKI_METRIC};
    use serde_json::json;
    use tempfile::TempDir;

    fn as_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_summarize_mean() {
        let results = as_map(json!({
            "a": {"MISPRED_PER_1K_INST": 1.0},
            "b": {"MISPRED_PER_1K_INST": "2.0"},
            "c": {"MISPRED_PER_1K_INST": 3},
        }));
        let summary = summarize(&results, MPKI_METRIC, Path::new("/r")).unwrap();
        assert_eq!(summary.count, 3);
        assert!((summary.mean - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_summarize_skips_unusable() {
        let results = as_map(json!({
            "a": {"MISPRED_PER_1K_INST": 4.0},
            "b": {"OTHER": 1.0},
            "c": {"MISPRED_PER_1K_INST": "n/a"},
        }));
        let summary = summarize(&results, MPKI_METRIC, Path::new("/r")).unwrap();
        assert_eq!(summary, Summary { mean: 4.0, count: 1 });
    }

    #[test]
    fn test_summarize_nothing_usable() {
        let results = as_map(json!({"a": {"OTHER": 1.0}}));
        let err = summarize(&results, MPKI_METRIC, Path::new("/r")).unwrap_err();
        assert!(matches!(
            err,
            CbpError::Aggregation(AggregationError::NoUsableTraces { .. })
        ));
    }

    #[tokio::test]
    async fn test_merge_trace_outputs() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        std::fs::write(dir.join("t1.gz.json"), r#"{"t1": {"MISPRED_PER_1K_INST": 2.0}}"#).unwrap();
        std::fs::write(dir.join("t2.gz.json"), r#"{"t2": {"MISPRED_PER_1K_INST": 4.0}}"#).unwrap();
        std::fs::write(dir.join("t3.gz.json"), "").unwrap();
        std::fs::write(dir.join("stray.log"), "noise").unwrap();

        let merged = merge_trace_outputs(dir).await.unwrap();
        assert_eq!(merged.len(), 2);

        let names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![RESULT_FILE.to_string()]);

        let summary = summarize_file(dir, MPKI_METRIC).unwrap();
        assert_eq!(summary, Summary { mean: 3.0, count: 2 });
    }
}
