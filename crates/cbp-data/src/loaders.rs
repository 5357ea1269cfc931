use std::io::Read;
use std::path::{Path, PathBuf};

use cbp_types::{
    CbpError, CbpResult, ConfigError, PredictorConfig, Reproduction, StudyCell, StudyError,
    StudyRow, StudyTable, STUDY_FIXED_COLUMNS,
};
use serde_yaml::Value;

pub(crate) fn csv_error(e: csv::Error) -> CbpError {
    CbpError::Csv(e.to_string())
}

/// Read a YAML document from disk.
pub fn load_config_document<P: AsRef<Path>>(path: P) -> CbpResult<Value> {
    let path = path.as_ref();
    tracing::debug!("Loading predictor config from: {}", path.display());

    let text = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&text).map_err(|e| {
        ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        }
        .into()
    })
}

/// Load a predictor configuration, discarding any reproduction block.
pub fn load_predictor_config<P: AsRef<Path>>(path: P) -> CbpResult<PredictorConfig> {
    let doc = load_config_document(path)?;
    PredictorConfig::from_document(&doc)
}

/// Load a persisted configuration together with its reproduction block.
pub fn load_config_with_reproduction<P: AsRef<Path>>(
    path: P,
) -> CbpResult<(PredictorConfig, Option<Reproduction>)> {
    let doc = load_config_document(path)?;
    let config = PredictorConfig::from_document(&doc)?;
    let reproduction = Reproduction::from_document(&doc)?;
    Ok((config, reproduction))
}

/// Default config location inside a predictor folder.
pub fn default_config_file(predictor_folder: &Path) -> PathBuf {
    predictor_folder.join("config").join("predictor.yml")
}

/// Default study table location inside a predictor folder.
pub fn default_study_file(predictor_folder: &Path) -> PathBuf {
    predictor_folder.join("config").join("study_config.csv")
}

/// Load a study table from a CSV file.
pub fn load_study_table<P: AsRef<Path>>(path: P) -> CbpResult<StudyTable> {
    let path = path.as_ref();
    tracing::info!("Loading study table from: {}", path.display());
    let file = std::fs::File::open(path)?;
    parse_study_table(file, &path.display().to_string())
}

/// Parse a study table. `source` only names the input in error messages.
pub fn parse_study_table<R: Read>(reader: R, source: &str) -> CbpResult<StudyTable> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut records = csv_reader.records();
    let header: Vec<String> = match records.next() {
        Some(record) => record
            .map_err(csv_error)?
            .iter()
            .map(|s| s.trim().to_string())
            .collect(),
        None => {
            return Err(StudyError::EmptyTable {
                path: source.to_string(),
            }
            .into())
        }
    };

    for (index, expected) in STUDY_FIXED_COLUMNS.iter().enumerate() {
        let found = header.get(index).map(String::as_str).unwrap_or("");
        if found != *expected {
            return Err(StudyError::InvalidHeader {
                index,
                expected: expected.to_string(),
                found: found.to_string(),
            }
            .into());
        }
    }

    let mut rows = Vec::new();
    for record in records {
        let record = record.map_err(csv_error)?;
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }

        let index = rows.len();
        let field = |i: usize| record.get(i).map(str::trim).unwrap_or("");

        let non_empty_path = |s: &str| (!s.is_empty()).then(|| PathBuf::from(s));
        let iterations = match field(2) {
            "" => 0,
            raw => raw.parse::<usize>().map_err(|_| StudyError::InvalidIterations {
                row: index,
                value: raw.to_string(),
            })?,
        };

        let cells = header
            .iter()
            .enumerate()
            .skip(STUDY_FIXED_COLUMNS.len())
            .filter(|(_, name)| !name.is_empty())
            .map(|(i, name)| (name.clone(), StudyCell::parse(field(i))))
            .collect();

        rows.push(StudyRow {
            index,
            config_file: non_empty_path(field(0)),
            result_dir: non_empty_path(field(1)),
            iterations,
            cells,
        });
    }

    tracing::debug!("Study table {} has {} rows", source, rows.len());
    Ok(StudyTable { header, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbp_types::ParameterValue;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_study_table_parsing() {
        let text = "\
Config file,Result dir,Vizier iterations,PHT_SIZE,HYST,
cfg/a.yml,,0,12,,
,/tmp/results,20,optimize,optimize,
";
        let table = parse_study_table(text.as_bytes(), "inline").unwrap();
        assert_eq!(table.parameter_columns(), &["PHT_SIZE", "HYST", ""]);
        assert_eq!(table.rows.len(), 2);

        let first = &table.rows[0];
        assert_eq!(first.config_file, Some(PathBuf::from("cfg/a.yml")));
        assert_eq!(first.result_dir, None);
        assert_eq!(first.iterations, 0);
        assert_eq!(
            first.cells,
            vec![
                ("PHT_SIZE".to_string(), StudyCell::Override("12".into())),
                ("HYST".to_string(), StudyCell::Default),
            ]
        );
        assert!(!first.is_search());

        let second = &table.rows[1];
        assert_eq!(second.index, 1);
        assert_eq!(second.config_file, None);
        assert_eq!(second.result_dir, Some(PathBuf::from("/tmp/results")));
        assert_eq!(second.iterations, 20);
        assert_eq!(second.params_to_optimize(), vec!["PHT_SIZE", "HYST"]);
    }

    #[test]
    fn test_study_table_bad_header() {
        let text = "Config,Result dir,Vizier iterations\n";
        let err = parse_study_table(text.as_bytes(), "inline").unwrap_err();
        assert!(matches!(err, CbpError::Study(StudyError::InvalidHeader { index: 0, .. })));
    }

    #[test]
    fn test_study_table_empty() {
        let err = parse_study_table("".as_bytes(), "inline").unwrap_err();
        assert!(matches!(err, CbpError::Study(StudyError::EmptyTable { .. })));
    }

    #[test]
    fn test_study_table_bad_iterations() {
        let text = "Config file,Result dir,Vizier iterations\n,,many\n";
        let err = parse_study_table(text.as_bytes(), "inline").unwrap_err();
        assert!(matches!(
            err,
            CbpError::Study(StudyError::InvalidIterations { row: 0, .. })
        ));
    }

    #[test]
    fn test_short_rows_use_defaults() {
        let text = "Config file,Result dir,Vizier iterations,A,B\n,,3\n";
        let table = parse_study_table(text.as_bytes(), "inline").unwrap();
        assert_eq!(
            table.rows[0].cells,
            vec![
                ("A".to_string(), StudyCell::Default),
                ("B".to_string(), StudyCell::Default),
            ]
        );
    }

    #[test]
    fn test_config_loading_strips_reproduction() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "reproduction:\n  date_of_run: x\n  MPKI: 1.5\n  num_traces: 2\n  config_hash: c\n  param_hash: p\n\
             predictor:\n  name: gshare\n  version: 3\n\
             parameters:\n  PHT_SIZE:\n    type: int\n    val: 12\n"
        )
        .unwrap();

        let config = load_predictor_config(file.path()).unwrap();
        assert_eq!(config.name, "gshare");
        assert_eq!(config.version, "3");
        assert_eq!(config.value_of("PHT_SIZE"), Some(ParameterValue::Int(12)));

        let (_, reproduction) = load_config_with_reproduction(file.path()).unwrap();
        assert_eq!(reproduction.unwrap().mpki, 1.5);
    }

    #[test]
    fn test_config_loading_reports_parse_errors() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "predictor: [unclosed").unwrap();
        let err = load_predictor_config(file.path()).unwrap_err();
        assert!(matches!(err, CbpError::Config(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_missing_config_is_io_error() {
        let err = load_predictor_config("/definitely/not/here.yml").unwrap_err();
        assert!(matches!(err, CbpError::Io(_)));
    }
}
