use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::PredictorConfig;
use crate::errors::CbpResult;

/// Fixed leading columns of a study table.
pub const STUDY_FIXED_COLUMNS: [&str; 3] = ["Config file", "Result dir", "Vizier iterations"];

/// Cell marker for parameters the search loop should tune.
pub const OPTIMIZE_MARKER: &str = "optimize";

/// What a parameter column says for one study row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StudyCell {
    /// Empty cell: keep the config file's value.
    Default,
    /// `optimize`: let the search loop choose.
    Optimize,
    /// Any other literal overrides the config value.
    Override(String),
}

impl StudyCell {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "" => Self::Default,
            OPTIMIZE_MARKER => Self::Optimize,
            other => Self::Override(other.to_string()),
        }
    }
}

/// One line of a batch study table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyRow {
    pub index: usize,
    pub config_file: Option<PathBuf>,
    pub result_dir: Option<PathBuf>,
    pub iterations: usize,
    /// `(parameter name, cell)` in column order.
    pub cells: Vec<(String, StudyCell)>,
}

impl StudyRow {
    pub fn params_to_optimize(&self) -> Vec<String> {
        self.cells
            .iter()
            .filter(|(_, cell)| *cell == StudyCell::Optimize)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn is_search(&self) -> bool {
        self.cells.iter().any(|(_, cell)| *cell == StudyCell::Optimize)
    }

    /// Apply the row's overrides to a loaded config.
    pub fn apply_overrides(&self, config: &mut PredictorConfig) -> CbpResult<()> {
        for (name, cell) in &self.cells {
            match cell {
                StudyCell::Override(literal) => config.apply_override(name, literal)?,
                StudyCell::Optimize => {
                    config.require(name)?;
                }
                StudyCell::Default => {}
            }
        }
        Ok(())
    }
}

/// A parsed study table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyTable {
    /// The full header row, fixed columns included.
    pub header: Vec<String>,
    pub rows: Vec<StudyRow>,
}

impl StudyTable {
    pub fn parameter_columns(&self) -> &[String] {
        &self.header[STUDY_FIXED_COLUMNS.len().min(self.header.len())..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BoolParam, IntParam, ParameterSpec, ParameterValue};

    fn row(cells: Vec<(&str, StudyCell)>) -> StudyRow {
        StudyRow {
            index: 0,
            config_file: None,
            result_dir: None,
            iterations: 5,
            cells: cells.into_iter().map(|(n, c)| (n.to_string(), c)).collect(),
        }
    }

    #[test]
    fn cell_parsing() {
        assert_eq!(StudyCell::parse(""), StudyCell::Default);
        assert_eq!(StudyCell::parse("  "), StudyCell::Default);
        assert_eq!(StudyCell::parse("optimize"), StudyCell::Optimize);
        assert_eq!(StudyCell::parse("12"), StudyCell::Override("12".into()));
    }

    #[test]
    fn optimize_targets_are_collected_in_order() {
        let r = row(vec![
            ("A", StudyCell::Optimize),
            ("B", StudyCell::Default),
            ("C", StudyCell::Optimize),
        ]);
        assert!(r.is_search());
        assert_eq!(r.params_to_optimize(), vec!["A".to_string(), "C".to_string()]);
    }

    #[test]
    fn overrides_apply_and_unknown_targets_fail() {
        let mut config = PredictorConfig::new("p", "1")
            .with_parameter(
                "SIZE",
                ParameterSpec::Int(IntParam {
                    val: 1,
                    min: None,
                    max: None,
                }),
            )
            .with_parameter("FLAG", ParameterSpec::Bool(BoolParam { val: true }));

        let r = row(vec![
            ("SIZE", StudyCell::Override("8".into())),
            ("FLAG", StudyCell::Override("False".into())),
        ]);
        r.apply_overrides(&mut config).unwrap();
        assert_eq!(config.value_of("SIZE"), Some(ParameterValue::Int(8)));
        assert_eq!(config.value_of("FLAG"), Some(ParameterValue::Bool(false)));

        let bad = row(vec![("MISSING", StudyCell::Optimize)]);
        assert!(bad.apply_overrides(&mut config).is_err());
    }
}
