use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the CBP tooling
#[derive(Error, Debug)]
pub enum CbpError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Run error: {0}")]
    Run(#[from] RunError),

    #[error("Aggregation error: {0}")]
    Aggregation(#[from] AggregationError),

    #[error("Study error: {0}")]
    Study(#[from] StudyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl CbpError {
    /// Process exit status the CLI should use for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CbpError::Run(RunError::Interrupted { .. }) => 130,
            _ => 1,
        }
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self, CbpError::Run(RunError::Interrupted { .. }))
    }
}

/// Predictor configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Unknown parameter type \"{type_name}\" for parameter {parameter}")]
    UnknownType { parameter: String, type_name: String },

    #[error("Parameter {parameter} of type '{type_name}' has an invalid value: {message}")]
    InvalidValue {
        parameter: String,
        type_name: String,
        message: String,
    },

    #[error("Parameter {parameter} of type 'bool' does not have a bool value")]
    NotBool { parameter: String },

    #[error("Value \"{value}\" is not possible for parameter {parameter} (possible values: {possible})")]
    NotPossible {
        parameter: String,
        value: String,
        possible: String,
    },

    #[error("Unknown parameter: {name}")]
    UnknownParameter { name: String },

    #[error("Duplicate parameter: {name}")]
    DuplicateParameter { name: String },

    #[error("Parameter {parameter} is marked for optimization but has no {bound} bound")]
    MissingBound { parameter: String, bound: String },
}

/// Compile / simulate pipeline errors
#[derive(Error, Debug)]
pub enum RunError {
    #[error(
        "result directory already contains a directory with the same configuration hash: \"{config_hash}\" \
         (stored MPKI: {stored}). Run with -f/--force if you want to overwrite the simulation results, \
         or with -s/--silence to silence this warning",
        stored = .mpki.map(|m| format!("{m:.3}")).unwrap_or_else(|| "unknown".to_string())
    )]
    Conflict {
        config_hash: String,
        result_dir: PathBuf,
        mpki: Option<f64>,
    },

    #[error("Failed to compile, return code {}", .code.map(|c| c.to_string()).unwrap_or_else(|| "none (terminated by signal)".to_string()))]
    BuildFailed { code: Option<i32> },

    #[error("Failed to launch build command `{command}`: {message}")]
    BuildSpawn { command: String, message: String },

    #[error("Failed to launch simulator {path}: {message}")]
    Simulator { path: PathBuf, message: String },

    #[error("No trace files found in {trace_dir}")]
    NoTraces { trace_dir: PathBuf },

    #[error("Interrupt received. Directory \"{}\" was removed to avoid incomplete simulation results", .result_dir.display())]
    Interrupted { result_dir: PathBuf },
}

/// Result aggregation errors
#[derive(Error, Debug)]
pub enum AggregationError {
    #[error("No trace in {} produced a usable {metric} value", .result_dir.display())]
    NoUsableTraces { result_dir: PathBuf, metric: String },

    #[error("Invalid trace output {}: {message}", .file.display())]
    InvalidTraceOutput { file: PathBuf, message: String },
}

/// Batch study errors
#[derive(Error, Debug)]
pub enum StudyError {
    #[error("Invalid study table header: column {index} should be \"{expected}\", found \"{found}\"")]
    InvalidHeader {
        index: usize,
        expected: String,
        found: String,
    },

    #[error("Study table {path} has no header row")]
    EmptyTable { path: String },

    #[error("Row {row}: number of iterations cannot be 0 when there is any parameter to optimize")]
    ZeroIterations { row: usize },

    #[error("Row {row}: invalid iteration count \"{value}\"")]
    InvalidIterations { row: usize, value: String },
}

/// Result type alias for CBP operations
pub type CbpResult<T> = Result<T, CbpError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::CbpError::Validation(format!($($arg)*))
    };
}

/// Macro for creating config value errors
#[macro_export]
macro_rules! config_error {
    ($param:expr, $type_name:expr, $($arg:tt)*) => {
        $crate::CbpError::Config($crate::ConfigError::InvalidValue {
            parameter: $param.to_string(),
            type_name: $type_name.to_string(),
            message: format!($($arg)*),
        })
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::CbpError::Internal(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_display() {
        let error = RunError::Conflict {
            config_hash: "abc123".to_string(),
            result_dir: PathBuf::from("/tmp/results/gshare/1/abc123"),
            mpki: Some(4.5678),
        };

        let message = error.to_string();
        assert!(message.contains("abc123"));
        assert!(message.contains("4.568"));
        assert!(message.contains("--force"));
        assert!(message.contains("--silence"));
    }

    #[test]
    fn test_build_failed_carries_code() {
        let error = RunError::BuildFailed { code: Some(2) };
        assert!(error.to_string().contains("return code 2"));
    }

    #[test]
    fn test_error_conversion() {
        let config_error = ConfigError::NotBool {
            parameter: "HYST".to_string(),
        };
        let cbp_error: CbpError = config_error.into();

        match cbp_error {
            CbpError::Config(_) => (),
            _ => panic!("Expected Config error"),
        }
    }

    #[test]
    fn test_exit_codes() {
        let interrupted: CbpError = RunError::Interrupted {
            result_dir: PathBuf::from("/tmp/x"),
        }
        .into();
        assert_eq!(interrupted.exit_code(), 130);
        assert!(interrupted.is_interrupt());
        assert!(interrupted.to_string().contains("/tmp/x"));

        let build: CbpError = RunError::BuildFailed { code: Some(1) }.into();
        assert_eq!(build.exit_code(), 1);
    }

    #[test]
    fn test_macros() {
        let validation_err = validation_error!("Invalid value: {}", 42);
        assert!(matches!(validation_err, CbpError::Validation(_)));
        let internal_err = internal_error!("Something went wrong");
        assert!(matches!(internal_err, CbpError::Internal(_)));
        let config_err = config_error!("PHT_SIZE", "int", "value {} out of range", 99);
        assert!(config_err.to_string().contains("PHT_SIZE"));
    }
}
