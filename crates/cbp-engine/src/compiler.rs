//! Header generation and the external build step.

use std::path::Path;
use std::process::Stdio;

use cbp_types::{CbpResult, ConfigError, ParameterSpec, PredictorConfig, RunError};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::RunConfig;

pub const PARAMETERS_HEADER: &str = "parameters.h";
pub const STATISTICS_HEADER: &str = "statistics.h";
pub const PATHS_HEADER: &str = "paths.h";

/// Render `parameters.h` for a configuration.
///
/// Fails if a categorical value is not one of its possible values.
pub fn render_parameters_header(config: &PredictorConfig) -> CbpResult<String> {
    let mut header = String::new();
    for (name, spec) in &config.parameters {
        match spec {
            ParameterSpec::Categorical(p) => {
                if !p.is_possible(&p.val) {
                    return Err(ConfigError::NotPossible {
                        parameter: name.clone(),
                        value: p.val.clone(),
                        possible: p.possible_values.join(", "),
                    }
                    .into());
                }
                header.push_str(&format!("#define {}\n", p.val));
            }
            ParameterSpec::Bool(p) => {
                if p.val {
                    header.push_str(&format!("#define {name}\n"));
                }
            }
            ParameterSpec::Int(_) | ParameterSpec::Float(_) => {
                header.push_str(&format!("#define {} {}\n", name, spec.value().canonical()));
            }
        }
    }
    Ok(header)
}

pub fn render_statistics_header(user_stats: bool) -> String {
    if user_stats {
        "#define USER_STATS\n".to_string()
    } else {
        String::new()
    }
}

pub fn render_paths_header(predictor_folder: &Path) -> String {
    format!(
        "#define PREDICTOR_H_PATH \"{}\"",
        predictor_folder.join("src").join("predictor.h").display()
    )
}

/// Validate the configuration and write all three headers into `build_dir`.
pub fn write_headers(config: &PredictorConfig, run: &RunConfig) -> CbpResult<()> {
    let parameters = render_parameters_header(config)?;

    std::fs::create_dir_all(&run.build_dir)?;
    std::fs::write(run.build_dir.join(PARAMETERS_HEADER), parameters)?;
    std::fs::write(
        run.build_dir.join(STATISTICS_HEADER),
        render_statistics_header(run.user_stats),
    )?;
    std::fs::write(
        run.build_dir.join(PATHS_HEADER),
        render_paths_header(&run.predictor_folder),
    )?;

    debug!("Generated headers in {}", run.build_dir.display());
    Ok(())
}

/// Generate headers and build the simulator.
pub async fn compile_predictor(config: &PredictorConfig, run: &RunConfig) -> CbpResult<()> {
    write_headers(config, run)?;

    let command_line = run.build.display();
    info!(
        "PREDICTOR_FOLDER={} {}",
        run.predictor_folder.display(),
        command_line
    );

    let mut command = Command::new(&run.build.program);
    command
        .args(&run.build.args)
        .env("PREDICTOR_FOLDER", &run.predictor_folder)
        .stdin(Stdio::null())
        .kill_on_drop(true);

    let spawn_error = |e: std::io::Error| RunError::BuildSpawn {
        command: command_line.clone(),
        message: e.to_string(),
    };

    let status = if run.forward_build_output {
        command
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(spawn_error)?
    } else {
        let output = command.output().await.map_err(spawn_error)?;
        if !output.status.success() {
            debug!("Build stdout:\n{}", String::from_utf8_lossy(&output.stdout));
            debug!("Build stderr:\n{}", String::from_utf8_lossy(&output.stderr));
        }
        output.status
    };

    if !status.success() {
        warn!("Build command `{}` exited with {}", command_line, status);
        return Err(RunError::BuildFailed {
            code: status.code(),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbp_types::{BoolParam, CategoricalParam, CbpError, FloatParam, IntParam};
    use tempfile::TempDir;

    fn sample_config() -> PredictorConfig {
        PredictorConfig::new("gshare", "1")
            .with_parameter(
                "PHT_SIZE",
                ParameterSpec::Int(IntParam {
                    val: 14,
                    min: None,
                    max: None,
                }),
            )
            .with_parameter(
                "CTR_INIT",
                ParameterSpec::Float(FloatParam {
                    val: 1.0,
                    min: None,
                    max: None,
                }),
            )
            .with_parameter("HYST", ParameterSpec::Bool(BoolParam { val: true }))
            .with_parameter("SPEC", ParameterSpec::Bool(BoolParam { val: false }))
            .with_parameter(
                "COUNTER",
                ParameterSpec::Categorical(CategoricalParam {
                    val: "SAT_CTR".into(),
                    possible_values: vec!["SAT_CTR".into(), "PROB_CTR".into()],
                }),
            )
    }

    #[test]
    fn test_parameters_header() {
        let header = render_parameters_header(&sample_config()).unwrap();
        assert_eq!(
            header,
            "#define PHT_SIZE 14\n#define CTR_INIT 1.0\n#define HYST\n#define SAT_CTR\n"
        );
    }

    #[test]
    fn test_categorical_not_possible() {
        let config = PredictorConfig::new("p", "1").with_parameter(
            "X",
            ParameterSpec::Categorical(CategoricalParam {
                val: "C".into(),
                possible_values: vec!["A".into(), "B".into()],
            }),
        );
        let err = render_parameters_header(&config).unwrap_err();
        assert!(matches!(err, CbpError::Config(ConfigError::NotPossible { .. })));
    }

    #[test]
    fn test_auxiliary_headers() {
        assert_eq!(render_statistics_header(true), "#define USER_STATS\n");
        assert_eq!(render_statistics_header(false), "");
        assert_eq!(
            render_paths_header(Path::new("/p/gshare")),
            "#define PREDICTOR_H_PATH \"/p/gshare/src/predictor.h\""
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_build_failure_carries_exit_code() {
        let tmp = TempDir::new().unwrap();
        let run = RunConfig::from_home(tmp.path())
            .with_build_dir(tmp.path().join("build"))
            .with_build_command(crate::config::BuildCommand::new(
                "/bin/sh",
                vec!["-c".into(), "exit 3".into()],
            ));

        let err = compile_predictor(&sample_config(), &run).await.unwrap_err();
        assert!(matches!(
            err,
            CbpError::Run(RunError::BuildFailed { code: Some(3) })
        ));
        assert!(tmp.path().join("build").join(PARAMETERS_HEADER).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_build_sees_predictor_folder() {
        let tmp = TempDir::new().unwrap();
        let marker = tmp.path().join("marker");
        let run = RunConfig::from_home(tmp.path())
            .with_build_dir(tmp.path().join("build"))
            .with_predictor_folder("/predictors/gshare")
            .with_build_command(crate::config::BuildCommand::new(
                "/bin/sh",
                vec![
                    "-c".into(),
                    format!("printf '%s' \"$PREDICTOR_FOLDER\" > {}", marker.display()),
                ],
            ));

        compile_predictor(&sample_config(), &run).await.unwrap();
        assert_eq!(std::fs::read_to_string(marker).unwrap(), "/predictors/gshare");
    }

    #[tokio::test]
    async fn test_invalid_config_never_spawns() {
        let tmp = TempDir::new().unwrap();
        let run = RunConfig::from_home(tmp.path())
            .with_build_dir(tmp.path().join("build"))
            .with_build_command(crate::config::BuildCommand::new("/definitely/missing", vec![]));
        let config = PredictorConfig::new("p", "1").with_parameter(
            "X",
            ParameterSpec::Categorical(CategoricalParam {
                val: "C".into(),
                possible_values: vec!["A".into()],
            }),
        );

        let err = compile_predictor(&config, &run).await.unwrap_err();
        assert!(matches!(err, CbpError::Config(_)));
        assert!(!tmp.path().join("build").exists());
    }
}
