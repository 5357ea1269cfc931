use std::path::{Path, PathBuf};

use cbp_types::{CbpResult, ConfigHashes, PredictorConfig, Reproduction};

use crate::loaders::load_config_with_reproduction;

/// Merged per-trace results inside a result directory.
pub const RESULT_FILE: &str = "result.json";
/// Configuration copy with its reproduction block.
pub const CONFIG_COPY_FILE: &str = "predictor.yml";

/// A result directory read back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResult {
    pub dir: PathBuf,
    pub config: PredictorConfig,
    pub reproduction: Reproduction,
}

/// Layout of the result tree: `<root>/<predictor>/<version>/<config_hash>/`.
#[derive(Debug, Clone)]
pub struct ResultStore {
    pub root: PathBuf,
}

impl ResultStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Directory holding every result of one predictor version.
    pub fn version_dir(&self, config: &PredictorConfig) -> PathBuf {
        self.root.join(&config.name).join(&config.version)
    }

    pub fn result_dir(&self, config: &PredictorConfig, hashes: &ConfigHashes) -> PathBuf {
        self.version_dir(config).join(&hashes.config_hash)
    }

    /// Read the reproduction block stored in a result directory.
    pub fn read_reproduction(dir: &Path) -> CbpResult<Option<Reproduction>> {
        let (_, reproduction) = load_config_with_reproduction(dir.join(CONFIG_COPY_FILE))?;
        Ok(reproduction)
    }

    /// Read a complete stored result. Directories without a reproduction block
    /// are incomplete and yield `None`.
    pub fn read_result(dir: &Path) -> CbpResult<Option<StoredResult>> {
        let (config, reproduction) = load_config_with_reproduction(dir.join(CONFIG_COPY_FILE))?;
        Ok(reproduction.map(|reproduction| StoredResult {
            dir: dir.to_path_buf(),
            config,
            reproduction,
        }))
    }

    /// Write the config copy, reproduction block first.
    pub fn write_record(dir: &Path, config: &PredictorConfig, reproduction: &Reproduction) -> CbpResult<()> {
        let doc = config.to_document(Some(reproduction));
        let text = serde_yaml::to_string(&doc)?;
        std::fs::write(dir.join(CONFIG_COPY_FILE), text)?;
        Ok(())
    }

    /// Every readable stored result for the predictor name and version of
    /// `config`. Unreadable or incomplete directories are skipped.
    pub fn stored_results(&self, config: &PredictorConfig) -> CbpResult<Vec<StoredResult>> {
        let dir = self.version_dir(config);
        if !dir.is_dir() {
            tracing::info!("No stored results under {}", dir.display());
            return Ok(Vec::new());
        }

        let mut subdirs: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        subdirs.sort();

        let mut results = Vec::with_capacity(subdirs.len());
        for subdir in subdirs {
            match Self::read_result(&subdir) {
                Ok(Some(result)) => results.push(result),
                Ok(None) => tracing::warn!("Skipping incomplete result {}", subdir.display()),
                Err(e) => tracing::warn!("Skipping unreadable result {}: {}", subdir.display(), e),
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbp_types::{IntParam, ParameterSpec, ParameterValue};
    use tempfile::TempDir;

    fn config(size: i64) -> PredictorConfig {
        PredictorConfig::new("gshare", "1").with_parameter(
            "PHT_SIZE",
            ParameterSpec::Int(IntParam {
                val: size,
                min: Some(8),
                max: Some(16),
            }),
        )
    }

    fn store_result(store: &ResultStore, config: &PredictorConfig, mpki: f64) -> PathBuf {
        let hashes = ConfigHashes::of(config);
        let dir = store.result_dir(config, &hashes);
        std::fs::create_dir_all(&dir).unwrap();
        ResultStore::write_record(&dir, config, &Reproduction::new(&hashes, mpki, 4)).unwrap();
        dir
    }

    #[test]
    fn test_layout() {
        let store = ResultStore::new("/results");
        let cfg = config(12);
        let hashes = ConfigHashes::of(&cfg);
        assert_eq!(
            store.result_dir(&cfg, &hashes),
            PathBuf::from("/results/gshare/1").join(&hashes.config_hash)
        );
    }

    #[test]
    fn test_record_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = ResultStore::new(tmp.path());
        let cfg = config(12);
        let dir = store_result(&store, &cfg, 2.5);

        let stored = ResultStore::read_result(&dir).unwrap().unwrap();
        assert_eq!(stored.config, cfg);
        assert_eq!(stored.reproduction.mpki, 2.5);
        assert_eq!(stored.reproduction.num_traces, 4);
        assert_eq!(stored.reproduction.config_hash, ConfigHashes::of(&cfg).config_hash);
    }

    #[test]
    fn test_stored_results_skip_broken_dirs() {
        let tmp = TempDir::new().unwrap();
        let store = ResultStore::new(tmp.path());
        store_result(&store, &config(10), 3.0);
        store_result(&store, &config(12), 2.0);

        // A directory left behind without a config copy.
        std::fs::create_dir_all(store.version_dir(&config(10)).join("deadbeef")).unwrap();

        let results = store.stored_results(&config(10)).unwrap();
        assert_eq!(results.len(), 2);
        let sizes: Vec<_> = results
            .iter()
            .map(|r| r.config.value_of("PHT_SIZE").unwrap())
            .collect();
        assert!(sizes.contains(&ParameterValue::Int(10)));
        assert!(sizes.contains(&ParameterValue::Int(12)));
    }

    #[test]
    fn test_stored_results_missing_version_dir() {
        let tmp = TempDir::new().unwrap();
        let store = ResultStore::new(tmp.path());
        assert!(store.stored_results(&config(10)).unwrap().is_empty());
    }
}
