use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::metapack::ContentType;

/// Expand tilde (~) in path to user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(s) = path.to_str() {
        if let Some(stripped) = s.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        } else if s == "~" {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        }
    }
    path.to_path_buf()
}

/// Configuration for git-metapack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetapackConfig {
    /// Git objects directory holding `pack/`
    #[serde(default = "defaults::objects_dir")]
    pub objects_dir: PathBuf,
    /// Metapack types written when no type is named on the command line
    #[serde(default = "defaults::default_types")]
    pub default_types: Vec<ContentType>,
}

impl Default for MetapackConfig {
    fn default() -> Self {
        MetapackConfig {
            objects_dir: defaults::objects_dir(),
            default_types: defaults::default_types(),
        }
    }
}

impl MetapackConfig {
    /// Load configuration from the config file (if any) and environment
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;
        Self::load_with(&config_path, |key| env::var(key).ok())
    }

    /// Load from `config_path`, taking environment overrides from `lookup`
    pub fn load_with<F>(config_path: &Path, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        tracing::debug!("loading git-metapack config from {:?}", config_path);
        let mut config = if config_path.exists() {
            Self::load_from_file(config_path)?
        } else {
            Self::default()
        };

        if let Some(path) = lookup("GIT_OBJECT_DIRECTORY") {
            config.objects_dir = expand_tilde(&PathBuf::from(path));
        }

        if let Some(types) = lookup("GIT_METAPACK_TYPES") {
            config.default_types =
                parse_types(&types).context("Failed to parse GIT_METAPACK_TYPES")?;
        }
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: MetapackConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.objects_dir = expand_tilde(&config.objects_dir);

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get default config file path
    pub fn config_file_path() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(".config/git-metapack/config.yaml"))
            .context("Could not determine home directory for config file")
    }
}

/// "commits,trees" -> [Commits, Trees]; empty items are ignored.
pub fn parse_types(list: &str) -> Result<Vec<ContentType>> {
    let mut types = Vec::new();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let content_type = ContentType::parse(name)
            .with_context(|| format!("unknown metapack type {:?}", name))?;
        if !types.contains(&content_type) {
            types.push(content_type);
        }
    }
    Ok(types)
}

mod defaults {
    use std::path::PathBuf;

    use crate::metapack::ContentType;

    pub(crate) fn objects_dir() -> PathBuf {
        PathBuf::from(".git/objects")
    }

    pub(crate) fn default_types() -> Vec<ContentType> {
        ContentType::ALL.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::tempdir;

    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");

        let config = MetapackConfig {
            objects_dir: PathBuf::from("/srv/repo.git/objects"),
            default_types: vec![ContentType::Trees],
        };
        config.save(&config_path).unwrap();

        let loaded = MetapackConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = MetapackConfig::load_with(&dir.path().join("absent.yaml"), no_env).unwrap();
        assert_eq!(config, MetapackConfig::default());
        assert_eq!(config.objects_dir, PathBuf::from(".git/objects"));
        assert_eq!(config.default_types, ContentType::ALL.to_vec());
    }

    #[test]
    fn test_env_override() {
        let dir = tempdir().unwrap();
        let env: HashMap<&str, &str> = [
            ("GIT_OBJECT_DIRECTORY", "/tmp/objects"),
            ("GIT_METAPACK_TYPES", "trees, commits,trees"),
        ]
        .into_iter()
        .collect();

        let config = MetapackConfig::load_with(&dir.path().join("absent.yaml"), |k| {
            env.get(k).map(|v| v.to_string())
        })
        .unwrap();
        assert_eq!(config.objects_dir, PathBuf::from("/tmp/objects"));
        assert_eq!(
            config.default_types,
            vec![ContentType::Trees, ContentType::Commits]
        );
    }

    #[test]
    fn test_bad_type_in_env() {
        let dir = tempdir().unwrap();
        let result = MetapackConfig::load_with(&dir.path().join("absent.yaml"), |k| {
            (k == "GIT_METAPACK_TYPES").then(|| "commits,blobs".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_tilde_expansion() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");

        let config_content = r#"
objects_dir: ~/src/project/.git/objects
default_types: [commits]
"#;
        std::fs::write(&config_path, config_content).unwrap();

        let loaded = MetapackConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.default_types, vec![ContentType::Commits]);
        if let Some(home) = dirs::home_dir() {
            assert_eq!(loaded.objects_dir, home.join("src/project/.git/objects"));
        }
    }

    #[test]
    fn test_unknown_field_rejected() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(&config_path, "objects_dir: /x\ncache_dir: /y\n").unwrap();

        assert!(MetapackConfig::load_from_file(&config_path).is_err());
    }
}
