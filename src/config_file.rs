use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const PROJECT_FILE_NAME: &str = ".chunkmillrc";

/// Keys understood in the `[pipeline]` section
pub const PIPELINE_KEYS: &[&str] = &[
    "input_dir",
    "output_dir",
    "pattern",
    "allow_empty",
    "chunk_size",
    "transform",
    "timeout",
    "dedup",
    "sort",
    "threads",
    "max_threads",
    "queue_capacity",
    "keep_alive",
    "shutdown_grace",
];

/// Settings read from INI config files, still as raw strings
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub pipeline: BTreeMap<String, String>,
}

impl ConfigFile {
    /// Walk up from `start` looking for `.chunkmillrc`
    pub fn find_project_config_from(start: &Path) -> Option<PathBuf> {
        let mut current = start.to_path_buf();
        loop {
            let config_path = current.join(PROJECT_FILE_NAME);
            if config_path.is_file() {
                return Some(config_path);
            }
            if !current.pop() {
                break;
            }
        }
        None
    }

    pub fn find_project_config() -> Option<PathBuf> {
        let cwd = env::current_dir().ok()?;
        Self::find_project_config_from(&cwd)
    }

    /// User config file locations in order of preference
    pub fn get_user_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if cfg!(windows) {
            if let Ok(appdata) = env::var("APPDATA") {
                paths.push(PathBuf::from(appdata).join("chunkmill").join("config.ini"));
            }
            if let Ok(userprofile) = env::var("USERPROFILE") {
                paths.push(PathBuf::from(userprofile).join(PROJECT_FILE_NAME));
            }
        } else {
            let xdg_config = env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    env::var("HOME")
                        .map(|h| PathBuf::from(h).join(".config"))
                        .unwrap_or_else(|_| PathBuf::from(".config"))
                });
            paths.push(xdg_config.join("chunkmill").join("config.ini"));

            if let Ok(home) = env::var("HOME") {
                paths.push(PathBuf::from(home).join(PROJECT_FILE_NAME));
            }
        }

        paths
    }

    /// Load with precedence project > user > nothing
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = Self::get_user_config_paths().into_iter().find(|p| p.is_file()) {
            config = Self::merge_configs(config, Self::load_from_path(&path)?);
        }

        if let Some(project_path) = Self::find_project_config() {
            config = Self::merge_configs(config, Self::load_from_path(&project_path)?);
        }

        Ok(config)
    }

    /// An explicit path replaces discovery entirely
    pub fn load_with_custom_path(custom_path: Option<&str>) -> Result<Self> {
        match custom_path {
            Some(path) => Self::load_from_path(Path::new(path)),
            None => Self::load(),
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        debug!(path = %path.display(), "loaded config file");
        Ok(Self::parse_ini_content(&content))
    }

    fn parse_ini_content(content: &str) -> Self {
        let mut pipeline = BTreeMap::new();
        let mut current_section = String::new();

        for line in content.lines() {
            let line = line.trim();

            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                current_section = line[1..line.len() - 1].trim().to_string();
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                warn!(line, "ignoring malformed config line");
                continue;
            };
            let key = key.trim().replace('-', "_");
            let value = value.trim().to_string();

            if current_section != "pipeline" {
                debug!(section = %current_section, key = %key, "ignoring key outside [pipeline]");
                continue;
            }
            if !PIPELINE_KEYS.contains(&key.as_str()) {
                warn!(key = %key, "ignoring unknown config key");
                continue;
            }
            pipeline.insert(key, value);
        }

        Self { pipeline }
    }

    /// The overlay wins for every key it sets
    fn merge_configs(base: Self, overlay: Self) -> Self {
        let mut pipeline = base.pipeline;
        pipeline.extend(overlay.pipeline);
        Self { pipeline }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pipeline.get(key).map(String::as_str)
    }

    /// Print where config is looked for and what was picked up
    pub fn show_config() {
        println!(
            "Configuration precedence: CLI > project {} > user config > defaults\n",
            PROJECT_FILE_NAME
        );

        let project_config_path = Self::find_project_config();
        let user_config_paths = Self::get_user_config_paths();

        match Self::load() {
            Ok(merged) if merged.pipeline.is_empty() => {
                println!("No configuration values found. Using defaults.");
            }
            Ok(merged) => {
                println!("Active [pipeline] values:");
                for (key, value) in &merged.pipeline {
                    println!("  {} = {}", key, value);
                }
            }
            Err(e) => eprintln!("Error loading configuration: {:#}", e),
        }

        println!("\nConfiguration search locations (in precedence order):");
        match &project_config_path {
            Some(path) => println!("  1. Project: {} (found)", path.display()),
            None => println!(
                "  1. Project: {} (searched up directory tree, not found)",
                PROJECT_FILE_NAME
            ),
        }
        for (i, path) in user_config_paths.iter().enumerate() {
            let status = if path.is_file() { "(found)" } else { "(not found)" };
            println!("  {}. User: {} {}", i + 2, path.display(), status);
        }

        if project_config_path.is_none() && !user_config_paths.iter().any(|p| p.is_file()) {
            println!("\nExample configuration file ({}):", PROJECT_FILE_NAME);
            println!();
            println!("[pipeline]");
            println!("threads = 8");
            println!("chunk_size = 500");
            println!("timeout = 2m");
            println!("dedup = content");
            println!("sort = timestamp-desc");
            println!("transform = trim,add-line-number");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_load_config_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "; comment").unwrap();
        writeln!(file, "[pipeline]").unwrap();
        writeln!(file, "threads = 8").unwrap();
        writeln!(file, "chunk-size=250").unwrap();
        writeln!(file, "timeout = 2m").unwrap();
        writeln!(file, "bogus = 1").unwrap();
        writeln!(file, "[other]").unwrap();
        writeln!(file, "threads = 99").unwrap();
        file.flush().unwrap();

        let config = ConfigFile::load_from_path(file.path()).unwrap();
        assert_eq!(config.get("threads"), Some("8"));
        assert_eq!(config.get("chunk_size"), Some("250"));
        assert_eq!(config.get("timeout"), Some("2m"));
        assert_eq!(config.get("bogus"), None);
        assert_eq!(config.pipeline.len(), 3);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = ConfigFile::load_from_path(&dir.path().join("nope.ini")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_project_config_discovery() {
        let temp_dir = TempDir::new().unwrap();
        let project_root = temp_dir.path().canonicalize().unwrap();
        let subdir = project_root.join("src").join("deep");
        std::fs::create_dir_all(&subdir).unwrap();

        let config_path = project_root.join(PROJECT_FILE_NAME);
        std::fs::write(&config_path, "[pipeline]\nthreads = 2\n").unwrap();

        assert_eq!(ConfigFile::find_project_config_from(&subdir), Some(config_path));
    }

    #[test]
    fn test_project_config_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let subdir = temp_dir.path().join("no-config");
        std::fs::create_dir_all(&subdir).unwrap();

        let found = ConfigFile::find_project_config_from(&subdir);
        // a config further up the real filesystem would be picked up too
        assert!(found.map_or(true, |p| !p.starts_with(temp_dir.path())));
    }

    #[test]
    fn test_config_merging() {
        let user = ConfigFile::parse_ini_content("[pipeline]\nthreads = 2\nsort = natural\n");
        let project = ConfigFile::parse_ini_content("[pipeline]\nthreads = 16\ndedup = content\n");

        let merged = ConfigFile::merge_configs(user, project);
        assert_eq!(merged.get("threads"), Some("16"));
        assert_eq!(merged.get("sort"), Some("natural"));
        assert_eq!(merged.get("dedup"), Some("content"));
    }

    #[test]
    fn test_user_config_paths() {
        for path in ConfigFile::get_user_config_paths() {
            let file_name = path.file_name().unwrap().to_string_lossy().to_string();
            assert!(
                file_name == "config.ini" || file_name == PROJECT_FILE_NAME,
                "Unexpected user config filename: {}",
                file_name
            );
        }
    }
}
