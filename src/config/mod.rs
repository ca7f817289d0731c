use std::{
    collections::HashMap,
    env, fs,
    io::{BufRead, BufReader},
    path::PathBuf,
    time::Duration,
};

use directories::BaseDirs;

/// Key=value configuration: defaults, overlaid by `.nbtestrc`, overlaid
/// by environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        let mut map = default_map();
        let config_path = default_config_path();

        if config_path.exists() {
            if let Ok(file) = fs::File::open(&config_path) {
                let reader = BufReader::new(file);
                for line in reader.lines().map_while(|l| l.ok()) {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    if let Some((k, v)) = line.split_once('=') {
                        map.insert(k.trim().to_string(), v.trim().to_string());
                    }
                }
            }
        }

        // Environment variables take precedence
        for (k, v) in env::vars() {
            if is_config_key(&k) {
                map.insert(k, v);
            }
        }

        Self { inner: map, config_path }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        if let Ok(v) = env::var(key) {
            return Some(v);
        }
        self.inner.get(key).cloned()
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.parse::<usize>().ok())
    }

    pub fn python(&self) -> String {
        self.get("NBTEST_PYTHON").unwrap_or_else(|| "python3".into())
    }

    pub fn timeout(&self) -> Duration {
        let secs = self
            .get("NBTEST_TIMEOUT")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(120);
        Duration::from_secs(secs)
    }

    pub fn max_kernels(&self) -> usize {
        self.get_usize("NBTEST_MAX_KERNELS").unwrap_or(1000)
    }
}

fn is_config_key(k: &str) -> bool {
    k.starts_with("NBTEST_")
}

fn default_config_path() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("nbtest").join(".nbtestrc")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();
    m.insert("NBTEST_PYTHON".into(), "python3".into());
    m.insert("NBTEST_TIMEOUT".into(), "120".into());
    m.insert("NBTEST_MAX_KERNELS".into(), "1000".into());
    m
}
