use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub input: Input,
    #[serde(default)]
    pub batching: Batching,
    #[serde(default)]
    pub retry: Retry,
    #[serde(default)]
    pub agent: Agent,
    #[serde(default)]
    pub watch: Watch,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub debug: Debug,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            global: Default::default(),
            paths: Default::default(),
            input: Default::default(),
            batching: Default::default(),
            retry: Default::default(),
            agent: Default::default(),
            watch: Default::default(),
            logging: Default::default(),
            debug: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Global {
    pub resume: bool,
    pub print_summary: bool,
}
impl Default for Global {
    fn default() -> Self {
        Self {
            resume: true,
            print_summary: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paths {
    pub out_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            out_dir: "out".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Input {
    pub extensions: Vec<String>,
}
impl Default for Input {
    fn default() -> Self {
        Self {
            extensions: vec!["csv".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batching {
    pub batch_size: usize,
    pub mini_batch_size: usize,
    pub mini_batch_delay_seconds: u64,
}
impl Default for Batching {
    fn default() -> Self {
        Self {
            batch_size: 50,
            mini_batch_size: 5,
            mini_batch_delay_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Retry {
    pub max_retries: u32,
    pub base_delay_seconds: u64,
    pub rate_limit_delay_seconds: u64,
}
impl Default for Retry {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_seconds: 5,
            rate_limit_delay_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub command: String,
    pub args: Vec<String>,
    pub timeout_seconds: u64,
    pub model_id: String,
    #[serde(default)]
    pub env: std::collections::BTreeMap<String, String>,
}
impl Default for Agent {
    fn default() -> Self {
        Self {
            command: "claude".into(),
            args: vec!["-p".into()],
            timeout_seconds: 600,
            model_id: "claude-sonnet-4".into(),
            env: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Watch {
    pub poll_interval_seconds: u64,
}
impl Default for Watch {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Debug {
    pub keep_agent_stderr: bool,
    pub dump_effective_config: bool,
}
impl Default for Debug {
    fn default() -> Self {
        Self {
            keep_agent_stderr: true,
            dump_effective_config: false,
        }
    }
}
