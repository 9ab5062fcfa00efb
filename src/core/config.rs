use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILE: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    #[serde(default = "default_chapter_count")]
    pub chapter_count: u32,

    #[serde(default = "default_max_words")]
    pub max_words_per_chapter: u32,

    #[serde(default = "default_max_manual_retries")]
    pub max_manual_retries: u32,

    #[serde(default = "default_true")]
    pub segment_images: bool,

    #[serde(default)]
    pub poll: PollConfig,

    #[serde(default)]
    pub endpoints: Endpoints,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PollConfig {
    #[serde(default = "default_poll_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_poll_attempts")]
    pub max_attempts: u32,
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_poll_interval(),
            max_attempts: default_poll_attempts(),
        }
    }
}

/// Paths of the remote endpoints, relative to `base_url`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Endpoints {
    #[serde(default = "default_generate")]
    pub generate_story: String,
    #[serde(default = "default_generate_from_image")]
    pub generate_story_from_image: String,
    #[serde(default = "default_regenerate_story")]
    pub regenerate_story: String,
    #[serde(default = "default_regenerate_image")]
    pub regenerate_image: String,
    #[serde(default = "default_describe_image")]
    pub describe_image: String,
    #[serde(default = "default_export_pdf")]
    pub export_pdf: String,
    #[serde(default = "default_pdf_preview")]
    pub pdf_preview: String,
    #[serde(default = "default_flipbook_from_url")]
    pub flipbook_from_url: String,
    #[serde(default = "default_flipbook_from_pdf")]
    pub flipbook_from_pdf: String,
    /// `{id}` is replaced by the job handle.
    #[serde(default = "default_flipbook_status")]
    pub flipbook_status: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            generate_story: default_generate(),
            generate_story_from_image: default_generate_from_image(),
            regenerate_story: default_regenerate_story(),
            regenerate_image: default_regenerate_image(),
            describe_image: default_describe_image(),
            export_pdf: default_export_pdf(),
            pdf_preview: default_pdf_preview(),
            flipbook_from_url: default_flipbook_from_url(),
            flipbook_from_pdf: default_flipbook_from_pdf(),
            flipbook_status: default_flipbook_status(),
        }
    }
}

fn default_base_url() -> String {
    "https://backendgpt.enfection.com".to_string()
}
fn default_output() -> String {
    "output".to_string()
}
fn default_request_timeout() -> u64 {
    60
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_chapter_count() -> u32 {
    3
}
fn default_max_words() -> u32 {
    300
}
fn default_max_manual_retries() -> u32 {
    3
}
fn default_true() -> bool {
    true
}
fn default_poll_interval() -> u64 {
    10
}
fn default_poll_attempts() -> u32 {
    5
}
fn default_generate() -> String {
    "/api/chat".to_string()
}
fn default_generate_from_image() -> String {
    "/api/generate-from-image".to_string()
}
fn default_regenerate_story() -> String {
    "/api/regenerate-story".to_string()
}
fn default_regenerate_image() -> String {
    "/api/regenerate-image".to_string()
}
fn default_describe_image() -> String {
    "/api/describe-image".to_string()
}
fn default_export_pdf() -> String {
    "/api/pdf".to_string()
}
fn default_pdf_preview() -> String {
    "/api/pdf-preview".to_string()
}
fn default_flipbook_from_url() -> String {
    "/api/flipbook".to_string()
}
fn default_flipbook_from_pdf() -> String {
    "/api/flipbook/upload".to_string()
}
fn default_flipbook_status() -> String {
    "/api/flipbook/status/{id}".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            output_folder: default_output(),
            request_timeout_seconds: default_request_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
            chapter_count: default_chapter_count(),
            max_words_per_chapter: default_max_words(),
            max_manual_retries: default_max_manual_retries(),
            segment_images: true,
            poll: PollConfig::default(),
            endpoints: Endpoints::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(CONFIG_FILE)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}
