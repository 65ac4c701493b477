use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address for the status/health listener.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Telegram bot token
    pub telegram_token: String,

    /// Gemini API keys, comma-separated. At least one is required;
    /// the credential pool refuses to start empty.
    pub gemini_api_keys: Vec<String>,

    /// Gemini model used for image diagnosis
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,

    /// Telegram channel that receives confirmed diagnoses (curated dataset)
    #[serde(default = "default_dataset_channel")]
    pub dataset_channel_id: String,

    /// Operator chat for pool-exhausted and archive-failure alerts
    #[serde(default)]
    pub admin_chat_id: Option<i64>,

    /// Directory for the record collection file and raw image blobs
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Maximum number of diagnosis records retained (oldest evicted first)
    #[serde(default = "default_max_records")]
    pub max_records: usize,

    /// Timeout for one Gemini analysis call, in seconds
    #[serde(default = "default_analysis_timeout_secs")]
    pub analysis_timeout_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_gemini_model() -> String {
    "gemini-3-flash-preview".to_string()
}

fn default_dataset_channel() -> String {
    "-1003359411043".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_max_records() -> usize {
    100
}

fn default_analysis_timeout_secs() -> u64 {
    60
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}
