//! Configuration management
//!
//! 設定は以下の優先順位で読み込まれます:
//! 1. 環境変数
//! 2. switch-notice.toml 設定ファイル
//! 3. デフォルト値
//!
//! 設定ファイル内では `${VAR_NAME}` 形式で環境変数を展開できます。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::gateway::ClientIdentity;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "switch-notice.toml";

/// Main configuration for switch-notice
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// On-disk artifacts
    pub storage: StorageConfig,

    /// Reply text and attachment settings
    pub reply: ReplyConfig,

    /// Sender markers that exclude a conversation
    pub filter: FilterConfig,

    /// Connection timing and client identity
    pub connection: ConnectionConfig,

    /// WhatsApp HTTP bridge settings
    pub bridge: BridgeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding every artifact below
    pub data_dir: PathBuf,
    /// Login pairing QR code (PNG)
    pub qrcode_file: PathBuf,
    /// Serialized session token
    pub session_file: PathBuf,
    /// First-contact set
    pub video_sent_file: PathBuf,
    /// One-time attachment payload
    pub video_file: PathBuf,
    /// Reply body, re-read for every reply
    pub reply_text_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("appdata"),
            qrcode_file: PathBuf::from("qrcode.png"),
            session_file: PathBuf::from("session.json"),
            video_sent_file: PathBuf::from("video_sent.json"),
            video_file: PathBuf::from("switch_to_signal_video.mp4"),
            reply_text_file: PathBuf::from("reply_text.txt"),
        }
    }
}

impl StorageConfig {
    /// Resolve a configured file against `data_dir` (absolute paths pass through)
    pub fn resolve(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.data_dir.join(file)
        }
    }

    pub fn qrcode_path(&self) -> PathBuf {
        self.resolve(&self.qrcode_file)
    }

    pub fn session_path(&self) -> PathBuf {
        self.resolve(&self.session_file)
    }

    pub fn video_sent_path(&self) -> PathBuf {
        self.resolve(&self.video_sent_file)
    }

    pub fn video_path(&self) -> PathBuf {
        self.resolve(&self.video_file)
    }

    pub fn reply_text_path(&self) -> PathBuf {
        self.resolve(&self.reply_text_file)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyConfig {
    /// Used when the reply text file cannot be read
    pub default_text: String,
    /// Caption sent with the one-time attachment
    pub video_caption: String,
    /// MIME type of the one-time attachment
    pub video_mime: String,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            default_text: default_reply_text(),
            video_caption: "Switch to Signal!".to_string(),
            video_mime: "video/mp4".to_string(),
        }
    }
}

fn default_reply_text() -> String {
    "*This user has switched to Signal.*\nKindly use Signal app to contact them.".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Substrings marking a group conversation; any match excludes it
    ///
    /// `-` covers legacy `<creator>-<ts>@g.us` ids, `@g.us` covers current ones.
    pub group_markers: Vec<String>,
    /// Substring marking a status/broadcast channel
    pub status_marker: String,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            group_markers: vec!["-".to_string(), "@g.us".to_string()],
            status_marker: "status".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub connect_timeout_secs: u64,
    /// Wait before the single restore attempt after a connection failure
    pub reconnect_delay_secs: u64,
    /// Upper bound for an interactive login
    pub login_timeout_secs: u64,
    /// Upper bound for a restored link to report open
    pub restore_timeout_secs: u64,
    pub client_long_name: String,
    pub client_short_name: String,
    pub client_version: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            reconnect_delay_secs: 30,
            login_timeout_secs: 120,
            restore_timeout_secs: 60,
            client_long_name: "Google Chrome".to_string(),
            client_short_name: "Chrome".to_string(),
            client_version: "87".to_string(),
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn restore_timeout(&self) -> Duration {
        Duration::from_secs(self.restore_timeout_secs)
    }

    pub fn client_identity(&self) -> ClientIdentity {
        ClientIdentity {
            long_name: self.client_long_name.clone(),
            short_name: self.client_short_name.clone(),
            version: self.client_version.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Base URL of the WhatsApp HTTP bridge
    pub base_url: String,
    /// Global bridge API key
    pub api_key: Option<String>,
    /// Instance name registered on the bridge
    pub instance: String,
    /// Local address the webhook listener binds to
    pub webhook_listen: String,
    /// URL the bridge posts events to
    pub webhook_url: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: None,
            instance: "switch-notice".to_string(),
            webhook_listen: "0.0.0.0:8088".to_string(),
            webhook_url: "http://localhost:8088/webhook/whatsapp".to_string(),
        }
    }
}

impl BotConfig {
    /// 設定ファイルから環境変数を展開する
    ///
    /// `${VAR_NAME}` 形式の文字列を環境変数の値に置換します。
    /// 環境変数が存在しない場合は空文字列になります。
    fn expand_env_vars(value: &str) -> String {
        let mut result = String::new();
        let mut chars = value.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '$' && chars.peek() == Some(&'{') {
                chars.next(); // '{' を消費

                let mut var_name = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    var_name.push(c);
                }

                if let Ok(env_value) = std::env::var(&var_name) {
                    result.push_str(&env_value);
                }
            } else {
                result.push(c);
            }
        }

        result
    }

    /// TOML の文字列値に含まれる環境変数を再帰的に展開する
    fn expand_string_value(value: toml::Value) -> toml::Value {
        match value {
            toml::Value::String(s) => toml::Value::String(Self::expand_env_vars(&s)),
            toml::Value::Array(arr) => {
                toml::Value::Array(arr.into_iter().map(Self::expand_string_value).collect())
            }
            toml::Value::Table(table) => toml::Value::Table(
                table
                    .into_iter()
                    .map(|(k, v)| (k, Self::expand_string_value(v)))
                    .collect(),
            ),
            other => other,
        }
    }

    /// TOML 文字列から設定を読み込む (環境変数の上書きは行わない)
    ///
    /// パース後の文字列値のみを展開するため、コメント内の `${VAR}` は無視されます。
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))?;

        Self::expand_string_value(toml::Value::Table(table))
            .try_into()
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))
    }

    /// TOML 設定ファイルから設定を読み込む
    ///
    /// 既存の環境変数が設定ファイルの値より優先されます。
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let mut config = Self::from_toml_str(&content)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// 環境変数のみから設定を読み込む
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// デフォルトパスから設定を読み込む
    ///
    /// `./switch-notice.toml` が存在すればそれを使い、なければ環境変数のみ。
    pub fn load() -> Result<Self> {
        if Path::new(DEFAULT_CONFIG_FILE).exists() {
            return Self::from_toml_file(DEFAULT_CONFIG_FILE);
        }
        Ok(Self::from_env())
    }

    /// 環境変数で設定を上書きする
    ///
    /// 数値として解釈できない値は無視されます。
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        // Storage
        if let Some(dir) = non_empty("SN_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(path) = non_empty("SN_REPLY_TEXT") {
            self.storage.reply_text_file = PathBuf::from(path);
        }

        // Filter
        if let Some(markers) = non_empty("SN_GROUP_MARKER") {
            self.filter.group_markers = markers
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(marker) = non_empty("SN_STATUS_MARKER") {
            self.filter.status_marker = marker;
        }

        // Connection
        if let Some(secs) = non_empty("SN_CONNECT_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.connection.connect_timeout_secs = secs;
        }
        if let Some(secs) = non_empty("SN_RECONNECT_DELAY_SECS").and_then(|v| v.parse().ok()) {
            self.connection.reconnect_delay_secs = secs;
        }
        if let Some(secs) = non_empty("SN_LOGIN_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.connection.login_timeout_secs = secs;
        }
        if let Some(secs) = non_empty("SN_RESTORE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.connection.restore_timeout_secs = secs;
        }

        // Bridge
        if let Some(url) = non_empty("BRIDGE_BASE_URL") {
            self.bridge.base_url = url;
        }
        if let Some(key) = non_empty("BRIDGE_API_KEY") {
            self.bridge.api_key = Some(key);
        }
        if let Some(instance) = non_empty("BRIDGE_INSTANCE") {
            self.bridge.instance = instance;
        }
        if let Some(addr) = non_empty("WEBHOOK_LISTEN") {
            self.bridge.webhook_listen = addr;
        }
        if let Some(url) = non_empty("WEBHOOK_URL") {
            self.bridge.webhook_url = url;
        }
    }
}
