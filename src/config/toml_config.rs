use crate::config::TranslatorConfig;
use crate::core::dispatcher::DEFAULT_PACING;
use crate::core::session::SessionConfig;
use crate::core::validator::ValidationPolicy;
use crate::domain::ports::LinkSettings;
use crate::utils::error::{RelayError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_positive_number, validate_range, validate_url, Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
pub const DEFAULT_MODEL: &str = "qwen-plus";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub serial: SerialConfig,
    pub dispatch: DispatchConfig,
    pub telemetry: TelemetryConfig,
    pub translator: TranslatorSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub read_timeout_ms: Option<u64>,
    pub list_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub pacing_ms: Option<u64>,
    pub validation: Option<ValidationPolicy>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub channel_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorSection {
    pub enabled: Option<bool>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout_seconds: Option<u64>,
}

impl RelayConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| RelayError::ConfigError {
            message: format!("cannot read {}: {}", path.as_ref().display(), e),
        })?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| RelayError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${DASHSCOPE_API_KEY})，未設定者保留原樣
    fn substitute_env_vars(content: &str) -> String {
        let re = Regex::new(r"\$\{([^}]+)\}").unwrap();

        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .to_string()
    }

    /// Fills settings the file left unset from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|name| std::env::var(name).ok());
    }

    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.server.bind.is_none() {
            if let Some(port) = lookup("PORT") {
                self.server.bind = Some(format!("0.0.0.0:{}", port));
            }
        }

        let translator = &mut self.translator;
        // 未替換的 ${VAR} 視為未設定
        if translator
            .api_key
            .as_deref()
            .is_some_and(|k| k.is_empty() || k.starts_with("${"))
        {
            translator.api_key = None;
        }
        if translator.api_key.is_none() {
            translator.api_key = lookup("OPENAI_API_KEY").or_else(|| lookup("DASHSCOPE_API_KEY"));
        }
        if translator.base_url.is_none() {
            translator.base_url = lookup("DASHSCOPE_API_BASE");
        }
        if translator.model.is_none() {
            translator.model = lookup("LLM_MODEL");
        }
    }

    pub fn bind_addr(&self) -> String {
        self.server
            .bind
            .clone()
            .unwrap_or_else(|| format!("0.0.0.0:{}", DEFAULT_PORT))
    }

    pub fn pacing(&self) -> Duration {
        self.dispatch
            .pacing_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_PACING)
    }

    pub fn validation_policy(&self) -> ValidationPolicy {
        self.dispatch.validation.unwrap_or_default()
    }

    pub fn telemetry_capacity(&self) -> usize {
        self.telemetry.channel_capacity.unwrap_or(256)
    }

    pub fn session_config(&self) -> SessionConfig {
        let defaults = SessionConfig::default();
        SessionConfig {
            link: LinkSettings {
                baud_rate: LinkSettings::BAUD_RATE,
                read_timeout: self
                    .serial
                    .read_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.link.read_timeout),
            },
            list_timeout: self
                .serial
                .list_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.list_timeout),
        }
    }

    pub fn translator_enabled(&self) -> bool {
        self.translator.enabled.unwrap_or(true)
    }

    pub fn translator_config(&self) -> TranslatorConfig {
        let t = &self.translator;
        TranslatorConfig {
            base_url: t
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: t.api_key.clone(),
            model: t.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature: t.temperature.unwrap_or(0.3),
            max_tokens: t.max_tokens.unwrap_or(200),
            timeout_seconds: t.timeout_seconds.unwrap_or(30),
        }
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        let bind = self.bind_addr();
        validate_non_empty_string("server.bind", &bind)?;
        let port_ok = bind
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if !port_ok {
            return Err(RelayError::InvalidConfigValueError {
                field: "server.bind".to_string(),
                value: bind,
                reason: "Expected <host>:<port>".to_string(),
            });
        }

        if let Some(ms) = self.dispatch.pacing_ms {
            // 不得低於預設間隔
            let floor = DEFAULT_PACING.as_millis() as u64;
            validate_positive_number("dispatch.pacing_ms", ms, floor)?;
        }
        if let Some(ms) = self.serial.read_timeout_ms {
            validate_positive_number("serial.read_timeout_ms", ms, 1)?;
        }
        if let Some(ms) = self.serial.list_timeout_ms {
            validate_positive_number("serial.list_timeout_ms", ms, 1)?;
        }
        if let Some(capacity) = self.telemetry.channel_capacity {
            validate_positive_number("telemetry.channel_capacity", capacity as u64, 1)?;
        }

        if self.translator_enabled() {
            let t = self.translator_config();
            validate_url("translator.base_url", &t.base_url)?;
            validate_non_empty_string("translator.model", &t.model)?;
            validate_range("translator.temperature", t.temperature, 0.0, 2.0)?;
            validate_positive_number("translator.max_tokens", u64::from(t.max_tokens), 1)?;
            validate_positive_number("translator.timeout_seconds", t.timeout_seconds, 1)?;
        }

        Ok(())
    }
}

impl Validate for RelayConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
