//! Configuration for the inference gateway.

use std::collections::HashSet;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use config::{Config as ConfigLoader, File, FileFormat};
use serde::{Deserialize, Deserializer};

/// Explicit config file path.
pub const CONFIG_PATH_ENV: &str = "NB_CONFIG_PATH";
/// Overrides `env` (the environment label).
pub const LOG_MODE_ENV: &str = "LOG_MODE";
/// Overrides `http.addr`.
pub const HTTP_ADDR_ENV: &str = "NB_HTTP_ADDR";
/// Overrides `http.enable_oai_compat` (truthy values enable it).
pub const ENABLE_OAI_COMPAT_ENV: &str = "NB_ENABLE_OAI_COMPAT";
/// Conventional config location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/inference-gateway.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to decode config: {0}")]
    Decode(#[from] config::ConfigError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Root configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Free-form environment label (e.g. "development", "production").
    pub env: String,
    pub http: HttpConfig,
    pub models: Vec<ModelConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env: default_env(),
            http: HttpConfig::default(),
            models: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address. Go-style `:8080` binds every interface.
    pub addr: String,
    #[serde(deserialize_with = "duration::deserialize")]
    pub read_header_timeout: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub idle_timeout: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub shutdown_timeout: Duration,
    pub max_request_bytes: usize,
    pub enable_oai_compat: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            read_header_timeout: default_read_header_timeout(),
            idle_timeout: default_idle_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
            max_request_bytes: default_max_request_bytes(),
            enable_oai_compat: false,
        }
    }
}

impl HttpConfig {
    /// Address suitable for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        if self.addr.starts_with(':') {
            format!("0.0.0.0{}", self.addr)
        } else {
            self.addr.clone()
        }
    }
}

/// One public model and the engine serving it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Public model ID exposed to clients.
    pub id: String,
    /// Name sent upstream. Defaults to `id`.
    pub upstream_model: Option<String>,
    pub engine: EngineConfig,
}

impl ModelConfig {
    /// The built-in sample model used when no config file exists.
    pub fn sample_mock() -> Self {
        Self {
            id: "mock-1".to_string(),
            upstream_model: None,
            engine: EngineConfig {
                kind: Some(EngineKind::Mock),
                ..EngineConfig::default()
            },
        }
    }

    pub fn upstream_model(&self) -> &str {
        self.upstream_model.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Mock,
    UpstreamHttp,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Mock => "mock",
            EngineKind::UpstreamHttp => "upstream_http",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(EngineKind::Mock),
            "upstream_http" => Ok(EngineKind::UpstreamHttp),
            other => Err(format!(
                "unknown engine type \"{other}\" (expected \"mock\" or \"upstream_http\")"
            )),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    #[serde(rename = "type", deserialize_with = "deserialize_engine_kind")]
    pub kind: Option<EngineKind>,
    pub base_url: String,
    pub api_key: Option<String>,
    pub chat_completions_path: String,
    pub embeddings_path: String,
    /// Cap on a non-streaming upstream call.
    #[serde(deserialize_with = "duration::deserialize")]
    pub timeout: Duration,
    /// Cap on a streaming upstream call. Zero means no cap beyond the client
    /// connection.
    #[serde(deserialize_with = "duration::deserialize")]
    pub stream_timeout: Duration,
    pub json_schema: JsonSchemaConfig,
}

/// How strict JSON output is enforced against an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaMode {
    /// Pass nothing extra; validate only.
    None,
    /// Constrain sampling with `guided_json`.
    Guided,
    /// Inject a system message describing the schema.
    Prompt,
    /// Guided first, prompt injection on retries.
    #[default]
    Auto,
}

impl SchemaMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaMode::None => "none",
            SchemaMode::Guided => "guided",
            SchemaMode::Prompt => "prompt",
            SchemaMode::Auto => "auto",
        }
    }
}

impl FromStr for SchemaMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(SchemaMode::Auto),
            "none" => Ok(SchemaMode::None),
            "guided" => Ok(SchemaMode::Guided),
            "prompt" => Ok(SchemaMode::Prompt),
            other => Err(format!(
                "unknown json_schema mode \"{other}\" (expected none, guided, prompt or auto)"
            )),
        }
    }
}

impl<'de> Deserialize<'de> for SchemaMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JsonSchemaConfig {
    pub mode: SchemaMode,
    /// Additional attempts after the first. Zero selects the default.
    pub max_retries: u32,
    /// Largest schema (serialized) inlined into an injected prompt. Zero
    /// selects the default.
    pub max_prompt_bytes: usize,
}

impl Default for JsonSchemaConfig {
    fn default() -> Self {
        Self {
            mode: SchemaMode::Auto,
            max_retries: default_max_retries(),
            max_prompt_bytes: default_max_prompt_bytes(),
        }
    }
}

// Default values
fn default_env() -> String {
    "development".to_string()
}
fn default_addr() -> String {
    ":8080".to_string()
}
fn default_read_header_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_idle_timeout() -> Duration {
    Duration::from_secs(120)
}
fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(15)
}
fn default_max_request_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_engine_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_chat_completions_path() -> String {
    "/v1/chat/completions".to_string()
}
fn default_embeddings_path() -> String {
    "/v1/embeddings".to_string()
}
fn default_max_retries() -> u32 {
    2
}
fn default_max_prompt_bytes() -> usize {
    64 * 1024
}

fn deserialize_engine_kind<'de, D>(deserializer: D) -> Result<Option<EngineKind>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(name) => name.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Values accepted as "on" for boolean environment overrides.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "t" | "yes" | "y" | "on"
    )
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment overrides (`LOG_MODE`, `NB_HTTP_ADDR`, `NB_ENABLE_OAI_COMPAT`)
    /// 2. JSON file at `NB_CONFIG_PATH`, else `config/inference-gateway.json`
    /// 3. Built-in defaults (a single mock model when no file exists)
    pub fn load() -> Result<Self, ConfigError> {
        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::load_with(|key| env::var(key).ok(), &cwd)
    }

    /// Same as [`Config::load`] with an injectable variable lookup and
    /// working directory.
    pub fn load_with<F>(lookup: F, cwd: &Path) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = resolve_config_path(&lookup, cwd)?;

        let mut builder = ConfigLoader::builder();
        if let Some(path) = &file {
            tracing::debug!("Loading config from {}", path.display());
            builder = builder.add_source(
                File::from(path.as_path())
                    .format(FileFormat::Json)
                    .required(true),
            );
        }

        let loaded = builder
            .set_override_option("env", non_empty(lookup(LOG_MODE_ENV)))?
            .set_override_option("http.addr", non_empty(lookup(HTTP_ADDR_ENV)))?
            .set_override_option(
                "http.enable_oai_compat",
                lookup(ENABLE_OAI_COMPAT_ENV).map(|v| is_truthy(&v)),
            )?
            .build()?;

        let mut config: Config = loaded.try_deserialize()?;
        if file.is_none() && config.models.is_empty() {
            config.models.push(ModelConfig::sample_mock());
        }

        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Trim identifiers, strip trailing slashes and fill zero values with
    /// defaults.
    pub fn normalize(&mut self) {
        self.env = non_empty(Some(self.env.clone())).unwrap_or_else(default_env);

        let http = &mut self.http;
        http.addr = non_empty(Some(http.addr.clone())).unwrap_or_else(default_addr);
        if http.read_header_timeout.is_zero() {
            http.read_header_timeout = default_read_header_timeout();
        }
        if http.idle_timeout.is_zero() {
            http.idle_timeout = default_idle_timeout();
        }
        if http.shutdown_timeout.is_zero() {
            http.shutdown_timeout = default_shutdown_timeout();
        }
        if http.max_request_bytes == 0 {
            http.max_request_bytes = default_max_request_bytes();
        }

        for model in &mut self.models {
            model.id = model.id.trim().to_string();
            model.upstream_model = non_empty(model.upstream_model.take());
            model.engine.normalize();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.models.is_empty() {
            return Err(ConfigError::Invalid(
                "models: at least one model is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for (i, model) in self.models.iter().enumerate() {
            if model.id.is_empty() {
                return Err(ConfigError::Invalid(format!("models[{i}].id is required")));
            }
            if !seen.insert(model.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "models[{i}]: duplicate model id \"{}\"",
                    model.id
                )));
            }

            let engine = &model.engine;
            match engine.kind {
                None => {
                    return Err(ConfigError::Invalid(format!(
                        "models[{i}] ({}): engine.type is required",
                        model.id
                    )));
                }
                Some(EngineKind::UpstreamHttp) => {
                    if engine.base_url.is_empty() {
                        return Err(ConfigError::Invalid(format!(
                            "models[{i}] ({}): engine.base_url is required for upstream_http",
                            model.id
                        )));
                    }
                    if !engine.base_url.starts_with("http://")
                        && !engine.base_url.starts_with("https://")
                    {
                        return Err(ConfigError::Invalid(format!(
                            "models[{i}] ({}): engine.base_url must be an http(s) URL, got \"{}\"",
                            model.id, engine.base_url
                        )));
                    }
                }
                Some(EngineKind::Mock) => {}
            }
        }

        Ok(())
    }
}

impl EngineConfig {
    fn normalize(&mut self) {
        self.base_url = self.base_url.trim().trim_end_matches('/').to_string();
        self.api_key = non_empty(self.api_key.take());
        self.chat_completions_path =
            normalize_path(&self.chat_completions_path, default_chat_completions_path);
        self.embeddings_path = normalize_path(&self.embeddings_path, default_embeddings_path);
        if self.timeout.is_zero() {
            self.timeout = default_engine_timeout();
        }
        if self.json_schema.max_retries == 0 {
            self.json_schema.max_retries = default_max_retries();
        }
        if self.json_schema.max_prompt_bytes == 0 {
            self.json_schema.max_prompt_bytes = default_max_prompt_bytes();
        }
    }
}

fn normalize_path(path: &str, default: fn() -> String) -> String {
    let path = path.trim();
    if path.is_empty() {
        default()
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

fn resolve_config_path<F>(lookup: &F, cwd: &Path) -> Result<Option<PathBuf>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(explicit) = non_empty(lookup(CONFIG_PATH_ENV)) {
        let path = PathBuf::from(explicit);
        let path = if path.is_absolute() { path } else { cwd.join(path) };
        if !path.is_file() {
            return Err(ConfigError::NotFound(path));
        }
        return Ok(Some(path));
    }

    let conventional = cwd.join(DEFAULT_CONFIG_PATH);
    Ok(conventional.is_file().then_some(conventional))
}

/// Durations given either as integer nanoseconds or as strings like `5s`,
/// `2m` or `1m30s`.
pub mod duration {
    use std::fmt;
    use std::time::Duration;

    use serde::de::{self, Deserializer, Visitor};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurationVisitor;

        impl<'de> Visitor<'de> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a duration as nanoseconds or a string like \"5s\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
                Ok(Duration::from_nanos(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
                u64::try_from(v)
                    .map(Duration::from_nanos)
                    .map_err(|_| E::custom(format!("negative duration: {v}")))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Duration, E> {
                if v.is_finite() && v >= 0.0 {
                    Ok(Duration::from_nanos(v as u64))
                } else {
                    Err(E::custom(format!("invalid duration: {v}")))
                }
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
                parse(v).map_err(E::custom)
            }

            fn visit_unit<E: de::Error>(self) -> Result<Duration, E> {
                Ok(Duration::ZERO)
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }

    /// Parse a Go-style duration string.
    pub fn parse(input: &str) -> Result<Duration, String> {
        let s = input.trim();
        if s.is_empty() {
            return Err("empty duration".to_string());
        }
        if s == "0" {
            return Ok(Duration::ZERO);
        }
        // Bare integers are nanoseconds, matching the numeric form.
        if let Ok(nanos) = s.parse::<u64>() {
            return Ok(Duration::from_nanos(nanos));
        }

        let mut total = 0f64;
        let mut rest = s;
        while !rest.is_empty() {
            let num_len = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .unwrap_or(rest.len());
            if num_len == 0 {
                return Err(format!("invalid duration \"{input}\""));
            }
            let value: f64 = rest[..num_len]
                .parse()
                .map_err(|_| format!("invalid duration \"{input}\""))?;
            rest = &rest[num_len..];

            let unit_len = rest
                .find(|c: char| c.is_ascii_digit() || c == '.')
                .unwrap_or(rest.len());
            let nanos_per_unit = match &rest[..unit_len] {
                "ns" => 1.0,
                "us" | "µs" => 1e3,
                "ms" => 1e6,
                "s" => 1e9,
                "m" => 60e9,
                "h" => 3600e9,
                "" => return Err(format!("missing unit in duration \"{input}\"")),
                unit => return Err(format!("unknown unit \"{unit}\" in duration \"{input}\"")),
            };
            total += value * nanos_per_unit;
            rest = &rest[unit_len..];
        }

        Ok(Duration::from_nanos(total.round() as u64))
    }
}
