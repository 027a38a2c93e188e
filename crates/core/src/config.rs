use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, time::Duration};

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-flash-latest";
pub const DEFAULT_TTS_MODEL: &str = "eleven_flash_v2_5";
pub const DEFAULT_DIRECTION_DELAY_MS: u64 = 2000;
pub const DEFAULT_NO_VOICE_DELAY_MS: u64 = 1500;
pub const DEFAULT_FAILURE_DELAY_MS: u64 = 1000;
pub const DEFAULT_STATE_FILE: &str = "method-ai-state.json";
pub const DEFAULT_PERSONA_FILE: &str = "personas.json";
pub const ENV_GEMINI_API_KEY: &str = "GEMINI_API_KEY";
pub const ENV_GOOGLE_API_KEY: &str = "GOOGLE_API_KEY";
pub const ENV_ELEVENLABS_API_KEY: &str = "ELEVENLABS_API_KEY";
pub const ENV_METHOD_AI_STATE: &str = "METHOD_AI_STATE";

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new<S: Into<String>>(value: S) -> Result<Self, ConfigError> {
        let v = value.into();
        if v.trim().is_empty() {
            return Err(ConfigError::EmptyApiKey);
        }
        Ok(Self(v))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(**redacted**)")
    }
}

/// Service credentials held by the operator. A user's own ElevenLabs key is
/// not stored here; it travels with each request as a bring-your-own credential.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiKeys {
    pub gemini: Option<ApiKey>,
    pub elevenlabs: Option<ApiKey>,
}

/// Fixed delays used by the rehearsal turn protocol.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RehearsalTimings {
    pub direction_delay_ms: u64,
    pub no_voice_delay_ms: u64,
    pub failure_delay_ms: u64,
}

impl RehearsalTimings {
    pub fn new(
        direction_delay_ms: u64,
        no_voice_delay_ms: u64,
        failure_delay_ms: u64,
    ) -> Result<Self, ConfigError> {
        if direction_delay_ms == 0 || no_voice_delay_ms == 0 || failure_delay_ms == 0 {
            return Err(ConfigError::ZeroDelay);
        }
        Ok(Self {
            direction_delay_ms,
            no_voice_delay_ms,
            failure_delay_ms,
        })
    }

    pub fn direction_delay(&self) -> Duration {
        Duration::from_millis(self.direction_delay_ms)
    }

    pub fn no_voice_delay(&self) -> Duration {
        Duration::from_millis(self.no_voice_delay_ms)
    }

    pub fn failure_delay(&self) -> Duration {
        Duration::from_millis(self.failure_delay_ms)
    }
}

impl Default for RehearsalTimings {
    fn default() -> Self {
        Self {
            direction_delay_ms: DEFAULT_DIRECTION_DELAY_MS,
            no_voice_delay_ms: DEFAULT_NO_VOICE_DELAY_MS,
            failure_delay_ms: DEFAULT_FAILURE_DELAY_MS,
        }
    }
}

/// Free-tier limits applied to synthesis requests made without a user credential.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuotaLimits {
    pub daily_requests: u32,
    pub max_chars_per_request: usize,
    pub window: Duration,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            daily_requests: 10,
            max_chars_per_request: 500,
            window: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub api_keys: ApiKeys,
    pub gemini_model: String,
    pub tts_model: String,
    pub timings: RehearsalTimings,
    pub quota: QuotaLimits,
    pub state_file: PathBuf,
    pub persona_file: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_keys: ApiKeys::default(),
            gemini_model: DEFAULT_GEMINI_MODEL.to_owned(),
            tts_model: DEFAULT_TTS_MODEL.to_owned(),
            timings: RehearsalTimings::default(),
            quota: QuotaLimits::default(),
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
            persona_file: PathBuf::from(DEFAULT_PERSONA_FILE),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("api key must not be empty")]
    EmptyApiKey,
    #[error("rehearsal delays must be > 0 ms")]
    ZeroDelay,
}

pub trait Env {
    fn var(&self, key: &str) -> Option<String>;
}

#[derive(Clone, Debug, Default)]
pub struct StdEnv;

impl Env for StdEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MapEnv {
    vars: std::collections::BTreeMap<String, String>,
}

impl MapEnv {
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_owned(), value.to_owned());
        self
    }
}

impl Env for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

pub fn resolve_api_key(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
) -> Result<Option<ApiKey>, ConfigError> {
    match cli_value {
        Some(v) => Ok(Some(ApiKey::new(v)?)),
        None => match env.var(env_key) {
            Some(v) => Ok(Some(ApiKey::new(v)?)),
            None => Ok(None),
        },
    }
}

/// Gemini accepts either variable name; `GEMINI_API_KEY` wins when both are set.
pub fn resolve_gemini_key(
    cli_value: Option<String>,
    env: &impl Env,
) -> Result<Option<ApiKey>, ConfigError> {
    match resolve_api_key(cli_value, ENV_GEMINI_API_KEY, env)? {
        Some(key) => Ok(Some(key)),
        None => resolve_api_key(None, ENV_GOOGLE_API_KEY, env),
    }
}

pub fn resolve_string_with_default(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
    default: &str,
) -> String {
    match cli_value {
        Some(v) => v,
        None => env.var(env_key).unwrap_or_else(|| default.to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elevenlabs_flag_beats_env_and_env_fills_gap() {
        let env = MapEnv::default().with_var(ENV_ELEVENLABS_API_KEY, "from-env");
        let flagged = resolve_api_key(Some("from-flag".into()), ENV_ELEVENLABS_API_KEY, &env)
            .unwrap()
            .unwrap();
        assert_eq!(flagged.expose(), "from-flag");

        let fallback = resolve_api_key(None, ENV_ELEVENLABS_API_KEY, &env).unwrap().unwrap();
        assert_eq!(fallback.expose(), "from-env");

        assert!(resolve_api_key(None, ENV_ELEVENLABS_API_KEY, &MapEnv::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn blank_api_key_is_rejected() {
        let env = MapEnv::default().with_var(ENV_ELEVENLABS_API_KEY, "   ");
        let err = resolve_api_key(None, ENV_ELEVENLABS_API_KEY, &env).unwrap_err();
        assert_eq!(err, ConfigError::EmptyApiKey);
    }

    #[test]
    fn gemini_key_falls_back_to_google_variable() {
        let env = MapEnv::default().with_var(ENV_GOOGLE_API_KEY, "google");
        let key = resolve_gemini_key(None, &env).unwrap().unwrap();
        assert_eq!(key.expose(), "google");

        let env = env.with_var(ENV_GEMINI_API_KEY, "gemini");
        let key = resolve_gemini_key(None, &env).unwrap().unwrap();
        assert_eq!(key.expose(), "gemini");
    }

    #[test]
    fn api_key_debug_is_redacted() {
        let key = ApiKey::new("sk-secret").unwrap();
        assert!(!format!("{key:?}").contains("secret"));
    }

    #[test]
    fn timings_reject_zero_delay() {
        assert_eq!(RehearsalTimings::new(0, 1, 1), Err(ConfigError::ZeroDelay));
        let t = RehearsalTimings::new(2000, 1500, 1000).unwrap();
        assert_eq!(t.direction_delay(), Duration::from_secs(2));
        assert_eq!(t.no_voice_delay(), Duration::from_millis(1500));
    }

    #[test]
    fn state_file_resolution_order() {
        let empty = MapEnv::default();
        let v = resolve_string_with_default(None, ENV_METHOD_AI_STATE, &empty, DEFAULT_STATE_FILE);
        assert_eq!(v, DEFAULT_STATE_FILE);

        let env = MapEnv::default().with_var(ENV_METHOD_AI_STATE, "/var/lib/studio.json");
        let v = resolve_string_with_default(None, ENV_METHOD_AI_STATE, &env, DEFAULT_STATE_FILE);
        assert_eq!(v, "/var/lib/studio.json");
        let flag = Some("here.json".to_owned());
        let v = resolve_string_with_default(flag, ENV_METHOD_AI_STATE, &env, DEFAULT_STATE_FILE);
        assert_eq!(v, "here.json");
    }
}
