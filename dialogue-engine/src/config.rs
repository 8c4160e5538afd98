//! Engine configuration from environment variables
//!
//! Everything has a default; the engine runs against a local Ollama with no
//! configuration at all. A `.env` file is honored when present in the
//! working directory or any ancestor.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use dialogue_types::{ConversationLimits, RoleBinding, RoleId};

const DEFAULT_DB_PATH: &str = "data/conversations.db";
const DEFAULT_MODEL: &str = "llama2";
const DEFAULT_PROVIDER_URL: &str = "http://localhost:11434";
const DEFAULT_TOPIC: &str = "What makes a conversation worth having?";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub db_path: String,
    /// First binding speaks first.
    pub bindings: [RoleBinding; 2],
    /// Persona/system guidance per binding, same order.
    pub personas: [Option<String>; 2],
    pub limits: ConversationLimits,
    pub topic: String,
    pub guidance: Option<String>,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let shared_url =
            lookup("DIALOGUE_PROVIDER_URL").unwrap_or_else(|| DEFAULT_PROVIDER_URL.to_string());
        let temperature = parse_or(&lookup, "DIALOGUE_TEMPERATURE", 0.7f32);

        let binding_for = |suffix: &str, role: &str| RoleBinding {
            role: RoleId::from(role),
            model: lookup(&format!("DIALOGUE_MODEL_{suffix}"))
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            provider_url: lookup(&format!("DIALOGUE_PROVIDER_URL_{suffix}"))
                .unwrap_or_else(|| shared_url.clone()),
            temperature,
        };

        let limits = ConversationLimits::new(
            Duration::from_secs(parse_or(&lookup, "DIALOGUE_MAX_DURATION_SECS", 300u64)),
            parse_or(&lookup, "DIALOGUE_MAX_TURNS", 10u32),
            Duration::from_secs(parse_or(&lookup, "DIALOGUE_TURN_TIMEOUT_SECS", 30u64)),
        );

        Self {
            db_path: lookup("DIALOGUE_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            bindings: [binding_for("A", "model_a"), binding_for("B", "model_b")],
            personas: [lookup("DIALOGUE_PERSONA_A"), lookup("DIALOGUE_PERSONA_B")],
            limits,
            topic: lookup("DIALOGUE_TOPIC").unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            guidance: lookup("DIALOGUE_GUIDANCE"),
        }
    }
}

fn parse_or<T: FromStr + Copy>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        Some(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, raw = %raw, "unparseable value, using default");
                default
            }
        },
        None => default,
    }
}

/// Load the nearest `.env` walking up from the working directory.
pub fn load_env_file() {
    let Ok(start) = std::env::current_dir() else {
        return;
    };
    let mut dir: Option<PathBuf> = Some(start);
    while let Some(d) = dir {
        let candidate = d.join(".env");
        if candidate.is_file() {
            let _ = dotenvy::from_path(&candidate);
            return;
        }
        dir = d.parent().map(PathBuf::from);
    }
}
