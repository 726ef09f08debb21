use std::path::PathBuf;
use std::time::Duration;

use rocket::figment::providers::{Env, Format, Serialized, Toml};
use rocket::figment::{Figment, Profile};
use serde::{Deserialize, Serialize};

/// Service settings read from the same figment as Rocket's own config
/// (`Rocket.toml`, then `ROCKET_*` env vars, e.g. `ROCKET_MODEL_PATH`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub model_path: PathBuf,
    pub max_concurrent_infer: usize,
    pub infer_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("saved_models/hourly_energy_prediction.safetensors"),
            max_concurrent_infer: 4,
            infer_timeout_ms: 10_000,
        }
    }
}

impl ServerConfig {
    pub fn infer_timeout(&self) -> Duration {
        Duration::from_millis(self.infer_timeout_ms)
    }
}

/// Rocket's default figment, with the service defaults (0.0.0.0:5005 plus
/// `ServerConfig::default()`) slotted in below the file and env layers.
pub fn figment() -> Figment {
    Figment::from(rocket::Config::default())
        .merge(("address", "0.0.0.0"))
        .merge(("port", 5005))
        .merge(Serialized::defaults(ServerConfig::default()))
        .merge(Toml::file(Env::var_or("ROCKET_CONFIG", "Rocket.toml")).nested())
        .merge(Env::prefixed("ROCKET_").ignore(&["PROFILE"]).global())
        .select(Profile::from_env_or(
            "ROCKET_PROFILE",
            rocket::Config::DEFAULT_PROFILE,
        ))
}
