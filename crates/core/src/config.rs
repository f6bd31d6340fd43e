//! Shared config-loading helper. Component crates define their own
//! `Default`-bearing config structs; this just wires the common
//! `config::Config` builder + `.env` loading pattern once.

use serde::de::DeserializeOwned;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
}

/// Loads `T` by layering (in order) a `config/<base_name>.toml` file (if
/// present), then environment variables prefixed with `env_prefix` and
/// separated by `__` for nesting, e.g. `TASTE__SCORING__TOPK_REDUCE`.
pub fn load_layered<T: DeserializeOwned + Default + serde::Serialize>(
    base_name: &str,
    env_prefix: &str,
) -> Result<T, ConfigError> {
    let defaults = T::default();
    let defaults_json = serde_json::to_value(&defaults).unwrap_or(serde_json::Value::Null);

    let mut builder = config::Config::builder();
    if let serde_json::Value::Object(map) = defaults_json {
        for (k, v) in map {
            if let Ok(s) = serde_json::to_string(&v) {
                builder = builder.clone().set_default(&k, s).unwrap_or(builder);
            }
        }
    }

    let builder = builder
        .add_source(config::File::with_name(&format!("config/{base_name}")).required(false))
        .add_source(
            config::Environment::with_prefix(env_prefix)
                .separator("__")
                .try_parsing(true),
        );

    match builder.build() {
        Ok(cfg) => cfg.try_deserialize().or(Ok(T::default())),
        Err(_) => Ok(T::default()),
    }
}

pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct Sample {
        value: u32,
    }

    impl Default for Sample {
        fn default() -> Self {
            Self { value: 7 }
        }
    }

    #[test]
    fn falls_back_to_defaults_without_file_or_env() {
        let cfg: Sample = load_layered("nonexistent-config-file", "TASTE_TEST_UNLIKELY").unwrap();
        assert_eq!(cfg.value, 7);
    }
}
