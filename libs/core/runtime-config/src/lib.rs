//! Ambient process configuration: which environment the binary is running
//! in, and how its tracing subscriber should be shaped as a result. This is
//! deliberately separate from `supervisor_core::ConfigStore` — that crate's
//! layered configuration tree governs worker/pool behavior and is sourced
//! from `{default, api, file, environment}` layers at runtime; this module
//! governs only process-startup logging shape and is read once, from
//! `APP_ENV`, before anything else runs.

pub mod tracing_init;

use std::env;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn from_env() -> Self {
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        if app_env.eq_ignore_ascii_case("production") {
            Environment::Production
        } else {
            Environment::Development
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

pub use tracing_init::init_tracing;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_development_when_unset() {
        temp_env::with_var_unset("APP_ENV", || {
            assert_eq!(Environment::from_env(), Environment::Development);
        });
    }

    #[test]
    fn production_is_case_insensitive() {
        temp_env::with_var("APP_ENV", Some("PRODUCTION"), || {
            assert_eq!(Environment::from_env(), Environment::Production);
        });
    }

    #[test]
    fn unknown_value_falls_back_to_development() {
        temp_env::with_var("APP_ENV", Some("staging"), || {
            assert_eq!(Environment::from_env(), Environment::Development);
        });
    }
}
