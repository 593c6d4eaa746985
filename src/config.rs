//! Node configuration loading and log bootstrap
//!
//! Per-component config structs all carry sensible defaults; this module
//! layers an optional `escrow.toml` file and `ESCROW_`-prefixed environment
//! variables on top of them.

use crate::backend::BackendConfig;
use crate::engine::EngineConfig;
use crate::error::EscrowError;
use crate::sweep::SweeperConfig;
use crate::EscrowResult;
use serde::{Deserialize, Serialize};

/// Combined configuration for an escrow node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

impl NodeConfig {
    /// Load configuration from `escrow.toml` (if present) with
    /// `ESCROW_*` environment overrides, e.g. `ESCROW_BACKEND__BASE_URL`.
    pub fn load() -> EscrowResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("escrow").required(false))
            .add_source(config::Environment::with_prefix("ESCROW").separator("__"))
            .build()
            .map_err(|e| EscrowError::config(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| EscrowError::config(e.to_string()))
    }
}

/// Install the default log subscriber for a host binary.
///
/// Respects `RUST_LOG` through the subscriber's standard env handling.
pub fn init_tracing() {
    tracing_subscriber::fmt::init();
}
