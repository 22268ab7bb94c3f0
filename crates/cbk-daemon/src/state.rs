//! Shared runtime state for cbk-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The manager owns
//! all behavior; this module only carries it plus static build metadata.

use serde::{Deserialize, Serialize};

use cbk_runtime::SettlementManager;

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Shared across all Axum handlers via `Arc`.
pub struct AppState {
    pub manager: SettlementManager,
    pub build: BuildInfo,
}

impl AppState {
    pub fn new(manager: SettlementManager) -> Self {
        AppState {
            manager,
            build: BuildInfo {
                service: "cbk-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }
}
