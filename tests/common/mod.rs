#![allow(dead_code)]

use std::sync::{Arc, Once};

use ak_config::AkConfig;
use ak_sheets::SheetsSession;
use ak_store::AkStore;
use ak_web::AppState;
use tempfile::TempDir;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static INIT: Once = Once::new();

/// Install a test-captured subscriber once. Mirror warnings show by default.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("warn,ak_web=info,ak_sheets=info"));
        tracing_subscriber::registry()
            .with(fmt::layer().with_test_writer())
            .with(filter)
            .init();
    });
}

/// A deployment in a scratch directory: its own answer database and a
/// spreadsheet whose key can never authorize.
pub struct Deployment {
    pub dir: TempDir,
    pub config: AkConfig,
}

impl Deployment {
    pub fn new() -> Self {
        init_tracing();
        let dir = TempDir::new().unwrap();

        let mut config = AkConfig::default();
        config.global.db_path = dir.path().join("answers.duckdb");
        config.sheets.sheet_id = "1AbCdEf".to_string();
        config.sheets.credentials_json = Some("not json".to_string());

        Self { dir, config }
    }

    /// State built the way `serve` builds it, without a front-end bundle.
    pub fn state(&self) -> Arc<AppState> {
        let sheets = Arc::new(SheetsSession::google(&self.config.sheets).unwrap());
        let state = AppState::new(self.open_store(), &self.config, sheets).with_assets(None);
        Arc::new(state)
    }

    /// Open the on-disk answer database; earlier handles must be dropped first.
    pub fn open_store(&self) -> AkStore {
        AkStore::open(&self.config.global.db_path).unwrap()
    }
}
