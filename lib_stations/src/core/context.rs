use std::sync::Arc;
use std::time::Duration;

use crate::core::registry::ConnectionRegistry;
use crate::dataset::Dataset;

/// Default period of every stream timer.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(10_000);
/// Default period of the liveness sweep.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(30_000);
/// Text of the first message every client receives.
pub const WELCOME_TEXT: &str = "Connected to Charging Stations Stream";

/// Timing and greeting used by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub tick_interval: Duration,
    pub ping_interval: Duration,
    pub welcome_text: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            ping_interval: DEFAULT_PING_INTERVAL,
            welcome_text: WELCOME_TEXT.to_string(),
        }
    }
}

/// # Stream Context
///
/// The server-lifetime context built once at startup and shared by reference with
/// every handler and background task.
#[derive(Debug)]
pub struct StreamContext {
    pub registry: Arc<ConnectionRegistry>,
    pub dataset: Arc<Dataset>,
    pub settings: EngineSettings,
}

impl StreamContext {
    pub fn new(dataset: Arc<Dataset>, settings: EngineSettings) -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::new(ConnectionRegistry::new()),
            dataset,
            settings,
        })
    }
}
