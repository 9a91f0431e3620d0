use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "tafwatch_store" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines on stdout instead of human-readable text.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// `EnvFilter` directive string, e.g. `info,tafwatch_client=debug`.
    pub fn filter_directives(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter
    }
}

/// Handle returned by [`init_telemetry`]; remembers what was configured.
pub struct TelemetryGuard {
    module_levels: Vec<(String, Level)>,
    installed: bool,
}

impl TelemetryGuard {
    /// Per-module log level overrides in effect at startup.
    pub fn module_levels(&self) -> &[(String, Level)] {
        &self.module_levels
    }

    /// False if another global subscriber was already set.
    pub fn installed(&self) -> bool {
        self.installed
    }
}

/// Initialize the telemetry subsystem. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
    });
    let text_layer = (!config.json).then(|| tracing_subscriber::fmt::layer().with_target(true));

    let installed = match tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
    {
        Ok(()) => true,
        Err(e) => {
            eprintln!("tafwatch-telemetry: subscriber already installed: {e}");
            false
        }
    };

    TelemetryGuard {
        module_levels: config.module_levels,
        installed,
    }
}

/// Parse a level name as accepted in settings (`trace` .. `error`, any case).
pub fn parse_level(s: &str) -> Option<Level> {
    s.trim().parse().ok()
}
