use std::time::Duration;

use env_flags::env_flags;

env_flags! {
    pub FORGE_API_BASE: &str = "https://api.openai.com/v1";

    /// Fallback when no API key env var is named in the configuration.
    pub FORGE_API_KEY: Option<&str> = None;
    pub FORGE_MODEL: &str = "gpt-4o-mini";

    /// Overrides the journal directory (defaults to `~/.forge`).
    pub FORGE_LOG_DIR: Option<&str> = None;

    /// Also masks IPv4 addresses and long hex blobs during redaction.
    pub FORGE_AGGRESSIVE_REDACTION: bool = false;

    /// Skip the backend entirely; classify and validate locally.
    pub FORGE_LOCAL_VALIDATION_ONLY: bool = false;

    /// Overrides the per-model token cap.
    pub FORGE_TOKEN_BUDGET: Option<&str> = None;

    pub FORGE_REQUEST_TIMEOUT_MS: Duration = Duration::from_millis(30_000), |value| {
        value.parse().map(Duration::from_millis)
    };

    /// Fixture path with one canned agent response per line (offline tests).
    pub FORGE_FIXTURE: Option<&str> = None;
}
