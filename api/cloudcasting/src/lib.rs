use log::debug;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use reqwest::StatusCode;

/// Number of forecast steps per horizon: 3 hours at 15-minute increments.
pub const MAX_TIME_STEPS: u32 = 12;
/// Minutes between consecutive forecast steps.
pub const TIME_STEP_MINUTES: i64 = 15;

const DEFAULT_BASE_URL: &str = "http://51.20.136.254:8000/api/cloudcasting/layers";
const BASE_URL_ENV: &str = "CLOUDCASTING_API_URL";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// One forecast variable (satellite channel) available from the layer service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudVariable {
    pub value: String,
    pub label: String,
    pub description: String,
}

impl CloudVariable {
    fn new(value: &str, label: &str, description: &str) -> Self {
        Self {
            value: value.to_string(),
            label: label.to_string(),
            description: description.to_string(),
        }
    }
}

/// Fixed catalog of forecast variables, in display order.
pub static CLOUD_VARIABLES: Lazy<Vec<CloudVariable>> = Lazy::new(|| {
    vec![
        CloudVariable::new("IR_016", "IR 0.16 μm", "Infrared channel for cloud detection"),
        CloudVariable::new("IR_039", "IR 0.39 μm", "Infrared channel for cloud properties"),
        CloudVariable::new("IR_087", "IR 0.87 μm", "Near-infrared for cloud phase"),
        CloudVariable::new("IR_108", "IR 10.8 μm", "Thermal infrared for cloud temperature"),
        CloudVariable::new(
            "IR_120",
            "IR 12.0 μm",
            "Thermal infrared for atmospheric water vapor",
        ),
        CloudVariable::new("IR_134", "IR 13.4 μm", "Thermal infrared for CO2 absorption"),
        CloudVariable::new("VIS006", "VIS 0.06 μm", "Visible light for cloud reflectance"),
        CloudVariable::new("VIS008", "VIS 0.08 μm", "Visible light for surface features"),
        CloudVariable::new("WV_062", "WV 6.2 μm", "Water vapor channel - upper troposphere"),
        CloudVariable::new("WV_073", "WV 7.3 μm", "Water vapor channel - mid troposphere"),
    ]
});

/// All available forecast variables, fixed order, never empty.
pub fn variables() -> &'static [CloudVariable] {
    &CLOUD_VARIABLES
}

pub fn find_variable(value: &str) -> Option<&'static CloudVariable> {
    CLOUD_VARIABLES.iter().find(|v| v.value == value)
}

/// Format a time step as a forecast offset, e.g. "+0min", "+1h", "+1h 15m".
pub fn format_time_step(step: u32) -> String {
    let minutes = step * TIME_STEP_MINUTES as u32;
    let hours = minutes / 60;
    let remaining = minutes % 60;

    if hours == 0 {
        format!("+{}min", remaining)
    } else if remaining == 0 {
        format!("+{}h", hours)
    } else {
        format!("+{}h {}m", hours, remaining)
    }
}

/// Deterministic map layer identifier for a (variable, step) pair.
/// Identical inputs always address the same overlay resource.
pub fn layer_id(variable: &str, step: u32) -> String {
    format!("cloud-layer-{}-{}", variable, step)
}

/// Forecast valid time for a step, relative to the forecast base time.
pub fn valid_time(
    base: chrono::DateTime<chrono::Utc>,
    step: u32,
) -> chrono::DateTime<chrono::Utc> {
    base + chrono::Duration::minutes(TIME_STEP_MINUTES * step as i64)
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("time step {step} outside 0..{max}")]
    StepOutOfRange { step: u32, max: u32 },
    #[error("layer request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("layer request to {url} returned {status}")]
    Status { url: String, status: StatusCode },
}

/// Cloudcasting layer service client.
///
/// Constructed explicitly and passed to consumers; there is no shared
/// process-wide instance.
pub struct CloudcastingApi {
    client: Client,
    base_url: String,
}

impl CloudcastingApi {
    /// Create a client against `CLOUDCASTING_API_URL`, or the public
    /// endpoint when the variable is unset.
    pub fn new() -> Result<Self, FetchError> {
        let base_url =
            std::env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::with_base_url(base_url)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, FetchError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Create a client with an explicit request timeout. A hung upstream
    /// surfaces as `FetchError::Transport` when the timeout expires.
    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn layer_url(&self, variable: &str, step: u32) -> String {
        format!("{}/{}/{}.tif", self.base_url, variable, step)
    }

    /// Fetch the raw single-band raster for one (variable, step) pair.
    ///
    /// One attempt per call, no internal retry; the caller decides whether
    /// to re-request. Out-of-range steps are rejected before any I/O.
    pub async fn fetch_layer(&self, variable: &str, step: u32) -> Result<Vec<u8>, FetchError> {
        if step >= MAX_TIME_STEPS {
            return Err(FetchError::StepOutOfRange {
                step,
                max: MAX_TIME_STEPS,
            });
        }

        let url = self.layer_url(variable, step);
        debug!("fetching cloud layer from {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status { url, status });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| FetchError::Transport { url, source })?;
        Ok(bytes.to_vec())
    }
}
