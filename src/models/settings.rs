//! Settings Models
//!
//! Run configuration: which generation provider to call, which warehouse to
//! query, pipeline limits, and the dataset the questions are about.

use serde::{Deserialize, Serialize};

use insight_cascade_core::{DatasetProfile, SchemaRegistry};
use insight_cascade_llm::{ProviderConfig, ProviderType};
use insight_cascade_tools::{BigQueryConfig, TableQualifier};

use crate::utils::error::{AppError, AppResult};

/// Application configuration stored in config.json (or config.toml)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub warehouse: WarehouseSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub profile: DatasetProfile,
    #[serde(default)]
    pub schema: SchemaRegistry,
}

/// Text generation provider settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// "gemini" or "openai"
    pub provider: ProviderType,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            provider: ProviderType::Gemini,
            model: "gemini-2.0-flash".to_string(),
            base_url: None,
            api_key_env: "GEMINI_API_KEY".to_string(),
            temperature: 0.0,
            max_tokens: 8192,
            timeout_secs: 120,
            proxy: None,
        }
    }
}

impl ProviderSettings {
    /// Provider configuration with the key read from `api_key_env`.
    pub fn to_provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            provider: self.provider,
            api_key: read_env(&self.api_key_env),
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            proxy: self.proxy.clone(),
            timeout_secs: self.timeout_secs,
        }
    }
}

/// Warehouse (BigQuery) settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseSettings {
    pub project_id: String,
    pub dataset_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Environment variable holding the OAuth access token
    pub token_env: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

impl Default for WarehouseSettings {
    fn default() -> Self {
        Self {
            project_id: "project-nirvana-405904".to_string(),
            dataset_id: "velocity_ai_iis".to_string(),
            location: Some("US".to_string()),
            token_env: "BIGQUERY_ACCESS_TOKEN".to_string(),
            base_url: None,
            timeout_secs: 120,
            proxy: None,
        }
    }
}

impl WarehouseSettings {
    /// `project.dataset` qualifier for table references.
    pub fn qualifier(&self) -> TableQualifier {
        TableQualifier::new(&self.project_id, &self.dataset_id)
    }

    /// Engine configuration with the token read from `token_env`.
    ///
    /// A missing token is passed through as empty; the engine reports it on
    /// first use.
    pub fn to_engine_config(&self) -> BigQueryConfig {
        BigQueryConfig {
            project_id: self.project_id.clone(),
            location: self.location.clone(),
            access_token: read_env(&self.token_env).unwrap_or_default(),
            base_url: self.base_url.clone(),
            timeout_secs: self.timeout_secs,
            proxy: self.proxy.clone(),
        }
    }
}

/// Control loop limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Planner re-entries allowed before the run ends incomplete
    pub max_repair_cycles: u32,
    /// Work items of one level executed concurrently
    pub max_in_flight: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_repair_cycles: 8,
            max_in_flight: 4,
        }
    }
}

/// Settings update request (partial update)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SettingsUpdate {
    pub provider: Option<ProviderType>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub project_id: Option<String>,
    pub dataset_id: Option<String>,
    pub max_repair_cycles: Option<u32>,
    pub max_in_flight: Option<usize>,
}

impl AppConfig {
    /// Apply a partial update to the configuration
    pub fn apply_update(&mut self, update: SettingsUpdate) {
        if let Some(provider) = update.provider {
            self.provider.provider = provider;
        }
        if let Some(model) = update.model {
            self.provider.model = model;
        }
        if let Some(base_url) = update.base_url {
            self.provider.base_url = Some(base_url).filter(|u| !u.trim().is_empty());
        }
        if let Some(project_id) = update.project_id {
            self.warehouse.project_id = project_id;
        }
        if let Some(dataset_id) = update.dataset_id {
            self.warehouse.dataset_id = dataset_id;
        }
        if let Some(cycles) = update.max_repair_cycles {
            self.pipeline.max_repair_cycles = cycles;
        }
        if let Some(in_flight) = update.max_in_flight {
            self.pipeline.max_in_flight = in_flight;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> AppResult<()> {
        if self.provider.model.trim().is_empty() {
            return Err(AppError::validation("provider.model must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(AppError::validation(format!(
                "Invalid temperature: {}. Must be between 0.0 and 2.0",
                self.provider.temperature
            )));
        }
        if self.warehouse.project_id.trim().is_empty() || self.warehouse.dataset_id.trim().is_empty()
        {
            return Err(AppError::validation(
                "warehouse.project_id and warehouse.dataset_id are required",
            ));
        }
        if self.pipeline.max_repair_cycles == 0 {
            return Err(AppError::validation(
                "pipeline.max_repair_cycles must be at least 1",
            ));
        }
        if self.pipeline.max_in_flight == 0 {
            return Err(AppError::validation("pipeline.max_in_flight must be at least 1"));
        }
        if self.schema.is_empty() {
            return Err(AppError::validation("schema must list at least one table"));
        }

        self.profile.validate_against(&self.schema)?;
        Ok(())
    }
}

fn read_env(name: &str) -> Option<String> {
    if name.trim().is_empty() {
        return None;
    }
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
