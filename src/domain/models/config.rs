use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::strategy::{AcceptancePolicy, PriorProposal, SamplingVariant};

/// Main configuration structure for the MCMCP engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Stimulus renderer configuration
    #[serde(default)]
    pub renderer: RendererConfig,

    /// The task this process serves
    #[serde(default)]
    pub task: TaskConfig,

    /// Gatekeeper density models and thresholds
    #[serde(default)]
    pub gatekeeper: GatekeeperConfig,

    /// Attention checks injected between trials
    #[serde(default)]
    pub attention_check: AttentionCheckConfig,

    /// Team-shared chains
    #[serde(default)]
    pub consensus: ConsensusConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".mcmcp/mcmcp.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Rotation of file logs (daily, hourly, never)
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    8080
}

const fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            enable_cors: true,
        }
    }
}

/// How latent states are turned into stimuli.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RendererMode {
    /// Call the remote stimulus service.
    Http,
    /// Return the latent vector itself; used for piloting without a GPU service.
    Raw,
}

/// Stimulus renderer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RendererConfig {
    #[serde(default = "default_renderer_mode")]
    pub mode: RendererMode,

    /// Base URL of the stimulus service (`/generate`, `/generate_batch`)
    #[serde(default = "default_renderer_url")]
    pub base_url: String,

    #[serde(default = "default_renderer_timeout")]
    pub timeout_secs: u64,

    /// Attempts per render before falling back to a noise image
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Outbound request rate towards the stimulus service
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    #[serde(default = "default_burst_size")]
    pub burst_size: u32,

    /// Side length of the fallback noise image in pixels
    #[serde(default = "default_noise_size")]
    pub noise_size: u32,
}

const fn default_renderer_mode() -> RendererMode {
    RendererMode::Http
}

fn default_renderer_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

const fn default_renderer_timeout() -> u64 {
    30
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_retry_delay_ms() -> u64 {
    500
}

const fn default_requests_per_second() -> u32 {
    20
}

const fn default_burst_size() -> u32 {
    40
}

const fn default_noise_size() -> u32 {
    64
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            mode: default_renderer_mode(),
            base_url: default_renderer_url(),
            timeout_secs: default_renderer_timeout(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            requests_per_second: default_requests_per_second(),
            burst_size: default_burst_size(),
            noise_size: default_noise_size(),
        }
    }
}

/// Task configuration: the state space, the categories and the variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TaskConfig {
    /// Task name; chain key for blockwise and GSP-prior chains
    #[serde(default = "default_task_name")]
    pub name: String,

    #[serde(default)]
    pub variant: SamplingVariant,

    /// Category labels, in a fixed order (turn-order rotation uses the index)
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,

    /// Optional question shown with each category
    #[serde(default)]
    pub class_questions: BTreeMap<String, String>,

    /// Dimensionality of the latent state
    #[serde(default = "default_dim")]
    pub dim: usize,

    /// Per-dimension `[min, max]`; `bounds` applies when empty
    #[serde(default)]
    pub ranges: Vec<(f64, f64)>,

    #[serde(default = "default_bounds")]
    pub bounds: (f64, f64),

    /// Replicas per chain group
    #[serde(default = "default_n_chain")]
    pub n_chain: u32,

    /// Trials per participant (summed over chains)
    #[serde(default = "default_max_trial")]
    pub max_trial: u32,

    /// Diagonal of the proposal covariance; one value is broadcast to all dimensions
    #[serde(default = "default_proposal_variance")]
    pub proposal_variance: Vec<f64>,

    /// Full `dim x dim` proposal covariance, rows first; overrides `proposal_variance`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal_covariance: Option<Vec<Vec<f64>>>,

    /// Trials between rest screens, passed through to clients
    #[serde(default = "default_n_rest")]
    pub n_rest: u32,

    #[serde(default)]
    pub prior_proposal: PriorProposal,

    /// Points per GSP slice
    #[serde(default = "default_resolution")]
    pub resolution: usize,

    /// Accepted GSP samples per category before a participant is done
    #[serde(default = "default_max_samples_per_class")]
    pub max_samples_per_class: u32,
}

fn default_task_name() -> String {
    "mcmcp".to_string()
}

fn default_categories() -> Vec<String> {
    vec!["happy".to_string(), "sad".to_string()]
}

const fn default_dim() -> usize {
    3
}

const fn default_bounds() -> (f64, f64) {
    (-30.0, 30.0)
}

const fn default_n_chain() -> u32 {
    2
}

const fn default_max_trial() -> u32 {
    10
}

fn default_proposal_variance() -> Vec<f64> {
    vec![1.0]
}

const fn default_n_rest() -> u32 {
    5
}

const fn default_resolution() -> usize {
    10
}

const fn default_max_samples_per_class() -> u32 {
    5
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            name: default_task_name(),
            variant: SamplingVariant::default(),
            categories: default_categories(),
            class_questions: BTreeMap::new(),
            dim: default_dim(),
            ranges: Vec::new(),
            bounds: default_bounds(),
            n_chain: default_n_chain(),
            max_trial: default_max_trial(),
            proposal_variance: default_proposal_variance(),
            proposal_covariance: None,
            n_rest: default_n_rest(),
            prior_proposal: PriorProposal::default(),
            resolution: default_resolution(),
            max_samples_per_class: default_max_samples_per_class(),
        }
    }
}

impl TaskConfig {
    /// Effective per-dimension ranges.
    pub fn effective_ranges(&self) -> Vec<(f64, f64)> {
        if self.ranges.is_empty() {
            vec![self.bounds; self.dim]
        } else {
            self.ranges.clone()
        }
    }

    /// Effective per-dimension proposal variances.
    pub fn effective_variances(&self) -> Vec<f64> {
        match self.proposal_variance.as_slice() {
            [single] => vec![*single; self.dim],
            many => many.to_vec(),
        }
    }

    pub fn category_index(&self, category: &str) -> Option<usize> {
        self.categories.iter().position(|c| c == category)
    }
}

/// Gatekeeper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GatekeeperConfig {
    /// Propose from the density models instead of random-walk steps
    #[serde(default)]
    pub enabled: bool,

    /// Directory holding `<category>.json` model files
    #[serde(default = "default_gatekeeper_dir")]
    pub dir: PathBuf,

    /// Replaces the fitted bandwidth when proposing
    #[serde(default)]
    pub bandwidth: Option<f64>,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Consecutive same-category prior outcomes tolerated before a forced switch
    #[serde(default = "default_stuck_patience")]
    pub stuck_patience: u32,

    /// Proposals at most this far from the current state are decided automatically
    #[serde(default = "default_min_proposal_distance")]
    pub min_proposal_distance: f64,

    /// Automatic decisions allowed before a trial is presented
    #[serde(default = "default_max_auto_decisions")]
    pub max_auto_decisions: u32,

    #[serde(default)]
    pub acceptance: AcceptancePolicy,
}

fn default_gatekeeper_dir() -> PathBuf {
    PathBuf::from(".mcmcp/gatekeepers")
}

const fn default_temperature() -> f64 {
    2.0
}

const fn default_stuck_patience() -> u32 {
    1000
}

const fn default_min_proposal_distance() -> f64 {
    2.0
}

const fn default_max_auto_decisions() -> u32 {
    100
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_gatekeeper_dir(),
            bandwidth: None,
            temperature: default_temperature(),
            stuck_patience: default_stuck_patience(),
            min_proposal_distance: default_min_proposal_distance(),
            max_auto_decisions: default_max_auto_decisions(),
            acceptance: AcceptancePolicy::default(),
        }
    }
}

/// Attention check configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AttentionCheckConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Directory of `<a>_<b>/` pair folders
    #[serde(default = "default_attention_dir")]
    pub dir: PathBuf,

    /// Probability of injecting a check before a trial
    #[serde(default = "default_attention_rate")]
    pub rate: f64,

    /// Failures after which a participant is terminated early
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
}

fn default_attention_dir() -> PathBuf {
    PathBuf::from(".mcmcp/attention_checks")
}

const fn default_attention_rate() -> f64 {
    0.005
}

const fn default_max_failures() -> u32 {
    2
}

impl Default for AttentionCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_attention_dir(),
            rate: default_attention_rate(),
            max_failures: default_max_failures(),
        }
    }
}

/// Consensus chain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConsensusConfig {
    #[serde(default = "default_team_size")]
    pub team_size: u32,

    /// Client repoll interval and the server-side wait fallback
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

const fn default_team_size() -> u32 {
    3
}

const fn default_poll_interval_ms() -> u64 {
    2000
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            team_size: default_team_size(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}
