use std::time;

use serde::Deserialize;
use serde_with::serde_as;

use crate::error::ServiceError;

#[serde_as]
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Maximum number of items written to the CDN metadata table in one call.
    /// The limit is imposed by the external batch-write API.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum attempts for a single batch against the metadata table.
    #[serde(default = "default_max_tries")]
    pub max_tries: u32,

    /// Number of actor invocations allowed in flight at once.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    #[serde(default = "default_worker_keepalive_interval")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub worker_keepalive_interval: time::Duration,
    #[serde(default = "default_worker_keepalive_timeout")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub worker_keepalive_timeout: time::Duration,
    /// How often the LISTEN connection wakes to check for shutdown or
    /// connection loss.
    #[serde(default = "default_listener_interval")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub listener_interval: time::Duration,
    /// Messages a consumer may hold unprocessed before fetching more.
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,

    /// Hours added to `now` for tasks created without an explicit deadline.
    #[serde(default = "default_task_deadline")]
    pub task_deadline: i64,
    /// Hours after which unfinished publishes/tasks are considered abandoned.
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout: i64,
    /// Hours after which terminal publishes/tasks are deleted.
    #[serde(default = "default_history_timeout")]
    pub history_timeout: i64,

    /// Minutes between invocations of the scheduler wrapper.
    #[serde(default = "default_scheduler_interval")]
    pub scheduler_interval: u64,
    /// Minutes of delay applied to scheduler messages enqueued at boot.
    #[serde(default = "default_scheduler_delay")]
    pub scheduler_delay: u64,
    /// Cron rule for the cleanup actor (UTC).
    #[serde(default = "default_cron_cleanup")]
    pub cron_cleanup: String,

    /// Minutes to wait for config propagation before flushing cache.
    #[serde(default = "default_config_cache_ttl")]
    pub config_cache_ttl: u64,
    #[serde(default = "default_cdn_listing_flush")]
    pub cdn_listing_flush: bool,

    #[serde(default = "default_autoindex_filename")]
    pub autoindex_filename: String,
    /// File names written last during a commit, marking a repository root.
    #[serde(default = "default_entry_point_files")]
    pub entry_point_files: Vec<String>,

    #[serde(default = "default_actor_time_limit")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub actor_time_limit: time::Duration,
    #[serde(default = "default_actor_max_retries")]
    pub actor_max_retries: u32,
    #[serde(default = "default_actor_min_backoff")]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub actor_min_backoff: time::Duration,
    #[serde(default = "default_actor_max_backoff")]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub actor_max_backoff: time::Duration,

    #[serde(default = "default_restart_delay")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub restart_delay: time::Duration,

    #[serde(default)]
    pub environments: Vec<Environment>,
}

/// One CDN environment a client may publish to. Selects the metadata table
/// and the purge credentials used for that environment.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Environment {
    pub name: String,
    pub table: String,
    /// Table holding deployed CDN config; defaults to `table`.
    #[serde(default)]
    pub config_table: Option<String>,
    #[serde(default)]
    pub aws_profile: Option<String>,
    #[serde(default)]
    pub aws_region: Option<String>,
    #[serde(default)]
    pub aws_endpoint_url: Option<String>,
    #[serde(default)]
    pub aws_access_key_id: Option<String>,
    #[serde(default)]
    pub aws_secret_access_key: Option<String>,

    #[serde(default)]
    pub cache_flush_urls: Vec<String>,
    #[serde(default)]
    pub cache_flush_arl_templates: Vec<String>,
    #[serde(default)]
    pub fastpurge_enabled: bool,
    #[serde(default)]
    pub fastpurge_host: Option<String>,
    #[serde(default)]
    pub fastpurge_client_token: Option<String>,
    #[serde(default)]
    pub fastpurge_client_secret: Option<String>,
    #[serde(default)]
    pub fastpurge_access_token: Option<String>,
    #[serde(default = "default_fastpurge_network")]
    pub fastpurge_network: String,
}

impl Environment {
    pub fn config_table(&self) -> &str {
        self.config_table.as_deref().unwrap_or(&self.table)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            name: String::new(),
            table: String::new(),
            config_table: None,
            aws_profile: None,
            aws_region: None,
            aws_endpoint_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            cache_flush_urls: vec![],
            cache_flush_arl_templates: vec![],
            fastpurge_enabled: false,
            fastpurge_host: None,
            fastpurge_client_token: None,
            fastpurge_client_secret: None,
            fastpurge_access_token: None,
            fastpurge_network: default_fastpurge_network(),
        }
    }
}

impl Settings {
    pub fn environment(&self, name: &str) -> Result<&Environment, ServiceError> {
        self.environments
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| ServiceError::NotFound(format!("environment {name:?}")))
    }

    /// Cron rule for a scheduled actor. A scheduled actor without a rule
    /// here is a programming error caught at boot.
    pub fn cron_rule(&self, actor_name: &str) -> Option<&str> {
        match actor_name {
            "cleanup" => Some(&self.cron_cleanup),
            _ => None,
        }
    }
}

fn default_batch_size() -> usize {
    25
}

fn default_max_tries() -> u32 {
    20
}

fn default_worker_threads() -> usize {
    4
}

fn default_worker_keepalive_interval() -> time::Duration {
    time::Duration::from_secs(5)
}

fn default_worker_keepalive_timeout() -> time::Duration {
    time::Duration::from_secs(60)
}

fn default_listener_interval() -> time::Duration {
    time::Duration::from_secs(5)
}

fn default_prefetch() -> usize {
    1
}

fn default_task_deadline() -> i64 {
    2
}

fn default_publish_timeout() -> i64 {
    24
}

fn default_history_timeout() -> i64 {
    24 * 7
}

fn default_scheduler_interval() -> u64 {
    15
}

fn default_scheduler_delay() -> u64 {
    5
}

fn default_cron_cleanup() -> String {
    // seconds-resolution cron: daily at 02:00 UTC
    "0 0 2 * * *".to_string()
}

fn default_config_cache_ttl() -> u64 {
    2
}

fn default_cdn_listing_flush() -> bool {
    true
}

fn default_autoindex_filename() -> String {
    ".__cdn_autoindex".to_string()
}

fn default_entry_point_files() -> Vec<String> {
    ["repomd.xml", "repomd.xml.asc", "PULP_MANIFEST"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_actor_time_limit() -> time::Duration {
    time::Duration::from_secs(30 * 60)
}

fn default_actor_max_retries() -> u32 {
    4
}

fn default_actor_min_backoff() -> time::Duration {
    time::Duration::from_secs(1)
}

fn default_actor_max_backoff() -> time::Duration {
    time::Duration::from_secs(5 * 60)
}

fn default_restart_delay() -> time::Duration {
    time::Duration::from_secs(60)
}

fn default_fastpurge_network() -> String {
    "production".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_tries: default_max_tries(),
            worker_threads: default_worker_threads(),
            worker_keepalive_interval: default_worker_keepalive_interval(),
            worker_keepalive_timeout: default_worker_keepalive_timeout(),
            listener_interval: default_listener_interval(),
            prefetch: default_prefetch(),
            task_deadline: default_task_deadline(),
            publish_timeout: default_publish_timeout(),
            history_timeout: default_history_timeout(),
            scheduler_interval: default_scheduler_interval(),
            scheduler_delay: default_scheduler_delay(),
            cron_cleanup: default_cron_cleanup(),
            config_cache_ttl: default_config_cache_ttl(),
            cdn_listing_flush: default_cdn_listing_flush(),
            autoindex_filename: default_autoindex_filename(),
            entry_point_files: default_entry_point_files(),
            actor_time_limit: default_actor_time_limit(),
            actor_max_retries: default_actor_max_retries(),
            actor_min_backoff: default_actor_min_backoff(),
            actor_max_backoff: default_actor_max_backoff(),
            restart_delay: default_restart_delay(),
            environments: vec![],
        }
    }
}
