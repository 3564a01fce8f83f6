//! Server configuration
//!
//! Every tunable is read from `KILN_*` environment variables at startup. The
//! settings are grouped per component so each one receives only what it uses.

use std::path::PathBuf;
use std::time::Duration;

/// Smallest accepted session token length
pub const MIN_TOKEN_LEN: usize = 16;

/// What happens to an upload workspace once its build finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceRetention {
    /// Keep the extracted bundle until an operator removes it
    Keep,
    /// Remove the extracted bundle once the build succeeded or failed
    RemoveAfterBuild,
}

impl std::str::FromStr for WorkspaceRetention {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "keep" => Ok(WorkspaceRetention::Keep),
            "remove-after-build" => Ok(WorkspaceRetention::RemoveAfterBuild),
            other => Err(format!(
                "unknown workspace retention '{}' (expected keep or remove-after-build)",
                other
            )),
        }
    }
}

/// Bundle ingestion settings
#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Root under which each upload gets its own directory
    pub upload_dir: PathBuf,
    /// File name of the build descriptor searched for in a bundle
    pub entry_file: String,
    /// Library names looked for in the entry file
    pub dependency_markers: Vec<String>,
    pub retention: WorkspaceRetention,
    pub max_upload_bytes: usize,
}

/// How the server reaches the cluster
#[derive(Debug, Clone)]
pub struct ClusterSettings {
    pub kubectl: String,
    pub namespace: String,
    pub context: Option<String>,
    /// Upper bound for a single kubectl invocation
    pub timeout: Duration,
}

/// Image build and registry settings
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub builder_image: String,
    /// Claim shared between the server and the builder
    pub shared_claim: String,
    /// Mount point of the shared claim inside the builder
    pub context_mount: String,
    /// Registry address the builder pushes to
    pub registry_push: String,
    /// Registry address cluster nodes pull from
    pub registry_pull: String,
    pub registry_insecure: bool,
    pub registry_secret: Option<String>,
}

/// Settings for launched batch and session workloads
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub shared_claim: String,
    /// Mount point of the shared claim inside run containers
    pub results_mount: String,
    pub backoff_limit: u32,
    pub default_ttl_seconds: Option<u64>,
    pub service_account: Option<String>,
    pub session_domain: String,
    pub session_port: u16,
    pub session_duration: Duration,
    pub session_token_len: usize,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    /// Selects the PostgreSQL job registry when set
    pub database_url: Option<String>,
    pub ingest: IngestSettings,
    pub cluster: ClusterSettings,
    pub build: BuildSettings,
    pub launch: LaunchSettings,
}

impl Default for Config {
    fn default() -> Self {
        let registry = "docker-registry.default.svc.cluster.local:5000".to_string();

        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            database_url: None,
            ingest: IngestSettings {
                upload_dir: PathBuf::from("/data/uploads"),
                entry_file: "Dockerfile".to_string(),
                dependency_markers: ["numpy", "torch", "pandas", "tensorflow"]
                    .map(String::from)
                    .to_vec(),
                retention: WorkspaceRetention::Keep,
                max_upload_bytes: 512 * 1024 * 1024,
            },
            cluster: ClusterSettings {
                kubectl: "kubectl".to_string(),
                namespace: "default".to_string(),
                context: None,
                timeout: Duration::from_secs(30),
            },
            build: BuildSettings {
                builder_image: "gcr.io/kaniko-project/executor:latest".to_string(),
                shared_claim: "shared-pvc".to_string(),
                context_mount: "/workspace".to_string(),
                registry_push: registry.clone(),
                registry_pull: registry,
                registry_insecure: true,
                registry_secret: None,
            },
            launch: LaunchSettings {
                shared_claim: "shared-pvc".to_string(),
                results_mount: "/mnt".to_string(),
                backoff_limit: 4,
                default_ttl_seconds: None,
                service_account: None,
                session_domain: "kiln.local".to_string(),
                session_port: 8888,
                session_duration: Duration::from_secs(4 * 60 * 60),
                session_token_len: 32,
            },
        }
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str) -> anyhow::Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    var(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("invalid {}='{}': {}", name, raw, e))
        })
        .transpose()
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Every variable is optional and falls back to [`Config::default`]:
    /// - KILN_BIND_ADDR (default: 0.0.0.0:8080)
    /// - DATABASE_URL (unset: in-memory registry)
    /// - KILN_UPLOAD_DIR, KILN_ENTRY_FILE, KILN_DEPENDENCY_MARKERS (comma separated)
    /// - KILN_WORKSPACE_RETENTION (keep | remove-after-build), KILN_MAX_UPLOAD_BYTES
    /// - KILN_KUBECTL, KILN_NAMESPACE, KILN_KUBE_CONTEXT, KILN_CLUSTER_TIMEOUT_SECS
    /// - KILN_BUILDER_IMAGE, KILN_SHARED_PVC, KILN_BUILD_CONTEXT_MOUNT
    /// - KILN_REGISTRY_PUSH, KILN_REGISTRY_PULL (default: push address),
    ///   KILN_REGISTRY_INSECURE, KILN_REGISTRY_SECRET
    /// - KILN_RESULTS_MOUNT, KILN_BACKOFF_LIMIT, KILN_DEFAULT_TTL_SECS, KILN_SERVICE_ACCOUNT
    /// - KILN_SESSION_DOMAIN, KILN_SESSION_PORT, KILN_SESSION_DURATION_SECS,
    ///   KILN_SESSION_TOKEN_LEN
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Config::default();

        if let Some(addr) = var("KILN_BIND_ADDR") {
            config.bind_addr = addr;
        }
        config.database_url = var("DATABASE_URL");

        let ingest = &mut config.ingest;
        if let Some(dir) = var("KILN_UPLOAD_DIR") {
            ingest.upload_dir = PathBuf::from(dir);
        }
        if let Some(name) = var("KILN_ENTRY_FILE") {
            ingest.entry_file = name;
        }
        if let Some(markers) = var("KILN_DEPENDENCY_MARKERS") {
            ingest.dependency_markers = markers
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
        }
        if let Some(retention) = parse_var("KILN_WORKSPACE_RETENTION")? {
            ingest.retention = retention;
        }
        if let Some(bytes) = parse_var("KILN_MAX_UPLOAD_BYTES")? {
            ingest.max_upload_bytes = bytes;
        }

        let cluster = &mut config.cluster;
        if let Some(kubectl) = var("KILN_KUBECTL") {
            cluster.kubectl = kubectl;
        }
        if let Some(namespace) = var("KILN_NAMESPACE") {
            cluster.namespace = namespace;
        }
        cluster.context = var("KILN_KUBE_CONTEXT");
        if let Some(secs) = parse_var::<u64>("KILN_CLUSTER_TIMEOUT_SECS")? {
            cluster.timeout = Duration::from_secs(secs);
        }

        let build = &mut config.build;
        if let Some(image) = var("KILN_BUILDER_IMAGE") {
            build.builder_image = image;
        }
        if let Some(claim) = var("KILN_SHARED_PVC") {
            build.shared_claim = claim.clone();
            config.launch.shared_claim = claim;
        }
        if let Some(mount) = var("KILN_BUILD_CONTEXT_MOUNT") {
            build.context_mount = mount;
        }
        if let Some(push) = var("KILN_REGISTRY_PUSH") {
            build.registry_pull = push.clone();
            build.registry_push = push;
        }
        if let Some(pull) = var("KILN_REGISTRY_PULL") {
            build.registry_pull = pull;
        }
        if let Some(insecure) = parse_var("KILN_REGISTRY_INSECURE")? {
            build.registry_insecure = insecure;
        }
        build.registry_secret = var("KILN_REGISTRY_SECRET");

        let launch = &mut config.launch;
        if let Some(mount) = var("KILN_RESULTS_MOUNT") {
            launch.results_mount = mount;
        }
        if let Some(limit) = parse_var("KILN_BACKOFF_LIMIT")? {
            launch.backoff_limit = limit;
        }
        launch.default_ttl_seconds = parse_var("KILN_DEFAULT_TTL_SECS")?;
        launch.service_account = var("KILN_SERVICE_ACCOUNT");
        if let Some(domain) = var("KILN_SESSION_DOMAIN") {
            launch.session_domain = domain;
        }
        if let Some(port) = parse_var("KILN_SESSION_PORT")? {
            launch.session_port = port;
        }
        if let Some(secs) = parse_var::<u64>("KILN_SESSION_DURATION_SECS")? {
            launch.session_duration = Duration::from_secs(secs);
        }
        if let Some(len) = parse_var("KILN_SESSION_TOKEN_LEN")? {
            launch.session_token_len = len;
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if self.ingest.entry_file.is_empty() || self.ingest.entry_file.contains('/') {
            anyhow::bail!("entry_file must be a plain file name");
        }

        if self.ingest.max_upload_bytes == 0 {
            anyhow::bail!("max_upload_bytes must be greater than 0");
        }

        if self.cluster.timeout.as_secs() == 0 {
            anyhow::bail!("cluster timeout must be greater than 0");
        }

        if self.build.registry_push.is_empty() || self.build.registry_pull.is_empty() {
            anyhow::bail!("registry addresses cannot be empty");
        }

        if !self.build.context_mount.starts_with('/') || !self.launch.results_mount.starts_with('/')
        {
            anyhow::bail!("mount paths must be absolute");
        }

        if self.launch.session_token_len < MIN_TOKEN_LEN {
            anyhow::bail!("session_token_len must be at least {}", MIN_TOKEN_LEN);
        }

        if self.launch.session_duration.as_secs() == 0 {
            anyhow::bail!("session_duration must be greater than 0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.ingest.entry_file, "Dockerfile");
        assert_eq!(config.ingest.dependency_markers.len(), 4);
        assert_eq!(config.ingest.retention, WorkspaceRetention::Keep);
        assert_eq!(config.launch.backoff_limit, 4);
        assert_eq!(config.build.registry_push, config.build.registry_pull);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.launch.session_token_len = 8;
        assert!(config.validate().is_err());
        config.launch.session_token_len = MIN_TOKEN_LEN;
        assert!(config.validate().is_ok());

        config.ingest.entry_file = "docker/Dockerfile".to_string();
        assert!(config.validate().is_err());
        config.ingest.entry_file = "Dockerfile".to_string();

        config.launch.results_mount = "mnt".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_workspace_retention_parse() {
        assert_eq!(
            "remove-after-build".parse::<WorkspaceRetention>(),
            Ok(WorkspaceRetention::RemoveAfterBuild)
        );
        assert_eq!("keep".parse::<WorkspaceRetention>(), Ok(WorkspaceRetention::Keep));
        assert!("sometimes".parse::<WorkspaceRetention>().is_err());
    }
}
