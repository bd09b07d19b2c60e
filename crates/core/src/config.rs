//! Workload configuration schema (spec §6): the YAML document shape decoded
//! by `runner-daemon::config`, shared here so `runner-adapters::workload` can
//! build manifests from it without depending on the daemon crate.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// CPU/memory requests and limits for the job container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAmounts {
    #[serde(default)]
    pub cpu_millicores: Option<i64>,
    #[serde(default)]
    pub memory_mib: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub requests: ResourceAmounts,
    #[serde(default)]
    pub limits: ResourceAmounts,
}

/// Cluster-native security context, kept opaque (we do not interpret the
/// fields, only forward them onto the pod spec).
pub type SecurityContext = serde_json::Value;

/// The `workload:` section of the runner configuration file. Field names
/// follow the camelCase YAML keys named in spec §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkloadConfig {
    pub namespace: String,
    pub lifetime: u64,
    pub shell: String,
    pub annotations: HashMap<String, String>,
    pub node_selector: HashMap<String, String>,
    pub resources: Resources,
    pub service_account_name: Option<String>,
    pub termination_grace_period_seconds: i64,
    pub dns_policy: Option<String>,
    pub pull_policy: String,
    pub security_context: Option<SecurityContext>,
    pub working_dir: String,
    pub agent_mode: bool,
    /// Image the init container uses to copy the runner binary into the
    /// shared volume (spec §4.7 step 4). Defaults to the runner's own image.
    pub runner_image: String,
    /// Not part of the original spec's named keys, but every pod needs a
    /// wait ceiling; exposed so the default lines up with the original
    /// `pod-max-wait` flag (60s) rather than a silent magic number.
    pub pod_max_wait_seconds: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            lifetime: 3600,
            shell: "/bin/sh".to_string(),
            annotations: HashMap::new(),
            node_selector: HashMap::new(),
            resources: Resources::default(),
            service_account_name: None,
            termination_grace_period_seconds: 5,
            dns_policy: None,
            pull_policy: "IfNotPresent".to_string(),
            security_context: None,
            working_dir: "/jobs".to_string(),
            agent_mode: false,
            runner_image: "runner-daemon:latest".to_string(),
            pod_max_wait_seconds: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_keys_are_ignored() {
        let yaml = "namespace: custom\nfrobnicate: true\n";
        let cfg: WorkloadConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.namespace, "custom");
        // defaults still apply for everything else
        assert_eq!(cfg.shell, "/bin/sh");
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = WorkloadConfig::default();
        assert_eq!(cfg.lifetime, 3600);
        assert_eq!(cfg.pod_max_wait_seconds, 60);
        assert!(!cfg.agent_mode);
    }
}
