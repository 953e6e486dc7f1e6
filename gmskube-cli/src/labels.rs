//! Kubernetes labels, annotations and well-known object names.

// ============================================================================
// Kubernetes Standard Labels
// ============================================================================

pub const K8S_INSTANCE: &str = "app.kubernetes.io/instance";
pub const K8S_NAME: &str = "app.kubernetes.io/name";
pub const K8S_PART_OF: &str = "app.kubernetes.io/part-of";

/// Selector for every object the package tool created
pub const MANAGED_BY_HELM_SELECTOR: &str = "app.kubernetes.io/managed-by=Helm";

pub const ISTIO_INJECTION: &str = "istio-injection";
pub const ISTIO_INJECTION_ENABLED: &str = "enabled";

/// Pod security admission labels applied to every instance namespace
pub const POD_SECURITY_LABELS: &[(&str, &str)] = &[
    ("pod-security.kubernetes.io/enforce", "privileged"),
    ("pod-security.kubernetes.io/enforce-version", "v1.25"),
    ("pod-security.kubernetes.io/audit", "privileged"),
    ("pod-security.kubernetes.io/audit-version", "v1.25"),
    ("pod-security.kubernetes.io/warn", "privileged"),
    ("pod-security.kubernetes.io/warn-version", "v1.25"),
];

// ============================================================================
// GMS Instance Metadata (labels on the `gms` config map)
// ============================================================================

pub const GMS_TYPE: &str = "gms/type";
pub const GMS_USER: &str = "gms/user";
pub const GMS_UPDATE_TIME: &str = "gms/update-time";
pub const GMS_IMAGE_TAG: &str = "gms/image-tag";
pub const GMS_NAME: &str = "gms/name";

/// Deployments carrying this label are bounced after a reconfigure
pub const RESTART_AFTER_RECONFIG_SELECTOR: &str = "gms/restartAfterReconfig=true";

/// Annotation whose change triggers a rolling restart
pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

// ============================================================================
// Well-known Objects
// ============================================================================

/// Per-instance config map holding the `gms/*` metadata labels
pub const GMS_CONFIG_MAP: &str = "gms";

/// Cluster-wide namespace holding shared configuration
pub const GMS_SYSTEM_NAMESPACE: &str = "gms";

pub const INGRESS_PORTS_CONFIG_MAP: &str = "ingress-ports-config";

/// Service exposing the data-load endpoints of an instance
pub const CONFIG_LOADER_SERVICE: &str = "config-loader";
