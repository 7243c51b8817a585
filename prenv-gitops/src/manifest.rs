//! Flux `HelmRelease` manifests for preview environments.
//!
//! One manifest per pull request, named `relpr-<number>`, pointing at the
//! chart folder of a Flux `GitRepository` source in `flux-system`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use prenv_core::{EnvCreationHelmRepo, ReleaseValues};

pub const API_VERSION: &str = "helm.toolkit.fluxcd.io/v2beta1";
pub const KIND: &str = "HelmRelease";
pub const SOURCE_KIND: &str = "GitRepository";
pub const SOURCE_NAMESPACE: &str = "flux-system";
pub const RECONCILE_INTERVAL: &str = "5m";

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "prenv";
pub const REVISION_ANNOTATION: &str = "prenv.dev/revision";

pub const NAME_PREFIX: &str = "relpr-";

pub fn release_name(values: &ReleaseValues) -> String {
    format!("{NAME_PREFIX}{}", values.pr_number)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmRelease {
    pub api_version: String,
    pub kind: String,
    pub metadata: Metadata,
    pub spec: HelmReleaseSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmReleaseSpec {
    pub interval: String,
    pub release_name: String,
    pub chart: ChartTemplate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartTemplate {
    pub spec: ChartSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    pub chart: String,
    pub version: String,
    pub source_ref: SourceRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

impl HelmRelease {
    /// Build the manifest for one pull request at `revision`.
    pub fn render(scope: &EnvCreationHelmRepo, values: &ReleaseValues, revision: u64) -> Self {
        let name = release_name(values);
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: Metadata {
                name: name.clone(),
                namespace: scope.destination_namespace.clone(),
                labels: BTreeMap::from([(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string())]),
                annotations: BTreeMap::from([(
                    REVISION_ANNOTATION.to_string(),
                    revision.to_string(),
                )]),
            },
            spec: HelmReleaseSpec {
                interval: RECONCILE_INTERVAL.to_string(),
                release_name: name,
                chart: ChartTemplate {
                    spec: ChartSpec {
                        chart: scope.helm_chart_path.clone(),
                        version: scope.chart_version.clone(),
                        source_ref: SourceRef {
                            kind: SOURCE_KIND.to_string(),
                            name: scope.flux_source_repo_name.clone(),
                            namespace: SOURCE_NAMESPACE.to_string(),
                        },
                    },
                },
                values: serde_json::to_value(values).ok(),
            },
        }
    }

    pub fn is_managed(&self) -> bool {
        self.kind == KIND
            && self.metadata.labels.get(MANAGED_BY_LABEL).map(String::as_str) == Some(MANAGED_BY)
    }

    /// Missing or unparseable annotations read as revision 0.
    pub fn revision(&self) -> u64 {
        self.metadata
            .annotations
            .get(REVISION_ANNOTATION)
            .and_then(|r| r.parse().ok())
            .unwrap_or(0)
    }

    /// Replace the embedded values and bump the revision.
    pub fn set_values(&mut self, values: &ReleaseValues, revision: u64) {
        self.spec.values = serde_json::to_value(values).ok();
        self.metadata
            .annotations
            .insert(REVISION_ANNOTATION.to_string(), revision.to_string());
    }
}
