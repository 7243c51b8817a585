use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;

use prenv_core::{ChangeRequest, EnvCreationHelmRepo, ReleaseValues};
use prenv_gitops::ManifestRegistry;
use prenv_reconcile::{decode::decode, EnvironmentRegistry, RegistryError};

fn scope() -> EnvCreationHelmRepo {
    EnvCreationHelmRepo {
        flux_source_repo_name: "envs".into(),
        helm_chart_path: "charts/preview".into(),
        chart_version: "1.2.0".into(),
        destination_namespace: "previews".into(),
    }
}

fn values(id: u64, sha: &str) -> ReleaseValues {
    ReleaseValues::for_change_request(&ChangeRequest::open(id, sha))
}

#[test]
fn create_writes_manifest_and_lists_it_back() {
    let tmp = TempDir::new().unwrap();
    let registry = ManifestRegistry::new(tmp.path());

    let handle = registry.create_environment(&scope(), &values(12, "abc")).unwrap();
    assert_eq!(handle.name, "relpr-12");
    assert_eq!(handle.revision, 1);

    let file = tmp.child("previews/relpr-12.yaml");
    file.assert(predicate::path::exists());
    file.assert(predicate::str::contains("kind: HelmRelease"));
    file.assert(predicate::str::contains("chart: charts/preview"));
    file.assert(predicate::str::contains("version: 1.2.0"));
    tmp.child("previews/relpr-12.yaml.tmp")
        .assert(predicate::path::missing());

    let listed = registry.list_environments(&scope()).unwrap();
    assert_eq!(listed.len(), 1);
    let record = decode(&listed[0]).unwrap();
    assert_eq!(record.change_request.0, 12);
    assert_eq!(record.deployed_sha.0, "abc");
    assert_eq!(record.handle, handle);
}

#[test]
fn create_twice_reports_already_exists() {
    let tmp = TempDir::new().unwrap();
    let registry = ManifestRegistry::new(tmp.path());
    registry.create_environment(&scope(), &values(1, "a")).unwrap();

    let err = registry
        .create_environment(&scope(), &values(1, "b"))
        .unwrap_err();
    assert!(matches!(err, RegistryError::AlreadyExists { .. }));
}

#[test]
fn update_in_place_bumps_revision_and_rejects_stale_handles() {
    let tmp = TempDir::new().unwrap();
    let registry = ManifestRegistry::new(tmp.path());
    let handle = registry.create_environment(&scope(), &values(5, "v1")).unwrap();

    registry.update_environment(&handle, &values(5, "v2")).unwrap();
    let listed = registry.list_environments(&scope()).unwrap();
    assert_eq!(listed[0].handle.revision, 2);
    assert_eq!(decode(&listed[0]).unwrap().deployed_sha.0, "v2");

    let err = registry
        .update_environment(&handle, &values(5, "v3"))
        .unwrap_err();
    assert!(matches!(err, RegistryError::Conflict { stored: 2, .. }));

    let err = registry.delete_environment(&handle).unwrap_err();
    assert!(matches!(err, RegistryError::Conflict { .. }));
}

#[test]
fn delete_removes_file_and_missing_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let registry = ManifestRegistry::new(tmp.path());
    let handle = registry.create_environment(&scope(), &values(9, "x")).unwrap();

    registry.delete_environment(&handle).unwrap();
    tmp.child("previews/relpr-9.yaml")
        .assert(predicate::path::missing());

    let err = registry.delete_environment(&handle).unwrap_err();
    assert!(matches!(err, RegistryError::NotFound { .. }));
}

#[test]
fn renamed_manifest_is_listed_by_file_and_can_be_deleted() {
    let tmp = TempDir::new().unwrap();
    let registry = ManifestRegistry::new(tmp.path());
    registry.create_environment(&scope(), &values(5, "s5")).unwrap();
    std::fs::rename(
        tmp.path().join("previews/relpr-5.yaml"),
        tmp.path().join("previews/pr-5-preview.yaml"),
    )
    .unwrap();

    let listed = registry.list_environments(&scope()).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].handle.name, "pr-5-preview");
    assert_eq!(listed[0].handle.namespace, "previews");
    assert_eq!(decode(&listed[0]).unwrap().change_request.0, 5);

    registry
        .update_environment(&listed[0].handle, &values(5, "s6"))
        .unwrap();
    tmp.child("previews/pr-5-preview.yaml")
        .assert(predicate::str::contains("prSHA: s6"));

    let listed = registry.list_environments(&scope()).unwrap();
    registry.delete_environment(&listed[0].handle).unwrap();
    tmp.child("previews/pr-5-preview.yaml")
        .assert(predicate::path::missing());
    assert!(registry.list_environments(&scope()).unwrap().is_empty());
}

#[test]
fn listing_skips_foreign_and_broken_files() {
    let tmp = TempDir::new().unwrap();
    let registry = ManifestRegistry::new(tmp.path());
    registry.create_environment(&scope(), &values(1, "a")).unwrap();

    tmp.child("previews/README.md").write_str("hello").unwrap();
    tmp.child("previews/broken.yaml")
        .write_str("apiVersion: [unterminated")
        .unwrap();
    tmp.child("previews/hand-written.yaml")
        .write_str(
            r#"apiVersion: helm.toolkit.fluxcd.io/v2beta1
kind: HelmRelease
metadata:
  name: hand-written
  namespace: previews
spec:
  interval: 1m
  releaseName: hand-written
  chart:
    spec:
      chart: charts/other
      version: 0.0.1
      sourceRef: { kind: GitRepository, name: other, namespace: flux-system }
"#,
        )
        .unwrap();
    tmp.child("previews/relpr-2.yaml.tmp")
        .write_str("leftover")
        .unwrap();

    let listed = registry.list_environments(&scope()).unwrap();
    let names: Vec<&str> = listed.iter().map(|r| r.handle.name.as_str()).collect();
    assert_eq!(names, vec!["relpr-1"]);
}

#[test]
fn empty_namespace_lists_nothing() {
    let tmp = TempDir::new().unwrap();
    let registry = ManifestRegistry::new(tmp.path());
    assert!(registry.list_environments(&scope()).unwrap().is_empty());
}
