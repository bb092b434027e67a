use std::path::Path;

use jobdigest_adapters::{connector_for_source, SourceKind, SourceRegistry};

fn workspace_root() -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

#[test]
fn workspace_registry_matches_bundled_copy() {
    let from_disk = SourceRegistry::load(workspace_root()).unwrap();
    let bundled = SourceRegistry::bundled().unwrap();
    assert_eq!(from_disk, bundled);
}

#[test]
fn every_enabled_source_has_a_connector() {
    let registry = SourceRegistry::load(workspace_root()).unwrap();
    for source in registry.enabled_sources() {
        let connector = connector_for_source(source, &registry)
            .unwrap_or_else(|| panic!("no connector for {}", source.source_id));
        assert_eq!(connector.source_id(), source.source_id);
        assert_eq!(connector.kind(), source.kind);
        if matches!(source.kind, SourceKind::Rss | SourceKind::HtmlBoard) {
            assert!(source.url.is_some(), "{} needs a url", source.source_id);
        }
    }
}

#[test]
fn missing_workspace_file_falls_back_to_bundled_registry() {
    let empty = std::env::temp_dir().join(format!("jobdigest-no-sources-{}", std::process::id()));
    let registry = SourceRegistry::load(&empty).unwrap();
    assert!(registry.sources.iter().any(|s| s.kind == SourceKind::Greenhouse));
}
