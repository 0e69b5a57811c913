use chrono::{DateTime, TimeZone, Utc};
use std::path::Path;
use std::sync::Arc;
use tmc_core::{Catalog, Config, CoreError, RepoConfig};
use tmc_model::{
    compute_digest, Attachment, AttachmentContainerRef, CancelToken, CheckResultKind, CompletionKind,
    ConflictKind, FetchName, ImportOptions, NotFoundKind, RepoError, RepoSpec, SearchParams,
    ThingModel,
};
use tmc_remote::HttpCache;

const S1_TM: &str = r#"{"schema:author":{"name":"a-corp"},"schema:manufacturer":{"name":"eagle"},"schema:mpn":"BT2000","version":{"model":"v1.0.0"}}"#;

fn at(sec: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 8, 14, 1, sec).unwrap()
}

fn tm(version: &str, description: &str) -> String {
    format!(
        r#"{{"schema:author":{{"name":"a-corp"}},"schema:manufacturer":{{"name":"eagle"}},"schema:mpn":"BT2000","description":"{description}","version":{{"model":"{version}"}}}}"#
    )
}

fn catalog(root: &Path, names: &[&str]) -> Catalog {
    let mut config = Config::default();
    for name in names {
        config
            .add(name, RepoConfig::file(root.join(name).to_string_lossy()))
            .unwrap();
    }
    Catalog::with_cache(config, Arc::new(HttpCache::new(root.join("cache"))))
}

fn r(name: &str) -> RepoSpec {
    RepoSpec::from_name(name)
}

#[test]
fn import_and_retrieve() {
    let dir = tempfile::tempdir().unwrap();
    let cat = catalog(dir.path(), &["local"]);
    let ctx = CancelToken::new();

    let res = cat
        .import_at(&ctx, &RepoSpec::Empty, S1_TM.as_bytes(), &ImportOptions::default(), at(17))
        .unwrap();
    let (hash, _) = compute_digest(S1_TM.as_bytes()).unwrap();
    let expected = format!("a-corp/eagle/BT2000/v1.0.0-20240108140117-{hash}.tm.json");
    assert_eq!(res.tm_id, expected);
    assert!(dir.path().join("local").join(&expected).is_file());

    let listed = cat.list(&ctx, &RepoSpec::Empty, &SearchParams::default()).unwrap();
    assert!(listed.errors.is_empty());
    assert_eq!(listed.data.entries.len(), 1);
    assert_eq!(listed.data.entries[0].name, "a-corp/eagle/BT2000");
    assert_eq!(listed.data.entries[0].versions[0].found_in, "local");

    let fetched = cat.fetch(&ctx, &RepoSpec::Empty, &expected, false).unwrap();
    assert_eq!(fetched.data.0, expected);
    let stored = ThingModel::from_bytes(&fetched.data.1).unwrap();
    assert_eq!(stored.id.as_deref(), Some(expected.as_str()));
}

#[test]
fn same_content_conflict_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let cat = catalog(dir.path(), &["local"]);
    let ctx = CancelToken::new();
    let opts = ImportOptions::default();

    let first = cat.import_at(&ctx, &r("local"), S1_TM.as_bytes(), &opts, at(17)).unwrap();
    let err = cat
        .import_at(&ctx, &r("local"), S1_TM.as_bytes(), &opts, at(20))
        .unwrap_err();
    assert_eq!(err.code(), Some(format!("1:{}", first.tm_id)));
    match err.repo_error() {
        Some(RepoError::Conflict(c)) => assert_eq!(c.kind, ConflictKind::SameContent),
        other => panic!("unexpected {other:?}"),
    }

    let versions = cat.versions(&ctx, &r("local"), "a-corp/eagle/BT2000").unwrap();
    assert_eq!(versions.data.len(), 1);
}

#[test]
fn same_timestamp_is_a_warning() {
    let dir = tempfile::tempdir().unwrap();
    let cat = catalog(dir.path(), &["local"]);
    let ctx = CancelToken::new();
    let opts = ImportOptions::default();

    let first = cat.import_at(&ctx, &r("local"), S1_TM.as_bytes(), &opts, at(17)).unwrap();
    let changed = tm("v1.0.0", "changed");
    let second = cat.import_at(&ctx, &r("local"), changed.as_bytes(), &opts, at(17)).unwrap();
    assert!(second.is_warning());
    assert_eq!(
        second.conflict.as_ref().map(|c| c.kind),
        Some(ConflictKind::SameTimestamp)
    );
    assert_ne!(first.tm_id, second.tm_id);

    let versions = cat.versions(&ctx, &r("local"), "a-corp/eagle/BT2000").unwrap();
    assert_eq!(versions.data.len(), 2);
    assert!(versions
        .data
        .iter()
        .all(|v| v.version.timestamp == "20240108140117"));
}

#[test]
fn union_merges_versions_across_repositories() {
    let dir = tempfile::tempdir().unwrap();
    let cat = catalog(dir.path(), &["r1", "r2"]);
    let ctx = CancelToken::new();
    let opts = ImportOptions::default();

    let t1 = tm("v1.0.0", "first");
    let t2 = tm("v1.0.0", "second");
    let t3 = tm("v1.0.1", "third");
    cat.import_at(&ctx, &r("r1"), t1.as_bytes(), &opts, at(1)).unwrap();
    let shared = cat.import_at(&ctx, &r("r1"), t2.as_bytes(), &opts, at(2)).unwrap();
    let copy = cat.import_at(&ctx, &r("r2"), t2.as_bytes(), &opts, at(2)).unwrap();
    assert_eq!(shared.tm_id, copy.tm_id);
    cat.import_at(&ctx, &r("r2"), t3.as_bytes(), &opts, at(3)).unwrap();

    let listed = cat.list(&ctx, &RepoSpec::Empty, &SearchParams::default()).unwrap();
    assert_eq!(listed.data.entries.len(), 1);
    let order: Vec<(&str, &str)> = listed.data.entries[0]
        .versions
        .iter()
        .map(|v| (v.version.version.model.as_str(), v.version.timestamp.as_str()))
        .collect();
    assert_eq!(
        order,
        [
            ("v1.0.1", "20240108140103"),
            ("v1.0.0", "20240108140102"),
            ("v1.0.0", "20240108140101"),
        ]
    );
    // The copy held by both repositories is attributed to the first by name.
    assert_eq!(listed.data.entries[0].versions[1].found_in, "r1");

    let fetched = cat.fetch(&ctx, &RepoSpec::Empty, &copy.tm_id, false).unwrap();
    assert_eq!(fetched.data.0, copy.tm_id);
}

#[test]
fn fetch_latest_by_name_and_semver() {
    let dir = tempfile::tempdir().unwrap();
    let cat = catalog(dir.path(), &["r1", "r2"]);
    let ctx = CancelToken::new();
    let opts = ImportOptions::default();

    let old = cat
        .import_at(&ctx, &r("r1"), tm("v1.2.0", "a").as_bytes(), &opts, at(1))
        .unwrap();
    let newest = cat
        .import_at(&ctx, &r("r2"), tm("v2.0.0", "b").as_bytes(), &opts, at(5))
        .unwrap();

    let latest = cat
        .fetch_any(&ctx, &RepoSpec::Empty, "a-corp/eagle/BT2000", false)
        .unwrap();
    assert_eq!(latest.data.0, newest.tm_id);

    let pinned = cat
        .fetch_latest(&ctx, &RepoSpec::Empty, &FetchName::parse("a-corp/eagle/BT2000:1").unwrap(), false)
        .unwrap();
    assert_eq!(pinned.data.0, old.tm_id);

    let err = cat
        .fetch_any(&ctx, &RepoSpec::Empty, "a-corp/eagle/BT2000:3", false)
        .unwrap_err();
    assert!(err
        .repo_error()
        .is_some_and(|e| e.is_not_found(NotFoundKind::Tm)));
}

#[test]
fn fetch_missing_id_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let cat = catalog(dir.path(), &["r1", "r2"]);
    let err = cat
        .fetch(
            &CancelToken::new(),
            &RepoSpec::Empty,
            "a-corp/eagle/BT2000/v1.0.0-20240108140117-0123456789ab.tm.json",
            false,
        )
        .unwrap_err();
    assert!(err
        .repo_error()
        .is_some_and(|e| e.is_not_found(NotFoundKind::Tm)));

    let bad = cat
        .fetch(&CancelToken::new(), &RepoSpec::Empty, "not-an-id", false)
        .unwrap_err();
    assert!(matches!(bad.repo_error(), Some(RepoError::InvalidId(_))));
}

#[test]
fn restore_id_returns_external_id() {
    let dir = tempfile::tempdir().unwrap();
    let cat = catalog(dir.path(), &["local"]);
    let ctx = CancelToken::new();
    let raw = S1_TM.replacen('{', r#"{"id":"https://vendor.example.com/bt2000","#, 1);

    let res = cat
        .import_at(&ctx, &r("local"), raw.as_bytes(), &ImportOptions::default(), at(17))
        .unwrap();
    let plain = cat.fetch(&ctx, &r("local"), &res.tm_id, false).unwrap();
    let restored = cat.fetch(&ctx, &r("local"), &res.tm_id, true).unwrap();
    assert_eq!(
        ThingModel::from_bytes(&plain.data.1).unwrap().id.as_deref(),
        Some(res.tm_id.as_str())
    );
    assert_eq!(
        ThingModel::from_bytes(&restored.data.1).unwrap().id.as_deref(),
        Some("https://vendor.example.com/bt2000")
    );

    let listed = cat.list(&ctx, &r("local"), &SearchParams::default()).unwrap();
    assert_eq!(
        listed.data.entries[0].versions[0].version.external_id,
        "https://vendor.example.com/bt2000"
    );
}

#[test]
fn writes_need_a_single_target() {
    let dir = tempfile::tempdir().unwrap();
    let cat = catalog(dir.path(), &["r1", "r2"]);
    let ctx = CancelToken::new();
    let err = cat
        .import(&ctx, &RepoSpec::Empty, S1_TM.as_bytes(), &ImportOptions::default())
        .unwrap_err();
    assert!(matches!(err.repo_error(), Some(RepoError::Ambiguous(_))));

    let adhoc = dir.path().join("adhoc");
    let res = cat
        .import(&ctx, &RepoSpec::Dir(adhoc.clone()), S1_TM.as_bytes(), &ImportOptions::default())
        .unwrap();
    assert!(adhoc.join(&res.tm_id).is_file());
}

#[test]
fn invalid_tm_is_rejected_before_writing() {
    let dir = tempfile::tempdir().unwrap();
    let cat = catalog(dir.path(), &["local"]);
    let err = cat
        .import(
            &CancelToken::new(),
            &r("local"),
            br#"{"schema:author":{"name":"a-corp"},"schema:mpn":"X"}"#,
            &ImportOptions::default(),
        )
        .unwrap_err();
    assert!(matches!(err.repo_error(), Some(RepoError::InvalidInput(_))));
    assert!(!dir.path().join("local").join("a-corp").exists());
}

#[test]
fn imports_a_directory_tree() {
    let dir = tempfile::tempdir().unwrap();
    let cat = catalog(dir.path(), &["local"]);
    let src = dir.path().join("src");
    std::fs::create_dir_all(src.join("nested")).unwrap();
    std::fs::write(src.join("a.json"), tm("v1.0.0", "a")).unwrap();
    std::fs::write(src.join("nested").join("b.json"), tm("v1.1.0", "b")).unwrap();
    std::fs::write(src.join("broken.json"), "{").unwrap();
    std::fs::write(src.join("notes.txt"), "skip me").unwrap();

    let results = cat
        .import_path(&CancelToken::new(), &r("local"), &src, &ImportOptions::default())
        .unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results.iter().filter(|f| f.result.is_ok()).count(), 2);
    let failed = results.iter().find(|f| f.result.is_err()).unwrap();
    assert!(failed.file.ends_with("broken.json"));
}

#[test]
fn delete_and_attachments_through_the_service() {
    let dir = tempfile::tempdir().unwrap();
    let cat = catalog(dir.path(), &["local"]);
    let ctx = CancelToken::new();
    let res = cat
        .import_at(&ctx, &r("local"), S1_TM.as_bytes(), &ImportOptions::default(), at(17))
        .unwrap();

    let name = AttachmentContainerRef::TmName("a-corp/eagle/BT2000".to_owned());
    cat.import_attachment(&ctx, &r("local"), &name, &Attachment::guessed("README.md"), b"# hi", false)
        .unwrap();
    let content = cat
        .fetch_attachment(&ctx, &RepoSpec::Empty, &name, "README.md")
        .unwrap();
    assert_eq!(content.data, b"# hi");

    let completions = cat
        .list_completions(&ctx, &RepoSpec::Empty, CompletionKind::Attachments, &[name.value().to_owned()], "")
        .unwrap();
    assert_eq!(completions.data, ["README.md"]);

    cat.delete(&ctx, &r("local"), &res.tm_id).unwrap();
    let listed = cat.list(&ctx, &RepoSpec::Empty, &SearchParams::default()).unwrap();
    assert!(listed.data.entries.is_empty());
    let gone = cat
        .fetch_attachment(&ctx, &RepoSpec::Empty, &name, "README.md")
        .unwrap_err();
    assert!(matches!(gone, CoreError::Federated { .. } | CoreError::Repo(_)));
}

#[test]
fn index_and_check_every_repository() {
    let dir = tempfile::tempdir().unwrap();
    let cat = catalog(dir.path(), &["r1", "r2"]);
    let ctx = CancelToken::new();
    for name in ["r1", "r2"] {
        cat.import_at(&ctx, &r(name), S1_TM.as_bytes(), &ImportOptions::default(), at(17))
            .unwrap();
    }

    let indexed = cat.index(&ctx, &RepoSpec::Empty, &[]).unwrap();
    assert_eq!(indexed.data, 2);
    assert!(indexed.errors.is_empty());

    let checks = cat
        .check_integrity(&ctx, &RepoSpec::Empty, &SearchParams::default())
        .unwrap();
    assert_eq!(checks.len(), 2);
    for check in checks {
        let results = check.results.unwrap();
        assert!(results.iter().all(|c| c.kind != CheckResultKind::Error), "{}: {results:?}", check.repo);
    }
}

#[test]
fn concurrent_imports_through_one_catalog_keep_every_version() {
    let dir = tempfile::tempdir().unwrap();
    let cat = Arc::new(catalog(dir.path(), &["local"]));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let cat = Arc::clone(&cat);
            std::thread::spawn(move || {
                let raw = tm(&format!("v1.{i}.0"), "concurrent");
                cat.import_at(
                    &CancelToken::new(),
                    &r("local"),
                    raw.as_bytes(),
                    &ImportOptions::default(),
                    at(17),
                )
                .unwrap()
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let versions = cat
        .versions(&CancelToken::new(), &r("local"), "a-corp/eagle/BT2000")
        .unwrap();
    assert_eq!(versions.data.len(), 8);
}
