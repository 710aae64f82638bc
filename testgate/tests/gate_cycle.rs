//! End-to-end gate scenarios against a real git repository.
//!
//! The toolchain is scripted; repository state, fingerprinting and the cache
//! file are real.

use std::fs;

use testgate::gate::{CacheMode, GateOutcome, run_gated};
use testgate::io::badges::{BADGES_START, MarkdownBadges, SideEffect};
use testgate::io::cache::ResultCache;
use testgate::io::git::Git;
use testgate::io::process::CommandOutput;
use testgate::orchestrator::{CycleOptions, run_cycle};
use testgate::test_support::{RecordingBadges, ScriptedToolchain, TestRepo, fixtures};

fn gated(cache: &ResultCache<Git>, toolchain: &ScriptedToolchain) -> GateOutcome {
    run_gated(
        Some(cache),
        CacheMode::ReadWrite,
        toolchain,
        None::<&RecordingBadges>,
        &CycleOptions::default(),
    )
}

#[test]
fn edit_revert_cycle_tracks_repository_content() {
    let Some(repo) = TestRepo::new().expect("repo") else {
        return;
    };
    let cache_dir = tempfile::tempdir().expect("cache dir");
    let cache = ResultCache::new(Git::new(repo.path()), cache_dir.path());

    let first = gated(&cache, &ScriptedToolchain::passing());
    assert!(first.success);
    assert!(!first.from_cache);
    assert!(cache.is_valid());

    let untouched = ScriptedToolchain::passing();
    let second = gated(&cache, &untouched);
    assert!(second.from_cache);
    assert_eq!(second.summary, first.summary);
    assert!(untouched.calls().is_empty());

    repo.write_file("lib.go", "package lib\n\nfunc Answer() int { return 42 }\n")
        .expect("edit");
    assert!(!cache.is_valid());
    let edited = ScriptedToolchain::passing();
    let third = gated(&cache, &edited);
    assert!(!third.from_cache);
    assert!(edited.called("test_native"));

    // Reverting restores the original fingerprint, which no longer has an entry.
    repo.write_file("lib.go", "package lib\n").expect("revert");
    assert!(!cache.is_valid());
}

#[test]
fn failure_in_an_edited_tree_is_not_cached() {
    let Some(repo) = TestRepo::new().expect("repo") else {
        return;
    };
    let cache_dir = tempfile::tempdir().expect("cache dir");
    let cache = ResultCache::new(Git::new(repo.path()), cache_dir.path());

    repo.write_file("lib.go", "package lib\n\nfunc Broken() {}\n")
        .expect("edit");
    let failing = ScriptedToolchain::passing()
        .with_native(CommandOutput::exited(1, fixtures::FAILING_NATIVE));
    let outcome = gated(&cache, &failing);
    assert!(!outcome.success);
    assert!(outcome.summary.contains("❌ test errors found in example.com/widget"));
    assert!(!cache.entry_path().exists());
}

#[test]
fn modules_in_one_repository_use_separate_slots() {
    let Some(repo) = TestRepo::new().expect("repo") else {
        return;
    };
    let cache_dir = tempfile::tempdir().expect("cache dir");
    repo.write_file("web/web.go", "package web\n").expect("write");
    let at_root = ResultCache::new(Git::new(repo.path()), cache_dir.path());
    let nested = ResultCache::new(Git::new(repo.path().join("web")), cache_dir.path());
    assert_ne!(at_root.cache_key(), nested.cache_key());

    gated(&at_root, &ScriptedToolchain::passing());
    assert!(at_root.is_valid());
    assert!(!nested.is_valid());
}

#[test]
fn badges_are_written_to_the_document() {
    let Some(repo) = TestRepo::new().expect("repo") else {
        return;
    };
    let readme = repo.path().join("README.md");
    fs::write(&readme, "# widget\n\nA widget.\n").expect("write readme");
    let badges = MarkdownBadges::new(&readme);

    let outcome = run_gated(
        None::<&ResultCache<Git>>,
        CacheMode::ReadWrite,
        &ScriptedToolchain::passing(),
        Some(&badges),
        &CycleOptions::default(),
    );
    assert!(outcome.success);
    let contents = fs::read_to_string(&readme).expect("read readme");
    assert!(contents.starts_with("# widget\n"));
    assert!(contents.contains(BADGES_START));
    assert!(contents.contains("Coverage-70%25-yellow"));
}

#[test]
fn missing_badge_document_is_skipped() {
    let Some(repo) = TestRepo::new().expect("repo") else {
        return;
    };
    let readme = repo.path().join("README.md");
    let badges = MarkdownBadges::new(&readme);

    let report = run_cycle(
        &ScriptedToolchain::passing(),
        Some(&badges),
        &CycleOptions::default(),
    );
    assert!(report.success);
    assert_eq!(report.badges, SideEffect::Skipped);
    assert!(!readme.exists());
}
