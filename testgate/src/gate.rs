//! Cache-gated test cycle.
//!
//! A valid cache entry short-circuits the whole cycle and its summary is
//! returned untouched. Otherwise the orchestrator runs and, when the outcome is
//! cacheable, the summary is recorded for the current repository state.

use tracing::{debug, info, instrument, warn};

use crate::io::badges::{BadgeUpdater, SideEffect};
use crate::io::cache::ResultCache;
use crate::io::git::RepoState;
use crate::io::toolchain::Toolchain;
use crate::orchestrator::{CycleOptions, run_cycle};

/// How the gate treats the cache for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Serve a valid entry; record cacheable results.
    ReadWrite,
    /// Always run; still record cacheable results.
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateOutcome {
    pub summary: String,
    pub success: bool,
    pub from_cache: bool,
    /// Outcome of the cache write-back.
    pub recorded: SideEffect,
}

/// Run the test cycle unless the cache already holds a result for this state.
///
/// `cache` is `None` when caching is disabled.
#[instrument(skip_all, fields(mode = ?mode))]
pub fn run_gated<S, T, B>(
    cache: Option<&ResultCache<S>>,
    mode: CacheMode,
    toolchain: &T,
    badges: Option<&B>,
    options: &CycleOptions<'_>,
) -> GateOutcome
where
    S: RepoState,
    T: Toolchain,
    B: BadgeUpdater,
{
    if let (Some(cache), CacheMode::ReadWrite) = (cache, mode)
        && let Some(summary) = cache.cached_message()
    {
        info!("serving cached result");
        return GateOutcome {
            summary,
            success: true,
            from_cache: true,
            recorded: SideEffect::Skipped,
        };
    }

    let report = run_cycle(toolchain, badges, options);

    let recorded = match cache {
        Some(cache) if report.cacheable => SideEffect::from_result(cache.save(&report.summary)),
        Some(cache) => {
            if !report.success {
                // A forced run that fails must not leave an earlier pass servable.
                cache.invalidate();
            }
            debug!(success = report.success, "result not cacheable");
            SideEffect::Skipped
        }
        None => SideEffect::Skipped,
    };
    if let SideEffect::Failed(reason) = &recorded {
        warn!(reason = %reason, "failed to record result in cache");
    }

    GateOutcome {
        summary: report.summary,
        success: report.success,
        from_cache: false,
        recorded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::process::CommandOutput;
    use crate::test_support::{FixedState, RecordingBadges, ScriptedToolchain};

    fn gated(
        cache: &ResultCache<FixedState>,
        mode: CacheMode,
        toolchain: &ScriptedToolchain,
    ) -> GateOutcome {
        run_gated(
            Some(cache),
            mode,
            toolchain,
            None::<&RecordingBadges>,
            &CycleOptions::default(),
        )
    }

    #[test]
    fn success_is_recorded_and_served() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = FixedState::new("/repo", "abc:1");
        let cache = ResultCache::new(state, temp.path());

        let first = gated(&cache, CacheMode::ReadWrite, &ScriptedToolchain::passing());
        assert!(first.success);
        assert!(!first.from_cache);
        assert_eq!(first.recorded, SideEffect::Applied);

        let toolchain = ScriptedToolchain::passing();
        let second = gated(&cache, CacheMode::ReadWrite, &toolchain);
        assert!(second.from_cache);
        assert_eq!(second.summary, first.summary);
        assert!(toolchain.calls().is_empty());
    }

    #[test]
    fn failing_vet_is_never_recorded() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cache = ResultCache::new(FixedState::new("/repo", "abc:1"), temp.path());
        let toolchain = ScriptedToolchain::passing()
            .with_vet(CommandOutput::exited(1, "./a.go:3:1: unreachable code\n"));
        let outcome = gated(&cache, CacheMode::ReadWrite, &toolchain);
        assert!(!outcome.success);
        assert!(!cache.entry_path().exists());
        assert!(!cache.is_valid());
    }

    #[test]
    fn content_change_reruns() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = FixedState::new("/repo", "abc:1");
        let cache = ResultCache::new(state.clone(), temp.path());
        gated(&cache, CacheMode::ReadWrite, &ScriptedToolchain::passing());

        state.set_fingerprint("abc:2");
        let toolchain = ScriptedToolchain::passing();
        let outcome = gated(&cache, CacheMode::ReadWrite, &toolchain);
        assert!(!outcome.from_cache);
        assert!(toolchain.called("test_native"));
        assert!(cache.is_valid());
    }

    #[test]
    fn refresh_ignores_valid_entry() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cache = ResultCache::new(FixedState::new("/repo", "abc:1"), temp.path());
        cache.save("✅ stale summary").expect("save");

        let toolchain = ScriptedToolchain::passing();
        let outcome = gated(&cache, CacheMode::Refresh, &toolchain);
        assert!(!outcome.from_cache);
        assert!(toolchain.called("vet"));
        assert_ne!(cache.cached_message().as_deref(), Some("✅ stale summary"));
    }

    #[test]
    fn failing_refresh_drops_previous_entry() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cache = ResultCache::new(FixedState::new("/repo", "abc:1"), temp.path());
        cache.save("✅ earlier pass").expect("save");

        let toolchain = ScriptedToolchain::passing()
            .with_native(CommandOutput::exited(1, "FAIL\texample.com/widget\t0.1s\n"));
        let outcome = gated(&cache, CacheMode::Refresh, &toolchain);
        assert!(!outcome.success);
        assert!(!cache.is_valid());
    }

    #[test]
    fn skipped_alternate_passes_but_is_not_recorded() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cache = ResultCache::new(FixedState::new("/repo", "abc:1"), temp.path());
        let toolchain = ScriptedToolchain::passing()
            .with_listing(CommandOutput::exited(0, "example.com/widget/web\n"))
            .without_shim(false);
        let outcome = gated(&cache, CacheMode::ReadWrite, &toolchain);
        assert!(outcome.success);
        assert_eq!(outcome.recorded, SideEffect::Skipped);
        assert!(!cache.is_valid());
    }

    #[test]
    fn unfingerprintable_state_runs_and_reports_write_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = FixedState::new("/repo", "abc:1");
        state.fail_fingerprint();
        let cache = ResultCache::new(state, temp.path());
        let outcome = gated(&cache, CacheMode::ReadWrite, &ScriptedToolchain::passing());
        assert!(outcome.success);
        assert!(matches!(outcome.recorded, SideEffect::Failed(_)));
    }

    #[test]
    fn disabled_cache_always_runs() {
        let toolchain = ScriptedToolchain::passing();
        let outcome = run_gated(
            None::<&ResultCache<FixedState>>,
            CacheMode::ReadWrite,
            &toolchain,
            None::<&RecordingBadges>,
            &CycleOptions::default(),
        );
        assert!(outcome.success);
        assert_eq!(outcome.recorded, SideEffect::Skipped);
    }
}
