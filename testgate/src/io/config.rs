//! testgate configuration in `.testgate.toml`, read from the module directory
//! or else from the work tree root.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::io::fsutil::write_atomic;

/// File name looked up in the module directory, then the work tree root.
pub const CONFIG_FILE_NAME: &str = ".testgate.toml";

const CONFIG_HEADER: &str = "# testgate settings. Keys left out take their default value.\n\n";

/// testgate configuration (TOML).
///
/// Every field is optional in the file; missing fields default to values that
/// drive a Go module with `js/wasm` browser tests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GateConfig {
    /// Truncate captured tool output beyond this many bytes.
    pub output_limit_bytes: usize,

    pub cache: CacheConfig,
    pub timeouts: TimeoutConfig,
    pub alternate: AlternateConfig,
    pub badges: BadgeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Skip the cache entirely when false.
    pub enabled: bool,
    /// Cache root; defaults to `$TMPDIR/testgate-cache`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

/// Per-phase deadlines, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutConfig {
    pub vet_secs: u64,
    pub list_secs: u64,
    pub test_secs: u64,
    pub alternate_test_secs: u64,
    pub install_secs: u64,
}

/// The non-native target some tests are gated to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AlternateConfig {
    /// Short name used in summary lines, e.g. "tests wasm ok".
    pub label: String,
    pub goos: String,
    pub goarch: String,
    /// Binary passed to `go test -exec`.
    pub shim: String,
    /// Package installed with `go install` when the shim is missing.
    pub shim_package: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BadgeConfig {
    pub enabled: bool,
    /// Markdown document holding the badge block, relative to the module directory.
    pub document: PathBuf,
    pub license: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            output_limit_bytes: 4_000_000,
            cache: CacheConfig::default(),
            timeouts: TimeoutConfig::default(),
            alternate: AlternateConfig::default(),
            badges: BadgeConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            vet_secs: 5 * 60,
            list_secs: 2 * 60,
            test_secs: 30 * 60,
            alternate_test_secs: 30 * 60,
            install_secs: 10 * 60,
        }
    }
}

impl Default for AlternateConfig {
    fn default() -> Self {
        Self {
            label: "wasm".to_string(),
            goos: "js".to_string(),
            goarch: "wasm".to_string(),
            shim: "wasmbrowsertest".to_string(),
            shim_package: "github.com/tinywasm/wasmbrowsertest@latest".to_string(),
        }
    }
}

impl Default for BadgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            document: PathBuf::from("README.md"),
            license: "MIT".to_string(),
        }
    }
}

impl TimeoutConfig {
    pub fn vet(&self) -> Duration {
        Duration::from_secs(self.vet_secs)
    }

    pub fn list(&self) -> Duration {
        Duration::from_secs(self.list_secs)
    }

    pub fn test(&self) -> Duration {
        Duration::from_secs(self.test_secs)
    }

    pub fn alternate_test(&self) -> Duration {
        Duration::from_secs(self.alternate_test_secs)
    }

    pub fn install(&self) -> Duration {
        Duration::from_secs(self.install_secs)
    }
}

impl GateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        let t = &self.timeouts;
        for (name, secs) in [
            ("timeouts.vet_secs", t.vet_secs),
            ("timeouts.list_secs", t.list_secs),
            ("timeouts.test_secs", t.test_secs),
            ("timeouts.alternate_test_secs", t.alternate_test_secs),
            ("timeouts.install_secs", t.install_secs),
        ] {
            if secs == 0 {
                return Err(anyhow!("{name} must be > 0"));
            }
        }
        let a = &self.alternate;
        for (name, value) in [
            ("alternate.label", &a.label),
            ("alternate.goos", &a.goos),
            ("alternate.goarch", &a.goarch),
            ("alternate.shim", &a.shim),
            ("alternate.shim_package", &a.shim_package),
        ] {
            if value.trim().is_empty() {
                return Err(anyhow!("{name} must not be empty"));
            }
        }
        if self.badges.enabled && self.badges.document.as_os_str().is_empty() {
            return Err(anyhow!("badges.document must be set when badges are enabled"));
        }
        Ok(())
    }

    /// Cache root, falling back to the default under the system temp dir.
    pub fn cache_dir(&self) -> PathBuf {
        self.cache
            .dir
            .clone()
            .unwrap_or_else(crate::io::cache::default_cache_dir)
    }
}

/// Read `.testgate.toml`; a missing file means every default applies.
pub fn load_config(path: &Path) -> Result<GateConfig> {
    let cfg = match fs::read_to_string(path) {
        Ok(text) => {
            toml::from_str::<GateConfig>(&text).with_context(|| format!("parse {}", path.display()))?
        }
        Err(err) if err.kind() == ErrorKind::NotFound => GateConfig::default(),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    cfg.validate()
        .with_context(|| format!("invalid {}", path.display()))?;
    Ok(cfg)
}

/// Write a config file spelling out every default, for `testgate init`.
///
/// An existing file is only replaced when `force` is set.
pub fn init_config(path: &Path, force: bool) -> Result<GateConfig> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let cfg = GateConfig::default();
    let body = toml::to_string_pretty(&cfg).context("serialize config")?;
    write_atomic(path, &format!("{CONFIG_HEADER}{body}"))?;
    Ok(cfg)
}
