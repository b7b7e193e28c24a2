//! Layered runtime configuration: a TOML file parsed into section structs,
//! then overridden field-by-field by CLI flags — the same two-stage
//! precedence the teacher's node binary uses for its own config.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use xenon_core::{Error, Result};

/// Top-level runtime configuration, split into sections mirroring the
/// component boundaries in the rest of the workspace.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub memory: MemorySection,
    pub threading: ThreadingSection,
    pub vfs: VfsSection,
    pub archive: ArchiveSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct MemorySection {
    /// Guest address space size in bytes. The runtime only ever reserves
    /// the fixed 512 MiB the console exposes; this exists so a future
    /// alternate title (out of scope today) would not require a code
    /// change, only a config one.
    pub guest_address_space_size: Option<usize>,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self { guest_address_space_size: None }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ThreadingSection {
    /// Number of thread-local-storage slots available per guest thread.
    pub tls_slot_count: Option<usize>,
}

impl Default for ThreadingSection {
    fn default() -> Self {
        Self { tls_slot_count: None }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct VfsSection {
    /// Mod overlay directories, in descending priority order (first entry
    /// wins a path conflict).
    pub overlay_dirs: Vec<String>,
    /// The single "update" overlay directory, searched after mod overlays.
    pub update_dir: Option<String>,
    /// The installed game directory, searched after all overlays.
    pub game_dir: Option<String>,
}

impl Default for VfsSection {
    fn default() -> Self {
        Self { overlay_dirs: Vec::new(), update_dir: None, game_dir: None }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ArchiveSection {
    /// Path to the 32-byte AES key used to decrypt encrypted IMG/RPF
    /// headers and TOCs. `None` means encrypted archives fail open with
    /// `DecryptionError`.
    pub decryption_key_path: Option<String>,
    /// Soft cap, in bytes, on cached extracted archive bytes before LRU
    /// eviction kicks in.
    pub max_cached_extracted_bytes: Option<u64>,
}

impl Default for ArchiveSection {
    fn default() -> Self {
        Self { decryption_key_path: None, max_cached_extracted_bytes: None }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    pub level: Option<String>,
    /// "text" or "json"; anything else falls back to "text".
    pub format: Option<String>,
    pub console_output: bool,
    pub file_enabled: bool,
    pub file_path: Option<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: Some("info".to_string()),
            format: None,
            console_output: true,
            file_enabled: false,
            file_path: Some("logs".to_string()),
        }
    }
}

/// Default guest address space size, applied when neither the TOML file
/// nor a CLI override specifies one.
pub const DEFAULT_GUEST_ADDRESS_SPACE_SIZE: usize = 512 * 1024 * 1024;

/// Default TLS slot count, matching [`xenon_kernel`]'s `TLS_SLOT_COUNT`
/// (duplicated here rather than depended-on, so config loading never
/// requires pulling in the kernel crate).
pub const DEFAULT_TLS_SLOT_COUNT: usize = 64;

impl RuntimeConfig {
    /// Loads configuration from a TOML file. Unknown fields and tables are
    /// rejected rather than silently ignored, so a typo in a config file
    /// surfaces immediately instead of silently keeping a default.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::format_error("RuntimeConfig::load", format!("reading {}: {e}", path.display())))?;
        toml::from_str(&contents)
            .map_err(|e| Error::format_error("RuntimeConfig::load", format!("parsing {}: {e}", path.display())))
    }

    pub fn guest_address_space_size(&self) -> usize {
        self.memory.guest_address_space_size.unwrap_or(DEFAULT_GUEST_ADDRESS_SPACE_SIZE)
    }

    pub fn tls_slot_count(&self) -> usize {
        self.threading.tls_slot_count.unwrap_or(DEFAULT_TLS_SLOT_COUNT)
    }

    /// Applies CLI-parsed overrides on top of this config. `Some` always
    /// wins over whatever the TOML file supplied, matching the teacher's
    /// "parse config, then apply `Option<T>` CLI overrides field by field"
    /// precedence.
    pub fn apply_overrides(&mut self, overrides: &CliOverrides) {
        if let Some(size) = overrides.guest_address_space_size {
            self.memory.guest_address_space_size = Some(size);
        }
        if let Some(count) = overrides.tls_slot_count {
            self.threading.tls_slot_count = Some(count);
        }
        if !overrides.overlay_dirs.is_empty() {
            self.vfs.overlay_dirs = overrides.overlay_dirs.clone();
        }
        if let Some(dir) = &overrides.update_dir {
            self.vfs.update_dir = Some(dir.clone());
        }
        if let Some(dir) = &overrides.game_dir {
            self.vfs.game_dir = Some(dir.clone());
        }
        if let Some(path) = &overrides.decryption_key_path {
            self.archive.decryption_key_path = Some(path.clone());
        }
        if let Some(bytes) = overrides.max_cached_extracted_bytes {
            self.archive.max_cached_extracted_bytes = Some(bytes);
        }
        if let Some(level) = &overrides.log_level {
            self.logging.level = Some(level.clone());
        }
        if let Some(format) = &overrides.log_format {
            self.logging.format = Some(format.clone());
        }
        if overrides.log_to_file {
            self.logging.file_enabled = true;
        }
    }
}

/// CLI-sourced overrides, deliberately a plain struct of `Option<T>` (and
/// `Vec`/`bool` where "unset" and "empty/false" coincide) rather than a
/// `clap::Parser` itself — the runtime binary's `Cli` type constructs one
/// of these from its parsed flags, keeping this crate free of a `clap`
/// dependency.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub guest_address_space_size: Option<usize>,
    pub tls_slot_count: Option<usize>,
    pub overlay_dirs: Vec<String>,
    pub update_dir: Option<String>,
    pub game_dir: Option<String>,
    pub decryption_key_path: Option<String>,
    pub max_cached_extracted_bytes: Option<u64>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    pub log_to_file: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn rejects_unknown_fields() {
        let err = toml::from_str::<RuntimeConfig>("[memory]\nbogus = 1\n").unwrap_err();
        assert!(err.to_string().to_ascii_lowercase().contains("unknown"));
    }

    #[test]
    fn defaults_apply_when_section_absent() {
        let config: RuntimeConfig = toml::from_str("").unwrap();
        assert_eq!(config.guest_address_space_size(), DEFAULT_GUEST_ADDRESS_SPACE_SIZE);
        assert_eq!(config.tls_slot_count(), DEFAULT_TLS_SLOT_COUNT);
        assert!(config.logging.console_output);
    }

    #[test]
    fn cli_override_wins_over_file_value() {
        let mut config: RuntimeConfig = toml::from_str("[threading]\ntls_slot_count = 32\n").unwrap();
        let overrides = CliOverrides { tls_slot_count: Some(128), ..Default::default() };
        config.apply_overrides(&overrides);
        assert_eq!(config.tls_slot_count(), 128);
    }

    #[test]
    fn absent_cli_override_keeps_file_value() {
        let mut config: RuntimeConfig = toml::from_str("[vfs]\ngame_dir = \"/games/title\"\n").unwrap();
        config.apply_overrides(&CliOverrides::default());
        assert_eq!(config.vfs.game_dir.as_deref(), Some("/games/title"));
    }

    #[test]
    fn loads_from_disk() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"\n").unwrap();
        let config = RuntimeConfig::load(file.path()).unwrap();
        assert_eq!(config.logging.level.as_deref(), Some("debug"));
    }
}
