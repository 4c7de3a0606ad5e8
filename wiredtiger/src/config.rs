//! Table creation-config string builder (spec §6 "Engine table creation string").
//!
//! Grounded in the builder-with-`as_config_string` pattern used by the
//! `db-wildtiger` WiredTiger binding's `CreateConfig`: one field per WT_SESSION::create
//! option, fluent setters, and an ordered assembly pass that only emits the
//! options that were actually set.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCompressor {
    None,
    Snappy,
    Zlib,
    Zstd,
    Lz4,
}

impl fmt::Display for BlockCompressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Snappy => "snappy",
            Self::Zlib => "zlib",
            Self::Zstd => "zstd",
            Self::Lz4 => "lz4",
        };
        f.write_str(s)
    }
}

/// An option the caller tried to pass through `extra` collides with a key
/// this builder always sets itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedOptionError(pub String);

impl fmt::Display for ReservedOptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "option '{}' is reserved and cannot be overridden", self.0)
    }
}

impl std::error::Error for ReservedOptionError {}

const RESERVED_KEYS: &[&str] = &[
    "type",
    "memory_page_max",
    "split_pct",
    "leaf_value_max",
    "checksum",
    "block_compressor",
    "key_format",
    "value_format",
    "app_metadata",
    "oplogKeyExtractionVersion",
];

/// Builds the comma-separated `WT_SESSION::create` config string that the
/// record store uses for every table it opens, normal or oplog.
#[derive(Debug, Clone, Default)]
pub struct TableCreateConfig {
    memory_page_max: Option<&'static str>,
    split_pct: Option<u8>,
    leaf_value_max: Option<&'static str>,
    checksum: bool,
    prefix_compression: Option<bool>,
    block_compressor: Option<BlockCompressor>,
    extra: Option<String>,
    format_version: u32,
}

impl TableCreateConfig {
    /// Defaults matching spec §4.A: checksum on, 10MB page, 90% split, 64MB leaf value max.
    pub fn new() -> Self {
        Self {
            memory_page_max: Some("10m"),
            split_pct: Some(90),
            leaf_value_max: Some("64MB"),
            checksum: true,
            prefix_compression: None,
            block_compressor: None,
            extra: None,
            format_version: 1,
        }
    }

    pub fn memory_page_max(mut self, v: &'static str) -> Self {
        self.memory_page_max = Some(v);
        self
    }

    pub fn split_pct(mut self, v: u8) -> Self {
        self.split_pct = Some(v);
        self
    }

    pub fn leaf_value_max(mut self, v: &'static str) -> Self {
        self.leaf_value_max = Some(v);
        self
    }

    pub fn checksum(mut self, on: bool) -> Self {
        self.checksum = on;
        self
    }

    pub fn prefix_compression(mut self, on: bool) -> Self {
        self.prefix_compression = Some(on);
        self
    }

    pub fn block_compressor(mut self, c: BlockCompressor) -> Self {
        self.block_compressor = Some(c);
        self
    }

    /// A caller-supplied extra config fragment, verbatim comma-joined options.
    /// Rejected at `build_for` time if it collides with a reserved key.
    pub fn extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = Some(extra.into());
        self
    }

    /// Assemble the final config string. `is_oplog` forces `type=file` and
    /// `memory_page_max=10m` regardless of the builder's own setting, and
    /// adds `oplogKeyExtractionVersion=1` to app_metadata, per spec §6.
    pub fn build_for(&self, is_oplog: bool) -> Result<String, ReservedOptionError> {
        if let Some(extra) = &self.extra {
            for piece in extra.split(',') {
                let key = piece.split('=').next().unwrap_or("").trim();
                if RESERVED_KEYS.contains(&key) {
                    return Err(ReservedOptionError(key.to_string()));
                }
            }
        }

        let mut options = Vec::new();

        if is_oplog {
            options.push("type=file".to_string());
            options.push("memory_page_max=10m".to_string());
        } else if let Some(mpm) = self.memory_page_max {
            options.push(format!("memory_page_max={mpm}"));
        }

        if let Some(pct) = self.split_pct {
            options.push(format!("split_pct={pct}"));
        }

        if let Some(lvm) = self.leaf_value_max {
            options.push(format!("leaf_value_max={lvm}"));
        }

        options.push(format!("checksum={}", if self.checksum { "on" } else { "off" }));

        if let Some(prefix) = self.prefix_compression {
            options.push(format!("prefix_compression={prefix}"));
        }

        if let Some(compressor) = &self.block_compressor {
            options.push(format!("block_compressor={compressor}"));
        }

        if let Some(extra) = &self.extra {
            options.push(extra.clone());
        }

        options.push("key_format=q".to_string());
        options.push("value_format=u".to_string());

        let app_metadata = if is_oplog {
            format!(
                "app_metadata=(formatVersion={},oplogKeyExtractionVersion=1)",
                self.format_version
            )
        } else {
            format!("app_metadata=(formatVersion={})", self.format_version)
        };
        options.push(app_metadata);

        Ok(options.join(","))
    }
}

/// Parsed back out of a table's `app_metadata`, from `EngineAdapter::get_app_metadata`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppMetadata {
    pub format_version: u32,
    pub oplog_key_extraction_version: Option<u32>,
}

impl AppMetadata {
    /// Parse `formatVersion=1[,oplogKeyExtractionVersion=1]` out of the raw
    /// paren-delimited `app_metadata` value read back from `metadata:create`.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut format_version = None;
        let mut oplog_key_extraction_version = None;
        for piece in raw.split(',') {
            let mut parts = piece.splitn(2, '=');
            let key = parts.next()?.trim();
            let value = parts.next()?.trim();
            match key {
                "formatVersion" => format_version = value.parse().ok(),
                "oplogKeyExtractionVersion" => oplog_key_extraction_version = value.parse().ok(),
                _ => {}
            }
        }
        Some(Self {
            format_version: format_version?,
            oplog_key_extraction_version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_normal_table_config() {
        let cfg = TableCreateConfig::new().build_for(false).unwrap();
        assert!(cfg.contains("memory_page_max=10m"));
        assert!(cfg.contains("split_pct=90"));
        assert!(cfg.contains("leaf_value_max=64MB"));
        assert!(cfg.contains("checksum=on"));
        assert!(cfg.contains("key_format=q"));
        assert!(cfg.contains("value_format=u"));
        assert!(cfg.contains("app_metadata=(formatVersion=1)"));
        assert!(!cfg.contains("oplogKeyExtractionVersion"));
    }

    #[test]
    fn oplog_table_forces_file_backed_storage() {
        let cfg = TableCreateConfig::new().build_for(true).unwrap();
        assert!(cfg.contains("type=file"));
        assert!(cfg.contains("memory_page_max=10m"));
        assert!(cfg.contains("oplogKeyExtractionVersion=1"));
    }

    #[test]
    fn reserved_extra_option_rejected() {
        let err = TableCreateConfig::new()
            .extra("checksum=off")
            .build_for(false)
            .unwrap_err();
        assert_eq!(err.0, "checksum");
    }

    #[test]
    fn app_metadata_roundtrip() {
        let meta = AppMetadata::parse("formatVersion=1,oplogKeyExtractionVersion=1").unwrap();
        assert_eq!(meta.format_version, 1);
        assert_eq!(meta.oplog_key_extraction_version, Some(1));
    }
}
