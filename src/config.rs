// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::{fs, path::Path};

/// Flush policy for the durability engine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AppendFsync {
    /// fsync after every single append.
    Always,
    /// fsync on a background interval (the default).
    EverySec,
    /// Leave flushing to the OS page cache.
    No,
}

impl AppendFsync {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "always" => Some(Self::Always),
            "everysec" => Some(Self::EverySec),
            "no" => Some(Self::No),
            _ => None,
        }
    }
}

impl Default for AppendFsync {
    fn default() -> Self {
        Self::EverySec
    }
}

/// Server configuration, loaded from a `redis.conf`-style key-value file.
///
/// Keys and values are separated by whitespace; lines beginning with `#` are
/// comments and are ignored; unknown keys are silently skipped.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub port: u16,
    pub appendfilename: String,
    pub appendfsync: AppendFsync,
    pub appendfsync_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 6379,
            appendfilename: "appendonly.aof".to_owned(),
            appendfsync: AppendFsync::default(),
            appendfsync_interval_secs: 1,
        }
    }
}

impl Config {
    /// Loads configuration from `path`. If the file cannot be opened, returns
    /// the default configuration (matching the source's `ParseConfig`).
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => {
                let cfg = Self::parse_str(&contents);
                log::info!(
                    "loaded config '{}': port={}, aof={}, appendfsync={:?}",
                    path.display(),
                    cfg.port,
                    cfg.appendfilename,
                    cfg.appendfsync
                );
                cfg
            }
            Err(e) => {
                log::warn!(
                    "could not open config '{}' ({e}), using defaults",
                    path.display()
                );
                Self::default()
            }
        }
    }

    /// Parses configuration from an in-memory string, the same grammar as
    /// [`Config::from_file`].
    #[must_use]
    pub fn parse_str(contents: &str) -> Self {
        let mut cfg = Self::default();

        for raw_line in contents.lines() {
            let line = raw_line.trim_start();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut parts = line.splitn(2, char::is_whitespace);
            let Some(key) = parts.next() else { continue };
            let Some(value) = parts.next().map(str::trim) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }

            let key = key.to_ascii_lowercase();
            let value = strip_quotes(value);

            match key.as_str() {
                "port" => match value.parse::<u16>() {
                    Ok(port) => cfg.port = port,
                    Err(_) => log::warn!("invalid port value: {value}"),
                },
                "appendfilename" => cfg.appendfilename = value.to_owned(),
                "appendfsync" => match AppendFsync::parse(value) {
                    Some(mode) => cfg.appendfsync = mode,
                    None => log::warn!("invalid appendfsync value: {value}"),
                },
                "appendfsync-interval" => match value.parse::<u64>() {
                    Ok(secs) => cfg.appendfsync_interval_secs = secs,
                    Err(_) => log::warn!("invalid appendfsync-interval value: {value}"),
                },
                _ => { /* unknown keys are silently skipped, matching redis.conf compat */ }
            }
        }

        cfg
    }
}

fn strip_quotes(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn defaults_when_absent() {
        let cfg = Config::from_file("/nonexistent/path/to/nothing.conf");
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn parses_known_keys() {
        let cfg = Config::parse_str(
            "# a comment\n\nport 7000\nappendfilename \"custom.aof\"\nappendfsync always\nappendfsync-interval 5\nunknown-key ignored\n",
        );
        assert_eq!(cfg.port, 7000);
        assert_eq!(cfg.appendfilename, "custom.aof");
        assert_eq!(cfg.appendfsync, AppendFsync::Always);
        assert_eq!(cfg.appendfsync_interval_secs, 5);
    }

    #[test]
    fn invalid_values_keep_defaults() {
        let cfg = Config::parse_str("port not-a-number\nappendfsync bogus\n");
        assert_eq!(cfg.port, 6379);
        assert_eq!(cfg.appendfsync, AppendFsync::EverySec);
    }
}
