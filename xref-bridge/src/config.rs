use std::str::FromStr;

use anyhow::Context;
use log::warn;
use xref_gc::GcConfig;

pub const GC_THRESHOLD_VAR: &str = "XREF_GC_THRESHOLD";
pub const GC_HEAP_SIZE_VAR: &str = "XREF_GC_HEAP_SIZE";
pub const GC_THREADS_VAR: &str = "XREF_GC_THREADS";
pub const BOX_CACHE_VAR: &str = "XREF_BOX_CACHE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub gc: GcConfig,
    /// Serve small boxed values (booleans, bytes, small integers, ASCII chars) from preallocated boxes.
    pub box_cache: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            gc: GcConfig::default(),
            box_cache: true,
        }
    }
}

impl BridgeConfig {
    /// The default configuration, overridden by the `XREF_*` environment variables that are set.
    /// Malformed values are ignored, with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        let apply = |name: &str, set: &mut dyn FnMut(&str) -> anyhow::Result<()>| {
            if let Some(value) = lookup(name) {
                if let Err(err) = set(&value) {
                    warn!("ignoring {name}: {err:#}");
                }
            }
        };

        apply(GC_THRESHOLD_VAR, &mut |value| {
            config.gc.collection_threshold = parse(GC_THRESHOLD_VAR, value)?;
            Ok(())
        });
        apply(GC_HEAP_SIZE_VAR, &mut |value| {
            config.gc.heap_size = parse(GC_HEAP_SIZE_VAR, value)?;
            Ok(())
        });
        apply(GC_THREADS_VAR, &mut |value| {
            config.gc.gc_threads = parse(GC_THREADS_VAR, value)?;
            Ok(())
        });
        apply(BOX_CACHE_VAR, &mut |value| {
            config.box_cache = parse_flag(value)?;
            Ok(())
        });

        config
    }
}

fn parse<T>(name: &str, value: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("`{value}` is not a valid value for {name}"))
}

fn parse_flag(value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        _ => anyhow::bail!("`{value}` is not a boolean"),
    }
}
