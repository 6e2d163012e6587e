use crate::config::{LoggingConfig, Section};
use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::{
    filter::{FilterFn, Targets},
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    Layer, Registry,
};

use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    ContentLimit, FileRotate,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

// -------- level helpers --------
fn parse_tracing_level(s: &str) -> Option<Level> {
    match s.to_ascii_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        "off" | "none" => None,
        _ => Some(Level::INFO),
    }
}

fn level_filter(s: &str) -> LevelFilter {
    parse_tracing_level(s)
        .map(LevelFilter::from_level)
        .unwrap_or(LevelFilter::OFF)
}

/// Returns true if target == crate_name or target starts with "crate_name::"
fn matches_crate_prefix(target: &str, crate_name: &str) -> bool {
    target == crate_name
        || (target.starts_with(crate_name) && target[crate_name.len()..].starts_with("::"))
}

// -------- rotating writer for files --------
#[derive(Clone)]
struct RotWriter(Arc<Mutex<FileRotate<AppendTimestamp>>>);

impl<'a> fmt::MakeWriter<'a> for RotWriter {
    type Writer = RotWriter;
    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for RotWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.0.lock() {
            Ok(mut f) => f.write(buf),
            // A panic while holding the lock leaves the file usable.
            Err(poisoned) => poisoned.into_inner().write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.0.lock() {
            Ok(mut f) => f.flush(),
            Err(poisoned) => poisoned.into_inner().flush(),
        }
    }
}

/// Resolve a log file path against `base_dir`.
/// Absolute paths are kept as-is; relative paths are joined with `base_dir`.
fn resolve_log_path(file: &str, base_dir: &Path) -> PathBuf {
    let p = Path::new(file);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

/// Create a rotating writer, ensuring the parent directory exists.
fn create_rotating_writer_at_path(
    log_path: &Path,
    section: &Section,
) -> std::io::Result<RotWriter> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let max_bytes = section.max_size_mb.unwrap_or(100) * 1024 * 1024;
    let file_limit = match section.max_backups {
        Some(n) => FileLimit::MaxFiles(n),
        None => FileLimit::Age(chrono::Duration::days(1)),
    };

    let rot = FileRotate::new(
        log_path,
        AppendTimestamp::default(file_limit),
        ContentLimit::BytesSurpassed(max_bytes as usize),
        Compression::None,
        #[cfg(unix)]
        None,
    );

    Ok(RotWriter(Arc::new(Mutex::new(rot))))
}

// -------- layer construction --------

/// Console filter: explicit crate sections get their own level, everything
/// else falls under the "default" section.
fn build_console_targets(cfg: &LoggingConfig) -> Targets {
    let default = cfg
        .get("default")
        .map(|s| level_filter(&s.console_level))
        .unwrap_or(LevelFilter::INFO);

    cfg.iter()
        .filter(|(name, _)| name.as_str() != "default")
        .fold(Targets::new().with_default(default), |t, (name, s)| {
            t.with_target(name.clone(), level_filter(&s.console_level))
        })
}

/// File layer for one section. The "default" section only receives events
/// that no explicit section claims.
fn build_file_layer(
    name: &str,
    section: &Section,
    explicit: &[String],
    base_dir: &Path,
) -> Option<BoxedLayer> {
    if section.file.trim().is_empty() {
        return None;
    }
    let max_level = parse_tracing_level(&section.file_level)?;
    let log_path = resolve_log_path(&section.file, base_dir);

    let writer = match create_rotating_writer_at_path(&log_path, section) {
        Ok(w) => w,
        Err(e) => {
            eprintln!(
                "Failed to init log file for '{}': {} ({})",
                name,
                log_path.to_string_lossy(),
                e
            );
            return None;
        }
    };

    let layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_writer(writer);

    if name == "default" {
        let explicit = explicit.to_vec();
        let filter = FilterFn::new(move |meta: &tracing::Metadata<'_>| {
            !explicit.iter().any(|c| matches_crate_prefix(meta.target(), c))
                && meta.level() <= &max_level
        });
        Some(layer.with_filter(filter).boxed())
    } else {
        let filter = Targets::new().with_target(name.to_string(), max_level);
        Some(layer.with_filter(filter).boxed())
    }
}

// -------- public init --------

/// Initialize logging from a configuration.
/// - `cfg`: LoggingConfig containing the logging sections
/// - `base_dir`: base directory used to resolve relative log file paths
pub fn init_logging_from_config(cfg: &LoggingConfig, base_dir: &Path) {
    // Bridge `log` → `tracing` *before* installing the subscriber
    let _ = tracing_log::LogTracer::init();

    if cfg.is_empty() {
        init_default_logging();
        return;
    }

    let ansi = atty::is(atty::Stream::Stdout);
    let explicit: Vec<String> = cfg
        .keys()
        .filter(|k| k.as_str() != "default")
        .cloned()
        .collect();

    let mut layers: Vec<BoxedLayer> = Vec::with_capacity(cfg.len() + 1);
    layers.push(
        fmt::layer()
            .with_ansi(ansi)
            .with_target(true)
            .with_level(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_filter(build_console_targets(cfg))
            .boxed(),
    );
    layers.extend(
        cfg.iter()
            .filter_map(|(name, section)| build_file_layer(name, section, &explicit, base_dir)),
    );

    let _ = Registry::default().with(layers).try_init();
}

fn init_default_logging() {
    let _ = fmt()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .try_init();
}

// =================== tests ===================
