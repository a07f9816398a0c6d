use crate::engine::{DATA_FILE_NAME, Engine, EngineConfig};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times; only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Default config: no per-append fsync.
pub fn default_config() -> EngineConfig {
    init_tracing();
    EngineConfig::default()
}

/// Every append is followed by `fdatasync`.
pub fn sync_config() -> EngineConfig {
    init_tracing();
    EngineConfig {
        sync_writes: true,
        ..EngineConfig::default()
    }
}

/// A single pooled header buffer, so concurrent reads overflow the pool.
pub fn tiny_pool_config() -> EngineConfig {
    init_tracing();
    EngineConfig {
        sync_writes: false,
        header_pool_size: 1,
    }
}

/// Reopen an engine at the given path with the default config.
pub fn reopen(path: &Path) -> Engine {
    Engine::open(path, default_config()).unwrap()
}

pub fn data_path(dir: &Path) -> PathBuf {
    dir.join(DATA_FILE_NAME)
}

/// Size of the data file on disk.
pub fn file_len(dir: &Path) -> u64 {
    std::fs::metadata(data_path(dir)).unwrap().len()
}

/// Assert that the engine agrees with `model` on every key in it.
pub fn assert_matches_model(engine: &Engine, model: &HashMap<Vec<u8>, Vec<u8>>) {
    for (key, value) in model {
        assert_eq!(
            engine.get(key).unwrap().as_ref(),
            Some(value),
            "key {:?}",
            String::from_utf8_lossy(key)
        );
    }
    assert_eq!(engine.stats().unwrap().live_keys, model.len());
}

/// Put `n` keys `key_0000..` with values `val_0000..`.
pub fn put_numbered(engine: &Engine, n: u32) {
    for i in 0..n {
        engine
            .put(
                format!("key_{i:04}").into_bytes(),
                format!("val_{i:04}").into_bytes(),
            )
            .unwrap();
    }
}
