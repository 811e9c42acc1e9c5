#![allow(dead_code)]

use ignite::{GroupOptions, Output, PluginRegistry};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

static INIT: Once = Once::new();

/// Initialise logging for tests.
///
/// Enable levels with e.g. `RUST_LOG=debug cargo test`
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
            .is_test(true)
            .try_init();
    });
}

/// Console capture shared with the group under test
#[derive(Clone, Default)]
pub struct Console(Arc<Mutex<Vec<u8>>>);

impl Write for Console {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Console {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

/// Options writing to a fresh console, with a short stop window
pub fn options() -> (GroupOptions, Console) {
    options_with(PluginRegistry::builtin())
}

pub fn options_with(registry: PluginRegistry) -> (GroupOptions, Console) {
    init_logging();
    let console = Console::default();
    let options = GroupOptions::default()
        .with_registry(registry)
        .with_output(Arc::new(Output::new(console.clone(), false)))
        .with_stop_timeout(Duration::from_millis(500))
        .with_line_buffering(false);
    (options, console)
}

/// Write `contents` to `dir/relative`, creating parent directories
pub fn write_file(dir: &Path, relative: &str, contents: &str) -> PathBuf {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, contents).unwrap();
    path
}

/// Poll `condition` for up to ten seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}
