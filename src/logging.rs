use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use log::info;
use simplelog::{ConfigBuilder, LevelFilter, WriteLogger};

/// Send `log` output at `level` and above to the file at `path`
pub fn init_file_logger(path: impl AsRef<Path>, level: LevelFilter) -> Result<()> {
    let path = path.as_ref();
    let file =
        File::create(path).with_context(|| format!("Failed to create log file {path:?}"))?;
    let config = ConfigBuilder::new()
        .add_filter_allow_str("slidenote")
        .build();
    WriteLogger::init(level, config, file).context("Logger already initialized")?;
    info!("Starting SlideNote renderer, logging to {path:?}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::debug;

    #[test]
    fn writes_crate_logs_and_rejects_second_init() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("slidenote.log");
        init_file_logger(&path, LevelFilter::Debug).unwrap();
        debug!("probe line");
        log::logger().flush();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("Starting SlideNote renderer"));
        assert!(content.contains("probe line"));

        assert!(init_file_logger(dir.path().join("other.log"), LevelFilter::Info).is_err());
    }
}
