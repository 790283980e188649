use std::io::Write;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub fn log_line<W: Write>(sink: &mut W, message: &str, print: bool) -> Result<()> {
    if print {
        info!("{message}");
    }
    writeln!(sink, "{message}")?;
    Ok(())
}

pub fn warn_line<W: Write>(sink: &mut W, message: &str) -> Result<()> {
    warn!("{message}");
    writeln!(sink, "{message}")?;
    Ok(())
}

/// Write every line of a rendered report, blank line between blocks.
pub fn log_blocks<W: Write>(sink: &mut W, blocks: &[Vec<String>], print: bool) -> Result<()> {
    for block in blocks {
        for line in block {
            log_line(sink, line, print)?;
        }
        writeln!(sink)?;
    }
    Ok(())
}
