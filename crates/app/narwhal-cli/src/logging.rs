use std::io::Write;

use flexi_logger::{DeferredNow, Logger, Record};

use crate::Error;

/// Logs go to stderr; stdout carries command output.
pub fn init() -> Result<(), Error> {
    Logger::try_with_env_or_str("info")?
        .format(cli_format)
        .start()?;

    Ok(())
}

fn cli_format(
    w: &mut dyn Write,
    _now: &mut DeferredNow,
    record: &Record,
) -> std::io::Result<()> {
    write!(w, "{:<5} {}", record.level(), record.args())
}
