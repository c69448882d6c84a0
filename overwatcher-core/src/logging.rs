//! The per-run test log (spec.md §6.3): `<name>_testresults.log`,
//! line-buffered, timestamped, mirrored to the console.
//!
//! This is distinct from the `tracing` diagnostics the binary crate wires
//! up around connection lifecycle — this file is what the spec's
//! testable properties constrain (scenario A: "log contains `MOVED TO
//! STATE= READY`").

use std::fs::File;
use std::io::{self, Write};
use std::sync::Mutex;

use chrono::Local;

use crate::description::TestDescription;

/// Owns the `<name>_testresults.log` file and mirrors every `log()` call
/// to stdout, matching `original_source/overwatcher.py`'s
/// `log()`/`logNoPrint()` pair.
pub struct TestLogger {
    file: Mutex<File>,
}

impl TestLogger {
    /// Opens (truncating) `<name>_testresults.log` and writes the header
    /// block (spec.md §6.3: name, full_name, info, markers, markers_cfg,
    /// triggers, config_seq, test_seq, user_inp, actions, initial flags).
    pub fn open(
        description: &TestDescription,
        run_triggers: bool,
        ignore_states: bool,
    ) -> io::Result<Self> {
        let name = description.name.clone().unwrap_or_default();
        let path = format!("{name}_testresults.log");
        let mut file = File::create(path)?;

        writeln!(file, "{}", name)?;
        writeln!(file, "FULL NAME: {:?}", description.full_name)?;
        writeln!(file, "INFO:")?;
        writeln!(file, "{:?}", description.info)?;
        writeln!(file, "MARKERS:")?;
        writeln!(file, "{:?}", description.markers)?;
        writeln!(file, "MARKERS_CFG:")?;
        writeln!(file, "{:?}", description.markers_cfg)?;
        writeln!(file, "TRIGGERS:")?;
        writeln!(file, "{:?}", description.triggers)?;
        writeln!(file, "CONFIG_SEQ:")?;
        writeln!(file, "{:?}", description.config_seq)?;
        writeln!(file, "TEST_SEQ:")?;
        writeln!(file, "{:?}", description.test_seq)?;
        writeln!(file, "USER_INP:")?;
        writeln!(file, "{:?}", description.user_inp)?;
        writeln!(file, "ACTIONS:")?;
        writeln!(file, "{:?}", description.actions)?;
        writeln!(file, "RUN TRIGGERS={run_triggers}")?;
        writeln!(file, "IGNORE STATES={ignore_states}")?;
        writeln!(file)?;
        writeln!(file, "TEST START:")?;
        writeln!(file)?;
        file.flush()?;

        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Appends a timestamped `+++> <args joined by space>` line to the
    /// log file and mirrors it to stdout with the same timestamp.
    pub fn log(&self, args: &[&str]) {
        let line = args.join(" ");
        let timestamp = Local::now().to_rfc3339();
        println!("{timestamp} +++> {line}");
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{timestamp} +++> {line}");
            let _ = file.flush();
        }
    }
}
