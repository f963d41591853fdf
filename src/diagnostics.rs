//! Driver error polling and the fatal-consistency path.
//!
//! A cached value that disagrees with the driver is not recoverable: drawing
//! with divergent state produces wrong pixels silently. Such failures go
//! through [`RenderContext::gl_fatal`], which panics, unless the context runs
//! a debug session, in which case the failure is appended to the fail log
//! and rendering continues.

use std::{backtrace::Backtrace, fs::OpenOptions, io::Write};

use log::{error, warn};

use crate::{
    driver::{gl, GlDriver},
    RenderContext,
};

/// Human readable name of a GL error code.
#[must_use]
pub fn gl_error_name(code: u32) -> &'static str {
    match code {
        gl::NO_ERROR => "GL_NO_ERROR",
        gl::INVALID_ENUM => "GL_INVALID_ENUM",
        gl::INVALID_VALUE => "GL_INVALID_VALUE",
        gl::INVALID_OPERATION => "GL_INVALID_OPERATION",
        gl::OUT_OF_MEMORY => "GL_OUT_OF_MEMORY",
        _ => "unknown GL error",
    }
}

impl<D: GlDriver> RenderContext<D> {
    /// Report a fatal consistency failure.
    ///
    /// # Panics
    ///
    /// Panics with `msg` unless the context is in debug-session mode.
    pub fn gl_fatal(&mut self, msg: &str) {
        self.failures += 1;
        if !self.config.debug_session {
            panic!("{msg}");
        }
        error!(target: "RenderState", "{msg}");
        self.append_fail_log(msg);
    }

    /// Number of failures recorded through [`gl_fatal`](Self::gl_fatal).
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.failures
    }

    fn append_fail_log(&self, msg: &str) {
        let Some(path) = &self.config.fail_log_path else {
            warn!(target: "RenderState", "debug session without a fail log path");
            return;
        };
        let record = format!(
            "{}\n{msg}\nStack Trace:\n{}\nEnd of Stack Trace.\n\n",
            chrono::Utc::now().to_rfc3339(),
            Backtrace::force_capture(),
        );
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| file.write_all(record.as_bytes()));
        if let Err(err) = written {
            warn!(target: "RenderState", "failed to write fail log {}: {err}", path.display());
        }
    }

    /// Drain the driver error queue, warning about each error with the call
    /// site. Returns whether any error was pending.
    pub fn log_gl_errors(&mut self, file: &str, line: u32) -> bool {
        let mut any = false;
        loop {
            let code = self.driver.get_error();
            if code == gl::NO_ERROR {
                break;
            }
            any = true;
            warn!(
                target: "RenderState",
                "GL Error: {} ({code:#06x}) at {file}:{line}",
                gl_error_name(code)
            );
        }
        any
    }

    /// Drain the error queue and treat any pending error as fatal.
    pub fn assert_no_gl_errors(&mut self, file: &str, line: u32) {
        if self.log_gl_errors(file, line) {
            self.gl_fatal(&format!("GL errors pending at {file}:{line}"));
        }
    }

    /// Drain the error queue silently.
    pub fn clear_gl_errors(&mut self) {
        while self.driver.get_error() != gl::NO_ERROR {}
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{driver::HeadlessDriver, RenderConfig};

    #[test]
    fn drains_every_pending_error() {
        let mut ctx = RenderContext::new(HeadlessDriver::new(), RenderConfig::default());
        ctx.driver_mut().push_error(gl::INVALID_ENUM);
        ctx.driver_mut().push_error(gl::OUT_OF_MEMORY);
        assert!(ctx.log_gl_errors(file!(), line!()));
        assert!(!ctx.log_gl_errors(file!(), line!()));
    }

    #[test]
    #[should_panic(expected = "GL errors pending")]
    fn pending_errors_are_fatal_outside_debug_session() {
        let mut ctx = RenderContext::new(HeadlessDriver::new(), RenderConfig::default());
        ctx.driver_mut().push_error(gl::INVALID_OPERATION);
        ctx.assert_no_gl_errors(file!(), line!());
    }

    #[test]
    fn fail_log_records_timestamp_and_trace() {
        let path = std::env::temp_dir().join(format!("llrender-diag-{}.log", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let mut ctx = RenderContext::new(
            HeadlessDriver::new(),
            RenderConfig::default().with_debug_session(&path),
        );
        ctx.gl_fatal("cached blend diverged");
        let log = std::fs::read_to_string(&path).unwrap();
        assert!(log.contains("cached blend diverged"));
        assert!(log.contains("Stack Trace:"));
        assert!(log.contains("End of Stack Trace."));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn error_names() {
        assert_eq!(gl_error_name(gl::INVALID_VALUE), "GL_INVALID_VALUE");
        assert_eq!(gl_error_name(0x1234), "unknown GL error");
    }
}
