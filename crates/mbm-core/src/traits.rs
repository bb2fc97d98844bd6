//! Abstractions over host command execution so discovery can be tested
//! without the real tools installed.

use std::io;
use std::process::{Command, Stdio};

/// Runs a short-lived host command and returns its standard output.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args` and returns stdout decoded as UTF-8
    /// (invalid sequences replaced).
    ///
    /// Returns an I/O error only when the command cannot be executed at all;
    /// a non-zero exit status still yields whatever the command printed.
    fn run(&self, program: &str, args: &[&str]) -> io::Result<String>;
}

/// Runs commands on the host with a C locale, so tool output is not translated.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<String> {
        let output = Command::new(program)
            .args(args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
