//! Harness argument parsing.
//!
//! ```text
//! relaygl-stress <iterations> <frames> [-client <machine:0.0>] [-ssl]
//! ```
//!
//! Single-dash options are matched case-insensitively, and any option
//! starting with `-cl` names the client.

use std::ffi::OsString;
use std::fmt;

use clap::Parser;

pub const USAGE: &str = "\
USAGE: relaygl-stress <iterations> <frames> [-client <machine:0.0>] [-ssl]
-client = X Display where the video should be sent (a viewer must be running
          on that machine)
          [default = read from RELAYGL_CLIENT, else localhost]
-ssl = use a TLS tunnel to connect to the viewer";

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "relaygl-stress", disable_help_flag = true, disable_version_flag = true)]
pub struct HarnessArgs {
    /// Connect/send/disconnect cycles to run.
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    pub iterations: u32,

    /// Frames sent per cycle.
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    pub frames: u32,

    #[arg(long)]
    pub client: Option<String>,

    #[arg(long)]
    pub ssl: bool,
}

/// Malformed command line. Displays as the usage text.
#[derive(Debug)]
pub struct UsageError;

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(USAGE)
    }
}

impl std::error::Error for UsageError {}

impl HarnessArgs {
    /// Parse a full argv, program name first.
    pub fn from_argv<I, T>(argv: I) -> Result<Self, UsageError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let argv: Vec<OsString> = argv.into_iter().map(Into::into).collect();
        Self::try_parse_from(normalize(argv)).map_err(|_| UsageError)
    }
}

/// Rewrite the single-dash options into their long forms.
fn normalize(argv: Vec<OsString>) -> Vec<OsString> {
    let last = argv.len().saturating_sub(1);
    argv.into_iter()
        .enumerate()
        .map(|(i, arg)| {
            let Some(s) = arg.to_str() else { return arg };
            let lower = s.to_ascii_lowercase();
            if i == 0 {
                arg
            } else if lower == "-ssl" {
                "--ssl".into()
            } else if lower.starts_with("-cl") && i < last {
                "--client".into()
            } else {
                arg
            }
        })
        .collect()
}
