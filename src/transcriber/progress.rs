//! Progress parsing for the speech-to-text engine's diagnostic stream.
//!
//! The engine prints `NN%` tokens on stderr at its own pace. The parser
//! extracts them and applies a monotonicity filter: each distinct percentage
//! is reported at most once, and values that do not increase are dropped so
//! downstream progress bars never jump backwards.

use anyhow::Result;
use regex::Regex;

pub struct ProgressParser {
    token: Regex,
    last: Option<u8>,
}

impl ProgressParser {
    pub fn new() -> Result<Self> {
        // Matches "progress = 15%", "whisper_print_progress_callback: 30%",
        // or any bare "NN%" token.
        let token = Regex::new(r"(\d{1,3})%")?;
        Ok(Self::from_regex(token))
    }

    pub fn from_regex(token: Regex) -> Self {
        Self { token, last: None }
    }

    /// Scan one stderr line; returns the percentage to report, if any.
    pub fn observe(&mut self, line: &str) -> Option<u8> {
        let captures = self.token.captures(line)?;
        let raw: u32 = captures.get(1)?.as_str().parse().ok()?;
        let pct = raw.min(100) as u8;

        match self.last {
            Some(prev) if pct <= prev => None,
            _ => {
                self.last = Some(pct);
                Some(pct)
            }
        }
    }

    pub fn last(&self) -> Option<u8> {
        self.last
    }
}
