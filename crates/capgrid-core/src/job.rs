//! Stress workload commands.
//!
//! A job file holds one stress-ng command per line, e.g.
//!
//! ```text
//! stress-ng --io 4 --vm 5 --vm-bytes 2G --timeout 5m
//! ```
//!
//! Each line becomes a [`Job`] whose options are kept as a key → value map.
//! Re-serialising with [`Job::to_args`] always appends `--metrics-brief`
//! exactly once, whether or not the source line carried it.

use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;

use crate::config::parse_duration;

/// Flag asking stress-ng to print a metrics summary on exit.
pub const METRICS_FLAG: &str = "metrics-brief";

/// Option → value map; flags without a value map to `None`.
pub type StressorParams = BTreeMap<String, Option<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobParseError {
    #[error("empty command")]
    Empty,

    #[error("unexpected token {0:?}; options must start with --")]
    UnexpectedToken(String),

    #[error("option --{0} given more than once")]
    DuplicateOption(String),

    #[error("invalid --timeout value {0:?}")]
    InvalidTimeout(String),
}

/// One unit of work taken from the job file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// The command line as written in the job file.
    pub command: String,
    pub params: StressorParams,
    /// Run time requested via `--timeout`.
    pub duration: Option<Duration>,
}

impl Job {
    /// Parse a command line. A leading program name (`stress-ng`) is optional.
    pub fn parse(line: &str) -> Result<Self, JobParseError> {
        let command = line.trim();
        let mut tokens = command.split_whitespace().peekable();

        match tokens.peek() {
            None => return Err(JobParseError::Empty),
            Some(first) if !first.starts_with("--") => {
                tokens.next();
            }
            Some(_) => {}
        }

        let mut params = StressorParams::new();
        while let Some(token) = tokens.next() {
            let key = token
                .strip_prefix("--")
                .filter(|k| !k.is_empty())
                .ok_or_else(|| JobParseError::UnexpectedToken(token.to_string()))?;

            let value = match tokens.peek() {
                Some(next) if !next.starts_with("--") => tokens.next().map(str::to_string),
                _ => None,
            };

            if key == METRICS_FLAG {
                continue;
            }
            if params.insert(key.to_string(), value).is_some() {
                return Err(JobParseError::DuplicateOption(key.to_string()));
            }
        }

        let duration = match params.get("timeout") {
            Some(Some(raw)) => Some(
                parse_duration(raw).map_err(|_| JobParseError::InvalidTimeout(raw.clone()))?,
            ),
            Some(None) => return Err(JobParseError::InvalidTimeout(String::new())),
            None => None,
        };

        Ok(Self {
            command: command.to_string(),
            params,
            duration,
        })
    }

    /// Container arguments for the stress image.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.params.len() * 2 + 1);
        for (key, value) in &self.params {
            args.push(format!("--{key}"));
            if let Some(v) = value {
                args.push(v.clone());
            }
        }
        args.push(format!("--{METRICS_FLAG}"));
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics_flags(args: &[String]) -> usize {
        args.iter().filter(|a| *a == "--metrics-brief").count()
    }

    #[test]
    fn parses_options_and_timeout() {
        let job = Job::parse("stress-ng --io 4 --vm 5 --vm-bytes 2G --timeout 5m").unwrap();
        assert_eq!(job.params.len(), 4);
        assert_eq!(job.params["io"], Some("4".to_string()));
        assert_eq!(job.params["vm-bytes"], Some("2G".to_string()));
        assert_eq!(job.duration, Some(Duration::from_secs(300)));
    }

    #[test]
    fn program_name_is_optional() {
        let with = Job::parse("stress-ng --cpu 2").unwrap();
        let without = Job::parse("--cpu 2").unwrap();
        assert_eq!(with.params, without.params);
        assert_eq!(with.duration, None);
    }

    #[test]
    fn bare_flags_have_no_value() {
        let job = Job::parse("stress-ng --cpu 2 --aggressive --io 1").unwrap();
        assert_eq!(job.params["aggressive"], None);
        assert_eq!(job.params["io"], Some("1".to_string()));
    }

    #[test]
    fn round_trip_keeps_params_and_adds_metrics_flag_once() {
        for line in [
            "stress-ng --io 4 --vm 5 --vm-bytes 2G --timeout 5m",
            "stress-ng --cpu 8 --metrics-brief --timeout 60",
            "--metrics-brief --vm 2 --aggressive",
        ] {
            let job = Job::parse(line).unwrap();
            let args = job.to_args();
            assert_eq!(metrics_flags(&args), 1, "{line}");

            let reparsed = Job::parse(&args.join(" ")).unwrap();
            assert_eq!(reparsed.params, job.params, "{line}");
            assert_eq!(reparsed.duration, job.duration);
            assert_eq!(metrics_flags(&reparsed.to_args()), 1);
        }
    }

    #[test]
    fn overflowing_timeout_rejected() {
        assert_eq!(
            Job::parse("stress-ng --cpu 1 --timeout 99999999999999999d"),
            Err(JobParseError::InvalidTimeout("99999999999999999d".to_string()))
        );
    }

    #[test]
    fn duplicate_option_rejected() {
        assert_eq!(
            Job::parse("stress-ng --cpu 2 --cpu 4"),
            Err(JobParseError::DuplicateOption("cpu".to_string()))
        );
    }

    #[test]
    fn stray_value_rejected() {
        assert_eq!(
            Job::parse("stress-ng 4 --cpu 2"),
            Err(JobParseError::UnexpectedToken("4".to_string()))
        );
    }

    #[test]
    fn empty_and_bad_timeout() {
        assert_eq!(Job::parse("   "), Err(JobParseError::Empty));
        assert!(matches!(
            Job::parse("stress-ng --timeout soon"),
            Err(JobParseError::InvalidTimeout(_))
        ));
        assert!(matches!(
            Job::parse("stress-ng --timeout"),
            Err(JobParseError::InvalidTimeout(_))
        ));
    }
}
