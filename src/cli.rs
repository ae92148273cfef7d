//! Command-line interface

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "chainflow",
    version,
    about = "Run ordered chains of parameterized HTTP requests as one transaction"
)]
pub struct Args {
    /// Pipeline definition file (YAML or TOML)
    pub pipeline: PathBuf,

    /// Seed context variable, NAME=VALUE (repeatable). Values parse as JSON
    /// when possible, otherwise as strings.
    #[arg(long = "var", value_name = "NAME=VALUE")]
    pub vars: Vec<String>,

    /// Per-request timeout, e.g. "30s" or "500ms"
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Validate the definition and exit without running
    #[arg(long)]
    pub validate: bool,

    /// Emit the run summary as JSON lines
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let args = Args::parse_from([
            "chainflow",
            "pipeline.yaml",
            "--var",
            "base_url=http://localhost:8080",
            "--var",
            "retries=3",
            "--timeout",
            "5s",
            "--json",
        ]);
        assert_eq!(args.pipeline, PathBuf::from("pipeline.yaml"));
        assert_eq!(args.vars.len(), 2);
        assert_eq!(args.timeout, Some(Duration::from_secs(5)));
        assert!(args.json);
        assert!(!args.validate);
    }

    #[test]
    fn test_validate_flag() {
        let args = Args::parse_from(["chainflow", "p.toml", "--validate"]);
        assert!(args.validate);
    }
}
