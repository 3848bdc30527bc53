//! Minimal CLI parsing for watch root and scan mode overrides.

use std::env;
use std::path::PathBuf;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CliOptions {
    /// New watch root, persisted to the settings file
    pub root: Option<PathBuf>,
    /// Run the startup scan, drain once and exit
    pub scan_only: bool,
}

impl CliOptions {
    pub fn from_args() -> Self {
        Self::parse(env::args().skip(1))
    }

    pub fn parse(args: impl IntoIterator<Item = String>) -> Self {
        let mut options = CliOptions::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--scan-only" => options.scan_only = true,
                "--root" => {
                    if let Some(value) = args.next() {
                        options.root = Some(PathBuf::from(value));
                    }
                }
                _ if arg.starts_with("--root=") => {
                    if let Some(value) = arg.split_once('=').map(|(_, v)| v) {
                        options.root = Some(PathBuf::from(value));
                    }
                }
                _ => {}
            }
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliOptions {
        CliOptions::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_flags() {
        assert_eq!(parse(&[]), CliOptions::default());
        assert_eq!(
            parse(&["--root", "/srv/lessons", "--scan-only"]),
            CliOptions {
                root: Some(PathBuf::from("/srv/lessons")),
                scan_only: true,
            }
        );
        assert_eq!(parse(&["--root=/a"]).root, Some(PathBuf::from("/a")));
        assert_eq!(parse(&["--unknown"]), CliOptions::default());
    }
}
