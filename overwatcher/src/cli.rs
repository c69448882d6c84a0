//! Hand-rolled argument parsing (spec.md §6.2), matching
//! `termihub-agent`'s `match args[1].as_str()` dispatch style rather
//! than pulling in a flags framework for four options.

use std::path::PathBuf;

/// Parsed command line for both `overwatcher` and `fake-overwatcher`.
#[derive(Debug, Clone)]
pub struct ParsedArgs {
    pub description_path: PathBuf,
    pub server: String,
    pub port: u16,
    pub telnet: bool,
    pub endr: bool,
}

const DEFAULT_SERVER: &str = "localhost";
const DEFAULT_PORT: u16 = 3000;

pub fn print_usage(program: &str) {
    eprintln!("Usage: {program} <test-description.yaml> [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --server <host>   Remote host to dial, or local address to bind (default: {DEFAULT_SERVER})");
    eprintln!("  --port <port>     TCP port (default: {DEFAULT_PORT})");
    eprintln!("  --telnet          Treat the connection as telnet (CR line endings, reboot-aware reconnect)");
    eprintln!("  --endr            Serial mode only: send CRLF instead of bare LF");
    eprintln!("  --version         Print version and exit");
    eprintln!("  --help            Print this help message");
}

/// Parses `args` (excluding argv[0]). Returns `Err(message)` on a
/// malformed invocation; the caller prints usage and exits non-zero.
pub fn parse_args(args: &[String]) -> Result<ParsedArgs, String> {
    let mut description_path = None;
    let mut server = DEFAULT_SERVER.to_string();
    let mut port = DEFAULT_PORT;
    let mut telnet = false;
    let mut endr = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--server" => {
                server = iter
                    .next()
                    .ok_or_else(|| "--server requires a value".to_string())?
                    .clone();
            }
            "--port" => {
                let raw = iter
                    .next()
                    .ok_or_else(|| "--port requires a value".to_string())?;
                port = raw
                    .parse()
                    .map_err(|_| format!("--port value {raw:?} is not a valid u16"))?;
            }
            "--telnet" => telnet = true,
            "--endr" => endr = true,
            other if !other.starts_with('-') && description_path.is_none() => {
                description_path = Some(PathBuf::from(other));
            }
            other => return Err(format!("unrecognized argument: {other}")),
        }
    }

    let description_path =
        description_path.ok_or_else(|| "missing test description path".to_string())?;

    Ok(ParsedArgs {
        description_path,
        server,
        port,
        telnet,
        endr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_minimal_invocation() {
        let parsed = parse_args(&args(&["test.yaml"])).unwrap();
        assert_eq!(parsed.description_path, PathBuf::from("test.yaml"));
        assert_eq!(parsed.server, DEFAULT_SERVER);
        assert_eq!(parsed.port, DEFAULT_PORT);
        assert!(!parsed.telnet);
        assert!(!parsed.endr);
    }

    #[test]
    fn parses_full_invocation() {
        let parsed = parse_args(&args(&[
            "test.yaml",
            "--server",
            "10.0.0.5",
            "--port",
            "2323",
            "--telnet",
        ]))
        .unwrap();
        assert_eq!(parsed.server, "10.0.0.5");
        assert_eq!(parsed.port, 2323);
        assert!(parsed.telnet);
    }

    #[test]
    fn rejects_missing_description_path() {
        assert!(parse_args(&args(&["--telnet"])).is_err());
    }

    #[test]
    fn rejects_unknown_flag() {
        assert!(parse_args(&args(&["test.yaml", "--bogus"])).is_err());
    }

    #[test]
    fn rejects_non_numeric_port() {
        assert!(parse_args(&args(&["test.yaml", "--port", "nope"])).is_err());
    }
}
