//! Entry point for the pulse sweep client. Parses args and probes each
//! target in turn; one bad host never ends the sweep.

mod probe;
mod report;

use std::env;

/// Fallback secret matching the agent's out-of-the-box value, so a demo
/// sweep works with zero flags.
const DEFAULT_SECRET: &str = "pulse-public-demo";

struct ParsedArgs {
    targets: Vec<String>,
    secret: Option<String>,
    json: bool,
    terminate: bool,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<ParsedArgs, String> {
    let mut it = args.into_iter();
    let prog = it.next().unwrap_or_else(|| "pulse".into());
    let mut targets: Vec<String> = Vec::new();
    let mut secret: Option<String> = None;
    let mut json = false;
    let mut terminate = false;

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                return Err(format!(
                    "Usage: {prog} [--secret TOKEN|-s TOKEN] [--json] [--terminate] HOST:PORT[,HOST:PORT...]"
                ));
            }
            "--secret" | "-s" => {
                secret = it.next();
            }
            "--json" => {
                json = true;
            }
            "--terminate" => {
                terminate = true;
            }
            _ if arg.starts_with("--secret=") => {
                if let Some((_, v)) = arg.split_once('=') {
                    if !v.is_empty() {
                        secret = Some(v.to_string());
                    }
                }
            }
            _ if arg.starts_with('-') => {
                return Err(format!("Unknown flag {arg}. Try {prog} --help"));
            }
            // positional targets, comma lists welcome
            _ => targets.extend(
                arg.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_owned),
            ),
        }
    }
    Ok(ParsedArgs {
        targets,
        secret,
        json,
        terminate,
    })
}

#[tokio::main]
async fn main() {
    let parsed = match parse_args(env::args()) {
        Ok(parsed) => parsed,
        Err(usage) => {
            eprintln!("{usage}");
            std::process::exit(2);
        }
    };
    if parsed.targets.is_empty() {
        eprintln!("no targets given; try --help");
        std::process::exit(2);
    }
    let secret = parsed
        .secret
        .or_else(|| env::var("PULSE_SECRET").ok())
        .unwrap_or_else(|| DEFAULT_SECRET.into());

    let mut failures = 0usize;
    for target in &parsed.targets {
        if parsed.terminate {
            match probe::terminate(target, &secret).await {
                Ok(()) => println!("{target}: terminate acknowledged"),
                Err(e) => {
                    eprintln!("pulse error for {target}: {e:#}");
                    failures += 1;
                }
            }
            continue;
        }

        match probe::fetch(target, &secret).await {
            Ok(report) if parsed.json => match serde_json::to_string(&report) {
                Ok(line) => println!("{line}"),
                Err(e) => {
                    eprintln!("pulse error for {target}: {e}");
                    failures += 1;
                }
            },
            Ok(report) => {
                println!("\n{}", report.render(target));
            }
            Err(e) => {
                eprintln!("pulse error for {target}: {e:#}");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn splits_comma_separated_targets() {
        let parsed = parse_args(args(&["pulse", "a:50110,b:50110", "c:50110"])).unwrap();
        assert_eq!(parsed.targets, vec!["a:50110", "b:50110", "c:50110"]);
        assert!(!parsed.json);
        assert!(!parsed.terminate);
        assert_eq!(parsed.secret, None);
    }

    #[test]
    fn accepts_secret_flag_forms() {
        let parsed = parse_args(args(&["pulse", "-s", "tok", "host:1"])).unwrap();
        assert_eq!(parsed.secret.as_deref(), Some("tok"));
        let parsed = parse_args(args(&["pulse", "--secret=tok2", "host:1"])).unwrap();
        assert_eq!(parsed.secret.as_deref(), Some("tok2"));
    }

    #[test]
    fn recognizes_mode_flags() {
        let parsed = parse_args(args(&["pulse", "--json", "--terminate", "host:1"])).unwrap();
        assert!(parsed.json);
        assert!(parsed.terminate);
    }

    #[test]
    fn help_and_unknown_flags_error_with_usage() {
        assert!(parse_args(args(&["pulse", "--help"])).is_err());
        assert!(parse_args(args(&["pulse", "--bogus"])).is_err());
    }
}
