//! Process-wide configuration: read once at startup, immutable afterwards.
//!
//! Everything comes from `PULSE_AGENT_*` environment variables; the listen
//! port can also be given on the command line (`--port`, `-p`, `--port=N`),
//! which wins over the environment.

use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_PORT: u16 = 50110;
pub const DEFAULT_MAX_FRAME: usize = 512;
/// Placeholder credential for trying the agent out. Deployments must
/// replace it; the loader warns loudly while it is in effect.
pub const DEFAULT_SECRET: &str = "pulse-public-demo";
const DEFAULT_DB_PROCS: &str = "mysql,mysqld,mariadbd,postgres";

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub secret: String,
    pub bind: IpAddr,
    pub port: u16,
    /// Process names whose presence means "database is up".
    pub db_procs: Vec<String>,
    /// Mount point whose disk is inspected.
    pub mount: PathBuf,
    /// Maximum inbound message size in bytes; a frame this long is malformed.
    pub max_frame: usize,
    /// Pause between accept iterations, throttling reconnect storms.
    pub accept_pause: Duration,
    /// Optional per-connection idle read deadline. `None` blocks forever,
    /// waiting on the next command.
    pub idle_timeout: Option<Duration>,
}

impl AgentConfig {
    pub fn load<I: IntoIterator<Item = String>>(args: I) -> AgentConfig {
        let secret = env::var("PULSE_AGENT_SECRET").unwrap_or_else(|_| DEFAULT_SECRET.into());
        if secret == DEFAULT_SECRET {
            warn!(
                "running with the built-in demo secret; set PULSE_AGENT_SECRET \
                 before exposing this agent"
            );
        }

        let idle_secs: u64 = env_parsed("PULSE_AGENT_IDLE_TIMEOUT_SECS", 0);

        AgentConfig {
            secret,
            bind: env_parsed("PULSE_AGENT_BIND", IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            port: parse_port(args, env_parsed("PULSE_AGENT_PORT", DEFAULT_PORT)),
            db_procs: load_db_procs(),
            mount: env::var("PULSE_AGENT_MOUNT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/")),
            max_frame: env_parsed("PULSE_AGENT_MAX_FRAME", DEFAULT_MAX_FRAME).max(2),
            accept_pause: Duration::from_millis(env_parsed("PULSE_AGENT_ACCEPT_PAUSE_MS", 1000)),
            idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
        }
    }
}

fn env_parsed<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                warn!("ignoring unparsable {key}={raw}");
                default
            }
        },
        Err(_) => default,
    }
}

fn load_db_procs() -> Vec<String> {
    match env::var("PULSE_AGENT_DB_PROCS") {
        Ok(raw) => {
            let names = parse_name_list(&raw);
            if names.is_empty() {
                warn!("PULSE_AGENT_DB_PROCS is empty, keeping the default set");
                parse_name_list(DEFAULT_DB_PROCS)
            } else {
                names
            }
        }
        Err(_) => parse_name_list(DEFAULT_DB_PROCS),
    }
}

fn parse_name_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect()
}

fn parse_port<I: IntoIterator<Item = String>>(args: I, default_port: u16) -> u16 {
    let mut it = args.into_iter();
    let _ = it.next(); // program name
    let mut long: Option<String> = None;
    let mut short: Option<String> = None;
    while let Some(a) = it.next() {
        match a.as_str() {
            "--port" => long = it.next(),
            "-p" => short = it.next(),
            _ if a.starts_with("--port=") => {
                if let Some((_, v)) = a.split_once('=') {
                    long = Some(v.to_string());
                }
            }
            _ => {}
        }
    }
    long.or(short)
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(default_port)
}
