//! Gateway configuration: defaults, overridden by `JSONGATE_*` environment variables,
//! overridden in turn by command-line flags.

use std::time::Duration;

use crate::error::GatewayError;
use crate::rpc::dispatch::{DEFAULT_CALL_TIMEOUT, DEFAULT_RPC_PATH};

pub const DEFAULT_HTTP_PORT: u16 = 8112;
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

pub const ENV_HTTP_PORT: &str = "JSONGATE_HTTP_PORT";
pub const ENV_SESSION_TTL: &str = "JSONGATE_SESSION_TTL";
pub const ENV_SWEEP_INTERVAL: &str = "JSONGATE_SWEEP_INTERVAL";
pub const ENV_CALL_TIMEOUT: &str = "JSONGATE_CALL_TIMEOUT";
pub const ENV_RPC_PATH: &str = "JSONGATE_RPC_PATH";
pub const ENV_PASSWORD: &str = "JSONGATE_PASSWORD";
pub const ENV_HIDE_UNKNOWN_METHODS: &str = "JSONGATE_HIDE_UNKNOWN_METHODS";

pub const USAGE: &str = "jsongate server\n\nUSAGE:\n  jsongate_server [--http-port N] [--session-ttl SECS] [--sweep-interval SECS] [--call-timeout SECS] [--rpc-path PATH] [--password SECRET]\n\nOPTIONS:\n  --http-port N           HTTP port (env: JSONGATE_HTTP_PORT, default 8112)\n  --session-ttl SECS      Idle session lifetime (env: JSONGATE_SESSION_TTL, default 3600)\n  --sweep-interval SECS   Expired-session sweep period (env: JSONGATE_SWEEP_INTERVAL, default 5)\n  --call-timeout SECS     Bound on pending results (env: JSONGATE_CALL_TIMEOUT, default 30)\n  --rpc-path PATH         RPC endpoint and cookie path (env: JSONGATE_RPC_PATH, default /json)\n  --password SECRET       Gateway secret (env: JSONGATE_PASSWORD); without one every login fails\n  env JSONGATE_HIDE_UNKNOWN_METHODS=true   Report unknown methods as not authenticated to anonymous callers\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub http_port: u16,
    pub session_ttl: Duration,
    pub sweep_interval: Duration,
    pub call_timeout: Duration,
    pub rpc_path: String,
    pub password: Option<String>,
    pub hide_unknown_methods: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            session_ttl: DEFAULT_SESSION_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            rpc_path: DEFAULT_RPC_PATH.to_string(),
            password: None,
            hide_unknown_methods: false,
        }
    }
}

fn parse_num<T: std::str::FromStr>(what: &str, raw: &str) -> Result<T, GatewayError> {
    raw.trim().parse::<T>().map_err(|_| GatewayError::Config(format!("{}: `{}` is not a valid number", what, raw)))
}

fn parse_bool(what: &str, raw: &str) -> Result<bool, GatewayError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(GatewayError::Config(format!("{}: `{}` is not a boolean", what, raw))),
    }
}

/// Value following `flag`, if the flag is present.
fn arg_value<'a>(args: &'a [String], flag: &str) -> Result<Option<&'a str>, GatewayError> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag {
            return match args.get(i + 1) {
                Some(v) => Ok(Some(v.as_str())),
                None => Err(GatewayError::Config(format!("{} needs a value", flag))),
            };
        }
        i += 1;
    }
    Ok(None)
}

pub fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

impl GatewayConfig {
    /// Resolve from the process environment and `std::env::args`.
    pub fn from_env_and_args() -> Result<Self, GatewayError> {
        let args: Vec<String> = std::env::args().collect();
        Self::resolve(&args, |k| std::env::var(k).ok())
    }

    /// CLI wins over env, env wins over defaults. `env` is a lookup so callers can inject one.
    pub fn resolve<F>(args: &[String], env: F) -> Result<Self, GatewayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        let pick = |env_key: &str, flag: &str| -> Result<Option<String>, GatewayError> {
            Ok(arg_value(args, flag)?.map(str::to_string).or_else(|| env(env_key)))
        };

        if let Some(v) = pick(ENV_HTTP_PORT, "--http-port")? { cfg.http_port = parse_num("http port", &v)?; }
        if let Some(v) = pick(ENV_SESSION_TTL, "--session-ttl")? {
            cfg.session_ttl = Duration::from_secs(parse_num("session ttl", &v)?);
        }
        if let Some(v) = pick(ENV_SWEEP_INTERVAL, "--sweep-interval")? {
            cfg.sweep_interval = Duration::from_secs(parse_num("sweep interval", &v)?);
        }
        if let Some(v) = pick(ENV_CALL_TIMEOUT, "--call-timeout")? {
            cfg.call_timeout = Duration::from_secs(parse_num("call timeout", &v)?);
        }
        if let Some(v) = pick(ENV_RPC_PATH, "--rpc-path")? { cfg.rpc_path = v; }
        if let Some(v) = pick(ENV_PASSWORD, "--password")? { cfg.password = Some(v); }
        if let Some(v) = env(ENV_HIDE_UNKNOWN_METHODS) {
            cfg.hide_unknown_methods = parse_bool("hide unknown methods", &v)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        if !self.rpc_path.starts_with('/') || self.rpc_path.len() < 2 {
            return Err(GatewayError::Config(format!("rpc path `{}` must start with `/` and name a route", self.rpc_path)));
        }
        if self.session_ttl.is_zero() { return Err(GatewayError::Config("session ttl must be positive".into())); }
        if self.sweep_interval.is_zero() { return Err(GatewayError::Config("sweep interval must be positive".into())); }
        if self.call_timeout.is_zero() { return Err(GatewayError::Config("call timeout must be positive".into())); }
        Ok(())
    }
}
