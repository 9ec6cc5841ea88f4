//! Configuration validation

use super::Config;
use crate::protocol::lcp::{MAX_MRU, MIN_MRU};

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN] {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate configuration and return warnings/errors
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_lcp(config, &mut result);
    validate_auth(config, &mut result);
    validate_ipcp(config, &mut result);
    validate_log(config, &mut result);

    result
}

fn validate_lcp(config: &Config, result: &mut ValidationResult) {
    let lcp = &config.lcp;

    if lcp.mru < MIN_MRU || lcp.mru > MAX_MRU {
        result.error(format!(
            "lcp.mru: {} outside {}..={}",
            lcp.mru, MIN_MRU, MAX_MRU
        ));
    }
    if lcp.mru_ceiling < MIN_MRU {
        result.error(format!(
            "lcp.mru_ceiling: {} below minimum {}",
            lcp.mru_ceiling, MIN_MRU
        ));
    }
    if lcp.restart == 0 {
        result.error("lcp.restart: retransmit timeout must be at least 1 second");
    }
    if lcp.echo_failure > 0 && lcp.echo_interval == 0 {
        result.warn("lcp.echo_failure: has no effect without echo_interval");
    }
    if lcp.loopback_fail == 0 {
        result.warn("lcp.loopback_fail: 0 closes the link on the first looped-back magic number");
    }
}

fn validate_auth(config: &Config, result: &mut ValidationResult) {
    let auth = &config.auth;

    if (auth.require_pap || auth.require_chap) && config.secrets.is_empty() {
        result.error("auth: peer authentication required but no secrets configured");
    }
    if auth.null_login && !auth.require_pap && !auth.require_chap {
        result.warn("auth.null_login: has no effect unless authentication is required");
    }

    let user = &config.link.user;
    if user.is_empty() {
        return;
    }
    if auth.refuse_pap && auth.refuse_chap {
        result.warn(format!(
            "link.user: '{}' configured but both PAP and CHAP are refused",
            user
        ));
    }
    let has_secret = config
        .secrets
        .iter()
        .any(|s| s.client == *user || s.client == crate::auth::WILDCARD);
    if config.link.password.is_empty() && !has_secret {
        result.warn(format!(
            "link.user: no password or secret for '{}'",
            user
        ));
    }
}

fn validate_ipcp(config: &Config, result: &mut ValidationResult) {
    let ipcp = &config.ipcp;
    if !ipcp.enabled {
        result.warn("ipcp.enabled: no network protocol will run; the link closes after authentication");
        return;
    }

    if let (Some(local), Some(remote)) = (ipcp.local, ipcp.remote) {
        if local == remote {
            result.error(format!(
                "ipcp: local and remote addresses are both {}",
                local
            ));
        }
    }
    if ipcp.remote.is_none() {
        result.warn("ipcp.remote: not set, the peer must supply its own address");
    }
    if ipcp.local.is_none() && !ipcp.accept_local {
        result.warn("ipcp.local: not set, our address will be taken from the peer");
    }
}

fn validate_log(config: &Config, result: &mut ValidationResult) {
    let level = config.log.level.to_lowercase();
    if !matches!(level.as_str(), "error" | "warn" | "info" | "debug" | "trace") {
        result.warn(format!(
            "log.level: unknown level '{}', using info",
            config.log.level
        ));
    }
    if !matches!(config.log.format.as_str(), "pretty" | "compact" | "json") {
        result.warn(format!(
            "log.format: unknown format '{}', using pretty",
            config.log.format
        ));
    }
}
