//! Configuration types

use crate::auth::{AuthConfig, Secret, Secrets};
use crate::fsm::FsmConfig;
use crate::ipcp::IpcpConfig;
use crate::lcp::LcpConfig;
use crate::link::{LinkConfig, Scripts};
use crate::telemetry::LogConfig;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration (pppd.toml)
///
/// Every field has a default, so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub link: LinkSection,
    pub lcp: LcpSection,
    pub auth: AuthSection,
    pub secrets: Vec<Secret>,
    pub ipcp: IpcpSection,
    pub scripts: ScriptsSection,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LinkSection {
    /// Our name for authentication
    pub name: String,
    pub user: String,
    pub password: String,
    pub persist: bool,
    /// Seconds to wait before reopening a persistent link
    pub holdoff: u64,
    pub passive: bool,
    pub silent: bool,
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            name: "pppd".to_string(),
            user: String::new(),
            password: String::new(),
            persist: false,
            holdoff: 30,
            passive: false,
            silent: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LcpSection {
    pub mru: u16,
    pub mru_ceiling: u16,
    pub asyncmap: u32,
    pub magic: bool,
    pub pcomp: bool,
    pub accomp: bool,
    pub lqr_period: u32,
    /// Seconds between Echo-Requests; 0 disables
    pub echo_interval: u64,
    pub echo_failure: u32,
    pub loopback_fail: u32,
    /// Retransmit timeout in seconds
    pub restart: u64,
    pub max_configure: u32,
    pub max_terminate: u32,
    /// Nak loops tolerated
    pub max_failure: u32,
}

impl Default for LcpSection {
    fn default() -> Self {
        let lcp = LcpConfig::default();
        Self {
            mru: lcp.mru,
            mru_ceiling: lcp.mru_ceiling,
            asyncmap: lcp.asyncmap,
            magic: lcp.magic,
            pcomp: lcp.pcomp,
            accomp: lcp.accomp,
            lqr_period: lcp.lqr_period,
            echo_interval: lcp.echo_interval.as_secs(),
            echo_failure: lcp.echo_failure,
            loopback_fail: lcp.loopback_fail,
            restart: lcp.fsm.timeout.as_secs(),
            max_configure: lcp.fsm.max_configure,
            max_terminate: lcp.fsm.max_terminate,
            max_failure: lcp.fsm.max_nak_loops,
        }
    }
}

impl LcpSection {
    fn fsm_config(&self) -> FsmConfig {
        FsmConfig {
            timeout: Duration::from_secs(self.restart),
            max_configure: self.max_configure,
            max_terminate: self.max_terminate,
            max_nak_loops: self.max_failure,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthSection {
    pub require_pap: bool,
    pub require_chap: bool,
    pub refuse_pap: bool,
    pub refuse_chap: bool,
    pub null_login: bool,
    pub pap_timeout: u64,
    pub pap_max_transmits: u32,
    pub pap_request_timeout: u64,
    pub chap_restart: u64,
    pub chap_max_transmits: u32,
    /// Rechallenge interval in seconds; 0 disables
    pub chap_interval: u64,
}

impl Default for AuthSection {
    fn default() -> Self {
        let auth = AuthConfig::default();
        Self {
            require_pap: auth.require_pap,
            require_chap: auth.require_chap,
            refuse_pap: auth.refuse_pap,
            refuse_chap: auth.refuse_chap,
            null_login: auth.null_login,
            pap_timeout: auth.pap_timeout.as_secs(),
            pap_max_transmits: auth.pap_max_transmits,
            pap_request_timeout: auth.pap_request_timeout.as_secs(),
            chap_restart: auth.chap_restart.as_secs(),
            chap_max_transmits: auth.chap_max_transmits,
            chap_interval: auth.chap_interval.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct IpcpSection {
    pub enabled: bool,
    pub local: Option<Ipv4Addr>,
    pub remote: Option<Ipv4Addr>,
    pub accept_local: bool,
    pub accept_remote: bool,
    pub usepeerdns: bool,
    pub ms_dns: Vec<Ipv4Addr>,
}

impl Default for IpcpSection {
    fn default() -> Self {
        Self {
            enabled: true,
            local: None,
            remote: None,
            accept_local: false,
            accept_remote: false,
            usepeerdns: false,
            ms_dns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScriptsSection {
    pub auth_up: Option<PathBuf>,
    pub auth_down: Option<PathBuf>,
    pub ip_up: Option<PathBuf>,
    pub ip_down: Option<PathBuf>,
}

impl Config {
    /// Runtime settings for one link
    pub fn link_config(&self) -> LinkConfig {
        let fsm = self.lcp.fsm_config();

        let lcp = LcpConfig {
            fsm,
            mru: self.lcp.mru,
            mru_ceiling: self.lcp.mru_ceiling,
            asyncmap: self.lcp.asyncmap,
            magic: self.lcp.magic,
            pcomp: self.lcp.pcomp,
            accomp: self.lcp.accomp,
            lqr_period: self.lcp.lqr_period,
            echo_interval: Duration::from_secs(self.lcp.echo_interval),
            echo_failure: self.lcp.echo_failure,
            loopback_fail: self.lcp.loopback_fail,
        };

        let auth = AuthConfig {
            require_pap: self.auth.require_pap,
            require_chap: self.auth.require_chap,
            refuse_pap: self.auth.refuse_pap,
            refuse_chap: self.auth.refuse_chap,
            null_login: self.auth.null_login,
            pap_timeout: Duration::from_secs(self.auth.pap_timeout),
            pap_max_transmits: self.auth.pap_max_transmits,
            pap_request_timeout: Duration::from_secs(self.auth.pap_request_timeout),
            chap_restart: Duration::from_secs(self.auth.chap_restart),
            chap_max_transmits: self.auth.chap_max_transmits,
            chap_interval: Duration::from_secs(self.auth.chap_interval),
        };

        let ipcp = self.ipcp.enabled.then(|| IpcpConfig {
            fsm,
            local: self.ipcp.local,
            remote: self.ipcp.remote,
            accept_local: self.ipcp.accept_local,
            accept_remote: self.ipcp.accept_remote,
            usepeerdns: self.ipcp.usepeerdns,
            ms_dns: self.ipcp.ms_dns.clone(),
        });

        LinkConfig {
            name: self.link.name.clone(),
            user: self.link.user.clone(),
            password: self.link.password.clone(),
            persist: self.link.persist,
            holdoff: Duration::from_secs(self.link.holdoff),
            passive: self.link.passive,
            silent: self.link.silent,
            lcp,
            auth,
            secrets: Secrets::new(self.secrets.clone()),
            ipcp,
            scripts: Scripts {
                auth_up: self.scripts.auth_up.clone(),
                auth_down: self.scripts.auth_down.clone(),
                ip_up: self.scripts.ip_up.clone(),
                ip_down: self.scripts.ip_down.clone(),
            },
        }
    }

    /// Copy safe to print: passwords and secrets masked
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if !config.link.password.is_empty() {
            config.link.password = "********".to_string();
        }
        for secret in &mut config.secrets {
            if !secret.secret.is_empty() {
                secret.secret = "********".to_string();
            }
        }
        config
    }
}
