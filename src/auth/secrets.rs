//! Secrets store

use serde::{Deserialize, Serialize};

/// Matches any name
pub const WILDCARD: &str = "*";

const NONWILD_SERVER: u8 = 1;
const NONWILD_CLIENT: u8 = 2;

/// One secret: `client` proves to `server` that it knows `secret`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub client: String,
    pub server: String,
    pub secret: String,
    /// Addresses the client may use once authenticated
    #[serde(default)]
    pub addresses: Vec<String>,
}

impl Secret {
    pub fn new(client: &str, server: &str, secret: &str, addresses: &[&str]) -> Self {
        Self {
            client: client.to_string(),
            server: server.to_string(),
            secret: secret.to_string(),
            addresses: addresses.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Match quality for (client, server); None if it doesn't apply
    fn score(&self, client: &str, server: &str) -> Option<u8> {
        let mut score = 0;
        if self.client == client {
            score |= NONWILD_CLIENT;
        } else if self.client != WILDCARD {
            return None;
        }
        if self.server == server {
            score |= NONWILD_SERVER;
        } else if self.server != WILDCARD {
            return None;
        }
        Some(score)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Secrets {
    entries: Vec<Secret>,
}

impl Secrets {
    pub fn new(entries: Vec<Secret>) -> Self {
        Self { entries }
    }

    /// Most specific entry for (client, server); earlier entries win ties
    pub fn lookup(&self, client: &str, server: &str) -> Option<&Secret> {
        let mut best: Option<(u8, &Secret)> = None;
        for entry in &self.entries {
            let Some(score) = entry.score(client, server) else {
                continue;
            };
            if best.map_or(true, |(s, _)| score > s) {
                best = Some((score, entry));
            }
        }
        best.map(|(_, entry)| entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_beats_wildcard() {
        let secrets = Secrets::new(vec![
            Secret::new("*", "*", "any", &[]),
            Secret::new("alice", "*", "alice-any", &[]),
            Secret::new("*", "gw", "any-gw", &[]),
            Secret::new("alice", "gw", "exact", &[]),
        ]);
        assert_eq!(secrets.lookup("alice", "gw").unwrap().secret, "exact");
        assert_eq!(secrets.lookup("alice", "other").unwrap().secret, "alice-any");
        assert_eq!(secrets.lookup("bob", "gw").unwrap().secret, "any-gw");
        assert_eq!(secrets.lookup("bob", "other").unwrap().secret, "any");
    }

    #[test]
    fn test_client_outranks_server() {
        let secrets = Secrets::new(vec![
            Secret::new("*", "gw", "server-match", &[]),
            Secret::new("alice", "*", "client-match", &[]),
        ]);
        assert_eq!(secrets.lookup("alice", "gw").unwrap().secret, "client-match");
    }

    #[test]
    fn test_first_entry_wins_tie() {
        let secrets = Secrets::new(vec![
            Secret::new("alice", "gw", "first", &[]),
            Secret::new("alice", "gw", "second", &[]),
        ]);
        assert_eq!(secrets.lookup("alice", "gw").unwrap().secret, "first");
    }

    #[test]
    fn test_no_match() {
        let secrets = Secrets::new(vec![Secret::new("alice", "gw", "s", &[])]);
        assert!(secrets.lookup("bob", "gw").is_none());
        assert!(secrets.lookup("alice", "other").is_none());
        assert!(Secrets::default().lookup("alice", "gw").is_none());
    }

    #[test]
    fn test_deserialize_without_addresses() {
        let secret: Secret =
            toml::from_str("client = \"alice\"\nserver = \"*\"\nsecret = \"pw\"\n").unwrap();
        assert!(secret.addresses.is_empty());
        assert_eq!(secret.server, WILDCARD);
    }
}
