/*
 * pingpong-mail SMTP autoresponder
 * Copyright (C) 2023 the pingpong-mail developers
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/
#![allow(clippy::module_name_repetitions)]

use crate::default;

/// Runtime settings, loaded once at startup and read-only afterwards.
///
/// Field names match the keys of the YAML configuration file.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// address the SMTP listener binds to.
    #[serde(default = "default::bind_host")]
    pub bind_host: String,
    /// port the SMTP listener binds to.
    #[serde(default = "default::bind_port")]
    pub bind_port: u16,
    /// name used for outbound EHLO and as host part of generated Message-IDs.
    #[serde(default = "default::server_name")]
    pub server_name: String,
    /// text of the 220 banner.
    #[serde(default = "default::smtp_welcome_message")]
    pub smtp_welcome_message: String,
    /// PEM certificate chain; TLS is disabled when empty.
    #[serde(default)]
    pub tls_cert_path: String,
    /// PEM private key; TLS is disabled when empty.
    #[serde(default)]
    pub tls_key_path: String,
    /// seconds between certificate reloads, -1 loads once at startup.
    #[serde(default = "default::tls_cache_duration")]
    pub tls_cache_duration: i64,
    /// minutes before the certificate `notAfter` at which caching stops.
    #[serde(default = "default::tls_cache_expiry_threshold")]
    pub tls_cache_expiry_threshold: i64,
    /// bytes of DATA accepted before the transaction is refused.
    #[serde(default = "default::max_message_size")]
    pub max_message_size: usize,
    /// sole accepted recipient, `*` accepts any.
    #[serde(default = "default::restrict_inbox")]
    pub restrict_inbox: String,
    /// mandatory subject prefix, empty disables the check.
    #[serde(default)]
    pub force_subject_prefix: String,
    /// require a DMARC pass before replying.
    #[serde(default = "default::enable_dmarc")]
    pub enable_dmarc: bool,
    /// envelope MAIL FROM of replies; empty uses the original RCPT address.
    #[serde(default)]
    pub reply_address: String,
    /// subject template, `{ORIG_SUBJ}` is substituted.
    #[serde(default = "default::reply_subject")]
    pub reply_subject: String,
    /// body template, `{ORIG_BODY}` and `{TIME}` are substituted.
    #[serde(default = "default::reply_message")]
    pub reply_message: String,
    /// remote ports tried, in order, on every MX host.
    #[serde(default = "default::delivery_ports")]
    pub delivery_ports: Vec<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_yaml("{}").expect("default configuration must be valid")
    }
}

impl Config {
    /// whether a TLS certificate & key are configured.
    #[must_use]
    pub fn has_tls(&self) -> bool {
        !self.tls_cert_path.is_empty() && !self.tls_key_path.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.bind_host, "0.0.0.0");
        assert_eq!(config.bind_port, 25);
        assert_eq!(config.restrict_inbox, "*");
        assert_eq!(config.delivery_ports, vec![25]);
        assert_eq!(config.tls_cache_duration, -1);
        assert_eq!(config.tls_cache_expiry_threshold, 2880);
        assert_eq!(config.max_message_size, 25 * 1024 * 1024);
        assert!(config.enable_dmarc);
        assert!(config.force_subject_prefix.is_empty());
        assert!(config.reply_address.is_empty());
        assert!(!config.has_tls());
    }

    #[test]
    fn full() {
        let config = Config::from_yaml(
            r#"
bind_host: "127.0.0.1"
bind_port: 2525
server_name: "pong.example.org"
smtp_welcome_message: "pong.example.org says hello"
tls_cert_path: "/etc/ssl/pong.crt"
tls_key_path: "/etc/ssl/pong.key"
tls_cache_duration: 3600
tls_cache_expiry_threshold: 2880
max_message_size: 1048576
restrict_inbox: "pong@example.org"
force_subject_prefix: "PING "
enable_dmarc: true
reply_address: "noreply@example.org"
reply_subject: "Re: {ORIG_SUBJ}"
reply_message: "pong at {TIME}\n\n{ORIG_BODY}"
delivery_ports: [25, 587]
"#,
        )
        .unwrap();

        assert_eq!(config.bind_port, 2525);
        assert_eq!(config.server_name, "pong.example.org");
        assert_eq!(config.restrict_inbox, "pong@example.org");
        assert_eq!(config.force_subject_prefix, "PING ");
        assert_eq!(config.reply_address, "noreply@example.org");
        assert_eq!(config.delivery_ports, vec![25, 587]);
        assert!(config.has_tls());
    }

    #[test]
    fn unknown_key() {
        assert!(Config::from_yaml("no_such_key: 1").is_err());
    }

    #[test]
    fn wrong_type() {
        assert!(Config::from_yaml("bind_port: \"not a port\"").is_err());
    }
}
