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
use crate::dns::{Dns, DnsError};
use pingpong_common::util::domain_or_fallback;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Evaluation result of `check_host` (RFC 7208 section 2.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpfResult {
    /// the client is authorized.
    Pass,
    /// the client is explicitly not authorized.
    Fail,
    /// weak statement, between Fail and Neutral.
    SoftFail,
    /// no definite assertion.
    Neutral,
    /// no SPF record published.
    None,
    /// transient error, a later retry may succeed.
    TempError,
    /// the record cannot be interpreted correctly.
    PermError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Qualifier {
    Pass,
    Fail,
    SoftFail,
    Neutral,
}

impl Qualifier {
    const fn result(self) -> SpfResult {
        match self {
            Self::Pass => SpfResult::Pass,
            Self::Fail => SpfResult::Fail,
            Self::SoftFail => SpfResult::SoftFail,
            Self::Neutral => SpfResult::Neutral,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mechanism {
    All,
    Include(String),
    A {
        domain: Option<String>,
        cidr4: u8,
        cidr6: u8,
    },
    Mx {
        domain: Option<String>,
        cidr4: u8,
        cidr6: u8,
    },
    Ip4(Ipv4Addr, u8),
    Ip6(Ipv6Addr, u8),
    Exists(String),
    // deprecated by RFC 7208 section 5.5, never matches here
    Ptr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Directive {
    qualifier: Qualifier,
    mechanism: Mechanism,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SpfRecord {
    directives: Vec<Directive>,
    redirect: Option<String>,
}

// Processing limit of DNS-consuming terms (RFC 7208 section 4.6.4)
const MAX_DNS_MECHANISMS: usize = 10;
// Names considered per mx target list
const MAX_MX_NAMES: usize = 10;

struct LookupBudget {
    used: usize,
}

impl LookupBudget {
    const fn new() -> Self {
        Self { used: 0 }
    }

    fn consume(&mut self) -> bool {
        self.used += 1;
        self.used <= MAX_DNS_MECHANISMS
    }
}

/// RFC 7208 `check_host`: is `ip` authorized to send mail for the domain of
/// `sender` (falling back on the `helo` identity)?
///
/// Macro expressions are not expanded, a record using them evaluates to
/// [`SpfResult::PermError`].
pub async fn check_host(dns: &dyn Dns, ip: IpAddr, helo: &str, sender: &str) -> SpfResult {
    let domain = domain_or_fallback(sender, helo).to_string();
    if domain.is_empty() {
        return SpfResult::None;
    }

    let mut budget = LookupBudget::new();
    check_domain(dns, ip, &domain, &mut budget).await
}

async fn check_domain(
    dns: &dyn Dns,
    ip: IpAddr,
    domain: &str,
    budget: &mut LookupBudget,
) -> SpfResult {
    let record = match lookup_record(dns, domain).await {
        Ok(Some(record)) => record,
        Ok(None) => return SpfResult::None,
        Err(DnsError::NotFound) => return SpfResult::None,
        Err(DnsError::Other(_)) => return SpfResult::TempError,
    };

    let record = match record {
        ParsedRecord::Valid(record) => record,
        ParsedRecord::Invalid => return SpfResult::PermError,
    };

    for directive in &record.directives {
        match evaluate(dns, ip, domain, &directive.mechanism, budget).await {
            MechanismResult::Match => return directive.qualifier.result(),
            MechanismResult::NoMatch => {}
            MechanismResult::TempError => return SpfResult::TempError,
            MechanismResult::PermError => return SpfResult::PermError,
        }
    }

    if let Some(target) = &record.redirect {
        if !budget.consume() {
            return SpfResult::PermError;
        }
        return match Box::pin(check_domain(dns, ip, target, budget)).await {
            // redirect to a domain without a record is a permerror
            SpfResult::None => SpfResult::PermError,
            other => other,
        };
    }

    SpfResult::Neutral
}

async fn lookup_record(dns: &dyn Dns, domain: &str) -> Result<Option<ParsedRecord>, DnsError> {
    let records = dns.txt(domain).await?;

    for record in records {
        if record.to_lowercase().starts_with("v=spf1")
            && (record.len() == 6 || record.as_bytes()[6] == b' ')
        {
            return Ok(Some(parse_record(&record)));
        }
    }

    Ok(None)
}

enum ParsedRecord {
    Valid(SpfRecord),
    Invalid,
}

fn parse_record(record: &str) -> ParsedRecord {
    let mut directives = vec![];
    let mut redirect = None;

    for term in record.split_whitespace().skip(1) {
        // macro expressions are not supported, treat them as unparsable
        if term.contains('%') {
            return ParsedRecord::Invalid;
        }

        if let Some(target) = term.strip_prefix("redirect=") {
            if redirect.is_some() || target.is_empty() {
                return ParsedRecord::Invalid;
            }
            redirect = Some(target.to_string());
            continue;
        }
        // other modifiers (exp=, unknown) are ignored
        if term.contains('=') {
            continue;
        }

        let (qualifier, mechanism) = match term.chars().next() {
            Some('+') => (Qualifier::Pass, &term[1..]),
            Some('-') => (Qualifier::Fail, &term[1..]),
            Some('~') => (Qualifier::SoftFail, &term[1..]),
            Some('?') => (Qualifier::Neutral, &term[1..]),
            Some(_) => (Qualifier::Pass, term),
            None => return ParsedRecord::Invalid,
        };

        match parse_mechanism(mechanism) {
            Some(mechanism) => directives.push(Directive {
                qualifier,
                mechanism,
            }),
            None => return ParsedRecord::Invalid,
        }
    }

    ParsedRecord::Valid(SpfRecord {
        directives,
        redirect,
    })
}

fn parse_mechanism(mechanism: &str) -> Option<Mechanism> {
    let (name, argument) = match mechanism.split_once(':') {
        Some((name, argument)) => (name, Some(argument)),
        None => (mechanism, None),
    };

    // "a" and "mx" may carry dual-cidr suffixes without an argument
    let (name, cidr) = match name.split_once('/') {
        Some((name, cidr)) => (name, Some(cidr)),
        None => (name, None),
    };

    match (name.to_lowercase().as_str(), argument) {
        ("all", None) => Some(Mechanism::All),
        ("include", Some(domain)) if !domain.is_empty() => {
            Some(Mechanism::Include(domain.to_string()))
        }
        ("a", argument) => {
            let (domain, cidr4, cidr6) = split_domain_cidr(argument, cidr)?;
            Some(Mechanism::A {
                domain,
                cidr4,
                cidr6,
            })
        }
        ("mx", argument) => {
            let (domain, cidr4, cidr6) = split_domain_cidr(argument, cidr)?;
            Some(Mechanism::Mx {
                domain,
                cidr4,
                cidr6,
            })
        }
        ("ip4", Some(network)) => {
            let (addr, prefix) = split_network(network, 32)?;
            Some(Mechanism::Ip4(addr.parse().ok()?, prefix))
        }
        ("ip6", Some(network)) => {
            let (addr, prefix) = split_network(network, 128)?;
            Some(Mechanism::Ip6(addr.parse().ok()?, prefix))
        }
        ("exists", Some(domain)) if !domain.is_empty() => {
            Some(Mechanism::Exists(domain.to_string()))
        }
        ("ptr", _) => Some(Mechanism::Ptr),
        _ => None,
    }
}

// "domain/24//64" | "domain" | "/24//64" | "" -> (domain, cidr4, cidr6)
fn split_domain_cidr(
    argument: Option<&str>,
    bare_cidr: Option<&str>,
) -> Option<(Option<String>, u8, u8)> {
    let (domain, cidr) = match argument {
        None => (None, bare_cidr),
        Some(argument) => match argument.split_once('/') {
            Some((domain, cidr)) => (Some(domain), Some(cidr)),
            None => (Some(argument), None),
        },
    };

    let domain = match domain {
        Some("") => return None,
        Some(domain) => Some(domain.to_string()),
        None => None,
    };

    let (cidr4, cidr6) = match cidr {
        None => (32, 128),
        Some(cidr) => match cidr.split_once("//") {
            Some(("", cidr6)) => (32, parse_prefix(cidr6, 128)?),
            Some((cidr4, cidr6)) => (parse_prefix(cidr4, 32)?, parse_prefix(cidr6, 128)?),
            None => (parse_prefix(cidr, 32)?, 128),
        },
    };

    Some((domain, cidr4, cidr6))
}

// "1.2.3.0/24" -> ("1.2.3.0", 24)
fn split_network(network: &str, max: u8) -> Option<(&str, u8)> {
    match network.split_once('/') {
        Some((addr, prefix)) => Some((addr, parse_prefix(prefix, max)?)),
        None => Some((network, max)),
    }
}

fn parse_prefix(prefix: &str, max: u8) -> Option<u8> {
    prefix.parse::<u8>().ok().filter(|p| *p <= max)
}

enum MechanismResult {
    Match,
    NoMatch,
    TempError,
    PermError,
}

#[allow(clippy::too_many_lines)]
async fn evaluate(
    dns: &dyn Dns,
    ip: IpAddr,
    domain: &str,
    mechanism: &Mechanism,
    budget: &mut LookupBudget,
) -> MechanismResult {
    match mechanism {
        Mechanism::All => MechanismResult::Match,

        Mechanism::Include(target) => {
            if !budget.consume() {
                return MechanismResult::PermError;
            }
            match Box::pin(check_domain(dns, ip, target, budget)).await {
                SpfResult::Pass => MechanismResult::Match,
                SpfResult::Fail | SpfResult::SoftFail | SpfResult::Neutral => {
                    MechanismResult::NoMatch
                }
                // an include target without a record is a permerror
                SpfResult::None | SpfResult::PermError => MechanismResult::PermError,
                SpfResult::TempError => MechanismResult::TempError,
            }
        }

        Mechanism::A {
            domain: target,
            cidr4,
            cidr6,
        } => {
            if !budget.consume() {
                return MechanismResult::PermError;
            }
            let target = target.as_deref().unwrap_or(domain);
            match_addresses(dns, ip, target, *cidr4, *cidr6).await
        }

        Mechanism::Mx {
            domain: target,
            cidr4,
            cidr6,
        } => {
            if !budget.consume() {
                return MechanismResult::PermError;
            }
            let target = target.as_deref().unwrap_or(domain);
            let exchanges = match dns.mx(target).await {
                Ok(exchanges) => exchanges,
                Err(DnsError::NotFound) => return MechanismResult::NoMatch,
                Err(DnsError::Other(_)) => return MechanismResult::TempError,
            };

            for exchange in exchanges.iter().take(MAX_MX_NAMES) {
                match match_addresses(dns, ip, exchange, *cidr4, *cidr6).await {
                    MechanismResult::Match => return MechanismResult::Match,
                    MechanismResult::NoMatch => {}
                    other => return other,
                }
            }
            MechanismResult::NoMatch
        }

        Mechanism::Ip4(network, prefix) => match ip {
            IpAddr::V4(client) if ip4_in_network(client, *network, *prefix) => {
                MechanismResult::Match
            }
            _ => MechanismResult::NoMatch,
        },

        Mechanism::Ip6(network, prefix) => match ip {
            IpAddr::V6(client) if ip6_in_network(client, *network, *prefix) => {
                MechanismResult::Match
            }
            _ => MechanismResult::NoMatch,
        },

        Mechanism::Exists(target) => {
            if !budget.consume() {
                return MechanismResult::PermError;
            }
            match dns.a(target).await {
                Ok(addrs) if !addrs.is_empty() => MechanismResult::Match,
                Ok(_) | Err(DnsError::NotFound) => MechanismResult::NoMatch,
                Err(DnsError::Other(_)) => MechanismResult::TempError,
            }
        }

        Mechanism::Ptr => {
            if !budget.consume() {
                return MechanismResult::PermError;
            }
            MechanismResult::NoMatch
        }
    }
}

async fn match_addresses(
    dns: &dyn Dns,
    ip: IpAddr,
    domain: &str,
    cidr4: u8,
    cidr6: u8,
) -> MechanismResult {
    match ip {
        IpAddr::V4(client) => match dns.a(domain).await {
            Ok(addrs) => {
                if addrs
                    .iter()
                    .any(|addr| ip4_in_network(client, *addr, cidr4))
                {
                    MechanismResult::Match
                } else {
                    MechanismResult::NoMatch
                }
            }
            Err(DnsError::NotFound) => MechanismResult::NoMatch,
            Err(DnsError::Other(_)) => MechanismResult::TempError,
        },
        IpAddr::V6(client) => match dns.aaaa(domain).await {
            Ok(addrs) => {
                if addrs
                    .iter()
                    .any(|addr| ip6_in_network(client, *addr, cidr6))
                {
                    MechanismResult::Match
                } else {
                    MechanismResult::NoMatch
                }
            }
            Err(DnsError::NotFound) => MechanismResult::NoMatch,
            Err(DnsError::Other(_)) => MechanismResult::TempError,
        },
    }
}

fn ip4_in_network(client: Ipv4Addr, network: Ipv4Addr, prefix: u8) -> bool {
    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    };
    u32::from(client) & mask == u32::from(network) & mask
}

fn ip6_in_network(client: Ipv6Addr, network: Ipv6Addr, prefix: u8) -> bool {
    let mask = if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    };
    u128::from(client) & mask == u128::from(network) & mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::mock::MockDns;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn no_record() {
        let dns = MockDns::new();
        assert_eq!(
            check_host(&dns, ip("192.0.2.1"), "helo.test", "u@example.com").await,
            SpfResult::None
        );
    }

    #[tokio::test]
    async fn ip4_pass_and_fail() {
        let dns = MockDns::new();
        dns.add_txt(
            "example.com",
            vec!["v=spf1 ip4:192.0.2.0/24 -all".to_string()],
        );

        assert_eq!(
            check_host(&dns, ip("192.0.2.55"), "helo.test", "u@example.com").await,
            SpfResult::Pass
        );
        assert_eq!(
            check_host(&dns, ip("198.51.100.1"), "helo.test", "u@example.com").await,
            SpfResult::Fail
        );
    }

    #[tokio::test]
    async fn helo_fallback_for_null_sender() {
        let dns = MockDns::new();
        dns.add_txt("helo.test", vec!["v=spf1 ip4:192.0.2.1 -all".to_string()]);

        assert_eq!(
            check_host(&dns, ip("192.0.2.1"), "helo.test", "").await,
            SpfResult::Pass
        );
    }

    #[tokio::test]
    async fn a_mechanism() {
        let dns = MockDns::new();
        dns.add_txt("example.com", vec!["v=spf1 a ~all".to_string()]);
        dns.add_a("example.com", vec!["192.0.2.10".parse().unwrap()]);

        assert_eq!(
            check_host(&dns, ip("192.0.2.10"), "helo.test", "u@example.com").await,
            SpfResult::Pass
        );
        assert_eq!(
            check_host(&dns, ip("192.0.2.11"), "helo.test", "u@example.com").await,
            SpfResult::SoftFail
        );
    }

    #[tokio::test]
    async fn mx_mechanism() {
        let dns = MockDns::new();
        dns.add_txt("example.com", vec!["v=spf1 mx -all".to_string()]);
        dns.add_mx("example.com", vec!["mail.example.com".to_string()]);
        dns.add_a("mail.example.com", vec!["192.0.2.20".parse().unwrap()]);

        assert_eq!(
            check_host(&dns, ip("192.0.2.20"), "helo.test", "u@example.com").await,
            SpfResult::Pass
        );
    }

    #[tokio::test]
    async fn include() {
        let dns = MockDns::new();
        dns.add_txt(
            "example.com",
            vec!["v=spf1 include:_spf.example.net -all".to_string()],
        );
        dns.add_txt(
            "_spf.example.net",
            vec!["v=spf1 ip4:203.0.113.0/24 -all".to_string()],
        );

        assert_eq!(
            check_host(&dns, ip("203.0.113.7"), "helo.test", "u@example.com").await,
            SpfResult::Pass
        );
    }

    #[tokio::test]
    async fn include_without_record_is_permerror() {
        let dns = MockDns::new();
        dns.add_txt(
            "example.com",
            vec!["v=spf1 include:_spf.example.net -all".to_string()],
        );

        assert_eq!(
            check_host(&dns, ip("203.0.113.7"), "helo.test", "u@example.com").await,
            SpfResult::PermError
        );
    }

    #[tokio::test]
    async fn redirect() {
        let dns = MockDns::new();
        dns.add_txt(
            "example.com",
            vec!["v=spf1 redirect=_spf.example.com".to_string()],
        );
        dns.add_txt(
            "_spf.example.com",
            vec!["v=spf1 ip4:192.0.2.0/28 ?all".to_string()],
        );

        assert_eq!(
            check_host(&dns, ip("192.0.2.3"), "helo.test", "u@example.com").await,
            SpfResult::Pass
        );
        assert_eq!(
            check_host(&dns, ip("192.0.2.200"), "helo.test", "u@example.com").await,
            SpfResult::Neutral
        );
    }

    #[tokio::test]
    async fn macros_are_permerror() {
        let dns = MockDns::new();
        dns.add_txt(
            "example.com",
            vec!["v=spf1 exists:%{ir}.sbl.example.org -all".to_string()],
        );

        assert_eq!(
            check_host(&dns, ip("192.0.2.1"), "helo.test", "u@example.com").await,
            SpfResult::PermError
        );
    }

    #[tokio::test]
    async fn dns_outage_is_temperror() {
        let dns = MockDns::new();
        dns.add_failing("example.com");

        assert_eq!(
            check_host(&dns, ip("192.0.2.1"), "helo.test", "u@example.com").await,
            SpfResult::TempError
        );
    }

    #[tokio::test]
    async fn lookup_limit() {
        let dns = MockDns::new();
        // every include consumes budget, eleven of them exceed the limit of ten
        let terms = (0..11)
            .map(|i| format!("include:i{i}.example.com"))
            .collect::<Vec<_>>()
            .join(" ");
        dns.add_txt("example.com", vec![format!("v=spf1 {terms} -all")]);
        for i in 0..11 {
            dns.add_txt(
                &format!("i{i}.example.com"),
                vec!["v=spf1 ?all".to_string()],
            );
        }

        assert_eq!(
            check_host(&dns, ip("192.0.2.1"), "helo.test", "u@example.com").await,
            SpfResult::PermError
        );
    }

    #[test]
    fn record_parsing() {
        assert!(matches!(
            parse_record("v=spf1 ip4:1.2.3.4 ~all"),
            ParsedRecord::Valid(_)
        ));
        assert!(matches!(
            parse_record("v=spf1 a:example.com/24 mx ip6:2001:db8::/32 -all"),
            ParsedRecord::Valid(_)
        ));
        assert!(matches!(
            parse_record("v=spf1 ip4:not-an-ip -all"),
            ParsedRecord::Invalid
        ));
        assert!(matches!(
            parse_record("v=spf1 bogus -all"),
            ParsedRecord::Invalid
        ));
    }
}
