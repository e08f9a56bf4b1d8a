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
use crate::dkim;
use crate::dns::{Dns, DnsError};
use crate::psl::PublicSuffixList;
use crate::spf::{self, SpfResult};
use pingpong_common::{
    envelop::{Envelop, Peer},
    refusal::Refusal,
    util::domain_or_fallback,
};
use pingpong_config::log_channel::AUTH;

/// Identifier alignment requested by a DMARC record (RFC 7489 section 3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentMode {
    /// exact domain match.
    Strict,
    /// organisational domain match.
    Relaxed,
}

impl AlignmentMode {
    fn parse(value: &str) -> Self {
        match value.trim() {
            "s" => Self::Strict,
            _ => Self::Relaxed,
        }
    }
}

/// The fields of a DMARC record this server consumes. Disposition (`p=`),
/// reporting addresses and sampling are intentionally not modeled, the
/// verdict here gates a reply rather than a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmarcRecord {
    /// `aspf=`, relaxed when absent.
    pub spf_alignment: AlignmentMode,
    /// `adkim=`, relaxed when absent.
    pub dkim_alignment: AlignmentMode,
}

impl DmarcRecord {
    fn parse(txt: &str) -> Option<Self> {
        let mut tags = txt.split(';');

        // v=DMARC1 must be the first tag
        let version = tags.next()?;
        match version.trim().split_once('=') {
            Some((name, value)) if name.trim() == "v" && value.trim() == "DMARC1" => {}
            _ => return None,
        }

        let mut record = Self {
            spf_alignment: AlignmentMode::Relaxed,
            dkim_alignment: AlignmentMode::Relaxed,
        };

        for tag in tags {
            let (name, value) = match tag.split_once('=') {
                Some((name, value)) => (name.trim(), value.trim()),
                None => continue,
            };
            match name {
                "aspf" => record.spf_alignment = AlignmentMode::parse(value),
                "adkim" => record.dkim_alignment = AlignmentMode::parse(value),
                _ => {}
            }
        }

        Some(record)
    }
}

/// The authentication gate in front of every reply.
pub struct DmarcVerifier {
    dns: std::sync::Arc<dyn Dns>,
    psl: PublicSuffixList,
}

impl DmarcVerifier {
    /// Create a verifier resolving through `dns`.
    #[must_use]
    pub fn new(dns: std::sync::Arc<dyn Dns>) -> Self {
        Self {
            dns,
            psl: PublicSuffixList::new(),
        }
    }

    /// Fetch the DMARC record governing `domain`, with the RFC 7489
    /// organisational-domain fallback.
    ///
    /// # Errors
    ///
    /// * [`Refusal::DmarcFailed`] when no record can be obtained, for
    ///   whatever reason: no reply is sent to senders without DMARC
    pub async fn lookup(&self, domain: &str) -> Result<DmarcRecord, Refusal> {
        match self.lookup_one(domain).await {
            Ok(Some(record)) => return Ok(record),
            Ok(None) => {}
            Err(_) => return Err(Refusal::DmarcFailed),
        }

        let org_domain = self.psl.organizational_domain(domain);
        if !org_domain.eq_ignore_ascii_case(domain) {
            if let Ok(Some(record)) = self.lookup_one(&org_domain).await {
                return Ok(record);
            }
        }

        Err(Refusal::DmarcFailed)
    }

    async fn lookup_one(&self, domain: &str) -> Result<Option<DmarcRecord>, DnsError> {
        let records = match self.dns.txt(&format!("_dmarc.{domain}")).await {
            Ok(records) => records,
            Err(DnsError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };

        Ok(records.iter().find_map(|txt| DmarcRecord::parse(txt)))
    }

    /// Identifier alignment between the From-header domain and a validated
    /// domain. An empty operand on either side never aligns.
    #[must_use]
    pub fn aligned(&self, from_domain: &str, validated: &str, mode: AlignmentMode) -> bool {
        if from_domain.is_empty() || validated.is_empty() {
            return false;
        }

        match mode {
            AlignmentMode::Strict => from_domain.eq_ignore_ascii_case(validated),
            AlignmentMode::Relaxed => {
                self.psl.organizational_domain(from_domain)
                    == self.psl.organizational_domain(validated)
            }
        }
    }

    /// The whole verdict: SPF and DKIM evaluated, either aligned with the
    /// From-header domain under the modes of the sender's DMARC record.
    ///
    /// # Errors
    ///
    /// * [`Refusal::DmarcFailed`] no record, or nothing aligned
    /// * [`Refusal::SpfCantValidate`] SPF evaluation itself errored
    /// * [`Refusal::DkimCantValidate`] DKIM machinery errored
    pub async fn check(
        &self,
        peer: &Peer,
        envelop: &Envelop,
        from_domain: &str,
        sender_domain: &str,
    ) -> Result<(), Refusal> {
        let record = self.lookup(sender_domain).await?;

        let spf_domain = self.valid_spf_domain(peer, envelop).await?;
        let spf_aligned = spf_domain
            .as_deref()
            .map_or(false, |domain| {
                self.aligned(from_domain, domain, record.spf_alignment)
            });

        let dkim_domains = dkim::verify(self.dns.as_ref(), &envelop.data).await?;
        let dkim_aligned = dkim_domains
            .iter()
            .any(|domain| self.aligned(from_domain, domain, record.dkim_alignment));

        log::debug!(
            target: AUTH,
            "spf aligned: {}, dkim aligned: {}",
            spf_aligned,
            dkim_aligned
        );

        if spf_aligned || dkim_aligned {
            Ok(())
        } else {
            Err(Refusal::DmarcFailed)
        }
    }

    // the domain validated by SPF, if any
    async fn valid_spf_domain(
        &self,
        peer: &Peer,
        envelop: &Envelop,
    ) -> Result<Option<String>, Refusal> {
        match spf::check_host(
            self.dns.as_ref(),
            peer.ip(),
            &peer.helo_name,
            envelop.sender(),
        )
        .await
        {
            // not a fail but the absence of any possible verdict
            SpfResult::TempError | SpfResult::PermError => Err(Refusal::SpfCantValidate),
            SpfResult::Pass => Ok(Some(
                domain_or_fallback(envelop.sender(), &peer.helo_name).to_string(),
            )),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::mock::MockDns;
    use std::sync::Arc;

    fn peer(ip: &str) -> Peer {
        Peer {
            addr: format!("{ip}:34567").parse().unwrap(),
            helo_name: "mail.example.com".to_string(),
        }
    }

    fn envelop(sender: &str, data: &[u8]) -> Envelop {
        Envelop {
            mail_from: if sender.is_empty() {
                None
            } else {
                Some(sender.parse().unwrap())
            },
            rcpt: vec!["pong@pong.test".parse().unwrap()],
            data: data.to_vec(),
        }
    }

    #[test]
    fn record_parsing() {
        assert_eq!(
            DmarcRecord::parse("v=DMARC1; p=none; aspf=r; adkim=s"),
            Some(DmarcRecord {
                spf_alignment: AlignmentMode::Relaxed,
                dkim_alignment: AlignmentMode::Strict,
            })
        );
        assert_eq!(
            DmarcRecord::parse("v=DMARC1; p=reject"),
            Some(DmarcRecord {
                spf_alignment: AlignmentMode::Relaxed,
                dkim_alignment: AlignmentMode::Relaxed,
            })
        );
        assert_eq!(DmarcRecord::parse("v=spf1 -all"), None);
    }

    #[test]
    fn alignment() {
        let verifier = DmarcVerifier::new(Arc::new(MockDns::new()));

        // strict wants equality, case-insensitive
        assert!(verifier.aligned("example.com", "EXAMPLE.com", AlignmentMode::Strict));
        assert!(!verifier.aligned("example.com", "mail.example.com", AlignmentMode::Strict));

        // relaxed compares organisational domains
        assert!(verifier.aligned("example.com", "mail.example.com", AlignmentMode::Relaxed));
        assert!(verifier.aligned("a.example.co.uk", "b.example.co.uk", AlignmentMode::Relaxed));
        assert!(!verifier.aligned("example.com", "example.org", AlignmentMode::Relaxed));

        // empty operands never align
        assert!(!verifier.aligned("", "example.com", AlignmentMode::Relaxed));
        assert!(!verifier.aligned("example.com", "", AlignmentMode::Strict));
        assert!(!verifier.aligned("", "", AlignmentMode::Relaxed));
    }

    #[tokio::test]
    async fn pass_via_relaxed_spf() {
        let dns = MockDns::new();
        dns.add_txt(
            "_dmarc.mail.example.com",
            vec!["v=DMARC1; p=none; aspf=r".to_string()],
        );
        dns.add_txt(
            "mail.example.com",
            vec!["v=spf1 ip4:192.0.2.0/24 -all".to_string()],
        );
        let verifier = DmarcVerifier::new(Arc::new(dns));

        // MAIL FROM u@mail.example.com, From bob@example.com: organisational
        // domains agree, relaxed SPF alignment passes
        let envelop = envelop("u@mail.example.com", b"From: bob@example.com\r\n\r\nhi\r\n");
        verifier
            .check(&peer("192.0.2.7"), &envelop, "example.com", "mail.example.com")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn spf_permerror_cant_validate() {
        let dns = MockDns::new();
        dns.add_txt(
            "_dmarc.mail.example.com",
            vec!["v=DMARC1; p=none".to_string()],
        );
        // record with a macro expression evaluates to permerror
        dns.add_txt(
            "mail.example.com",
            vec!["v=spf1 exists:%{ir}.rbl.test -all".to_string()],
        );
        let verifier = DmarcVerifier::new(Arc::new(dns));

        let envelop = envelop("u@mail.example.com", b"From: bob@example.com\r\n\r\nhi\r\n");
        assert_eq!(
            verifier
                .check(&peer("192.0.2.7"), &envelop, "example.com", "mail.example.com")
                .await,
            Err(Refusal::SpfCantValidate)
        );
    }

    #[tokio::test]
    async fn no_record_fails() {
        let dns = MockDns::new();
        let verifier = DmarcVerifier::new(Arc::new(dns));

        let envelop = envelop("u@mail.example.com", b"From: bob@example.com\r\n\r\nhi\r\n");
        assert_eq!(
            verifier
                .check(&peer("192.0.2.7"), &envelop, "example.com", "mail.example.com")
                .await,
            Err(Refusal::DmarcFailed)
        );
    }

    #[tokio::test]
    async fn org_domain_fallback() {
        let dns = MockDns::new();
        // no record at the exact domain, one at the organisational domain
        dns.add_txt(
            "_dmarc.example.com",
            vec!["v=DMARC1; p=reject".to_string()],
        );
        let verifier = DmarcVerifier::new(Arc::new(dns));

        assert_eq!(
            verifier.lookup("mail.example.com").await,
            Ok(DmarcRecord {
                spf_alignment: AlignmentMode::Relaxed,
                dkim_alignment: AlignmentMode::Relaxed,
            })
        );
    }

    #[tokio::test]
    async fn pass_via_strict_dkim() {
        let dns = MockDns::new();
        dns.add_txt(
            "_dmarc.mail.example.com",
            vec!["v=DMARC1; p=none; adkim=s".to_string()],
        );
        // SPF publishes a hard fail for everyone
        dns.add_txt("mail.example.com", vec!["v=spf1 -all".to_string()]);
        let message = crate::dkim::testing::signed_message("example.com", "sel", &dns);
        let verifier = DmarcVerifier::new(Arc::new(dns));

        let envelop = envelop("u@mail.example.com", message.as_bytes());
        verifier
            .check(&peer("192.0.2.7"), &envelop, "example.com", "mail.example.com")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn spf_fail_and_no_dkim_fails() {
        let dns = MockDns::new();
        dns.add_txt(
            "_dmarc.mail.example.com",
            vec!["v=DMARC1; p=none".to_string()],
        );
        dns.add_txt("mail.example.com", vec!["v=spf1 -all".to_string()]);
        let verifier = DmarcVerifier::new(Arc::new(dns));

        let envelop = envelop("u@mail.example.com", b"From: bob@example.com\r\n\r\nhi\r\n");
        assert_eq!(
            verifier
                .check(&peer("192.0.2.7"), &envelop, "example.com", "mail.example.com")
                .await,
            Err(Refusal::DmarcFailed)
        );
    }
}
