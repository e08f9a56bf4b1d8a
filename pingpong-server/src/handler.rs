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
use crate::delivery;
use crate::receiver::Handler;
use crate::reply;
use mailparse::MailHeaderMap;
use pingpong_auth::{dns::TrustDns, DmarcVerifier};
use pingpong_common::{
    address::Address,
    envelop::{Envelop, Peer},
    refusal::Refusal,
    util::{domain_or_fallback, from_header_address},
};
use pingpong_config::{log_channel::RECEIVER, Config};
use trust_dns_resolver::TokioAsyncResolver;

/// The ping-pong policy: restrict the inbox, gate on subject & DMARC, then
/// answer every accepted message with a reply to its verified originator.
pub struct PingPongHandler {
    config: std::sync::Arc<Config>,
    dns: TokioAsyncResolver,
    dmarc: DmarcVerifier,
}

impl PingPongHandler {
    /// Wire the handler to the shared resolver.
    #[must_use]
    pub fn new(config: std::sync::Arc<Config>, dns: TokioAsyncResolver) -> Self {
        Self {
            dmarc: DmarcVerifier::new(std::sync::Arc::new(TrustDns(dns.clone()))),
            config,
            dns,
        }
    }
}

#[async_trait::async_trait]
impl Handler for PingPongHandler {
    async fn check_rcpt(&self, _peer: &Peer, rcpt: &Address) -> Result<(), Refusal> {
        if self.config.restrict_inbox != "*" && rcpt.full() != self.config.restrict_inbox {
            log::debug!(target: RECEIVER, "received email for invalid inbox: {rcpt}");
            return Err(Refusal::InvalidInbox(self.config.restrict_inbox.clone()));
        }
        log::debug!(target: RECEIVER, "received email for valid inbox: {rcpt}");

        Ok(())
    }

    async fn on_mail(&self, peer: &Peer, envelop: Envelop) -> Result<(), Refusal> {
        let parsed = mailparse::parse_mail(&envelop.data).map_err(|error| {
            log::debug!(target: RECEIVER, "can't parse email body: {error}");
            Refusal::CantParseBody
        })?;

        let subject = parsed
            .headers
            .get_first_value("Subject")
            .unwrap_or_default();
        if !self.config.force_subject_prefix.is_empty()
            && !subject.starts_with(&self.config.force_subject_prefix)
        {
            log::debug!(target: RECEIVER, "subject check failed on {subject:?}");
            return Err(Refusal::SubjectPrefix(
                self.config.force_subject_prefix.clone(),
            ));
        }

        let sender_domain = domain_or_fallback(envelop.sender(), &peer.helo_name).to_string();

        // The From header is the address the reply will go to. Honouring
        // Reply-To (or the envelope sender) would let a spoofer choose the
        // target, so only the DMARC-covered From identity is acceptable.
        let from_addr = from_header_address(parsed.headers.get_first_value("From").as_deref())?;
        let from_domain = domain_or_fallback(&from_addr, "").to_string();
        if from_domain.is_empty() {
            log::debug!(target: RECEIVER, "can't get <From:> domain of {from_addr:?}");
            return Err(Refusal::FromHeaderInvalid);
        }

        log::debug!(
            target: RECEIVER,
            "sender domain: {sender_domain}, from header: {from_addr}"
        );

        // No DMARC pass -> no reply, we will not become a reflector for
        // spoofed sender addresses.
        if self.config.enable_dmarc {
            self.dmarc
                .check(peer, &envelop, &from_domain, &sender_domain)
                .await?;
        }

        log::debug!(target: RECEIVER, "will handle email");

        let incoming_rcpt = envelop
            .rcpt
            .first()
            .expect("the receiver admits exactly one recipient")
            .full()
            .to_string();
        let reply = reply::build_reply(
            &self.config,
            &incoming_rcpt,
            &from_addr,
            &subject,
            &raw_body(&envelop.data),
        );

        // ACK the peer now; the delivery owns its data and runs detached so
        // the 250 is never delayed by outbound DNS or dials
        let config = self.config.clone();
        let dns = self.dns.clone();
        tokio::spawn(async move {
            delivery::deliver_reply(&config, &dns, &reply).await;
        });

        Ok(())
    }
}

// the message body octets, headers stripped
fn raw_body(data: &[u8]) -> String {
    let data = String::from_utf8_lossy(data);
    data.find("\r\n\r\n").map_or_else(
        || {
            data.find("\n\n")
                .map_or_else(String::new, |pos| data[pos + 2..].to_string())
        },
        |pos| data[pos + 4..].to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pingpong_config::build_dns;
    use pretty_assertions::assert_eq;

    fn handler(yaml: &str) -> PingPongHandler {
        PingPongHandler::new(
            std::sync::Arc::new(Config::from_yaml(yaml).unwrap()),
            build_dns().unwrap(),
        )
    }

    fn peer() -> Peer {
        Peer {
            addr: "192.0.2.25:45678".parse().unwrap(),
            helo_name: "client.test".to_string(),
        }
    }

    fn envelop(data: &[u8]) -> Envelop {
        Envelop {
            mail_from: Some("sender@example.com".parse().unwrap()),
            rcpt: vec!["pong@example.org".parse().unwrap()],
            data: data.to_vec(),
        }
    }

    #[tokio::test]
    async fn inbox_restriction() {
        let handler = handler("restrict_inbox: \"pong@example.org\"");

        handler
            .check_rcpt(&peer(), &"pong@example.org".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(
            handler
                .check_rcpt(&peer(), &"anyone@example.org".parse().unwrap())
                .await,
            Err(Refusal::InvalidInbox("pong@example.org".to_string()))
        );
    }

    #[tokio::test]
    async fn wildcard_inbox_accepts_everyone() {
        let handler = handler("restrict_inbox: \"*\"");

        handler
            .check_rcpt(&peer(), &"anyone@example.org".parse().unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unparsable_data_is_refused() {
        let handler = handler("enable_dmarc: false");

        assert_eq!(
            handler.on_mail(&peer(), envelop(&[0xff, 0xfe])).await,
            Err(Refusal::CantParseBody)
        );
    }

    #[tokio::test]
    async fn subject_prefix_gate() {
        let handler = handler("enable_dmarc: false\nforce_subject_prefix: \"PING \"");

        assert_eq!(
            handler
                .on_mail(
                    &peer(),
                    envelop(b"From: a@b.c\r\nSubject: hi\r\n\r\nbody\r\n")
                )
                .await,
            Err(Refusal::SubjectPrefix("PING ".to_string()))
        );
    }

    #[tokio::test]
    async fn missing_from_is_refused() {
        let handler = handler("enable_dmarc: false");

        assert_eq!(
            handler
                .on_mail(&peer(), envelop(b"Subject: hi\r\n\r\nbody\r\n"))
                .await,
            Err(Refusal::FromHeaderMissing)
        );
    }

    #[tokio::test]
    async fn invalid_from_is_refused() {
        let handler = handler("enable_dmarc: false");

        assert_eq!(
            handler
                .on_mail(
                    &peer(),
                    envelop(b"From: Undisclosed recipients:;\r\nSubject: hi\r\n\r\nbody\r\n")
                )
                .await,
            Err(Refusal::FromHeaderInvalid)
        );
    }

    #[tokio::test]
    async fn name_addr_from_is_accepted() {
        let handler = handler("enable_dmarc: false");

        // the reply task will fail to resolve example.com MX quietly, the
        // transaction itself must be accepted
        handler
            .on_mail(
                &peer(),
                envelop(b"From: Barry Gibbs <bg@example.com>\r\nSubject: PING hi\r\n\r\nbody\r\n"),
            )
            .await
            .unwrap();
    }

    #[test]
    fn raw_body_extraction() {
        assert_eq!(raw_body(b"A: b\r\n\r\nbody\r\n"), "body\r\n");
        assert_eq!(raw_body(b"A: b\n\nbody\n"), "body\n");
        assert_eq!(raw_body(b"A: b\r\n"), "");
    }
}
