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
use crate::reply::Reply;
use crate::smtp_client;
use pingpong_common::util::domain_or_fallback;
use pingpong_config::{log_channel::DELIVER, Config};
use trust_dns_resolver::TokioAsyncResolver;

const DIAL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Deliver `reply` to the mail exchangers of its recipient.
///
/// Best effort by design: every failure is logged and swallowed, the
/// original transaction was ACKed long ago and there is no queue to put a
/// retry on.
pub async fn deliver_reply(config: &Config, dns: &TokioAsyncResolver, reply: &Reply) {
    let domain = domain_or_fallback(&reply.rcpt_to, "");
    if domain.is_empty() {
        log::debug!(target: DELIVER, "no domain in {:?}, dropping reply", reply.rcpt_to);
        return;
    }

    let exchangers = lookup_mx(dns, domain).await;
    if exchangers.is_empty() {
        return;
    }

    deliver_to_candidates(config, &exchangers, reply).await;
}

/// Lookup MX records for `domain`, sorted by ascending preference; empty on
/// any failure.
pub async fn lookup_mx(dns: &TokioAsyncResolver, domain: &str) -> Vec<String> {
    log::debug!(target: DELIVER, "looking up mx records for {domain}");

    let response = match dns.mx_lookup(domain).await {
        Ok(response) => response,
        Err(error) => {
            log::info!(target: DELIVER, "can't lookup mx records for {domain}: {error}");
            return vec![];
        }
    };

    let mut records = response.into_iter().collect::<Vec<_>>();
    if records.is_empty() {
        log::info!(target: DELIVER, "no mx records found for {domain}");
        return vec![];
    }
    records.sort_by_key(trust_dns_resolver::proto::rr::rdata::MX::preference);

    log::debug!(target: DELIVER, "found mx records for {domain}: {records:?}");

    records
        .into_iter()
        .map(|mx| mx.exchange().to_ascii().trim_end_matches('.').to_string())
        .collect()
}

// The dial ladder: hosts in preference order, the configured ports on each.
// A failed dial moves to the next pair. The FIRST established connection is
// the only delivery attempt: retrying a failed send elsewhere would look
// spammy, the remote has already seen our intent.
pub(crate) async fn deliver_to_candidates(config: &Config, hosts: &[String], reply: &Reply) {
    for host in hosts {
        for port in &config.delivery_ports {
            log::debug!(
                target: DELIVER,
                "trying to send reply to {} via {host}:{port}",
                reply.rcpt_to
            );

            let dialled = tokio::time::timeout(
                DIAL_TIMEOUT,
                tokio::net::TcpStream::connect((host.as_str(), *port)),
            )
            .await;

            let stream = match dialled {
                Ok(Ok(stream)) => stream,
                Ok(Err(error)) => {
                    log::debug!(target: DELIVER, "could not dial {host}:{port}: {error}");
                    continue;
                }
                Err(_) => {
                    log::debug!(target: DELIVER, "dial to {host}:{port} timed out");
                    continue;
                }
            };

            match smtp_client::exchange(stream, host, &config.server_name, reply).await {
                Ok(()) => log::info!(target: DELIVER, "sent reply to {}", reply.rcpt_to),
                Err(error) => {
                    log::debug!(target: DELIVER, "error sending reply: {error:#}");
                }
            }

            return;
        }
    }

    log::info!(
        target: DELIVER,
        "no reachable mail exchanger for {}",
        reply.rcpt_to
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_reply() -> Reply {
        Reply {
            mail_from: "pong@example.org".to_string(),
            rcpt_to: "bg@example.com".to_string(),
            message: "Subject: Re: hi\r\n\r\npong\r\n".to_string(),
        }
    }

    async fn refusing_listener(counter: Arc<AtomicUsize>) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = socket.write_all(b"554 go away\r\n").await;
                let mut sink = [0; 64];
                let _ = socket.read(&mut sink).await;
            }
        });

        port
    }

    async fn counting_listener(counter: Arc<AtomicUsize>) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            while let Ok(_socket) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        port
    }

    // a send failure after a successful dial must not move to the next
    // host:port pair
    #[tokio::test]
    async fn no_retry_after_successful_dial() {
        let refused = Arc::new(AtomicUsize::new(0));
        let spared = Arc::new(AtomicUsize::new(0));
        let first_port = refusing_listener(refused.clone()).await;
        let second_port = counting_listener(spared.clone()).await;

        let config = Config::from_yaml(&format!(
            "delivery_ports: [{first_port}, {second_port}]"
        ))
        .unwrap();

        deliver_to_candidates(&config, &["127.0.0.1".to_string()], &test_reply()).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(refused.load(Ordering::SeqCst), 1);
        assert_eq!(spared.load(Ordering::SeqCst), 0);
    }

    // a failed dial moves on to the next port
    #[tokio::test]
    async fn failed_dial_tries_the_next_pair() {
        let reached = Arc::new(AtomicUsize::new(0));
        let open_port = refusing_listener(reached.clone()).await;

        // nothing listens on the first port
        let closed = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed_port = closed.local_addr().unwrap().port();
        drop(closed);

        let config = Config::from_yaml(&format!(
            "delivery_ports: [{closed_port}, {open_port}]"
        ))
        .unwrap();

        deliver_to_candidates(&config, &["127.0.0.1".to_string()], &test_reply()).await;

        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }
}
