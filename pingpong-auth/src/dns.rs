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
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::TokioAsyncResolver;

/// Failure of a single query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsError {
    /// the name does not exist or holds no record of the requested type.
    NotFound,
    /// transient resolver failure, nothing can be concluded from it.
    Other(String),
}

/// The queries the evaluators need, small enough to mock in tests.
#[async_trait::async_trait]
pub trait Dns: Send + Sync {
    /// TXT records, each with its character-strings concatenated.
    async fn txt(&self, name: &str) -> Result<Vec<String>, DnsError>;
    /// A records.
    async fn a(&self, name: &str) -> Result<Vec<std::net::Ipv4Addr>, DnsError>;
    /// AAAA records.
    async fn aaaa(&self, name: &str) -> Result<Vec<std::net::Ipv6Addr>, DnsError>;
    /// MX exchange names sorted by ascending preference, without the root dot.
    async fn mx(&self, name: &str) -> Result<Vec<String>, DnsError>;
}

/// [`Dns`] over the shared trust-dns resolver.
pub struct TrustDns(pub TokioAsyncResolver);

fn convert_error(error: &trust_dns_resolver::error::ResolveError) -> DnsError {
    match error.kind() {
        ResolveErrorKind::NoRecordsFound { .. } => DnsError::NotFound,
        _ => DnsError::Other(error.to_string()),
    }
}

#[async_trait::async_trait]
impl Dns for TrustDns {
    async fn txt(&self, name: &str) -> Result<Vec<String>, DnsError> {
        Ok(self
            .0
            .txt_lookup(name)
            .await
            .map_err(|e| convert_error(&e))?
            .into_iter()
            .map(|txt| {
                txt.txt_data()
                    .iter()
                    .map(|segment| String::from_utf8_lossy(segment).into_owned())
                    .collect::<String>()
            })
            .collect())
    }

    async fn a(&self, name: &str) -> Result<Vec<std::net::Ipv4Addr>, DnsError> {
        Ok(self
            .0
            .ipv4_lookup(name)
            .await
            .map_err(|e| convert_error(&e))?
            .into_iter()
            .collect())
    }

    async fn aaaa(&self, name: &str) -> Result<Vec<std::net::Ipv6Addr>, DnsError> {
        Ok(self
            .0
            .ipv6_lookup(name)
            .await
            .map_err(|e| convert_error(&e))?
            .into_iter()
            .collect())
    }

    async fn mx(&self, name: &str) -> Result<Vec<String>, DnsError> {
        let mut records = self
            .0
            .mx_lookup(name)
            .await
            .map_err(|e| convert_error(&e))?
            .into_iter()
            .collect::<Vec<_>>();
        records.sort_by_key(trust_dns_resolver::proto::rr::rdata::MX::preference);

        Ok(records
            .into_iter()
            .map(|mx| {
                mx.exchange()
                    .to_ascii()
                    .trim_end_matches('.')
                    .to_string()
            })
            .collect())
    }
}
