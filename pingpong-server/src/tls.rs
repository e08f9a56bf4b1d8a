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
use anyhow::Context;
use pingpong_config::Config;

/// Build the TLS acceptor the configuration asks for, if any.
///
/// `tls_cache_duration == -1` loads the certificate once, any later change
/// on disk is invisible. Otherwise every handshake goes through the
/// refresh-on-demand [`ReloadingResolver`].
///
/// # Errors
///
/// * static mode and the certificate or key cannot be loaded (fatal by
///   design: better not start than start without the configured TLS)
pub fn get_tls_acceptor(config: &Config) -> anyhow::Result<Option<tokio_rustls::TlsAcceptor>> {
    if !config.has_tls() {
        log::debug!("tls not configured");
        return Ok(None);
    }

    let builder = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth();

    let server_config = if config.tls_cache_duration == -1 {
        log::debug!("tls configured in static mode");

        let (certified, _not_after) =
            load_certified_key(&config.tls_cert_path, &config.tls_key_path)?;
        builder.with_cert_resolver(std::sync::Arc::new(StaticResolver {
            certified: std::sync::Arc::new(certified),
        }))
    } else {
        log::debug!(
            "tls configured in dynamic mode, cache_duration={}s",
            config.tls_cache_duration
        );

        builder.with_cert_resolver(std::sync::Arc::new(ReloadingResolver::new(config)))
    };

    Ok(Some(tokio_rustls::TlsAcceptor::from(std::sync::Arc::new(
        server_config,
    ))))
}

struct StaticResolver {
    certified: std::sync::Arc<rustls::sign::CertifiedKey>,
}

impl rustls::server::ResolvesServerCert for StaticResolver {
    fn resolve(
        &self,
        _client_hello: rustls::server::ClientHello,
    ) -> Option<std::sync::Arc<rustls::sign::CertifiedKey>> {
        Some(self.certified.clone())
    }
}

struct CachedCert {
    certified: std::sync::Arc<rustls::sign::CertifiedKey>,
    next_reload: std::time::SystemTime,
    expires_soon: bool,
}

/// Resolves the server certificate on every ClientHello, re-reading the PEM
/// files once the cache runs out or the leaf approaches its notAfter.
pub struct ReloadingResolver {
    cert_path: String,
    key_path: String,
    cache_duration: std::time::Duration,
    expiry_threshold: std::time::Duration,
    cache: std::sync::RwLock<Option<CachedCert>>,
}

impl ReloadingResolver {
    /// Set up an empty cache over the configured paths.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            cert_path: config.tls_cert_path.clone(),
            key_path: config.tls_key_path.clone(),
            cache_duration: std::time::Duration::from_secs(
                u64::try_from(config.tls_cache_duration).unwrap_or(0),
            ),
            expiry_threshold: std::time::Duration::from_secs(
                u64::try_from(config.tls_cache_expiry_threshold).unwrap_or(0) * 60,
            ),
            cache: std::sync::RwLock::new(None),
        }
    }

    /// The resolution logic at a given instant.
    pub(crate) fn resolve_at(
        &self,
        now: std::time::SystemTime,
    ) -> Option<std::sync::Arc<rustls::sign::CertifiedKey>> {
        if let Some(cached) = self.cache.read().ok()?.as_ref() {
            if !cached.expires_soon && now < cached.next_reload {
                return Some(cached.certified.clone());
            }
        }

        match self.reload(now) {
            Ok(certified) => Some(certified),
            Err(error) => {
                // this handshake fails, the previous cache stays usable
                log::warn!("could not reload the tls certificate: {error:#}");
                None
            }
        }
    }

    // single writer: concurrent handshakes at the reload instant may reload
    // twice, the last one wins with an equivalent certificate
    fn reload(
        &self,
        now: std::time::SystemTime,
    ) -> anyhow::Result<std::sync::Arc<rustls::sign::CertifiedKey>> {
        let (certified, not_after) = load_certified_key(&self.cert_path, &self.key_path)?;
        let certified = std::sync::Arc::new(certified);

        let expires_soon = not_after
            .checked_sub(self.expiry_threshold)
            .map_or(true, |deadline| deadline <= now);

        log::debug!(
            "tls certificate loaded, expires_soon={}, next_reload in {:?}",
            expires_soon,
            self.cache_duration
        );

        *self
            .cache
            .write()
            .map_err(|_| anyhow::anyhow!("tls cache lock poisoned"))? = Some(CachedCert {
            certified: certified.clone(),
            next_reload: now + self.cache_duration,
            expires_soon,
        });

        Ok(certified)
    }
}

impl rustls::server::ResolvesServerCert for ReloadingResolver {
    fn resolve(
        &self,
        _client_hello: rustls::server::ClientHello,
    ) -> Option<std::sync::Arc<rustls::sign::CertifiedKey>> {
        self.resolve_at(std::time::SystemTime::now())
    }
}

fn get_certs_from_file(fullchain_path: &str) -> anyhow::Result<Vec<rustls::Certificate>> {
    let mut reader = std::io::BufReader::new(
        std::fs::File::open(fullchain_path).map_err(|e| anyhow::anyhow!("{e}: '{fullchain_path}'"))?,
    );

    match rustls_pemfile::certs(&mut reader).map(|certs| {
        certs
            .into_iter()
            .map(rustls::Certificate)
            .collect::<Vec<_>>()
    })? {
        empty if empty.is_empty() => Err(anyhow::anyhow!(
            "certificate file is empty: '{fullchain_path}'"
        )),
        otherwise => Ok(otherwise),
    }
}

fn get_signing_key_from_file(
    key_path: &str,
) -> anyhow::Result<std::sync::Arc<dyn rustls::sign::SigningKey>> {
    let mut reader = std::io::BufReader::new(
        std::fs::File::open(key_path).map_err(|e| anyhow::anyhow!("{e}: '{key_path}'"))?,
    );

    let private_key = rustls_pemfile::read_one(&mut reader)?
        .into_iter()
        .find_map(|item| match item {
            rustls_pemfile::Item::RSAKey(der)
            | rustls_pemfile::Item::PKCS8Key(der)
            | rustls_pemfile::Item::ECKey(der) => Some(rustls::PrivateKey(der)),
            _ => None,
        })
        .ok_or_else(|| anyhow::anyhow!("private key missing in file: '{key_path}'"))?;

    rustls::sign::any_supported_type(&private_key)
        .map_err(|_| anyhow::anyhow!("cannot parse signing key: '{key_path}'"))
}

// the key and the leaf's notAfter instant
fn load_certified_key(
    cert_path: &str,
    key_path: &str,
) -> anyhow::Result<(rustls::sign::CertifiedKey, std::time::SystemTime)> {
    let certs = get_certs_from_file(cert_path)?;
    let key = get_signing_key_from_file(key_path)?;

    let (_, leaf) = x509_parser::parse_x509_certificate(&certs[0].0)
        .map_err(|e| anyhow::anyhow!("cannot parse leaf certificate: {e}"))
        .context(cert_path.to_string())?;
    let not_after = std::time::UNIX_EPOCH
        + std::time::Duration::from_secs(
            u64::try_from(leaf.validity().not_after.timestamp()).unwrap_or(0),
        );

    Ok((
        rustls::sign::CertifiedKey::new(certs, key),
        not_after,
    ))
}
