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
use self::transaction::{Transaction, TransactionResult};
use pingpong_common::{
    address::Address,
    code::SmtpReplyCode,
    envelop::{Envelop, Peer},
    refusal::Refusal,
};
use pingpong_config::{log_channel::RECEIVER, Config};

mod connection;
mod io;
pub(crate) mod transaction;

pub use connection::Connection;
pub use io::AbstractIO;

/// The two decisions the SMTP surface delegates.
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    /// called on every RCPT TO, a refusal answers 550 with its text.
    async fn check_rcpt(&self, peer: &Peer, rcpt: &Address) -> Result<(), Refusal>;

    /// called at end-of-DATA, a refusal answers 554 with its text.
    ///
    /// Must return promptly: anything slow (like delivering a reply) belongs
    /// on a task of its own.
    async fn on_mail(&self, peer: &Peer, envelop: Envelop) -> Result<(), Refusal>;
}

/// Receive the incoming mails of one connection, upgrading to TLS when the
/// client asks for it.
///
/// # Errors
///
/// * the stream failed
/// * the TLS handshake failed
/// * the client exhausted its error budget
pub async fn handle_connection<S, H>(
    stream: S,
    client_addr: std::net::SocketAddr,
    config: std::sync::Arc<Config>,
    tls_acceptor: Option<tokio_rustls::TlsAcceptor>,
    handler: std::sync::Arc<H>,
) -> anyhow::Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
    H: Handler + ?Sized,
{
    let mut conn = Connection::new(client_addr, config.clone(), stream, tls_acceptor.is_some());
    conn.send_code(&SmtpReplyCode::Greetings).await?;

    match Transaction::receive(&mut conn, handler.as_ref()).await? {
        TransactionResult::Done => Ok(()),
        TransactionResult::TlsUpgrade => {
            let acceptor = tls_acceptor
                .ok_or_else(|| anyhow::anyhow!("tls upgrade accepted without a tls config"))?;

            conn.send_code(&SmtpReplyCode::TlsReady).await?;
            let tls_stream = acceptor.accept(conn.into_inner()).await?;
            log::debug!(target: RECEIVER, "{} upgraded to tls", client_addr);

            let mut secured = Connection::new(client_addr, config, tls_stream, false);
            secured.is_secured = true;

            match Transaction::receive(&mut secured, handler.as_ref()).await? {
                TransactionResult::Done => Ok(()),
                // the secured session answers "already active" instead
                TransactionResult::TlsUpgrade => {
                    anyhow::bail!("tls upgrade requested inside a tls tunnel")
                }
            }
        }
    }
}
