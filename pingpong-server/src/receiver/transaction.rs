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
use super::connection::Connection;
use super::Handler;
use pingpong_common::{
    address::Address,
    code::SmtpReplyCode,
    envelop::{Envelop, Peer},
    event::Event,
};
use pingpong_config::log_channel::RECEIVER;

const READ_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5 * 60);

// the reply goes to a single verified originator, a second RCPT is always
// refused
const MAX_RCPT: usize = 1;

/// State of the SMTP session.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
enum State {
    /// after the TCP/IP socket has been accepted.
    Connect,
    /// after receiving HELO/EHLO command.
    Helo,
    /// after receiving MAIL FROM command.
    MailFrom,
    /// after receiving RCPT TO command.
    RcptTo,
    /// receiving the payload.
    Data,
}

/// Why the command loop returned.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, PartialEq, Eq)]
pub enum TransactionResult {
    /// QUIT or end-of-stream, the connection is done.
    Done,
    /// the client asked for a TLS tunnel.
    TlsUpgrade,
}

/// Drives a session: commands in, replies out, the handler consulted on
/// RCPT and at end-of-DATA.
pub struct Transaction {
    state: State,
    helo: Option<String>,
    envelop: Envelop,
    data_size: usize,
    oversized: bool,
}

impl Transaction {
    fn reset(&mut self) {
        self.envelop = Envelop::default();
        self.data_size = 0;
        self.oversized = false;
    }

    fn peer<S>(&self, conn: &Connection<S>) -> Peer
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
    {
        Peer {
            addr: conn.client_addr,
            helo_name: self.helo.clone().unwrap_or_default(),
        }
    }

    /// Run the command loop until the client is done or upgrades to TLS.
    ///
    /// # Errors
    ///
    /// * the stream failed or timed out
    /// * the client exhausted its error budget
    pub async fn receive<S, H>(
        conn: &mut Connection<S>,
        handler: &H,
    ) -> anyhow::Result<TransactionResult>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
        H: Handler + ?Sized,
    {
        let mut transaction = Self {
            state: State::Connect,
            helo: None,
            envelop: Envelop::default(),
            data_size: 0,
            oversized: false,
        };

        loop {
            let line = match conn.read(READ_TIMEOUT).await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    log::debug!(target: RECEIVER, "{} reached eof", conn.client_addr);
                    return Ok(TransactionResult::Done);
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    conn.send_code(&SmtpReplyCode::Code451Timeout).await?;
                    anyhow::bail!(e)
                }
                Err(e) => anyhow::bail!(e),
            };

            if transaction.state == State::Data {
                transaction.receive_data_line(conn, handler, &line).await?;
                continue;
            }

            match Event::parse_cmd(&line) {
                Err(code) => conn.send_code(&code).await?,
                Ok(Event::NoopCmd) => conn.send_code(&SmtpReplyCode::Code250).await?,
                Ok(Event::HelpCmd(_) | Event::VrfyCmd(_)) => {
                    conn.send_code(&SmtpReplyCode::Code502).await?;
                }
                Ok(Event::QuitCmd) => {
                    conn.send_code(&SmtpReplyCode::Code221).await?;
                    return Ok(TransactionResult::Done);
                }
                Ok(Event::RsetCmd) => {
                    transaction.reset();
                    if transaction.state != State::Connect {
                        transaction.state = State::Helo;
                    }
                    conn.send_code(&SmtpReplyCode::Code250).await?;
                }
                Ok(Event::HeloCmd(helo)) => {
                    transaction.set_helo(helo);
                    conn.send_code(&SmtpReplyCode::Helo).await?;
                }
                Ok(Event::EhloCmd(helo)) => {
                    transaction.set_helo(helo);
                    conn.send_code(&if conn.is_secured {
                        SmtpReplyCode::EhloSecured
                    } else {
                        SmtpReplyCode::EhloPlain
                    })
                    .await?;
                }
                Ok(Event::StartTls) if conn.is_secured => {
                    conn.send_code(&SmtpReplyCode::TlsAlreadyActive).await?;
                }
                Ok(Event::StartTls) if !conn.tls_available => {
                    conn.send_code(&SmtpReplyCode::Code454).await?;
                }
                Ok(Event::StartTls) => return Ok(TransactionResult::TlsUpgrade),
                Ok(Event::MailCmd(reverse_path)) => {
                    transaction.receive_mail_from(conn, reverse_path).await?;
                }
                Ok(Event::RcptCmd(forward_path)) => {
                    transaction
                        .receive_rcpt_to(conn, handler, forward_path)
                        .await?;
                }
                Ok(Event::DataCmd) => {
                    if transaction.state == State::RcptTo {
                        transaction.state = State::Data;
                        conn.send_code(&SmtpReplyCode::Code354).await?;
                    } else {
                        conn.send_code(&SmtpReplyCode::Code503).await?;
                    }
                }
            }
        }
    }

    fn set_helo(&mut self, helo: String) {
        self.reset();
        self.helo = Some(helo);
        self.state = State::Helo;
    }

    async fn receive_mail_from<S>(
        &mut self,
        conn: &mut Connection<S>,
        reverse_path: Option<String>,
    ) -> anyhow::Result<()>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
    {
        if self.state != State::Helo {
            return conn.send_code(&SmtpReplyCode::Code503).await;
        }

        let mail_from = match reverse_path {
            None => None,
            Some(path) => match Address::try_from(path) {
                Ok(address) => Some(address),
                Err(_) => return conn.send_code(&SmtpReplyCode::Code501).await,
            },
        };

        self.reset();
        self.envelop.mail_from = mail_from;
        self.state = State::MailFrom;
        conn.send_code(&SmtpReplyCode::Code250).await
    }

    async fn receive_rcpt_to<S, H>(
        &mut self,
        conn: &mut Connection<S>,
        handler: &H,
        forward_path: String,
    ) -> anyhow::Result<()>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
        H: Handler + ?Sized,
    {
        if !matches!(self.state, State::MailFrom | State::RcptTo) {
            return conn.send_code(&SmtpReplyCode::Code503).await;
        }

        if self.envelop.rcpt.len() >= MAX_RCPT {
            return conn
                .send_code(&SmtpReplyCode::Code452TooManyRecipients)
                .await;
        }

        let rcpt = match Address::try_from(forward_path) {
            Ok(address) => address,
            Err(_) => return conn.send_code(&SmtpReplyCode::Code501).await,
        };

        match handler.check_rcpt(&self.peer(conn), &rcpt).await {
            Ok(()) => {
                self.envelop.rcpt.push(rcpt);
                self.state = State::RcptTo;
                conn.send_code(&SmtpReplyCode::Code250).await
            }
            Err(refusal) => conn.send_code(&SmtpReplyCode::RcptRefused(refusal)).await,
        }
    }

    async fn receive_data_line<S, H>(
        &mut self,
        conn: &mut Connection<S>,
        handler: &H,
        line: &str,
    ) -> anyhow::Result<()>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
        H: Handler + ?Sized,
    {
        if line != "." {
            // transparency, RFC 5321 section 4.5.2
            let line = line.strip_prefix('.').unwrap_or(line);

            self.data_size += line.len() + 2;
            if self.data_size > conn.config.max_message_size {
                self.oversized = true;
            } else {
                self.envelop.data.extend_from_slice(line.as_bytes());
                self.envelop.data.extend_from_slice(b"\r\n");
            }
            return Ok(());
        }

        self.state = State::Helo;

        if self.oversized {
            self.reset();
            return conn.send_code(&SmtpReplyCode::Code552).await;
        }

        let peer = self.peer(conn);
        let envelop = std::mem::take(&mut self.envelop);
        self.reset();

        match handler.on_mail(&peer, envelop).await {
            Ok(()) => conn.send_code(&SmtpReplyCode::Code250).await,
            Err(refusal) => conn.send_code(&SmtpReplyCode::MailRefused(refusal)).await,
        }
    }
}
