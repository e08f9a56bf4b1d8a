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
use super::io::AbstractIO;
use pingpong_common::code::SmtpReplyCode;
use pingpong_config::{log_channel::RECEIVER, Config};

// closing the connection after that many 4xx/5xx replies
const HARD_ERROR_COUNT: i64 = 10;

/// Instance containing connection to the server's information.
pub struct Connection<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    /// connection timestamp.
    pub timestamp: std::time::SystemTime,
    /// server's configuration.
    pub config: std::sync::Arc<Config>,
    /// peer socket address.
    pub client_addr: std::net::SocketAddr,
    /// number of error the client made so far.
    pub error_count: i64,
    /// is under a TLS tunnel.
    pub is_secured: bool,
    /// a certificate is configured, STARTTLS may be offered.
    pub tls_available: bool,
    /// abstraction of the stream.
    pub inner: AbstractIO<S>,
}

impl<S> Connection<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    /// wrap a fresh stream.
    pub fn new(
        client_addr: std::net::SocketAddr,
        config: std::sync::Arc<Config>,
        stream: S,
        tls_available: bool,
    ) -> Self {
        Self {
            timestamp: std::time::SystemTime::now(),
            config,
            client_addr,
            error_count: 0,
            is_secured: false,
            tls_available,
            inner: AbstractIO::new(stream),
        }
    }

    fn render(&self, code: &SmtpReplyCode) -> String {
        match code {
            SmtpReplyCode::Greetings => {
                format!("220 {}\r\n", self.config.smtp_welcome_message)
            }
            SmtpReplyCode::Helo => format!("250 {}\r\n", self.config.server_name),
            SmtpReplyCode::EhloPlain if self.tls_available => format!(
                "250-{}\r\n250-STARTTLS\r\n250 SIZE {}\r\n",
                self.config.server_name, self.config.max_message_size
            ),
            SmtpReplyCode::EhloPlain | SmtpReplyCode::EhloSecured => format!(
                "250-{}\r\n250 SIZE {}\r\n",
                self.config.server_name, self.config.max_message_size
            ),
            SmtpReplyCode::Code250 => "250 Ok\r\n".to_string(),
            SmtpReplyCode::TlsReady => "220 Ready to start TLS\r\n".to_string(),
            SmtpReplyCode::Code354 => {
                "354 Start mail input; end with <CRLF>.<CRLF>\r\n".to_string()
            }
            SmtpReplyCode::Code221 => {
                "221 Service closing transmission channel\r\n".to_string()
            }
            SmtpReplyCode::Code451Timeout => "451 Timeout - closing connection\r\n".to_string(),
            SmtpReplyCode::Code452TooManyRecipients => {
                "452 Requested action not taken: too many recipients\r\n".to_string()
            }
            SmtpReplyCode::Code454 => {
                "454 TLS not available due to temporary reason\r\n".to_string()
            }
            SmtpReplyCode::Code500 => "500 Syntax error command unrecognised\r\n".to_string(),
            SmtpReplyCode::Code501 => {
                "501 Syntax error in parameters or arguments\r\n".to_string()
            }
            SmtpReplyCode::Code502 => "502 Command not implemented\r\n".to_string(),
            SmtpReplyCode::Code503 => "503 Bad sequence of commands\r\n".to_string(),
            SmtpReplyCode::Code552 => {
                "552 Message exceeds fixed maximum message size\r\n".to_string()
            }
            SmtpReplyCode::TlsAlreadyActive => "554 5.5.1 Error: TLS already active\r\n".to_string(),
            SmtpReplyCode::RcptRefused(refusal) => format!("550 {refusal}\r\n"),
            SmtpReplyCode::MailRefused(refusal) => format!("554 {refusal}\r\n"),
        }
    }

    /// send a reply code to the client.
    ///
    /// # Errors
    ///
    /// * the stream failed
    /// * too many errors, the client is cut off
    pub async fn send_code(&mut self, code: &SmtpReplyCode) -> anyhow::Result<()> {
        log::debug!(target: RECEIVER, "sending code={:?}", code);

        let reply = self.render(code);
        self.send(&reply).await?;

        if code.is_error() {
            self.error_count += 1;

            if self.error_count >= HARD_ERROR_COUNT {
                self.send("451 Too many errors from the client\r\n").await?;
                anyhow::bail!("{} sent too many erroneous commands", self.client_addr)
            }
        }
        Ok(())
    }

    /// Send a raw reply line.
    ///
    /// # Errors
    ///
    /// * internal connection writer error
    pub async fn send(&mut self, reply: &str) -> anyhow::Result<()> {
        log::trace!(target: RECEIVER, "send=\"{:?}\"", reply);
        self.inner.send(reply.as_bytes()).await?;
        Ok(())
    }

    /// read a line from the client.
    ///
    /// # Errors
    ///
    /// * timed-out
    /// * stream's error
    pub async fn read(
        &mut self,
        timeout: std::time::Duration,
    ) -> std::io::Result<Option<std::string::String>> {
        let line = self.inner.next_line(timeout).await;
        if let Ok(Some(line)) = &line {
            log::trace!(target: RECEIVER, "recv=\"{:?}\"", line);
        }
        line
    }

    /// give back the stream for a TLS upgrade.
    pub fn into_inner(self) -> S {
        self.inner.into_inner()
    }
}
