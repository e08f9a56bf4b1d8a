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
use anyhow::Context;
use pingpong_config::log_channel::DELIVER;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const IO_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

// plain-text or TLS socket, so the exchange below stays generic
enum SmtpStream {
    Plain(BufReader<TcpStream>),
    Tls(Box<BufReader<tokio_rustls::client::TlsStream<TcpStream>>>),
}

impl SmtpStream {
    async fn read_line(&mut self, buf: &mut String) -> std::io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.read_line(buf).await,
            Self::Tls(stream) => stream.read_line(buf).await,
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            Self::Plain(stream) => stream.get_mut().write_all(data).await,
            Self::Tls(stream) => stream.get_mut().write_all(data).await,
        }
    }

    async fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(stream) => stream.get_mut().flush().await,
            Self::Tls(stream) => stream.get_mut().flush().await,
        }
    }
}

struct SmtpReply {
    code: u16,
    lines: Vec<String>,
}

impl SmtpReply {
    fn is_positive(&self) -> bool {
        (200..400).contains(&self.code)
    }

    fn advertises(&self, extension: &str) -> bool {
        self.lines
            .iter()
            .any(|line| line.eq_ignore_ascii_case(extension))
    }
}

/// One complete delivery exchange over a freshly dialled connection: EHLO,
/// opportunistic STARTTLS, MAIL/RCPT/DATA, QUIT.
///
/// # Errors
///
/// * the remote closed, timed out or answered any step negatively
pub async fn exchange(
    stream: TcpStream,
    mx_host: &str,
    local_name: &str,
    reply: &Reply,
) -> anyhow::Result<()> {
    let mut stream = SmtpStream::Plain(BufReader::new(stream));

    let greeting = read_reply(&mut stream).await.context("reading greeting")?;
    if !greeting.is_positive() {
        anyhow::bail!("{mx_host} rejected the connection: {}", greeting.code);
    }

    let capabilities = ehlo(&mut stream, local_name).await?;

    // opportunistic TLS: upgrade when offered, carry on in the clear when not
    let mut stream = if capabilities.advertises("STARTTLS") {
        match starttls(stream, mx_host).await {
            Ok(mut upgraded) => {
                // RFC 3207 section 4.2: the state is reset, greet again
                ehlo(&mut upgraded, local_name).await?;
                upgraded
            }
            Err(error) => return Err(error.context("tls upgrade failed")),
        }
    } else {
        stream
    };

    command(
        &mut stream,
        &format!("MAIL FROM:<{}>", reply.mail_from),
        "MAIL FROM",
    )
    .await?;
    command(
        &mut stream,
        &format!("RCPT TO:<{}>", reply.rcpt_to),
        "RCPT TO",
    )
    .await?;

    let data = send_command(&mut stream, "DATA").await?;
    if data.code != 354 {
        anyhow::bail!("DATA rejected with {}", data.code);
    }

    stream.write_all(dot_stuff(&reply.message).as_bytes()).await?;
    stream.write_all(b".\r\n").await?;
    stream.flush().await?;

    let outcome = read_reply(&mut stream).await.context("reading DATA reply")?;
    if !outcome.is_positive() {
        anyhow::bail!("message rejected with {}", outcome.code);
    }

    // best effort, the message is already accepted
    let _quit = send_command(&mut stream, "QUIT").await;

    Ok(())
}

async fn ehlo(stream: &mut SmtpStream, local_name: &str) -> anyhow::Result<SmtpReply> {
    let reply = send_command(stream, &format!("EHLO {local_name}")).await?;
    if reply.is_positive() {
        return Ok(reply);
    }

    // ancient servers may only know HELO
    let reply = send_command(stream, &format!("HELO {local_name}")).await?;
    if reply.is_positive() {
        Ok(reply)
    } else {
        anyhow::bail!("HELO rejected with {}", reply.code)
    }
}

async fn starttls(mut stream: SmtpStream, mx_host: &str) -> anyhow::Result<SmtpStream> {
    let reply = send_command(&mut stream, "STARTTLS").await?;
    if !reply.is_positive() {
        anyhow::bail!("STARTTLS rejected with {}", reply.code);
    }

    let tcp = match stream {
        SmtpStream::Plain(reader) => reader.into_inner(),
        SmtpStream::Tls(_) => anyhow::bail!("already under tls"),
    };

    let mut roots = rustls::RootCertStore::empty();
    roots.add_server_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.0.iter().map(|anchor| {
        rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
            anchor.subject,
            anchor.spki,
            anchor.name_constraints,
        )
    }));
    let tls_config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let server_name = rustls::ServerName::try_from(mx_host)
        .map_err(|_| anyhow::anyhow!("'{mx_host}' is not a valid tls server name"))?;

    let connector = tokio_rustls::TlsConnector::from(std::sync::Arc::new(tls_config));
    let tls_stream = connector.connect(server_name, tcp).await?;

    Ok(SmtpStream::Tls(Box::new(BufReader::new(tls_stream))))
}

async fn command(stream: &mut SmtpStream, line: &str, what: &str) -> anyhow::Result<SmtpReply> {
    let reply = send_command(stream, line).await?;
    if reply.is_positive() {
        Ok(reply)
    } else {
        anyhow::bail!("{what} rejected with {}", reply.code)
    }
}

async fn send_command(stream: &mut SmtpStream, line: &str) -> anyhow::Result<SmtpReply> {
    log::trace!(target: DELIVER, "send=\"{line}\"");
    stream.write_all(format!("{line}\r\n").as_bytes()).await?;
    stream.flush().await?;
    read_reply(stream).await
}

// a complete, possibly multi-line reply
async fn read_reply(stream: &mut SmtpStream) -> anyhow::Result<SmtpReply> {
    let mut code = 0;
    let mut lines = vec![];

    loop {
        let mut line = String::new();
        let read = tokio::time::timeout(IO_TIMEOUT, stream.read_line(&mut line))
            .await
            .map_err(|_| anyhow::anyhow!("timed out waiting for a reply"))??;
        if read == 0 {
            anyhow::bail!("connection closed by the remote");
        }

        let line = line.trim_end_matches(['\r', '\n']);
        log::trace!(target: DELIVER, "recv=\"{line}\"");
        if line.len() < 4 {
            anyhow::bail!("malformed reply line: {line:?}");
        }

        code = line[..3]
            .parse::<u16>()
            .with_context(|| format!("malformed reply code in {line:?}"))?;
        lines.push(line[4..].to_string());

        if line.as_bytes()[3] == b' ' {
            break;
        }
    }

    Ok(SmtpReply { code, lines })
}

// SMTP transparency: a leading dot is doubled (RFC 5321 section 4.5.2)
fn dot_stuff(message: &str) -> String {
    let mut out = String::with_capacity(message.len() + 64);
    for line in message.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push_str("\r\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn dot_stuffing() {
        assert_eq!(dot_stuff("a\r\n.b\r\n"), "a\r\n..b\r\n\r\n");
        assert_eq!(dot_stuff(".\r\n"), "..\r\n\r\n");
        assert_eq!(dot_stuff("plain"), "plain\r\n");
    }

    #[test]
    fn extension_detection() {
        let reply = SmtpReply {
            code: 250,
            lines: vec![
                "mx.example.com".to_string(),
                "starttls".to_string(),
                "SIZE 1000".to_string(),
            ],
        };
        assert!(reply.advertises("STARTTLS"));
        assert!(!reply.advertises("PIPELINING"));
        assert!(reply.is_positive());
    }
}
