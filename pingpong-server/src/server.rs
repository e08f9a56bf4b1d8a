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
use crate::receiver::{handle_connection, Handler};
use crate::tls::get_tls_acceptor;
use pingpong_config::{log_channel::RECEIVER, Config};

/// TCP/IP server.
pub struct Server<H: Handler + 'static> {
    config: std::sync::Arc<Config>,
    listener: tokio::net::TcpListener,
    tls_acceptor: Option<tokio_rustls::TlsAcceptor>,
    handler: std::sync::Arc<H>,
}

impl<H: Handler + 'static> Server<H> {
    /// Create a server over an already bound socket.
    ///
    /// # Errors
    ///
    /// * cannot convert the socket to [`tokio::net::TcpListener`]
    /// * cannot initialize the TLS acceptor (static certificate broken)
    pub fn new(
        config: std::sync::Arc<Config>,
        socket: std::net::TcpListener,
        handler: std::sync::Arc<H>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            tls_acceptor: get_tls_acceptor(&config)?,
            listener: tokio::net::TcpListener::from_std(socket)?,
            config,
            handler,
        })
    }

    /// Get the local address of the tcp listener.
    ///
    /// # Errors
    ///
    /// * the socket is gone
    pub fn addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("cannot retrieve local address: {e}"))
    }

    /// Main loop: accept, spawn a session task, repeat.
    ///
    /// # Errors
    ///
    /// * the listener failed
    pub async fn listen_and_serve(&self) -> anyhow::Result<()> {
        loop {
            let (stream, client_addr) = self.listener.accept().await?;
            log::info!(target: RECEIVER, "connection from {client_addr}");

            let session = handle_connection(
                stream,
                client_addr,
                self.config.clone(),
                self.tls_acceptor.clone(),
                self.handler.clone(),
            );
            tokio::spawn(async move {
                match session.await {
                    Ok(()) => {
                        log::info!(target: RECEIVER, "connection {client_addr} closed cleanly");
                    }
                    Err(error) => {
                        log::warn!(
                            target: RECEIVER,
                            "connection {client_addr} closed with an error: {error:#}"
                        );
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::AcceptAll;

    #[tokio::test]
    async fn init_server_valid() {
        let socket = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        socket.set_nonblocking(true).unwrap();
        let bound = socket.local_addr().unwrap();

        let server = Server::new(
            std::sync::Arc::new(Config::default()),
            socket,
            std::sync::Arc::new(AcceptAll::default()),
        )
        .unwrap();
        assert_eq!(server.addr().unwrap(), bound);
    }

    #[tokio::test]
    async fn serves_a_session_end_to_end() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let socket = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        socket.set_nonblocking(true).unwrap();
        let addr = socket.local_addr().unwrap();

        let handler = std::sync::Arc::new(AcceptAll::default());
        let seen = handler.seen.clone();
        let server =
            Server::new(std::sync::Arc::new(Config::default()), socket, handler).unwrap();
        tokio::spawn(async move { server.listen_and_serve().await });

        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
        client
            .write_all(
                b"HELO client.test\r\n\
                  MAIL FROM:<a@example.com>\r\n\
                  RCPT TO:<pong@example.org>\r\n\
                  DATA\r\n\
                  Subject: hi\r\n\
                  \r\n\
                  pong?\r\n\
                  .\r\n\
                  QUIT\r\n",
            )
            .await
            .unwrap();

        let mut output = String::new();
        client.read_to_string(&mut output).await.unwrap();
        assert!(output.contains("220 "), "{output:?}");
        assert!(output.contains("221 "), "{output:?}");

        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
