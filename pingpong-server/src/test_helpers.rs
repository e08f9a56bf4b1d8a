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
use pingpong_common::{
    address::Address,
    envelop::{Envelop, Peer},
    refusal::Refusal,
};
use pingpong_config::Config;
use std::sync::{Arc, Mutex};

/// A type implementing AsyncWrite+AsyncRead to emulate sockets.
pub struct Mock<'a, T: AsRef<[u8]> + Unpin> {
    read_cursor: std::io::Cursor<T>,
    write_cursor: std::io::Cursor<&'a mut Vec<u8>>,
}

impl<'a, T: AsRef<[u8]> + Unpin> Mock<'a, T> {
    /// Create an new instance.
    pub fn new(read: T, write: &'a mut Vec<u8>) -> Self {
        Self {
            read_cursor: std::io::Cursor::new(read),
            write_cursor: std::io::Cursor::new(write),
        }
    }
}

impl<T: AsRef<[u8]> + Unpin> tokio::io::AsyncRead for Mock<'_, T> {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::result::Result<(), std::io::Error>> {
        std::pin::Pin::new(&mut self.read_cursor).poll_read(cx, buf)
    }
}

impl<T: AsRef<[u8]> + Unpin> tokio::io::AsyncWrite for Mock<'_, T> {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        _: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<Result<usize, std::io::Error>> {
        std::task::Poll::Ready(std::io::Write::write(&mut self.write_cursor, buf))
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        _: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), std::io::Error>> {
        std::task::Poll::Ready(std::io::Write::flush(&mut self.write_cursor))
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        _: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), std::io::Error>> {
        std::task::Poll::Ready(Ok(()))
    }
}

/// Accepts everything and records what the receiver hands over.
#[derive(Default)]
pub struct AcceptAll {
    /// every (peer, envelope) passed to [`Handler::on_mail`].
    pub seen: Arc<Mutex<Vec<(Peer, Envelop)>>>,
}

#[async_trait::async_trait]
impl Handler for AcceptAll {
    async fn check_rcpt(&self, _peer: &Peer, _rcpt: &Address) -> Result<(), Refusal> {
        Ok(())
    }

    async fn on_mail(&self, peer: &Peer, envelop: Envelop) -> Result<(), Refusal> {
        self.seen.lock().unwrap().push((peer.clone(), envelop));
        Ok(())
    }
}

fn local_test_config() -> Config {
    Config::from_yaml("max_message_size: 1000").expect("test configuration must parse")
}

/// Feed an SMTP conversation through a mock socket and match every produced
/// reply line against the expected prefixes.
///
/// # Panics
///
/// * the produced replies differ from the expectation
pub async fn test_receiver<H: Handler + 'static>(handler: H, smtp_input: &str, expected: &[&str]) {
    let mut written = Vec::new();
    {
        let mock = Mock::new(smtp_input.as_bytes().to_vec(), &mut written);
        let _outcome = handle_connection(
            mock,
            "127.0.0.1:53123".parse().unwrap(),
            Arc::new(local_test_config()),
            None,
            Arc::new(handler),
        )
        .await;
    }

    let output = String::from_utf8(written).expect("server replies must be UTF-8");
    let lines = output
        .split("\r\n")
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>();

    pretty_assertions::assert_eq!(
        lines.len(),
        expected.len(),
        "unexpected reply count in {output:?}"
    );
    for (line, prefix) in lines.iter().zip(expected) {
        assert!(
            line.starts_with(prefix),
            "expected a reply starting with {prefix:?}, got {line:?} in {output:?}"
        );
    }
}
