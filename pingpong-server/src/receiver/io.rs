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

/// CRLF line framing over any async stream.
#[derive(Debug)]
pub struct AbstractIO<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    /// the underlying stream.
    pub inner: S,
    buf: Vec<u8>,
}

const BUFFER_SIZE: usize = 1024;
const NEEDLE: &[u8] = b"\r\n";
// a single line longer than this closes the connection
const MAX_LINE_SIZE: usize = 2 * 1024 * 1024;

impl<S> AbstractIO<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    /// wrap a stream.
    pub fn new(stream: S) -> Self {
        Self {
            inner: stream,
            buf: Vec::new(),
        }
    }

    /// give the stream back, dropping any unconsumed bytes.
    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Read the next CRLF terminated line, without its terminator.
    /// `Ok(None)` is a clean end-of-stream.
    ///
    /// # Errors
    ///
    /// * the timeout elapsed
    /// * the line is not UTF-8, or unreasonably long
    /// * the underlying stream failed
    pub async fn next_line(
        &mut self,
        timeout: std::time::Duration,
    ) -> std::io::Result<Option<String>> {
        tokio::time::timeout(timeout, self.next_line_inner())
            .await
            .map_err(|t| std::io::Error::new(std::io::ErrorKind::TimedOut, t))?
    }

    async fn next_line_inner(&mut self) -> std::io::Result<Option<String>> {
        let mut output = vec![];
        loop {
            if let Some(i) = self
                .buf
                .windows(NEEDLE.len())
                .position(|window| window == NEEDLE)
            {
                output.extend_from_slice(&self.buf[..i]);
                self.buf.drain(..i + NEEDLE.len());

                return String::from_utf8(output)
                    .map(Some)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e));
            }

            // keep the last byte around, the CRLF may be split across reads
            if self.buf.len() > 1 {
                output.extend_from_slice(&self.buf[..self.buf.len() - 1]);
                self.buf.drain(..self.buf.len() - 1);
            }

            if output.len() > MAX_LINE_SIZE {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "line too long",
                ));
            }

            let mut raw = vec![0; BUFFER_SIZE];
            let filled = {
                use tokio::io::AsyncReadExt;
                self.inner.read(&mut raw).await?
            };
            if filled == 0 {
                if output.is_empty() && self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream closed inside a line",
                ));
            }
            self.buf.extend_from_slice(&raw[..filled]);
        }
    }

    /// Write a full buffer and flush it.
    ///
    /// # Errors
    ///
    /// * the underlying stream failed
    pub async fn send(&mut self, reply: &[u8]) -> std::io::Result<()> {
        use tokio::io::AsyncWriteExt;

        self.inner.write_all(reply).await?;
        self.inner.flush().await
    }
}
