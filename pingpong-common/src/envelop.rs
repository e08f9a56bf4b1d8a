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
use crate::address::Address;

/// The remote end of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// remote TCP address.
    pub addr: std::net::SocketAddr,
    /// name announced with HELO/EHLO.
    pub helo_name: String,
}

impl Peer {
    /// IP the connection was made from.
    #[must_use]
    pub fn ip(&self) -> std::net::IpAddr {
        self.addr.ip()
    }
}

/// Data received during a smtp transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Envelop {
    /// the sender of the email received using the MAIL FROM command.
    /// `None` is the null reverse-path (`MAIL FROM:<>`).
    pub mail_from: Option<Address>,
    /// recipients received using the RCPT TO command, bounded to one.
    pub rcpt: Vec<Address>,
    /// raw DATA octets, CRLF separated, dot-unstuffed.
    pub data: Vec<u8>,
}

impl Envelop {
    /// sender as a plain string, "" for the null sender.
    #[must_use]
    pub fn sender(&self) -> &str {
        self.mail_from.as_ref().map_or("", Address::full)
    }
}
