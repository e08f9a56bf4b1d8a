//! pingpong-mail server
//!
//! The SMTP surface accepting messages, the TLS certificate source, the
//! ping-pong session handler and the outbound reply delivery.

#![doc(html_no_source)]
#![deny(missing_docs)]
//
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
//
#![allow(clippy::doc_markdown)]

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

/// reply delivery over MX records.
pub mod delivery;

/// the ping-pong admission & transaction callbacks.
pub mod handler;

/// the SMTP session surface.
pub mod receiver;

/// building the autoreply.
pub mod reply;

/// accept loop.
pub mod server;

/// one-shot outbound SMTP exchange.
pub mod smtp_client;

/// certificate source, static or hot-reloading.
pub mod tls;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use handler::PingPongHandler;
pub use receiver::Handler;
pub use server::Server;
