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

use trust_dns_resolver::{error::ResolveError, TokioAsyncResolver};

/// build an async dns using tokio & trust_dns.
///
/// The system configuration is used when available, with a fallback on the
/// library defaults.
///
/// # Errors
///
/// * no resolver could be constructed
pub fn build_dns() -> Result<TokioAsyncResolver, ResolveError> {
    TokioAsyncResolver::tokio_from_system_conf().or_else(|_| {
        TokioAsyncResolver::tokio(
            trust_dns_resolver::config::ResolverConfig::default(),
            trust_dns_resolver::config::ResolverOpts::default(),
        )
    })
}
