//! pingpong-mail configuration

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

/// targets for log! macro
pub mod log_channel {
    /// receiver system
    pub const RECEIVER: &str = "receiver";
    /// dmarc/spf/dkim evaluation
    pub const AUTH: &str = "auth";
    /// delivery system
    pub const DELIVER: &str = "deliver";
}

mod config;
mod default;
mod log4rs_helper;
mod trust_dns_helper;

pub use config::Config;
pub use log4rs_helper::get_log4rs_config;
pub use trust_dns_helper::build_dns;

impl Config {
    /// Parse a [`Config`] from YAML.
    ///
    /// # Errors
    ///
    /// * data is not valid YAML
    /// * one field is unknown
    /// * a value has the wrong type
    pub fn from_yaml(input: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str::<Self>(input).map_err(anyhow::Error::new)
    }
}
