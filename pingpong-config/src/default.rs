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

pub fn bind_host() -> String {
    "0.0.0.0".to_string()
}

pub const fn bind_port() -> u16 {
    25
}

pub fn server_name() -> String {
    "localhost".to_string()
}

pub fn smtp_welcome_message() -> String {
    "pingpong-mail ESMTP".to_string()
}

pub const fn tls_cache_duration() -> i64 {
    -1
}

// 48 hours
pub const fn tls_cache_expiry_threshold() -> i64 {
    2880
}

// 25 MiB
pub const fn max_message_size() -> usize {
    25 * 1024 * 1024
}

pub fn restrict_inbox() -> String {
    "*".to_string()
}

pub const fn enable_dmarc() -> bool {
    true
}

pub fn reply_subject() -> String {
    "Re: {ORIG_SUBJ}".to_string()
}

pub fn reply_message() -> String {
    "Your email was received at {TIME}.\n\n{ORIG_BODY}".to_string()
}

pub fn delivery_ports() -> Vec<u16> {
    vec![25]
}
