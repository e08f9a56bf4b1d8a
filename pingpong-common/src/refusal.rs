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

/// Refusals surfaced to the peer as 5xx replies.
///
/// The display texts are part of the protocol surface of this server, do not
/// reword them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Refusal {
    /// recipient is not the configured inbox
    #[error("please send your test emails to: {0}")]
    InvalidInbox(String),

    /// subject does not carry the mandatory prefix
    #[error("please start your subject with '{0}'")]
    SubjectPrefix(String),

    /// DATA is not a parsable RFC 5322 message
    #[error("Could not parse message body")]
    CantParseBody,

    /// no `From:` header in the message
    #[error("<From:> header is missing")]
    FromHeaderMissing,

    /// `From:` header exists but is not a valid name-addr
    #[error("<From:> header is invalid")]
    FromHeaderInvalid,

    /// SPF evaluation itself errored (permerror/temperror)
    #[error("SPF can not be validated")]
    SpfCantValidate,

    /// DKIM verification machinery errored
    #[error("DKIM can not be validated")]
    DkimCantValidate,

    /// no aligned SPF or DKIM identifier
    #[error("DMARC failed or sender could not be validated")]
    DmarcFailed,
}
