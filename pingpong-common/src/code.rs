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
use crate::refusal::Refusal;

/// Replies emitted by the receiver.
///
/// 2yz  Positive Completion reply
/// 3yz  Positive Intermediate reply
/// 4yz  Transient Negative Completion reply
/// 5yz  Permanent Negative Completion reply
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum SmtpReplyCode {
    /// service ready, carries the configured banner
    Greetings,
    /// reply to HELO
    Helo,
    /// ehlo message, STARTTLS not advertised
    EhloPlain,
    /// ehlo message inside a TLS tunnel
    EhloSecured,
    /// requested mail action okay, completed
    Code250,
    /// ready to start TLS
    TlsReady,
    /// start mail input
    Code354,
    /// service closing transmission channel
    Code221,
    /// requested action aborted: local error in processing
    Code451Timeout,
    /// this server accepts a single recipient per transaction
    Code452TooManyRecipients,
    /// TLS not available due to temporary reason
    Code454,
    /// syntax error, command unrecognized
    Code500,
    /// syntax error in parameters or arguments
    Code501,
    /// command not implemented
    Code502,
    /// bad sequence of commands
    Code503,
    /// message size exceeds fixed maximum
    Code552,
    /// 554 5.5.1 Error: TLS already active
    TlsAlreadyActive,
    /// recipient refused by the admission callback
    RcptRefused(Refusal),
    /// transaction refused at end-of-DATA
    MailRefused(Refusal),
}

impl SmtpReplyCode {
    /// whether this reply counts towards the client error budget.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::Code451Timeout
                | Self::Code452TooManyRecipients
                | Self::Code454
                | Self::Code500
                | Self::Code501
                | Self::Code502
                | Self::Code503
                | Self::Code552
                | Self::TlsAlreadyActive
                | Self::RcptRefused(_)
                | Self::MailRefused(_)
        )
    }
}
