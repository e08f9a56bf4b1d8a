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
use crate::code::SmtpReplyCode;

/// Command SMTPs sent and received by servers and clients
/// See "Simple Mail Transfer Protocol"
/// <https://datatracker.ietf.org/doc/html/rfc5321>
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Event {
    /// Used to identify the SMTP client to the SMTP server.
    /// Syntax = `"HELO" SP ( Domain / address-literal ) CRLF`
    HeloCmd(String),
    /// Used to identify the SMTP client to the SMTP server and request smtp
    /// extensions.
    /// Syntax = `"EHLO" SP ( Domain / address-literal ) CRLF`
    EhloCmd(String),
    /// Initiates a mail transaction. The reverse-path may be null (`<>`).
    /// Syntax = `"MAIL FROM:" Reverse-path [SP Mail-parameters] CRLF`
    MailCmd(Option<String>),
    /// Identifies an individual recipient of the mail data.
    /// Syntax = `"RCPT TO:" Forward-path [SP Rcpt-parameters] CRLF`
    RcptCmd(String),
    /// Causes the mail data to be appended to the mail data buffer.
    /// Syntax = `"DATA" CRLF`
    DataCmd,
    /// Aborts the current mail transaction.
    /// Syntax = `"RSET" CRLF`
    RsetCmd,
    /// Asks the receiver to confirm that the argument identifies a user.
    /// Syntax = `"VRFY" SP String CRLF`
    VrfyCmd(String),
    /// Asks the receiver for helpful information.
    /// Syntax = `"HELP" [ SP String ] CRLF`
    HelpCmd(Option<String>),
    /// Does not affect any parameters or previously entered commands.
    /// Syntax = `"NOOP" [ SP String ] CRLF`
    NoopCmd,
    /// The receiver MUST send a "221 OK" reply and close the channel.
    /// Syntax = `"QUIT" CRLF`
    QuitCmd,
    /// See "SMTP Service Extension for Secure SMTP over Transport Layer Security"
    /// <https://datatracker.ietf.org/doc/html/rfc3207>
    /// Syntax = `"STARTTLS" CRLF`
    StartTls,
}

impl Event {
    /// Create a valid SMTP command (or event) from a string OR return a SMTP
    /// error code.
    /// See <https://datatracker.ietf.org/doc/html/rfc5321#section-4.1>
    ///
    /// # Errors
    ///
    /// * the line is empty, too long, or not a known command
    pub fn parse_cmd(input: &str) -> Result<Self, SmtpReplyCode> {
        // 510 = RFC 5321 4.5.3.1.4 minimum command line limit + a margin for
        // the esmtp parameters this server tolerates but ignores.
        if input.len() > 510 || input.is_empty() {
            return Err(SmtpReplyCode::Code500);
        }

        let words = input.split_whitespace().collect::<Vec<&str>>();

        let mut smtp_args = words.iter();
        let smtp_verb = match smtp_args.next() {
            // NOTE: if the first word is not the beginning of the input (whitespace before)
            Some(first_word) if &input[..first_word.len()] != *first_word => {
                return Err(SmtpReplyCode::Code501);
            }
            Some(smtp_verb) => smtp_verb,
            None => return Err(SmtpReplyCode::Code500),
        };

        match (
            smtp_verb.to_ascii_uppercase().as_str(),
            smtp_args.as_slice(),
        ) {
            ("HELO", args) => Self::parse_arg_helo(args),
            ("EHLO", args) => Self::parse_arg_ehlo(args),
            ("MAIL", args) => Self::parse_arg_mail_from(args),
            ("RCPT", args) => Self::parse_arg_rcpt_to(args),

            ("VRFY", [user_or_mailbox]) => Ok(Self::VrfyCmd((*user_or_mailbox).to_string())),

            ("HELP", []) => Ok(Self::HelpCmd(None)),
            ("HELP", [help_value]) => Ok(Self::HelpCmd(Some((*help_value).to_string()))),

            ("DATA", []) => Ok(Self::DataCmd),
            ("QUIT", []) => Ok(Self::QuitCmd),
            ("RSET", []) => Ok(Self::RsetCmd),
            ("NOOP", [..]) => Ok(Self::NoopCmd),

            ("STARTTLS", []) => Ok(Self::StartTls),

            _ => Err(SmtpReplyCode::Code501),
        }
    }

    fn parse_domain_or_address_literal(args: &[&str]) -> anyhow::Result<String> {
        match args {
            [ip] if ip.starts_with('[') && ip.ends_with(']') => Ok(ip[1..ip.len() - 1]
                .parse::<std::net::IpAddr>()
                .map_err(|e| anyhow::anyhow!(e))?
                .to_string()),
            [domain] => Ok(addr::parse_domain_name(domain)
                .map_err(|e| anyhow::anyhow!(e.input().to_string()))?
                .to_string()),
            _ => anyhow::bail!("no domain or ip found in arguments"),
        }
    }

    fn parse_arg_helo(args: &[&str]) -> Result<Self, SmtpReplyCode> {
        match Self::parse_domain_or_address_literal(args) {
            Ok(out) => Ok(Self::HeloCmd(out)),
            Err(_) => Err(SmtpReplyCode::Code501),
        }
    }

    fn parse_arg_ehlo(args: &[&str]) -> Result<Self, SmtpReplyCode> {
        match Self::parse_domain_or_address_literal(args) {
            Ok(out) => Ok(Self::EhloCmd(out)),
            Err(_) => Err(SmtpReplyCode::Code501),
        }
    }

    fn from_path(input: &str, may_be_empty: bool) -> Result<String, SmtpReplyCode> {
        if input.starts_with('<') && input.ends_with('>') {
            match &input[1..input.len() - 1] {
                "" if may_be_empty => Ok(String::new()),
                mailbox => match addr::parse_email_address(mailbox) {
                    Ok(mailbox) => Ok(mailbox.to_string()),
                    Err(_) => Err(SmtpReplyCode::Code501),
                },
            }
        } else {
            Err(SmtpReplyCode::Code501)
        }
    }

    fn parse_arg_mail_from(args: &[&str]) -> Result<Self, SmtpReplyCode> {
        match args {
            [from, ..] if from.to_ascii_uppercase().starts_with("FROM:") => {
                // esmtp parameters (BODY=, SIZE=, ...) are tolerated and ignored
                let path = Self::from_path(&from["FROM:".len()..], true)?;
                Ok(Self::MailCmd(if path.is_empty() { None } else { Some(path) }))
            }
            _ => Err(SmtpReplyCode::Code501),
        }
    }

    fn parse_arg_rcpt_to(args: &[&str]) -> Result<Self, SmtpReplyCode> {
        match args {
            [to] if to.to_ascii_uppercase().starts_with("TO:") => {
                Self::from_path(&to["TO:".len()..], false).map(Self::RcptCmd)
            }
            _ => Err(SmtpReplyCode::Code501),
        }
    }
}
