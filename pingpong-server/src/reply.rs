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
use pingpong_config::Config;

/// A reply, ready to hand to the delivery engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// envelope MAIL FROM.
    pub mail_from: String,
    /// envelope RCPT TO: the verified originator.
    pub rcpt_to: String,
    /// the full RFC 5322 payload.
    pub message: String,
}

/// Build the subject for the response to `original`.
#[must_use]
pub fn build_reply_subject(config: &Config, original: &str) -> String {
    config.reply_subject.replace("{ORIG_SUBJ}", original)
}

/// Build the body for the response to a message with body `original`.
///
/// `{TIME}` is substituted before `{ORIG_BODY}` so a placeholder literal
/// inside the quoted body is never re-expanded.
#[must_use]
pub fn build_reply_body(config: &Config, original: &str) -> String {
    let now = time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default();

    config
        .reply_message
        .replace("{TIME}", &now)
        .replace("{ORIG_BODY}", original)
}

/// Assemble the full reply to an accepted message.
///
/// The recipient is the *verified From-header address* of the original, the
/// envelope sender is the configured reply address or the inbox the original
/// was sent to.
#[must_use]
pub fn build_reply(
    config: &Config,
    incoming_rcpt: &str,
    outgoing_rcpt: &str,
    orig_subject: &str,
    orig_body: &str,
) -> Reply {
    let reply_from = if config.reply_address.is_empty() {
        incoming_rcpt
    } else {
        &config.reply_address
    };

    let subject = build_reply_subject(config, orig_subject);
    let body = build_reply_body(config, orig_body);

    let message_id = format!("<{}@{}>", uuid::Uuid::new_v4(), config.server_name);
    let date = time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc2822)
        .unwrap_or_default();

    let mut message = String::new();
    message.push_str(&format!("From: <{reply_from}>\r\n"));
    message.push_str(&format!("To: <{outgoing_rcpt}>\r\n"));
    message.push_str(&format!("Subject: {subject}\r\n"));
    message.push_str(&format!("Message-ID: {message_id}\r\n"));
    message.push_str(&format!("Date: {date}\r\n"));
    message.push_str("MIME-Version: 1.0\r\n");
    message.push_str("Content-Type: text/plain; charset=utf-8\r\n");
    message.push_str("\r\n");
    for line in body.split('\n') {
        message.push_str(line.trim_end_matches('\r'));
        message.push_str("\r\n");
    }

    Reply {
        mail_from: reply_from.to_string(),
        rcpt_to: outgoing_rcpt.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config(yaml: &str) -> Config {
        Config::from_yaml(yaml).unwrap()
    }

    #[test]
    fn subject_substitution_is_literal_and_single_pass() {
        let config = config("reply_subject: \"Re: {ORIG_SUBJ}\"");

        assert_eq!(build_reply_subject(&config, "hello"), "Re: hello");
        assert_eq!(build_reply_subject(&config, ""), "Re: ");
        // a placeholder inside the original subject survives untouched
        assert_eq!(
            build_reply_subject(&config, "about {ORIG_SUBJ}"),
            "Re: about {ORIG_SUBJ}"
        );
    }

    #[test]
    fn body_placeholders_are_not_reexpanded() {
        let config = config("reply_message: \"at {TIME}:\\n{ORIG_BODY}\"");

        let body = build_reply_body(&config, "literal {TIME} stays\n");
        assert!(body.starts_with("at 2"), "{body:?}");
        assert!(body.ends_with("literal {TIME} stays\n"), "{body:?}");
    }

    #[test]
    fn reply_goes_to_the_verified_from_address() {
        let config = config("{}");
        let reply = build_reply(
            &config,
            "pong@example.org",
            "bg@example.com",
            "hi",
            "body\n",
        );

        assert_eq!(reply.rcpt_to, "bg@example.com");
        // no reply_address configured: the envelope sender is the inbox the
        // original was addressed to
        assert_eq!(reply.mail_from, "pong@example.org");
        assert!(reply.message.contains("To: <bg@example.com>\r\n"));
        assert!(reply.message.contains("From: <pong@example.org>\r\n"));
    }

    #[test]
    fn configured_reply_address_wins() {
        let config = config("reply_address: \"noreply@example.org\"");
        let reply = build_reply(&config, "pong@example.org", "bg@example.com", "hi", "");

        assert_eq!(reply.mail_from, "noreply@example.org");
    }

    #[test]
    fn message_id_carries_the_server_name() {
        let config = config("server_name: \"pong.example.org\"");
        let reply = build_reply(&config, "a@b.c", "d@e.f", "hi", "");

        let id_line = reply
            .message
            .split("\r\n")
            .find(|line| line.starts_with("Message-ID: "))
            .unwrap();
        assert!(id_line.ends_with("@pong.example.org>"), "{id_line}");
        assert!(id_line.contains('<'));
    }

    #[test]
    fn body_lines_are_crlf_terminated() {
        let config = config("reply_message: \"{ORIG_BODY}\"");
        let reply = build_reply(&config, "a@b.c", "d@e.f", "s", "one\ntwo");

        assert!(reply.message.ends_with("\r\none\r\ntwo\r\n"));
    }
}
