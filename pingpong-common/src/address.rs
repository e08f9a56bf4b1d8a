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

/// A syntactically valid mailbox, as carried in MAIL FROM / RCPT TO paths
/// and used as the target of a reply.
///
/// Only the accepted string is stored; the parts around the `@` separator
/// are derived on demand.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Address(String);

impl Address {
    /// the whole mailbox, e.g. `pong@example.org`.
    #[must_use]
    pub fn full(&self) -> &str {
        &self.0
    }

    /// everything left of the separator.
    #[must_use]
    pub fn local_part(&self) -> &str {
        self.split().0
    }

    /// everything right of the separator.
    #[must_use]
    pub fn domain(&self) -> &str {
        self.split().1
    }

    // construction rejected separator-less input, so the fallback arm is
    // never taken
    fn split(&self) -> (&str, &str) {
        self.0.split_once('@').unwrap_or((&self.0, ""))
    }
}

impl TryFrom<String> for Address {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match addr::parse_email_address(&value) {
            Ok(_) => Ok(Self(value)),
            Err(error) => anyhow::bail!("not a usable mailbox '{}': {}", value, error),
        }
    }
}

impl std::str::FromStr for Address {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_string())
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn accepts_a_plain_mailbox() {
        let address = "pong@example.org".parse::<Address>().unwrap();
        assert_eq!(address.full(), "pong@example.org");
        assert_eq!(address.to_string(), "pong@example.org");
    }

    #[test]
    fn splits_into_local_part_and_domain() {
        let address = "barry.gibbs@mail.example.co.uk".parse::<Address>().unwrap();
        assert_eq!(address.local_part(), "barry.gibbs");
        assert_eq!(address.domain(), "mail.example.co.uk");
    }

    #[test]
    fn rejects_junk() {
        for junk in ["", "no separator", "@example.org", "pong@"] {
            assert!(junk.parse::<Address>().is_err(), "{junk:?} must be refused");
        }
    }

    #[test]
    fn serde_uses_the_string_form() {
        let address = serde_json::from_str::<Address>(r#""pong@example.org""#).unwrap();
        assert_eq!(address, "pong@example.org".parse::<Address>().unwrap());

        assert_eq!(
            serde_json::to_string(&address).unwrap(),
            r#""pong@example.org""#
        );
        assert!(serde_json::from_str::<Address>(r#""junk""#).is_err());
    }
}
