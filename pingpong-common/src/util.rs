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

/// Determine the domain of an address, or a fallback.
///
/// An address with zero or two-and-more `@` signs does not have an
/// unambiguous domain, the fallback is returned instead.
#[must_use]
pub fn domain_or_fallback<'a>(address: &'a str, fallback: &'a str) -> &'a str {
    match address.split_once('@') {
        Some((_, domain)) if !domain.contains('@') => domain,
        _ => fallback,
    }
}

/// Extract the bare addr-spec out of an RFC 5322 `From:` header value,
/// e.g. "Barry Gibbs <bg@example.com>" yields "bg@example.com".
///
/// # Errors
///
/// * the header is absent or empty
/// * the header is not a single valid name-addr
pub fn from_header_address(from_header: Option<&str>) -> Result<String, Refusal> {
    let from_header = match from_header {
        Some(value) if !value.trim().is_empty() => value,
        _ => return Err(Refusal::FromHeaderMissing),
    };

    let parsed = mailparse::addrparse(from_header).map_err(|_| Refusal::FromHeaderInvalid)?;

    match parsed.extract_single_info() {
        Some(info) => Ok(info.addr),
        None => Err(Refusal::FromHeaderInvalid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn domain_with_single_at() {
        assert_eq!(
            domain_or_fallback("user@mail.example.com", "fallback.test"),
            "mail.example.com"
        );
    }

    #[test]
    fn domain_without_at() {
        assert_eq!(domain_or_fallback("user", "fallback.test"), "fallback.test");
        assert_eq!(domain_or_fallback("", "fallback.test"), "fallback.test");
        assert_eq!(domain_or_fallback("", ""), "");
    }

    #[test]
    fn domain_with_multiple_at() {
        assert_eq!(
            domain_or_fallback("a@b@example.com", "fallback.test"),
            "fallback.test"
        );
        assert_eq!(domain_or_fallback("a@@c", "fallback.test"), "fallback.test");
    }

    #[test]
    fn from_name_addr() {
        assert_eq!(
            from_header_address(Some("Barry Gibbs <bg@example.com>")).unwrap(),
            "bg@example.com"
        );
        assert_eq!(
            from_header_address(Some("bg@example.com")).unwrap(),
            "bg@example.com"
        );
    }

    #[test]
    fn from_missing() {
        assert_eq!(from_header_address(None), Err(Refusal::FromHeaderMissing));
        assert_eq!(
            from_header_address(Some("")),
            Err(Refusal::FromHeaderMissing)
        );
        assert_eq!(
            from_header_address(Some("   ")),
            Err(Refusal::FromHeaderMissing)
        );
    }

    #[test]
    fn from_invalid() {
        assert_eq!(
            from_header_address(Some("Undisclosed recipients:;")),
            Err(Refusal::FromHeaderInvalid)
        );
        assert_eq!(
            from_header_address(Some("a@b, c@d")),
            Err(Refusal::FromHeaderInvalid)
        );
    }
}
