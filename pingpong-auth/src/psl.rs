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
use publicsuffix::{List, Psl};

// Well-known multi-part public suffixes checked ahead of the list
const MULTI_PART_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "me.uk", "ac.uk", "gov.uk", "net.uk", "sch.uk",
    "co.jp", "or.jp", "ne.jp", "ac.jp", "go.jp",
    "com.au", "net.au", "org.au", "edu.au", "gov.au",
    "co.nz", "net.nz", "org.nz", "govt.nz",
    "com.br", "org.br", "net.br", "gov.br",
    "co.in", "net.in", "org.in", "gen.in", "ind.in",
];

/// Public suffix list wrapper answering "what is the organisational domain".
pub struct PublicSuffixList {
    list: List,
}

impl PublicSuffixList {
    /// Create a wrapper over the crate default list.
    #[must_use]
    pub fn new() -> Self {
        Self { list: List::new() }
    }

    /// The organisational domain (effective TLD plus one label), lowercased.
    ///
    /// A domain already at the organisational level is returned as-is.
    #[must_use]
    pub fn organizational_domain(&self, domain: &str) -> String {
        let domain = domain.trim_end_matches('.').to_lowercase();
        let labels: Vec<&str> = domain.split('.').collect();

        for suffix in MULTI_PART_SUFFIXES {
            if domain == *suffix || domain.ends_with(&format!(".{suffix}")) {
                let needed = suffix.split('.').count() + 1;
                if labels.len() >= needed {
                    return labels[labels.len() - needed..].join(".");
                }
                return domain;
            }
        }

        match self.list.domain(domain.as_bytes()) {
            Some(d) => String::from_utf8_lossy(d.as_bytes()).into_owned(),
            None => {
                if labels.len() <= 2 {
                    domain
                } else {
                    labels[labels.len() - 2..].join(".")
                }
            }
        }
    }
}

impl Default for PublicSuffixList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn organizational_domain() {
        let psl = PublicSuffixList::new();

        assert_eq!(psl.organizational_domain("example.com"), "example.com");
        assert_eq!(psl.organizational_domain("mail.example.com"), "example.com");
        assert_eq!(
            psl.organizational_domain("foo.bar.example.com"),
            "example.com"
        );
        assert_eq!(psl.organizational_domain("example.co.uk"), "example.co.uk");
        assert_eq!(
            psl.organizational_domain("mail.example.co.uk"),
            "example.co.uk"
        );
    }

    #[test]
    fn case_and_root_dot() {
        let psl = PublicSuffixList::new();

        assert_eq!(psl.organizational_domain("Mail.Example.COM"), "example.com");
        assert_eq!(psl.organizational_domain("example.com."), "example.com");
    }
}
