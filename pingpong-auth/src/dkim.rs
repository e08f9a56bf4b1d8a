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
use crate::dns::{Dns, DnsError};
use pingpong_common::refusal::Refusal;
use pingpong_config::log_channel::AUTH;

/// Verify every `DKIM-Signature` of `data` (RFC 6376) and return the `d=`
/// domains whose signature verified.
///
/// A message without signatures yields an empty set, a signature that fails
/// to verify is simply not part of the set.
///
/// # Errors
///
/// * [`Refusal::DkimCantValidate`] when the message cannot be fed to the
///   verifier at all (not valid UTF-8)
pub async fn verify(dns: &dyn Dns, data: &[u8]) -> Result<Vec<String>, Refusal> {
    let message = std::str::from_utf8(data).map_err(|_| Refusal::DkimCantValidate)?;

    let (header_block, body) = split_message(message);
    let headers = parse_headers(header_block);

    let mut passing = vec![];
    for (name, raw) in &headers {
        if name != "dkim-signature" {
            continue;
        }

        match verify_signature(dns, raw, &headers, body).await {
            Ok(domain) => passing.push(domain),
            Err(reason) => {
                log::debug!(target: AUTH, "dkim signature rejected: {}", reason);
            }
        }
    }

    Ok(passing)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Algorithm {
    RsaSha1,
    RsaSha256,
    Ed25519Sha256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Canon {
    Simple,
    Relaxed,
}

struct Signature {
    algorithm: Algorithm,
    signature: Vec<u8>,
    body_hash: Vec<u8>,
    canon_header: Canon,
    canon_body: Canon,
    domain: String,
    selector: String,
    signed_headers: Vec<String>,
    body_length: Option<usize>,
    expiration: Option<u64>,
}

async fn verify_signature(
    dns: &dyn Dns,
    raw_sig_header: &str,
    headers: &[(String, String)],
    body: &str,
) -> Result<String, String> {
    let sig = parse_signature(raw_sig_header)?;

    if let Some(expiration) = sig.expiration {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        if expiration < now {
            return Err("signature expired".to_string());
        }
    }

    let key = lookup_key(dns, &sig.selector, &sig.domain).await?;

    // body hash
    let mut canon_body = canonicalize_body(body, sig.canon_body);
    if let Some(length) = sig.body_length {
        if length > canon_body.len() {
            return Err("l= exceeds body length".to_string());
        }
        canon_body.truncate(length);
    }
    if body_hash(&canon_body, sig.algorithm) != sig.body_hash {
        return Err("body hash mismatch".to_string());
    }

    // header hash
    let signed = header_hash_input(headers, raw_sig_header, &sig);
    verify_crypto(&key, sig.algorithm, signed.as_bytes(), &sig.signature)?;

    Ok(sig.domain)
}

fn split_message(message: &str) -> (&str, &str) {
    message.find("\r\n\r\n").map_or_else(
        || {
            message
                .find("\n\n")
                .map_or((message, ""), |pos| {
                    (&message[..pos + 1], &message[pos + 2..])
                })
        },
        |pos| (&message[..pos + 2], &message[pos + 4..]),
    )
}

// (lowercased name, raw header including folds) in message order
fn parse_headers(header_block: &str) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = vec![];
    let mut current: Option<String> = None;

    let mut flush = |current: &mut Option<String>, headers: &mut Vec<(String, String)>| {
        if let Some(raw) = current.take() {
            let name = raw
                .split_once(':')
                .map_or("", |(name, _)| name)
                .trim()
                .to_lowercase();
            headers.push((name, raw));
        }
    };

    for line in header_block.split("\r\n") {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(raw) = &mut current {
                raw.push_str("\r\n");
                raw.push_str(line);
            }
        } else {
            flush(&mut current, &mut headers);
            if !line.is_empty() {
                current = Some(line.to_string());
            }
        }
    }
    flush(&mut current, &mut headers);

    headers
}

fn unfold(value: &str) -> String {
    value.replace("\r\n", "").replace('\n', "")
}

fn parse_signature(raw: &str) -> Result<Signature, String> {
    let value = raw
        .split_once(':')
        .map(|(_, value)| value)
        .ok_or("malformed header")?;
    let value = unfold(value);

    let mut algorithm = None;
    let mut signature = None;
    let mut body_hash = None;
    let mut canon = (Canon::Simple, Canon::Simple);
    let mut domain = None;
    let mut selector = None;
    let mut signed_headers = None;
    let mut body_length = None;
    let mut expiration = None;
    let mut version = None;

    for tag in value.split(';') {
        let (name, tag_value) = match tag.split_once('=') {
            Some((name, tag_value)) => (name.trim(), tag_value.trim()),
            None => continue,
        };

        match name {
            "v" => version = Some(tag_value.to_string()),
            "a" => {
                algorithm = Some(match tag_value.to_lowercase().as_str() {
                    "rsa-sha1" => Algorithm::RsaSha1,
                    "rsa-sha256" => Algorithm::RsaSha256,
                    "ed25519-sha256" => Algorithm::Ed25519Sha256,
                    other => return Err(format!("unsupported a={other}")),
                });
            }
            "b" => signature = Some(decode_base64(tag_value)?),
            "bh" => body_hash = Some(decode_base64(tag_value)?),
            "c" => canon = parse_canon(tag_value)?,
            "d" => domain = Some(tag_value.to_lowercase()),
            "s" => selector = Some(tag_value.to_string()),
            "h" => {
                signed_headers = Some(
                    tag_value
                        .split(':')
                        .map(|h| h.trim().to_lowercase())
                        .collect::<Vec<_>>(),
                );
            }
            "l" => {
                body_length =
                    Some(tag_value.parse::<usize>().map_err(|_| "bad l= value")?);
            }
            "x" => {
                expiration =
                    Some(tag_value.parse::<u64>().map_err(|_| "bad x= value")?);
            }
            // i=, t=, q=, z= and unknown tags are not needed for the verdict
            _ => {}
        }
    }

    if version.as_deref() != Some("1") {
        return Err("missing or unsupported v=".to_string());
    }

    let signed_headers: Vec<String> = signed_headers.ok_or("missing h=")?;
    if !signed_headers.iter().any(|h| h == "from") {
        return Err("h= does not cover From".to_string());
    }

    let domain: String = domain.ok_or("missing d=")?;
    if domain.is_empty() {
        return Err("empty d=".to_string());
    }

    Ok(Signature {
        algorithm: algorithm.ok_or("missing a=")?,
        signature: signature.ok_or("missing b=")?,
        body_hash: body_hash.ok_or("missing bh=")?,
        canon_header: canon.0,
        canon_body: canon.1,
        domain,
        selector: selector.ok_or("missing s=")?,
        signed_headers,
        body_length,
        expiration,
    })
}

fn decode_base64(value: &str) -> Result<Vec<u8>, String> {
    let clean: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    base64::decode(clean).map_err(|e| format!("bad base64: {e}"))
}

fn parse_canon(value: &str) -> Result<(Canon, Canon), String> {
    let (header, body) = value.split_once('/').unwrap_or((value, "simple"));
    let parse = |v: &str| match v {
        "simple" => Ok(Canon::Simple),
        "relaxed" => Ok(Canon::Relaxed),
        other => Err(format!("unknown canonicalization {other}")),
    };
    Ok((parse(header)?, parse(body)?))
}

// RFC 6376 section 3.4.3 / 3.4.4
fn canonicalize_body(body: &str, canon: Canon) -> Vec<u8> {
    let mut out = match canon {
        Canon::Simple => body.to_string(),
        Canon::Relaxed => body
            .split("\r\n")
            .map(|line| {
                let mut collapsed = String::with_capacity(line.len());
                let mut in_wsp = false;
                for c in line.chars() {
                    if c == ' ' || c == '\t' {
                        in_wsp = true;
                    } else {
                        if in_wsp && !collapsed.is_empty() {
                            collapsed.push(' ');
                        }
                        in_wsp = false;
                        collapsed.push(c);
                    }
                }
                collapsed
            })
            .collect::<Vec<_>>()
            .join("\r\n"),
    };

    while out.ends_with("\r\n") {
        out.truncate(out.len() - 2);
    }
    match canon {
        Canon::Simple if out.is_empty() => "\r\n".to_string().into_bytes(),
        Canon::Relaxed if out.is_empty() => vec![],
        _ => {
            out.push_str("\r\n");
            out.into_bytes()
        }
    }
}

// RFC 6376 section 3.4.1 / 3.4.2
fn canonicalize_header(raw: &str, canon: Canon) -> String {
    match canon {
        Canon::Simple => raw.to_string(),
        Canon::Relaxed => {
            let (name, value) = raw.split_once(':').unwrap_or((raw, ""));
            let value = unfold(value);

            let mut collapsed = String::with_capacity(value.len());
            let mut in_wsp = false;
            for c in value.chars() {
                if c == ' ' || c == '\t' {
                    in_wsp = true;
                } else {
                    if in_wsp && !collapsed.is_empty() {
                        collapsed.push(' ');
                    }
                    in_wsp = false;
                    collapsed.push(c);
                }
            }

            format!("{}:{}", name.trim().to_lowercase(), collapsed)
        }
    }
}

// The signed octets: every h= header (last instance first, consumed once),
// then the DKIM-Signature itself with the b= value deleted, unterminated.
fn header_hash_input(
    headers: &[(String, String)],
    raw_sig_header: &str,
    sig: &Signature,
) -> String {
    let mut consumed = vec![false; headers.len()];
    let mut input = String::new();

    for wanted in &sig.signed_headers {
        let found = headers
            .iter()
            .enumerate()
            .rev()
            .find(|(i, (name, _))| !consumed[*i] && name == wanted);
        if let Some((i, (_, raw))) = found {
            consumed[i] = true;
            input.push_str(&canonicalize_header(raw, sig.canon_header));
            input.push_str("\r\n");
        }
    }

    input.push_str(&canonicalize_header(
        &delete_b_value(raw_sig_header),
        sig.canon_header,
    ));
    input
}

// Remove the value of the b= tag, leaving "b=" and everything else untouched.
fn delete_b_value(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = String::with_capacity(raw.len());
    let mut i = 0;
    let mut last_meaningful = b':';

    while i < bytes.len() {
        let c = bytes[i];
        if (c == b'b' || c == b'B')
            && (last_meaningful == b';' || last_meaningful == b':')
            && bytes.get(i + 1) == Some(&b'=')
        {
            out.push_str("b=");
            i += 2;
            while i < bytes.len() && bytes[i] != b';' {
                i += 1;
            }
            last_meaningful = b'=';
            continue;
        }

        if !matches!(c, b' ' | b'\t' | b'\r' | b'\n') {
            last_meaningful = c;
        }
        out.push(c as char);
        i += 1;
    }

    out
}

fn body_hash(canon_body: &[u8], algorithm: Algorithm) -> Vec<u8> {
    let digest = match algorithm {
        Algorithm::RsaSha1 => {
            ring::digest::digest(&ring::digest::SHA1_FOR_LEGACY_USE_ONLY, canon_body)
        }
        Algorithm::RsaSha256 | Algorithm::Ed25519Sha256 => {
            ring::digest::digest(&ring::digest::SHA256, canon_body)
        }
    };
    digest.as_ref().to_vec()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyType {
    Rsa,
    Ed25519,
}

struct PublicKey {
    key_type: KeyType,
    material: Vec<u8>,
}

async fn lookup_key(dns: &dyn Dns, selector: &str, domain: &str) -> Result<PublicKey, String> {
    let name = format!("{selector}._domainkey.{domain}");
    let records = match dns.txt(&name).await {
        Ok(records) => records,
        Err(DnsError::NotFound) => return Err(format!("no key at {name}")),
        Err(DnsError::Other(e)) => return Err(format!("key lookup failed: {e}")),
    };

    parse_key(&records.join(""))
}

fn parse_key(txt: &str) -> Result<PublicKey, String> {
    let mut key_type = KeyType::Rsa;
    let mut material = None;

    for tag in txt.split(';') {
        let (name, value) = match tag.split_once('=') {
            Some((name, value)) => (name.trim(), value.trim()),
            None => continue,
        };

        match name {
            "v" if value != "DKIM1" => return Err(format!("bad key version {value}")),
            "k" => {
                key_type = match value.to_lowercase().as_str() {
                    "rsa" => KeyType::Rsa,
                    "ed25519" => KeyType::Ed25519,
                    other => return Err(format!("unknown key type {other}")),
                };
            }
            "p" => {
                if value.is_empty() {
                    return Err("key revoked".to_string());
                }
                material = Some(decode_base64(value)?);
            }
            _ => {}
        }
    }

    Ok(PublicKey {
        key_type,
        material: material.ok_or("missing p=")?,
    })
}

fn verify_crypto(
    key: &PublicKey,
    algorithm: Algorithm,
    message: &[u8],
    signature: &[u8],
) -> Result<(), String> {
    use ring::signature::UnparsedPublicKey;

    match (key.key_type, algorithm) {
        (KeyType::Rsa, Algorithm::RsaSha256) => {
            let material = unwrap_spki(&key.material);
            UnparsedPublicKey::new(&ring::signature::RSA_PKCS1_2048_8192_SHA256, &material)
                .verify(message, signature)
                .or_else(|_| {
                    UnparsedPublicKey::new(
                        &ring::signature::RSA_PKCS1_1024_8192_SHA256_FOR_LEGACY_USE_ONLY,
                        &material,
                    )
                    .verify(message, signature)
                })
                .map_err(|_| "signature mismatch".to_string())
        }
        (KeyType::Rsa, Algorithm::RsaSha1) => {
            let material = unwrap_spki(&key.material);
            UnparsedPublicKey::new(
                &ring::signature::RSA_PKCS1_1024_8192_SHA1_FOR_LEGACY_USE_ONLY,
                &material,
            )
            .verify(message, signature)
            .map_err(|_| "signature mismatch".to_string())
        }
        (KeyType::Ed25519, Algorithm::Ed25519Sha256) => {
            if key.material.len() != 32 {
                return Err("bad ed25519 key length".to_string());
            }
            // ed25519-sha256 signs the sha256 digest of the signed octets
            let digest = ring::digest::digest(&ring::digest::SHA256, message);
            UnparsedPublicKey::new(&ring::signature::ED25519, &key.material)
                .verify(digest.as_ref(), signature)
                .map_err(|_| "signature mismatch".to_string())
        }
        (key_type, algorithm) => Err(format!(
            "key type {key_type:?} does not fit algorithm {algorithm:?}"
        )),
    }
}

// DNS keys are usually SubjectPublicKeyInfo, ring wants the bare RSAPublicKey
fn unwrap_spki(material: &[u8]) -> Vec<u8> {
    use x509_parser::prelude::FromDer;

    x509_parser::x509::SubjectPublicKeyInfo::from_der(material).map_or_else(
        |_| material.to_vec(),
        |(_, spki)| spki.subject_public_key.data.to_vec(),
    )
}
