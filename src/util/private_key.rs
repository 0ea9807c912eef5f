//! PEM private keys for TLS client identities.
//!
//! `native_tls::Identity::from_pkcs8` only takes `BEGIN PRIVATE KEY`.
//! PKCS#1 (`BEGIN RSA PRIVATE KEY`) and SEC1 (`BEGIN EC PRIVATE KEY`) keys
//! are rewrapped into a PKCS#8 `PrivateKeyInfo` here.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rustls_pemfile::Item;
use thiserror::Error;

/// `AlgorithmIdentifier { rsaEncryption, NULL }`.
const RSA_ALGORITHM: &[u8] = &[
    0x30, 0x0d, 0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01, 0x05, 0x00,
];

/// OID `id-ecPublicKey`.
const EC_PUBLIC_KEY: &[u8] = &[0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01];

/// `INTEGER 0`, the PKCS#8 version.
const VERSION_0: &[u8] = &[0x02, 0x01, 0x00];

const SEQUENCE: u8 = 0x30;
const OCTET_STRING: u8 = 0x04;
const OBJECT_IDENTIFIER: u8 = 0x06;
/// `[0]` parameters field of an `ECPrivateKey`.
const EC_PARAMETERS: u8 = 0xa0;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("malformed PEM: {0}")]
    Pem(#[source] std::io::Error),

    #[error("no PKCS#8, PKCS#1 or SEC1 private key found")]
    NoKey,

    #[error("EC private key does not name its curve")]
    MissingCurve,
}

/// Re-encodes the first private key in `pem` as a PKCS#8 PEM block.
///
/// ```
/// use memcached_exporter::util::{KeyError, pkcs8_pem};
///
/// assert!(matches!(pkcs8_pem(b"no keys here"), Err(KeyError::NoKey)));
/// ```
pub fn pkcs8_pem(pem: &[u8]) -> Result<String, KeyError> {
    let mut reader = pem;
    while let Some(item) = rustls_pemfile::read_one(&mut reader).map_err(KeyError::Pem)? {
        let der = match item {
            Item::Pkcs8Key(key) => key.secret_pkcs8_der().to_vec(),
            Item::Pkcs1Key(key) => private_key_info(RSA_ALGORITHM, key.secret_pkcs1_der()),
            Item::Sec1Key(key) => {
                let sec1 = key.secret_sec1_der();
                let curve = sec1_curve(sec1).ok_or(KeyError::MissingCurve)?;
                let algorithm = tlv(SEQUENCE, &[EC_PUBLIC_KEY, curve].concat());
                private_key_info(&algorithm, sec1)
            }
            _ => continue,
        };
        return Ok(encode_pem("PRIVATE KEY", &der));
    }
    Err(KeyError::NoKey)
}

fn private_key_info(algorithm: &[u8], key: &[u8]) -> Vec<u8> {
    let body = [VERSION_0, algorithm, tlv(OCTET_STRING, key).as_slice()].concat();
    tlv(SEQUENCE, &body)
}

/// Named-curve OID (tag included) from an `ECPrivateKey`.
fn sec1_curve(der: &[u8]) -> Option<&[u8]> {
    let (tag, mut fields, _) = read_tlv(der)?;
    if tag != SEQUENCE {
        return None;
    }
    while !fields.is_empty() {
        let (tag, content, rest) = read_tlv(fields)?;
        if tag == EC_PARAMETERS {
            let (inner, _, after) = read_tlv(content)?;
            return (inner == OBJECT_IDENTIFIER).then(|| &content[..content.len() - after.len()]);
        }
        fields = rest;
    }
    None
}

/// Splits one DER element into `(tag, content, rest)`.
fn read_tlv(input: &[u8]) -> Option<(u8, &[u8], &[u8])> {
    let (&tag, rest) = input.split_first()?;
    let (&first, rest) = rest.split_first()?;
    let (len, rest) = if first < 0x80 {
        (first as usize, rest)
    } else {
        let n = (first & 0x7f) as usize;
        if n == 0 || n > 4 || rest.len() < n {
            return None;
        }
        let (bytes, rest) = rest.split_at(n);
        (bytes.iter().fold(0usize, |acc, &b| acc << 8 | b as usize), rest)
    };
    if rest.len() < len {
        return None;
    }
    let (content, rest) = rest.split_at(len);
    Some((tag, content, rest))
}

fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|&&b| b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
    out.extend_from_slice(content);
    out
}

fn encode_pem(label: &str, der: &[u8]) -> String {
    let body = STANDARD.encode(der);
    let mut out = format!("-----BEGIN {label}-----\n");
    for line in body.as_bytes().chunks(64) {
        out.push_str(&String::from_utf8_lossy(line));
        out.push('\n');
    }
    out.push_str(&format!("-----END {label}-----\n"));
    out
}
