//! Magnet URI parsing: split the query on `&`, then each pair on the first
//! `=`, percent/`+`-decode values, last `dn` wins, `tr`/`ws`/`xs`/`as`
//! accumulate.
use crate::wire::InfoHash;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum MagnetError {
    #[error("magnet URI is empty")]
    EmptyUri,

    #[error("magnet URI does not start with \"magnet:?\"")]
    InvalidScheme,

    #[error("magnet URI is missing the required xt=urn:btih: parameter")]
    MissingInfoHash,

    #[error("magnet URI's info hash is malformed: {0}")]
    InvalidInfoHash(String),

    #[error("invalid parameter {key}={value}")]
    InvalidParameter { key: String, value: String },
}

/// A parsed magnet URI. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetInfo {
    pub info_hash: InfoHash,
    pub display_name: Option<String>,
    pub trackers: Vec<String>,
    pub exact_length: Option<u64>,
    pub web_seeds: Vec<String>,
    pub source_urls: Vec<String>,
    pub keywords: Vec<String>,
}

impl MagnetInfo {
    /// Parses a `magnet:?...` URI. The scheme check is case-insensitive;
    /// everything else (keys, `urn:btih:` prefix) is matched
    /// case-sensitively except the info hash itself, which accepts either
    /// case of hex.
    pub fn parse(uri: &str) -> Result<Self, MagnetError> {
        if uri.is_empty() {
            return Err(MagnetError::EmptyUri);
        }
        let lower_prefix_len = "magnet:?".len();
        if uri.len() < lower_prefix_len || !uri[..lower_prefix_len].eq_ignore_ascii_case("magnet:?") {
            return Err(MagnetError::InvalidScheme);
        }
        let query = &uri[lower_prefix_len..];

        let mut info_hash: Option<InfoHash> = None;
        let mut display_name: Option<String> = None;
        let mut trackers = Vec::new();
        let mut exact_length: Option<u64> = None;
        let mut web_seeds = Vec::new();
        let mut source_urls = Vec::new();
        let mut keywords = Vec::new();

        for pair in query.split('&').filter(|s| !s.is_empty()) {
            let (key, raw_value) = match pair.split_once('=') {
                Some((k, v)) => (k, v),
                None => continue,
            };
            let value = url_decode(raw_value);

            match key {
                "xt" => {
                    if let Some(rest) = value
                        .strip_prefix("urn:btih:")
                        .or_else(|| value.strip_prefix("urn:BTIH:"))
                    {
                        info_hash = Some(
                            InfoHash::parse(rest)
                                .map_err(|e| MagnetError::InvalidInfoHash(e.to_string()))?,
                        );
                    }
                }
                "dn" => display_name = Some(value),
                "tr" => trackers.push(value),
                "xl" => {
                    exact_length = Some(value.parse::<u64>().map_err(|_| {
                        MagnetError::InvalidParameter {
                            key: key.to_string(),
                            value: value.clone(),
                        }
                    })?)
                }
                "ws" => web_seeds.push(value),
                "xs" | "as" => source_urls.push(value),
                "kt" => keywords.extend(value.split(' ').filter(|s| !s.is_empty()).map(String::from)),
                _ => {} // unknown keys are ignored
            }
        }

        let info_hash = info_hash.ok_or(MagnetError::MissingInfoHash)?;

        Ok(MagnetInfo {
            info_hash,
            display_name,
            trackers,
            exact_length,
            web_seeds,
            source_urls,
            keywords,
        })
    }
}

/// URL-decodes `%XX` escapes and `+` as space.
fn url_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 3 <= bytes.len() => {
                let decoded = std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                match decoded {
                    Some(value) => {
                        out.push(value);
                        i += 3;
                    }
                    None => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash40() -> String {
        "a".repeat(40)
    }

    #[test]
    fn parses_minimal_magnet() {
        let uri = format!("magnet:?xt=urn:btih:{}", hash40());
        let m = MagnetInfo::parse(&uri).unwrap();
        assert_eq!(m.info_hash, InfoHash::from_hex(&hash40()).unwrap());
        assert!(m.trackers.is_empty());
    }

    #[test]
    fn is_case_insensitive_on_scheme() {
        let uri = format!("MAGNET:?xt=urn:btih:{}", hash40());
        assert!(MagnetInfo::parse(&uri).is_ok());
    }

    #[test]
    fn accumulates_multiple_trackers() {
        let uri = format!(
            "magnet:?xt=urn:btih:{}&tr=http%3A%2F%2Fa.example%2Fannounce&tr=http%3A%2F%2Fb.example%2Fannounce",
            hash40()
        );
        let m = MagnetInfo::parse(&uri).unwrap();
        assert_eq!(
            m.trackers,
            vec!["http://a.example/announce", "http://b.example/announce"]
        );
    }

    #[test]
    fn last_display_name_wins() {
        let uri = format!("magnet:?xt=urn:btih:{}&dn=first&dn=second", hash40());
        let m = MagnetInfo::parse(&uri).unwrap();
        assert_eq!(m.display_name.as_deref(), Some("second"));
    }

    #[test]
    fn parses_exact_length() {
        let uri = format!("magnet:?xt=urn:btih:{}&xl=1048576", hash40());
        let m = MagnetInfo::parse(&uri).unwrap();
        assert_eq!(m.exact_length, Some(1048576));
    }

    #[test]
    fn parses_keywords_as_space_separated() {
        let uri = format!("magnet:?xt=urn:btih:{}&kt=linux+iso+distro", hash40());
        let m = MagnetInfo::parse(&uri).unwrap();
        assert_eq!(m.keywords, vec!["linux", "iso", "distro"]);
    }

    #[test]
    fn missing_xt_is_an_error() {
        assert_eq!(
            MagnetInfo::parse("magnet:?dn=foo"),
            Err(MagnetError::MissingInfoHash)
        );
    }

    #[test]
    fn empty_uri_is_an_error() {
        assert_eq!(MagnetInfo::parse(""), Err(MagnetError::EmptyUri));
    }

    #[test]
    fn wrong_scheme_is_an_error() {
        assert_eq!(
            MagnetInfo::parse("http://example.com"),
            Err(MagnetError::InvalidScheme)
        );
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let uri = format!("magnet:?xt=urn:btih:{}&foo=bar", hash40());
        assert!(MagnetInfo::parse(&uri).is_ok());
    }
}
