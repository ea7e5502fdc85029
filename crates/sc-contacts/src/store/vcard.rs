//! vCard file store
//!
//! Serves a `.vcf` export as an address book. The file is read lazily, one
//! card per record, in file order; sorting is not supported. Access is always
//! authorized since the file is already on disk.

use std::borrow::Cow;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{ContactStore, RecordStream};
use crate::error::{ContactsError, Result};
use crate::models::{
    AuthorizationStatus, FetchRequest, FetchScope, RawBirthday, RawContact, RawInstantMessage,
    RawLabeledValue, RawPostalAddress,
};

/// File-backed contact store
pub struct VcardStore {
    path: PathBuf,
}

impl VcardStore {
    /// Open a vCard file store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(ContactsError::Configuration(format!(
                "vCard file not found: {}",
                path.display()
            )));
        }

        info!("vCard store opened: {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ContactStore for VcardStore {
    fn name(&self) -> &str {
        "vcard"
    }

    fn authorization_status(&self) -> AuthorizationStatus {
        AuthorizationStatus::Authorized
    }

    async fn request_access(&self) -> Result<bool> {
        Ok(true)
    }

    fn probe_access(&self) -> Result<()> {
        File::open(&self.path)
            .map(|_| ())
            .map_err(|e| ContactsError::Enumeration(e.to_string()))
    }

    fn enumerate(&self, request: &FetchRequest) -> Result<RecordStream<'_>> {
        if request.scope == FetchScope::AuthorizedSubset {
            // A plain file has no notion of a shared subset
            debug!("vCard store has no limited subset, returning nothing");
            return Ok(Box::new(std::iter::empty()));
        }

        let file = File::open(&self.path).map_err(|e| {
            ContactsError::Enumeration(format!("Failed to open {}: {}", self.path.display(), e))
        })?;

        Ok(Box::new(VcardCursor::new(BufReader::new(file))))
    }
}

/// Walks a vCard stream card by card, unfolding continuation lines
///
/// Lines are decoded leniently: bytes that are not UTF-8 (old Latin-1
/// exports) become U+FFFD instead of failing the walk.
struct VcardCursor<R> {
    reader: R,
    buf: Vec<u8>,
    pending: Option<String>,
    line_no: usize,
    index: usize,
    done: bool,
}

impl<R: BufRead> VcardCursor<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            pending: None,
            line_no: 0,
            index: 0,
            done: false,
        }
    }

    /// Next physical line without its line ending
    fn read_raw_line(&mut self) -> Option<std::io::Result<String>> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => return None,
            Ok(_) => {}
            Err(e) => return Some(Err(e)),
        }
        self.line_no += 1;

        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
        }
        if self.buf.last() == Some(&b'\r') {
            self.buf.pop();
        }

        let line = match String::from_utf8_lossy(&self.buf) {
            Cow::Borrowed(line) => line.to_string(),
            Cow::Owned(line) => {
                warn!("vCard line {} is not valid UTF-8, replacing bad bytes", self.line_no);
                line
            }
        };
        Some(Ok(line))
    }

    /// Next logical (unfolded) line
    fn next_line(&mut self) -> Option<std::io::Result<String>> {
        let mut current = match self.pending.take() {
            Some(line) => line,
            None => match self.read_raw_line()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e)),
            },
        };

        loop {
            match self.read_raw_line() {
                Some(Ok(next)) if next.starts_with(' ') || next.starts_with('\t') => {
                    current.push_str(&next[1..]);
                }
                Some(Ok(next)) => {
                    self.pending = Some(next);
                    break;
                }
                Some(Err(e)) => return Some(Err(e)),
                None => break,
            }
        }

        Some(Ok(current))
    }
}

impl<R: BufRead> Iterator for VcardCursor<R> {
    type Item = Result<RawContact>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut card: Option<Vec<String>> = None;

        loop {
            let line = match self.next_line() {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(ContactsError::Enumeration(e.to_string())));
                }
                None => {
                    self.done = true;
                    // A truncated trailing card is still a card
                    return card.map(|lines| Ok(self.finish_card(&lines)));
                }
            };

            let upper = line.trim().to_ascii_uppercase();
            if upper == "BEGIN:VCARD" {
                card = Some(Vec::new());
            } else if upper == "END:VCARD" {
                if let Some(lines) = card.take() {
                    return Some(Ok(self.finish_card(&lines)));
                }
            } else if let Some(lines) = card.as_mut() {
                lines.push(line);
            }
        }
    }
}

impl<R> VcardCursor<R> {
    fn finish_card(&mut self, lines: &[String]) -> RawContact {
        let index = self.index;
        self.index += 1;

        let mut contact = parse_vcard(lines);
        if contact.identifier.trim().is_empty() {
            contact.identifier = format!("vcard-{}", index);
        }
        contact
    }
}

/// One parsed content line: `group.NAME;PARAM=x:value`
struct Property<'a> {
    name: String,
    params: Vec<&'a str>,
    value: &'a str,
}

fn parse_property(line: &str) -> Option<Property<'_>> {
    let colon_pos = line.find(':')?;
    let (head, value) = (&line[..colon_pos], &line[colon_pos + 1..]);

    let mut parts = head.split(';');
    let name = parts.next()?.trim();
    // Drop the Apple-style `item1.` group prefix
    let name = name.rsplit('.').next().unwrap_or(name).to_ascii_uppercase();

    Some(Property {
        name,
        params: parts.map(str::trim).collect(),
        value: value.trim(),
    })
}

fn parse_vcard(lines: &[String]) -> RawContact {
    let mut contact = RawContact::default();
    let mut formatted_name = String::new();

    for line in lines {
        let Some(prop) = parse_property(line) else {
            continue;
        };

        match prop.name.as_str() {
            "UID" => contact.identifier = unescape(prop.value),
            "FN" => formatted_name = unescape(prop.value),
            "N" => {
                let parts = split_structured(prop.value);
                let part = |i: usize| parts.get(i).cloned().unwrap_or_default();
                contact.family_name = part(0);
                contact.given_name = part(1);
                contact.middle_name = part(2);
                contact.name_prefix = part(3);
                contact.name_suffix = part(4);
            }
            "ORG" => {
                let parts = split_structured(prop.value);
                contact.organization_name = parts.first().cloned().unwrap_or_default();
                contact.department_name = parts.get(1).cloned().unwrap_or_default();
            }
            "TITLE" => contact.job_title = unescape(prop.value),
            "NOTE" => contact.note = unescape(prop.value),
            "TEL" => contact
                .phone_numbers
                .push(RawLabeledValue::new(type_label(&prop.params).as_deref(), unescape(prop.value))),
            "EMAIL" => contact
                .email_addresses
                .push(RawLabeledValue::new(type_label(&prop.params).as_deref(), unescape(prop.value))),
            "URL" => contact
                .url_addresses
                .push(RawLabeledValue::new(type_label(&prop.params).as_deref(), unescape(prop.value))),
            "ADR" => {
                let parts = split_structured(prop.value);
                let part = |i: usize| parts.get(i).cloned().unwrap_or_default();
                contact.postal_addresses.push(RawPostalAddress {
                    label: type_label(&prop.params),
                    street: part(2),
                    city: part(3),
                    state: part(4),
                    postal_code: part(5),
                    country: part(6),
                });
            }
            "IMPP" => contact.instant_messages.push(parse_impp(&prop)),
            "BDAY" => contact.birthday = Some(parse_birthday(prop.value)),
            "PHOTO" => {
                contact.image_data_available = true;
                let value = prop.value;
                if ["http://", "https://", "file:", "content:"]
                    .iter()
                    .any(|scheme| value.starts_with(scheme))
                {
                    contact.thumbnail_uri = Some(value.to_string());
                }
            }
            "X-STARRED" | "X-FAVORITE" => {
                contact.starred = matches!(prop.value.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
            }
            name => {
                if let Some(service) = im_service_from_extension(name) {
                    contact.instant_messages.push(RawInstantMessage {
                        service: service.to_string(),
                        username: unescape(prop.value),
                    });
                }
            }
        }
    }

    if contact.given_name.is_empty() && contact.family_name.is_empty() && !formatted_name.is_empty() {
        contact.given_name = formatted_name;
    }

    contact
}

/// Label from `TYPE=` (or bare vCard 2.1) parameters, ignoring flags
fn type_label(params: &[&str]) -> Option<String> {
    const FLAGS: [&str; 4] = ["pref", "voice", "internet", "x400"];

    params
        .iter()
        .flat_map(|p| {
            let value = match p.split_once('=') {
                Some((key, value)) if key.eq_ignore_ascii_case("type") => value,
                Some(_) => "",
                None => p,
            };
            value.split(',')
        })
        .map(|t| t.trim().trim_matches('"').to_ascii_lowercase())
        .find(|t| !t.is_empty() && !FLAGS.contains(&t.as_str()))
}

/// Split a structured value on unescaped `;`
fn split_structured(value: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push('\\');
                    current.push(next);
                }
            }
            ';' => parts.push(unescape(&std::mem::take(&mut current))),
            c => current.push(c),
        }
    }
    parts.push(unescape(&current));
    parts
}

fn unescape(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => result.push('\n'),
            Some(other) => result.push(other),
            None => {}
        }
    }

    result.trim().to_string()
}

fn parse_impp(prop: &Property<'_>) -> RawInstantMessage {
    let explicit = prop.params.iter().find_map(|p| {
        p.split_once('=')
            .filter(|(key, _)| key.eq_ignore_ascii_case("x-service-type"))
            .map(|(_, value)| value.to_string())
    });

    let (scheme, username) = match prop.value.split_once(':') {
        Some((scheme, rest)) => (scheme.to_string(), rest.to_string()),
        None => (String::new(), prop.value.to_string()),
    };

    RawInstantMessage {
        service: explicit.unwrap_or(scheme),
        username: unescape(&username),
    }
}

fn im_service_from_extension(name: &str) -> Option<&'static str> {
    match name {
        "X-AIM" => Some("AIM"),
        "X-ICQ" => Some("ICQ"),
        "X-JABBER" => Some("Jabber"),
        "X-MSN" => Some("MSN"),
        "X-YAHOO" => Some("Yahoo"),
        "X-SKYPE" | "X-SKYPE-USERNAME" => Some("Skype"),
        "X-QQ" => Some("QQ"),
        _ => None,
    }
}

/// `1980-06-15`, `19800615`, `--0615` or `--06-15`
///
/// Anything else yields an impossible date so the record is flagged later.
fn parse_birthday(value: &str) -> RawBirthday {
    const UNPARSEABLE: RawBirthday = RawBirthday {
        year: None,
        month: Some(0),
        day: Some(0),
    };

    let date = value.split('T').next().unwrap_or_default();
    let (year_part, rest) = match date.strip_prefix("--") {
        Some(rest) => (None, rest.replace('-', "")),
        None => {
            let digits = date.replace('-', "");
            if digits.len() != 8 || !digits.chars().all(|c| c.is_ascii_digit()) {
                return UNPARSEABLE;
            }
            (Some(digits[..4].to_string()), digits[4..].to_string())
        }
    };

    if rest.len() != 4 || !rest.chars().all(|c| c.is_ascii_digit()) {
        return UNPARSEABLE;
    }

    let year = match year_part {
        Some(y) => match y.parse() {
            Ok(y) => Some(y),
            Err(_) => return UNPARSEABLE,
        },
        None => None,
    };

    RawBirthday {
        year,
        month: rest[..2].parse().ok(),
        day: rest[2..].parse().ok(),
    }
}
