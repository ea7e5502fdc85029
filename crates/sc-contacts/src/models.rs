//! Data models for the contacts bridge

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ============================================================================
// Permission
// ============================================================================

/// Access level for the address book as seen by callers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PermissionGrade {
    Undetermined,
    Denied,
    Granted,
    /// Partial access to a user-selected subset
    Limited,
}

impl PermissionGrade {
    /// Whether contacts may be read at this grade
    pub fn allows_read(self) -> bool {
        matches!(self, Self::Granted | Self::Limited)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Undetermined => "undetermined",
            Self::Denied => "denied",
            Self::Granted => "granted",
            Self::Limited => "limited",
        }
    }
}

impl fmt::Display for PermissionGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authorization status as reported by the native store
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuthorizationStatus {
    NotDetermined,
    Restricted,
    Denied,
    Authorized,
    Limited,
    /// A raw platform value this bridge does not know
    Unknown(i64),
}

// ============================================================================
// Raw records (captured from the native store)
// ============================================================================

/// A labeled native value, label still in platform form (`_$!<Mobile>!$_`)
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RawLabeledValue {
    #[serde(default)]
    pub label: Option<String>,
    pub value: String,
}

impl RawLabeledValue {
    pub fn new(label: Option<&str>, value: impl Into<String>) -> Self {
        Self {
            label: label.map(str::to_string),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RawPostalAddress {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub postal_code: String,
    #[serde(default)]
    pub country: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RawInstantMessage {
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub username: String,
}

/// Birthday components; any of them may be missing on the native side
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RawBirthday {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

/// One address-book entry captured during enumeration
///
/// The store builds these on the enumeration thread. After that a record is
/// owned by exactly one batch and the store is never consulted again.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RawContact {
    pub identifier: String,
    #[serde(default)]
    pub given_name: String,
    #[serde(default)]
    pub family_name: String,
    #[serde(default)]
    pub middle_name: String,
    #[serde(default)]
    pub name_prefix: String,
    #[serde(default)]
    pub name_suffix: String,
    #[serde(default)]
    pub organization_name: String,
    #[serde(default)]
    pub job_title: String,
    #[serde(default)]
    pub department_name: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub image_data_available: bool,
    #[serde(default)]
    pub thumbnail_uri: Option<String>,
    #[serde(default)]
    pub starred: bool,
    #[serde(default)]
    pub birthday: Option<RawBirthday>,
    #[serde(default)]
    pub phone_numbers: Vec<RawLabeledValue>,
    #[serde(default)]
    pub email_addresses: Vec<RawLabeledValue>,
    #[serde(default)]
    pub postal_addresses: Vec<RawPostalAddress>,
    #[serde(default)]
    pub instant_messages: Vec<RawInstantMessage>,
    #[serde(default)]
    pub url_addresses: Vec<RawLabeledValue>,
}

impl RawContact {
    /// Create a raw record with an identifier
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Default::default()
        }
    }

    /// Set given and family name
    pub fn with_name(mut self, given: impl Into<String>, family: impl Into<String>) -> Self {
        self.given_name = given.into();
        self.family_name = family.into();
        self
    }

    /// Add a phone number
    pub fn with_phone(mut self, label: Option<&str>, number: impl Into<String>) -> Self {
        self.phone_numbers.push(RawLabeledValue::new(label, number));
        self
    }

    /// Add an email address
    pub fn with_email(mut self, label: Option<&str>, email: impl Into<String>) -> Self {
        self.email_addresses.push(RawLabeledValue::new(label, email));
        self
    }

    /// Set organization
    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.organization_name = org.into();
        self
    }

    /// Set birthday
    pub fn with_birthday(mut self, year: Option<i32>, month: u32, day: u32) -> Self {
        self.birthday = Some(RawBirthday {
            year,
            month: Some(month),
            day: Some(day),
        });
        self
    }
}

// ============================================================================
// Normalized contact (what callers receive)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
pub struct PhoneNumber {
    pub label: String,
    pub number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
pub struct EmailAddress {
    pub label: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct PostalAddress {
    pub label: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub post_code: String,
    pub country: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
pub struct InstantMessageAddress {
    pub service: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
pub struct UrlAddress {
    pub label: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Birthday {
    /// Missing when the entry stores only month and day
    pub year: Option<i32>,
    pub month: u32,
    pub day: u32,
}

/// Cross-platform contact shape returned to callers
///
/// Strings default to empty and lists to empty, never absent.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedContact {
    pub record_id: String,
    pub display_name: String,
    pub given_name: String,
    pub family_name: String,
    pub middle_name: String,
    pub name_prefix: String,
    pub name_suffix: String,
    pub organization: String,
    pub job_title: String,
    pub department: String,
    pub note: String,
    pub has_thumbnail: bool,
    pub thumbnail_reference: String,
    pub is_starred: bool,
    pub birthday: Option<Birthday>,
    pub phone_numbers: Vec<PhoneNumber>,
    pub email_addresses: Vec<EmailAddress>,
    pub postal_addresses: Vec<PostalAddress>,
    pub instant_message_addresses: Vec<InstantMessageAddress>,
    pub url_addresses: Vec<UrlAddress>,
}

// ============================================================================
// Fetch request
// ============================================================================

/// Groups of native keys a fetch may ask for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContactField {
    Names,
    Organization,
    Note,
    PhoneNumbers,
    EmailAddresses,
    PostalAddresses,
    InstantMessageAddresses,
    UrlAddresses,
    Birthday,
    Thumbnail,
    Starred,
}

impl ContactField {
    pub const ALL: [ContactField; 11] = [
        Self::Names,
        Self::Organization,
        Self::Note,
        Self::PhoneNumbers,
        Self::EmailAddresses,
        Self::PostalAddresses,
        Self::InstantMessageAddresses,
        Self::UrlAddresses,
        Self::Birthday,
        Self::Thumbnail,
        Self::Starred,
    ];
}

/// Field-selection descriptor; the identifier is always fetched
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldSet(BTreeSet<ContactField>);

impl FieldSet {
    /// Every field the bridge knows how to normalize
    pub fn all() -> Self {
        ContactField::ALL.into_iter().collect()
    }

    /// Names, organization, phones and emails only
    pub fn essential() -> Self {
        [
            ContactField::Names,
            ContactField::Organization,
            ContactField::PhoneNumbers,
            ContactField::EmailAddresses,
        ]
        .into_iter()
        .collect()
    }

    pub fn contains(&self, field: ContactField) -> bool {
        self.0.contains(&field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<ContactField> for FieldSet {
    fn from_iter<I: IntoIterator<Item = ContactField>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Whatever order the store walks in
    #[default]
    Natural,
    GivenName,
    FamilyName,
}

/// Which records a fetch may see
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum FetchScope {
    /// The whole address book
    #[default]
    All,
    /// Only the records the user shared under limited access
    AuthorizedSubset,
}

/// What the enumeration driver asks the store for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub fields: FieldSet,
    pub sort_order: SortOrder,
    pub scope: FetchScope,
}

impl FetchRequest {
    /// Full-access request sorted by given name
    pub fn full(fields: FieldSet) -> Self {
        Self {
            fields,
            sort_order: SortOrder::GivenName,
            scope: FetchScope::All,
        }
    }

    /// Limited-access request over the shared subset
    pub fn limited(fields: FieldSet) -> Self {
        Self {
            fields,
            sort_order: SortOrder::GivenName,
            scope: FetchScope::AuthorizedSubset,
        }
    }

    /// Derive the request for a grade; `None` when nothing may be read
    pub fn for_grade(grade: PermissionGrade, fields: FieldSet) -> Option<Self> {
        if !grade.allows_read() {
            return None;
        }

        Some(match grade {
            PermissionGrade::Limited => Self::limited(fields),
            _ => Self::full(fields),
        })
    }
}
