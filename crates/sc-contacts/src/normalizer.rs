//! Raw record to normalized contact conversion
//!
//! Pure and stateless: the same raw record and field set always produce the
//! same contact. Only fields present in the [`FieldSet`] are filled in; the
//! rest keep their empty defaults.

use chrono::NaiveDate;

use crate::error::NormalizationError;
use crate::models::{
    Birthday, ContactField, EmailAddress, FieldSet, InstantMessageAddress, NormalizedContact,
    PhoneNumber, PostalAddress, RawBirthday, RawContact, UrlAddress,
};

/// Display name used when an entry has neither a name nor an organization
pub const NO_NAME: &str = "No Name";

/// Label used when the native value carries none
pub const DEFAULT_LABEL: &str = "other";

/// Leap year used to validate birthdays stored without a year
const PLACEHOLDER_YEAR: i32 = 2000;

/// Convert one raw record into the caller-facing shape
pub fn normalize(raw: &RawContact, fields: &FieldSet) -> Result<NormalizedContact, NormalizationError> {
    let record_id = raw.identifier.trim();
    if record_id.is_empty() {
        return Err(NormalizationError::MissingIdentifier);
    }
    if record_id.chars().any(char::is_control) {
        return Err(NormalizationError::Malformed {
            id: record_id.escape_debug().to_string(),
            reason: "identifier contains control characters".to_string(),
        });
    }

    let mut contact = NormalizedContact {
        record_id: record_id.to_string(),
        ..Default::default()
    };

    if fields.contains(ContactField::Names) {
        contact.given_name = raw.given_name.trim().to_string();
        contact.family_name = raw.family_name.trim().to_string();
        contact.middle_name = raw.middle_name.trim().to_string();
        contact.name_prefix = raw.name_prefix.trim().to_string();
        contact.name_suffix = raw.name_suffix.trim().to_string();
    }

    if fields.contains(ContactField::Organization) {
        contact.organization = raw.organization_name.trim().to_string();
        contact.job_title = raw.job_title.trim().to_string();
        contact.department = raw.department_name.trim().to_string();
    }

    contact.display_name = display_name(&contact);

    if fields.contains(ContactField::Note) {
        contact.note = raw.note.clone();
    }

    if fields.contains(ContactField::Thumbnail) {
        let reference = raw
            .thumbnail_uri
            .as_deref()
            .map(str::trim)
            .unwrap_or_default();
        contact.has_thumbnail = raw.image_data_available || !reference.is_empty();
        contact.thumbnail_reference = reference.to_string();
    }

    if fields.contains(ContactField::Starred) {
        contact.is_starred = raw.starred;
    }

    if fields.contains(ContactField::Birthday) {
        contact.birthday = match raw.birthday {
            Some(bday) => birthday(record_id, bday)?,
            None => None,
        };
    }

    if fields.contains(ContactField::PhoneNumbers) {
        contact.phone_numbers = raw
            .phone_numbers
            .iter()
            .filter(|p| !p.value.trim().is_empty())
            .map(|p| PhoneNumber {
                label: localized_label(p.label.as_deref()),
                number: p.value.trim().to_string(),
            })
            .collect();
    }

    if fields.contains(ContactField::EmailAddresses) {
        contact.email_addresses = raw
            .email_addresses
            .iter()
            .filter(|e| !e.value.trim().is_empty())
            .map(|e| EmailAddress {
                label: localized_label(e.label.as_deref()),
                email: e.value.trim().to_string(),
            })
            .collect();
    }

    if fields.contains(ContactField::PostalAddresses) {
        contact.postal_addresses = raw
            .postal_addresses
            .iter()
            .map(|a| PostalAddress {
                label: localized_label(a.label.as_deref()),
                street: a.street.trim().to_string(),
                city: a.city.trim().to_string(),
                state: a.state.trim().to_string(),
                post_code: a.postal_code.trim().to_string(),
                country: a.country.trim().to_string(),
            })
            .filter(|a| {
                !(a.street.is_empty()
                    && a.city.is_empty()
                    && a.state.is_empty()
                    && a.post_code.is_empty()
                    && a.country.is_empty())
            })
            .collect();
    }

    if fields.contains(ContactField::InstantMessageAddresses) {
        contact.instant_message_addresses = raw
            .instant_messages
            .iter()
            .filter(|im| !im.username.trim().is_empty())
            .map(|im| InstantMessageAddress {
                service: im.service.trim().to_string(),
                username: im.username.trim().to_string(),
            })
            .collect();
    }

    if fields.contains(ContactField::UrlAddresses) {
        contact.url_addresses = raw
            .url_addresses
            .iter()
            .filter(|u| !u.value.trim().is_empty())
            .map(|u| UrlAddress {
                label: localized_label(u.label.as_deref()),
                url: u.value.trim().to_string(),
            })
            .collect();
    }

    Ok(contact)
}

/// "Given Family", else the organization, else [`NO_NAME`]
fn display_name(contact: &NormalizedContact) -> String {
    let full_name = [contact.given_name.as_str(), contact.family_name.as_str()]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");

    if !full_name.is_empty() {
        full_name
    } else if !contact.organization.is_empty() {
        contact.organization.clone()
    } else {
        NO_NAME.to_string()
    }
}

/// Incomplete birthdays are dropped; impossible dates reject the record
fn birthday(id: &str, raw: RawBirthday) -> Result<Option<Birthday>, NormalizationError> {
    let (Some(month), Some(day)) = (raw.month, raw.day) else {
        return Ok(None);
    };

    if NaiveDate::from_ymd_opt(raw.year.unwrap_or(PLACEHOLDER_YEAR), month, day).is_none() {
        return Err(NormalizationError::InvalidBirthday {
            id: id.to_string(),
            month,
            day,
        });
    }

    Ok(Some(Birthday {
        year: raw.year,
        month,
        day,
    }))
}

/// Turn a platform label into a readable one
///
/// `_$!<Mobile>!$_` becomes `mobile`, free text is kept as typed, a missing
/// or blank label becomes [`DEFAULT_LABEL`].
pub fn localized_label(label: Option<&str>) -> String {
    let Some(label) = label.map(str::trim).filter(|l| !l.is_empty()) else {
        return DEFAULT_LABEL.to_string();
    };

    let Some(inner) = label
        .strip_prefix("_$!<")
        .and_then(|rest| rest.strip_suffix(">!$_"))
    else {
        return label.to_string();
    };

    let readable = match inner {
        "Mobile" => "mobile",
        "iPhone" => "iPhone",
        "Home" => "home",
        "Work" => "work",
        "Main" => "main",
        "HomeFAX" => "home fax",
        "WorkFAX" => "work fax",
        "OtherFAX" => "other fax",
        "Pager" => "pager",
        "HomePage" => "homepage",
        "School" => "school",
        "Other" => "other",
        "" => DEFAULT_LABEL,
        other => return other.to_lowercase(),
    };
    readable.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RawInstantMessage, RawLabeledValue, RawPostalAddress};

    fn full_raw() -> RawContact {
        RawContact {
            identifier: " 410FE041-5C4E-48DA-B4DE-04C15EA3DBAC ".to_string(),
            given_name: "John".to_string(),
            family_name: "Appleseed".to_string(),
            middle_name: "Q".to_string(),
            name_prefix: "Dr.".to_string(),
            name_suffix: "Jr.".to_string(),
            organization_name: "Apple".to_string(),
            job_title: "Engineer".to_string(),
            department_name: "R&D".to_string(),
            note: "met at conf".to_string(),
            image_data_available: true,
            thumbnail_uri: Some("content://thumb/1".to_string()),
            starred: true,
            birthday: Some(RawBirthday {
                year: Some(1980),
                month: Some(6),
                day: Some(15),
            }),
            phone_numbers: vec![
                RawLabeledValue::new(Some("_$!<Mobile>!$_"), " 888-555-5512 "),
                RawLabeledValue::new(None, "   "),
            ],
            email_addresses: vec![RawLabeledValue::new(None, "john@example.com")],
            postal_addresses: vec![
                RawPostalAddress {
                    label: Some("_$!<Work>!$_".to_string()),
                    street: "1 Infinite Loop".to_string(),
                    city: "Cupertino".to_string(),
                    state: "CA".to_string(),
                    postal_code: "95014".to_string(),
                    country: "USA".to_string(),
                },
                RawPostalAddress::default(),
            ],
            instant_messages: vec![RawInstantMessage {
                service: "Skype".to_string(),
                username: "jappleseed".to_string(),
            }],
            url_addresses: vec![RawLabeledValue::new(
                Some("_$!<HomePage>!$_"),
                "https://example.com",
            )],
        }
    }

    #[test]
    fn test_normalize_all_fields() {
        let contact = normalize(&full_raw(), &FieldSet::all()).unwrap();

        assert_eq!(contact.record_id, "410FE041-5C4E-48DA-B4DE-04C15EA3DBAC");
        assert_eq!(contact.display_name, "John Appleseed");
        assert_eq!(contact.middle_name, "Q");
        assert_eq!(contact.name_prefix, "Dr.");
        assert_eq!(contact.department, "R&D");
        assert!(contact.has_thumbnail);
        assert_eq!(contact.thumbnail_reference, "content://thumb/1");
        assert!(contact.is_starred);
        assert_eq!(
            contact.birthday,
            Some(Birthday {
                year: Some(1980),
                month: 6,
                day: 15
            })
        );

        assert_eq!(contact.phone_numbers.len(), 1);
        assert_eq!(contact.phone_numbers[0].label, "mobile");
        assert_eq!(contact.phone_numbers[0].number, "888-555-5512");
        assert_eq!(contact.email_addresses[0].label, "other");
        assert_eq!(contact.postal_addresses.len(), 1);
        assert_eq!(contact.postal_addresses[0].label, "work");
        assert_eq!(contact.postal_addresses[0].post_code, "95014");
        assert_eq!(contact.instant_message_addresses[0].service, "Skype");
        assert_eq!(contact.url_addresses[0].label, "homepage");
    }

    #[test]
    fn test_normalize_respects_field_selection() {
        let contact = normalize(&full_raw(), &FieldSet::essential()).unwrap();

        assert_eq!(contact.given_name, "John");
        assert_eq!(contact.organization, "Apple");
        assert_eq!(contact.phone_numbers.len(), 1);
        assert!(contact.note.is_empty());
        assert!(contact.birthday.is_none());
        assert!(!contact.has_thumbnail);
        assert!(!contact.is_starred);
        assert!(contact.postal_addresses.is_empty());
        assert!(contact.url_addresses.is_empty());
    }

    #[test]
    fn test_display_name_fallbacks() {
        let only_org = RawContact::new("1").with_organization("Acme Inc");
        assert_eq!(
            normalize(&only_org, &FieldSet::all()).unwrap().display_name,
            "Acme Inc"
        );

        let nothing = RawContact::new("2");
        assert_eq!(normalize(&nothing, &FieldSet::all()).unwrap().display_name, NO_NAME);

        let family_only = RawContact::new("3").with_name("", "Smith");
        assert_eq!(
            normalize(&family_only, &FieldSet::all()).unwrap().display_name,
            "Smith"
        );
    }

    #[test]
    fn test_missing_identifier_is_rejected() {
        let raw = RawContact::new("   ").with_name("Ghost", "");
        assert_eq!(
            normalize(&raw, &FieldSet::all()).unwrap_err(),
            NormalizationError::MissingIdentifier
        );
    }

    #[test]
    fn test_control_characters_in_identifier() {
        let raw = RawContact::new("abc\u{0}def");
        assert!(matches!(
            normalize(&raw, &FieldSet::all()).unwrap_err(),
            NormalizationError::Malformed { .. }
        ));
    }

    #[test]
    fn test_birthday_rules() {
        // Feb 29 without a year is fine
        let leap = RawContact::new("1").with_birthday(None, 2, 29);
        let contact = normalize(&leap, &FieldSet::all()).unwrap();
        assert_eq!(contact.birthday.unwrap().year, None);

        // Feb 29 in a non-leap year is not
        let bad = RawContact::new("2").with_birthday(Some(2001), 2, 29);
        assert!(matches!(
            normalize(&bad, &FieldSet::all()).unwrap_err(),
            NormalizationError::InvalidBirthday { month: 2, day: 29, .. }
        ));

        // Incomplete components are dropped, not rejected
        let mut partial = RawContact::new("3");
        partial.birthday = Some(RawBirthday {
            year: Some(1990),
            month: Some(5),
            day: None,
        });
        assert!(normalize(&partial, &FieldSet::all()).unwrap().birthday.is_none());

        // Invalid birthday is ignored when the field is not requested
        assert!(normalize(&bad, &FieldSet::essential()).is_ok());
    }

    #[test]
    fn test_localized_label() {
        assert_eq!(localized_label(Some("_$!<Mobile>!$_")), "mobile");
        assert_eq!(localized_label(Some("_$!<HomeFAX>!$_")), "home fax");
        assert_eq!(localized_label(Some("_$!<Anniversary>!$_")), "anniversary");
        assert_eq!(localized_label(Some("Cabin")), "Cabin");
        assert_eq!(localized_label(Some("  ")), "other");
        assert_eq!(localized_label(None), "other");
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let raw = full_raw();
        let fields = FieldSet::all();
        assert_eq!(normalize(&raw, &fields), normalize(&raw, &fields));
    }
}
