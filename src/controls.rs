// LDAP control decoding. Each control keeps its OID, criticality, and raw
// value byte-for-byte; well-known OIDs additionally get a decoded view. A
// value that fails to decode leaves the control generic rather than failing
// the message, since the proxy only observes traffic.

use crate::asn1::{BerError, Element, OCTET_STRING_TYPE};
use crate::message::hex_dump;

/// Tag of the controls element inside an LDAP message envelope.
pub const CONTROLS_TYPE: u8 = 0xA0;

pub const MANAGE_DSAIT_OID: &str = "2.16.840.1.113730.3.4.2";
pub const PERSISTENT_SEARCH_OID: &str = "2.16.840.1.113730.3.4.3";
pub const PASSWORD_EXPIRED_OID: &str = "2.16.840.1.113730.3.4.4";
pub const PASSWORD_EXPIRING_OID: &str = "2.16.840.1.113730.3.4.5";
pub const ENTRY_CHANGE_NOTIFICATION_OID: &str = "2.16.840.1.113730.3.4.7";
pub const VLV_REQUEST_OID: &str = "2.16.840.1.113730.3.4.9";
pub const VLV_RESPONSE_OID: &str = "2.16.840.1.113730.3.4.10";
pub const PROXIED_AUTH_V1_OID: &str = "2.16.840.1.113730.3.4.12";
pub const AUTHORIZATION_ID_RESPONSE_OID: &str = "2.16.840.1.113730.3.4.15";
pub const AUTHORIZATION_ID_REQUEST_OID: &str = "2.16.840.1.113730.3.4.16";
pub const REAL_ATTRIBUTES_ONLY_OID: &str = "2.16.840.1.113730.3.4.17";
pub const PROXIED_AUTH_V2_OID: &str = "2.16.840.1.113730.3.4.18";
pub const SERVER_SORT_REQUEST_OID: &str = "1.2.840.113556.1.4.473";
pub const SERVER_SORT_RESPONSE_OID: &str = "1.2.840.113556.1.4.474";
pub const PAGED_RESULTS_OID: &str = "1.2.840.113556.1.4.319";
pub const PASSWORD_POLICY_OID: &str = "1.3.6.1.4.1.42.2.27.8.5.1";
pub const GET_EFFECTIVE_RIGHTS_OID: &str = "1.3.6.1.4.1.42.2.27.9.5.2";

const SORT_KEY_MATCHING_RULE_TYPE: u8 = 0x80;
const SORT_KEY_REVERSE_ORDER_TYPE: u8 = 0x81;
const SORT_RESPONSE_ATTRIBUTE_TYPE: u8 = 0x80;
const VLV_SELECT_BY_OFFSET_TYPE: u8 = 0xA0;
const VLV_SELECT_BY_ASSERTION_TYPE: u8 = 0x81;
const PWP_WARNING_TYPE: u8 = 0x80;
const PWP_ERROR_TYPE: u8 = 0x81;
const PWP_WARNING_TIME_BEFORE_EXPIRATION: u8 = 0x80;
const PWP_WARNING_GRACE_AUTHS_REMAINING: u8 = 0x81;

/// Entry change type used by persistent search and entry change notification.
pub const CHANGE_TYPE_ADD: i32 = 1;
pub const CHANGE_TYPE_DELETE: i32 = 2;
pub const CHANGE_TYPE_MODIFY: i32 = 4;
pub const CHANGE_TYPE_MODIFY_DN: i32 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub oid: String,
    pub criticality: bool,
    pub value: Option<Vec<u8>>,
    pub data: ControlData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub attribute_type: String,
    pub matching_rule_id: Option<String>,
    pub reverse_order: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VlvTarget {
    ByOffset { offset: i32, content_count: i32 },
    ByAssertionValue(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordPolicyWarning {
    TimeBeforeExpiration(i32),
    GraceAuthsRemaining(i32),
}

/// Decoded view of a control value for OIDs the proxy knows about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlData {
    Generic,
    ManageDsaIt,
    PersistentSearch {
        change_types: i32,
        changes_only: bool,
        return_change_controls: bool,
    },
    EntryChangeNotification {
        change_type: i32,
        previous_dn: Option<String>,
        change_number: Option<i32>,
    },
    PasswordExpired,
    PasswordExpiring {
        seconds_until_expiration: i32,
    },
    PasswordPolicy {
        warning: Option<PasswordPolicyWarning>,
        error: Option<i32>,
    },
    ServerSortRequest {
        sort_keys: Vec<SortKey>,
    },
    ServerSortResponse {
        result_code: i32,
        attribute_type: Option<String>,
    },
    PagedResults {
        page_size: i32,
        cookie: Vec<u8>,
    },
    VlvRequest {
        before_count: i32,
        after_count: i32,
        target: VlvTarget,
    },
    VlvResponse {
        target_position: i32,
        content_count: i32,
        result_code: i32,
    },
    ProxiedAuthV1 {
        proxy_dn: String,
    },
    ProxiedAuthV2 {
        authorization_id: String,
    },
    GetEffectiveRights {
        authorization_id: String,
        attributes: Vec<String>,
    },
    AuthorizationIdRequest,
    AuthorizationIdResponse {
        authorization_id: String,
    },
    RealAttributesOnly,
}

impl Control {
    /// Decode a control list from the final element of a message envelope.
    /// The list structure itself must be valid; value specialization of each
    /// control degrades to `Generic` on any failure.
    pub fn decode_controls(element: &Element) -> Result<Vec<Control>, BerError> {
        let mut controls = Vec::new();
        for child in element.as_elements()? {
            controls.push(Control::decode(&child)?);
        }
        Ok(controls)
    }

    fn decode(element: &Element) -> Result<Control, BerError> {
        let parts = element.as_elements()?;
        if parts.is_empty() || parts.len() > 3 {
            return Err(BerError::UnexpectedElementCount {
                expected: "1 to 3 elements in control",
                got: parts.len(),
            });
        }
        let oid = parts[0].as_text();
        let mut criticality = false;
        let mut value = None;
        match parts.len() {
            2 => {
                // Two elements leave the second ambiguous: an octet string is
                // the value, anything else is the criticality flag.
                if parts[1].tag == OCTET_STRING_TYPE {
                    value = Some(parts[1].value.clone());
                } else {
                    criticality = parts[1].as_boolean()?;
                }
            }
            3 => {
                criticality = parts[1].as_boolean()?;
                value = Some(parts[2].value.clone());
            }
            _ => {}
        }
        let data = specialize(&oid, value.as_deref()).unwrap_or(ControlData::Generic);
        Ok(Control {
            oid,
            criticality,
            value,
            data,
        })
    }

    pub fn to_element(&self) -> Element {
        let mut parts = vec![Element::octet_string(self.oid.as_bytes().to_vec())];
        if self.criticality {
            parts.push(Element::boolean(true));
        }
        if let Some(value) = &self.value {
            parts.push(Element::octet_string(value.clone()));
        }
        Element::sequence(parts)
    }

    pub fn to_text(&self, indent: usize) -> String {
        let p = " ".repeat(indent);
        let mut out = format!("{}LDAP Control:  {}\n", p, control_name(&self.oid));
        out.push_str(&format!("{}    OID:  {}\n", p, self.oid));
        out.push_str(&format!("{}    Criticality:  {}\n", p, self.criticality));
        out.push_str(&self.data_text(indent + 4));
        if matches!(self.data, ControlData::Generic) {
            if let Some(value) = &self.value {
                out.push_str(&format!("{}    Control Value:\n", p));
                out.push_str(&hex_dump(value, indent + 8));
            }
        }
        out
    }

    fn data_text(&self, indent: usize) -> String {
        let p = " ".repeat(indent);
        match &self.data {
            ControlData::Generic
            | ControlData::ManageDsaIt
            | ControlData::PasswordExpired
            | ControlData::AuthorizationIdRequest
            | ControlData::RealAttributesOnly => String::new(),
            ControlData::PersistentSearch {
                change_types,
                changes_only,
                return_change_controls,
            } => format!(
                "{}Change Types:  {}\n{}Changes Only:  {}\n{}Return Change Controls:  {}\n",
                p, change_types, p, changes_only, p, return_change_controls
            ),
            ControlData::EntryChangeNotification {
                change_type,
                previous_dn,
                change_number,
            } => {
                let mut out = format!("{}Change Type:  {}\n", p, change_type);
                if let Some(previous_dn) = previous_dn {
                    out.push_str(&format!("{}Previous DN:  {}\n", p, previous_dn));
                }
                if let Some(change_number) = change_number {
                    out.push_str(&format!("{}Change Number:  {}\n", p, change_number));
                }
                out
            }
            ControlData::PasswordExpiring {
                seconds_until_expiration,
            } => format!(
                "{}Seconds Until Expiration:  {}\n",
                p, seconds_until_expiration
            ),
            ControlData::PasswordPolicy { warning, error } => {
                let mut out = String::new();
                match warning {
                    Some(PasswordPolicyWarning::TimeBeforeExpiration(seconds)) => {
                        out.push_str(&format!(
                            "{}Warning:  time before expiration ({})\n",
                            p, seconds
                        ));
                    }
                    Some(PasswordPolicyWarning::GraceAuthsRemaining(remaining)) => {
                        out.push_str(&format!(
                            "{}Warning:  grace authentications remaining ({})\n",
                            p, remaining
                        ));
                    }
                    None => {}
                }
                if let Some(error) = error {
                    out.push_str(&format!("{}Error:  {}\n", p, error));
                }
                out
            }
            ControlData::ServerSortRequest { sort_keys } => {
                let mut out = format!("{}Sort Keys:\n", p);
                for key in sort_keys {
                    out.push_str(&format!("{}    Attribute:  {}\n", p, key.attribute_type));
                    if let Some(rule) = &key.matching_rule_id {
                        out.push_str(&format!("{}        Matching Rule:  {}\n", p, rule));
                    }
                    if key.reverse_order {
                        out.push_str(&format!("{}        Reverse Order:  true\n", p));
                    }
                }
                out
            }
            ControlData::ServerSortResponse {
                result_code,
                attribute_type,
            } => {
                let mut out = format!("{}Sort Result Code:  {}\n", p, result_code);
                if let Some(attribute_type) = attribute_type {
                    out.push_str(&format!("{}Attribute Type:  {}\n", p, attribute_type));
                }
                out
            }
            ControlData::PagedResults { page_size, cookie } => {
                let mut out = format!("{}Page Size:  {}\n", p, page_size);
                if !cookie.is_empty() {
                    out.push_str(&format!("{}Cookie:\n", p));
                    out.push_str(&hex_dump(cookie, indent + 4));
                }
                out
            }
            ControlData::VlvRequest {
                before_count,
                after_count,
                target,
            } => {
                let mut out = format!(
                    "{}Before Count:  {}\n{}After Count:  {}\n",
                    p, before_count, p, after_count
                );
                match target {
                    VlvTarget::ByOffset {
                        offset,
                        content_count,
                    } => {
                        out.push_str(&format!("{}Offset:  {}\n", p, offset));
                        out.push_str(&format!("{}Content Count:  {}\n", p, content_count));
                    }
                    VlvTarget::ByAssertionValue(value) => {
                        out.push_str(&format!(
                            "{}Assertion Value:  {}\n",
                            p,
                            String::from_utf8_lossy(value)
                        ));
                    }
                }
                out
            }
            ControlData::VlvResponse {
                target_position,
                content_count,
                result_code,
            } => format!(
                "{}Target Position:  {}\n{}Content Count:  {}\n{}Result Code:  {}\n",
                p, target_position, p, content_count, p, result_code
            ),
            ControlData::ProxiedAuthV1 { proxy_dn } => {
                format!("{}Proxy DN:  {}\n", p, proxy_dn)
            }
            ControlData::ProxiedAuthV2 { authorization_id }
            | ControlData::AuthorizationIdResponse { authorization_id } => {
                format!("{}Authorization ID:  {}\n", p, authorization_id)
            }
            ControlData::GetEffectiveRights {
                authorization_id,
                attributes,
            } => {
                let mut out = format!("{}Authorization ID:  {}\n", p, authorization_id);
                if !attributes.is_empty() {
                    out.push_str(&format!("{}Attributes:\n", p));
                    for attribute in attributes {
                        out.push_str(&format!("{}    {}\n", p, attribute));
                    }
                }
                out
            }
        }
    }
}

/// Display name for a control OID, generic controls included.
pub fn control_name(oid: &str) -> &'static str {
    match oid {
        MANAGE_DSAIT_OID => "Manage DSA IT Control",
        PERSISTENT_SEARCH_OID => "Persistent Search Control",
        PASSWORD_EXPIRED_OID => "Password Expired Control",
        PASSWORD_EXPIRING_OID => "Password Expiring Control",
        ENTRY_CHANGE_NOTIFICATION_OID => "Entry Change Notification Control",
        VLV_REQUEST_OID => "VLV Request Control",
        VLV_RESPONSE_OID => "VLV Response Control",
        PROXIED_AUTH_V1_OID => "Proxied Auth V1 Control",
        PROXIED_AUTH_V2_OID => "Proxied Auth V2 Control",
        AUTHORIZATION_ID_REQUEST_OID => "Authorization ID Request Control",
        AUTHORIZATION_ID_RESPONSE_OID => "Authorization ID Response Control",
        REAL_ATTRIBUTES_ONLY_OID => "Real Attributes Only Control",
        SERVER_SORT_REQUEST_OID => "Server Sort Request Control",
        SERVER_SORT_RESPONSE_OID => "Server Sort Response Control",
        PAGED_RESULTS_OID => "Paged Results Control",
        PASSWORD_POLICY_OID => "Password Policy Control",
        GET_EFFECTIVE_RIGHTS_OID => "Get Effective Rights Control",
        _ => "Generic Control",
    }
}

/// Decode the control value for a known OID. Any error means the caller
/// falls back to a generic control.
fn specialize(oid: &str, value: Option<&[u8]>) -> Result<ControlData, BerError> {
    match oid {
        MANAGE_DSAIT_OID => Ok(ControlData::ManageDsaIt),
        PASSWORD_EXPIRED_OID => Ok(ControlData::PasswordExpired),
        AUTHORIZATION_ID_REQUEST_OID => Ok(ControlData::AuthorizationIdRequest),
        REAL_ATTRIBUTES_ONLY_OID => Ok(ControlData::RealAttributesOnly),
        PERSISTENT_SEARCH_OID => {
            let parts = value_sequence(value)?;
            if parts.len() != 3 {
                return Err(count_error("3 elements in persistent search value", &parts));
            }
            Ok(ControlData::PersistentSearch {
                change_types: parts[0].as_integer()?,
                changes_only: parts[1].as_boolean()?,
                return_change_controls: parts[2].as_boolean()?,
            })
        }
        ENTRY_CHANGE_NOTIFICATION_OID => {
            let parts = value_sequence(value)?;
            if parts.is_empty() || parts.len() > 3 {
                return Err(count_error(
                    "1 to 3 elements in entry change notification value",
                    &parts,
                ));
            }
            let change_type = parts[0].as_enumerated()?;
            let mut previous_dn = None;
            let change_number;
            if change_type == CHANGE_TYPE_MODIFY_DN {
                previous_dn = parts.get(1).map(|e| e.as_text());
                change_number = parts.get(2).map(|e| e.as_integer()).transpose()?;
            } else {
                change_number = parts.get(1).map(|e| e.as_integer()).transpose()?;
            }
            Ok(ControlData::EntryChangeNotification {
                change_type,
                previous_dn,
                change_number,
            })
        }
        PASSWORD_EXPIRING_OID => {
            // value is a decimal string, not a BER integer
            let text = String::from_utf8_lossy(value.unwrap_or_default());
            let seconds_until_expiration = text
                .parse::<i32>()
                .map_err(|_| BerError::ValueOutOfRange(format!("expiring seconds {:?}", text)))?;
            Ok(ControlData::PasswordExpiring {
                seconds_until_expiration,
            })
        }
        PASSWORD_POLICY_OID => {
            let parts = value_sequence(value)?;
            let mut warning = None;
            let mut error = None;
            for part in parts {
                match part.tag {
                    PWP_WARNING_TYPE => {
                        let inner = Element::decode(&part.value)?;
                        warning = Some(match inner.tag {
                            PWP_WARNING_TIME_BEFORE_EXPIRATION => {
                                PasswordPolicyWarning::TimeBeforeExpiration(inner.as_integer()?)
                            }
                            PWP_WARNING_GRACE_AUTHS_REMAINING => {
                                PasswordPolicyWarning::GraceAuthsRemaining(inner.as_integer()?)
                            }
                            other => {
                                return Err(BerError::UnrecognizedTagOrOid(format!(
                                    "password policy warning tag 0x{:02X}",
                                    other
                                )))
                            }
                        });
                    }
                    PWP_ERROR_TYPE => {
                        let code = part.as_enumerated()?;
                        if !(0..=8).contains(&code) {
                            return Err(BerError::ValueOutOfRange(format!(
                                "password policy error {}",
                                code
                            )));
                        }
                        error = Some(code);
                    }
                    other => {
                        return Err(BerError::UnrecognizedTagOrOid(format!(
                            "password policy element tag 0x{:02X}",
                            other
                        )))
                    }
                }
            }
            Ok(ControlData::PasswordPolicy { warning, error })
        }
        SERVER_SORT_REQUEST_OID => {
            let parts = value_sequence(value)?;
            let mut sort_keys = Vec::new();
            for key in parts {
                sort_keys.push(decode_sort_key(&key)?);
            }
            Ok(ControlData::ServerSortRequest { sort_keys })
        }
        SERVER_SORT_RESPONSE_OID => {
            let parts = value_sequence(value)?;
            if parts.is_empty() || parts.len() > 2 {
                return Err(count_error("1 or 2 elements in sort response value", &parts));
            }
            let attribute_type = match parts.get(1) {
                Some(element) if element.tag == SORT_RESPONSE_ATTRIBUTE_TYPE => {
                    Some(element.as_text())
                }
                Some(element) => {
                    return Err(BerError::UnrecognizedTagOrOid(format!(
                        "sort response element tag 0x{:02X}",
                        element.tag
                    )))
                }
                None => None,
            };
            Ok(ControlData::ServerSortResponse {
                result_code: parts[0].as_enumerated()?,
                attribute_type,
            })
        }
        PAGED_RESULTS_OID => {
            let parts = value_sequence(value)?;
            if parts.len() != 2 {
                return Err(count_error("2 elements in paged results value", &parts));
            }
            Ok(ControlData::PagedResults {
                page_size: parts[0].as_integer()?,
                cookie: parts[1].value.clone(),
            })
        }
        VLV_REQUEST_OID => {
            let parts = value_sequence(value)?;
            if parts.len() != 3 {
                return Err(count_error("3 elements in VLV request value", &parts));
            }
            let target = match parts[2].tag {
                VLV_SELECT_BY_OFFSET_TYPE => {
                    let offset_parts = parts[2].as_elements()?;
                    if offset_parts.len() != 2 {
                        return Err(count_error("2 elements in byOffset", &offset_parts));
                    }
                    VlvTarget::ByOffset {
                        offset: offset_parts[0].as_integer()?,
                        content_count: offset_parts[1].as_integer()?,
                    }
                }
                VLV_SELECT_BY_ASSERTION_TYPE => {
                    VlvTarget::ByAssertionValue(parts[2].value.clone())
                }
                other => {
                    return Err(BerError::UnrecognizedTagOrOid(format!(
                        "VLV target tag 0x{:02X}",
                        other
                    )))
                }
            };
            Ok(ControlData::VlvRequest {
                before_count: parts[0].as_integer()?,
                after_count: parts[1].as_integer()?,
                target,
            })
        }
        VLV_RESPONSE_OID => {
            let parts = value_sequence(value)?;
            if parts.len() != 3 {
                return Err(count_error("3 elements in VLV response value", &parts));
            }
            Ok(ControlData::VlvResponse {
                target_position: parts[0].as_integer()?,
                content_count: parts[1].as_integer()?,
                result_code: parts[2].as_enumerated()?,
            })
        }
        PROXIED_AUTH_V1_OID => {
            let parts = value_sequence(value)?;
            if parts.len() != 1 {
                return Err(count_error("1 element in proxied auth v1 value", &parts));
            }
            Ok(ControlData::ProxiedAuthV1 {
                proxy_dn: parts[0].as_text(),
            })
        }
        PROXIED_AUTH_V2_OID => {
            // v2 value is the raw authorization ID, not a sequence
            let value = value.ok_or(BerError::TruncatedInput("proxied auth v2 value"))?;
            Ok(ControlData::ProxiedAuthV2 {
                authorization_id: String::from_utf8_lossy(value).into_owned(),
            })
        }
        AUTHORIZATION_ID_RESPONSE_OID => {
            let value = value.ok_or(BerError::TruncatedInput("authorization ID value"))?;
            Ok(ControlData::AuthorizationIdResponse {
                authorization_id: String::from_utf8_lossy(value).into_owned(),
            })
        }
        GET_EFFECTIVE_RIGHTS_OID => {
            let parts = value_sequence(value)?;
            if parts.len() != 2 {
                return Err(count_error(
                    "2 elements in get effective rights value",
                    &parts,
                ));
            }
            Ok(ControlData::GetEffectiveRights {
                authorization_id: parts[0].as_text(),
                attributes: parts[1]
                    .as_elements()?
                    .into_iter()
                    .map(|a| a.as_text())
                    .collect(),
            })
        }
        other => Err(BerError::UnrecognizedTagOrOid(format!("control OID {}", other))),
    }
}

fn decode_sort_key(element: &Element) -> Result<SortKey, BerError> {
    let parts = element.as_elements()?;
    if parts.is_empty() || parts.len() > 3 {
        return Err(count_error("1 to 3 elements in sort key", &parts));
    }
    let mut matching_rule_id = None;
    let mut reverse_order = false;
    for part in &parts[1..] {
        match part.tag {
            SORT_KEY_MATCHING_RULE_TYPE => matching_rule_id = Some(part.as_text()),
            SORT_KEY_REVERSE_ORDER_TYPE => reverse_order = part.as_boolean()?,
            other => {
                return Err(BerError::UnrecognizedTagOrOid(format!(
                    "sort key element tag 0x{:02X}",
                    other
                )))
            }
        }
    }
    Ok(SortKey {
        attribute_type: parts[0].as_text(),
        matching_rule_id,
        reverse_order,
    })
}

fn value_sequence(value: Option<&[u8]>) -> Result<Vec<Element>, BerError> {
    let value = value.ok_or(BerError::TruncatedInput("control value"))?;
    Element::decode(value)?.as_elements()
}

fn count_error(expected: &'static str, got: &[Element]) -> BerError {
    BerError::UnexpectedElementCount {
        expected,
        got: got.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control_element(oid: &str, criticality: Option<bool>, value: Option<Vec<u8>>) -> Element {
        let mut parts = vec![Element::octet_string(oid.as_bytes().to_vec())];
        if let Some(criticality) = criticality {
            parts.push(Element::boolean(criticality));
        }
        if let Some(value) = value {
            parts.push(Element::octet_string(value));
        }
        Element::container(CONTROLS_TYPE, vec![Element::sequence(parts)])
    }

    #[test]
    fn test_manage_dsait() {
        let element = control_element(MANAGE_DSAIT_OID, Some(true), None);
        let controls = Control::decode_controls(&element).unwrap();
        assert_eq!(controls.len(), 1);
        assert!(controls[0].criticality);
        assert_eq!(controls[0].data, ControlData::ManageDsaIt);
    }

    #[test]
    fn test_two_element_form_with_value() {
        // OID plus octet string and no criticality flag
        let value = Element::sequence(vec![
            Element::integer(10),
            Element::octet_string(Vec::new()),
        ])
        .encode();
        let element = control_element(PAGED_RESULTS_OID, None, Some(value));
        let controls = Control::decode_controls(&element).unwrap();
        assert!(!controls[0].criticality);
        assert_eq!(
            controls[0].data,
            ControlData::PagedResults {
                page_size: 10,
                cookie: Vec::new(),
            }
        );
    }

    #[test]
    fn test_unknown_oid_is_generic() {
        let element = control_element("1.2.3.4.5.6", Some(false), Some(vec![0xAA, 0xBB]));
        let controls = Control::decode_controls(&element).unwrap();
        assert_eq!(controls[0].oid, "1.2.3.4.5.6");
        assert_eq!(controls[0].data, ControlData::Generic);
        assert_eq!(controls[0].value, Some(vec![0xAA, 0xBB]));
    }

    #[test]
    fn test_malformed_value_degrades_to_generic() {
        // persistent search with a value that is not a sequence
        let element = control_element(PERSISTENT_SEARCH_OID, Some(true), Some(vec![0xFF]));
        let controls = Control::decode_controls(&element).unwrap();
        assert_eq!(controls[0].data, ControlData::Generic);
        // original bytes preserved for re-encoding
        assert_eq!(controls[0].value, Some(vec![0xFF]));
        assert_eq!(controls[0].oid, PERSISTENT_SEARCH_OID);
    }

    #[test]
    fn test_persistent_search() {
        let value = Element::sequence(vec![
            Element::integer(CHANGE_TYPE_ADD | CHANGE_TYPE_MODIFY),
            Element::boolean(true),
            Element::boolean(false),
        ])
        .encode();
        let element = control_element(PERSISTENT_SEARCH_OID, Some(true), Some(value));
        let controls = Control::decode_controls(&element).unwrap();
        assert_eq!(
            controls[0].data,
            ControlData::PersistentSearch {
                change_types: 5,
                changes_only: true,
                return_change_controls: false,
            }
        );
    }

    #[test]
    fn test_entry_change_notification_modify_dn() {
        let value = Element::sequence(vec![
            Element::enumerated(CHANGE_TYPE_MODIFY_DN),
            Element::octet_string(b"uid=old,dc=example,dc=com".to_vec()),
            Element::integer(42),
        ])
        .encode();
        let element = control_element(ENTRY_CHANGE_NOTIFICATION_OID, None, Some(value));
        let controls = Control::decode_controls(&element).unwrap();
        assert_eq!(
            controls[0].data,
            ControlData::EntryChangeNotification {
                change_type: CHANGE_TYPE_MODIFY_DN,
                previous_dn: Some("uid=old,dc=example,dc=com".to_string()),
                change_number: Some(42),
            }
        );
    }

    #[test]
    fn test_password_expiring_decimal_string() {
        let element = control_element(PASSWORD_EXPIRING_OID, None, Some(b"86400".to_vec()));
        let controls = Control::decode_controls(&element).unwrap();
        assert_eq!(
            controls[0].data,
            ControlData::PasswordExpiring {
                seconds_until_expiration: 86400,
            }
        );
    }

    #[test]
    fn test_password_policy_warning_and_error() {
        let warning = Element::new(
            PWP_WARNING_TYPE,
            Element::new(PWP_WARNING_TIME_BEFORE_EXPIRATION, vec![0x3C]).encode(),
        );
        let error = Element::new(PWP_ERROR_TYPE, vec![0x01]);
        let value = Element::sequence(vec![warning, error]).encode();
        let element = control_element(PASSWORD_POLICY_OID, None, Some(value));
        let controls = Control::decode_controls(&element).unwrap();
        assert_eq!(
            controls[0].data,
            ControlData::PasswordPolicy {
                warning: Some(PasswordPolicyWarning::TimeBeforeExpiration(60)),
                error: Some(1),
            }
        );
    }

    #[test]
    fn test_server_sort_request() {
        let key = Element::sequence(vec![
            Element::octet_string(b"sn".to_vec()),
            Element::octet_string_with_tag(SORT_KEY_MATCHING_RULE_TYPE, b"2.5.13.3".to_vec()),
            Element::new(SORT_KEY_REVERSE_ORDER_TYPE, vec![0xFF]),
        ]);
        let value = Element::sequence(vec![key]).encode();
        let element = control_element(SERVER_SORT_REQUEST_OID, Some(false), Some(value));
        let controls = Control::decode_controls(&element).unwrap();
        assert_eq!(
            controls[0].data,
            ControlData::ServerSortRequest {
                sort_keys: vec![SortKey {
                    attribute_type: "sn".to_string(),
                    matching_rule_id: Some("2.5.13.3".to_string()),
                    reverse_order: true,
                }],
            }
        );
    }

    #[test]
    fn test_vlv_request_by_offset() {
        let value = Element::sequence(vec![
            Element::integer(0),
            Element::integer(9),
            Element::container(
                VLV_SELECT_BY_OFFSET_TYPE,
                vec![Element::integer(1), Element::integer(100)],
            ),
        ])
        .encode();
        let element = control_element(VLV_REQUEST_OID, Some(true), Some(value));
        let controls = Control::decode_controls(&element).unwrap();
        assert_eq!(
            controls[0].data,
            ControlData::VlvRequest {
                before_count: 0,
                after_count: 9,
                target: VlvTarget::ByOffset {
                    offset: 1,
                    content_count: 100,
                },
            }
        );
    }

    #[test]
    fn test_vlv_request_by_assertion() {
        let value = Element::sequence(vec![
            Element::integer(0),
            Element::integer(9),
            Element::octet_string_with_tag(VLV_SELECT_BY_ASSERTION_TYPE, b"smith".to_vec()),
        ])
        .encode();
        let element = control_element(VLV_REQUEST_OID, None, Some(value));
        let controls = Control::decode_controls(&element).unwrap();
        assert_eq!(
            controls[0].data,
            ControlData::VlvRequest {
                before_count: 0,
                after_count: 9,
                target: VlvTarget::ByAssertionValue(b"smith".to_vec()),
            }
        );
    }

    #[test]
    fn test_vlv_response() {
        let value = Element::sequence(vec![
            Element::integer(1),
            Element::integer(100),
            Element::enumerated(0),
        ])
        .encode();
        let element = control_element(VLV_RESPONSE_OID, None, Some(value));
        let controls = Control::decode_controls(&element).unwrap();
        assert_eq!(
            controls[0].data,
            ControlData::VlvResponse {
                target_position: 1,
                content_count: 100,
                result_code: 0,
            }
        );
    }

    #[test]
    fn test_proxied_auth_controls() {
        let v1_value = Element::sequence(vec![Element::octet_string(
            b"uid=proxy,dc=example,dc=com".to_vec(),
        )])
        .encode();
        let element = control_element(PROXIED_AUTH_V1_OID, Some(true), Some(v1_value));
        let controls = Control::decode_controls(&element).unwrap();
        assert_eq!(
            controls[0].data,
            ControlData::ProxiedAuthV1 {
                proxy_dn: "uid=proxy,dc=example,dc=com".to_string(),
            }
        );

        let element = control_element(
            PROXIED_AUTH_V2_OID,
            Some(true),
            Some(b"dn:uid=proxy,dc=example,dc=com".to_vec()),
        );
        let controls = Control::decode_controls(&element).unwrap();
        assert_eq!(
            controls[0].data,
            ControlData::ProxiedAuthV2 {
                authorization_id: "dn:uid=proxy,dc=example,dc=com".to_string(),
            }
        );
    }

    #[test]
    fn test_get_effective_rights() {
        let value = Element::sequence(vec![
            Element::octet_string(b"dn:uid=admin,dc=example,dc=com".to_vec()),
            Element::sequence(vec![
                Element::octet_string(b"cn".to_vec()),
                Element::octet_string(b"sn".to_vec()),
            ]),
        ])
        .encode();
        let element = control_element(GET_EFFECTIVE_RIGHTS_OID, None, Some(value));
        let controls = Control::decode_controls(&element).unwrap();
        assert_eq!(
            controls[0].data,
            ControlData::GetEffectiveRights {
                authorization_id: "dn:uid=admin,dc=example,dc=com".to_string(),
                attributes: vec!["cn".to_string(), "sn".to_string()],
            }
        );
    }

    #[test]
    fn test_multiple_controls_keep_order() {
        let element = Element::container(
            CONTROLS_TYPE,
            vec![
                Element::sequence(vec![Element::octet_string(
                    MANAGE_DSAIT_OID.as_bytes().to_vec(),
                )]),
                Element::sequence(vec![Element::octet_string(
                    AUTHORIZATION_ID_REQUEST_OID.as_bytes().to_vec(),
                )]),
            ],
        );
        let controls = Control::decode_controls(&element).unwrap();
        assert_eq!(controls.len(), 2);
        assert_eq!(controls[0].data, ControlData::ManageDsaIt);
        assert_eq!(controls[1].data, ControlData::AuthorizationIdRequest);
    }

    #[test]
    fn test_control_round_trip() {
        let control = Control {
            oid: PAGED_RESULTS_OID.to_string(),
            criticality: true,
            value: Some(vec![0x30, 0x05, 0x02, 0x01, 0x0A, 0x04, 0x00]),
            data: ControlData::Generic,
        };
        let encoded = control.to_element().encode();
        let wrapped = Element::container(CONTROLS_TYPE, vec![Element::decode(&encoded).unwrap()]);
        let decoded = Control::decode_controls(&wrapped).unwrap();
        assert_eq!(decoded[0].oid, control.oid);
        assert_eq!(decoded[0].criticality, control.criticality);
        assert_eq!(decoded[0].value, control.value);
    }
}
