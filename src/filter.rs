// LDAP search filter decoding and rendering (RFC 4511 section 4.5.1).

use crate::asn1::{BerError, Element};
use std::fmt;

pub const FILTER_TYPE_AND: u8 = 0xA0;
pub const FILTER_TYPE_OR: u8 = 0xA1;
pub const FILTER_TYPE_NOT: u8 = 0xA2;
pub const FILTER_TYPE_EQUALITY: u8 = 0xA3;
pub const FILTER_TYPE_SUBSTRING: u8 = 0xA4;
pub const FILTER_TYPE_GREATER_OR_EQUAL: u8 = 0xA5;
pub const FILTER_TYPE_LESS_OR_EQUAL: u8 = 0xA6;
pub const FILTER_TYPE_PRESENCE: u8 = 0x87;
pub const FILTER_TYPE_APPROXIMATE: u8 = 0xA8;
pub const FILTER_TYPE_EXTENSIBLE_MATCH: u8 = 0xA9;

const SUBSTRING_TYPE_INITIAL: u8 = 0x80;
const SUBSTRING_TYPE_ANY: u8 = 0x81;
const SUBSTRING_TYPE_FINAL: u8 = 0x82;

const EXTENSIBLE_TYPE_MATCHING_RULE: u8 = 0x81;
const EXTENSIBLE_TYPE_ATTRIBUTE_TYPE: u8 = 0x82;
const EXTENSIBLE_TYPE_VALUE: u8 = 0x83;
const EXTENSIBLE_TYPE_DN_ATTRIBUTES: u8 = 0x84;

/// A search filter as found in a search request. The tree mirrors the wire
/// form; rendering via `Display` produces the standard parenthesized string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchFilter {
    And(Vec<SearchFilter>),
    Or(Vec<SearchFilter>),
    Not(Box<SearchFilter>),
    Equality {
        attribute_type: String,
        value: Vec<u8>,
    },
    Substring {
        attribute_type: String,
        sub_initial: Option<Vec<u8>>,
        sub_any: Vec<Vec<u8>>,
        sub_final: Option<Vec<u8>>,
    },
    GreaterOrEqual {
        attribute_type: String,
        value: Vec<u8>,
    },
    LessOrEqual {
        attribute_type: String,
        value: Vec<u8>,
    },
    Presence {
        attribute_type: String,
    },
    Approximate {
        attribute_type: String,
        value: Vec<u8>,
    },
    ExtensibleMatch {
        matching_rule_id: Option<String>,
        attribute_type: Option<String>,
        value: Vec<u8>,
        dn_attributes: bool,
    },
}

impl SearchFilter {
    /// Decode a filter from its BER element, keyed by the context tag.
    pub fn decode(element: &Element) -> Result<SearchFilter, BerError> {
        match element.tag {
            FILTER_TYPE_AND | FILTER_TYPE_OR => {
                let mut components = Vec::new();
                for child in element.as_elements()? {
                    components.push(SearchFilter::decode(&child)?);
                }
                if element.tag == FILTER_TYPE_AND {
                    Ok(SearchFilter::And(components))
                } else {
                    Ok(SearchFilter::Or(components))
                }
            }
            FILTER_TYPE_NOT => {
                let inner = Element::decode(&element.value)?;
                Ok(SearchFilter::Not(Box::new(SearchFilter::decode(&inner)?)))
            }
            FILTER_TYPE_EQUALITY
            | FILTER_TYPE_GREATER_OR_EQUAL
            | FILTER_TYPE_LESS_OR_EQUAL
            | FILTER_TYPE_APPROXIMATE => {
                let parts = element.as_elements()?;
                if parts.len() != 2 {
                    return Err(BerError::UnexpectedElementCount {
                        expected: "2 elements in attribute value assertion",
                        got: parts.len(),
                    });
                }
                let attribute_type = parts[0].as_text();
                let value = parts[1].value.clone();
                Ok(match element.tag {
                    FILTER_TYPE_EQUALITY => SearchFilter::Equality {
                        attribute_type,
                        value,
                    },
                    FILTER_TYPE_GREATER_OR_EQUAL => SearchFilter::GreaterOrEqual {
                        attribute_type,
                        value,
                    },
                    FILTER_TYPE_LESS_OR_EQUAL => SearchFilter::LessOrEqual {
                        attribute_type,
                        value,
                    },
                    _ => SearchFilter::Approximate {
                        attribute_type,
                        value,
                    },
                })
            }
            FILTER_TYPE_SUBSTRING => {
                let parts = element.as_elements()?;
                if parts.len() != 2 {
                    return Err(BerError::UnexpectedElementCount {
                        expected: "2 elements in substring filter",
                        got: parts.len(),
                    });
                }
                let attribute_type = parts[0].as_text();
                let mut sub_initial = None;
                let mut sub_any = Vec::new();
                let mut sub_final = None;
                for sub in parts[1].as_elements()? {
                    match sub.tag {
                        SUBSTRING_TYPE_INITIAL => sub_initial = Some(sub.value),
                        SUBSTRING_TYPE_ANY => sub_any.push(sub.value),
                        SUBSTRING_TYPE_FINAL => sub_final = Some(sub.value),
                        other => {
                            return Err(BerError::UnrecognizedTagOrOid(format!(
                                "substring component tag 0x{:02X}",
                                other
                            )))
                        }
                    }
                }
                Ok(SearchFilter::Substring {
                    attribute_type,
                    sub_initial,
                    sub_any,
                    sub_final,
                })
            }
            FILTER_TYPE_PRESENCE => Ok(SearchFilter::Presence {
                attribute_type: element.as_text(),
            }),
            FILTER_TYPE_EXTENSIBLE_MATCH => {
                let mut matching_rule_id = None;
                let mut attribute_type = None;
                let mut value = Vec::new();
                let mut dn_attributes = false;
                for part in element.as_elements()? {
                    match part.tag {
                        EXTENSIBLE_TYPE_MATCHING_RULE => matching_rule_id = Some(part.as_text()),
                        EXTENSIBLE_TYPE_ATTRIBUTE_TYPE => attribute_type = Some(part.as_text()),
                        EXTENSIBLE_TYPE_VALUE => value = part.value,
                        EXTENSIBLE_TYPE_DN_ATTRIBUTES => dn_attributes = part.as_boolean()?,
                        other => {
                            return Err(BerError::UnrecognizedTagOrOid(format!(
                                "extensible match component tag 0x{:02X}",
                                other
                            )))
                        }
                    }
                }
                Ok(SearchFilter::ExtensibleMatch {
                    matching_rule_id,
                    attribute_type,
                    value,
                    dn_attributes,
                })
            }
            other => Err(BerError::UnrecognizedTagOrOid(format!(
                "filter type 0x{:02X}",
                other
            ))),
        }
    }

    pub fn to_element(&self) -> Element {
        match self {
            SearchFilter::And(components) => Element::container(
                FILTER_TYPE_AND,
                components.iter().map(|f| f.to_element()).collect(),
            ),
            SearchFilter::Or(components) => Element::container(
                FILTER_TYPE_OR,
                components.iter().map(|f| f.to_element()).collect(),
            ),
            SearchFilter::Not(inner) => {
                Element::container(FILTER_TYPE_NOT, vec![inner.to_element()])
            }
            SearchFilter::Equality {
                attribute_type,
                value,
            } => ava_element(FILTER_TYPE_EQUALITY, attribute_type, value),
            SearchFilter::GreaterOrEqual {
                attribute_type,
                value,
            } => ava_element(FILTER_TYPE_GREATER_OR_EQUAL, attribute_type, value),
            SearchFilter::LessOrEqual {
                attribute_type,
                value,
            } => ava_element(FILTER_TYPE_LESS_OR_EQUAL, attribute_type, value),
            SearchFilter::Approximate {
                attribute_type,
                value,
            } => ava_element(FILTER_TYPE_APPROXIMATE, attribute_type, value),
            SearchFilter::Substring {
                attribute_type,
                sub_initial,
                sub_any,
                sub_final,
            } => {
                let mut subs = Vec::new();
                if let Some(initial) = sub_initial {
                    subs.push(Element::octet_string_with_tag(
                        SUBSTRING_TYPE_INITIAL,
                        initial.clone(),
                    ));
                }
                for any in sub_any {
                    subs.push(Element::octet_string_with_tag(
                        SUBSTRING_TYPE_ANY,
                        any.clone(),
                    ));
                }
                if let Some(fin) = sub_final {
                    subs.push(Element::octet_string_with_tag(
                        SUBSTRING_TYPE_FINAL,
                        fin.clone(),
                    ));
                }
                Element::container(
                    FILTER_TYPE_SUBSTRING,
                    vec![
                        Element::octet_string(attribute_type.as_bytes().to_vec()),
                        Element::sequence(subs),
                    ],
                )
            }
            SearchFilter::Presence { attribute_type } => Element::octet_string_with_tag(
                FILTER_TYPE_PRESENCE,
                attribute_type.as_bytes().to_vec(),
            ),
            SearchFilter::ExtensibleMatch {
                matching_rule_id,
                attribute_type,
                value,
                dn_attributes,
            } => {
                let mut parts = Vec::new();
                if let Some(rule) = matching_rule_id {
                    parts.push(Element::octet_string_with_tag(
                        EXTENSIBLE_TYPE_MATCHING_RULE,
                        rule.as_bytes().to_vec(),
                    ));
                }
                if let Some(attr) = attribute_type {
                    parts.push(Element::octet_string_with_tag(
                        EXTENSIBLE_TYPE_ATTRIBUTE_TYPE,
                        attr.as_bytes().to_vec(),
                    ));
                }
                parts.push(Element::octet_string_with_tag(
                    EXTENSIBLE_TYPE_VALUE,
                    value.clone(),
                ));
                if *dn_attributes {
                    parts.push(Element::new(
                        EXTENSIBLE_TYPE_DN_ATTRIBUTES,
                        vec![0xFF],
                    ));
                }
                Element::container(FILTER_TYPE_EXTENSIBLE_MATCH, parts)
            }
        }
    }
}

fn ava_element(tag: u8, attribute_type: &str, value: &[u8]) -> Element {
    Element::container(
        tag,
        vec![
            Element::octet_string(attribute_type.as_bytes().to_vec()),
            Element::octet_string(value.to_vec()),
        ],
    )
}

fn text(value: &[u8]) -> String {
    String::from_utf8_lossy(value).into_owned()
}

impl fmt::Display for SearchFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchFilter::And(components) => {
                write!(f, "(&")?;
                for component in components {
                    write!(f, "{}", component)?;
                }
                write!(f, ")")
            }
            SearchFilter::Or(components) => {
                write!(f, "(|")?;
                for component in components {
                    write!(f, "{}", component)?;
                }
                write!(f, ")")
            }
            SearchFilter::Not(inner) => write!(f, "(!{})", inner),
            SearchFilter::Equality {
                attribute_type,
                value,
            } => write!(f, "({}={})", attribute_type, text(value)),
            SearchFilter::Substring {
                attribute_type,
                sub_initial,
                sub_any,
                sub_final,
            } => {
                write!(f, "({}=", attribute_type)?;
                if let Some(initial) = sub_initial {
                    write!(f, "{}", text(initial))?;
                }
                for any in sub_any {
                    write!(f, "*{}", text(any))?;
                }
                write!(f, "*")?;
                if let Some(fin) = sub_final {
                    write!(f, "{}", text(fin))?;
                }
                write!(f, ")")
            }
            SearchFilter::GreaterOrEqual {
                attribute_type,
                value,
            } => write!(f, "({}>={})", attribute_type, text(value)),
            SearchFilter::LessOrEqual {
                attribute_type,
                value,
            } => write!(f, "({}<={})", attribute_type, text(value)),
            SearchFilter::Presence { attribute_type } => write!(f, "({}=*)", attribute_type),
            SearchFilter::Approximate {
                attribute_type,
                value,
            } => write!(f, "({}~={})", attribute_type, text(value)),
            SearchFilter::ExtensibleMatch {
                matching_rule_id,
                attribute_type,
                value,
                dn_attributes,
            } => {
                write!(f, "(")?;
                if let Some(attr) = attribute_type {
                    write!(f, "{}", attr)?;
                }
                if *dn_attributes {
                    write!(f, ":dn")?;
                }
                if let Some(rule) = matching_rule_id {
                    write!(f, ":{}", rule)?;
                }
                write!(f, ":={})", text(value))
            }
        }
    }
}
