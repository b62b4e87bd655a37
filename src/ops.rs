// LDAP v3 protocol ops (RFC 4511): typed structures, decode from BER
// elements keyed by the application/context tag, and re-encode.

use crate::asn1::{BerError, Element, BOOLEAN_TYPE, ENUMERATED_TYPE, INTEGER_TYPE};
use crate::filter::SearchFilter;
use crate::message::hex_dump;

pub const BIND_REQUEST_TYPE: u8 = 0x60;
pub const BIND_RESPONSE_TYPE: u8 = 0x61;
pub const UNBIND_REQUEST_TYPE: u8 = 0x42;
pub const SEARCH_REQUEST_TYPE: u8 = 0x63;
pub const SEARCH_RESULT_ENTRY_TYPE: u8 = 0x64;
pub const SEARCH_RESULT_DONE_TYPE: u8 = 0x65;
pub const MODIFY_REQUEST_TYPE: u8 = 0x66;
pub const MODIFY_RESPONSE_TYPE: u8 = 0x67;
pub const ADD_REQUEST_TYPE: u8 = 0x68;
pub const ADD_RESPONSE_TYPE: u8 = 0x69;
pub const DELETE_REQUEST_TYPE: u8 = 0x4A;
pub const DELETE_RESPONSE_TYPE: u8 = 0x6B;
pub const MODIFY_DN_REQUEST_TYPE: u8 = 0x6C;
pub const MODIFY_DN_RESPONSE_TYPE: u8 = 0x6D;
pub const COMPARE_REQUEST_TYPE: u8 = 0x6E;
pub const COMPARE_RESPONSE_TYPE: u8 = 0x6F;
pub const ABANDON_REQUEST_TYPE: u8 = 0x50;
pub const SEARCH_RESULT_REFERENCE_TYPE: u8 = 0x73;
pub const EXTENDED_REQUEST_TYPE: u8 = 0x77;
pub const EXTENDED_RESPONSE_TYPE: u8 = 0x78;
pub const INTERMEDIATE_RESPONSE_TYPE: u8 = 0x79;

const SIMPLE_AUTH_TYPE: u8 = 0x80;
const SASL_AUTH_TYPE: u8 = 0xA3;
const SERVER_SASL_CREDENTIALS_TYPE: u8 = 0x87;
const REFERRAL_TYPE: u8 = 0xA3;
const NEW_SUPERIOR_TYPE: u8 = 0x80;
const EXTENDED_REQUEST_OID_TYPE: u8 = 0x80;
const EXTENDED_REQUEST_VALUE_TYPE: u8 = 0x81;
const EXTENDED_RESPONSE_OID_TYPE: u8 = 0x8A;
const EXTENDED_RESPONSE_VALUE_TYPE: u8 = 0x8B;
const INTERMEDIATE_OID_TYPE: u8 = 0x80;
const INTERMEDIATE_VALUE_TYPE: u8 = 0x81;

pub const SCOPE_BASE_OBJECT: i32 = 0;
pub const SCOPE_SINGLE_LEVEL: i32 = 1;
pub const SCOPE_WHOLE_SUBTREE: i32 = 2;

pub const DEREF_NEVER: i32 = 0;
pub const DEREF_IN_SEARCHING: i32 = 1;
pub const DEREF_FINDING_BASE_OBJECT: i32 = 2;
pub const DEREF_ALWAYS: i32 = 3;

/// Common result fields shared by every LDAP response op.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LdapResult {
    pub result_code: i32,
    pub matched_dn: String,
    pub error_message: String,
    pub referrals: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindAuthentication {
    Simple(String),
    Sasl {
        mechanism: String,
        credentials: Option<Vec<u8>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindRequest {
    pub version: i32,
    pub bind_dn: String,
    pub authentication: BindAuthentication,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindResponse {
    pub result: LdapResult,
    pub server_sasl_credentials: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub base_dn: String,
    pub scope: i32,
    pub deref_policy: i32,
    pub size_limit: i32,
    pub time_limit: i32,
    pub types_only: bool,
    pub filter: SearchFilter,
    pub attributes: Vec<String>,
}

/// An attribute with its values, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub attribute_type: String,
    pub values: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResultEntry {
    pub dn: String,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResultReference {
    pub referral_urls: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModificationType {
    Add,
    Delete,
    Replace,
}

impl ModificationType {
    pub fn as_i32(self) -> i32 {
        match self {
            ModificationType::Add => 0,
            ModificationType::Delete => 1,
            ModificationType::Replace => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ModificationType::Add => "add",
            ModificationType::Delete => "delete",
            ModificationType::Replace => "replace",
        }
    }

    fn from_i32(value: i32) -> Result<Self, BerError> {
        match value {
            0 => Ok(ModificationType::Add),
            1 => Ok(ModificationType::Delete),
            2 => Ok(ModificationType::Replace),
            other => Err(BerError::ValueOutOfRange(format!(
                "modification type {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    pub mod_type: ModificationType,
    pub attribute: Attribute,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyRequest {
    pub dn: String,
    pub modifications: Vec<Modification>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddRequest {
    pub dn: String,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    pub dn: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyDnRequest {
    pub dn: String,
    pub new_rdn: String,
    pub delete_old_rdn: bool,
    pub new_superior: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareRequest {
    pub dn: String,
    pub attribute_type: String,
    pub assertion_value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbandonRequest {
    pub id_to_abandon: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedRequest {
    pub oid: String,
    pub value: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedResponse {
    pub result: LdapResult,
    pub oid: Option<String>,
    pub value: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntermediateResponse {
    pub oid: Option<String>,
    pub value: Option<Vec<u8>>,
}

/// The protocol op carried inside an LDAP message envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolOp {
    BindRequest(BindRequest),
    BindResponse(BindResponse),
    UnbindRequest,
    SearchRequest(SearchRequest),
    SearchResultEntry(SearchResultEntry),
    SearchResultReference(SearchResultReference),
    SearchResultDone(LdapResult),
    ModifyRequest(ModifyRequest),
    ModifyResponse(LdapResult),
    AddRequest(AddRequest),
    AddResponse(LdapResult),
    DeleteRequest(DeleteRequest),
    DeleteResponse(LdapResult),
    ModifyDnRequest(ModifyDnRequest),
    ModifyDnResponse(LdapResult),
    CompareRequest(CompareRequest),
    CompareResponse(LdapResult),
    AbandonRequest(AbandonRequest),
    ExtendedRequest(ExtendedRequest),
    ExtendedResponse(ExtendedResponse),
    IntermediateResponse(IntermediateResponse),
}

pub fn scope_name(scope: i32) -> &'static str {
    match scope {
        SCOPE_BASE_OBJECT => "baseObject",
        SCOPE_SINGLE_LEVEL => "singleLevel",
        SCOPE_WHOLE_SUBTREE => "wholeSubtree",
        _ => "unknown",
    }
}

pub fn deref_policy_name(policy: i32) -> &'static str {
    match policy {
        DEREF_NEVER => "neverDerefAliases",
        DEREF_IN_SEARCHING => "derefInSearching",
        DEREF_FINDING_BASE_OBJECT => "derefFindingBaseObj",
        DEREF_ALWAYS => "derefAlways",
        _ => "unknown",
    }
}

fn pad(indent: usize) -> String {
    " ".repeat(indent)
}

impl LdapResult {
    /// Decode the shared result fields. `extra` receives any trailing elements
    /// the caller wants to interpret (server SASL credentials, extended OID).
    fn decode(elements: &[Element], extra: &mut Vec<Element>) -> Result<LdapResult, BerError> {
        if elements.len() < 3 {
            return Err(BerError::UnexpectedElementCount {
                expected: "at least 3 elements in LDAP result",
                got: elements.len(),
            });
        }
        let result_code = elements[0].as_enumerated()?;
        let matched_dn = elements[1].as_text();
        let error_message = elements[2].as_text();
        let mut referrals = Vec::new();
        for element in &elements[3..] {
            if element.tag == REFERRAL_TYPE {
                for url in element.as_elements()? {
                    referrals.push(url.as_text());
                }
            } else {
                extra.push(element.clone());
            }
        }
        Ok(LdapResult {
            result_code,
            matched_dn,
            error_message,
            referrals,
        })
    }

    fn to_elements(&self) -> Vec<Element> {
        let mut elements = vec![
            Element::enumerated(self.result_code),
            Element::octet_string(self.matched_dn.as_bytes().to_vec()),
            Element::octet_string(self.error_message.as_bytes().to_vec()),
        ];
        if !self.referrals.is_empty() {
            elements.push(Element::container(
                REFERRAL_TYPE,
                self.referrals
                    .iter()
                    .map(|url| Element::octet_string(url.as_bytes().to_vec()))
                    .collect(),
            ));
        }
        elements
    }

    fn to_text(&self, indent: usize) -> String {
        let p = pad(indent);
        let mut out = format!("{}Result Code:  {}\n", p, self.result_code);
        if !self.matched_dn.is_empty() {
            out.push_str(&format!("{}Matched DN:  {}\n", p, self.matched_dn));
        }
        if !self.error_message.is_empty() {
            out.push_str(&format!("{}Error Message:  {}\n", p, self.error_message));
        }
        if !self.referrals.is_empty() {
            out.push_str(&format!("{}Referral(s):\n", p));
            for referral in &self.referrals {
                out.push_str(&format!("{}    {}\n", p, referral));
            }
        }
        out
    }
}

impl Attribute {
    fn decode(element: &Element) -> Result<Attribute, BerError> {
        let parts = element.as_elements()?;
        if parts.len() != 2 {
            return Err(BerError::UnexpectedElementCount {
                expected: "2 elements in attribute",
                got: parts.len(),
            });
        }
        let attribute_type = parts[0].as_text();
        let values = parts[1]
            .as_elements()?
            .into_iter()
            .map(|v| v.value)
            .collect();
        Ok(Attribute {
            attribute_type,
            values,
        })
    }

    fn to_element(&self) -> Element {
        Element::sequence(vec![
            Element::octet_string(self.attribute_type.as_bytes().to_vec()),
            Element::set(
                self.values
                    .iter()
                    .map(|v| Element::octet_string(v.clone()))
                    .collect(),
            ),
        ])
    }

    fn to_text(&self, indent: usize) -> String {
        let p = pad(indent);
        let mut out = String::new();
        for value in &self.values {
            out.push_str(&format!(
                "{}{}: {}\n",
                p,
                self.attribute_type,
                String::from_utf8_lossy(value)
            ));
        }
        out
    }
}

impl ProtocolOp {
    /// Decode the protocol op from the second element of an LDAP message,
    /// keyed by its tag. An unknown tag is reported, never guessed at.
    pub fn decode(element: &Element) -> Result<ProtocolOp, BerError> {
        match element.tag {
            BIND_REQUEST_TYPE => decode_bind_request(element)
                .map(ProtocolOp::BindRequest)
                .map_err(|e| e.in_context("bind request")),
            BIND_RESPONSE_TYPE => decode_bind_response(element)
                .map(ProtocolOp::BindResponse)
                .map_err(|e| e.in_context("bind response")),
            UNBIND_REQUEST_TYPE => Ok(ProtocolOp::UnbindRequest),
            SEARCH_REQUEST_TYPE => decode_search_request(element)
                .map(ProtocolOp::SearchRequest)
                .map_err(|e| e.in_context("search request")),
            SEARCH_RESULT_ENTRY_TYPE => decode_search_result_entry(element)
                .map(ProtocolOp::SearchResultEntry)
                .map_err(|e| e.in_context("search result entry")),
            SEARCH_RESULT_REFERENCE_TYPE => decode_search_result_reference(element)
                .map(ProtocolOp::SearchResultReference)
                .map_err(|e| e.in_context("search result reference")),
            SEARCH_RESULT_DONE_TYPE => decode_result_only(element)
                .map(ProtocolOp::SearchResultDone)
                .map_err(|e| e.in_context("search result done")),
            MODIFY_REQUEST_TYPE => decode_modify_request(element)
                .map(ProtocolOp::ModifyRequest)
                .map_err(|e| e.in_context("modify request")),
            MODIFY_RESPONSE_TYPE => decode_result_only(element)
                .map(ProtocolOp::ModifyResponse)
                .map_err(|e| e.in_context("modify response")),
            ADD_REQUEST_TYPE => decode_add_request(element)
                .map(ProtocolOp::AddRequest)
                .map_err(|e| e.in_context("add request")),
            ADD_RESPONSE_TYPE => decode_result_only(element)
                .map(ProtocolOp::AddResponse)
                .map_err(|e| e.in_context("add response")),
            DELETE_REQUEST_TYPE => Ok(ProtocolOp::DeleteRequest(DeleteRequest {
                dn: element.as_text(),
            })),
            DELETE_RESPONSE_TYPE => decode_result_only(element)
                .map(ProtocolOp::DeleteResponse)
                .map_err(|e| e.in_context("delete response")),
            MODIFY_DN_REQUEST_TYPE => decode_modify_dn_request(element)
                .map(ProtocolOp::ModifyDnRequest)
                .map_err(|e| e.in_context("modify DN request")),
            MODIFY_DN_RESPONSE_TYPE => decode_result_only(element)
                .map(ProtocolOp::ModifyDnResponse)
                .map_err(|e| e.in_context("modify DN response")),
            COMPARE_REQUEST_TYPE => decode_compare_request(element)
                .map(ProtocolOp::CompareRequest)
                .map_err(|e| e.in_context("compare request")),
            COMPARE_RESPONSE_TYPE => decode_result_only(element)
                .map(ProtocolOp::CompareResponse)
                .map_err(|e| e.in_context("compare response")),
            ABANDON_REQUEST_TYPE => {
                let id_to_abandon = element
                    .as_integer()
                    .map_err(|e| e.in_context("abandon request"))?;
                Ok(ProtocolOp::AbandonRequest(AbandonRequest { id_to_abandon }))
            }
            EXTENDED_REQUEST_TYPE => decode_extended_request(element)
                .map(ProtocolOp::ExtendedRequest)
                .map_err(|e| e.in_context("extended request")),
            EXTENDED_RESPONSE_TYPE => decode_extended_response(element)
                .map(ProtocolOp::ExtendedResponse)
                .map_err(|e| e.in_context("extended response")),
            INTERMEDIATE_RESPONSE_TYPE => decode_intermediate_response(element)
                .map(ProtocolOp::IntermediateResponse)
                .map_err(|e| e.in_context("intermediate response")),
            other => Err(BerError::UnrecognizedTagOrOid(format!(
                "unrecognized protocol op type 0x{:02X}",
                other
            ))),
        }
    }

    pub fn to_element(&self) -> Element {
        match self {
            ProtocolOp::BindRequest(op) => {
                let auth = match &op.authentication {
                    BindAuthentication::Simple(password) => Element::octet_string_with_tag(
                        SIMPLE_AUTH_TYPE,
                        password.as_bytes().to_vec(),
                    ),
                    BindAuthentication::Sasl {
                        mechanism,
                        credentials,
                    } => {
                        let mut parts =
                            vec![Element::octet_string(mechanism.as_bytes().to_vec())];
                        if let Some(credentials) = credentials {
                            parts.push(Element::octet_string(credentials.clone()));
                        }
                        Element::container(SASL_AUTH_TYPE, parts)
                    }
                };
                Element::container(
                    BIND_REQUEST_TYPE,
                    vec![
                        Element::integer(op.version),
                        Element::octet_string(op.bind_dn.as_bytes().to_vec()),
                        auth,
                    ],
                )
            }
            ProtocolOp::BindResponse(op) => {
                let mut elements = op.result.to_elements();
                if let Some(credentials) = &op.server_sasl_credentials {
                    elements.push(Element::octet_string_with_tag(
                        SERVER_SASL_CREDENTIALS_TYPE,
                        credentials.clone(),
                    ));
                }
                Element::container(BIND_RESPONSE_TYPE, elements)
            }
            ProtocolOp::UnbindRequest => Element::new(UNBIND_REQUEST_TYPE, Vec::new()),
            ProtocolOp::SearchRequest(op) => Element::container(
                SEARCH_REQUEST_TYPE,
                vec![
                    Element::octet_string(op.base_dn.as_bytes().to_vec()),
                    Element::enumerated(op.scope),
                    Element::enumerated(op.deref_policy),
                    Element::integer(op.size_limit),
                    Element::integer(op.time_limit),
                    Element::boolean(op.types_only),
                    op.filter.to_element(),
                    Element::sequence(
                        op.attributes
                            .iter()
                            .map(|a| Element::octet_string(a.as_bytes().to_vec()))
                            .collect(),
                    ),
                ],
            ),
            ProtocolOp::SearchResultEntry(op) => Element::container(
                SEARCH_RESULT_ENTRY_TYPE,
                vec![
                    Element::octet_string(op.dn.as_bytes().to_vec()),
                    Element::sequence(op.attributes.iter().map(|a| a.to_element()).collect()),
                ],
            ),
            ProtocolOp::SearchResultReference(op) => Element::container(
                SEARCH_RESULT_REFERENCE_TYPE,
                op.referral_urls
                    .iter()
                    .map(|url| Element::octet_string(url.as_bytes().to_vec()))
                    .collect(),
            ),
            ProtocolOp::SearchResultDone(result) => {
                Element::container(SEARCH_RESULT_DONE_TYPE, result.to_elements())
            }
            ProtocolOp::ModifyRequest(op) => Element::container(
                MODIFY_REQUEST_TYPE,
                vec![
                    Element::octet_string(op.dn.as_bytes().to_vec()),
                    Element::sequence(
                        op.modifications
                            .iter()
                            .map(|m| {
                                Element::sequence(vec![
                                    Element::enumerated(m.mod_type.as_i32()),
                                    m.attribute.to_element(),
                                ])
                            })
                            .collect(),
                    ),
                ],
            ),
            ProtocolOp::ModifyResponse(result) => {
                Element::container(MODIFY_RESPONSE_TYPE, result.to_elements())
            }
            ProtocolOp::AddRequest(op) => Element::container(
                ADD_REQUEST_TYPE,
                vec![
                    Element::octet_string(op.dn.as_bytes().to_vec()),
                    Element::sequence(op.attributes.iter().map(|a| a.to_element()).collect()),
                ],
            ),
            ProtocolOp::AddResponse(result) => {
                Element::container(ADD_RESPONSE_TYPE, result.to_elements())
            }
            ProtocolOp::DeleteRequest(op) => {
                Element::octet_string_with_tag(DELETE_REQUEST_TYPE, op.dn.as_bytes().to_vec())
            }
            ProtocolOp::DeleteResponse(result) => {
                Element::container(DELETE_RESPONSE_TYPE, result.to_elements())
            }
            ProtocolOp::ModifyDnRequest(op) => {
                let mut elements = vec![
                    Element::octet_string(op.dn.as_bytes().to_vec()),
                    Element::octet_string(op.new_rdn.as_bytes().to_vec()),
                    Element::boolean(op.delete_old_rdn),
                ];
                if let Some(new_superior) = &op.new_superior {
                    elements.push(Element::octet_string_with_tag(
                        NEW_SUPERIOR_TYPE,
                        new_superior.as_bytes().to_vec(),
                    ));
                }
                Element::container(MODIFY_DN_REQUEST_TYPE, elements)
            }
            ProtocolOp::ModifyDnResponse(result) => {
                Element::container(MODIFY_DN_RESPONSE_TYPE, result.to_elements())
            }
            ProtocolOp::CompareRequest(op) => Element::container(
                COMPARE_REQUEST_TYPE,
                vec![
                    Element::octet_string(op.dn.as_bytes().to_vec()),
                    Element::sequence(vec![
                        Element::octet_string(op.attribute_type.as_bytes().to_vec()),
                        Element::octet_string(op.assertion_value.clone()),
                    ]),
                ],
            ),
            ProtocolOp::CompareResponse(result) => {
                Element::container(COMPARE_RESPONSE_TYPE, result.to_elements())
            }
            ProtocolOp::AbandonRequest(op) => {
                let value = Element::integer(op.id_to_abandon).value;
                Element::new(ABANDON_REQUEST_TYPE, value)
            }
            ProtocolOp::ExtendedRequest(op) => {
                let mut elements = vec![Element::octet_string_with_tag(
                    EXTENDED_REQUEST_OID_TYPE,
                    op.oid.as_bytes().to_vec(),
                )];
                if let Some(value) = &op.value {
                    elements.push(Element::octet_string_with_tag(
                        EXTENDED_REQUEST_VALUE_TYPE,
                        value.clone(),
                    ));
                }
                Element::container(EXTENDED_REQUEST_TYPE, elements)
            }
            ProtocolOp::ExtendedResponse(op) => {
                let mut elements = op.result.to_elements();
                if let Some(oid) = &op.oid {
                    elements.push(Element::octet_string_with_tag(
                        EXTENDED_RESPONSE_OID_TYPE,
                        oid.as_bytes().to_vec(),
                    ));
                }
                if let Some(value) = &op.value {
                    elements.push(Element::octet_string_with_tag(
                        EXTENDED_RESPONSE_VALUE_TYPE,
                        value.clone(),
                    ));
                }
                Element::container(EXTENDED_RESPONSE_TYPE, elements)
            }
            ProtocolOp::IntermediateResponse(op) => {
                let mut elements = Vec::new();
                if let Some(oid) = &op.oid {
                    elements.push(Element::octet_string_with_tag(
                        INTERMEDIATE_OID_TYPE,
                        oid.as_bytes().to_vec(),
                    ));
                }
                if let Some(value) = &op.value {
                    elements.push(Element::octet_string_with_tag(
                        INTERMEDIATE_VALUE_TYPE,
                        value.clone(),
                    ));
                }
                Element::container(INTERMEDIATE_RESPONSE_TYPE, elements)
            }
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ProtocolOp::BindRequest(_) => "LDAP Bind Request",
            ProtocolOp::BindResponse(_) => "LDAP Bind Response",
            ProtocolOp::UnbindRequest => "LDAP Unbind Request",
            ProtocolOp::SearchRequest(_) => "LDAP Search Request",
            ProtocolOp::SearchResultEntry(_) => "LDAP Search Result Entry",
            ProtocolOp::SearchResultReference(_) => "LDAP Search Result Reference",
            ProtocolOp::SearchResultDone(_) => "LDAP Search Result Done",
            ProtocolOp::ModifyRequest(_) => "LDAP Modify Request",
            ProtocolOp::ModifyResponse(_) => "LDAP Modify Response",
            ProtocolOp::AddRequest(_) => "LDAP Add Request",
            ProtocolOp::AddResponse(_) => "LDAP Add Response",
            ProtocolOp::DeleteRequest(_) => "LDAP Delete Request",
            ProtocolOp::DeleteResponse(_) => "LDAP Delete Response",
            ProtocolOp::ModifyDnRequest(_) => "LDAP Modify DN Request",
            ProtocolOp::ModifyDnResponse(_) => "LDAP Modify DN Response",
            ProtocolOp::CompareRequest(_) => "LDAP Compare Request",
            ProtocolOp::CompareResponse(_) => "LDAP Compare Response",
            ProtocolOp::AbandonRequest(_) => "LDAP Abandon Request",
            ProtocolOp::ExtendedRequest(_) => "LDAP Extended Request",
            ProtocolOp::ExtendedResponse(_) => "LDAP Extended Response",
            ProtocolOp::IntermediateResponse(_) => "LDAP Intermediate Response",
        }
    }

    /// Indented multi-line rendering for the decode log.
    pub fn to_text(&self, indent: usize) -> String {
        let p = pad(indent);
        match self {
            ProtocolOp::BindRequest(op) => {
                let mut out = format!("{}LDAP Version:  {}\n", p, op.version);
                out.push_str(&format!("{}Bind DN:  {}\n", p, op.bind_dn));
                out.push_str(&format!("{}Authentication Data:\n", p));
                match &op.authentication {
                    BindAuthentication::Simple(password) => {
                        out.push_str(&format!("{}    Authentication Type:  Simple\n", p));
                        out.push_str(&format!("{}    Bind Password:  {}\n", p, password));
                    }
                    BindAuthentication::Sasl {
                        mechanism,
                        credentials,
                    } => {
                        out.push_str(&format!("{}    Authentication Type:  SASL\n", p));
                        out.push_str(&format!("{}    SASL Mechanism:  {}\n", p, mechanism));
                        if let Some(credentials) = credentials {
                            out.push_str(&format!("{}    SASL Credentials:\n", p));
                            out.push_str(&hex_dump(credentials, indent + 8));
                        }
                    }
                }
                out
            }
            ProtocolOp::BindResponse(op) => {
                let mut out = op.result.to_text(indent);
                if let Some(credentials) = &op.server_sasl_credentials {
                    out.push_str(&format!("{}Server SASL Credentials:\n", p));
                    out.push_str(&hex_dump(credentials, indent + 4));
                }
                out
            }
            ProtocolOp::UnbindRequest => String::new(),
            ProtocolOp::SearchRequest(op) => {
                let mut out = format!("{}Base DN:  {}\n", p, op.base_dn);
                out.push_str(&format!("{}Scope:  {}\n", p, scope_name(op.scope)));
                out.push_str(&format!(
                    "{}Deref Policy:  {}\n",
                    p,
                    deref_policy_name(op.deref_policy)
                ));
                out.push_str(&format!("{}Size Limit:  {}\n", p, op.size_limit));
                out.push_str(&format!("{}Time Limit:  {}\n", p, op.time_limit));
                out.push_str(&format!("{}Types Only:  {}\n", p, op.types_only));
                out.push_str(&format!("{}Filter:  {}\n", p, op.filter));
                if !op.attributes.is_empty() {
                    out.push_str(&format!("{}Attributes to Return:\n", p));
                    for attribute in &op.attributes {
                        out.push_str(&format!("{}    {}\n", p, attribute));
                    }
                }
                out
            }
            ProtocolOp::SearchResultEntry(op) => {
                let mut out = format!("{}Entry DN:  {}\n", p, op.dn);
                if !op.attributes.is_empty() {
                    out.push_str(&format!("{}Attributes:\n", p));
                    for attribute in &op.attributes {
                        out.push_str(&attribute.to_text(indent + 4));
                    }
                }
                out
            }
            ProtocolOp::SearchResultReference(op) => {
                let mut out = format!("{}Referral URL(s):\n", p);
                for url in &op.referral_urls {
                    out.push_str(&format!("{}    {}\n", p, url));
                }
                out
            }
            ProtocolOp::SearchResultDone(result)
            | ProtocolOp::ModifyResponse(result)
            | ProtocolOp::AddResponse(result)
            | ProtocolOp::DeleteResponse(result)
            | ProtocolOp::ModifyDnResponse(result)
            | ProtocolOp::CompareResponse(result) => result.to_text(indent),
            ProtocolOp::ModifyRequest(op) => {
                let mut out = format!("{}Entry DN:  {}\n", p, op.dn);
                out.push_str(&format!("{}Modifications:\n", p));
                for modification in &op.modifications {
                    out.push_str(&format!(
                        "{}    {}: {}\n",
                        p,
                        modification.mod_type.name(),
                        modification.attribute.attribute_type
                    ));
                    out.push_str(&modification.attribute.to_text(indent + 8));
                }
                out
            }
            ProtocolOp::AddRequest(op) => {
                let mut out = format!("{}Entry DN:  {}\n", p, op.dn);
                out.push_str(&format!("{}Attributes:\n", p));
                for attribute in &op.attributes {
                    out.push_str(&attribute.to_text(indent + 4));
                }
                out
            }
            ProtocolOp::DeleteRequest(op) => format!("{}Entry DN:  {}\n", p, op.dn),
            ProtocolOp::ModifyDnRequest(op) => {
                let mut out = format!("{}Entry DN:  {}\n", p, op.dn);
                out.push_str(&format!("{}New RDN:  {}\n", p, op.new_rdn));
                out.push_str(&format!("{}Delete Old RDN:  {}\n", p, op.delete_old_rdn));
                if let Some(new_superior) = &op.new_superior {
                    out.push_str(&format!("{}New Superior:  {}\n", p, new_superior));
                }
                out
            }
            ProtocolOp::CompareRequest(op) => {
                let mut out = format!("{}Entry DN:  {}\n", p, op.dn);
                out.push_str(&format!("{}Attribute Type:  {}\n", p, op.attribute_type));
                out.push_str(&format!(
                    "{}Assertion Value:  {}\n",
                    p,
                    String::from_utf8_lossy(&op.assertion_value)
                ));
                out
            }
            ProtocolOp::AbandonRequest(op) => {
                format!("{}ID to Abandon:  {}\n", p, op.id_to_abandon)
            }
            ProtocolOp::ExtendedRequest(op) => {
                let mut out = format!("{}Request OID:  {}\n", p, op.oid);
                if let Some(value) = &op.value {
                    out.push_str(&format!("{}Request Value:\n", p));
                    out.push_str(&hex_dump(value, indent + 4));
                }
                out
            }
            ProtocolOp::ExtendedResponse(op) => {
                let mut out = op.result.to_text(indent);
                if let Some(oid) = &op.oid {
                    out.push_str(&format!("{}Response OID:  {}\n", p, oid));
                }
                if let Some(value) = &op.value {
                    out.push_str(&format!("{}Response Value:\n", p));
                    out.push_str(&hex_dump(value, indent + 4));
                }
                out
            }
            ProtocolOp::IntermediateResponse(op) => {
                let mut out = String::new();
                if let Some(oid) = &op.oid {
                    out.push_str(&format!("{}Response OID:  {}\n", p, oid));
                }
                if let Some(value) = &op.value {
                    out.push_str(&format!("{}Response Value:\n", p));
                    out.push_str(&hex_dump(value, indent + 4));
                }
                out
            }
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(
            self,
            ProtocolOp::BindRequest(_)
                | ProtocolOp::UnbindRequest
                | ProtocolOp::SearchRequest(_)
                | ProtocolOp::ModifyRequest(_)
                | ProtocolOp::AddRequest(_)
                | ProtocolOp::DeleteRequest(_)
                | ProtocolOp::ModifyDnRequest(_)
                | ProtocolOp::CompareRequest(_)
                | ProtocolOp::AbandonRequest(_)
                | ProtocolOp::ExtendedRequest(_)
        )
    }
}

fn decode_bind_request(element: &Element) -> Result<BindRequest, BerError> {
    let parts = element.as_elements()?;
    if parts.len() != 3 {
        return Err(BerError::UnexpectedElementCount {
            expected: "3 elements in bind request",
            got: parts.len(),
        });
    }
    if parts[0].tag != INTEGER_TYPE {
        return Err(BerError::UnrecognizedTagOrOid(format!(
            "bind version tag 0x{:02X}",
            parts[0].tag
        )));
    }
    let version = parts[0].as_integer()?;
    let bind_dn = parts[1].as_text();
    let authentication = match parts[2].tag {
        SIMPLE_AUTH_TYPE => BindAuthentication::Simple(parts[2].as_text()),
        SASL_AUTH_TYPE => {
            let sasl_parts = parts[2].as_elements()?;
            if sasl_parts.is_empty() || sasl_parts.len() > 2 {
                return Err(BerError::UnexpectedElementCount {
                    expected: "1 or 2 elements in SASL credentials",
                    got: sasl_parts.len(),
                });
            }
            BindAuthentication::Sasl {
                mechanism: sasl_parts[0].as_text(),
                credentials: sasl_parts.get(1).map(|c| c.value.clone()),
            }
        }
        other => {
            return Err(BerError::UnrecognizedTagOrOid(format!(
                "bind authentication tag 0x{:02X}",
                other
            )))
        }
    };
    Ok(BindRequest {
        version,
        bind_dn,
        authentication,
    })
}

fn decode_bind_response(element: &Element) -> Result<BindResponse, BerError> {
    let parts = element.as_elements()?;
    let mut extra = Vec::new();
    let result = LdapResult::decode(&parts, &mut extra)?;
    let mut server_sasl_credentials = None;
    for element in extra {
        if element.tag == SERVER_SASL_CREDENTIALS_TYPE {
            server_sasl_credentials = Some(element.value);
        } else {
            return Err(BerError::UnrecognizedTagOrOid(format!(
                "bind response element tag 0x{:02X}",
                element.tag
            )));
        }
    }
    Ok(BindResponse {
        result,
        server_sasl_credentials,
    })
}

fn decode_result_only(element: &Element) -> Result<LdapResult, BerError> {
    let parts = element.as_elements()?;
    let mut extra = Vec::new();
    let result = LdapResult::decode(&parts, &mut extra)?;
    if let Some(unexpected) = extra.first() {
        return Err(BerError::UnrecognizedTagOrOid(format!(
            "result element tag 0x{:02X}",
            unexpected.tag
        )));
    }
    Ok(result)
}

fn decode_search_request(element: &Element) -> Result<SearchRequest, BerError> {
    let parts = element.as_elements()?;
    if parts.len() != 8 {
        return Err(BerError::UnexpectedElementCount {
            expected: "8 elements in search request",
            got: parts.len(),
        });
    }
    if parts[1].tag != ENUMERATED_TYPE || parts[2].tag != ENUMERATED_TYPE {
        return Err(BerError::UnrecognizedTagOrOid(
            "search scope and deref policy must be enumerated".to_string(),
        ));
    }
    if parts[5].tag != BOOLEAN_TYPE {
        return Err(BerError::UnrecognizedTagOrOid(format!(
            "typesOnly tag 0x{:02X}",
            parts[5].tag
        )));
    }
    Ok(SearchRequest {
        base_dn: parts[0].as_text(),
        // scope values outside the standard three are kept as-is; rendering
        // falls back to the raw number
        scope: parts[1].as_enumerated()?,
        deref_policy: parts[2].as_enumerated()?,
        size_limit: parts[3].as_integer()?,
        time_limit: parts[4].as_integer()?,
        types_only: parts[5].as_boolean()?,
        filter: SearchFilter::decode(&parts[6])?,
        attributes: parts[7]
            .as_elements()?
            .into_iter()
            .map(|a| a.as_text())
            .collect(),
    })
}

fn decode_search_result_entry(element: &Element) -> Result<SearchResultEntry, BerError> {
    let parts = element.as_elements()?;
    if parts.len() != 2 {
        return Err(BerError::UnexpectedElementCount {
            expected: "2 elements in search result entry",
            got: parts.len(),
        });
    }
    let mut attributes = Vec::new();
    for attribute in parts[1].as_elements()? {
        attributes.push(Attribute::decode(&attribute)?);
    }
    Ok(SearchResultEntry {
        dn: parts[0].as_text(),
        attributes,
    })
}

fn decode_search_result_reference(
    element: &Element,
) -> Result<SearchResultReference, BerError> {
    let referral_urls = element
        .as_elements()?
        .into_iter()
        .map(|url| url.as_text())
        .collect::<Vec<_>>();
    if referral_urls.is_empty() {
        return Err(BerError::UnexpectedElementCount {
            expected: "at least 1 referral URL",
            got: 0,
        });
    }
    Ok(SearchResultReference { referral_urls })
}

fn decode_modify_request(element: &Element) -> Result<ModifyRequest, BerError> {
    let parts = element.as_elements()?;
    if parts.len() != 2 {
        return Err(BerError::UnexpectedElementCount {
            expected: "2 elements in modify request",
            got: parts.len(),
        });
    }
    let mut modifications = Vec::new();
    for change in parts[1].as_elements()? {
        let change_parts = change.as_elements()?;
        if change_parts.len() != 2 {
            return Err(BerError::UnexpectedElementCount {
                expected: "2 elements in modification",
                got: change_parts.len(),
            });
        }
        modifications.push(Modification {
            mod_type: ModificationType::from_i32(change_parts[0].as_enumerated()?)?,
            attribute: Attribute::decode(&change_parts[1])?,
        });
    }
    Ok(ModifyRequest {
        dn: parts[0].as_text(),
        modifications,
    })
}

fn decode_add_request(element: &Element) -> Result<AddRequest, BerError> {
    let parts = element.as_elements()?;
    if parts.len() != 2 {
        return Err(BerError::UnexpectedElementCount {
            expected: "2 elements in add request",
            got: parts.len(),
        });
    }
    let mut attributes = Vec::new();
    for attribute in parts[1].as_elements()? {
        attributes.push(Attribute::decode(&attribute)?);
    }
    Ok(AddRequest {
        dn: parts[0].as_text(),
        attributes,
    })
}

fn decode_modify_dn_request(element: &Element) -> Result<ModifyDnRequest, BerError> {
    let parts = element.as_elements()?;
    if parts.len() < 3 || parts.len() > 4 {
        return Err(BerError::UnexpectedElementCount {
            expected: "3 or 4 elements in modify DN request",
            got: parts.len(),
        });
    }
    let new_superior = match parts.get(3) {
        Some(element) if element.tag == NEW_SUPERIOR_TYPE => Some(element.as_text()),
        Some(element) => {
            return Err(BerError::UnrecognizedTagOrOid(format!(
                "modify DN element tag 0x{:02X}",
                element.tag
            )))
        }
        None => None,
    };
    Ok(ModifyDnRequest {
        dn: parts[0].as_text(),
        new_rdn: parts[1].as_text(),
        delete_old_rdn: parts[2].as_boolean()?,
        new_superior,
    })
}

fn decode_compare_request(element: &Element) -> Result<CompareRequest, BerError> {
    let parts = element.as_elements()?;
    if parts.len() != 2 {
        return Err(BerError::UnexpectedElementCount {
            expected: "2 elements in compare request",
            got: parts.len(),
        });
    }
    let ava = parts[1].as_elements()?;
    if ava.len() != 2 {
        return Err(BerError::UnexpectedElementCount {
            expected: "2 elements in attribute value assertion",
            got: ava.len(),
        });
    }
    Ok(CompareRequest {
        dn: parts[0].as_text(),
        attribute_type: ava[0].as_text(),
        assertion_value: ava[1].value.clone(),
    })
}

fn decode_extended_request(element: &Element) -> Result<ExtendedRequest, BerError> {
    let parts = element.as_elements()?;
    if parts.is_empty() || parts.len() > 2 {
        return Err(BerError::UnexpectedElementCount {
            expected: "1 or 2 elements in extended request",
            got: parts.len(),
        });
    }
    if parts[0].tag != EXTENDED_REQUEST_OID_TYPE {
        return Err(BerError::UnrecognizedTagOrOid(format!(
            "extended request OID tag 0x{:02X}",
            parts[0].tag
        )));
    }
    Ok(ExtendedRequest {
        oid: parts[0].as_text(),
        value: parts.get(1).map(|v| v.value.clone()),
    })
}

fn decode_extended_response(element: &Element) -> Result<ExtendedResponse, BerError> {
    let parts = element.as_elements()?;
    let mut extra = Vec::new();
    let result = LdapResult::decode(&parts, &mut extra)?;
    let mut oid = None;
    let mut value = None;
    for element in extra {
        match element.tag {
            EXTENDED_RESPONSE_OID_TYPE => oid = Some(element.as_text()),
            EXTENDED_RESPONSE_VALUE_TYPE => value = Some(element.value),
            other => {
                return Err(BerError::UnrecognizedTagOrOid(format!(
                    "extended response element tag 0x{:02X}",
                    other
                )))
            }
        }
    }
    Ok(ExtendedResponse { result, oid, value })
}

fn decode_intermediate_response(element: &Element) -> Result<IntermediateResponse, BerError> {
    let mut oid = None;
    let mut value = None;
    for part in element.as_elements()? {
        match part.tag {
            INTERMEDIATE_OID_TYPE => oid = Some(part.as_text()),
            INTERMEDIATE_VALUE_TYPE => value = Some(part.value),
            other => {
                return Err(BerError::UnrecognizedTagOrOid(format!(
                    "intermediate response element tag 0x{:02X}",
                    other
                )))
            }
        }
    }
    Ok(IntermediateResponse { oid, value })
}
