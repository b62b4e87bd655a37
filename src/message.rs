// The LDAP message envelope: message ID, protocol op, and optional controls.

use crate::asn1::{BerError, Element, SEQUENCE_TYPE};
use crate::controls::{Control, CONTROLS_TYPE};
use crate::ops::ProtocolOp;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapMessage {
    pub message_id: i32,
    pub protocol_op: ProtocolOp,
    pub controls: Vec<Control>,
}

impl LdapMessage {
    pub fn new(message_id: i32, protocol_op: ProtocolOp) -> LdapMessage {
        LdapMessage {
            message_id,
            protocol_op,
            controls: Vec::new(),
        }
    }

    /// Decode a full message from a top-level sequence element.
    pub fn decode(element: &Element) -> Result<LdapMessage, BerError> {
        if element.tag != SEQUENCE_TYPE {
            return Err(BerError::MalformedTagOrLength(format!(
                "message envelope tag 0x{:02X}",
                element.tag
            )));
        }
        let parts = element.as_elements()?;
        if parts.len() < 2 || parts.len() > 3 {
            return Err(BerError::UnexpectedElementCount {
                expected: "2 or 3 elements in LDAP message",
                got: parts.len(),
            });
        }
        let message_id = parts[0].as_integer().map_err(|e| e.in_context("message ID"))?;
        let protocol_op = ProtocolOp::decode(&parts[1])?;
        let controls = match parts.get(2) {
            Some(element) if element.tag == CONTROLS_TYPE => Control::decode_controls(element)
                .map_err(|e| e.in_context("controls"))?,
            Some(element) => {
                return Err(BerError::UnrecognizedTagOrOid(format!(
                    "message trailer tag 0x{:02X}",
                    element.tag
                )))
            }
            None => Vec::new(),
        };
        Ok(LdapMessage {
            message_id,
            protocol_op,
            controls,
        })
    }

    /// Convenience wrapper for raw bytes off the wire.
    pub fn decode_bytes(bytes: &[u8]) -> Result<LdapMessage, BerError> {
        LdapMessage::decode(&Element::decode(bytes)?)
    }

    pub fn to_element(&self) -> Element {
        let mut parts = vec![
            Element::integer(self.message_id),
            self.protocol_op.to_element(),
        ];
        if !self.controls.is_empty() {
            parts.push(Element::container(
                CONTROLS_TYPE,
                self.controls.iter().map(|c| c.to_element()).collect(),
            ));
        }
        Element::sequence(parts)
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_element().encode()
    }

    /// Indented multi-line rendering for the decode log.
    pub fn to_text(&self, indent: usize) -> String {
        let p = " ".repeat(indent);
        let kind = self.protocol_op.kind_name();
        let mut out = format!("{}{}\n", p, kind);
        out.push_str(&format!("{}    Message ID:  {}\n", p, self.message_id));
        out.push_str(&format!("{}    {} Protocol Op\n", p, kind));
        out.push_str(&self.protocol_op.to_text(indent + 8));
        for control in &self.controls {
            out.push_str(&control.to_text(indent + 4));
        }
        out
    }
}

/// Render bytes as an indented hex dump, 16 per line, with the printable
/// ASCII alongside and a gap after the eighth byte of each row.
pub fn hex_dump(bytes: &[u8], indent: usize) -> String {
    let p = " ".repeat(indent);
    let mut out = String::new();
    for chunk in bytes.chunks(16) {
        let mut hex = String::new();
        let mut ascii = String::new();
        for (i, byte) in chunk.iter().enumerate() {
            if i == 8 {
                hex.push(' ');
                ascii.push(' ');
            }
            hex.push_str(&format!("{:02X} ", byte));
            if (0x20..0x7F).contains(byte) {
                ascii.push(*byte as char);
            } else {
                ascii.push('.');
            }
        }
        for i in chunk.len()..16 {
            if i == 8 {
                hex.push(' ');
            }
            hex.push_str("   ");
        }
        out.push_str(&format!("{}{} {}\n", p, hex, ascii));
    }
    out
}
