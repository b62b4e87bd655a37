// SLAMD job script generation. Captured client requests become replayable
// script statements; responses become comment-only blocks so the script
// records the full exchange.

use std::io::Write;
use std::sync::Mutex;

use anyhow::Context;
use chrono::Local;

use crate::message::LdapMessage;
use crate::ops::{
    BindAuthentication, LdapResult, ModificationType, ProtocolOp, DEREF_ALWAYS,
    DEREF_FINDING_BASE_OBJECT, DEREF_IN_SEARCHING, DEREF_NEVER, SCOPE_BASE_OBJECT,
    SCOPE_SINGLE_LEVEL, SCOPE_WHOLE_SUBTREE,
};

/// Serialized writer for the generated script so blocks from concurrent
/// sessions never interleave.
pub struct ScriptSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl ScriptSink {
    pub fn new(writer: Box<dyn Write + Send>) -> ScriptSink {
        ScriptSink {
            writer: Mutex::new(writer),
        }
    }

    pub fn write_preamble(&self, host: &str, port: u16, use_ssl: bool) -> anyhow::Result<()> {
        self.write_block(&preamble(host, port, use_ssl))
    }

    pub fn record(&self, message: &LdapMessage) -> anyhow::Result<()> {
        self.write_block(&script_block(message, &timestamp()))
    }

    fn write_block(&self, block: &str) -> anyhow::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("script writer lock poisoned"))?;
        writer
            .write_all(block.as_bytes())
            .and_then(|_| writer.flush())
            .context("failed to write to script file")
    }
}

fn timestamp() -> String {
    Local::now().format("%a %b %d %H:%M:%S %Y").to_string()
}

/// Header of the generated script: imports, variable declarations, script
/// arguments, and the guarded connect.
pub fn preamble(host: &str, port: u16, use_ssl: bool) -> String {
    let mut out = String::new();
    out.push_str("# This script was dynamically generated by the SLAMD-style LDAP decoder.\n");
    out.push_str(&format!("# Generation Date:  {}\n\n\n", timestamp()));

    out.push_str("# Make the LDAP data types available for use.\n");
    out.push_str("use com.slamd.scripting.ldap.LDAPAttributeVariable;\n");
    out.push_str("use com.slamd.scripting.ldap.LDAPConnectionVariable;\n");
    out.push_str("use com.slamd.scripting.ldap.LDAPEntryVariable;\n");
    out.push_str("use com.slamd.scripting.ldap.LDAPModificationVariable;\n");
    out.push_str("use com.slamd.scripting.ldap.LDAPModificationSetVariable;\n\n\n");

    out.push_str("# Define the variables that we will use.\n");
    out.push_str("variable boolean             useSSL;\n");
    out.push_str("variable int                 resultCode;\n");
    out.push_str("variable int                 port;\n");
    out.push_str("variable LDAPConnection      conn;\n");
    out.push_str("variable LDAPEntry           entry;\n");
    out.push_str("variable LDAPModification    mod;\n");
    out.push_str("variable LDAPModificationSet modSet;\n");
    out.push_str("variable string              bindDN;\n");
    out.push_str("variable string              bindPW;\n");
    out.push_str("variable string              host;\n");
    out.push_str("variable string              message;\n");
    out.push_str("variable StringArray         searchAttrs;\n\n\n");

    out.push_str("# Read the values of all the configuration arguments.\n");
    out.push_str(&format!(
        "host   = script.getScriptArgument(\"host\", \"{}\");\n",
        host
    ));
    out.push_str(&format!(
        "port   = script.getScriptIntArgument(\"port\", {});\n",
        port
    ));
    out.push_str(&format!(
        "useSSL = script.getScriptBooleanArgument(\"useSSL\", {});\n",
        use_ssl
    ));
    out.push_str("bindDN = script.getScriptArgument(\"bindDN\", \"\");\n");
    out.push_str("bindPW = script.getScriptArgument(\"bindPW\", \"\");\n\n\n");

    out.push_str("# Indicate that the connection should collect and report statistics.\n");
    out.push_str("conn.enableAttemptedOperationCounters();\n");
    out.push_str("conn.enableSuccessfulOperationCounters();\n");
    out.push_str("conn.enableFailedOperationCounters();\n");
    out.push_str("conn.enableOperationTimers();\n\n\n");

    out.push_str("# Establish the connection that will be used for all the work.  If the\n");
    out.push_str("# connection attempt fails, then exit with an error.\n");
    out.push_str("resultCode = conn.connect(host, port, bindDN, bindPW, 3, useSSL);\n");
    out.push_str("if resultCode.notEqual(conn.success())\n");
    out.push_str("begin\n");
    out.push_str("  message = \"Unable to connect.  Result code was:  \";\n");
    out.push_str("  message = message.append(resultCode.toString());\n");
    out.push_str("  script.logMessage(message);\n");
    out.push_str("  script.exitWithError();\n");
    out.push_str("end;\n\n\n");
    out
}

/// One script block for a captured message. Every block ends with two blank
/// lines. Values are emitted verbatim; quote characters in captured data are
/// left for the script editor to fix up.
pub fn script_block(message: &LdapMessage, captured_at: &str) -> String {
    match &message.protocol_op {
        ProtocolOp::BindRequest(op) => {
            let mut out = format!("#### Bind request captured at {}\n", captured_at);
            out.push_str(&format!("# Bind DN:  {}\n", op.bind_dn));
            match &op.authentication {
                BindAuthentication::Simple(password) => {
                    out.push_str("# Authentication Type:  Simple\n");
                    out.push_str(&format!("# Authentication Password:  {}\n", password));
                    out.push_str(&format!(
                        "resultCode = conn.bind(\"{}\", \"{}\");\n",
                        op.bind_dn, password
                    ));
                }
                BindAuthentication::Sasl { mechanism, .. } => {
                    out.push_str("# Authentication Type:  SASL\n");
                    out.push_str(&format!("# SASL Mechanism:  {}\n", mechanism));
                    out.push_str(
                        "# NOTE:  The SLAMD scripting language does not currently support \
                         SASL binds.\n",
                    );
                }
            }
            finish(out)
        }
        ProtocolOp::UnbindRequest => {
            let mut out = format!("#### Unbind request captured at {}\n", captured_at);
            out.push_str(
                "# Not actually going to unbind to prevent problems with future operations.\n",
            );
            out.push_str(
                "# If you actually want the unbind processed, then uncomment the next line:\n",
            );
            out.push_str("# conn.disconnect();\n");
            finish(out)
        }
        ProtocolOp::SearchRequest(op) => {
            let mut out = format!("#### Search request captured at {}\n", captured_at);
            out.push_str(&format!("# Search Base:  {}\n", op.base_dn));
            let scope_expr = match op.scope {
                SCOPE_BASE_OBJECT => {
                    out.push_str("# Scope:  baseObject\n");
                    "conn.scopeBase()".to_string()
                }
                SCOPE_SINGLE_LEVEL => {
                    out.push_str("# Scope:  singleLevel\n");
                    "conn.scopeOne()".to_string()
                }
                SCOPE_WHOLE_SUBTREE => {
                    out.push_str("# Scope:  wholeSubtree\n");
                    "conn.scopeSub()".to_string()
                }
                other => {
                    out.push_str(&format!("# Scope:  {}\n", other));
                    other.to_string()
                }
            };
            match op.deref_policy {
                DEREF_NEVER => out.push_str("# Deref Policy:  neverDerefAliases\n"),
                DEREF_IN_SEARCHING => out.push_str("# Deref Policy:  derefInSearching\n"),
                DEREF_FINDING_BASE_OBJECT => {
                    out.push_str("# Deref Policy:  derefFindingBaseObj\n")
                }
                DEREF_ALWAYS => out.push_str("# Deref Policy:  derefAlways\n"),
                _ => {}
            }
            out.push_str(&format!("# Size Limit:  {}\n", op.size_limit));
            out.push_str(&format!("# Time Limit:  {}\n", op.time_limit));
            out.push_str(&format!("# Types Only:  {}\n", op.types_only));
            let filter = op.filter.to_string();
            out.push_str(&format!("# Filter:  {}\n", filter));
            if !op.attributes.is_empty() {
                out.push_str("# Attributes to Return:\n");
                for attribute in &op.attributes {
                    out.push_str(&format!("#   {}\n", attribute));
                }
            }
            out.push_str("searchAttrs.removeAll();\n");
            for attribute in &op.attributes {
                out.push_str(&format!("searchAttrs.addValue(\"{}\");\n", attribute));
            }
            out.push_str(&format!(
                "resultCode = conn.search(\"{}\", {}, \"{}\", searchAttrs, {}, {});\n",
                op.base_dn, scope_expr, filter, op.time_limit, op.size_limit
            ));
            finish(out)
        }
        ProtocolOp::AddRequest(op) => {
            let mut out = format!("#### Add request captured at {}\n", captured_at);
            out.push_str(&format!("# dn: {}\n", op.dn));
            for attribute in &op.attributes {
                for value in &attribute.values {
                    out.push_str(&format!(
                        "# {}: {}\n",
                        attribute.attribute_type,
                        String::from_utf8_lossy(value)
                    ));
                }
            }
            out.push_str(&format!("entry.assign(\"{}\");\n", op.dn));
            for attribute in &op.attributes {
                for value in &attribute.values {
                    out.push_str(&format!(
                        "entry.addAttribute(\"{}\", \"{}\");\n",
                        attribute.attribute_type,
                        String::from_utf8_lossy(value)
                    ));
                }
            }
            out.push_str("resultCode = conn.add(entry);\n");
            finish(out)
        }
        ProtocolOp::ModifyRequest(op) => {
            let mut out = format!("#### Modify request captured at {}\n", captured_at);
            out.push_str(&format!("# dn: {}\n", op.dn));
            out.push_str("# changetype: modify\n");
            for (i, modification) in op.modifications.iter().enumerate() {
                if i > 0 {
                    out.push_str("# -\n");
                }
                let attr = &modification.attribute;
                out.push_str(&format!(
                    "# {}: {}\n",
                    modification.mod_type.name(),
                    attr.attribute_type
                ));
                for value in &attr.values {
                    out.push_str(&format!(
                        "# {}: {}\n",
                        attr.attribute_type,
                        String::from_utf8_lossy(value)
                    ));
                }
            }
            out.push_str("modSet.removeAll();\n");
            for modification in &op.modifications {
                let assign = match modification.mod_type {
                    ModificationType::Add => "mod.modTypeAdd()",
                    ModificationType::Delete => "mod.modTypeDelete()",
                    ModificationType::Replace => "mod.modTypeReplace()",
                };
                out.push_str(&format!(
                    "mod.assign({}, \"{}\");\n",
                    assign, modification.attribute.attribute_type
                ));
                for value in &modification.attribute.values {
                    out.push_str(&format!(
                        "mod.addValue(\"{}\");\n",
                        String::from_utf8_lossy(value)
                    ));
                }
                out.push_str("modSet.addModification(mod);\n");
            }
            out.push_str(&format!(
                "resultCode = conn.modify(\"{}\", modSet);\n",
                op.dn
            ));
            finish(out)
        }
        ProtocolOp::DeleteRequest(op) => {
            let mut out = format!("#### Delete request captured at {}\n", captured_at);
            out.push_str(&format!("# Entry DN:  {}\n", op.dn));
            out.push_str(&format!("resultCode = conn.delete(\"{}\");\n", op.dn));
            finish(out)
        }
        ProtocolOp::ModifyDnRequest(op) => {
            let mut out = format!("#### Modify DN request captured at {}\n", captured_at);
            out.push_str(&format!("# Entry DN:  {}\n", op.dn));
            out.push_str(&format!("# New RDN:  {}\n", op.new_rdn));
            out.push_str(&format!("# Delete Old RDN:  {}\n", op.delete_old_rdn));
            match &op.new_superior {
                None => out.push_str(&format!(
                    "resultCode = conn.modifyRDN(\"{}\", \"{}\", {});\n",
                    op.dn, op.new_rdn, op.delete_old_rdn
                )),
                Some(new_superior) => {
                    out.push_str(&format!("# New Superior:  {}\n", new_superior));
                    out.push_str(
                        "# NOTE:  The SLAMD scripting language does not currently support \
                         modify DN with newSuperior.\n",
                    );
                }
            }
            finish(out)
        }
        ProtocolOp::CompareRequest(op) => {
            let value = String::from_utf8_lossy(&op.assertion_value);
            let mut out = format!("#### Compare request captured at {}\n", captured_at);
            out.push_str(&format!("# Entry DN:  {}\n", op.dn));
            out.push_str(&format!("# Attribute Type:  {}\n", op.attribute_type));
            out.push_str(&format!("# Assertion Value:  {}\n", value));
            out.push_str(&format!(
                "resultCode = conn.compare(\"{}\", \"{}\", \"{}\");\n",
                op.dn, op.attribute_type, value
            ));
            finish(out)
        }
        ProtocolOp::AbandonRequest(op) => {
            let mut out = format!("#### Abandon request captured at {}\n", captured_at);
            out.push_str(&format!("# ID to Abandon:  {}\n", op.id_to_abandon));
            out.push_str(
                "# NOTE:  The SLAMD scripting language does not currently support abandons.\n",
            );
            finish(out)
        }
        ProtocolOp::ExtendedRequest(op) => {
            let mut out = format!("#### Extended request captured at {}\n", captured_at);
            out.push_str(&format!("# Request OID:  {}\n", op.oid));
            out.push_str(
                "# NOTE:  The SLAMD scripting language does not currently support extended \
                 operations.\n",
            );
            finish(out)
        }
        ProtocolOp::BindResponse(op) => {
            response_block("Bind response", &op.result, captured_at)
        }
        ProtocolOp::SearchResultEntry(op) => {
            let mut out = format!("#### Search result entry captured at {}\n", captured_at);
            out.push_str(&format!("# dn: {}\n", op.dn));
            for attribute in &op.attributes {
                for value in &attribute.values {
                    out.push_str(&format!(
                        "# {}: {}\n",
                        attribute.attribute_type,
                        String::from_utf8_lossy(value)
                    ));
                }
            }
            finish(out)
        }
        ProtocolOp::SearchResultReference(op) => {
            let mut out = format!(
                "#### Search result reference captured at {}\n",
                captured_at
            );
            out.push_str("# Referral URLs: \n");
            for url in &op.referral_urls {
                out.push_str(&format!("#   {}\n", url));
            }
            finish(out)
        }
        ProtocolOp::SearchResultDone(result) => {
            response_block("Search result done", result, captured_at)
        }
        ProtocolOp::ModifyResponse(result) => {
            response_block("Modify response", result, captured_at)
        }
        ProtocolOp::AddResponse(result) => response_block("Add response", result, captured_at),
        ProtocolOp::DeleteResponse(result) => {
            response_block("Delete response", result, captured_at)
        }
        ProtocolOp::ModifyDnResponse(result) => {
            response_block("Modify DN response", result, captured_at)
        }
        ProtocolOp::CompareResponse(result) => {
            response_block("Compare response", result, captured_at)
        }
        ProtocolOp::ExtendedResponse(op) => {
            response_block("Extended response", &op.result, captured_at)
        }
        ProtocolOp::IntermediateResponse(op) => {
            let mut out = format!(
                "#### Intermediate response captured at {}\n",
                captured_at
            );
            if let Some(oid) = &op.oid {
                out.push_str(&format!("# Response OID:  {}\n", oid));
            }
            finish(out)
        }
    }
}

/// Responses are never replayed, but the script notes them so the exchange
/// reads in order.
fn response_block(kind: &str, result: &LdapResult, captured_at: &str) -> String {
    let mut out = format!("#### {} captured at {}\n", kind, captured_at);
    out.push_str(&format!("# Result code:  {}\n", result.result_code));
    if !result.matched_dn.is_empty() {
        out.push_str(&format!("# Matched DN:  {}\n", result.matched_dn));
    }
    if !result.error_message.is_empty() {
        out.push_str(&format!("# Error message:  {}\n", result.error_message));
    }
    if !result.referrals.is_empty() {
        out.push_str("# Referral(s):\n");
        for referral in &result.referrals {
            out.push_str(&format!("#   {}\n", referral));
        }
    }
    finish(out)
}

fn finish(mut block: String) -> String {
    block.push_str("\n\n");
    block
}
