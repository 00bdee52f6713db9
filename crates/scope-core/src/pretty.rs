//! Schema-driven rendering of STP/1 messages for the message trace.
//!
//! Payloads are positional JSON arrays; zipping them against the discovered
//! field lists turns `[1,["x",3]]` into named, indented lines. A `Recursive`
//! marker in the schema is followed by substituting the interned node, so
//! self-referential messages render as deep as the payload actually nests
//! and no deeper.

use crate::schema::{FieldDef, FieldMessage, Quantifier, SchemaMap};
use serde_json::Value;
use std::collections::HashMap;
use stp_wire::{Stp1Message, Stp1MessageType};

const INDENT: &str = "  ";

/// Render a full message: envelope lines plus the payload, named via the
/// schema when one is available.
pub fn render_message(msg: &Stp1Message, schema: Option<&SchemaMap>) -> String {
    let command = schema
        .and_then(|map| map.get(&msg.service))
        .and_then(|svc| svc.lookup(msg.msg_type, msg.command_id));
    let command_name = command
        .map(|c| c.name.clone())
        .unwrap_or_else(|| format!("<id: {}>", msg.command_id));

    let mut lines = vec![
        format!("message type: {}", msg.msg_type),
        format!("service: {}", msg.service),
        format!("command: {command_name}"),
        format!("format: {}", msg.format),
        format!("status: {}", msg.status),
        format!("tag: {}", msg.tag),
    ];
    if msg.client_id != 0 {
        lines.push(format!("cid: {}", msg.client_id));
    }
    if let Some(uuid) = &msg.uuid {
        lines.push(format!("uuid: {uuid}"));
    }

    let fields = command.and_then(|c| c.fields_for(msg.msg_type));
    let items = serde_json::from_slice::<Value>(&msg.payload)
        .ok()
        .and_then(|v| v.as_array().cloned());
    match (fields, items) {
        (Some(fields), Some(items)) if msg.msg_type != Stp1MessageType::Error => {
            lines.push("payload:".to_owned());
            lines.push(render_payload(&items, fields));
        }
        _ => {
            lines.push(format!(
                "payload: {}",
                String::from_utf8_lossy(&msg.payload)
            ));
        }
    }
    lines.join("\n")
}

/// Render a payload array against its field definitions.
pub fn render_payload(items: &[Value], fields: &[FieldDef]) -> String {
    let mut renderer = Renderer {
        interned: HashMap::new(),
        lines: Vec::new(),
    };
    renderer.render_fields(1, items, fields);
    renderer.lines.join("\n")
}

struct Renderer<'a> {
    /// First inline occurrence of each submessage field, for `Recursive`.
    interned: HashMap<&'a str, &'a [FieldDef]>,
    lines: Vec<String>,
}

impl<'a> Renderer<'a> {
    fn render_fields(&mut self, indent: usize, items: &[Value], fields: &'a [FieldDef]) {
        for (item, def) in items.iter().zip(fields) {
            if def.quantifier == Quantifier::Repeated {
                self.push(indent, &def.name, "");
                let label = def.name.replace("List", "");
                if let Some(subs) = item.as_array() {
                    for sub in subs {
                        self.render_item(indent + 1, &label, def, sub);
                    }
                }
            } else {
                self.render_item(indent, &def.name, def, item);
            }
        }
    }

    fn render_item(&mut self, indent: usize, label: &str, def: &'a FieldDef, item: &Value) {
        let fields = self.resolve_message(def);
        if def.is_union {
            // [selector, value...]: the selector picks the variant field
            if let (Some(variants), Some(parts)) = (fields, item.as_array()) {
                let selector = parts.first().and_then(Value::as_u64).unwrap_or(0) as usize;
                if let Some(variant) = selector
                    .checked_sub(1)
                    .and_then(|index| variants.get(index))
                {
                    if variant.message.is_some() {
                        let rest = Value::Array(parts[1..].to_vec());
                        self.render_item(indent, label, variant, &rest);
                    } else {
                        let value = parts.get(1).cloned().unwrap_or(Value::Null);
                        self.render_item(indent, label, variant, &value);
                    }
                    return;
                }
            }
        }
        if let Some(fields) = fields {
            self.push(indent, label, "");
            if let Some(subs) = item.as_array() {
                self.render_fields(indent + 1, subs, fields);
            }
        } else if let Some(enum_def) = &def.enum_def {
            let number = item.as_u64().unwrap_or(0) as usize;
            let name = enum_def
                .values
                .get(number)
                .map(String::as_str)
                .unwrap_or_default();
            self.push(indent, label, &format!(" {name} ({number})"));
        } else {
            self.push(indent, label, &format!(" {}", scalar(item)));
        }
    }

    /// The field list behind `def`, following a `Recursive` marker back to
    /// the first occurrence seen in this traversal.
    fn resolve_message(&mut self, def: &'a FieldDef) -> Option<&'a [FieldDef]> {
        match def.message.as_ref()? {
            FieldMessage::Fields(fields) => {
                self.interned
                    .entry(def.name.as_str())
                    .or_insert(fields.as_slice());
                Some(fields.as_slice())
            }
            FieldMessage::Recursive(name) => self.interned.get(name.as_str()).copied(),
        }
    }

    fn push(&mut self, indent: usize, label: &str, rest: &str) {
        self.lines
            .push(format!("{}{label}:{rest}", INDENT.repeat(indent)));
    }
}

fn scalar(item: &Value) -> String {
    match item {
        Value::Null => "null".to_owned(),
        Value::String(s) => format!("\"{s}\""),
        other => other.to_string(),
    }
}
