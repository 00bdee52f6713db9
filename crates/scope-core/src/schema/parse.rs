//! Parsing of the raw introspection lists into the schema tree.
//!
//! The reply payloads are positional JSON arrays:
//!
//! - CommandInfo: `[commandList, eventList?]`, command =
//!   `[name, number, messageID, responseID]`, event = `[name, number, messageID]`
//! - MessageInfo: `[messageList]`, message = `[id, name, fieldList, _, isUnion?]`,
//!   field = `[name, type, number, quantifier?, messageID?, enumID?]`
//! - EnumInfo: `[enumList]`, enum = `[id, name, [[valueName, number], ...]]`
//!
//! Malformed entries are skipped with a warning rather than failing the
//! whole run; the host is the authority on its own shapes.

use super::{CommandDef, EnumDef, FieldDef, FieldMessage, Quantifier, ServiceSchema};
use serde_json::Value;
use std::collections::HashSet;
use tracing::warn;

/// Build one service's schema from its three raw lists.
pub(crate) fn parse_service_schema(
    raw_commands: &Value,
    raw_messages: &Value,
    raw_enums: &[Value],
) -> ServiceSchema {
    let empty = Vec::new();
    let msg_list = raw_messages.get(0).and_then(Value::as_array).unwrap_or(&empty);
    let mut schema = ServiceSchema::default();

    if let Some(commands) = raw_commands.get(0).and_then(Value::as_array) {
        for command in commands {
            let Some((name, number)) = name_and_number(command) else {
                warn!("skipping malformed command entry");
                continue;
            };
            let message_id = command.get(2).and_then(Value::as_u64);
            let response_id = command.get(3).and_then(Value::as_u64);
            schema.commands_by_number.insert(
                number,
                CommandDef {
                    name,
                    command: Some(parse_msg(
                        lookup_message(msg_list, message_id),
                        msg_list,
                        &mut HashSet::new(),
                        raw_enums,
                    )),
                    response: Some(parse_msg(
                        lookup_message(msg_list, response_id),
                        msg_list,
                        &mut HashSet::new(),
                        raw_enums,
                    )),
                    event: None,
                },
            );
        }
    }

    if let Some(events) = raw_commands.get(1).and_then(Value::as_array) {
        for event in events {
            let Some((name, number)) = name_and_number(event) else {
                warn!("skipping malformed event entry");
                continue;
            };
            let message_id = event.get(2).and_then(Value::as_u64);
            schema.events_by_number.insert(
                number,
                CommandDef {
                    name,
                    command: None,
                    response: None,
                    event: Some(parse_msg(
                        lookup_message(msg_list, message_id),
                        msg_list,
                        &mut HashSet::new(),
                        raw_enums,
                    )),
                },
            );
        }
    }
    schema
}

fn name_and_number(entry: &Value) -> Option<(String, u32)> {
    let name = entry.get(0)?.as_str()?.to_owned();
    let number = entry.get(1)?.as_u64()? as u32;
    Some((name, number))
}

fn lookup_message(msg_list: &[Value], id: Option<u64>) -> Option<&Value> {
    let id = id?;
    msg_list
        .iter()
        .find(|msg| msg.get(0).and_then(Value::as_u64) == Some(id))
}

/// Expand a message's field list, interning field names so self-references
/// become `Recursive` markers instead of cycles.
fn parse_msg(
    msg: Option<&Value>,
    msg_list: &[Value],
    interned: &mut HashSet<String>,
    raw_enums: &[Value],
) -> Vec<FieldDef> {
    let mut out = Vec::new();
    let Some(fields) = msg.and_then(|m| m.get(2)).and_then(Value::as_array) else {
        return out;
    };
    for field in fields {
        let Some(name) = field.get(0).and_then(Value::as_str) else {
            warn!("skipping field with no name");
            continue;
        };
        let mut def = FieldDef {
            name: name.to_owned(),
            field_type: field.get(1).and_then(Value::as_u64).unwrap_or(0) as u32,
            quantifier: match field.get(3).and_then(Value::as_u64).unwrap_or(0) {
                1 => Quantifier::Optional,
                2 => Quantifier::Repeated,
                _ => Quantifier::Required,
            },
            is_union: false,
            message_name: None,
            message: None,
            enum_def: None,
        };
        if let Some(message_id) = field.get(4).and_then(Value::as_u64).filter(|id| *id != 0) {
            if interned.insert(name.to_owned()) {
                let sub = lookup_message(msg_list, Some(message_id));
                def.is_union = sub
                    .and_then(|m| m.get(4))
                    .and_then(Value::as_u64)
                    .unwrap_or(0)
                    != 0;
                def.message_name = Some(
                    sub.and_then(|m| m.get(1))
                        .and_then(Value::as_str)
                        .unwrap_or("default")
                        .to_owned(),
                );
                def.message = Some(FieldMessage::Fields(parse_msg(
                    sub, msg_list, interned, raw_enums,
                )));
            } else {
                def.message = Some(FieldMessage::Recursive(name.to_owned()));
            }
        }
        if let Some(enum_id) = field.get(5).and_then(Value::as_u64).filter(|id| *id != 0) {
            def.enum_def = lookup_enum(raw_enums, enum_id);
        }
        out.push(def);
    }
    out
}

/// Resolve one enum id into a dense name table indexed by value number.
fn lookup_enum(raw_enums: &[Value], id: u64) -> Option<EnumDef> {
    let entry = raw_enums
        .iter()
        .find(|e| e.get(0).and_then(Value::as_u64) == Some(id))?;
    let name = entry
        .get(1)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let mut by_number = std::collections::BTreeMap::new();
    if let Some(values) = entry.get(2).and_then(Value::as_array) {
        for value in values {
            let Some(value_name) = value.get(0).and_then(Value::as_str) else {
                continue;
            };
            let Some(number) = value.get(1).and_then(Value::as_u64) else {
                continue;
            };
            by_number.insert(number, value_name.to_owned());
        }
    }
    let max = by_number.keys().max().copied().unwrap_or(0);
    let values = (0..=max)
        .map(|i| by_number.get(&i).cloned().unwrap_or_default())
        .collect();
    Some(EnumDef { name, values })
}
