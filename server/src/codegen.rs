// Emits the client-side schema artifact so browser code and this process
// can never disagree about message layout. Runs in tool mode, before the
// server would start.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use serde_json::json;
use thiserror::Error;

use protocol::structure::{ALL_FIELD_KINDS, FieldKind};
use protocol::{EventRegistry, EventSpec, SendPermissions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Ts,
    Json,
}

#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("unsupported file extension on {0}, expected .ts or .json")]
    UnsupportedExtension(String),
    #[error("failed to render: {0}")]
    Render(#[from] std::fmt::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub fn format_from_path(path: &Path) -> Result<OutputFormat, CodegenError> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("ts") => Ok(OutputFormat::Ts),
        Some("json") => Ok(OutputFormat::Json),
        _ => Err(CodegenError::UnsupportedExtension(
            path.display().to_string(),
        )),
    }
}

/// Writes the event-spec artifact for the format implied by the path's
/// extension.
pub fn write_event_specs(path: &Path) -> Result<(), CodegenError> {
    let content = match format_from_path(path)? {
        OutputFormat::Ts => render_ts()?,
        OutputFormat::Json => render_json(),
    };
    fs::write(path, content)?;
    Ok(())
}

fn render_ts() -> Result<String, std::fmt::Error> {
    let registry = EventRegistry::global();
    let specs = registry.ordered();
    let mut out = String::new();

    writeln!(
        out,
        "// !!! This content is generated by the multiplayer backend tool. Do not modify manually !!!\n"
    )?;

    writeln!(out, "export enum OriginType {{")?;
    writeln!(out, "\tServer = \"server\",")?;
    writeln!(out, "\tOwner = \"owner\",")?;
    writeln!(out, "\tGuest = \"guest\"")?;
    writeln!(out, "}};\n")?;

    writeln!(out, "export enum FieldType {{")?;
    for (index, kind) in ALL_FIELD_KINDS.iter().enumerate() {
        let trailer = if index == ALL_FIELD_KINDS.len() - 1 { "" } else { "," };
        writeln!(
            out,
            "\t{} = \"{}\"{}",
            constant_name(kind.name()),
            kind.name(),
            trailer
        )?;
    }
    writeln!(out, "}};\n")?;

    writeln!(
        out,
        "export type SendPermissions = {{ [key in OriginType]: boolean }};\n"
    )?;

    writeln!(out, "export type MessageElementDescriptor = {{")?;
    writeln!(out, "\tbyteSize: number,")?;
    writeln!(out, "\toffset: number,")?;
    writeln!(out, "\tdescription: string,")?;
    writeln!(out, "\tfieldName: string,")?;
    writeln!(out, "\ttype: FieldType")?;
    writeln!(out, "}};\n")?;

    writeln!(out, "export type EventSpecification<T> = {{")?;
    writeln!(out, "\tid: number,")?;
    writeln!(out, "\tname: string,")?;
    writeln!(out, "\tpermissions: SendPermissions,")?;
    writeln!(out, "\texpectedMinSize: number")?;
    writeln!(out, "\tstructure: MessageElementDescriptor[]")?;
    writeln!(out, "}};\n")?;

    writeln!(out, "export enum EventType {{")?;
    for (index, spec) in specs.iter().enumerate() {
        let trailer = if index == specs.len() - 1 { "" } else { "," };
        writeln!(out, "\t{} = {}{}", constant_name(spec.name), spec.id, trailer)?;
    }
    writeln!(out, "}};\n")?;

    writeln!(out, "export interface IMessage {{")?;
    writeln!(out, "\tsenderID: number")?;
    writeln!(out, "\teventID: number")?;
    writeln!(out, "}}\n")?;

    for spec in &specs {
        let dto_name = write_dto_interface(&mut out, spec)?;
        write_structure_doc(&mut out, spec)?;

        writeln!(
            out,
            "export const {}_EVENT: EventSpecification<{}> = {{",
            constant_name(spec.name),
            dto_name
        )?;
        writeln!(out, "\tid: EventType.{},", constant_name(spec.name))?;
        writeln!(out, "\tname: \"{}\",", spec.name)?;
        writeln!(out, "\tpermissions: {},", ts_permissions(&spec.permissions))?;
        writeln!(out, "\texpectedMinSize: {},", spec.expected_min_size)?;
        writeln!(out, "\tstructure: [")?;
        for (index, el) in spec.structure.iter().enumerate() {
            writeln!(out, "\t\t{{")?;
            writeln!(out, "\t\t\tbyteSize: {},", el.byte_size)?;
            writeln!(out, "\t\t\toffset: {},", el.offset)?;
            writeln!(out, "\t\t\tdescription: \"{}\",", el.description)?;
            writeln!(out, "\t\t\tfieldName: \"{}\",", el.field_name)?;
            writeln!(out, "\t\t\ttype: FieldType.{}", constant_name(el.kind.name()))?;
            if index == spec.structure.len() - 1 {
                writeln!(out, "\t\t}}")?;
            } else {
                writeln!(out, "\t\t}},")?;
            }
        }
        writeln!(out, "\t]")?;
        writeln!(out, "}}")?;
    }
    writeln!(out)?;

    writeln!(
        out,
        "export const EVENT_ID_MAP: {{[key: number]: EventSpecification<any>}} = {{"
    )?;
    for (index, spec) in specs.iter().enumerate() {
        let trailer = if index == specs.len() - 1 { "" } else { "," };
        writeln!(out, "\t{}: {}_EVENT{}", spec.id, constant_name(spec.name), trailer)?;
    }
    writeln!(out, "}};")?;

    Ok(out)
}

fn write_dto_interface(out: &mut String, spec: &EventSpec) -> Result<String, std::fmt::Error> {
    let dto_name = format!("{}MessageDTO", spec.name);

    writeln!(out, "/** {} */", spec.comment)?;
    writeln!(out, "export interface {} extends IMessage {{", dto_name)?;
    for el in &spec.structure {
        writeln!(out, "\t/** {}", el.description)?;
        writeln!(out, "\t*")?;
        writeln!(out, "\t* wire type: {}", el.kind.name())?;
        writeln!(out, "\t*/")?;
        writeln!(out, "\t{}: {};", el.field_name, ts_type_of(el.kind))?;
    }
    writeln!(out, "}}")?;

    Ok(dto_name)
}

fn write_structure_doc(out: &mut String, spec: &EventSpec) -> Result<(), std::fmt::Error> {
    writeln!(out, "/** {} Message Structure", spec.name)?;
    writeln!(out, " *")?;
    for el in &spec.structure {
        if el.byte_size == 0 {
            writeln!(
                out,
                " * *\t{}b --> +Nb:\t{:<10}:\t{}",
                el.offset,
                el.kind.name(),
                el.description
            )?;
        } else {
            writeln!(
                out,
                " * *\t{}b --> {}b:\t{:<10}:\t{}",
                el.offset,
                el.offset + el.byte_size,
                el.kind.name(),
                el.description
            )?;
        }
    }
    writeln!(out, " */")?;
    Ok(())
}

fn render_json() -> String {
    let registry = EventRegistry::global();
    let specs: Vec<_> = registry
        .ordered()
        .into_iter()
        .map(|spec| {
            json!({
                "id": spec.id,
                "name": spec.name,
                "permissions": {
                    "server": spec.permissions.server,
                    "owner": spec.permissions.owner,
                    "guest": spec.permissions.guest,
                },
                "expectedMinSize": spec.expected_min_size,
            })
        })
        .collect();

    let mut rendered =
        serde_json::to_string_pretty(&specs).expect("event specs always serialize");
    rendered.push('\n');
    rendered
}

fn ts_permissions(permissions: &SendPermissions) -> String {
    format!(
        "{{server: {}, owner: {}, guest: {}}}",
        permissions.server, permissions.owner, permissions.guest
    )
}

fn ts_type_of(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Bool => "boolean",
        FieldKind::Str => "string",
        FieldKind::C64 | FieldKind::C128 => "[number, number]",
        _ => "number",
    }
}

/// `PlayerJoined` -> `PLAYER_JOINED`, matching the generated constants the
/// client bundle already imports.
fn constant_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (index, ch) in name.chars().enumerate() {
        if ch.is_uppercase() && index > 0 {
            out.push('_');
        }
        for upper in ch.to_uppercase() {
            out.push(upper);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_names_split_on_camel_case() {
        assert_eq!(constant_name("Debug"), "DEBUG");
        assert_eq!(constant_name("PlayerJoined"), "PLAYER_JOINED");
        assert_eq!(
            constant_name("AsteroidsAsteroidSpawn"),
            "ASTEROIDS_ASTEROID_SPAWN"
        );
        assert_eq!(constant_name("uint32"), "UINT32");
    }

    #[test]
    fn format_follows_the_extension() {
        assert_eq!(
            format_from_path(Path::new("specs.ts")).unwrap(),
            OutputFormat::Ts
        );
        assert_eq!(
            format_from_path(Path::new("specs.json")).unwrap(),
            OutputFormat::Json
        );
        assert!(format_from_path(Path::new("specs.proto")).is_err());
    }

    #[test]
    fn ts_output_declares_every_event() {
        let rendered = render_ts().unwrap();
        assert!(rendered.contains("export enum EventType"));
        assert!(rendered.contains("PLAYER_MOVE = 4"));
        assert!(rendered.contains("export const DEBUG_EVENT: EventSpecification<DebugMessageDTO>"));
        assert!(rendered.contains("EVENT_ID_MAP"));
        for spec in EventRegistry::global().ordered() {
            assert!(
                rendered.contains(&format!("name: \"{}\"", spec.name)),
                "{} missing from generated output",
                spec.name
            );
        }
    }

    #[test]
    fn json_output_is_ordered_and_parseable() {
        let rendered = render_json();
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed.len(), EventRegistry::global().len());

        let ids: Vec<u64> = parsed.iter().map(|v| v["id"].as_u64().unwrap()).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
        assert_eq!(parsed[0]["name"], "Debug");
    }
}
