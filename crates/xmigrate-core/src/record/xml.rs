//! XML codec for [`Record`] trees.
//!
//! Parsing resolves every prefix to its namespace URI; serializing writes
//! the known XNAT prefixes on the root element and invents `nsN` prefixes
//! for anything else.

use super::{QName, Record, XnatNamespace};
use crate::{MigrateError, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;
use quick_xml::writer::Writer;

/// Parse an XML document into a record tree.
pub fn parse(input: &str) -> Result<Record> {
    let mut reader = NsReader::from_str(input);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Record> = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                let record = open_element(&reader, &start)?;
                stack.push(record);
            }
            Event::Empty(start) => {
                let record = open_element(&reader, &start)?;
                if let Some(root) = close_element(&mut stack, record) {
                    return Ok(root);
                }
            }
            Event::End(_) => {
                let record = stack.pop().ok_or_else(|| MigrateError::Xml {
                    message: "unbalanced closing tag".to_string(),
                })?;
                if let Some(root) = close_element(&mut stack, record) {
                    return Ok(root);
                }
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    append_text(current, &text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    append_text(current, &String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => {
                return Err(MigrateError::Xml {
                    message: "document ended before the root element closed".to_string(),
                });
            }
            _ => {}
        }
    }
}

/// Serialize a record tree as a standalone UTF-8 document.
pub fn to_string(record: &Record) -> Result<String> {
    let prefixes = prefix_table(record);

    let mut writer = Writer::new(Vec::new());
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(write_error)?;
    write_element(&mut writer, record, &prefixes, true)?;

    String::from_utf8(writer.into_inner()).map_err(|e| MigrateError::Xml {
        message: format!("serialized record is not UTF-8: {}", e),
    })
}

fn open_element(reader: &NsReader<&[u8]>, start: &BytesStart<'_>) -> Result<Record> {
    let (namespace, local) = reader.resolve_element(start.name());
    let mut record = Record::new(QName {
        namespace: namespace_uri(namespace)?,
        local: String::from_utf8_lossy(local.as_ref()).into_owned(),
    });

    for attribute in start.attributes() {
        let attribute = attribute?;
        if attribute.key.as_namespace_binding().is_some() {
            continue;
        }
        let (namespace, local) = reader.resolve_attribute(attribute.key);
        let key = QName {
            namespace: namespace_uri(namespace)?,
            local: String::from_utf8_lossy(local.as_ref()).into_owned(),
        };
        let value = attribute.unescape_value()?.into_owned();
        record.attributes.push((key, value));
    }

    Ok(record)
}

fn namespace_uri(result: ResolveResult<'_>) -> Result<Option<String>> {
    match result {
        ResolveResult::Bound(namespace) => {
            Ok(Some(String::from_utf8_lossy(namespace.as_ref()).into_owned()))
        }
        ResolveResult::Unbound => Ok(None),
        ResolveResult::Unknown(prefix) => Err(MigrateError::Xml {
            message: format!(
                "undeclared namespace prefix '{}'",
                String::from_utf8_lossy(&prefix)
            ),
        }),
    }
}

/// Attach a finished element to its parent, or hand it back when it is the root.
fn close_element(stack: &mut [Record], record: Record) -> Option<Record> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(record);
            None
        }
        None => Some(record),
    }
}

fn append_text(record: &mut Record, text: &str) {
    match record.text.as_mut() {
        Some(existing) => existing.push_str(text),
        None => record.text = Some(text.to_string()),
    }
}

/// Namespace URI → prefix for every namespace used in the tree.
fn prefix_table(record: &Record) -> Vec<(String, String)> {
    let mut uris = Vec::new();
    collect_namespaces(record, &mut uris);

    let mut unknown = 0;
    uris.into_iter()
        .map(|uri| {
            let prefix = match XnatNamespace::from_uri(&uri) {
                Some(ns) => ns.prefix().to_string(),
                None => {
                    unknown += 1;
                    format!("ns{}", unknown)
                }
            };
            (uri, prefix)
        })
        .collect()
}

fn collect_namespaces(record: &Record, uris: &mut Vec<String>) {
    let names = std::iter::once(&record.name).chain(record.attributes.iter().map(|(k, _)| k));
    for name in names {
        if let Some(uri) = &name.namespace {
            if !uris.contains(uri) {
                uris.push(uri.clone());
            }
        }
    }
    for child in &record.children {
        collect_namespaces(child, uris);
    }
}

fn qualified(name: &QName, prefixes: &[(String, String)]) -> String {
    let prefix = name
        .namespace
        .as_ref()
        .and_then(|uri| prefixes.iter().find(|(u, _)| u == uri))
        .map(|(_, prefix)| prefix.as_str());
    match prefix {
        Some(prefix) => format!("{}:{}", prefix, name.local),
        None => name.local.clone(),
    }
}

fn write_element(
    writer: &mut Writer<Vec<u8>>,
    record: &Record,
    prefixes: &[(String, String)],
    is_root: bool,
) -> Result<()> {
    let name = qualified(&record.name, prefixes);
    let mut start = BytesStart::new(name.as_str());

    if is_root {
        for (uri, prefix) in prefixes {
            let key = format!("xmlns:{}", prefix);
            start.push_attribute((key.as_str(), uri.as_str()));
        }
    }
    for (key, value) in &record.attributes {
        let key = qualified(key, prefixes);
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if record.children.is_empty() && record.text.is_none() {
        writer.write_event(Event::Empty(start)).map_err(write_error)?;
        return Ok(());
    }

    writer.write_event(Event::Start(start)).map_err(write_error)?;
    if let Some(text) = &record.text {
        writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(write_error)?;
    }
    for child in &record.children {
        write_element(writer, child, prefixes, false)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(name.as_str())))
        .map_err(write_error)?;
    Ok(())
}

fn write_error(err: impl std::fmt::Display) -> MigrateError {
    MigrateError::Xml {
        message: format!("failed to write record: {}", err),
    }
}
