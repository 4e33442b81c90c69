//! Display-name edits on a decoded resource tree.

use std::{
    fs,
    path::{Path, PathBuf},
};

use quick_xml::{
    events::{BytesStart, BytesText, Event},
    Reader, Writer,
};
use walkdir::WalkDir;

use crate::error::BuildError;

pub const APP_NAME_RESOURCE: &str = "app_name";
const STRINGS_FILE: &str = "strings.xml";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceEdit {
    Updated(PathBuf),
    ElementMissing,
}

/// First `strings.xml` under `res/`, in sorted walk order, that declares
/// `<string name="app_name">`.
pub fn find_app_name_file(tree: &Path) -> Option<PathBuf> {
    let needle = format!("name=\"{APP_NAME_RESOURCE}\"");
    WalkDir::new(tree.join("res"))
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == STRINGS_FILE)
        .find(|entry| {
            fs::read_to_string(entry.path())
                .map(|xml| xml.contains(&needle))
                .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
}

/// Sets the app name in the decoded tree. A tree without an `app_name`
/// string is left as is.
pub fn set_app_name(tree: &Path, display_name: &str) -> Result<ResourceEdit, BuildError> {
    let Some(path) = find_app_name_file(tree) else {
        return Ok(ResourceEdit::ElementMissing);
    };
    let xml = fs::read_to_string(&path).map_err(BuildError::io(&path))?;
    let updated = set_string_value(&xml, APP_NAME_RESOURCE, display_name).map_err(|err| {
        BuildError::Xml {
            path: path.clone(),
            message: err.to_string(),
        }
    })?;
    match updated {
        Some(updated) => {
            fs::write(&path, updated).map_err(BuildError::io(&path))?;
            Ok(ResourceEdit::Updated(path))
        }
        None => Ok(ResourceEdit::ElementMissing),
    }
}

/// Replaces the content of the first `<string name="{name}">` element with
/// `value` (escaped). Everything else in the document is written back
/// unchanged. Returns `None` when no such element exists.
pub fn set_string_value(
    xml: &str,
    name: &str,
    value: &str,
) -> Result<Option<String>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len() + value.len()));
    let mut replaced = false;
    // depth inside the element being replaced; its old content is dropped
    let mut skipping: Option<usize> = None;

    loop {
        let event = reader.read_event()?;
        if let Some(depth) = skipping {
            match event {
                Event::Start(_) => skipping = Some(depth + 1),
                Event::End(end) if depth == 0 => {
                    writer.write_event(Event::End(end))?;
                    skipping = None;
                    replaced = true;
                }
                Event::End(_) => skipping = Some(depth - 1),
                Event::Eof => break,
                _ => {}
            }
            continue;
        }

        match event {
            Event::Eof => break,
            Event::Start(start) if !replaced && is_named_string(&start, name) => {
                writer.write_event(Event::Start(start))?;
                writer.write_event(Event::Text(BytesText::new(value)))?;
                skipping = Some(0);
            }
            Event::Empty(start) if !replaced && is_named_string(&start, name) => {
                let end = start.to_end().into_owned();
                writer.write_event(Event::Start(start.clone()))?;
                writer.write_event(Event::Text(BytesText::new(value)))?;
                writer.write_event(Event::End(end))?;
                replaced = true;
            }
            other => writer.write_event(other)?,
        }
    }

    if !replaced {
        return Ok(None);
    }
    let bytes = writer.into_inner();
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

fn is_named_string(start: &BytesStart<'_>, name: &str) -> bool {
    if start.name().as_ref() != b"string" {
        return false;
    }
    match start.try_get_attribute("name") {
        Ok(Some(attr)) => attr
            .unescape_value()
            .map(|value| value == name)
            .unwrap_or(false),
        _ => false,
    }
}
