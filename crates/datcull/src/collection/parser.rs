//! XML DAT parser producing the in-memory collection model.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use indexmap::IndexMap;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{DatcullError, Result};

use super::entry::{Collection, Entry, RawField};
use super::group::detect_tags;

/// Parser configuration.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Element names treated as entries.
    pub entry_tags: Vec<String>,
    /// Element name holding header key/values.
    pub header_tag: String,
    /// Maximum entries to read (None = all).
    pub max_entries: Option<usize>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            entry_tags: vec![
                "game".to_string(),
                "machine".to_string(),
                "software".to_string(),
            ],
            header_tag: "header".to_string(),
            max_entries: None,
        }
    }
}

/// Parses XML game-list documents.
pub struct DatParser {
    config: ParserConfig,
}

impl DatParser {
    /// Create a new parser with default configuration.
    pub fn new() -> Self {
        Self {
            config: ParserConfig::default(),
        }
    }

    /// Create a parser with custom configuration.
    pub fn with_config(config: ParserConfig) -> Self {
        Self { config }
    }

    /// Parse a game-list file.
    pub fn parse_file(&self, path: impl AsRef<Path>) -> Result<Collection> {
        let path = path.as_ref();
        let contents = std::fs::read(path).map_err(|e| DatcullError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.parse_bytes(&contents, path)
    }

    /// Parse an in-memory document. The error path label is `<inline>`.
    pub fn parse_str(&self, source: &str) -> Result<Collection> {
        self.parse_bytes(source.as_bytes(), Path::new("<inline>"))
    }

    fn parse_bytes(&self, contents: &[u8], path: &Path) -> Result<Collection> {
        let mut hasher = Sha256::new();
        hasher.update(contents);
        let digest = format!("sha256:{:x}", hasher.finalize());

        let mut reader = Reader::from_reader(contents);

        let parse_err = |message: String| DatcullError::Parse {
            path: path.to_path_buf(),
            message,
        };

        let mut root_tag: Option<String> = None;
        let mut root_attributes = IndexMap::new();
        let mut header = IndexMap::new();
        let mut entries: Vec<Entry> = Vec::new();
        let mut seen_ids: HashMap<String, usize> = HashMap::new();
        let mut buf = Vec::new();

        loop {
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|e| parse_err(e.to_string()))?;
            match event {
                Event::Start(e) => {
                    let name = element_name(&e);
                    if root_tag.is_none() {
                        root_attributes = read_attributes(&e, path)?;
                        root_tag = Some(name);
                    } else if name == self.config.header_tag {
                        header = read_header(&mut reader, &self.config.header_tag, path)?;
                    } else if self.config.entry_tags.contains(&name) {
                        let attributes = read_attributes(&e, path)?;
                        let fields = read_entry_fields(&mut reader, &name, path)?;
                        entries.push(build_entry(
                            name,
                            attributes,
                            fields,
                            entries.len(),
                            &mut seen_ids,
                        ));
                        if self
                            .config
                            .max_entries
                            .is_some_and(|max| entries.len() >= max)
                        {
                            break;
                        }
                    } else {
                        // Unknown container: skip its whole subtree.
                        skip_subtree(&mut reader, &name, path)?;
                    }
                }
                Event::Empty(e) => {
                    let name = element_name(&e);
                    if root_tag.is_some() && self.config.entry_tags.contains(&name) {
                        let attributes = read_attributes(&e, path)?;
                        entries.push(build_entry(
                            name,
                            attributes,
                            Vec::new(),
                            entries.len(),
                            &mut seen_ids,
                        ));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        let root_tag = root_tag.ok_or_else(|| parse_err("no root element found".to_string()))?;

        if entries.is_empty() {
            return Err(DatcullError::EmptyCollection(format!(
                "'{}' contains no game entries",
                path.display()
            )));
        }

        info!(
            path = %path.display(),
            entries = entries.len(),
            "parsed game-list document"
        );

        Ok(Collection {
            root_tag,
            root_attributes,
            header,
            entries,
            digest,
        })
    }
}

impl Default for DatParser {
    fn default() -> Self {
        Self::new()
    }
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn read_attributes(e: &BytesStart<'_>, path: &Path) -> Result<IndexMap<String, String>> {
    let mut attributes = IndexMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| DatcullError::Parse {
            path: path.to_path_buf(),
            message: format!("bad attribute: {err}"),
        })?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| DatcullError::Parse {
                path: path.to_path_buf(),
                message: format!("bad attribute value: {err}"),
            })?
            .into_owned();
        attributes.insert(key, value);
    }
    Ok(attributes)
}

/// Read simple `<key>value</key>` children until the header closes.
fn read_header<R: BufRead>(
    reader: &mut Reader<R>,
    header_tag: &str,
    path: &Path,
) -> Result<IndexMap<String, String>> {
    let mut header = IndexMap::new();
    let mut current: Option<(String, String)> = None;
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| DatcullError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        match event {
            Event::Start(e) => current = Some((element_name(&e), String::new())),
            Event::Text(t) => {
                if let Some((_, text)) = current.as_mut() {
                    let unescaped = t.unescape().map_err(|e| DatcullError::Parse {
                        path: path.to_path_buf(),
                        message: e.to_string(),
                    })?;
                    text.push_str(&unescaped);
                }
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if name == header_tag {
                    break;
                }
                if let Some((key, text)) = current.take() {
                    header.insert(key, text.trim().to_string());
                }
            }
            Event::Empty(e) => {
                header.insert(element_name(&e), String::new());
            }
            Event::Eof => {
                return Err(DatcullError::Parse {
                    path: path.to_path_buf(),
                    message: format!("unexpected end of document inside <{header_tag}>"),
                });
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(header)
}

/// Read the flat children of an entry element until it closes.
///
/// Children are kept opaque: element name, attributes and text. Content
/// nested deeper than one level is folded into the field's text.
fn read_entry_fields<R: BufRead>(
    reader: &mut Reader<R>,
    entry_tag: &str,
    path: &Path,
) -> Result<Vec<RawField>> {
    let mut fields = Vec::new();
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| DatcullError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        match event {
            Event::Start(e) => {
                let name = element_name(&e);
                let attributes = read_attributes(&e, path)?;
                let text = read_field_text(reader, &name, path)?;
                fields.push(RawField {
                    name,
                    attributes,
                    text,
                });
            }
            Event::Empty(e) => {
                fields.push(RawField {
                    name: element_name(&e),
                    attributes: read_attributes(&e, path)?,
                    text: None,
                });
            }
            Event::End(e) => {
                if String::from_utf8_lossy(e.name().as_ref()) == entry_tag {
                    break;
                }
            }
            Event::Eof => {
                return Err(DatcullError::Parse {
                    path: path.to_path_buf(),
                    message: format!("unexpected end of document inside <{entry_tag}>"),
                });
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(fields)
}

fn read_field_text<R: BufRead>(
    reader: &mut Reader<R>,
    field_tag: &str,
    path: &Path,
) -> Result<Option<String>> {
    let mut text = String::new();
    let mut depth = 0usize;
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| DatcullError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        match event {
            Event::Text(t) => {
                let unescaped = t.unescape().map_err(|e| DatcullError::Parse {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
                text.push_str(&unescaped);
            }
            Event::Start(_) => depth += 1,
            Event::End(e) => {
                if depth == 0 && String::from_utf8_lossy(e.name().as_ref()) == field_tag {
                    break;
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => {
                return Err(DatcullError::Parse {
                    path: path.to_path_buf(),
                    message: format!("unexpected end of document inside <{field_tag}>"),
                });
            }
            _ => {}
        }
        buf.clear();
    }

    let text = text.trim();
    Ok(if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    })
}

fn skip_subtree<R: BufRead>(reader: &mut Reader<R>, tag: &str, path: &Path) -> Result<()> {
    let mut depth = 0usize;
    let mut buf = Vec::new();
    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| DatcullError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        match event {
            Event::Start(_) => depth += 1,
            Event::End(e) => {
                if depth == 0 && String::from_utf8_lossy(e.name().as_ref()) == tag {
                    return Ok(());
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => {
                return Err(DatcullError::Parse {
                    path: path.to_path_buf(),
                    message: format!("unexpected end of document inside <{tag}>"),
                });
            }
            _ => {}
        }
        buf.clear();
    }
}

fn build_entry(
    element: String,
    attributes: IndexMap<String, String>,
    fields: Vec<RawField>,
    index: usize,
    seen_ids: &mut HashMap<String, usize>,
) -> Entry {
    let name = attributes
        .get("name")
        .cloned()
        .or_else(|| {
            fields
                .iter()
                .find(|f| f.name == "name" || f.name == "description")
                .and_then(|f| f.text.clone())
        })
        .unwrap_or_else(|| format!("entry-{}", index + 1));

    let base_id = attributes.get("id").cloned().unwrap_or_else(|| name.clone());
    let id = match seen_ids.entry(base_id.clone()) {
        std::collections::hash_map::Entry::Occupied(mut seen) => {
            *seen.get_mut() += 1;
            let id = format!("{base_id} #{}", seen.get());
            debug!(entry = %base_id, disambiguated = %id, "duplicate entry id");
            id
        }
        std::collections::hash_map::Entry::Vacant(slot) => {
            slot.insert(1);
            base_id
        }
    };

    let description = fields
        .iter()
        .find(|f| f.name == "description")
        .and_then(|f| f.text.as_deref());
    let tags = detect_tags(&name, description);

    Entry {
        id,
        name,
        element,
        tags,
        attributes,
        fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<datafile build="test">
  <header>
    <name>Sony - PlayStation</name>
    <version>1.0</version>
  </header>
  <game name="Chrono Saga (USA) (Disc 1)">
    <description>Chrono Saga (USA) (Disc 1)</description>
    <year>1997</year>
    <rom name="chrono1.bin" size="123456" crc="abcd1234"/>
  </game>
  <game name="Chrono Saga (USA) (Disc 2)">
    <description>Chrono Saga (USA) (Disc 2)</description>
    <rom name="chrono2.bin" size="123457" crc="abcd1235"/>
  </game>
</datafile>
"#;

    #[test]
    fn test_parse_sample() {
        let collection = DatParser::new().parse_str(SAMPLE).unwrap();

        assert_eq!(collection.root_tag, "datafile");
        assert_eq!(collection.root_attributes.get("build").unwrap(), "test");
        assert_eq!(collection.header.get("name").unwrap(), "Sony - PlayStation");
        assert_eq!(collection.len(), 2);
        assert!(collection.digest.starts_with("sha256:"));

        let first = &collection.entries[0];
        assert_eq!(first.name, "Chrono Saga (USA) (Disc 1)");
        assert_eq!(first.tags.disc, Some(1));
        assert_eq!(first.field_text("year"), Some("1997"));

        let rom = first.fields.iter().find(|f| f.name == "rom").unwrap();
        assert_eq!(rom.attributes.get("crc").unwrap(), "abcd1234");
        assert_eq!(rom.text, None);
    }

    #[test]
    fn test_parse_malformed_xml() {
        let err = DatParser::new().parse_str("<datafile><game name=").unwrap_err();
        assert!(matches!(err, DatcullError::Parse { .. }));
    }

    #[test]
    fn test_parse_empty_collection() {
        let source = "<datafile><header><name>Empty</name></header></datafile>";
        let err = DatParser::new().parse_str(source).unwrap_err();
        assert!(matches!(err, DatcullError::EmptyCollection(_)));
    }

    #[test]
    fn test_duplicate_names_get_distinct_ids() {
        let source = r#"<datafile>
  <game name="Twin Title"><description>first</description></game>
  <game name="Twin Title"><description>second</description></game>
</datafile>"#;
        let collection = DatParser::new().parse_str(source).unwrap();
        assert_eq!(collection.entries[0].id, "Twin Title");
        assert_eq!(collection.entries[1].id, "Twin Title #2");
    }

    #[test]
    fn test_max_entries() {
        let parser = DatParser::with_config(ParserConfig {
            max_entries: Some(1),
            ..ParserConfig::default()
        });
        let collection = parser.parse_str(SAMPLE).unwrap();
        assert_eq!(collection.len(), 1);
    }
}
