//! Writer for filtered game-list documents.
//!
//! Output mirrors the source structure: same root element, the original
//! header plus injected run metadata, and the kept entries re-emitted with
//! their opaque attributes and children unchanged.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use tracing::info;

use crate::error::{DatcullError, Result};

use super::entry::{Collection, Entry};

/// Metadata injected into the output header to describe the filtering run.
#[derive(Debug, Clone)]
pub struct OutputMetadata {
    /// Scoring provider that produced the decisions.
    pub provider: String,
    /// Criteria active during the run.
    pub criteria: Vec<String>,
    /// Entry count before filtering.
    pub original_count: usize,
    /// Entry count after filtering.
    pub kept_count: usize,
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
}

/// Render the filtered document to a string.
pub fn render_filtered(
    collection: &Collection,
    kept_ids: &HashSet<String>,
    metadata: &OutputMetadata,
) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut root = BytesStart::new(collection.root_tag.as_str());
    for (key, value) in &collection.root_attributes {
        root.push_attribute((key.as_str(), value.as_str()));
    }
    writer.write_event(Event::Start(root))?;

    write_header(&mut writer, collection, metadata)?;

    for entry in &collection.entries {
        if kept_ids.contains(&entry.id) {
            write_entry(&mut writer, entry)?;
        }
    }

    writer.write_event(Event::End(BytesEnd::new(collection.root_tag.as_str())))?;

    let bytes = writer.into_inner();
    String::from_utf8(bytes)
        .map_err(|e| DatcullError::Persistence(format!("output is not valid UTF-8: {e}")))
}

/// Write the filtered document to a file.
pub fn write_filtered_file(
    collection: &Collection,
    kept_ids: &HashSet<String>,
    metadata: &OutputMetadata,
    path: impl AsRef<Path>,
) -> Result<()> {
    let path = path.as_ref();
    let rendered = render_filtered(collection, kept_ids, metadata)?;
    std::fs::write(path, rendered).map_err(|e| DatcullError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    info!(
        path = %path.display(),
        kept = metadata.kept_count,
        original = metadata.original_count,
        "wrote filtered game list"
    );
    Ok(())
}

fn write_header(
    writer: &mut Writer<Vec<u8>>,
    collection: &Collection,
    metadata: &OutputMetadata,
) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new("header")))?;

    for (key, value) in &collection.header {
        write_text_element(writer, key, value)?;
    }

    write_text_element(writer, "filter_provider", &metadata.provider)?;
    write_text_element(writer, "filter_criteria", &metadata.criteria.join(","))?;
    write_text_element(
        writer,
        "filtered_date",
        &metadata.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
    )?;
    write_text_element(
        writer,
        "original_games_count",
        &metadata.original_count.to_string(),
    )?;
    write_text_element(
        writer,
        "filtered_games_count",
        &metadata.kept_count.to_string(),
    )?;

    writer.write_event(Event::End(BytesEnd::new("header")))?;
    Ok(())
}

fn write_entry(writer: &mut Writer<Vec<u8>>, entry: &Entry) -> Result<()> {
    let mut start = BytesStart::new(entry.element.as_str());
    for (key, value) in &entry.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if entry.fields.is_empty() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }

    writer.write_event(Event::Start(start))?;
    for field in &entry.fields {
        let mut field_start = BytesStart::new(field.name.as_str());
        for (key, value) in &field.attributes {
            field_start.push_attribute((key.as_str(), value.as_str()));
        }
        match &field.text {
            Some(text) => {
                writer.write_event(Event::Start(field_start))?;
                writer.write_event(Event::Text(BytesText::new(text)))?;
                writer.write_event(Event::End(BytesEnd::new(field.name.as_str())))?;
            }
            None => writer.write_event(Event::Empty(field_start))?,
        }
    }
    writer.write_event(Event::End(BytesEnd::new(entry.element.as_str())))?;
    Ok(())
}

fn write_text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::DatParser;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<datafile>
  <header>
    <name>Sega - Saturn</name>
  </header>
  <game name="Keeper (USA)">
    <description>Keeper (USA)</description>
    <rom name="keeper.bin" size="42" crc="00ff00ff"/>
  </game>
  <game name="Dropper (Japan)">
    <description>Dropper (Japan)</description>
  </game>
</datafile>
"#;

    fn metadata(kept: usize) -> OutputMetadata {
        OutputMetadata {
            provider: "random".to_string(),
            criteria: vec!["metacritic".to_string(), "historical".to_string()],
            original_count: 2,
            kept_count: kept,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_round_trip_keeps_only_kept_entries() {
        let collection = DatParser::new().parse_str(SAMPLE).unwrap();
        let kept: HashSet<String> = ["Keeper (USA)".to_string()].into();

        let output = render_filtered(&collection, &kept, &metadata(1)).unwrap();

        assert!(output.contains("Keeper (USA)"));
        assert!(!output.contains("Dropper (Japan)"));
        assert!(output.contains("<filter_provider>random</filter_provider>"));
        assert!(output.contains("<filtered_games_count>1</filtered_games_count>"));
    }

    #[test]
    fn test_round_trip_preserves_opaque_attributes() {
        let collection = DatParser::new().parse_str(SAMPLE).unwrap();
        let kept: HashSet<String> = ["Keeper (USA)".to_string()].into();

        let output = render_filtered(&collection, &kept, &metadata(1)).unwrap();
        let reparsed = DatParser::new().parse_str(&output).unwrap();

        let original = collection.get("Keeper (USA)").unwrap();
        let kept_entry = reparsed.get("Keeper (USA)").unwrap();
        assert_eq!(original.attributes, kept_entry.attributes);
        assert_eq!(original.fields, kept_entry.fields);
    }

    #[test]
    fn test_header_survives_round_trip() {
        let collection = DatParser::new().parse_str(SAMPLE).unwrap();
        let kept: HashSet<String> = ["Keeper (USA)".to_string()].into();

        let output = render_filtered(&collection, &kept, &metadata(1)).unwrap();
        let reparsed = DatParser::new().parse_str(&output).unwrap();

        assert_eq!(reparsed.header.get("name").unwrap(), "Sega - Saturn");
        assert_eq!(reparsed.header.get("filter_provider").unwrap(), "random");
    }
}
