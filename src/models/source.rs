// Source Reference Model
// Production-scoped bindings of ingest/HTML/media feeds to input slots

use serde::{Deserialize, Serialize};

/// SourceReference - a feed bound into a production at an input slot
/// Tagged enum with type discriminator matching the document contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceReference {
    /// Ingest source (camera/SRT feed provisioned as backend streams)
    IngestSource(IngestSourceRef),
    /// HTML rendering-engine source
    Html(HtmlSourceRef),
    /// Media player rendering-engine source
    Mediaplayer(MediaSourceRef),
}

impl SourceReference {
    /// Get the unique ID of this source reference
    pub fn id(&self) -> &str {
        match self {
            SourceReference::IngestSource(s) => &s.id,
            SourceReference::Html(s) => &s.id,
            SourceReference::Mediaplayer(s) => &s.id,
        }
    }

    /// Get the display label of this source reference
    pub fn label(&self) -> &str {
        match self {
            SourceReference::IngestSource(s) => &s.label,
            SourceReference::Html(s) => &s.label,
            SourceReference::Mediaplayer(s) => &s.label,
        }
    }

    /// Get the 1-based input slot this source occupies
    pub fn input_slot(&self) -> u32 {
        match self {
            SourceReference::IngestSource(s) => s.input_slot,
            SourceReference::Html(s) => s.input_slot,
            SourceReference::Mediaplayer(s) => s.input_slot,
        }
    }

    /// Replace the display label
    pub fn set_label(&mut self, label: &str) {
        match self {
            SourceReference::IngestSource(s) => s.label = label.to_string(),
            SourceReference::Html(s) => s.label = label.to_string(),
            SourceReference::Mediaplayer(s) => s.label = label.to_string(),
        }
    }

    /// Stream UUIDs provisioned for this source, if any
    pub fn stream_uuids(&self) -> Option<&[String]> {
        match self {
            SourceReference::IngestSource(s) => s.stream_uuids.as_deref(),
            _ => None,
        }
    }
}

/// Ingest source reference - backed by one backend stream per pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestSourceRef {
    /// Unique identifier
    #[serde(rename = "_id")]
    pub id: String,
    /// Display label, shown on multiview tiles bound to this slot
    pub label: String,
    /// 1-based input slot, unique within the production
    pub input_slot: u32,
    /// One stream UUID per pipeline once provisioned on the backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_uuids: Option<Vec<String>>,
}

/// HTML source reference - rendered by the backend rendering engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HtmlSourceRef {
    #[serde(rename = "_id")]
    pub id: String,
    pub label: String,
    pub input_slot: u32,
    pub html_data: HtmlData,
}

/// Media player source reference - file playback by the rendering engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaSourceRef {
    #[serde(rename = "_id")]
    pub id: String,
    pub label: String,
    pub input_slot: u32,
    pub media_data: MediaData,
}

/// HTML page parameters for a rendering-engine browser source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HtmlData {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

/// Media file parameters for a rendering-engine player source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaData {
    pub filename: String,
}

/// An ingest source from the connected inventory, addressed on the live
/// backend by ingest name + source name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestSource {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub ingest_name: String,
    pub ingest_source_name: String,
}
