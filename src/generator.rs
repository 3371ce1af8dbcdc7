//! Content generators: turn a manifestation's raw streams into [`Content`].

use quick_xml::Reader;
use quick_xml::events::Event;
use std::collections::HashMap;

use crate::error::GeneratorError;
use crate::types::{Content, TypedValue};

/// Stream holding the manifestation's own (local) record.
pub const LOCAL_DATA: &str = "localData";
/// Stream holding the shared record the local one amends.
pub const COMMON_DATA: &str = "commonData";
/// Dublin Core summary stream.
pub const DUBLIN_CORE: &str = "DC";

/// Streams handed to a generator, in priority order.
pub const GENERATOR_STREAMS: [&str; 3] = [LOCAL_DATA, COMMON_DATA, DUBLIN_CORE];

/// A stateful generator, leased from a [`ResourcePool`](crate::pool::ResourcePool).
pub trait ContentGenerator: Send {
    /// Build content for `manifestation_id` from `streams` (stream name to raw text).
    ///
    /// Returns [`GeneratorError::Transient`] when the input is unusable and
    /// [`GeneratorError::Broken`] when the generator itself must be discarded.
    fn generate(
        &mut self,
        manifestation_id: &str,
        streams: &HashMap<String, String>,
    ) -> Result<Content, GeneratorError>;
}

/// Fields found in one Dublin-Core-shaped record.
#[derive(Debug, Default)]
struct DcFields {
    titles: Vec<String>,
    creators: Vec<TypedValue>,
    descriptions: Vec<String>,
    subjects: Vec<TypedValue>,
    material_types: Vec<String>,
    work_types: Vec<String>,
}

impl DcFields {
    fn parse(xml: &str) -> Result<Self, String> {
        let mut fields = DcFields::default();
        let mut reader = Reader::from_str(xml);
        let mut current: Option<(String, Option<String>)> = None;
        let mut text = String::new();
        loop {
            match reader.read_event().map_err(|e| e.to_string())? {
                Event::Start(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    let value_type = e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.local_name().as_ref() == b"type")
                        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()));
                    current = Some((name, value_type));
                    text.clear();
                }
                Event::Text(t) => {
                    if current.is_some() {
                        text.push_str(&t.unescape().map_err(|e| e.to_string())?);
                    }
                }
                Event::End(_) => {
                    if let Some((name, value_type)) = current.take() {
                        fields.add(&name, value_type, text.trim());
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(fields)
    }

    fn add(&mut self, name: &str, value_type: Option<String>, value: &str) {
        if value.is_empty() {
            return;
        }
        let typed = || TypedValue {
            value_type: value_type.clone(),
            value: value.to_string(),
        };
        match name {
            "title" => self.titles.push(value.to_string()),
            "creator" => self.creators.push(typed()),
            "description" => self.descriptions.push(value.to_string()),
            "subject" => self.subjects.push(typed()),
            "type" if value_type.as_deref().is_some_and(|t| t.ends_with("WorkType")) => {
                self.work_types.push(value.to_string())
            }
            "type" => self.material_types.push(value.to_string()),
            _ => {}
        }
    }
}

/// Native generator reading Dublin Core fields from the local record, the common record and the
/// DC stream. For each field the first stream (in [`GENERATOR_STREAMS`] order) that has it wins.
#[derive(Debug, Default)]
pub struct DcContentGenerator {
    generated: usize,
}

impl DcContentGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Manifestations generated by this instance.
    pub fn generated(&self) -> usize {
        self.generated
    }
}

fn first_non_empty<T: Clone>(records: &[DcFields], pick: impl Fn(&DcFields) -> &Vec<T>) -> Vec<T> {
    records
        .iter()
        .map(&pick)
        .find(|v| !v.is_empty())
        .cloned()
        .unwrap_or_default()
}

impl ContentGenerator for DcContentGenerator {
    fn generate(
        &mut self,
        manifestation_id: &str,
        streams: &HashMap<String, String>,
    ) -> Result<Content, GeneratorError> {
        let transient = |reason: String| GeneratorError::Transient {
            manifestation_id: manifestation_id.to_string(),
            reason,
        };
        let mut records = Vec::with_capacity(GENERATOR_STREAMS.len());
        for stream in GENERATOR_STREAMS {
            match streams.get(stream).map(|s| s.trim()) {
                Some(xml) if !xml.is_empty() => {
                    records.push(DcFields::parse(xml).map_err(|e| transient(format!("{stream}: {e}")))?)
                }
                _ => {}
            }
        }
        let titles = first_non_empty(&records, |r| &r.titles);
        let title = titles
            .first()
            .cloned()
            .ok_or_else(|| transient("no title".to_string()))?;
        self.generated += 1;
        Ok(Content {
            manifestation_id: manifestation_id.to_string(),
            title: Some(title),
            full_title: Some(titles.join(" : ")),
            creators: first_non_empty(&records, |r| &r.creators),
            description: first_non_empty(&records, |r| &r.descriptions).into_iter().next(),
            subjects: first_non_empty(&records, |r| &r.subjects),
            material_types: first_non_empty(&records, |r| &r.material_types),
            work_types: first_non_empty(&records, |r| &r.work_types),
        })
    }
}
