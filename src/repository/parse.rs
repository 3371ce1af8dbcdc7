//! Parsers for the repository's XML documents (object profiles, stream profiles, stream lists,
//! RELS-SYS and RELS-EXT).
//!
//! All of them are driven by [`for_each_element`], which reports every element once it closes:
//! leaf elements with their text, elements that contain child elements with `None`.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::{BTreeSet, HashMap};

use super::{DataStreamMetaData, ExternalRelations, ObjectMetaData, SystemRelations};
use crate::types::{RelationType, Timestamp};

/// Attributes of one element, keyed by local name.
pub type Attributes = HashMap<String, String>;

/// Repository timestamps look like `2018-11-24T23:58:36.175+01:00`.
pub fn parse_timestamp(ts: &str) -> Result<Timestamp> {
    DateTime::parse_from_rfc3339(ts.trim())
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp {ts:?}"))
}

fn local_name(e: &BytesStart<'_>) -> Result<String> {
    let name = e.local_name();
    Ok(std::str::from_utf8(name.as_ref())
        .context("element name is not UTF-8")?
        .to_string())
}

fn attributes(e: &BytesStart<'_>) -> Result<Attributes> {
    let mut attrs = HashMap::new();
    for attr in e.attributes().flatten() {
        let key = std::str::from_utf8(attr.key.local_name().as_ref())
            .context("attribute name is not UTF-8")?
            .to_string();
        let value = attr
            .unescape_value()
            .context("invalid attribute value")?
            .into_owned();
        attrs.insert(key, value);
    }
    Ok(attrs)
}

/// Walk `xml` and call `f(local_name, attributes, text)` as each element closes.
///
/// `text` is the trimmed character content for leaf elements and `None` for elements that had
/// child elements.
pub fn for_each_element<F>(xml: &str, mut f: F) -> Result<()>
where
    F: FnMut(&str, &Attributes, Option<&str>) -> Result<()>,
{
    let mut reader = Reader::from_str(xml);
    let mut open: Option<(String, Attributes, String)> = None;
    loop {
        match reader.read_event().context("malformed XML")? {
            Event::Start(e) => {
                if let Some((name, attrs, _)) = open.take() {
                    f(&name, &attrs, None)?;
                }
                open = Some((local_name(&e)?, attributes(&e)?, String::new()));
            }
            Event::Empty(e) => {
                if let Some((name, attrs, _)) = open.take() {
                    f(&name, &attrs, None)?;
                }
                f(&local_name(&e)?, &attributes(&e)?, Some(""))?;
            }
            Event::Text(t) => {
                if let Some((_, _, buf)) = open.as_mut() {
                    buf.push_str(&t.unescape().context("invalid text content")?);
                }
            }
            Event::CData(c) => {
                if let Some((_, _, buf)) = open.as_mut() {
                    buf.push_str(std::str::from_utf8(&c).context("CDATA is not UTF-8")?);
                }
            }
            Event::End(_) => {
                if let Some((name, attrs, buf)) = open.take() {
                    f(&name, &attrs, Some(buf.trim()))?;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(())
}

/// Leaf element texts grouped by local name, in document order.
fn simple_fields(xml: &str) -> Result<HashMap<String, Vec<String>>> {
    let mut fields: HashMap<String, Vec<String>> = HashMap::new();
    for_each_element(xml, |name, _, text| {
        if let Some(text) = text {
            fields
                .entry(name.to_string())
                .or_default()
                .push(text.to_string());
        }
        Ok(())
    })?;
    Ok(fields)
}

pub fn parse_object_profile(xml: &str) -> Result<ObjectMetaData> {
    let mut id = None;
    let mut created = None;
    let mut modified = None;
    let mut active = None;
    for_each_element(xml, |name, attrs, text| {
        match (name, text) {
            ("objectProfile", _) => id = attrs.get("pid").cloned(),
            ("objCreateDate", Some(t)) => created = Some(parse_timestamp(t)?),
            ("objLastModDate", Some(t)) => modified = Some(parse_timestamp(t)?),
            ("objState", Some(t)) => active = Some(t == "A"),
            _ => {}
        }
        Ok(())
    })?;
    Ok(ObjectMetaData {
        id: id.ok_or_else(|| anyhow!("object profile is missing pid"))?,
        created: created.ok_or_else(|| anyhow!("object profile is missing created"))?,
        modified: modified.ok_or_else(|| anyhow!("object profile is missing modified"))?,
        active: active.ok_or_else(|| anyhow!("object profile is missing state"))?,
    })
}

pub fn parse_datastream_profile(xml: &str) -> Result<DataStreamMetaData> {
    let mut id = None;
    let mut created = None;
    let mut active = None;
    for_each_element(xml, |name, attrs, text| {
        match (name, text) {
            ("datastreamProfile", _) => id = attrs.get("pid").cloned(),
            ("dsCreateDate", Some(t)) => created = Some(parse_timestamp(t)?),
            ("dsState", Some(t)) => active = Some(t == "A"),
            _ => {}
        }
        Ok(())
    })?;
    Ok(DataStreamMetaData {
        id: id.ok_or_else(|| anyhow!("datastream profile is missing pid"))?,
        created: created.ok_or_else(|| anyhow!("datastream profile is missing created"))?,
        active: active.ok_or_else(|| anyhow!("datastream profile is missing state"))?,
    })
}

pub fn parse_datastreams(xml: &str) -> Result<BTreeSet<String>> {
    let mut streams = BTreeSet::new();
    for_each_element(xml, |name, attrs, _| {
        if name == "datastream"
            && let Some(dsid) = attrs.get("dsid")
        {
            streams.insert(dsid.clone());
        }
        Ok(())
    })?;
    Ok(streams)
}

/// RELS-SYS. The node kind is read from the id prefix (`work:`, `unit:`, anything else is an object).
pub fn parse_rels_sys(xml: &str) -> Result<SystemRelations> {
    let mut id = None;
    let mut fields: HashMap<String, Vec<String>> = HashMap::new();
    for_each_element(xml, |name, attrs, text| {
        if name == "Description"
            && let Some(about) = attrs.get("about")
        {
            id = Some(about.split_once('/').map_or(about.as_str(), |(_, r)| r).to_string());
        }
        if let Some(text) = text {
            fields
                .entry(name.to_string())
                .or_default()
                .push(text.to_string());
        }
        Ok(())
    })?;
    let id = id.ok_or_else(|| anyhow!("RELS-SYS does not contain the id of the record"))?;
    let mut take = |key: &str| fields.remove(key).unwrap_or_default();

    let rels = if id.starts_with("work:") {
        SystemRelations {
            parent: None,
            children: take("hasMemberOfWork"),
            primary: true,
            id,
        }
    } else if id.starts_with("unit:") {
        SystemRelations {
            parent: take("isMemberOfWork").into_iter().next(),
            children: take("hasMemberOfUnit"),
            primary: !take("isPrimaryUnitObjectFor").is_empty(),
            id,
        }
    } else {
        SystemRelations {
            parent: take("isMemberOfUnit").into_iter().next(),
            children: Vec::new(),
            primary: !take("isPrimaryBibObjectFor").is_empty(),
            id,
        }
    };
    log::trace!("RELS-SYS: {:?}", rels);
    Ok(rels)
}

/// RELS-EXT. Predicates that are not relation types are ignored.
pub fn parse_rels_ext(xml: &str) -> Result<ExternalRelations> {
    let mut relations = ExternalRelations::new();
    for (name, values) in simple_fields(xml)? {
        if let Some(relation_type) = RelationType::from_name(&name) {
            relations.entry(relation_type).or_default().extend(values);
        }
    }
    Ok(relations)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OBJECT_PROFILE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<objectProfile xmlns="http://www.fedora.info/definitions/1/0/access/" pid="870970-basis:12345678">
  <objLabel/>
  <objCreateDate>2018-11-24T23:58:36.175+01:00</objCreateDate>
  <objLastModDate>2019-01-02T03:04:05.678Z</objLastModDate>
  <objState>A</objState>
</objectProfile>"#;

    #[test]
    fn object_profile() {
        let meta = parse_object_profile(OBJECT_PROFILE).unwrap();
        assert_eq!(meta.id, "870970-basis:12345678");
        assert!(meta.active);
        assert_eq!(meta.created.timestamp_millis(), 1543100316175);
        assert_eq!(
            meta.modified,
            parse_timestamp("2019-01-02T04:04:05.678+01:00").unwrap()
        );
    }

    #[test]
    fn object_profile_requires_state() {
        let xml = OBJECT_PROFILE.replace("<objState>A</objState>", "");
        assert!(parse_object_profile(&xml).is_err());
    }

    #[test]
    fn datastream_profile_inactive() {
        let xml = r#"<datastreamProfile pid="870970-basis:1" dsID="localData.870970">
  <dsCreateDate>2019-01-01T00:00:00.000Z</dsCreateDate>
  <dsState>D</dsState>
</datastreamProfile>"#;
        let meta = parse_datastream_profile(xml).unwrap();
        assert_eq!(meta.id, "870970-basis:1");
        assert!(!meta.active);
    }

    #[test]
    fn datastream_list() {
        let xml = r#"<objectDatastreams pid="870970-basis:1">
  <datastream dsid="DC" label="" mimeType="text/xml"/>
  <datastream dsid="commonData" label="" mimeType="text/xml"/>
  <datastream dsid="localData.870970" label="" mimeType="text/xml"/>
</objectDatastreams>"#;
        let streams = parse_datastreams(xml).unwrap();
        assert_eq!(streams.len(), 3);
        assert!(streams.contains("localData.870970"));
    }

    #[test]
    fn rels_sys_unit() {
        let xml = r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
  <rdf:Description rdf:about="info:fedora/unit:2">
    <isMemberOfWork xmlns="http://oss.dbc.dk/rdf/dbcaddi#">work:1</isMemberOfWork>
    <hasMemberOfUnit xmlns="http://oss.dbc.dk/rdf/dbcaddi#">870970-basis:1</hasMemberOfUnit>
    <hasMemberOfUnit xmlns="http://oss.dbc.dk/rdf/dbcaddi#">870970-basis:2</hasMemberOfUnit>
    <isPrimaryUnitObjectFor xmlns="http://oss.dbc.dk/rdf/dbcaddi#">work:1</isPrimaryUnitObjectFor>
  </rdf:Description>
</rdf:RDF>"#;
        let rels = parse_rels_sys(xml).unwrap();
        assert_eq!(rels.id, "unit:2");
        assert_eq!(rels.parent.as_deref(), Some("work:1"));
        assert_eq!(rels.children, vec!["870970-basis:1", "870970-basis:2"]);
        assert!(rels.primary);
    }

    #[test]
    fn rels_sys_object_not_primary() {
        let xml = r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
  <rdf:Description rdf:about="info:fedora/870970-basis:2">
    <isMemberOfUnit xmlns="http://oss.dbc.dk/rdf/dbcaddi#">unit:2</isMemberOfUnit>
  </rdf:Description>
</rdf:RDF>"#;
        let rels = parse_rels_sys(xml).unwrap();
        assert_eq!(rels.parent.as_deref(), Some("unit:2"));
        assert!(rels.children.is_empty());
        assert!(!rels.primary);
    }

    #[test]
    fn rels_ext_ignores_unknown_predicates() {
        let xml = r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
  <rdf:Description rdf:about="info:fedora/unit:2">
    <hasReview xmlns="http://oss.dbc.dk/rdf/dbcaddi#">unit:7</hasReview>
    <hasReview xmlns="http://oss.dbc.dk/rdf/dbcaddi#">unit:8</hasReview>
    <somethingElse xmlns="http://oss.dbc.dk/rdf/dbcaddi#">unit:9</somethingElse>
  </rdf:Description>
</rdf:RDF>"#;
        let rels = parse_rels_ext(xml).unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[&RelationType::HasReview], vec!["unit:7", "unit:8"]);
    }
}
