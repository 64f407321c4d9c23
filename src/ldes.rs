use std::collections::HashSet;

use oxrdf::Triple;
use oxrdfio::{RdfFormat, RdfParser, RdfSerializer};
use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;

use crate::formats::{Member, Page};

pub const NTRIPLES_EXTENSION: &str = "nt";
const JSONLD_MEDIA_TYPE: &str = "application/ld+json";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("page body is not valid json: {0}")]
    InvalidJson(String),
    #[error("page body is not a json object")]
    NotAnObject,
    #[error("member #{index} is not a json object")]
    MemberNotAnObject { index: usize },
    #[error("member #{index} has no identifier")]
    MissingMemberId { index: usize },
    #[error("serialize member {logical_id}: {message}")]
    Serialize { logical_id: String, message: String },
}

/// Turns a fetched page body into members and relations, and members into
/// storage bytes.
pub trait Converter {
    fn convert(&self, page_uri: &str, body: &str) -> Result<Page, ConversionError>;

    fn serialize(&self, member: &Member) -> Result<Vec<u8>, ConversionError>;

    /// File extension of the serialized artifacts.
    fn extension(&self) -> &str;
}

impl<C: Converter + ?Sized> Converter for &C {
    fn convert(&self, page_uri: &str, body: &str) -> Result<Page, ConversionError> {
        (**self).convert(page_uri, body)
    }

    fn serialize(&self, member: &Member) -> Result<Vec<u8>, ConversionError> {
        (**self).serialize(member)
    }

    fn extension(&self) -> &str {
        (**self).extension()
    }
}

/// Reads Linked Data Event Stream pages encoded as JSON-LD and stores each
/// member as an N-Triples graph.
#[derive(Debug, Clone, Copy, Default)]
pub struct LdesConverter;

const MEMBER_FIELDS: [&str; 4] = ["member", "members", "@member", "@members"];
const MEMBER_ID_FIELDS: [&str; 3] = ["@id", "id", "object"];

impl Converter for LdesConverter {
    fn convert(&self, page_uri: &str, body: &str) -> Result<Page, ConversionError> {
        let document: Value = serde_json::from_str(body)
            .map_err(|err| ConversionError::InvalidJson(err.to_string()))?;
        let Value::Object(document) = document else {
            return Err(ConversionError::NotAnObject);
        };

        let context = document.get("@context");
        let members = extract_members(&document)
            .into_iter()
            .enumerate()
            .map(|(index, raw)| member_from_value(index, raw, context))
            .collect();
        let relations = resolve_relations(page_uri, extract_relations(&document));

        Ok(Page {
            uri: page_uri.to_owned(),
            members,
            relations,
        })
    }

    /// Parses the member document as JSON-LD and writes its triples as
    /// N-Triples. Named graphs are merged into the one member graph.
    fn serialize(&self, member: &Member) -> Result<Vec<u8>, ConversionError> {
        let fail = |message: String| ConversionError::Serialize {
            logical_id: member.logical_id.clone(),
            message,
        };

        let document = serde_json::to_vec(&member.payload).map_err(|err| fail(err.to_string()))?;
        let format = RdfFormat::from_media_type(JSONLD_MEDIA_TYPE)
            .ok_or_else(|| fail("no JSON-LD parser available".to_owned()))?;

        let mut seen = HashSet::new();
        let mut serializer = RdfSerializer::from_format(RdfFormat::NTriples).for_writer(Vec::new());
        for quad in RdfParser::from_format(format).for_reader(document.as_slice()) {
            let quad = quad.map_err(|err| fail(err.to_string()))?;
            let triple = Triple::new(quad.subject, quad.predicate, quad.object);
            if seen.insert(triple.clone()) {
                serializer
                    .serialize_triple(&triple)
                    .map_err(|err| fail(err.to_string()))?;
            }
        }
        serializer.finish().map_err(|err| fail(err.to_string()))
    }

    fn extension(&self) -> &str {
        NTRIPLES_EXTENSION
    }
}

fn extract_members(document: &Map<String, Value>) -> Vec<&Value> {
    let mut members = Vec::new();
    for field in MEMBER_FIELDS {
        match document.get(field) {
            Some(Value::Array(items)) => members.extend(items.iter()),
            Some(value @ Value::Object(_)) => members.push(value),
            _ => {}
        }
    }
    members
}

fn member_from_value(
    index: usize,
    raw: &Value,
    page_context: Option<&Value>,
) -> Result<Member, ConversionError> {
    let Value::Object(object) = raw else {
        return Err(ConversionError::MemberNotAnObject { index });
    };

    let logical_id = member_id(object)
        .filter(|id| !id.is_empty())
        .ok_or(ConversionError::MissingMemberId { index })?;

    Ok(Member {
        logical_id,
        payload: member_document(object, page_context),
    })
}

/// The declared identity of a member. An embedded `@graph` object names the
/// actual record, so its id wins over the envelope id.
fn member_id(member: &Map<String, Value>) -> Option<String> {
    if let Some(Value::Object(graph)) = member.get("@graph") {
        if let Some(id) = ["id", "@id"]
            .iter()
            .find_map(|field| graph.get(*field).and_then(Value::as_str))
        {
            return Some(id.to_owned());
        }
    }

    MEMBER_ID_FIELDS.iter().find_map(|field| match member.get(*field) {
        Some(Value::String(id)) => Some(id.clone()),
        Some(Value::Object(node)) => node.get("@id").and_then(Value::as_str).map(str::to_owned),
        _ => None,
    })
}

fn member_document(member: &Map<String, Value>, page_context: Option<&Value>) -> Value {
    let member_context = member.get("@context").or(page_context).cloned();

    let mut document = match member.get("@graph") {
        Some(Value::Object(graph)) => graph.clone(),
        Some(graph @ Value::Array(_)) => {
            let mut wrapped = Map::new();
            wrapped.insert("@graph".to_owned(), graph.clone());
            wrapped
        }
        _ => member.clone(),
    };

    if !document.contains_key("@context") {
        if let Some(context) = member_context {
            document.insert("@context".to_owned(), context);
        }
    }

    Value::Object(document)
}

fn extract_relations(document: &Map<String, Value>) -> Vec<String> {
    let mut urls = Vec::new();
    let is_event_stream = is_event_stream(document);

    let views = match first_of(document, &["view", "@view"]) {
        Some(Value::Array(views)) => views.iter().collect(),
        Some(view @ Value::Object(_)) => vec![view],
        _ => Vec::new(),
    };
    for view in views {
        let Value::Object(view) = view else {
            continue;
        };
        if is_event_stream {
            if let Some(id) = node_id(view) {
                urls.push(id.to_owned());
            }
        }
        if let Some(relation) = first_of(view, &["relation", "@relation"]) {
            collect_node_urls(relation, &mut urls);
        }
    }

    if let Some(relation) = first_of(document, &["relation", "@relation"]) {
        collect_node_urls(relation, &mut urls);
    }

    urls
}

fn collect_node_urls(relation: &Value, urls: &mut Vec<String>) {
    match relation {
        Value::Object(relation) => match first_of(relation, &["node", "@node"]) {
            Some(Value::String(url)) => urls.push(url.clone()),
            Some(Value::Object(node)) => {
                if let Some(id) = node_id(node) {
                    urls.push(id.to_owned());
                }
            }
            _ => {}
        },
        Value::Array(relations) => {
            for relation in relations {
                collect_node_urls(relation, urls);
            }
        }
        _ => {}
    }
}

fn is_event_stream(document: &Map<String, Value>) -> bool {
    let is_named = |value: &Value| {
        value
            .as_str()
            .is_some_and(|name| {
                name == "EventStream"
                    || name.ends_with("#EventStream")
                    || name.ends_with(":EventStream")
            })
    };
    ["@type", "type"]
        .iter()
        .filter_map(|field| document.get(*field))
        .any(|value| match value {
            Value::Array(types) => types.iter().any(is_named),
            other => is_named(other),
        })
}

fn node_id(node: &Map<String, Value>) -> Option<&str> {
    first_of(node, &["@id", "id"]).and_then(Value::as_str)
}

fn first_of<'a>(object: &'a Map<String, Value>, fields: &[&str]) -> Option<&'a Value> {
    fields.iter().find_map(|field| object.get(*field))
}

/// Resolves relation targets against the page url and keeps http(s) targets
/// once each, in first-seen order.
fn resolve_relations(page_uri: &str, raw: Vec<String>) -> Vec<String> {
    let base = Url::parse(page_uri).ok();
    let mut out: Vec<String> = Vec::new();

    for candidate in raw {
        let parsed = match &base {
            Some(base) => base.join(&candidate),
            None => Url::parse(&candidate),
        };
        let Ok(mut url) = parsed else {
            tracing::debug!(page = page_uri, relation = %candidate, "dropping unparsable relation");
            continue;
        };
        if url.scheme() != "http" && url.scheme() != "https" {
            continue;
        }
        url.set_fragment(None);

        let url = url.to_string();
        if url != page_uri && !out.contains(&url) {
            out.push(url);
        }
    }

    out
}
