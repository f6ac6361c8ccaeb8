//! Event framing: the five BlobDVM event kinds, their tag layouts, and their
//! JSON content schemas. Builders produce [`UnsignedWireEvent`]s ready for
//! [`RelayClient::publish`]; parsers turn a received [`WireEvent`] back into
//! a typed payload, rejecting anything malformed without side effects.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{DvmError, Result};
use crate::relay::{UnsignedWireEvent, WireEvent};

pub const KIND_ANNOUNCEMENT: u16 = 31999;
pub const KIND_REQUEST: u16 = 24210;
pub const KIND_RESPONSE: u16 = 24211;
pub const KIND_CHUNK: u16 = 24212;
pub const KIND_STATUS: u16 = 21999;

pub const D_TAG_VALUE: &str = "blob-storage-v1";

fn tag(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn is_valid_hash(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

// ---------------------------------------------------------------------
// Announcement (31999)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnouncementParams {
    pub max_file_size: u64,
    pub chunk_size: u64,
    pub retention_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnouncementContent {
    pub name: String,
    pub about: String,
    #[serde(flatten)]
    pub params: AnnouncementParams,
    /// Informational JSON schema for the request shapes; not machine-parsed.
    #[serde(default)]
    pub schema: serde_json::Value,
}

pub fn build_announcement(
    name: &str,
    about: &str,
    params: AnnouncementParams,
) -> UnsignedWireEvent {
    let content = AnnouncementContent {
        name: name.to_string(),
        about: about.to_string(),
        params,
        schema: request_schema(),
    };

    UnsignedWireEvent {
        kind: KIND_ANNOUNCEMENT,
        tags: vec![
            tag(&["d", D_TAG_VALUE]),
            tag(&["k", &KIND_REQUEST.to_string()]),
            tag(&["response_kind", &KIND_RESPONSE.to_string()]),
        ],
        content: serde_json::to_string(&content).expect("AnnouncementContent always serializes"),
    }
}

fn request_schema() -> serde_json::Value {
    serde_json::json!({
        "store": {"action": "store", "data": "base64", "filename": "string?"},
        "retrieve": {"action": "retrieve", "hash": "^[a-f0-9]{64}$"},
        "delete": {"action": "delete", "hash": "^[a-f0-9]{64}$"},
    })
}

#[derive(Debug, Clone)]
pub struct ServerDescriptor {
    pub pubkey: String,
    pub d_tag: String,
    pub params: AnnouncementParams,
    pub name: String,
    pub about: String,
    pub created_at: u64,
}

/// Parses a kind-31999 event into a [`ServerDescriptor`].
pub fn parse_announcement(event: &WireEvent) -> Result<ServerDescriptor> {
    if event.kind != KIND_ANNOUNCEMENT {
        return Err(DvmError::MalformedRequest("not an announcement event".into()));
    }
    let d_tag = event
        .tag_value("d")
        .ok_or_else(|| DvmError::MalformedRequest("announcement missing d tag".into()))?
        .to_string();
    let content: AnnouncementContent = serde_json::from_str(&event.content)?;
    Ok(ServerDescriptor {
        pubkey: event.pubkey.clone(),
        d_tag,
        params: content.params,
        name: content.name,
        about: content.about,
        created_at: event.created_at,
    })
}

// ---------------------------------------------------------------------
// Request (24210)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum RequestContent {
    Store {
        data: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    Retrieve {
        hash: String,
    },
    Delete {
        hash: String,
    },
}

pub fn build_request(
    action: RequestContent,
    server_pubkey: &str,
    relay_hints: &[String],
) -> Result<UnsignedWireEvent> {
    if let RequestContent::Retrieve { hash } | RequestContent::Delete { hash } = &action {
        if !is_valid_hash(hash) {
            return Err(DvmError::InvalidHash(hash.clone()));
        }
    }

    let mut tags = vec![tag(&["a", &format!("{KIND_ANNOUNCEMENT}:{server_pubkey}:{D_TAG_VALUE}")])];
    if !relay_hints.is_empty() {
        let mut relay_tag = vec!["relays".to_string()];
        relay_tag.extend(relay_hints.iter().cloned());
        tags.push(relay_tag);
    }

    Ok(UnsignedWireEvent {
        kind: KIND_REQUEST,
        tags,
        content: serde_json::to_string(&action)?,
    })
}

/// Parses a kind-24210 event's content, enforcing the hash pattern for
/// `retrieve`/`delete` actions. Any schema violation is a
/// [`DvmError::MalformedRequest`] or [`DvmError::InvalidHash`].
pub fn parse_request(event: &WireEvent) -> Result<RequestContent> {
    if event.kind != KIND_REQUEST {
        return Err(DvmError::MalformedRequest("not a request event".into()));
    }
    let action: RequestContent = serde_json::from_str(&event.content)
        .map_err(|e| DvmError::MalformedRequest(format!("bad request content: {e}")))?;

    match &action {
        RequestContent::Retrieve { hash } | RequestContent::Delete { hash } => {
            if !is_valid_hash(hash) {
                return Err(DvmError::InvalidHash(hash.clone()));
            }
        }
        RequestContent::Store { data, .. } => {
            base64::engine::general_purpose::STANDARD
                .decode(data)
                .map_err(|e| DvmError::MalformedRequest(format!("bad base64 payload: {e}")))?;
        }
    }

    Ok(action)
}

// ---------------------------------------------------------------------
// Response (24211)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Stored,
    Available,
    Deleted,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Stored => "stored",
            ResponseStatus::Available => "available",
            ResponseStatus::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseContent {
    pub hash: String,
    pub size: u64,
    pub chunks: u32,
    pub expires: u64,
    pub status: ResponseStatus,
}

pub fn build_response(
    request_id: &str,
    requester_pubkey: &str,
    content: &ResponseContent,
) -> Result<UnsignedWireEvent> {
    Ok(UnsignedWireEvent {
        kind: KIND_RESPONSE,
        tags: vec![
            tag(&["e", request_id]),
            tag(&["p", requester_pubkey]),
            tag(&["file_hash", &content.hash]),
            tag(&["expires", &content.expires.to_string()]),
        ],
        content: serde_json::to_string(content)?,
    })
}

pub fn parse_response(event: &WireEvent) -> Result<ResponseContent> {
    if event.kind != KIND_RESPONSE {
        return Err(DvmError::MalformedRequest("not a response event".into()));
    }
    serde_json::from_str(&event.content)
        .map_err(|e| DvmError::MalformedRequest(format!("bad response content: {e}")))
}

// ---------------------------------------------------------------------
// Chunk (24212, ephemeral)
// ---------------------------------------------------------------------

pub struct ChunkEvent<'a> {
    pub file_hash: &'a str,
    pub index: u32,
    pub total: u32,
    pub chunk_hash: &'a str,
    pub expiration: u64,
    pub bytes: &'a [u8],
}

pub fn build_chunk(chunk: ChunkEvent<'_>) -> UnsignedWireEvent {
    let content = base64::engine::general_purpose::STANDARD.encode(chunk.bytes);
    UnsignedWireEvent {
        kind: KIND_CHUNK,
        tags: vec![
            tag(&["file_hash", chunk.file_hash]),
            tag(&["chunk_index", &chunk.index.to_string()]),
            tag(&["chunk_total", &chunk.total.to_string()]),
            tag(&["chunk_hash", chunk.chunk_hash]),
            tag(&["expiration", &chunk.expiration.to_string()]),
        ],
        content,
    }
}

#[derive(Debug, Clone)]
pub struct ParsedChunk {
    pub file_hash: String,
    pub index: u32,
    pub total: u32,
    pub chunk_hash: String,
    pub expiration: u64,
    pub bytes: Vec<u8>,
}

pub fn parse_chunk(event: &WireEvent) -> Result<ParsedChunk> {
    if event.kind != KIND_CHUNK {
        return Err(DvmError::MalformedRequest("not a chunk event".into()));
    }
    let file_hash = event
        .tag_value("file_hash")
        .ok_or_else(|| DvmError::MalformedRequest("chunk missing file_hash tag".into()))?
        .to_string();
    let index: u32 = event
        .tag_value("chunk_index")
        .ok_or_else(|| DvmError::MalformedRequest("chunk missing chunk_index tag".into()))?
        .parse()
        .map_err(|_| DvmError::MalformedRequest("chunk_index not a number".into()))?;
    let total: u32 = event
        .tag_value("chunk_total")
        .ok_or_else(|| DvmError::MalformedRequest("chunk missing chunk_total tag".into()))?
        .parse()
        .map_err(|_| DvmError::MalformedRequest("chunk_total not a number".into()))?;
    let chunk_hash = event
        .tag_value("chunk_hash")
        .ok_or_else(|| DvmError::MalformedRequest("chunk missing chunk_hash tag".into()))?
        .to_string();
    let expiration: u64 = event
        .tag_value("expiration")
        .ok_or_else(|| DvmError::MalformedRequest("chunk missing expiration tag".into()))?
        .parse()
        .map_err(|_| DvmError::MalformedRequest("expiration not a number".into()))?;
    let bytes = base64::engine::general_purpose::STANDARD.decode(&event.content)?;

    Ok(ParsedChunk {
        file_hash,
        index,
        total,
        chunk_hash,
        expiration,
        bytes,
    })
}

// ---------------------------------------------------------------------
// Status (21999)
// ---------------------------------------------------------------------

pub fn build_processing_status(request_id: &str, requester_pubkey: &str) -> UnsignedWireEvent {
    UnsignedWireEvent {
        kind: KIND_STATUS,
        tags: vec![
            tag(&["e", request_id]),
            tag(&["p", requester_pubkey]),
            tag(&["status", "processing"]),
        ],
        content: "processing your request".to_string(),
    }
}

pub fn build_error_status(
    request_id: &str,
    requester_pubkey: &str,
    code: crate::error::ErrorCode,
    message: &str,
) -> UnsignedWireEvent {
    UnsignedWireEvent {
        kind: KIND_STATUS,
        tags: vec![
            tag(&["e", request_id]),
            tag(&["p", requester_pubkey]),
            tag(&["status", "error"]),
            tag(&["error_code", code.as_str()]),
        ],
        content: message.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub request_id: Option<String>,
    pub status: Option<String>,
    pub error_code: Option<crate::error::ErrorCode>,
    pub message: String,
}

pub fn parse_status(event: &WireEvent) -> Result<StatusEvent> {
    if event.kind != KIND_STATUS {
        return Err(DvmError::MalformedRequest("not a status event".into()));
    }
    Ok(StatusEvent {
        request_id: event.tag_value("e").map(str::to_string),
        status: event.tag_value("status").map(str::to_string),
        error_code: event.tag_value("error_code").and_then(crate::error::ErrorCode::from_str),
        message: event.content.clone(),
    })
}
