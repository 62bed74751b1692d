//! Wire codec.
//!
//! A frame is a 3-byte type tag followed immediately by the JSON body:
//!
//! ```text
//! req{"id":"…","method":"Add","params":[10,301]}
//! res{"id":"…","result":311,"error":null}
//! ```
//!
//! The tag is position-dependent and case-sensitive. It is never repeated
//! inside the body.

use crate::domain::error::RpcError;
use crate::domain::message::{Message, Request, Response};

/// Tag for [`Request`] frames
pub const REQUEST_TAG: &str = "req";

/// Tag for [`Response`] frames
pub const RESPONSE_TAG: &str = "res";

const TAG_LEN: usize = 3;

/// Encode a message into a text frame.
pub fn encode(message: &Message) -> Result<String, RpcError> {
    let (tag, body) = match message {
        Message::Request(request) => (REQUEST_TAG, serde_json::to_string(request)),
        Message::Response(response) => (RESPONSE_TAG, serde_json::to_string(response)),
    };

    let body = body.map_err(|source| RpcError::Encode {
        method: match message {
            Message::Request(r) => r.method.clone(),
            Message::Response(_) => String::new(),
        },
        source,
    })?;

    let mut frame = String::with_capacity(TAG_LEN + body.len());
    frame.push_str(tag);
    frame.push_str(&body);
    Ok(frame)
}

/// Decode a text frame.
pub fn decode(frame: &str) -> Result<Message, RpcError> {
    let Some(tag) = frame.get(..TAG_LEN) else {
        return Err(RpcError::MalformedFrame(frame.to_string()));
    };
    let body = &frame[TAG_LEN..];

    match tag {
        REQUEST_TAG => serde_json::from_str::<Request>(body)
            .map(Message::Request)
            .map_err(|source| RpcError::MalformedPayload {
                tag: REQUEST_TAG,
                source,
            }),
        RESPONSE_TAG => serde_json::from_str::<Response>(body)
            .map(Message::Response)
            .map_err(|source| RpcError::MalformedPayload {
                tag: RESPONSE_TAG,
                source,
            }),
        other => Err(RpcError::MalformedFrame(other.to_string())),
    }
}
