// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// JSON command surface -- one request object in, one reply object out.
//
// The transport that carries these objects (HTTP, pipe, whatever) is not
// this crate's business; `dispatch` is the whole contract. Every reply
// carries a `status` field; failures omit the data fields and instead name
// an error code, plus the offending dotted key and/or character offset for
// task failures.

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use scanwerk_core::error::ScanwerkError;
use scanwerk_core::types::SessionSnapshot;

use crate::session::{CommandError, CommandResult, SessionManager};

/// A decoded client request.
#[derive(Debug, Deserialize)]
#[serde(tag = "command")]
pub enum Request {
    #[serde(rename = "createSession", rename_all = "camelCase")]
    CreateSession { device_id: String },
    #[serde(rename = "sendTask")]
    SendTask { task: Value },
    #[serde(rename = "startCapturing")]
    StartCapturing,
    #[serde(rename = "getSession")]
    GetSession,
    #[serde(rename = "readImageBlockMetadata", rename_all = "camelCase")]
    ReadImageBlockMetadata { image_block_num: u32 },
    #[serde(rename = "readImageBlock", rename_all = "camelCase")]
    ReadImageBlock { image_block_num: u32 },
    #[serde(rename = "releaseImageBlocks", rename_all = "camelCase")]
    ReleaseImageBlocks {
        image_block_num: u32,
        last_image_block_num: u32,
    },
    #[serde(rename = "stopCapturing")]
    StopCapturing,
    #[serde(rename = "closeSession")]
    CloseSession,
}

/// Handle one request object and produce its reply object.
pub fn dispatch(manager: &SessionManager, request: Value) -> Value {
    let request: Request = match serde_json::from_value(request) {
        Ok(request) => request,
        Err(err) => {
            warn!(%err, "unparseable command");
            return json!({ "status": "invalidCommand", "detail": err.to_string() });
        }
    };
    debug!(?request, "dispatching command");

    match request {
        Request::CreateSession { device_id } => {
            session_reply(manager.create_session(&device_id))
        }
        Request::SendTask { task } => {
            // The task may arrive as an embedded object or as raw text.
            let text = match task {
                Value::String(s) => s,
                other => other.to_string(),
            };
            match manager.send_task(&text) {
                Ok(reply) => json!({ "status": "success", "taskReply": reply }),
                Err(err) => error_reply(err),
            }
        }
        Request::StartCapturing => session_reply(manager.start_capturing()),
        Request::GetSession => session_reply(manager.get_session()),
        Request::ReadImageBlockMetadata { image_block_num } => {
            match manager.read_image_block_metadata(image_block_num) {
                Ok((path, snapshot)) => json!({
                    "status": "success",
                    "meta": path,
                    "endOfJob": snapshot.end_of_job,
                    "session": session_object(&snapshot),
                }),
                Err(err) => error_reply(err),
            }
        }
        Request::ReadImageBlock { image_block_num } => {
            match manager.read_image_block(image_block_num) {
                Ok(path) => json!({ "status": "success", "imageBlock": path }),
                Err(err) => error_reply(err),
            }
        }
        Request::ReleaseImageBlocks {
            image_block_num,
            last_image_block_num,
        } => session_reply(manager.release_image_blocks(image_block_num, last_image_block_num)),
        Request::StopCapturing => session_reply(manager.stop_capturing()),
        Request::CloseSession => session_reply(manager.close_session()),
    }
}

fn session_reply(result: CommandResult<SessionSnapshot>) -> Value {
    match result {
        Ok(snapshot) => json!({
            "status": "success",
            "endOfJob": snapshot.end_of_job,
            "session": session_object(&snapshot),
        }),
        Err(err) => error_reply(err),
    }
}

/// Session object for the wire: the snapshot minus `endOfJob`, which is
/// reported at the top level of the reply.
fn session_object(snapshot: &SessionSnapshot) -> Value {
    let mut value = serde_json::to_value(snapshot).unwrap_or(Value::Null);
    if let Some(obj) = value.as_object_mut() {
        obj.remove("endOfJob");
    }
    value
}

fn error_reply(err: CommandError) -> Value {
    match err {
        CommandError::Engine(ScanwerkError::InvalidSessionId) => {
            json!({ "status": "invalidSessionId" })
        }
        CommandError::Engine(ScanwerkError::InvalidImageBlockNumber { number }) => {
            json!({ "status": "invalidImageBlockNumber", "imageBlockNum": number })
        }
        CommandError::Engine(ScanwerkError::InvalidState { command, state }) => {
            json!({ "status": "invalidState", "command": command, "state": state })
        }
        CommandError::Task(task_err) => {
            let mut obj = serde_json::Map::new();
            obj.insert("status".into(), task_err.code.as_str().into());
            if let Some(key) = task_err.key {
                obj.insert("key".into(), Value::String(key));
            }
            if let Some(value) = task_err.value {
                obj.insert("value".into(), Value::String(value));
            }
            if let Some(offset) = task_err.offset {
                obj.insert("offset".into(), json!(offset));
            }
            Value::Object(obj)
        }
        CommandError::Engine(other) => {
            warn!(%other, "command failed internally");
            json!({ "status": "internalError", "detail": other.to_string() })
        }
    }
}
