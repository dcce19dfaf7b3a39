//! Request handlers for the `db/user/*` channels.
//!
//! Every handler answers with an [`IpcResponse`]; storage errors are mapped
//! to status codes rather than returned.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use crate::db::{StorageError, UserInput, UserStore};

pub mod channels {
    pub const GET_LIST: &str = "db/user/getList";
    pub const GET_INFO_BY_ID: &str = "db/user/getInfoById";
    pub const ADD_OR_UPDATE: &str = "db/user/addOrUpdate";
    pub const DELETE_BY_ID: &str = "db/user/deleteById";

    pub const ALL: [&str; 4] = [GET_LIST, GET_INFO_BY_ID, ADD_OR_UPDATE, DELETE_BY_ID];
}

pub mod codes {
    pub const OK: i32 = 0;
    pub const BAD_REQUEST: i32 = 400;
    pub const NOT_FOUND: i32 = 404;
    pub const CONFLICT: i32 = 409;
    pub const INTERNAL: i32 = 500;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcResponse {
    pub code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl IpcResponse {
    pub fn ok(data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Self {
                code: codes::OK,
                msg: None,
                data: Some(data),
            },
            Err(e) => Self::error(codes::INTERNAL, format!("failed to encode response: {e}")),
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: Some(msg.into()),
            data: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == codes::OK
    }
}

impl From<StorageError> for IpcResponse {
    fn from(err: StorageError) -> Self {
        let code = match &err {
            StorageError::NotFound { .. } => codes::NOT_FOUND,
            StorageError::Conflict(_) => codes::CONFLICT,
            StorageError::Invalid(_) => codes::BAD_REQUEST,
            StorageError::Sqlite(_) | StorageError::Io { .. } => {
                error!(error = %err, "storage failure while handling request");
                codes::INTERNAL
            }
        };
        Self::error(code, err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct IdArg {
    id: i64,
}

/// Route one request to its handler.
pub fn handle(store: &UserStore<'_>, channel: &str, arg: Value) -> IpcResponse {
    debug!(channel, "handling request");
    let result = match channel {
        channels::GET_LIST => store.list().map(IpcResponse::ok),
        channels::GET_INFO_BY_ID => match parse_arg::<IdArg>(arg) {
            Ok(arg) => store.get_by_id(arg.id).map(IpcResponse::ok),
            Err(response) => return response,
        },
        channels::ADD_OR_UPDATE => match parse_arg::<UserInput>(arg) {
            Ok(input) => store.save(&input).map(IpcResponse::ok),
            Err(response) => return response,
        },
        channels::DELETE_BY_ID => match parse_arg::<IdArg>(arg) {
            Ok(arg) => store
                .delete_by_id(arg.id)
                .map(|()| IpcResponse::ok(serde_json::json!({ "id": arg.id }))),
            Err(response) => return response,
        },
        other => {
            return IpcResponse::error(codes::NOT_FOUND, format!("unknown channel: {other}"));
        }
    };

    result.unwrap_or_else(IpcResponse::from)
}

fn parse_arg<T: DeserializeOwned>(arg: Value) -> Result<T, IpcResponse> {
    serde_json::from_value(arg)
        .map_err(|e| IpcResponse::error(codes::BAD_REQUEST, format!("invalid argument: {e}")))
}
