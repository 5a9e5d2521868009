//! Line-oriented JSON control surface.
//!
//! One request object per line, one reply object per line. Every reply
//! carries `returnValue`; failures add `errorText`.
//!
//! ```text
//! → {"method":"start"}
//! ← {"returnValue":true}
//! → {"method":"status"}
//! ← {"returnValue":true,"isRunning":true,"connected":true,…}
//! → {"method":"isRoot"}
//! ← {"returnValue":true,"rootStatus":false}
//! → {"method":"setSettings","address":"192.168.1.20","fps":25}
//! ← {"returnValue":true}
//! → {"method":"powerState","state":"Screen Saver"}
//! → {"method":"videoOutput","hdrType":"HDR10"}
//! ```

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::ServiceError;
use crate::service::Service;

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum ControlRequest {
    Start,
    Stop,
    Status,
    /// Deprecated alias of `status`.
    IsRunning,
    IsRoot,
    GetSettings,
    /// Remaining keys are a settings patch.
    SetSettings(Map<String, Value>),
    ResetSettings,
    PowerState {
        state: String,
        /// Present while the platform is mid-transition.
        #[serde(default)]
        processing: Option<Value>,
    },
    VideoOutput {
        #[serde(rename = "hdrType")]
        hdr_type: String,
    },
}

fn ok() -> Value {
    json!({ "returnValue": true })
}

fn failed(err: impl std::fmt::Display) -> Value {
    json!({ "returnValue": false, "errorText": err.to_string() })
}

fn reply(result: Result<(), ServiceError>) -> Value {
    result.map_or_else(failed, |()| ok())
}

/// Merge `extra` into a `{"returnValue": true}` reply.
fn ok_with(extra: Value) -> Value {
    let mut out = ok();
    if let (Value::Object(out), Value::Object(extra)) = (&mut out, extra) {
        out.extend(extra);
    }
    out
}

/// Execute one request against the service.
pub async fn dispatch(service: &mut Service, request: ControlRequest) -> Value {
    debug!("Control request: {:?}", request);
    match request {
        ControlRequest::Start => reply(service.start().await),
        ControlRequest::Stop => reply(service.stop().await),
        ControlRequest::Status | ControlRequest::IsRunning => {
            match serde_json::to_value(service.status()) {
                Ok(status) => ok_with(status),
                Err(e) => failed(e),
            }
        }
        ControlRequest::IsRoot => ok_with(json!({ "rootStatus": is_root() })),
        ControlRequest::GetSettings => match serde_json::to_value(service.settings()) {
            Ok(settings) => ok_with(settings),
            Err(e) => failed(e),
        },
        ControlRequest::SetSettings(patch) => reply(service.set_settings(&Value::Object(patch))),
        ControlRequest::ResetSettings => {
            service.reset_settings();
            ok()
        }
        ControlRequest::PowerState { state, processing } => {
            reply(service.on_power_state(&state, processing.is_some()).await)
        }
        ControlRequest::VideoOutput { hdr_type } => {
            let hdr = service.on_video_output(&hdr_type).await;
            ok_with(json!({ "hdr": hdr }))
        }
    }
}

/// Whether the process runs with real uid 0. `false` if it cannot tell.
fn is_root() -> bool {
    std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| real_uid(&status))
        == Some(0)
}

/// Real uid from the `Uid:` line of `/proc/<pid>/status`.
fn real_uid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("Uid:"))
        .and_then(|ids| ids.split_whitespace().next())
        .and_then(|uid| uid.parse().ok())
}

/// Parse and execute one line.
pub async fn handle_line(service: &mut Service, line: &str) -> Value {
    match serde_json::from_str::<ControlRequest>(line) {
        Ok(request) => dispatch(service, request).await,
        Err(e) => failed(format!("invalid request: {e}")),
    }
}
