//! Headless session server: JSON-RPC 2.0 over stdin/stdout.
//!
//! The canonical binding of the session protocol. Each request is one
//! line of JSON; responses are written in order, and session events are
//! pushed interleaved as `event` notifications (no id). HTTP/WebSocket
//! bindings are external frontends layered on this surface.

use crate::command::{execute_command, CommandResult};
use crate::debugger::{WatchKind, WatchTarget};
use crate::error::SessionError;
use crate::session::Session;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex};

#[derive(Deserialize)]
struct RpcRequest {
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: JsonValue,
    id: JsonValue,
}

fn response(id: JsonValue, result: JsonValue) -> JsonValue {
    json!({"jsonrpc": "2.0", "result": result, "id": id})
}

fn error_response(id: JsonValue, code: i32, message: String) -> JsonValue {
    json!({"jsonrpc": "2.0", "error": {"code": code, "message": message}, "id": id})
}

/// Shared line writer so event notifications and responses interleave
/// without tearing.
type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

fn write_json(writer: &SharedWriter, value: &JsonValue) {
    let mut w = writer.lock().expect("writer poisoned");
    let _ = writeln!(w, "{value}");
    let _ = w.flush();
}

/// The API server: a map of live sessions driven over stdio.
pub struct ApiServer {
    sessions: HashMap<String, Arc<Session>>,
    next_id: u64,
    writer: SharedWriter,
}

impl ApiServer {
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            sessions: HashMap::new(),
            next_id: 1,
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    /// Serve line-delimited JSON-RPC from `reader` until EOF.
    pub fn serve(&mut self, reader: impl BufRead) {
        for line in reader.lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let request: RpcRequest = match serde_json::from_str(line) {
                Ok(r) => r,
                Err(e) => {
                    let resp =
                        error_response(JsonValue::Null, -32700, format!("parse error: {e}"));
                    write_json(&self.writer, &resp);
                    continue;
                }
            };
            if request.jsonrpc != "2.0" {
                let resp = error_response(
                    request.id,
                    -32600,
                    "invalid JSON-RPC version".to_string(),
                );
                write_json(&self.writer, &resp);
                continue;
            }

            let resp = self.dispatch(&request.method, &request.params, request.id.clone());
            write_json(&self.writer, &resp);
        }
    }

    fn dispatch(&mut self, method: &str, params: &JsonValue, id: JsonValue) -> JsonValue {
        match method {
            "session.create" => self.handle_create(id),
            "session.destroy" => self.handle_destroy(params, id),
            _ => {
                // Everything else addresses an existing session
                let Some(session) = self.lookup(params) else {
                    return error_response(
                        id,
                        -32001,
                        SessionError::SessionNotFound(
                            params["sessionId"].as_str().unwrap_or("").to_string(),
                        )
                        .to_string(),
                    );
                };
                match Self::handle_session_method(&session, method, params, id.clone()) {
                    Ok(result) => response(id, result),
                    Err(ApiError::UnknownMethod) => {
                        error_response(id, -32601, format!("unknown method {method:?}"))
                    }
                    Err(ApiError::Session(e)) => error_response(id, -32000, e.to_string()),
                    Err(ApiError::BadParams(msg)) => error_response(id, -32602, msg),
                }
            }
        }
    }

    fn lookup(&self, params: &JsonValue) -> Option<Arc<Session>> {
        let id = params["sessionId"].as_str()?;
        self.sessions.get(id).cloned()
    }

    fn handle_create(&mut self, id: JsonValue) -> JsonValue {
        let session_id = format!("sess-{}", self.next_id);
        self.next_id += 1;
        let session = Arc::new(Session::new());

        // Forward session events as notifications until the session goes
        // away (the receiver disconnects when the session is dropped).
        let events = session.subscribe();
        let writer = Arc::clone(&self.writer);
        let for_session = session_id.clone();
        std::thread::spawn(move || {
            while let Ok(event) = events.recv() {
                let notification = json!({
                    "jsonrpc": "2.0",
                    "method": "event",
                    "params": {
                        "sessionId": for_session,
                        "event": event,
                    },
                });
                write_json(&writer, &notification);
            }
        });

        self.sessions.insert(session_id.clone(), session);
        response(id, json!({"sessionId": session_id}))
    }

    fn handle_destroy(&mut self, params: &JsonValue, id: JsonValue) -> JsonValue {
        let Some(session_id) = params["sessionId"].as_str() else {
            return error_response(id, -32602, "sessionId required".to_string());
        };
        match self.sessions.remove(session_id) {
            Some(session) => {
                session.pause();
                response(id, json!({"ok": true}))
            }
            None => error_response(
                id,
                -32001,
                SessionError::SessionNotFound(session_id.to_string()).to_string(),
            ),
        }
    }

    fn handle_session_method(
        session: &Session,
        method: &str,
        params: &JsonValue,
        _id: JsonValue,
    ) -> Result<JsonValue, ApiError> {
        match method {
            "load" => {
                let source = params["source"]
                    .as_str()
                    .ok_or_else(|| ApiError::BadParams("source required".to_string()))?;
                let filename = params["filename"].as_str().unwrap_or("program.s");
                match session.load(source, filename) {
                    Ok(info) => Ok(json!({
                        "success": true,
                        "entry_point": info.entry_point,
                        "symbols": info.symbols.into_iter().collect::<HashMap<String, u32>>(),
                    })),
                    Err(SessionError::ProgramLoad(errors)) => Ok(json!({
                        "success": false,
                        "errors": errors.iter().map(|e| json!({
                            "kind": format!("{}", e.kind),
                            "message": e.message,
                            "file": e.loc.file,
                            "line": e.loc.line,
                            "column": e.loc.column,
                            "source_line": e.source_line,
                        })).collect::<Vec<_>>(),
                    })),
                    Err(e) => Err(ApiError::Session(e)),
                }
            }
            "step" => session
                .step()
                .map(|s| json!({"status": s}))
                .map_err(ApiError::Session),
            "step-over" => session
                .step_over()
                .map(|s| json!({"status": s}))
                .map_err(ApiError::Session),
            "step-out" => session
                .step_out()
                .map(|s| json!({"status": s}))
                .map_err(ApiError::Session),
            "run" => session
                .run()
                .map(|()| json!({"status": "running"}))
                .map_err(ApiError::Session),
            "stop" => {
                session.pause();
                Ok(json!({"status": session.status()}))
            }
            "reset" => {
                session
                    .reset_to_entry()
                    .map_err(ApiError::Session)?;
                Ok(json!({"status": session.status()}))
            }
            "status" => {
                let regs = session.registers();
                Ok(json!({
                    "status": session.status(),
                    "pc": regs.r[15],
                    "cycles": regs.cycles,
                    "exit_code": session.exit_code(),
                }))
            }
            "registers" => Ok(serde_json::to_value(session.registers()).unwrap_or_default()),
            "memory" => {
                let address = u32_param(params, "address")?;
                let length = params["length"].as_u64().unwrap_or(64).min(0x1_0000) as usize;
                let bytes = session.memory(address, length);
                Ok(json!({
                    "address": address,
                    "data": base64::engine::general_purpose::STANDARD.encode(bytes),
                }))
            }
            "disassembly" => {
                let address = u32_param(params, "address")
                    .unwrap_or_else(|_| session.registers().r[15]);
                let count = params["count"].as_u64().unwrap_or(16).min(256) as usize;
                Ok(serde_json::to_value(session.disassembly(address, count)).unwrap_or_default())
            }
            "stack" => {
                let offset = params["offset"].as_i64().unwrap_or(0) as i32;
                let count = params["count"].as_u64().unwrap_or(16).min(256) as usize;
                Ok(serde_json::to_value(session.stack(offset, count)).unwrap_or_default())
            }
            "breakpoint.add" => {
                let address = u32_param(params, "address")?;
                let condition = params["condition"].as_str().map(str::to_string);
                session
                    .add_breakpoint(address, condition)
                    .map_err(ApiError::Session)?;
                Ok(json!({"ok": true}))
            }
            "breakpoint.remove" => {
                let address = u32_param(params, "address")?;
                Ok(json!({"removed": session.remove_breakpoint(address)}))
            }
            "breakpoint.list" => {
                let list: Vec<JsonValue> = session
                    .breakpoints()
                    .into_iter()
                    .map(|(address, enabled, condition, hit_count)| {
                        json!({
                            "address": address,
                            "enabled": enabled,
                            "condition": condition,
                            "hit_count": hit_count,
                        })
                    })
                    .collect();
                Ok(json!(list))
            }
            "watchpoint.add" => {
                let kind = match params["type"].as_str().unwrap_or("write") {
                    "read" => WatchKind::Read,
                    "write" => WatchKind::Write,
                    "read_write" | "rw" => WatchKind::ReadWrite,
                    other => {
                        return Err(ApiError::BadParams(format!(
                            "unknown watchpoint type {other:?}"
                        )));
                    }
                };
                let target = if let Some(reg) = params["register"].as_u64() {
                    if reg > 15 {
                        return Err(ApiError::BadParams("register out of range".to_string()));
                    }
                    WatchTarget::Register(reg as u8)
                } else {
                    WatchTarget::Address(u32_param(params, "address")?)
                };
                let id = session.add_watchpoint(target, kind);
                Ok(json!({"id": id}))
            }
            "watchpoint.remove" => {
                let id = u32_param(params, "id")?;
                Ok(json!({"removed": session.remove_watchpoint(id)}))
            }
            "evaluate" => {
                let expr = params["expression"]
                    .as_str()
                    .ok_or_else(|| ApiError::BadParams("expression required".to_string()))?;
                let result = session.evaluate(expr).map_err(ApiError::Session)?;
                Ok(json!({"result": result}))
            }
            "stdin" => {
                let data = params["data"]
                    .as_str()
                    .ok_or_else(|| ApiError::BadParams("data required".to_string()))?;
                session.send_input(data);
                Ok(json!({"ok": true}))
            }
            "command" => {
                let line = params["command"]
                    .as_str()
                    .ok_or_else(|| ApiError::BadParams("command required".to_string()))?;
                match execute_command(session, line) {
                    CommandResult::Output(text) => Ok(json!({"output": text})),
                    CommandResult::Quit => Ok(json!({"output": "", "quit": true})),
                }
            }
            _ => Err(ApiError::UnknownMethod),
        }
    }
}

enum ApiError {
    UnknownMethod,
    Session(SessionError),
    BadParams(String),
}

fn u32_param(params: &JsonValue, key: &str) -> Result<u32, ApiError> {
    // Accept both numbers and "0x..." strings for addresses
    if let Some(n) = params[key].as_u64() {
        return u32::try_from(n)
            .map_err(|_| ApiError::BadParams(format!("{key} out of range")));
    }
    if let Some(s) = params[key].as_str() {
        let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            u32::from_str_radix(hex, 16)
        } else {
            s.parse()
        };
        return parsed.map_err(|_| ApiError::BadParams(format!("invalid {key}: {s:?}")));
    }
    Err(ApiError::BadParams(format!("{key} required")))
}
