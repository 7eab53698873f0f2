//! Mock MCP server for integration testing.
//!
//! Speaks newline-delimited JSON-RPC on stdin/stdout and answers
//! initialize, ping, tools/list and tools/call.
//!
//! Usage:
//!   mock-mcp-server [--delay-ms N] [--crash-on TOOL] [--log-requests]
//!
//! Options:
//!   --delay-ms N       Add N ms delay to all responses
//!   --crash-on TOOL    Exit with code 1 when TOOL is called
//!   --log-requests     Write each request's method to stderr

use std::env;
use std::io::{BufRead, Write};
use std::thread;
use std::time::Duration;

use serde_json::{Value, json};

/// Server configuration parsed from command line.
#[derive(Default)]
struct ServerConfig {
    delay_ms: u64,
    crash_on: Option<String>,
    log_requests: bool,
}

impl ServerConfig {
    fn from_args() -> Self {
        let mut config = Self::default();
        let mut args = env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--delay-ms" => {
                    config.delay_ms = args.next().and_then(|v| v.parse().ok()).unwrap_or(0)
                }
                "--crash-on" => config.crash_on = args.next(),
                "--log-requests" => config.log_requests = true,
                _ => {}
            }
        }
        config
    }
}

fn main() {
    let config = ServerConfig::from_args();

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            return;
        };
        if line.trim().is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                eprintln!("mock-mcp-server: bad input: {e}");
                continue;
            }
        };

        // Notifications get no reply.
        let Some(id) = request.get("id").cloned() else {
            continue;
        };
        let method = request.get("method").and_then(Value::as_str).unwrap_or("");
        if config.log_requests {
            eprintln!("mock-mcp-server: {method}");
        }

        if config.delay_ms > 0 {
            thread::sleep(Duration::from_millis(config.delay_ms));
        }

        let response = match handle_request(method, request.get("params"), &config) {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err((code, message)) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": code, "message": message }
            }),
        };

        writeln!(stdout, "{response}").unwrap();
        stdout.flush().unwrap();
    }
}

fn handle_request(
    method: &str,
    params: Option<&Value>,
    config: &ServerConfig,
) -> Result<Value, (i64, String)> {
    match method {
        "initialize" => Ok(json!({
            "protocolVersion": "2025-03-26",
            "capabilities": { "tools": {} },
            "serverInfo": { "name": "mock-mcp-server", "version": "1.0.0" }
        })),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({
            "tools": [
                {
                    "name": "echo",
                    "description": "Echo back the input",
                    "inputSchema": {
                        "type": "object",
                        "properties": { "message": { "type": "string" } },
                        "required": ["message"]
                    }
                },
                {
                    "name": "add",
                    "description": "Add two numbers",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "a": { "type": "number" },
                            "b": { "type": "number" }
                        },
                        "required": ["a", "b"]
                    }
                },
                {
                    "name": "crash",
                    "description": "Crashes the server (for testing)",
                    "inputSchema": { "type": "object", "properties": {} }
                }
            ]
        })),
        "tools/call" => {
            let params = params.ok_or((-32602, "missing params".to_string()))?;
            let tool = params.get("name").and_then(Value::as_str).unwrap_or("");
            let args = params.get("arguments").cloned().unwrap_or(json!({}));

            if config.crash_on.as_deref() == Some(tool) {
                std::process::exit(1);
            }

            match tool {
                "echo" => {
                    let message = args.get("message").and_then(Value::as_str).unwrap_or("");
                    Ok(json!({ "content": [{ "type": "text", "text": message }] }))
                }
                "add" => {
                    let a = args.get("a").and_then(Value::as_f64).unwrap_or(0.0);
                    let b = args.get("b").and_then(Value::as_f64).unwrap_or(0.0);
                    Ok(json!({ "content": [{ "type": "text", "text": (a + b).to_string() }] }))
                }
                other => Err((-32602, format!("unknown tool: {other}"))),
            }
        }
        other => Err((-32601, format!("method not found: {other}"))),
    }
}
