// Engine.IO v4 / Socket.IO v5 text framing
//
// A WebSocket text frame carries one Engine.IO packet: a single type digit
// followed by its payload. Engine.IO `message` packets (4) wrap a Socket.IO
// packet: type digit, optional `/namespace,`, optional ack id, JSON data.

use crate::error::{ChatError, ChatResult};
use serde::Deserialize;
use serde_json::Value;

/// Handshake data sent by the server in the Engine.IO `open` packet
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPayload {
    #[serde(default)]
    pub sid: String,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenPayload),
    Close,
    Ping(String),
    Pong(String),
    Message(SocketPacket),
    Upgrade,
    Noop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    /// Client: carries the auth object. Server: carries `{ "sid": ... }`.
    Connect(Option<Value>),
    Disconnect,
    Event {
        name: String,
        payload: Value,
        ack_id: Option<u64>,
    },
    Ack {
        ack_id: u64,
        payload: Value,
    },
    /// Handshake refused; the data is usually `{ "message": ... }`
    ConnectError(Value),
}

impl SocketPacket {
    pub fn event(name: impl Into<String>, payload: Value) -> Self {
        SocketPacket::Event {
            name: name.into(),
            payload,
            ack_id: None,
        }
    }

    fn type_digit(&self) -> char {
        match self {
            SocketPacket::Connect(_) => '0',
            SocketPacket::Disconnect => '1',
            SocketPacket::Event { .. } => '2',
            SocketPacket::Ack { .. } => '3',
            SocketPacket::ConnectError(_) => '4',
        }
    }
}

/// Encode a packet into a text frame
pub fn encode(packet: &EnginePacket) -> ChatResult<String> {
    let frame = match packet {
        EnginePacket::Open(_) => {
            return Err(ChatError::bad_request("open packets are only sent by the server"))
        }
        EnginePacket::Close => "1".to_string(),
        EnginePacket::Ping(data) => format!("2{}", data),
        EnginePacket::Pong(data) => format!("3{}", data),
        EnginePacket::Message(socket) => format!("4{}", encode_socket(socket)?),
        EnginePacket::Upgrade => "5".to_string(),
        EnginePacket::Noop => "6".to_string(),
    };
    Ok(frame)
}

fn encode_socket(packet: &SocketPacket) -> ChatResult<String> {
    let mut out = String::new();
    out.push(packet.type_digit());

    let data = match packet {
        SocketPacket::Connect(auth) => auth.clone(),
        SocketPacket::Disconnect => None,
        SocketPacket::Event {
            name,
            payload,
            ack_id,
        } => {
            if let Some(id) = ack_id {
                out.push_str(&id.to_string());
            }
            let mut args = vec![Value::String(name.clone())];
            if !payload.is_null() {
                args.push(payload.clone());
            }
            Some(Value::Array(args))
        }
        SocketPacket::Ack { ack_id, payload } => {
            out.push_str(&ack_id.to_string());
            Some(Value::Array(vec![payload.clone()]))
        }
        SocketPacket::ConnectError(data) => Some(data.clone()),
    };

    if let Some(data) = data {
        let json = serde_json::to_string(&data)
            .map_err(|e| ChatError::decode(format!("Failed to serialize packet: {}", e)))?;
        out.push_str(&json);
    }
    Ok(out)
}

/// Decode a text frame
pub fn decode(frame: &str) -> ChatResult<EnginePacket> {
    let mut chars = frame.chars();
    let kind = chars
        .next()
        .ok_or_else(|| ChatError::decode("empty frame"))?;
    let rest = chars.as_str();

    match kind {
        '0' => {
            let open = serde_json::from_str(rest)
                .map_err(|e| ChatError::decode(format!("Invalid open packet: {}", e)))?;
            Ok(EnginePacket::Open(open))
        }
        '1' => Ok(EnginePacket::Close),
        '2' => Ok(EnginePacket::Ping(rest.to_string())),
        '3' => Ok(EnginePacket::Pong(rest.to_string())),
        '4' => Ok(EnginePacket::Message(decode_socket(rest)?)),
        '5' => Ok(EnginePacket::Upgrade),
        '6' => Ok(EnginePacket::Noop),
        other => Err(ChatError::decode(format!("Unknown engine packet type {:?}", other))),
    }
}

fn decode_socket(data: &str) -> ChatResult<SocketPacket> {
    let mut chars = data.chars();
    let kind = chars
        .next()
        .ok_or_else(|| ChatError::decode("empty socket packet"))?;
    let mut rest = chars.as_str();

    // Namespaces other than "/" are written as "/name," before the data.
    if rest.starts_with('/') {
        rest = match rest.find(',') {
            Some(idx) => &rest[idx + 1..],
            None => "",
        };
    }

    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    let ack_id = if digits > 0 {
        rest[..digits].parse::<u64>().ok()
    } else {
        None
    };
    let body = &rest[digits..];

    let json = if body.is_empty() {
        None
    } else {
        Some(
            serde_json::from_str::<Value>(body)
                .map_err(|e| ChatError::decode(format!("Invalid packet data: {}", e)))?,
        )
    };

    match kind {
        '0' => Ok(SocketPacket::Connect(json)),
        '1' => Ok(SocketPacket::Disconnect),
        '2' => {
            let mut args = match json {
                Some(Value::Array(args)) => args.into_iter(),
                _ => return Err(ChatError::decode("event data must be an array")),
            };
            let name = match args.next() {
                Some(Value::String(name)) => name,
                _ => return Err(ChatError::decode("event name missing")),
            };
            Ok(SocketPacket::Event {
                name,
                payload: args.next().unwrap_or(Value::Null),
                ack_id,
            })
        }
        '3' => {
            let ack_id = ack_id.ok_or_else(|| ChatError::decode("ack without id"))?;
            let payload = match json {
                Some(Value::Array(mut args)) if !args.is_empty() => args.swap_remove(0),
                _ => Value::Null,
            };
            Ok(SocketPacket::Ack { ack_id, payload })
        }
        '4' => Ok(SocketPacket::ConnectError(json.unwrap_or(Value::Null))),
        other => Err(ChatError::decode(format!("Unsupported socket packet type {:?}", other))),
    }
}
