use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Sender id used for packets that originate from the server itself.
pub const SERVER_SENDER_ID: u64 = 0;

/// One frame on the wire: who sent it and what it says.
///
/// Clients may leave `senderId` out (or send 0); the receiving connection
/// then treats itself as the sender.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Packet {
    #[serde(default)]
    pub sender_id: u64,
    pub msg: Msg,
}

impl Packet {
    pub fn new(sender_id: u64, msg: Msg) -> Self {
        Self { sender_id, msg }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Msg {
    Id(IdMsg),
    OkResponse,
    DenyResponse(DenyResponseMsg),
    LoginRequest(LoginRequestMsg),
    GuestLoginRequest(GuestLoginRequestMsg),
    RegisterRequest(RegisterRequestMsg),
    Chat(ChatMsg),
    Player(PlayerMsg),
    PlayerDirection(PlayerDirectionMsg),
    Spore(SporeMsg),
    SporesBatch(SporesBatchMsg),
    SporeConsumed(SporeConsumedMsg),
    PlayerConsumed(PlayerConsumedMsg),
    Disconnect(DisconnectMsg),
}

impl Msg {
    /// Wire tag of the message, safe to log (never includes credentials).
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Id(_) => "id",
            Msg::OkResponse => "ok_response",
            Msg::DenyResponse(_) => "deny_response",
            Msg::LoginRequest(_) => "login_request",
            Msg::GuestLoginRequest(_) => "guest_login_request",
            Msg::RegisterRequest(_) => "register_request",
            Msg::Chat(_) => "chat",
            Msg::Player(_) => "player",
            Msg::PlayerDirection(_) => "player_direction",
            Msg::Spore(_) => "spore",
            Msg::SporesBatch(_) => "spores_batch",
            Msg::SporeConsumed(_) => "spore_consumed",
            Msg::PlayerConsumed(_) => "player_consumed",
            Msg::Disconnect(_) => "disconnect",
        }
    }

    pub fn id(id: u64) -> Self {
        Msg::Id(IdMsg { id })
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Msg::DenyResponse(DenyResponseMsg {
            reason: reason.into(),
        })
    }

    pub fn chat(msg: impl Into<String>) -> Self {
        Msg::Chat(ChatMsg { msg: msg.into() })
    }

    pub fn disconnect(reason: impl Into<String>) -> Self {
        Msg::Disconnect(DisconnectMsg {
            reason: reason.into(),
        })
    }

    pub fn spore_consumed(spore_id: u64) -> Self {
        Msg::SporeConsumed(SporeConsumedMsg { spore_id })
    }

    pub fn player_consumed(player_id: u64) -> Self {
        Msg::PlayerConsumed(PlayerConsumedMsg { player_id })
    }
}

// === Server -> Client ===

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct IdMsg {
    pub id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DenyResponseMsg {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SporeMsg {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SporesBatchMsg {
    pub spores: Vec<SporeMsg>,
}

// === Client -> Server ===

#[derive(Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LoginRequestMsg {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct GuestLoginRequestMsg {
    pub username: String,
}

#[derive(Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RegisterRequestMsg {
    pub username: String,
    pub password: String,
}

// Credentials never end up in logs through Debug.
impl std::fmt::Debug for LoginRequestMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequestMsg")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for RegisterRequestMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterRequestMsg")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PlayerDirectionMsg {
    /// Heading in radians.
    pub direction: f64,
}

// === Both directions ===

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ChatMsg {
    pub msg: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PlayerMsg {
    pub id: u64,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub direction: f64,
    pub speed: f64,
    pub color: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SporeConsumedMsg {
    pub spore_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PlayerConsumedMsg {
    pub player_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DisconnectMsg {
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sender_id_defaults_to_zero() {
        let packet =
            Packet::decode(r#"{"msg":{"type":"guest_login_request","username":"alice"}}"#).unwrap();
        assert_eq!(packet.sender_id, 0);
        match packet.msg {
            Msg::GuestLoginRequest(m) => assert_eq!(m.username, "alice"),
            other => panic!("Expected GuestLoginRequest, got {:?}", other),
        }
    }

    #[test]
    fn unit_variant_uses_snake_case_tag() {
        let json = Packet::new(3, Msg::OkResponse).encode().unwrap();
        assert!(json.contains("\"type\":\"ok_response\""));
        assert!(json.contains("\"senderId\":3"));
    }

    #[test]
    fn consumption_claims_use_camel_case_ids() {
        let json = Packet::new(0, Msg::player_consumed(9)).encode().unwrap();
        assert!(json.contains("\"type\":\"player_consumed\""));
        assert!(json.contains("\"playerId\":9"));

        let parsed = Packet::decode(r#"{"msg":{"type":"spore_consumed","sporeId":41}}"#).unwrap();
        match parsed.msg {
            Msg::SporeConsumed(m) => assert_eq!(m.spore_id, 41),
            other => panic!("Expected SporeConsumed, got {:?}", other),
        }
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        assert!(Packet::decode(r#"{"msg":{"type":"teleport","x":1.0}}"#).is_err());
        assert!(Packet::decode("not json").is_err());
    }

    #[test]
    fn credentials_are_not_debug_printed() {
        let msg = Msg::LoginRequest(LoginRequestMsg {
            username: "alice".to_string(),
            password: "hunter22".to_string(),
        });
        let printed = format!("{:?}", msg);
        assert!(printed.contains("alice"));
        assert!(!printed.contains("hunter22"));
    }

    #[test]
    fn kind_matches_wire_tag() {
        let msgs = [
            Msg::id(1),
            Msg::deny("no"),
            Msg::chat("hi"),
            Msg::spore_consumed(2),
            Msg::disconnect("bye"),
        ];
        for msg in msgs {
            let json = serde_json::to_string(&msg).unwrap();
            assert!(
                json.contains(&format!("\"type\":\"{}\"", msg.kind())),
                "{} not in {}",
                msg.kind(),
                json
            );
        }
    }
}
