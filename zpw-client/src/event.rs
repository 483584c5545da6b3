//! High-level events delivered by the push channel.
//!
//! Every payload-carrying frame is classified into one of the variants of
//! [`Event`]. Message-like records keep every server field in an ordered
//! [`Fields`] map; the commonly needed ones are lifted into typed fields.

use serde_json::{Map, Value};
use zpw_proto::{Command, FrameHeader};

use crate::errors::Error;

// ─── ThreadType ───────────────────────────────────────────────────────────────

/// Kind of conversation a message belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ThreadType {
    User,
    Group,
}

impl TryFrom<i64> for ThreadType {
    type Error = Error;
    fn try_from(v: i64) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::User),
            1 => Ok(Self::Group),
            n => Err(Error::InvalidArgument(format!("thread type must be 0 or 1, got {n}"))),
        }
    }
}

impl From<ThreadType> for i64 {
    fn from(t: ThreadType) -> Self {
        match t {
            ThreadType::User  => 0,
            ThreadType::Group => 1,
        }
    }
}

// ─── Fields ───────────────────────────────────────────────────────────────────

/// Ordered key/value map of a server record, with typed accessors.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Fields(Map<String, Value>);

impl Fields {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String field.
    pub fn str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Integer field; numeric strings are accepted since ids and timestamps
    /// arrive in either form.
    pub fn i64(&self, key: &str) -> Option<i64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Identifier field rendered as a string, whatever its JSON type.
    pub fn id(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Identifier field of a raw record, rendered as a string.
pub(crate) fn id_of(entry: &Value, key: &str) -> Option<String> {
    match entry.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn is_zero(id: &str) -> bool {
    id.is_empty() || id.bytes().all(|b| b == b'0')
}

/// Sender of a record; `"0"` means the logged-in account.
fn author_of(fields: &Fields, own_uid: Option<&str>) -> String {
    match fields.id("uidFrom") {
        Some(id) if !is_zero(&id) => id,
        _ => own_uid.unwrap_or("0").to_owned(),
    }
}

/// Conversation a record belongs to.
fn thread_of(fields: &Fields, kind: ThreadType, own_uid: Option<&str>) -> String {
    let to = fields.id("idTo").unwrap_or_default();
    match kind {
        ThreadType::User => match fields.id("uidFrom") {
            Some(id) if !is_zero(&id) => id,
            _ => to,
        },
        ThreadType::Group if is_zero(&to) => own_uid.unwrap_or("0").to_owned(),
        ThreadType::Group => to,
    }
}

// ─── Message ──────────────────────────────────────────────────────────────────

/// A chat message.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub msg_id:      String,
    pub author_id:   String,
    pub thread_id:   String,
    pub thread_type: ThreadType,
    /// Text for plain messages, an object for attachments.
    pub content:     Value,
    /// Every field the server sent.
    pub fields:      Fields,
}

impl Message {
    pub fn from_entry(entry: &Value, thread_type: ThreadType, own_uid: Option<&str>) -> Option<Self> {
        let fields = Fields::new(entry.as_object()?.clone());
        Some(Self {
            msg_id:      fields.id("msgId").unwrap_or_default(),
            author_id:   author_of(&fields, own_uid),
            thread_id:   thread_of(&fields, thread_type, own_uid),
            thread_type,
            content:     fields.get("content").cloned().unwrap_or(Value::Null),
            fields,
        })
    }

    /// The text, for plain text messages.
    pub fn text(&self) -> Option<&str> {
        self.content.as_str()
    }

    /// `msgType`, e.g. `"webchat"` or `"chat.photo"`.
    pub fn msg_type(&self) -> Option<&str> {
        self.fields.str("msgType")
    }

    /// Server timestamp in milliseconds.
    pub fn timestamp(&self) -> Option<i64> {
        self.fields.i64("ts")
    }

    pub fn cli_msg_id(&self) -> Option<String> {
        self.fields.id("cliMsgId")
    }
}

// ─── GroupEvent ───────────────────────────────────────────────────────────────

/// Group control action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GroupEventKind {
    JoinRequest,
    Join,
    Leave,
    RemoveMember,
    BlockMember,
    UpdateSetting,
    Update,
    NewLink,
    AddAdmin,
    RemoveAdmin,
    PinTopic,
    UnpinTopic,
    UpdateTopic,
    ReorderPinTopic,
    UpdateBoard,
    RemoveBoard,
    Unknown,
}

impl GroupEventKind {
    pub fn from_act(act: &str) -> Self {
        match act {
            "join_request"      => Self::JoinRequest,
            "join"              => Self::Join,
            "leave"             => Self::Leave,
            "remove_member"     => Self::RemoveMember,
            "block_member"      => Self::BlockMember,
            "update_setting"    => Self::UpdateSetting,
            "update"            => Self::Update,
            "new_link"          => Self::NewLink,
            "add_admin"         => Self::AddAdmin,
            "remove_admin"      => Self::RemoveAdmin,
            "new_pin_topic" | "pin_topic" => Self::PinTopic,
            "unpin_topic"       => Self::UnpinTopic,
            "update_topic"      => Self::UpdateTopic,
            "reorder_pin_topic" => Self::ReorderPinTopic,
            "update_board"      => Self::UpdateBoard,
            "remove_board"      => Self::RemoveBoard,
            _                   => Self::Unknown,
        }
    }

    /// Upper-case name, e.g. `JOIN_REQUEST`.
    pub fn name(self) -> &'static str {
        match self {
            Self::JoinRequest     => "JOIN_REQUEST",
            Self::Join            => "JOIN",
            Self::Leave           => "LEAVE",
            Self::RemoveMember    => "REMOVE_MEMBER",
            Self::BlockMember     => "BLOCK_MEMBER",
            Self::UpdateSetting   => "UPDATE_SETTING",
            Self::Update          => "UPDATE",
            Self::NewLink         => "NEW_LINK",
            Self::AddAdmin        => "ADD_ADMIN",
            Self::RemoveAdmin     => "REMOVE_ADMIN",
            Self::PinTopic        => "NEW_PIN_TOPIC",
            Self::UnpinTopic      => "UNPIN_TOPIC",
            Self::UpdateTopic     => "UPDATE_TOPIC",
            Self::ReorderPinTopic => "REORDER_PIN_TOPIC",
            Self::UpdateBoard     => "UPDATE_BOARD",
            Self::RemoveBoard     => "REMOVE_BOARD",
            Self::Unknown         => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for GroupEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A group membership or settings change.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupEvent {
    pub kind:      GroupEventKind,
    /// Raw `act` string, kept for kinds this client maps to `Unknown`.
    pub act:       String,
    pub thread_id: String,
    /// Event payload, with string-encoded JSON already parsed.
    pub data:      Fields,
}

impl GroupEvent {
    /// Build from one `controls[]` entry. Returns `None` for non-group
    /// controls and for `join_reject`.
    pub fn from_control(control: &Value) -> Option<Self> {
        let content = control.get("content")?;
        if content.get("act_type").and_then(Value::as_str) != Some("group") {
            return None;
        }
        let act = content.get("act").and_then(Value::as_str).unwrap_or_default();
        if act == "join_reject" {
            return None;
        }
        let data = match content.get("data") {
            Some(Value::String(s)) => serde_json::from_str::<Value>(s).ok()?,
            Some(v) => v.clone(),
            None => Value::Null,
        };
        let data = match data {
            Value::Object(m) => Fields::new(m),
            _ => Fields::default(),
        };
        Some(Self {
            kind:      GroupEventKind::from_act(act),
            act:       act.to_owned(),
            thread_id: data.id("groupId").unwrap_or_default(),
            data,
        })
    }
}

// ─── Reaction ─────────────────────────────────────────────────────────────────

/// A reaction to a message.
#[derive(Clone, Debug, PartialEq)]
pub struct Reaction {
    pub msg_id:      String,
    pub author_id:   String,
    pub thread_id:   String,
    pub thread_type: ThreadType,
    /// Parsed reaction body (`rIcon`, `rMsg`, ...).
    pub content:     Value,
    pub fields:      Fields,
}

impl Reaction {
    pub fn from_entry(entry: &Value, thread_type: ThreadType, own_uid: Option<&str>) -> Option<Self> {
        let mut fields = entry.as_object()?.clone();
        if let Some(Value::String(s)) = fields.get("content") {
            let parsed = serde_json::from_str::<Value>(s).ok()?;
            fields.insert("content".into(), parsed);
        }
        let fields = Fields::new(fields);
        Some(Self {
            msg_id:      fields.id("msgId").unwrap_or_default(),
            author_id:   author_of(&fields, own_uid),
            thread_id:   thread_of(&fields, thread_type, own_uid),
            thread_type,
            content:     fields.get("content").cloned().unwrap_or(Value::Null),
            fields,
        })
    }

    /// The reaction icon code.
    pub fn icon(&self) -> Option<&str> {
        self.content.get("rIcon").and_then(Value::as_str)
    }
}

// ─── Event ────────────────────────────────────────────────────────────────────

/// Something the push channel observed.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    DirectMessage(Message),
    GroupMessage(Message),
    GroupEvent(GroupEvent),
    Reaction(Reaction),
    /// The account was opened elsewhere. Always the last event of a channel.
    SessionTakeover,
    /// A frame this client does not interpret. Only delivered when
    /// `ChannelConfig::deliver_unclassified` is set.
    Unclassified {
        header: FrameHeader,
        body:   Value,
    },
}

impl Event {
    /// Conversation the event belongs to, when it has one.
    pub fn thread_id(&self) -> Option<&str> {
        match self {
            Self::DirectMessage(m) | Self::GroupMessage(m) => Some(&m.thread_id),
            Self::GroupEvent(e) => Some(&e.thread_id),
            Self::Reaction(r) => Some(&r.thread_id),
            Self::SessionTakeover | Self::Unclassified { .. } => None,
        }
    }
}

// ─── Routing ──────────────────────────────────────────────────────────────────

/// Entries of the array `data[key]`; empty when missing.
pub(crate) fn entries<'a>(data: &'a Value, key: &str) -> &'a [Value] {
    data.get(key).and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[])
}

/// Turn a decoded push payload (`{"data": {...}}`) into events.
pub fn route(command: Command, payload: &Value, own_uid: Option<&str>) -> Vec<Event> {
    let data = payload.get("data").unwrap_or(&Value::Null);
    match command {
        Command::DirectMessages => route_messages(data, own_uid, "msgs", ThreadType::User),
        Command::GroupMessages  => route_messages(data, own_uid, "groupMsgs", ThreadType::Group),
        Command::GroupControl => entries(data, "controls")
            .iter()
            .filter_map(GroupEvent::from_control)
            .map(Event::GroupEvent)
            .collect(),
        Command::Reactions => {
            let user = entries(data, "reacts")
                .iter()
                .filter_map(|e| Reaction::from_entry(e, ThreadType::User, own_uid));
            let group = entries(data, "reactGroups")
                .iter()
                .filter_map(|e| Reaction::from_entry(e, ThreadType::Group, own_uid));
            user.chain(group).map(Event::Reaction).collect()
        }
        _ => Vec::new(),
    }
}

pub(crate) fn route_messages(data: &Value, own_uid: Option<&str>, key: &str, kind: ThreadType) -> Vec<Event> {
    entries(data, key)
        .iter()
        .filter_map(|e| Message::from_entry(e, kind, own_uid))
        .map(|m| match kind {
            ThreadType::User  => Event::DirectMessage(m),
            ThreadType::Group => Event::GroupMessage(m),
        })
        .collect()
}
