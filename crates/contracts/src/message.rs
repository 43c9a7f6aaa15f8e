//! Message - admission input
//!
//! Closed set of event kinds. Every kind validates itself and fills its own
//! defaults through [`EventKind`]; [`Message`] only selects the kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Context, ContractError, Integrations, LibraryInfo, Properties, Traits};

/// Channel stamped on every admitted message
pub const SERVER_CHANNEL: &str = "server";

/// Per-admission default values
///
/// Carries the admission clock reading and the id generator so every kind
/// fills its defaults the same way.
pub struct Stamp<'a> {
    now: DateTime<Utc>,
    ids: &'a (dyn Fn() -> String + Send + Sync),
}

impl<'a> Stamp<'a> {
    pub fn new(now: DateTime<Utc>, ids: &'a (dyn Fn() -> String + Send + Sync)) -> Self {
        Self { now, ids }
    }

    /// Admission time
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Generate a fresh id
    pub fn new_id(&self) -> String {
        (self.ids)()
    }

    fn apply_common(
        &self,
        message_id: &mut String,
        original_timestamp: &mut Option<DateTime<Utc>>,
        sent_at: &mut Option<DateTime<Utc>>,
        context: &mut Option<Context>,
        channel: &mut String,
    ) {
        if message_id.is_empty() {
            *message_id = self.new_id();
        }
        let timestamp = *original_timestamp.get_or_insert(self.now);
        *sent_at = Some(timestamp);
        context.get_or_insert_with(Context::default).library = Some(LibraryInfo::current());
        *channel = SERVER_CHANNEL.to_string();
    }
}

/// Capabilities shared by every event kind
pub trait EventKind {
    /// Wire name of the kind (`"track"`, `"identify"`, ...)
    fn kind(&self) -> &'static str;

    /// Check required fields
    ///
    /// # Errors
    /// Returns the first missing field
    fn validate(&self) -> Result<(), ContractError>;

    /// Fill message id, timestamps, context and channel
    fn apply_defaults(&mut self, stamp: &Stamp<'_>);

    fn message_id(&self) -> &str;

    /// Primary identity, part of the shard key
    fn user_id(&self) -> &str;

    /// Secondary identity, part of the shard key
    fn anonymous_id(&self) -> &str;

    /// Time of the most recent upload attempt carrying this message
    fn sent_at(&self) -> Option<DateTime<Utc>>;

    fn set_sent_at(&mut self, sent_at: DateTime<Utc>);
}

/// `sentAt` as RFC 3339 with milliseconds
///
/// Fixed width, so restamping before an upload never changes the size of a
/// serialized message.
mod dispatch_time {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(time) => {
                serializer.serialize_str(&time.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        Option::<DateTime<Utc>>::deserialize(deserializer)
    }
}

/// Define an event kind struct with the fields common to all kinds
///
/// # Usage
/// ```ignore
/// define_event!(
///     Track,                  // Struct name
///     "track",                // Wire kind
///     anonymous_default: true, // Generate anonymousId when empty
///     validate: validate_track,
///     { pub event: String }
/// );
/// ```
macro_rules! define_event {
    (
        $(#[$meta:meta])*
        $name:ident,
        $kind:literal,
        anonymous_default: $anon:literal,
        validate: $validate:path,
        { $( $(#[$fmeta:meta])* pub $field:ident : $ty:ty ),* $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase")]
        pub struct $name {
            #[serde(default, skip_serializing_if = "String::is_empty")]
            pub message_id: String,

            #[serde(default, skip_serializing_if = "String::is_empty")]
            pub user_id: String,

            #[serde(default, skip_serializing_if = "String::is_empty")]
            pub anonymous_id: String,

            $( $(#[$fmeta])* pub $field: $ty, )*

            #[serde(default, skip_serializing_if = "Option::is_none")]
            pub original_timestamp: Option<DateTime<Utc>>,

            #[serde(default, skip_serializing_if = "Option::is_none", with = "dispatch_time")]
            pub sent_at: Option<DateTime<Utc>>,

            #[serde(default, skip_serializing_if = "Option::is_none")]
            pub context: Option<Context>,

            #[serde(default, skip_serializing_if = "Integrations::is_empty")]
            pub integrations: Integrations,

            #[serde(default, skip_serializing_if = "String::is_empty")]
            pub channel: String,
        }

        impl EventKind for $name {
            fn kind(&self) -> &'static str {
                $kind
            }

            fn validate(&self) -> Result<(), ContractError> {
                $validate(self)
            }

            fn apply_defaults(&mut self, stamp: &Stamp<'_>) {
                stamp.apply_common(
                    &mut self.message_id,
                    &mut self.original_timestamp,
                    &mut self.sent_at,
                    &mut self.context,
                    &mut self.channel,
                );
                if $anon && self.anonymous_id.is_empty() {
                    self.anonymous_id = stamp.new_id();
                }
            }

            fn message_id(&self) -> &str {
                &self.message_id
            }

            fn user_id(&self) -> &str {
                &self.user_id
            }

            fn anonymous_id(&self) -> &str {
                &self.anonymous_id
            }

            fn sent_at(&self) -> Option<DateTime<Utc>> {
                self.sent_at
            }

            fn set_sent_at(&mut self, sent_at: DateTime<Utc>) {
                self.sent_at = Some(sent_at);
            }
        }

        impl From<$name> for Message {
            fn from(event: $name) -> Self {
                Message::$name(event)
            }
        }
    };
}

define_event!(
    /// Merge two user identities
    Alias,
    "alias",
    anonymous_default: false,
    validate: validate_alias,
    {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        pub previous_id: String,
    }
);

define_event!(
    /// Associate a user with a group
    Group,
    "group",
    anonymous_default: true,
    validate: validate_group,
    {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        pub group_id: String,
        #[serde(default, skip_serializing_if = "Traits::is_empty")]
        pub traits: Traits,
    }
);

define_event!(
    /// Tie a user to their traits
    Identify,
    "identify",
    anonymous_default: false,
    validate: validate_identified,
    {
        #[serde(default, skip_serializing_if = "Traits::is_empty")]
        pub traits: Traits,
    }
);

define_event!(
    /// Web page view
    Page,
    "page",
    anonymous_default: true,
    validate: validate_identified,
    {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        pub name: String,
        #[serde(default, skip_serializing_if = "Properties::is_empty")]
        pub properties: Properties,
    }
);

define_event!(
    /// Mobile screen view
    Screen,
    "screen",
    anonymous_default: true,
    validate: validate_identified,
    {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        pub name: String,
        #[serde(default, skip_serializing_if = "Properties::is_empty")]
        pub properties: Properties,
    }
);

define_event!(
    /// User action
    Track,
    "track",
    anonymous_default: true,
    validate: validate_track,
    {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        pub event: String,
        #[serde(default, skip_serializing_if = "Properties::is_empty")]
        pub properties: Properties,
    }
);

fn require_identity(event: &dyn EventKind) -> Result<(), ContractError> {
    if event.user_id().is_empty() && event.anonymous_id().is_empty() {
        return Err(ContractError::MissingIdentity { kind: event.kind() });
    }
    Ok(())
}

fn validate_alias(alias: &Alias) -> Result<(), ContractError> {
    if alias.user_id.is_empty() {
        return Err(ContractError::missing_field("alias", "userId"));
    }
    if alias.previous_id.is_empty() {
        return Err(ContractError::missing_field("alias", "previousId"));
    }
    Ok(())
}

fn validate_group(group: &Group) -> Result<(), ContractError> {
    if group.group_id.is_empty() {
        return Err(ContractError::missing_field("group", "groupId"));
    }
    require_identity(group)
}

fn validate_identified(event: &dyn EventKind) -> Result<(), ContractError> {
    require_identity(event)
}

fn validate_track(track: &Track) -> Result<(), ContractError> {
    if track.event.is_empty() {
        return Err(ContractError::missing_field("track", "event"));
    }
    require_identity(track)
}

/// Admitted event
///
/// Serialized with an internal `"type"` tag, matching the batch wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Alias(Alias),
    Group(Group),
    Identify(Identify),
    Page(Page),
    Screen(Screen),
    Track(Track),
}

impl Message {
    /// Capability table of the underlying kind
    pub fn kind(&self) -> &dyn EventKind {
        match self {
            Message::Alias(m) => m,
            Message::Group(m) => m,
            Message::Identify(m) => m,
            Message::Page(m) => m,
            Message::Screen(m) => m,
            Message::Track(m) => m,
        }
    }

    /// Mutable capability table of the underlying kind
    pub fn kind_mut(&mut self) -> &mut dyn EventKind {
        match self {
            Message::Alias(m) => m,
            Message::Group(m) => m,
            Message::Identify(m) => m,
            Message::Page(m) => m,
            Message::Screen(m) => m,
            Message::Track(m) => m,
        }
    }

    pub fn validate(&self) -> Result<(), ContractError> {
        self.kind().validate()
    }

    pub fn apply_defaults(&mut self, stamp: &Stamp<'_>) {
        self.kind_mut().apply_defaults(stamp);
    }

    pub fn message_id(&self) -> &str {
        self.kind().message_id()
    }

    pub fn user_id(&self) -> &str {
        self.kind().user_id()
    }

    pub fn anonymous_id(&self) -> &str {
        self.kind().anonymous_id()
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.kind().sent_at()
    }

    /// Stamp the dispatch time, once per upload attempt
    pub fn set_sent_at(&mut self, sent_at: DateTime<Utc>) {
        self.kind_mut().set_sent_at(sent_at);
    }
}
