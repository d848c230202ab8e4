//! Bindings for the `test.echo` library
//!
//! ```text
//! library test.echo;
//!
//! type Item = struct { id uint32; token zx.Handle:EVENTPAIR; };
//! type Shape = flexible union { 1: radius float64; 2: points vector<int32>:16; };
//! type Settings = table { 1: name string:64; 2: shape Shape; 3: tokens vector<zx.Handle:EVENTPAIR>:4; };
//!
//! protocol Echo {
//!     EchoString(struct { value string:1024; }) -> (struct { response string:1024; });  // 7
//!     SendToken(struct { token zx.Handle:EVENTPAIR; });                               // 8
//!     EchoItem(struct { item Item; }) -> (struct { item Item; });                     // 9
//!     -> OnString(struct { response string:1024; });                                  // 10
//! };
//! ```

use std::sync::Arc;

use blinc_fidl::{
    Client, Completer, Dispatch, Encoder, Error, EventHandler, IncomingMessage, Ordinal,
    Result, ServerBindingRef, StructField, StructType, SyncClient, TableField, TableType, Type,
    UnionMember, UnionType, Value, ObjectType,
};
use blinc_fuchsia_async::Dispatcher;
use blinc_fuchsia_zircon::{Channel, EventPair, Rights, Status, Time};
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::warn;

pub const ECHO_STRING_ORDINAL: Ordinal = 7;
pub const SEND_TOKEN_ORDINAL: Ordinal = 8;
pub const ECHO_ITEM_ORDINAL: Ordinal = 9;
pub const ON_STRING_ORDINAL: Ordinal = 10;

pub const MAX_ECHO_LEN: u32 = 1024;

const EVENTPAIR: Type = Type::Handle {
    object_type: ObjectType::EventPair,
    rights: Rights::SAME_RIGHTS,
    nullable: false,
};

const ECHO_STRING: Type = Type::String {
    max_len: MAX_ECHO_LEN,
    nullable: false,
};

pub static ITEM: StructType = StructType {
    name: "test.echo/Item",
    size: 8,
    alignment: 4,
    fields: &[
        StructField { name: "id", offset: 0, ty: Type::U32 },
        StructField { name: "token", offset: 4, ty: EVENTPAIR },
    ],
};

pub static SHAPE: UnionType = UnionType {
    name: "test.echo/Shape",
    members: &[
        UnionMember { ordinal: 1, name: "radius", ty: Type::F64 },
        UnionMember {
            ordinal: 2,
            name: "points",
            ty: Type::Vector { element: &Type::I32, max_len: 16, nullable: false },
        },
    ],
    strict: false,
};

pub static SETTINGS: TableType = TableType {
    name: "test.echo/Settings",
    fields: &[
        TableField {
            ordinal: 1,
            name: "name",
            ty: Type::String { max_len: 64, nullable: false },
        },
        TableField {
            ordinal: 2,
            name: "shape",
            ty: Type::Union { union: &SHAPE, nullable: false },
        },
        TableField {
            ordinal: 3,
            name: "tokens",
            ty: Type::Vector { element: &EVENTPAIR, max_len: 4, nullable: false },
        },
    ],
};

pub static ECHO_STRING_REQUEST: StructType = StructType {
    name: "test.echo/EchoEchoStringRequest",
    size: 16,
    alignment: 8,
    fields: &[StructField { name: "value", offset: 0, ty: ECHO_STRING }],
};

pub static ECHO_STRING_RESPONSE: StructType = StructType {
    name: "test.echo/EchoEchoStringResponse",
    size: 16,
    alignment: 8,
    fields: &[StructField { name: "response", offset: 0, ty: ECHO_STRING }],
};

pub static SEND_TOKEN_REQUEST: StructType = StructType {
    name: "test.echo/EchoSendTokenRequest",
    size: 4,
    alignment: 4,
    fields: &[StructField { name: "token", offset: 0, ty: EVENTPAIR }],
};

pub static ECHO_ITEM_REQUEST: StructType = StructType {
    name: "test.echo/EchoEchoItemRequest",
    size: 8,
    alignment: 4,
    fields: &[StructField { name: "item", offset: 0, ty: Type::Struct(&ITEM) }],
};

pub static ECHO_ITEM_RESPONSE: StructType = StructType {
    name: "test.echo/EchoEchoItemResponse",
    size: 8,
    alignment: 4,
    fields: &[StructField { name: "item", offset: 0, ty: Type::Struct(&ITEM) }],
};

pub static ON_STRING_EVENT: StructType = StructType {
    name: "test.echo/EchoOnStringRequest",
    size: 16,
    alignment: 8,
    fields: &[StructField { name: "response", offset: 0, ty: ECHO_STRING }],
};

pub static ECHO_STRING_REQUEST_TYPE: Type = Type::Struct(&ECHO_STRING_REQUEST);
pub static ECHO_STRING_RESPONSE_TYPE: Type = Type::Struct(&ECHO_STRING_RESPONSE);
pub static SEND_TOKEN_REQUEST_TYPE: Type = Type::Struct(&SEND_TOKEN_REQUEST);
pub static ECHO_ITEM_REQUEST_TYPE: Type = Type::Struct(&ECHO_ITEM_REQUEST);
pub static ECHO_ITEM_RESPONSE_TYPE: Type = Type::Struct(&ECHO_ITEM_RESPONSE);
pub static ON_STRING_EVENT_TYPE: Type = Type::Struct(&ON_STRING_EVENT);
pub static SETTINGS_TYPE: Type = Type::Table(&SETTINGS);

/// The only field of a single-field payload struct
fn sole_field(value: Value, payload: &'static StructType) -> Result<Value> {
    let kind = value.kind();
    value
        .into_fields()
        .and_then(|fields| fields.into_iter().next())
        .ok_or(Error::TypeMismatch {
            expected: payload.name,
            actual: kind,
        })
}

fn into_string(value: Value) -> Result<String> {
    match value {
        Value::String(Some(s)) => Ok(s),
        other => Err(Error::TypeMismatch {
            expected: "string",
            actual: other.kind(),
        }),
    }
}

/// `test.echo/Item`
#[derive(Debug)]
pub struct Item {
    pub id: u32,
    pub token: EventPair,
}

impl Item {
    pub fn into_value(self) -> Value {
        Value::Struct(vec![Value::U32(self.id), Value::handle(self.token)])
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let kind = value.kind();
        let mismatch = Error::TypeMismatch {
            expected: ITEM.name,
            actual: kind,
        };
        let mut fields = value.into_fields().ok_or(mismatch.clone())?.into_iter();
        let id = fields.next().and_then(|v| v.as_u32()).ok_or(mismatch.clone())?;
        let token = fields.next().and_then(Value::into_handle).ok_or(mismatch)?;
        Ok(Self {
            id,
            token: EventPair::from(token),
        })
    }
}

/// Server side of `test.echo/Echo`
pub trait Echo: Send + Sync + 'static {
    fn echo_string(&self, value: String, responder: EchoStringResponder);

    fn send_token(&self, token: EventPair) {
        drop(token);
    }

    fn echo_item(&self, item: Item, responder: EchoItemResponder);
}

pub struct EchoStringResponder(Completer);

impl EchoStringResponder {
    pub fn send(self, response: &str) -> Result<()> {
        self.0.reply(
            &ECHO_STRING_RESPONSE_TYPE,
            Value::Struct(vec![Value::string(response)]),
        )
    }

    pub fn close(self, epitaph: Status) {
        self.0.close(epitaph)
    }

    pub fn completer(&self) -> &Completer {
        &self.0
    }
}

pub struct EchoItemResponder(Completer);

impl EchoItemResponder {
    pub fn send(self, item: Item) -> Result<()> {
        self.0.reply(
            &ECHO_ITEM_RESPONSE_TYPE,
            Value::Struct(vec![item.into_value()]),
        )
    }

    pub fn close(self, epitaph: Status) {
        self.0.close(epitaph)
    }

    pub fn completer(&self) -> &Completer {
        &self.0
    }
}

/// Routes `test.echo/Echo` messages to an [`Echo`] implementation
///
/// Requests that fail to decode close the binding with
/// `ERR_INVALID_ARGS`; unknown ordinals close it with `ERR_NOT_SUPPORTED`.
pub struct EchoServer<T>(pub T);

impl<T: Echo> Dispatch for EchoServer<T> {
    fn dispatch(&self, message: IncomingMessage, completer: Completer) {
        match message.ordinal() {
            ECHO_STRING_ORDINAL => {
                let value = message
                    .decode(&ECHO_STRING_REQUEST_TYPE)
                    .and_then(|v| sole_field(v, &ECHO_STRING_REQUEST))
                    .and_then(into_string);
                match value {
                    Ok(value) => self.0.echo_string(value, EchoStringResponder(completer)),
                    Err(error) => reject(completer, error),
                }
            }
            SEND_TOKEN_ORDINAL => {
                let token = message
                    .decode(&SEND_TOKEN_REQUEST_TYPE)
                    .and_then(|v| sole_field(v, &SEND_TOKEN_REQUEST))
                    .map(Value::into_handle);
                match token {
                    Ok(Some(token)) => self.0.send_token(EventPair::from(token)),
                    Ok(None) => reject(completer, Error::NonNullableAbsent { kind: "handle" }),
                    Err(error) => reject(completer, error),
                }
            }
            ECHO_ITEM_ORDINAL => {
                let item = message
                    .decode(&ECHO_ITEM_REQUEST_TYPE)
                    .and_then(|v| sole_field(v, &ECHO_ITEM_REQUEST))
                    .and_then(Item::from_value);
                match item {
                    Ok(item) => self.0.echo_item(item, EchoItemResponder(completer)),
                    Err(error) => reject(completer, error),
                }
            }
            ordinal => {
                warn!(ordinal, "unknown method");
                completer.close(Status::ERR_NOT_SUPPORTED);
            }
        }
    }
}

fn reject(completer: Completer, error: Error) {
    warn!(ordinal = completer.ordinal(), %error, "invalid request");
    completer.close(Status::ERR_INVALID_ARGS);
}

/// Send `OnString` to the client of `binding`
pub fn send_on_string(binding: &ServerBindingRef, response: &str) -> Result<()> {
    let mut encoder = Encoder::message(0, ON_STRING_ORDINAL);
    encoder.encode(
        &ON_STRING_EVENT_TYPE,
        Value::Struct(vec![Value::string(response)]),
    )?;
    binding.send_event(encoder)
}

/// Events of `test.echo/Echo`
#[derive(Debug, PartialEq, Eq)]
pub enum EchoEvent {
    OnString { response: String },
}

impl EchoEvent {
    pub fn decode(message: IncomingMessage) -> Result<Self> {
        match message.ordinal() {
            ON_STRING_ORDINAL => {
                let payload = message.decode(&ON_STRING_EVENT_TYPE)?;
                let response = into_string(sole_field(payload, &ON_STRING_EVENT)?)?;
                Ok(EchoEvent::OnString { response })
            }
            ordinal => Err(Error::UnknownOrdinal { ordinal }),
        }
    }
}

/// Asynchronous `test.echo/Echo` client
#[derive(Clone, Debug)]
pub struct EchoProxy {
    client: Client,
}

impl EchoProxy {
    pub fn new(
        channel: Channel,
        dispatcher: &Dispatcher,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Self> {
        Ok(Self {
            client: Client::create(channel, dispatcher, handler)?,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn echo_string<F>(&self, value: &str, callback: F) -> Result<()>
    where
        F: FnOnce(Result<String>) + Send + 'static,
    {
        self.client.call(
            ECHO_STRING_ORDINAL,
            &ECHO_STRING_REQUEST_TYPE,
            Value::Struct(vec![Value::string(value)]),
            &ECHO_STRING_RESPONSE_TYPE,
            move |result| {
                callback(
                    result
                        .and_then(|v| sole_field(v, &ECHO_STRING_RESPONSE))
                        .and_then(into_string),
                )
            },
        )
    }

    pub fn echo_string_async(&self, value: &str) -> BoxFuture<'static, Result<String>> {
        let call = self.client.call_async(
            ECHO_STRING_ORDINAL,
            &ECHO_STRING_REQUEST_TYPE,
            Value::Struct(vec![Value::string(value)]),
            &ECHO_STRING_RESPONSE_TYPE,
        );
        async move { into_string(sole_field(call.await?, &ECHO_STRING_RESPONSE)?) }.boxed()
    }

    pub fn echo_item<F>(&self, item: Item, callback: F) -> Result<()>
    where
        F: FnOnce(Result<Item>) + Send + 'static,
    {
        self.client.call(
            ECHO_ITEM_ORDINAL,
            &ECHO_ITEM_REQUEST_TYPE,
            Value::Struct(vec![item.into_value()]),
            &ECHO_ITEM_RESPONSE_TYPE,
            move |result| {
                callback(
                    result
                        .and_then(|v| sole_field(v, &ECHO_ITEM_RESPONSE))
                        .and_then(Item::from_value),
                )
            },
        )
    }

    pub fn send_token(&self, token: EventPair) -> Result<()> {
        self.client.send_one_way(
            SEND_TOKEN_ORDINAL,
            &SEND_TOKEN_REQUEST_TYPE,
            Value::Struct(vec![Value::handle(token)]),
        )
    }
}

/// Blocking `test.echo/Echo` client
#[derive(Debug)]
pub struct EchoSynchronousProxy {
    client: SyncClient,
}

impl EchoSynchronousProxy {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: SyncClient::new(channel),
        }
    }

    pub fn echo_string(&self, value: &str, deadline: Time) -> Result<String> {
        let response = self.client.call(
            ECHO_STRING_ORDINAL,
            &ECHO_STRING_REQUEST_TYPE,
            Value::Struct(vec![Value::string(value)]),
            &ECHO_STRING_RESPONSE_TYPE,
            deadline,
        )?;
        into_string(sole_field(response, &ECHO_STRING_RESPONSE)?)
    }

    pub fn wait_for_event(&self, deadline: Time) -> Result<EchoEvent> {
        EchoEvent::decode(self.client.wait_for_event(deadline)?)
    }

    pub fn into_channel(self) -> Channel {
        self.client.into_channel()
    }
}
