use crate::{
    compact,
    id::{Key, NodeId},
    routing::node::NodeHandle,
};
use serde::{
    de::{Deserializer, Error as _, IgnoredAny, SeqAccess, Visitor},
    ser::{SerializeSeq, Serializer},
    Deserialize, Serialize,
};
use serde_bytes::ByteBuf;
use std::fmt;

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub(crate) struct Message {
    #[serde(rename = "t", with = "serde_bytes")]
    pub transaction_id: Vec<u8>,
    #[serde(flatten)]
    pub body: MessageBody,
}

impl Message {
    /// Decode the message from bencode.
    pub fn decode(input: &[u8]) -> Result<Self, serde_bencode::Error> {
        serde_bencode::from_bytes(input)
    }

    /// Encode the message into bencode.
    pub fn encode(&self) -> Result<Vec<u8>, serde_bencode::Error> {
        serde_bencode::to_bytes(self)
    }

    /// Error reply to an input that failed to decode, provided it still looks like a request
    /// (has a transaction id and `y` = `q`).
    pub fn reject(input: &[u8]) -> Option<Self> {
        let envelope: Envelope = serde_bencode::from_bytes(input).ok()?;

        if envelope.kind != "q" {
            return None;
        }

        let error = match envelope.method {
            Some(method) if !Request::METHODS.iter().any(|known| *known == method.as_slice()) => {
                Error {
                    code: error_code::METHOD_UNKNOWN,
                    message: "method unknown".to_owned(),
                }
            }
            _ => Error {
                code: error_code::PROTOCOL_ERROR,
                message: "invalid request".to_owned(),
            },
        };

        Some(Self {
            transaction_id: envelope.transaction_id,
            body: MessageBody::Error(error),
        })
    }
}

// The parts of a message needed to answer it, whatever else it contains.
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "t", with = "serde_bytes")]
    transaction_id: Vec<u8>,
    #[serde(rename = "y")]
    kind: String,
    #[serde(rename = "q", default)]
    method: Option<ByteBuf>,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(tag = "y")]
pub(crate) enum MessageBody {
    #[serde(rename = "q")]
    Request(Request),
    #[serde(rename = "r", with = "unflatten::response")]
    Response(Response),
    #[serde(rename = "e", with = "unflatten::error")]
    Error(Error),
}

// Opposite of `serde(flatten)` - artificially add one level of nesting to a field.
mod unflatten {
    macro_rules! impl_unflatten {
        ($mod:ident, $field:literal) => {
            pub(crate) mod $mod {
                use serde::{Deserialize, Deserializer, Serialize, Serializer};

                #[derive(Serialize, Deserialize)]
                struct Wrapper<T> {
                    #[serde(rename = $field)]
                    field: T,
                }

                pub(crate) fn serialize<T: Serialize, S: Serializer>(
                    value: &T,
                    s: S,
                ) -> Result<S::Ok, S::Error> {
                    Wrapper { field: value }.serialize(s)
                }

                pub(crate) fn deserialize<'de, T: Deserialize<'de>, D: Deserializer<'de>>(
                    d: D,
                ) -> Result<T, D::Error> {
                    let wrapper = Wrapper::deserialize(d)?;
                    Ok(wrapper.field)
                }
            }
        };
    }

    impl_unflatten!(response, "r");
    impl_unflatten!(error, "e");
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(tag = "q", content = "a")]
#[serde(rename_all = "snake_case")]
pub(crate) enum Request {
    Ping(PingRequest),
    Store(StoreRequest),
    FindNode(FindNodeRequest),
    FindValue(FindValueRequest),
}

impl Request {
    const METHODS: [&'static [u8]; 4] = [b"ping", b"store", b"find_node", b"find_value"];

    /// Id of the node that sent the request.
    pub fn sender_id(&self) -> NodeId {
        match self {
            Self::Ping(r) => r.id,
            Self::Store(r) => r.id,
            Self::FindNode(r) => r.id,
            Self::FindValue(r) => r.id,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Self::Ping(_) => "ping",
            Self::Store(_) => "store",
            Self::FindNode(_) => "find_node",
            Self::FindValue(_) => "find_value",
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub(crate) struct PingRequest {
    pub id: NodeId,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub(crate) struct StoreRequest {
    pub id: NodeId,
    pub key: Key,
    #[serde(with = "serde_bytes")]
    pub value: Vec<u8>,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub(crate) struct FindNodeRequest {
    pub id: NodeId,
    pub target: NodeId,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub(crate) struct FindValueRequest {
    pub id: NodeId,
    pub key: Key,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum Response {
    // NOTE: the order these variants are listed in is important to make sure they deserialize
    // properly because we use `untagged` enum for this.
    Value(ValueResponse),
    // Response to `ping`, `store`, `find_node` or to a `find_value` that missed. Only the pending
    // request it is routed to knows which.
    Other(OtherResponse),
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub(crate) struct ValueResponse {
    pub id: NodeId,
    #[serde(rename = "v", with = "serde_bytes")]
    pub value: Vec<u8>,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub(crate) struct OtherResponse {
    pub id: NodeId,

    #[serde(
        rename = "nodes",
        with = "compact::nodes_v4",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub nodes_v4: Vec<NodeHandle>,

    #[serde(
        rename = "nodes6",
        with = "compact::nodes_v6",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub nodes_v6: Vec<NodeHandle>,
}

impl OtherResponse {
    /// Acknowledgement without payload.
    pub fn ack(id: NodeId) -> Self {
        Self {
            id,
            nodes_v4: Vec::new(),
            nodes_v6: Vec::new(),
        }
    }

    /// Split `nodes` by address family into the `nodes`/`nodes6` lists.
    pub fn with_nodes(id: NodeId, nodes: Vec<NodeHandle>) -> Self {
        let (nodes_v4, nodes_v6) = nodes.into_iter().partition(|node| node.addr.is_ipv4());

        Self {
            id,
            nodes_v4,
            nodes_v6,
        }
    }

    pub fn into_nodes(self) -> Vec<NodeHandle> {
        let mut nodes = self.nodes_v4;
        nodes.extend(self.nodes_v6);
        nodes
    }
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub(crate) struct Error {
    pub code: u8,
    pub message: String,
}

// Using custom Serialize/Deserialize impls because the format is too weird.
impl Serialize for Error {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut seq = s.serialize_seq(Some(2))?;
        seq.serialize_element(&self.code)?;
        seq.serialize_element(&self.message)?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Error {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct ErrorVisitor;

        impl<'de> Visitor<'de> for ErrorVisitor {
            type Value = Error;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "a list of two elements: an integer and a string")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let code: u8 = seq
                    .next_element()?
                    .ok_or_else(|| A::Error::invalid_length(0, &self))?;
                let message = seq
                    .next_element()?
                    .ok_or_else(|| A::Error::invalid_length(1, &self))?;

                // Make sure the list is consumed to the end.
                if seq.next_element::<IgnoredAny>()?.is_some() {
                    return Err(A::Error::invalid_length(3, &self));
                }

                Ok(Error { code, message })
            }
        }

        d.deserialize_seq(ErrorVisitor)
    }
}

pub(crate) mod error_code {
    #[cfg(test)]
    pub const GENERIC_ERROR: u8 = 201;
    pub const PROTOCOL_ERROR: u8 = 203;
    pub const METHOD_UNKNOWN: u8 = 204;
}
