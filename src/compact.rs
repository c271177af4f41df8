//! Compact representation of node lists.

use crate::id::ID_LEN;
use std::{
    convert::TryInto,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
};

const SOCKET_ADDR_V4_LEN: usize = 6;
const SOCKET_ADDR_V6_LEN: usize = 18;
const NODE_HANDLE_V4_LEN: usize = ID_LEN + SOCKET_ADDR_V4_LEN;
const NODE_HANDLE_V6_LEN: usize = ID_LEN + SOCKET_ADDR_V6_LEN;

// Serialize/deserialize `Vec` of `NodeHandle` as a single byte string of fixed size records.
macro_rules! impl_nodes {
    ($mod:ident, $record_len:expr, $is_family:ident, $family:literal) => {
        pub(crate) mod $mod {
            use crate::{id::NodeId, routing::node::NodeHandle};
            use serde::{
                de::{Deserialize, Deserializer, Error as _},
                ser::{Error as _, Serializer},
            };
            use serde_bytes::ByteBuf;
            use std::convert::TryFrom;

            pub(crate) fn serialize<S>(nodes: &[NodeHandle], s: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                let mut buffer = Vec::with_capacity(nodes.len() * $record_len);

                for node in nodes {
                    if !node.addr.$is_family() {
                        return Err(S::Error::custom(concat!("node addr is not ", $family)));
                    }

                    buffer.extend(node.id.as_ref());
                    buffer.extend(super::encode_socket_addr(&node.addr));
                }

                s.serialize_bytes(&buffer)
            }

            pub(crate) fn deserialize<'de, D>(d: D) -> Result<Vec<NodeHandle>, D::Error>
            where
                D: Deserializer<'de>,
            {
                let buffer = ByteBuf::deserialize(d)?;
                let chunks = buffer.chunks_exact($record_len);

                if !chunks.remainder().is_empty() {
                    let msg = format!("multiple of {}", $record_len);
                    return Err(D::Error::invalid_length(buffer.len(), &msg.as_ref()));
                }

                let nodes = chunks
                    .filter_map(|chunk| {
                        let id = NodeId::try_from(&chunk[..super::ID_LEN]).ok()?;
                        let addr = super::decode_socket_addr(&chunk[super::ID_LEN..])?;

                        Some(NodeHandle { id, addr })
                    })
                    .collect();

                Ok(nodes)
            }
        }
    };
}

impl_nodes!(nodes_v4, super::NODE_HANDLE_V4_LEN, is_ipv4, "ipv4");
impl_nodes!(nodes_v6, super::NODE_HANDLE_V6_LEN, is_ipv6, "ipv6");

fn decode_socket_addr(src: &[u8]) -> Option<SocketAddr> {
    if src.len() == SOCKET_ADDR_V4_LEN {
        let addr: [u8; 4] = src.get(..4)?.try_into().ok()?;
        let addr = Ipv4Addr::from(addr);
        let port = u16::from_be_bytes(src.get(4..)?.try_into().ok()?);
        Some((addr, port).into())
    } else if src.len() == SOCKET_ADDR_V6_LEN {
        let addr: [u8; 16] = src.get(..16)?.try_into().ok()?;
        let addr = Ipv6Addr::from(addr);
        let port = u16::from_be_bytes(src.get(16..)?.try_into().ok()?);
        Some((addr, port).into())
    } else {
        None
    }
}

fn encode_socket_addr(addr: &SocketAddr) -> Vec<u8> {
    let mut buffer = match addr {
        SocketAddr::V4(addr) => {
            let mut buffer = Vec::with_capacity(SOCKET_ADDR_V4_LEN);
            buffer.extend(addr.ip().octets().as_ref());
            buffer
        }
        SocketAddr::V6(addr) => {
            let mut buffer = Vec::with_capacity(SOCKET_ADDR_V6_LEN);
            buffer.extend(addr.ip().octets().as_ref());
            buffer
        }
    };

    buffer.extend(addr.port().to_be_bytes().as_ref());
    buffer
}

#[cfg(test)]
mod tests {
    use crate::{id::NodeId, routing::node::NodeHandle};
    use serde::{Deserialize, Serialize};
    use std::{
        fmt::Debug,
        net::{Ipv4Addr, Ipv6Addr},
    };

    #[derive(Debug, Eq, PartialEq, Serialize, Deserialize)]
    #[serde(transparent)]
    struct V4Wrapper {
        #[serde(with = "super::nodes_v4")]
        nodes: Vec<NodeHandle>,
    }

    #[derive(Debug, Eq, PartialEq, Serialize, Deserialize)]
    #[serde(transparent)]
    struct V6Wrapper {
        #[serde(with = "super::nodes_v6")]
        nodes: Vec<NodeHandle>,
    }

    #[test]
    fn encode_decode_nodes_v4() {
        encode_decode(&V4Wrapper { nodes: Vec::new() }, b"0:");
        encode_decode(
            &V4Wrapper {
                nodes: vec![NodeHandle {
                    id: NodeId::from(*b"0123456789abcdefghij"),
                    addr: (Ipv4Addr::new(127, 0, 0, 1), 6789).into(),
                }],
            },
            &[
                b'2', b'6', b':', b'0', b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'8', b'9', b'a',
                b'b', b'c', b'd', b'e', b'f', b'g', b'h', b'i', b'j', 127, 0, 0, 1, 26, 133,
            ],
        );
    }

    #[test]
    fn decode_nodes_v6_keeps_address() {
        let node = NodeHandle {
            id: NodeId::from(*b"klmnopqrstuvwxyz0123"),
            addr: (Ipv6Addr::new(0x2001, 0x0db8, 0, 0, 0, 0x8a2e, 0x0370, 0x7334), 1234).into(),
        };

        let encoded = serde_bencode::to_bytes(&V6Wrapper { nodes: vec![node] }).unwrap();
        assert_eq!(&encoded[..3], b"38:");

        let decoded: V6Wrapper = serde_bencode::from_bytes(&encoded).unwrap();
        assert_eq!(decoded.nodes.len(), 1);
        assert_eq!(decoded.nodes[0].addr, node.addr);
    }

    #[test]
    fn reject_wrong_family() {
        let node = NodeHandle {
            id: NodeId::from(*b"0123456789abcdefghij"),
            addr: (Ipv6Addr::LOCALHOST, 6789).into(),
        };

        assert!(serde_bencode::to_bytes(&V4Wrapper { nodes: vec![node] }).is_err());
    }

    #[test]
    fn reject_truncated_record() {
        let result: Result<V4Wrapper, _> = serde_bencode::from_bytes(b"3:abc");
        assert!(result.is_err());
    }

    fn encode_decode<'de, T>(value: &T, expected_encoded: &'de [u8])
    where
        T: Serialize + Deserialize<'de> + Eq + Debug,
    {
        let actual_encoded = serde_bencode::to_bytes(value).unwrap();
        assert_eq!(actual_encoded, expected_encoded);

        let actual_decoded: T = serde_bencode::from_bytes(expected_encoded).unwrap();
        assert_eq!(actual_decoded, *value);
    }
}
