//! KRPC: the Bencode-over-UDP RPC envelope used by ping, find_node,
//! get_peers, and announce_peer.
use crate::bencode::{decoder, encoder, BencodeError, BencodeValue};
use crate::wire::{InfoHash, NodeId, PeerAddress};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum KrpcError {
    #[error(transparent)]
    Bencode(#[from] BencodeError),

    #[error("message is missing required key {0:?}")]
    MissingKey(&'static str),

    #[error("message has an unexpected shape for key {0:?}")]
    WrongShape(&'static str),

    #[error("unknown message type {0:?}")]
    UnknownMessageType(Vec<u8>),

    #[error("unknown query method {0:?}")]
    UnknownMethod(Vec<u8>),

    #[error("transaction id or node id is not exactly 20/2-8 bytes as required")]
    BadIdLength,

    #[error("remote returned an error: {code} {message}")]
    RemoteError { code: i64, message: String },

    #[error("malformed compact node or peer list")]
    CompactDecode,
}

/// Opaque per-query transaction id, 2-8 bytes per the wire format; this
/// implementation always emits 2-byte ids which comfortably cover the
/// in-flight transaction space used by `transaction.rs`.
pub type TransactionId = Vec<u8>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Ping {
        id: NodeId,
    },
    FindNode {
        id: NodeId,
        target: NodeId,
    },
    GetPeers {
        id: NodeId,
        info_hash: InfoHash,
    },
    AnnouncePeer {
        id: NodeId,
        info_hash: InfoHash,
        port: u16,
        token: Vec<u8>,
        implied_port: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ping {
        id: NodeId,
    },
    FindNode {
        id: NodeId,
        nodes: Vec<(NodeId, PeerAddress)>,
    },
    GetPeersWithValues {
        id: NodeId,
        token: Vec<u8>,
        values: Vec<PeerAddress>,
    },
    GetPeersWithNodes {
        id: NodeId,
        token: Vec<u8>,
        nodes: Vec<(NodeId, PeerAddress)>,
    },
    AnnouncePeer {
        id: NodeId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Query { txn: TransactionId, query: Query },
    Response { txn: TransactionId, response: Response },
    Error { txn: TransactionId, error: RemoteError },
}

const NODE_COMPACT_LEN: usize = 26; // 20 bytes id + 6 bytes compact address

fn compact_nodes(nodes: &[(NodeId, PeerAddress)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nodes.len() * NODE_COMPACT_LEN);
    for (id, addr) in nodes {
        out.extend_from_slice(id.as_bytes());
        out.extend_from_slice(&addr.to_compact());
    }
    out
}

fn decode_compact_nodes(bytes: &[u8]) -> Result<Vec<(NodeId, PeerAddress)>, KrpcError> {
    if bytes.len() % NODE_COMPACT_LEN != 0 {
        return Err(KrpcError::CompactDecode);
    }
    bytes
        .chunks_exact(NODE_COMPACT_LEN)
        .map(|chunk| {
            let mut id_bytes = [0u8; 20];
            id_bytes.copy_from_slice(&chunk[..20]);
            let addr = PeerAddress::from_compact(&chunk[20..]).map_err(|_| KrpcError::CompactDecode)?;
            Ok((NodeId::from_bytes(id_bytes), addr))
        })
        .collect()
}

fn bstr(s: &[u8]) -> BencodeValue {
    BencodeValue::Bytes(s.to_vec())
}

fn get_bytes<'a>(dict: &'a BTreeMap<Vec<u8>, BencodeValue>, key: &'static str) -> Result<&'a [u8], KrpcError> {
    dict.get(key.as_bytes())
        .and_then(BencodeValue::as_bytes)
        .ok_or(KrpcError::MissingKey(key))
}

fn get_node_id(dict: &BTreeMap<Vec<u8>, BencodeValue>, key: &'static str) -> Result<NodeId, KrpcError> {
    let bytes = get_bytes(dict, key)?;
    if bytes.len() != 20 {
        return Err(KrpcError::BadIdLength);
    }
    let mut id = [0u8; 20];
    id.copy_from_slice(bytes);
    Ok(NodeId::from_bytes(id))
}

fn get_info_hash(dict: &BTreeMap<Vec<u8>, BencodeValue>, key: &'static str) -> Result<InfoHash, KrpcError> {
    let bytes = get_bytes(dict, key)?;
    if bytes.len() != 20 {
        return Err(KrpcError::BadIdLength);
    }
    let mut ih = [0u8; 20];
    ih.copy_from_slice(bytes);
    Ok(InfoHash::from_bytes(ih))
}

fn get_int(dict: &BTreeMap<Vec<u8>, BencodeValue>, key: &'static str) -> Result<i64, KrpcError> {
    dict.get(key.as_bytes())
        .and_then(BencodeValue::as_integer)
        .ok_or(KrpcError::MissingKey(key))
}

impl Message {
    pub fn encode(&self) -> Result<Vec<u8>, KrpcError> {
        let mut top = BTreeMap::new();
        match self {
            Message::Query { txn, query } => {
                top.insert(b"t".to_vec(), bstr(txn));
                top.insert(b"y".to_vec(), bstr(b"q"));
                let (method, args) = encode_query(query);
                top.insert(b"q".to_vec(), bstr(method));
                top.insert(b"a".to_vec(), BencodeValue::Dict(args));
            }
            Message::Response { txn, response } => {
                top.insert(b"t".to_vec(), bstr(txn));
                top.insert(b"y".to_vec(), bstr(b"r"));
                top.insert(b"r".to_vec(), BencodeValue::Dict(encode_response(response)));
            }
            Message::Error { txn, error } => {
                top.insert(b"t".to_vec(), bstr(txn));
                top.insert(b"y".to_vec(), bstr(b"e"));
                top.insert(
                    b"e".to_vec(),
                    BencodeValue::List(vec![
                        BencodeValue::Integer(error.code),
                        bstr(error.message.as_bytes()),
                    ]),
                );
            }
        }
        Ok(encoder::encode_to_vec(&BencodeValue::Dict(top))?)
    }

    pub fn decode(input: &[u8]) -> Result<Self, KrpcError> {
        let value = decoder::decode_exact(input)?;
        let dict = value.as_dict().ok_or(KrpcError::WrongShape("<top>"))?;
        let txn = get_bytes(dict, "t")?.to_vec();
        let kind = get_bytes(dict, "y")?;
        match kind {
            b"q" => {
                let method = get_bytes(dict, "q")?.to_vec();
                let args = dict
                    .get(b"a".as_slice())
                    .and_then(BencodeValue::as_dict)
                    .ok_or(KrpcError::MissingKey("a"))?;
                let query = decode_query(&method, args)?;
                Ok(Message::Query { txn, query })
            }
            b"r" => {
                let r = dict
                    .get(b"r".as_slice())
                    .and_then(BencodeValue::as_dict)
                    .ok_or(KrpcError::MissingKey("r"))?;
                Ok(Message::Response {
                    txn,
                    response: decode_response(r)?,
                })
            }
            b"e" => {
                let list = dict
                    .get(b"e".as_slice())
                    .and_then(BencodeValue::as_list)
                    .ok_or(KrpcError::MissingKey("e"))?;
                if list.len() != 2 {
                    return Err(KrpcError::WrongShape("e"));
                }
                let code = list[0].as_integer().ok_or(KrpcError::WrongShape("e"))?;
                let message = list[1]
                    .as_bytes()
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .ok_or(KrpcError::WrongShape("e"))?;
                Ok(Message::Error {
                    txn,
                    error: RemoteError { code, message },
                })
            }
            other => Err(KrpcError::UnknownMessageType(other.to_vec())),
        }
    }
}

fn encode_query(query: &Query) -> (&'static [u8], BTreeMap<Vec<u8>, BencodeValue>) {
    let mut args = BTreeMap::new();
    let method: &'static [u8] = match query {
        Query::Ping { id } => {
            args.insert(b"id".to_vec(), bstr(id.as_bytes()));
            b"ping"
        }
        Query::FindNode { id, target } => {
            args.insert(b"id".to_vec(), bstr(id.as_bytes()));
            args.insert(b"target".to_vec(), bstr(target.as_bytes()));
            b"find_node"
        }
        Query::GetPeers { id, info_hash } => {
            args.insert(b"id".to_vec(), bstr(id.as_bytes()));
            args.insert(b"info_hash".to_vec(), bstr(info_hash.as_bytes()));
            b"get_peers"
        }
        Query::AnnouncePeer {
            id,
            info_hash,
            port,
            token,
            implied_port,
        } => {
            args.insert(b"id".to_vec(), bstr(id.as_bytes()));
            args.insert(b"info_hash".to_vec(), bstr(info_hash.as_bytes()));
            args.insert(b"port".to_vec(), BencodeValue::Integer(*port as i64));
            args.insert(b"token".to_vec(), bstr(token));
            args.insert(
                b"implied_port".to_vec(),
                BencodeValue::Integer(if *implied_port { 1 } else { 0 }),
            );
            b"announce_peer"
        }
    };
    (method, args)
}

fn decode_query(method: &[u8], args: &BTreeMap<Vec<u8>, BencodeValue>) -> Result<Query, KrpcError> {
    match method {
        b"ping" => Ok(Query::Ping {
            id: get_node_id(args, "id")?,
        }),
        b"find_node" => Ok(Query::FindNode {
            id: get_node_id(args, "id")?,
            target: get_node_id(args, "target")?,
        }),
        b"get_peers" => Ok(Query::GetPeers {
            id: get_node_id(args, "id")?,
            info_hash: get_info_hash(args, "info_hash")?,
        }),
        b"announce_peer" => {
            let implied_port = args
                .get(b"implied_port".as_slice())
                .and_then(BencodeValue::as_integer)
                .unwrap_or(0)
                != 0;
            Ok(Query::AnnouncePeer {
                id: get_node_id(args, "id")?,
                info_hash: get_info_hash(args, "info_hash")?,
                port: get_int(args, "port")? as u16,
                token: get_bytes(args, "token")?.to_vec(),
                implied_port,
            })
        }
        other => Err(KrpcError::UnknownMethod(other.to_vec())),
    }
}

fn encode_response(response: &Response) -> BTreeMap<Vec<u8>, BencodeValue> {
    let mut r = BTreeMap::new();
    match response {
        Response::Ping { id } => {
            r.insert(b"id".to_vec(), bstr(id.as_bytes()));
        }
        Response::FindNode { id, nodes } => {
            r.insert(b"id".to_vec(), bstr(id.as_bytes()));
            r.insert(b"nodes".to_vec(), bstr(&compact_nodes(nodes)));
        }
        Response::GetPeersWithValues { id, token, values } => {
            r.insert(b"id".to_vec(), bstr(id.as_bytes()));
            r.insert(b"token".to_vec(), bstr(token));
            r.insert(
                b"values".to_vec(),
                BencodeValue::List(values.iter().map(|v| bstr(&v.to_compact())).collect()),
            );
        }
        Response::GetPeersWithNodes { id, token, nodes } => {
            r.insert(b"id".to_vec(), bstr(id.as_bytes()));
            r.insert(b"token".to_vec(), bstr(token));
            r.insert(b"nodes".to_vec(), bstr(&compact_nodes(nodes)));
        }
        Response::AnnouncePeer { id } => {
            r.insert(b"id".to_vec(), bstr(id.as_bytes()));
        }
    }
    r
}

fn decode_response(r: &BTreeMap<Vec<u8>, BencodeValue>) -> Result<Response, KrpcError> {
    let id = get_node_id(r, "id")?;
    let token = r.get(b"token".as_slice()).and_then(BencodeValue::as_bytes);
    let values = r.get(b"values".as_slice()).and_then(BencodeValue::as_list);
    let nodes = r.get(b"nodes".as_slice()).and_then(BencodeValue::as_bytes);

    if let (Some(token), Some(values)) = (token, values) {
        let values = values
            .iter()
            .map(|v| {
                v.as_bytes()
                    .ok_or(KrpcError::WrongShape("values"))
                    .and_then(|b| PeerAddress::from_compact(b).map_err(|_| KrpcError::CompactDecode))
            })
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Response::GetPeersWithValues {
            id,
            token: token.to_vec(),
            values,
        });
    }
    if let (Some(token), Some(nodes)) = (token, nodes) {
        return Ok(Response::GetPeersWithNodes {
            id,
            token: token.to_vec(),
            nodes: decode_compact_nodes(nodes)?,
        });
    }
    if let Some(nodes) = nodes {
        return Ok(Response::FindNode {
            id,
            nodes: decode_compact_nodes(nodes)?,
        });
    }
    Ok(Response::Ping { id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(n: u8) -> PeerAddress {
        PeerAddress::new(Ipv4Addr::new(10, 0, 0, n), 6881)
    }

    #[test]
    fn ping_query_round_trips() {
        let msg = Message::Query {
            txn: b"aa".to_vec(),
            query: Query::Ping { id: NodeId::random() },
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn find_node_query_round_trips() {
        let msg = Message::Query {
            txn: b"bb".to_vec(),
            query: Query::FindNode {
                id: NodeId::random(),
                target: NodeId::random(),
            },
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn find_node_response_with_compact_nodes_round_trips() {
        let nodes = vec![(NodeId::random(), addr(1)), (NodeId::random(), addr(2))];
        let msg = Message::Response {
            txn: b"cc".to_vec(),
            response: Response::FindNode {
                id: NodeId::random(),
                nodes: nodes.clone(),
            },
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn get_peers_response_with_values_round_trips() {
        let msg = Message::Response {
            txn: b"dd".to_vec(),
            response: Response::GetPeersWithValues {
                id: NodeId::random(),
                token: b"tok".to_vec(),
                values: vec![addr(1), addr(2)],
            },
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn announce_peer_query_round_trips() {
        let msg = Message::Query {
            txn: b"ee".to_vec(),
            query: Query::AnnouncePeer {
                id: NodeId::random(),
                info_hash: InfoHash::from_bytes([7u8; 20]),
                port: 6881,
                token: b"tok".to_vec(),
                implied_port: true,
            },
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn error_message_round_trips() {
        let msg = Message::Error {
            txn: b"ff".to_vec(),
            error: RemoteError {
                code: 201,
                message: "Generic Error".to_string(),
            },
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn decoding_unknown_method_fails() {
        let mut top = BTreeMap::new();
        top.insert(b"t".to_vec(), bstr(b"gg"));
        top.insert(b"y".to_vec(), bstr(b"q"));
        top.insert(b"q".to_vec(), bstr(b"no_such_method"));
        let mut args = BTreeMap::new();
        args.insert(b"id".to_vec(), bstr(&[0u8; 20]));
        top.insert(b"a".to_vec(), BencodeValue::Dict(args));
        let bytes = encoder::encode_to_vec(&BencodeValue::Dict(top)).unwrap();
        assert!(matches!(Message::decode(&bytes), Err(KrpcError::UnknownMethod(_))));
    }

    #[test]
    fn malformed_compact_nodes_is_rejected() {
        assert!(matches!(decode_compact_nodes(&[0u8; 25]), Err(KrpcError::CompactDecode)));
    }
}
