use kadnode::{Dht, NodeHandle, NodeId};
use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    time::Duration,
};
use tokio::net::UdpSocket;

#[tokio::test(flavor = "multi_thread")]
async fn set_and_get_v4() {
    set_and_get(AddrFamily::V4).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn set_and_get_v6() {
    if let Err(error) = UdpSocket::bind(localhost(AddrFamily::V6)).await {
        eprintln!("skipping, IPv6 loopback unavailable: {error}");
        return;
    }

    set_and_get(AddrFamily::V6).await;
}

async fn set_and_get(addr_family: AddrFamily) {
    // Start the first node of the network, for the other nodes to bootstrap against.
    let bootstrap_node = start_node(addr_family, None).await;
    assert!(bootstrap_node.contacts().is_empty());

    let bootstrap_handle = NodeHandle::new(bootstrap_node.node_id(), bootstrap_node.local_addr());

    // Start nodes A and B
    let a_node = start_node(addr_family, Some(bootstrap_handle)).await;
    let b_node = start_node(addr_family, Some(bootstrap_handle)).await;

    assert!(a_node
        .contacts()
        .iter()
        .any(|node| node.id == bootstrap_node.node_id()));

    let key = NodeId::sha1(b"foo");

    // Nothing stored yet.
    assert_eq!(b_node.get(key).await, None);

    // A stores the value on the nodes it knows, B finds it.
    a_node.set(key, b"bar".to_vec()).await;
    assert_eq!(b_node.get(key).await, Some(b"bar".to_vec()));

    // B finds A by its id.
    let nodes = b_node.lookup_node(a_node.node_id()).await;
    assert_eq!(nodes.first().map(|node| node.id), Some(a_node.node_id()));
    assert_eq!(nodes[0].addr, a_node.local_addr());
}

#[tokio::test(flavor = "multi_thread")]
async fn start_with_unreachable_node() {
    // Bound but never answering.
    let silent = UdpSocket::bind(localhost(AddrFamily::V4)).await.unwrap();
    let silent_handle = NodeHandle::new(NodeId::sha1(b"silent"), silent.local_addr().unwrap());

    let socket = UdpSocket::bind(localhost(AddrFamily::V4)).await.unwrap();
    let node = Dht::builder()
        .add_node(silent_handle)
        .set_request_timeout(Duration::from_millis(200))
        .start(socket)
        .await
        .unwrap();

    assert!(node.contacts().is_empty());
    assert_eq!(node.get(NodeId::sha1(b"foo")).await, None);
}

async fn start_node(addr_family: AddrFamily, bootstrap: Option<NodeHandle>) -> Dht {
    let socket = UdpSocket::bind(localhost(addr_family)).await.unwrap();

    Dht::builder()
        .add_nodes(bootstrap)
        .set_request_timeout(Duration::from_millis(500))
        .start(socket)
        .await
        .unwrap()
}

#[derive(Copy, Clone)]
enum AddrFamily {
    V4,
    V6,
}

fn localhost(family: AddrFamily) -> SocketAddr {
    match family {
        AddrFamily::V4 => (Ipv4Addr::LOCALHOST, 0).into(),
        AddrFamily::V6 => (Ipv6Addr::LOCALHOST, 0).into(),
    }
}
