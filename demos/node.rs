//! Interactive DHT node.
//!
//! Usage: `node [BIND_ADDR] [NODE_ID@ADDR]...`
//!
//! Starts a node bound to `BIND_ADDR` (default `0.0.0.0:0`) that bootstraps from the given nodes,
//! then reads commands from stdin.

use kadnode::{Dht, LengthError, NodeHandle, NodeId};
use std::{
    convert::TryFrom,
    env,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    str::FromStr,
    time::Instant,
};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::UdpSocket,
};

#[tokio::main]
async fn main() {
    pretty_env_logger::init();

    let mut args = env::args().skip(1);

    let addr = match args.next() {
        Some(addr) => addr.parse().unwrap(),
        None => SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(0, 0, 0, 0), 0)),
    };
    let nodes: Vec<NodeHandle> = args
        .map(|arg| parse_node(&arg).unwrap_or_else(|_| panic!("invalid node: {}", arg)))
        .collect();

    let socket = UdpSocket::bind(addr).await.unwrap();

    println!("bootstrapping from {} nodes...", nodes.len());
    let start = Instant::now();

    let dht = Dht::builder().add_nodes(nodes).start(socket).await.unwrap();

    let elapsed = start.elapsed();
    println!(
        "bootstrap completed in {}.{:03} seconds",
        elapsed.as_secs(),
        elapsed.subsec_millis()
    );
    println!("this node: {:x}@{}", dht.node_id(), dht.local_addr());

    let mut stdout = io::stdout();
    let mut stdin = BufReader::new(io::stdin());
    let mut line = String::new();

    loop {
        stdout.write_all(b"> ").await.unwrap();
        stdout.flush().await.unwrap();

        line.clear();

        if stdin.read_line(&mut line).await.unwrap() > 0 {
            if !handle_command(&dht, &line).await {
                break;
            }
        } else {
            break;
        }
    }
}

async fn handle_command(dht: &Dht, command: &str) -> bool {
    match command.parse() {
        Ok(Command::Help) => {
            println!("    h                 shows this help message");
            println!("    g <KEY>           get the value stored under the key");
            println!("    s <KEY> <VALUE>   store the value under the key");
            println!("    f <NODE_ID>       find the nodes closest to the id");
            println!("    c                 list the contacts in the routing table");
            println!("    q                 quit");
            println!();
            println!("    KEY and NODE_ID are 40 hex digits, or '#' followed by text to hash");
        }
        Ok(Command::Get(key)) => {
            let start = Instant::now();

            match dht.get(key).await {
                Some(value) => println!("found: {}", String::from_utf8_lossy(&value)),
                None => println!("not found"),
            }

            print_elapsed(start);
        }
        Ok(Command::Set(key, value)) => {
            dht.set(key, value.into_bytes()).await;
            println!("stored under {:x}", key);
        }
        Ok(Command::FindNode(target)) => {
            let start = Instant::now();

            for node in dht.lookup_node(target).await {
                println!("{:x}@{}", node.id, node.addr);
            }

            print_elapsed(start);
        }
        Ok(Command::Contacts) => {
            for node in dht.contacts() {
                println!("{:x}@{}", node.id, node.addr);
            }
        }
        Ok(Command::Quit) => return false,
        Err(_) => println!("invalid command (use 'h' for help)"),
    }

    true
}

fn print_elapsed(start: Instant) {
    let elapsed = start.elapsed();
    println!(
        "completed in {}.{:03} seconds",
        elapsed.as_secs(),
        elapsed.subsec_millis()
    );
}

enum Command {
    Help,
    Get(NodeId),
    Set(NodeId, String),
    FindNode(NodeId),
    Contacts,
    Quit,
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (command, rest) = s.split_at(s.chars().next().map_or(0, char::len_utf8));
        let rest = rest.trim();

        match command {
            "h" | "?" => Ok(Self::Help),
            "g" => Ok(Self::Get(parse_id(rest)?)),
            "s" => {
                let (key, value) = rest.split_once(' ').ok_or(ParseError)?;
                Ok(Self::Set(parse_id(key)?, value.trim().to_owned()))
            }
            "f" => Ok(Self::FindNode(parse_id(rest)?)),
            "c" => Ok(Self::Contacts),
            "q" => Ok(Self::Quit),
            _ => Err(ParseError),
        }
    }
}

#[derive(Debug)]
struct ParseError;

impl From<hex::FromHexError> for ParseError {
    fn from(_: hex::FromHexError) -> Self {
        ParseError
    }
}

impl From<LengthError> for ParseError {
    fn from(_: LengthError) -> Self {
        ParseError
    }
}

impl From<std::net::AddrParseError> for ParseError {
    fn from(_: std::net::AddrParseError) -> Self {
        ParseError
    }
}

fn parse_id(s: &str) -> Result<NodeId, ParseError> {
    if let Some(text) = s.strip_prefix('#') {
        Ok(NodeId::sha1(text.trim().as_bytes()))
    } else {
        Ok(NodeId::try_from(hex::decode(s)?.as_slice())?)
    }
}

fn parse_node(s: &str) -> Result<NodeHandle, ParseError> {
    let (id, addr) = s.split_once('@').ok_or(ParseError)?;
    Ok(NodeHandle::new(parse_id(id)?, addr.parse()?))
}
