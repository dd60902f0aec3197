//! Server side of the SOCKS5 handshake (RFC 1928), CONNECT only.
//!
//! Generic over the stream so it runs on a plain `TcpStream` here and on
//! in-memory streams in tests.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr};

pub const SOCKS_VERSION: u8 = 5;

const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_NO_ACCEPTABLE: u8 = 0xFF;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Reply codes from RFC 1928 §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reply {
    Succeeded = 0x00,
    GeneralFailure = 0x01,
    NetworkUnreachable = 0x03,
    HostUnreachable = 0x04,
    ConnectionRefused = 0x05,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}

/// Connect target requested by a SOCKS5 client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocksTarget {
    /// Hostname, dotted IPv4, or IPv6 text form, exactly as requested.
    pub host: String,
    pub port: u16,
}

fn proto_err(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

/// Negotiate methods and read one CONNECT request.
///
/// On unsupported or malformed input the matching failure reply is written
/// before the error returns, so callers can simply drop the stream.
pub fn read_request<S: Read + Write>(stream: &mut S) -> io::Result<SocksTarget> {
    let mut greeting = [0u8; 2];
    stream.read_exact(&mut greeting)?;
    if greeting[0] != SOCKS_VERSION {
        return Err(proto_err("unsupported socks version"));
    }

    let mut methods = vec![0u8; greeting[1] as usize];
    stream.read_exact(&mut methods)?;
    if !methods.contains(&METHOD_NO_AUTH) {
        stream.write_all(&[SOCKS_VERSION, METHOD_NO_ACCEPTABLE])?;
        return Err(proto_err("client offers no acceptable auth method"));
    }
    stream.write_all(&[SOCKS_VERSION, METHOD_NO_AUTH])?;

    let mut request = [0u8; 4];
    stream.read_exact(&mut request)?;
    if request[0] != SOCKS_VERSION {
        return Err(proto_err("unsupported socks version"));
    }
    if request[1] != CMD_CONNECT {
        send_reply(stream, Reply::CommandNotSupported)?;
        return Err(proto_err("only CONNECT is supported"));
    }

    let host = match request[3] {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets)?;
            Ipv4Addr::from(octets).to_string()
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len)?;
            let mut name = vec![0u8; len[0] as usize];
            stream.read_exact(&mut name)?;
            String::from_utf8(name).map_err(|_| proto_err("domain name is not utf-8"))?
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets)?;
            Ipv6Addr::from(octets).to_string()
        }
        _ => {
            send_reply(stream, Reply::AddressTypeNotSupported)?;
            return Err(proto_err("unsupported address type"));
        }
    };

    let mut port = [0u8; 2];
    stream.read_exact(&mut port)?;

    Ok(SocksTarget {
        host,
        port: u16::from_be_bytes(port),
    })
}

/// Write a reply. The bound-address field is zeroed; clients only act on
/// the status byte.
pub fn send_reply<S: Write>(stream: &mut S, reply: Reply) -> io::Result<()> {
    let mut packet = [0u8; 10];
    packet[0] = SOCKS_VERSION;
    packet[1] = reply as u8;
    packet[3] = ATYP_IPV4;
    stream.write_all(&packet)
}
