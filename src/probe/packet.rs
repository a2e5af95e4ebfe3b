//! Builders for the packets the raw prober puts on the wire.
//!
//! Raw transport channels are opened at layer 4, so the kernel writes the
//! IPv4 header; we only build the ICMP message or TCP segment, with a valid
//! checksum.
use std::net::Ipv4Addr;

use anyhow::Context;
use pnet::packet::icmp::echo_reply::EchoReplyPacket;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{self, IcmpCode, IcmpPacket, IcmpTypes};
use pnet::packet::tcp::{self as tcp, MutableTcpPacket, TcpFlags, TcpPacket};
use pnet::packet::Packet;

/// ICMP echo header (8 bytes) plus a small payload.
pub const ECHO_REQUEST_LEN: usize = 16;
/// TCP header without options.
pub const TCP_HEADER_LEN: usize = 20;

const ECHO_PAYLOAD: &[u8; ECHO_REQUEST_LEN - 8] = b"sweepscn";
const TCP_WINDOW: u16 = 64_240;

/// An ICMP echo request carrying `identifier` and `sequence`.
pub fn build_echo_request(identifier: u16, sequence: u16) -> anyhow::Result<Vec<u8>> {
    let mut buffer = vec![0u8; ECHO_REQUEST_LEN];
    {
        let mut echo = MutableEchoRequestPacket::new(&mut buffer)
            .context("buffer too small for an ICMP echo request")?;
        echo.set_icmp_type(IcmpTypes::EchoRequest);
        echo.set_icmp_code(IcmpCode::new(0));
        echo.set_identifier(identifier);
        echo.set_sequence_number(sequence);
        echo.set_payload(ECHO_PAYLOAD);

        echo.set_checksum(0);
        let as_icmp = IcmpPacket::new(echo.packet()).context("creating ICMP packet")?;
        let checksum = icmp::checksum(&as_icmp);
        echo.set_checksum(checksum);
    }
    Ok(buffer)
}

/// Whether an ICMP message from the target answers our echo request.
///
/// Echo replies must carry our identifier. Echo requests are never answers
/// (on loopback we see our own). Any other ICMP message the target sends
/// back still proves it is there.
pub fn answers_echo(message: &IcmpPacket, identifier: u16) -> bool {
    let kind = message.get_icmp_type();
    if kind == IcmpTypes::EchoReply {
        EchoReplyPacket::new(message.packet())
            .is_some_and(|reply| reply.get_identifier() == identifier)
    } else {
        kind != IcmpTypes::EchoRequest
    }
}

/// Addressing shared by every segment of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpEndpoints {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub source_port: u16,
    pub destination_port: u16,
}

/// A bare TCP segment with the given flags and a checksum over the pseudo header.
pub fn build_tcp_segment(
    endpoints: TcpEndpoints,
    sequence: u32,
    acknowledgement: u32,
    flags: u8,
) -> anyhow::Result<Vec<u8>> {
    let mut buffer = vec![0u8; TCP_HEADER_LEN];
    {
        let mut segment =
            MutableTcpPacket::new(&mut buffer).context("buffer too small for a TCP header")?;
        segment.set_source(endpoints.source_port);
        segment.set_destination(endpoints.destination_port);
        segment.set_sequence(sequence);
        segment.set_acknowledgement(acknowledgement);
        segment.set_data_offset(5);
        segment.set_flags(flags);
        segment.set_window(TCP_WINDOW);
        segment.set_urgent_ptr(0);

        let checksum = tcp::ipv4_checksum(
            &segment.to_immutable(),
            &endpoints.source,
            &endpoints.destination,
        );
        segment.set_checksum(checksum);
    }
    Ok(buffer)
}

/// The opening segment of a half-open scan.
pub fn build_syn(endpoints: TcpEndpoints, sequence: u32) -> anyhow::Result<Vec<u8>> {
    build_tcp_segment(endpoints, sequence, 0, TcpFlags::SYN)
}

/// Tears down a half-open connection after a SYN+ACK.
///
/// `sequence` must be the acknowledgement number the target sent us.
pub fn build_rst(endpoints: TcpEndpoints, sequence: u32) -> anyhow::Result<Vec<u8>> {
    build_tcp_segment(endpoints, sequence, 0, TcpFlags::RST)
}

/// The RST that tears down the half-open connection a SYN+ACK `reply`
/// opened. `local` is our address and `peer` the one that answered.
///
/// Ports are the reply's, swapped; the sequence number is the reply's
/// acknowledgement number.
pub fn build_reset_for(
    reply: &TcpPacket,
    local: Ipv4Addr,
    peer: Ipv4Addr,
) -> anyhow::Result<Vec<u8>> {
    let endpoints = TcpEndpoints {
        source: local,
        destination: peer,
        source_port: reply.get_destination(),
        destination_port: reply.get_source(),
    };
    build_rst(endpoints, reply.get_acknowledgement())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pnet::packet::icmp::echo_request::EchoRequestPacket;
    use pnet::packet::icmp::MutableIcmpPacket;

    fn endpoints() -> TcpEndpoints {
        TcpEndpoints {
            source: Ipv4Addr::new(192, 168, 0, 10),
            destination: Ipv4Addr::new(192, 168, 0, 1),
            source_port: 51_234,
            destination_port: 22,
        }
    }

    #[test]
    fn echo_request_is_checksummed() {
        let bytes = build_echo_request(0xbeef, 1).unwrap();
        let echo = EchoRequestPacket::new(&bytes).unwrap();

        assert_eq!(echo.get_icmp_type(), IcmpTypes::EchoRequest);
        assert_eq!(echo.get_identifier(), 0xbeef);
        assert_eq!(echo.get_sequence_number(), 1);
        assert_eq!(echo.payload(), ECHO_PAYLOAD);

        let message = IcmpPacket::new(&bytes).unwrap();
        assert_eq!(message.get_checksum(), icmp::checksum(&message));
    }

    #[test]
    fn echo_reply_must_match_identifier() {
        let mut bytes = build_echo_request(7, 1).unwrap();
        {
            let mut message = MutableIcmpPacket::new(&mut bytes).unwrap();
            message.set_icmp_type(IcmpTypes::EchoReply);
        }
        let reply = IcmpPacket::new(&bytes).unwrap();

        assert!(answers_echo(&reply, 7));
        assert!(!answers_echo(&reply, 8));
    }

    #[test]
    fn own_echo_request_is_not_an_answer() {
        let bytes = build_echo_request(7, 1).unwrap();
        let request = IcmpPacket::new(&bytes).unwrap();
        assert!(!answers_echo(&request, 7));
    }

    #[test]
    fn other_icmp_from_target_counts() {
        let mut bytes = build_echo_request(7, 1).unwrap();
        {
            let mut message = MutableIcmpPacket::new(&mut bytes).unwrap();
            message.set_icmp_type(IcmpTypes::DestinationUnreachable);
        }
        let unreachable = IcmpPacket::new(&bytes).unwrap();
        assert!(answers_echo(&unreachable, 1234));
    }

    #[test]
    fn syn_segment_fields_and_checksum() {
        let ends = endpoints();
        let bytes = build_syn(ends, 0x1234_5678).unwrap();
        let segment = TcpPacket::new(&bytes).unwrap();

        assert_eq!(segment.get_source(), 51_234);
        assert_eq!(segment.get_destination(), 22);
        assert_eq!(segment.get_sequence(), 0x1234_5678);
        assert_eq!(segment.get_flags(), TcpFlags::SYN);
        assert_eq!(segment.get_data_offset(), 5);
        assert_eq!(
            segment.get_checksum(),
            tcp::ipv4_checksum(&segment, &ends.source, &ends.destination)
        );
    }

    #[test]
    fn reset_answers_the_syn_ack() {
        let ours = endpoints();
        let theirs = TcpEndpoints {
            source: ours.destination,
            destination: ours.source,
            source_port: ours.destination_port,
            destination_port: ours.source_port,
        };
        let syn_ack = build_tcp_segment(
            theirs,
            0x0bad_cafe,
            0x1234_5679,
            TcpFlags::SYN | TcpFlags::ACK,
        )
        .unwrap();
        let reply = TcpPacket::new(&syn_ack).unwrap();

        let bytes = build_reset_for(&reply, ours.source, ours.destination).unwrap();
        let reset = TcpPacket::new(&bytes).unwrap();

        assert_eq!(reset.get_flags(), TcpFlags::RST);
        assert_eq!(reset.get_sequence(), 0x1234_5679);
        assert_eq!(reset.get_source(), 51_234);
        assert_eq!(reset.get_destination(), 22);
        assert_eq!(
            reset.get_checksum(),
            tcp::ipv4_checksum(&reset, &ours.source, &ours.destination)
        );
    }

    #[test]
    fn rst_carries_given_sequence() {
        let bytes = build_rst(endpoints(), 42).unwrap();
        let segment = TcpPacket::new(&bytes).unwrap();

        assert_eq!(segment.get_flags(), TcpFlags::RST);
        assert_eq!(segment.get_sequence(), 42);
        assert_eq!(segment.get_acknowledgement(), 0);
    }
}
