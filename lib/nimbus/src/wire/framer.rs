use crate::wire::support::{Message, WireError};
use std::marker::PhantomData;
use tempo::Buffer;

/// What a framer yields: a typed control message, or a chunk of opaque bulk
/// payload while the stream direction is in data-mode.
#[derive(Debug, Eq, PartialEq)]
pub enum Inbound<M> {
    Msg(M),
    Data(Vec<u8>),
}

/// Incremental parser for one direction of one connection.
///
/// The stream alternates between typed mode, where bytes are framed messages
/// of protocol `M`, and data-mode, entered after a message that announces
/// trailing bulk bytes (`Message::bulk_len`). In data-mode exactly that many
/// bytes are yielded as opaque chunks, never parsed, then the direction
/// reverts to typed mode. The mode is per-direction state: the reverse
/// direction of the same connection keeps its own framer and stays typed.
pub struct Framer<M> {
    buf: Buffer,
    remaining: usize,
    _marker: PhantomData<M>,
}

impl<M: Message> Framer<M> {
    pub fn new() -> Framer<M> {
        Framer {
            buf: Buffer::new(),
            remaining: 0,
            _marker: PhantomData,
        }
    }

    /// Appends freshly received stream bytes.
    #[inline]
    pub fn ingest(&mut self, bytes: &[u8]) {
        self.buf.extend(bytes);
    }

    /// Drains everything currently readable on `conn` into the framer.
    pub fn fill(&mut self, kernel: &mut tempo::Kernel, conn: tempo::ConnId) {
        let mut scratch = [0u8; 2048];
        loop {
            let count = kernel.recv(conn, &mut scratch);
            if count == 0 {
                break;
            }
            self.buf.extend(&scratch[..count]);
        }
    }

    #[inline]
    pub fn in_data_mode(&self) -> bool {
        self.remaining > 0
    }

    /// Bulk bytes still owed to the current data-mode window.
    #[inline]
    pub fn data_remaining(&self) -> usize {
        self.remaining
    }

    /// Yields the next message or data chunk. `WireError::Wait` means more
    /// bytes are needed; call again after the next `ingest`.
    pub fn pull(&mut self) -> Result<Inbound<M>, WireError> {
        if self.remaining > 0 {
            if self.buf.is_empty() {
                return Err(WireError::Wait);
            }

            let count = usize::min(self.remaining, self.buf.len());
            let chunk = self.buf.read_slice()[..count].to_vec();
            self.buf.consume(count);
            self.remaining -= count;

            return Ok(Inbound::Data(chunk));
        }

        if self.buf.is_empty() {
            return Err(WireError::Wait);
        }

        let (msg, consumed) = M::decode(self.buf.read_slice())?;
        self.buf.consume(consumed);
        self.remaining = msg.bulk_len();

        Ok(Inbound::Msg(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::pipeline::{PacketHeader, PipeMsg};

    fn header(packet_id: u32, packet_size: u32, last_packet: bool) -> PipeMsg {
        PipeMsg::DataPacket(PacketHeader {
            block_id: 1,
            packet_id,
            segment_id: 1,
            last_segment: true,
            last_packet,
            packet_size,
        })
    }

    #[test]
    fn test_typed_then_data_then_typed() {
        let mut framer = Framer::<PipeMsg>::new();

        let mut stream = header(1, 5, false).to_bytes();
        stream.extend_from_slice(&[10, 20, 30, 40, 50]);
        stream.extend_from_slice(
            &PipeMsg::PacketComplete {
                result: 0,
                block_id: 1,
                packet_id: 1,
                last_packet: false,
                packet_size: 5,
            }
            .to_bytes(),
        );

        framer.ingest(&stream);

        match framer.pull().unwrap() {
            Inbound::Msg(PipeMsg::DataPacket(h)) => assert_eq!(h.packet_size, 5),
            other => panic!("Unexpected {:?}", other),
        }
        assert!(framer.in_data_mode());

        match framer.pull().unwrap() {
            Inbound::Data(chunk) => assert_eq!(chunk, vec![10, 20, 30, 40, 50]),
            other => panic!("Unexpected {:?}", other),
        }
        assert!(!framer.in_data_mode());

        match framer.pull().unwrap() {
            Inbound::Msg(PipeMsg::PacketComplete { packet_id, .. }) => assert_eq!(packet_id, 1),
            other => panic!("Unexpected {:?}", other),
        }
        assert_eq!(framer.pull(), Err(WireError::Wait));
    }

    #[test]
    fn test_data_mode_survives_fragmentation() {
        let mut framer = Framer::<PipeMsg>::new();
        let payload: Vec<u8> = (0..200u8).collect();

        let mut stream = header(1, payload.len() as u32, true).to_bytes();
        stream.extend_from_slice(&payload);

        // Feed the stream one byte at a time; the header must come out once,
        // followed by data chunks totalling exactly the payload.
        let mut seen_header = false;
        let mut collected = Vec::new();

        for byte in stream {
            framer.ingest(&[byte]);
            loop {
                match framer.pull() {
                    Ok(Inbound::Msg(PipeMsg::DataPacket(_))) => {
                        assert!(!seen_header);
                        seen_header = true;
                    }
                    Ok(Inbound::Msg(other)) => panic!("Unexpected {:?}", other),
                    Ok(Inbound::Data(chunk)) => collected.extend(chunk),
                    Err(WireError::Wait) => break,
                    Err(err) => panic!("Unexpected {:?}", err),
                }
            }
        }

        assert!(seen_header);
        assert_eq!(collected, payload);
        assert!(!framer.in_data_mode());
    }

    #[test]
    fn test_payload_bytes_never_parsed_as_messages() {
        let mut framer = Framer::<PipeMsg>::new();

        // Payload crafted to look like a PACKET_COMPLETE if misparsed.
        let decoy = PipeMsg::PacketComplete {
            result: 0,
            block_id: 9,
            packet_id: 9,
            last_packet: true,
            packet_size: 9,
        }
        .to_bytes();

        let mut stream = header(1, decoy.len() as u32, false).to_bytes();
        stream.extend_from_slice(&decoy);
        framer.ingest(&stream);

        assert!(matches!(
            framer.pull().unwrap(),
            Inbound::Msg(PipeMsg::DataPacket(_))
        ));
        match framer.pull().unwrap() {
            Inbound::Data(chunk) => assert_eq!(chunk, decoy),
            other => panic!("Payload leaked into typed mode: {:?}", other),
        }
    }

    #[test]
    fn test_back_to_back_packets() {
        let mut framer = Framer::<PipeMsg>::new();

        let mut stream = Vec::new();
        for id in 1..=3u32 {
            stream.extend_from_slice(&header(id, 4, id == 3).to_bytes());
            stream.extend_from_slice(&[id as u8; 4]);
        }
        framer.ingest(&stream);

        for id in 1..=3u32 {
            match framer.pull().unwrap() {
                Inbound::Msg(PipeMsg::DataPacket(h)) => assert_eq!(h.packet_id, id),
                other => panic!("Unexpected {:?}", other),
            }
            match framer.pull().unwrap() {
                Inbound::Data(chunk) => assert_eq!(chunk, vec![id as u8; 4]),
                other => panic!("Unexpected {:?}", other),
            }
        }
        assert_eq!(framer.pull(), Err(WireError::Wait));
    }
}
