use crate::wire::support::{put_flag, put_pipeline, Message, Reader, WireError};
use byteorder::{BigEndian, WriteBytesExt};
use std::io::{self, Write};

const PIPELINE_CREATE_REQ: u32 = 0;
const PIPELINE_CREATE_REP: u32 = 1;
const DATA_PACKET: u32 = 2;
const PACKET_ACK: u32 = 4;
const PACKET_COMPLETE: u32 = 5;

/// Header of one bulk-data packet. Exactly `packet_size` opaque payload
/// bytes follow this header on the same stream; the segment fields exist for
/// sub-packet segmentation and are fixed at one segment per packet here.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PacketHeader {
    pub block_id: u32,
    pub packet_id: u32,
    pub segment_id: u32,
    pub last_segment: bool,
    pub last_packet: bool,
    pub packet_size: u32,
}

/// Client <-> worker <-> worker pipeline protocol.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PipeMsg {
    /// Sent by the client to the head and relayed hop by hop; every worker
    /// locates itself in the carried pipeline vector.
    PipelineCreateReq { block_id: u32, pipeline: Vec<u32> },
    /// Emitted by the tail and relayed backward once the whole pipeline
    /// stands.
    PipelineCreateRep { result: u32, block_id: u32 },
    DataPacket(PacketHeader),
    /// Sent backward by the tail on header receipt.
    PacketAck {
        result: u32,
        block_id: u32,
        packet_id: u32,
        last_packet: bool,
        packet_size: u32,
    },
    /// Sent backward by the tail once the packet's payload has fully
    /// drained through it.
    PacketComplete {
        result: u32,
        block_id: u32,
        packet_id: u32,
        last_packet: bool,
        packet_size: u32,
    },
}

impl Message for PipeMsg {
    fn encode<W: Write>(&self, stream: &mut W) -> io::Result<()> {
        match self {
            PipeMsg::PipelineCreateReq { block_id, pipeline } => {
                stream.write_u32::<BigEndian>(PIPELINE_CREATE_REQ)?;
                stream.write_u32::<BigEndian>(*block_id)?;
                put_pipeline(stream, pipeline)?;
            }
            PipeMsg::PipelineCreateRep { result, block_id } => {
                stream.write_u32::<BigEndian>(PIPELINE_CREATE_REP)?;
                stream.write_u32::<BigEndian>(*result)?;
                stream.write_u32::<BigEndian>(*block_id)?;
            }
            PipeMsg::DataPacket(header) => {
                stream.write_u32::<BigEndian>(DATA_PACKET)?;
                stream.write_u32::<BigEndian>(header.block_id)?;
                stream.write_u32::<BigEndian>(header.packet_id)?;
                stream.write_u32::<BigEndian>(header.segment_id)?;
                put_flag(stream, header.last_segment)?;
                put_flag(stream, header.last_packet)?;
                stream.write_u32::<BigEndian>(header.packet_size)?;
            }
            PipeMsg::PacketAck {
                result,
                block_id,
                packet_id,
                last_packet,
                packet_size,
            } => {
                stream.write_u32::<BigEndian>(PACKET_ACK)?;
                stream.write_u32::<BigEndian>(*result)?;
                stream.write_u32::<BigEndian>(*block_id)?;
                stream.write_u32::<BigEndian>(*packet_id)?;
                put_flag(stream, *last_packet)?;
                stream.write_u32::<BigEndian>(*packet_size)?;
            }
            PipeMsg::PacketComplete {
                result,
                block_id,
                packet_id,
                last_packet,
                packet_size,
            } => {
                stream.write_u32::<BigEndian>(PACKET_COMPLETE)?;
                stream.write_u32::<BigEndian>(*result)?;
                stream.write_u32::<BigEndian>(*block_id)?;
                stream.write_u32::<BigEndian>(*packet_id)?;
                put_flag(stream, *last_packet)?;
                stream.write_u32::<BigEndian>(*packet_size)?;
            }
        }
        Ok(())
    }

    fn decode(buf: &[u8]) -> Result<(PipeMsg, usize), WireError> {
        let mut reader = Reader::new(buf);

        let msg = match reader.u32()? {
            PIPELINE_CREATE_REQ => PipeMsg::PipelineCreateReq {
                block_id: reader.u32()?,
                pipeline: reader.pipeline()?,
            },
            PIPELINE_CREATE_REP => PipeMsg::PipelineCreateRep {
                result: reader.u32()?,
                block_id: reader.u32()?,
            },
            DATA_PACKET => PipeMsg::DataPacket(PacketHeader {
                block_id: reader.u32()?,
                packet_id: reader.u32()?,
                segment_id: reader.u32()?,
                last_segment: reader.flag()?,
                last_packet: reader.flag()?,
                packet_size: reader.u32()?,
            }),
            PACKET_ACK => PipeMsg::PacketAck {
                result: reader.u32()?,
                block_id: reader.u32()?,
                packet_id: reader.u32()?,
                last_packet: reader.flag()?,
                packet_size: reader.u32()?,
            },
            PACKET_COMPLETE => PipeMsg::PacketComplete {
                result: reader.u32()?,
                block_id: reader.u32()?,
                packet_id: reader.u32()?,
                last_packet: reader.flag()?,
                packet_size: reader.u32()?,
            },
            other => return Err(WireError::UnknownType(other)),
        };

        Ok((msg, reader.consumed()))
    }

    /// After a `DataPacket` header the stream carries `packet_size` opaque
    /// bytes that must never be parsed as typed messages.
    fn bulk_len(&self) -> usize {
        match self {
            PipeMsg::DataPacket(header) => header.packet_size as usize,
            _ => 0,
        }
    }
}
