use crate::wire::support::{put_pipeline, put_string, Message, Reader, WireError};
use byteorder::{BigEndian, WriteBytesExt};
use std::io::{self, Write};

// Worker-facing protocol type codes.
const WORKER_REGISTER_REQ: u32 = 0;
const WORKER_REGISTER_REP: u32 = 1;

// Client-facing protocol type codes.
const FILE_CREATE_REQ: u32 = 0;
const FILE_CREATE_REP: u32 = 1;
const BLOCK_ADD_REQ: u32 = 2;
const BLOCK_ADD_REP: u32 = 3;
const BLOCK_COMPLETE: u32 = 4;

/// Coordinator <-> worker control messages.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ClusterMsg {
    /// A worker announcing itself: fat-tree location plus the IP it listens
    /// on for pipeline traffic.
    RegisterReq {
        pod: u32,
        rack: u32,
        host: u32,
        ip: u32,
    },
    RegisterRep {
        result: u32,
    },
}

impl Message for ClusterMsg {
    fn encode<W: Write>(&self, stream: &mut W) -> io::Result<()> {
        match self {
            ClusterMsg::RegisterReq {
                pod,
                rack,
                host,
                ip,
            } => {
                stream.write_u32::<BigEndian>(WORKER_REGISTER_REQ)?;
                stream.write_u32::<BigEndian>(*pod)?;
                stream.write_u32::<BigEndian>(*rack)?;
                stream.write_u32::<BigEndian>(*host)?;
                stream.write_u32::<BigEndian>(*ip)?;
            }
            ClusterMsg::RegisterRep { result } => {
                stream.write_u32::<BigEndian>(WORKER_REGISTER_REP)?;
                stream.write_u32::<BigEndian>(*result)?;
            }
        }
        Ok(())
    }

    fn decode(buf: &[u8]) -> Result<(ClusterMsg, usize), WireError> {
        let mut reader = Reader::new(buf);

        let msg = match reader.u32()? {
            WORKER_REGISTER_REQ => ClusterMsg::RegisterReq {
                pod: reader.u32()?,
                rack: reader.u32()?,
                host: reader.u32()?,
                ip: reader.u32()?,
            },
            WORKER_REGISTER_REP => ClusterMsg::RegisterRep {
                result: reader.u32()?,
            },
            other => return Err(WireError::UnknownType(other)),
        };

        Ok((msg, reader.consumed()))
    }
}

/// Coordinator <-> client namespace messages.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum NameMsg {
    FileCreateReq {
        name: String,
    },
    FileCreateRep {
        result: u32,
        file_id: u32,
        name: String,
    },
    BlockAddReq {
        file_id: u32,
    },
    /// Carries the minted block id, the size the client must write, and the
    /// ordered replica pipeline.
    BlockAddRep {
        result: u32,
        file_id: u32,
        block_id: u32,
        block_size: u32,
        pipeline: Vec<u32>,
    },
    BlockComplete {
        result: u32,
        block_id: u32,
    },
}

impl Message for NameMsg {
    fn encode<W: Write>(&self, stream: &mut W) -> io::Result<()> {
        match self {
            NameMsg::FileCreateReq { name } => {
                stream.write_u32::<BigEndian>(FILE_CREATE_REQ)?;
                put_string(stream, name)?;
            }
            NameMsg::FileCreateRep {
                result,
                file_id,
                name,
            } => {
                stream.write_u32::<BigEndian>(FILE_CREATE_REP)?;
                stream.write_u32::<BigEndian>(*result)?;
                stream.write_u32::<BigEndian>(*file_id)?;
                put_string(stream, name)?;
            }
            NameMsg::BlockAddReq { file_id } => {
                stream.write_u32::<BigEndian>(BLOCK_ADD_REQ)?;
                stream.write_u32::<BigEndian>(*file_id)?;
            }
            NameMsg::BlockAddRep {
                result,
                file_id,
                block_id,
                block_size,
                pipeline,
            } => {
                stream.write_u32::<BigEndian>(BLOCK_ADD_REP)?;
                stream.write_u32::<BigEndian>(*result)?;
                stream.write_u32::<BigEndian>(*file_id)?;
                stream.write_u32::<BigEndian>(*block_id)?;
                stream.write_u32::<BigEndian>(*block_size)?;
                put_pipeline(stream, pipeline)?;
            }
            NameMsg::BlockComplete { result, block_id } => {
                stream.write_u32::<BigEndian>(BLOCK_COMPLETE)?;
                stream.write_u32::<BigEndian>(*result)?;
                stream.write_u32::<BigEndian>(*block_id)?;
            }
        }
        Ok(())
    }

    fn decode(buf: &[u8]) -> Result<(NameMsg, usize), WireError> {
        let mut reader = Reader::new(buf);

        let msg = match reader.u32()? {
            FILE_CREATE_REQ => NameMsg::FileCreateReq {
                name: reader.string()?,
            },
            FILE_CREATE_REP => NameMsg::FileCreateRep {
                result: reader.u32()?,
                file_id: reader.u32()?,
                name: reader.string()?,
            },
            BLOCK_ADD_REQ => NameMsg::BlockAddReq {
                file_id: reader.u32()?,
            },
            BLOCK_ADD_REP => NameMsg::BlockAddRep {
                result: reader.u32()?,
                file_id: reader.u32()?,
                block_id: reader.u32()?,
                block_size: reader.u32()?,
                pipeline: reader.pipeline()?,
            },
            BLOCK_COMPLETE => NameMsg::BlockComplete {
                result: reader.u32()?,
                block_id: reader.u32()?,
            },
            other => return Err(WireError::UnknownType(other)),
        };

        Ok((msg, reader.consumed()))
    }
}
