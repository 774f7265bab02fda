//! # superblock
//!
//! why: term, vote, applied index and membership must survive a crash and
//! sit at a fixed place in front of the index records
//! relations: read and rewritten by Log; the member codec is shared with
//! Configuration entry payloads
//! what: Superblock, member-set encoding

use std::io::{Cursor, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tickraft_core::{LogIndex, NodeId, PeerConfig, Term};

use crate::error::{Result, StorageError};

/// Fixed size of the superblock at the start of the index region.
pub const SUPER_BLOCK_SIZE: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Superblock {
    pub term: Term,
    pub voted_for: Option<NodeId>,
    pub applied_index: LogIndex,
    pub peers: Vec<PeerConfig>,
}

impl Superblock {
    /// Encode into exactly [`SUPER_BLOCK_SIZE`] bytes, zero padded.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(SUPER_BLOCK_SIZE);
        buf.write_i32::<LittleEndian>(self.term)?;
        buf.write_u8(u8::from(self.voted_for.is_some()))?;
        buf.write_i32::<LittleEndian>(self.voted_for.map_or(-1, |id| id.0))?;
        buf.write_u32::<LittleEndian>(self.applied_index)?;
        write_members(&mut buf, &self.peers)?;

        if buf.len() > SUPER_BLOCK_SIZE {
            return Err(StorageError::SuperblockOverflow {
                needed: buf.len(),
                available: SUPER_BLOCK_SIZE,
            });
        }
        buf.resize(SUPER_BLOCK_SIZE, 0);
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let term = cursor.read_i32::<LittleEndian>()?;
        let has_vote = cursor.read_u8()? != 0;
        let voted = cursor.read_i32::<LittleEndian>()?;
        let applied_index = cursor.read_u32::<LittleEndian>()?;
        let peers = read_members(&mut cursor)?;
        Ok(Self {
            term,
            voted_for: has_vote.then_some(NodeId(voted)),
            applied_index,
            peers,
        })
    }
}

/// Encode a member set the way Configuration entries carry it.
pub fn encode_members(members: &[PeerConfig]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_members(&mut buf, members)?;
    Ok(buf)
}

pub fn decode_members(bytes: &[u8]) -> Result<Vec<PeerConfig>> {
    read_members(&mut Cursor::new(bytes))
}

fn write_members<W: Write>(out: &mut W, members: &[PeerConfig]) -> Result<()> {
    let count = i32::try_from(members.len())
        .map_err(|_| StorageError::Corrupt(format!("{} members do not fit", members.len())))?;
    out.write_i32::<LittleEndian>(count)?;
    for member in members {
        out.write_i32::<LittleEndian>(member.id.0)?;
        let addr = match member.addr.ip() {
            IpAddr::V4(ip) => ip.octets().to_vec(),
            IpAddr::V6(ip) => ip.octets().to_vec(),
        };
        out.write_i32::<LittleEndian>(addr.len() as i32)?;
        out.write_all(&addr)?;
        out.write_i32::<LittleEndian>(i32::from(member.addr.port()))?;
    }
    Ok(())
}

fn read_members<R: Read>(input: &mut R) -> Result<Vec<PeerConfig>> {
    let count = input.read_i32::<LittleEndian>()?;
    if count < 0 {
        return Err(StorageError::Corrupt(format!("negative member count {count}")));
    }
    let mut members = Vec::with_capacity(count.min(64) as usize);
    for _ in 0..count {
        let id = input.read_i32::<LittleEndian>()?;
        let len = input.read_i32::<LittleEndian>()?;
        let ip = match len {
            4 => {
                let mut octets = [0u8; 4];
                input.read_exact(&mut octets)?;
                IpAddr::V4(Ipv4Addr::from(octets))
            }
            16 => {
                let mut octets = [0u8; 16];
                input.read_exact(&mut octets)?;
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            other => {
                return Err(StorageError::Corrupt(format!("address length {other}")));
            }
        };
        let port = input.read_i32::<LittleEndian>()?;
        let port = u16::try_from(port)
            .map_err(|_| StorageError::Corrupt(format!("port {port} out of range")))?;
        members.push(PeerConfig::new(id, SocketAddr::new(ip, port)));
    }
    Ok(members)
}
