use crate::engine::PacketHandle;
use crate::pool::PooledPacket;

/// A compressed unit read from the container, tagged with the generation its
/// container position belongs to.
#[derive(Debug)]
pub struct Packet {
    generation: u64,
    stream_index: i32,
    handle: PooledPacket,
}

impl Packet {
    pub fn new(generation: u64, stream_index: i32, handle: PooledPacket) -> Self {
        Self {
            generation,
            stream_index,
            handle,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn stream_index(&self) -> i32 {
        self.stream_index
    }

    pub fn handle(&self) -> &PacketHandle {
        self.handle.handle()
    }
}

/// What travels through a decoder's input queue.
#[derive(Debug)]
pub enum PacketCmd {
    Data(Packet),
    /// The container ran out of packets for this generation.
    Eof { generation: u64 },
}

impl PacketCmd {
    pub fn generation(&self) -> u64 {
        match self {
            PacketCmd::Data(packet) => packet.generation(),
            PacketCmd::Eof { generation } => *generation,
        }
    }
}
