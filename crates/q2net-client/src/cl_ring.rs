// cl_ring.rs — fixed-capacity history containers
//
// All of these are indexed by an ever-increasing sequence or cursor masked
// down to the capacity. Capacities are powers of two.

use q2net_common::q_shared::{EntityState, UserCmd};
use q2net_common::qcommon::{
    CMD_BACKUP, CMD_MASK, MAX_PARSE_ENTITIES, PARSE_ENTITIES_SLACK, UPDATE_BACKUP, UPDATE_MASK,
};

use crate::client::Frame;

const PARSE_ENTITIES_MASK: usize = MAX_PARSE_ENTITIES - 1;

// ============================================================
// Entity ring
// ============================================================

/// Append-only circular store of decoded entity states. Frames refer to a
/// contiguous run of it by unmasked start cursor and count.
#[derive(Debug, Clone)]
pub struct EntityRing {
    states: Box<[EntityState]>,
    write: usize,
}

impl EntityRing {
    pub fn new() -> Self {
        Self {
            states: vec![EntityState::default(); MAX_PARSE_ENTITIES].into_boxed_slice(),
            write: 0,
        }
    }

    /// Unmasked position of the next write.
    pub fn write_cursor(&self) -> usize {
        self.write
    }

    /// Appends a state and returns its unmasked index.
    pub fn push(&mut self, state: EntityState) -> usize {
        let index = self.write;
        self.states[index & PARSE_ENTITIES_MASK] = state;
        self.write += 1;
        index
    }

    pub fn get(&self, index: usize) -> &EntityState {
        &self.states[index & PARSE_ENTITIES_MASK]
    }

    /// Whether a frame starting at `start` is still safe to delta from:
    /// nothing written since could have wrapped onto its slice.
    pub fn within_window(&self, start: usize) -> bool {
        self.write.saturating_sub(start) <= MAX_PARSE_ENTITIES - PARSE_ENTITIES_SLACK
    }
}

impl Default for EntityRing {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================
// Frame history
// ============================================================

#[derive(Debug, Clone)]
pub struct FrameHistory {
    frames: Vec<Frame>,
}

impl FrameHistory {
    pub fn new() -> Self {
        Self {
            frames: vec![Frame::default(); UPDATE_BACKUP],
        }
    }

    /// Stores `frame` over whatever occupied its slot.
    pub fn store(&mut self, frame: Frame) {
        let slot = frame.serverframe as usize & UPDATE_MASK;
        self.frames[slot] = frame;
    }

    /// Raw slot for `serverframe`, which may hold an older frame.
    pub fn slot(&self, serverframe: i32) -> &Frame {
        &self.frames[serverframe as usize & UPDATE_MASK]
    }

    /// The frame for `serverframe`, if its slot has not been reused.
    pub fn get(&self, serverframe: i32) -> Option<&Frame> {
        let frame = self.slot(serverframe);
        (frame.serverframe == serverframe).then_some(frame)
    }
}

impl Default for FrameHistory {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================
// Outgoing commands
// ============================================================

/// Sequence numbers of the reliable channel as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetchanSequence {
    /// newest outgoing sequence the server has acknowledged
    pub incoming_acknowledged: i32,
    /// sequence the next outgoing packet will carry
    pub outgoing_sequence: i32,
}

impl Default for NetchanSequence {
    fn default() -> Self {
        Self {
            incoming_acknowledged: 0,
            outgoing_sequence: 1,
        }
    }
}

/// Commands sent to the server, kept until they can no longer be replayed.
#[derive(Debug, Clone)]
pub struct CommandBuffer {
    cmds: Box<[UserCmd]>,
    netchan: NetchanSequence,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self {
            cmds: vec![UserCmd::default(); CMD_BACKUP].into_boxed_slice(),
            netchan: NetchanSequence::default(),
        }
    }

    pub fn netchan(&self) -> NetchanSequence {
        self.netchan
    }

    /// Continues numbering from an earlier buffer after a level change.
    pub fn resume(&mut self, netchan: NetchanSequence) {
        self.netchan = netchan;
    }

    /// Stores `cmd` under the current outgoing sequence, then advances it.
    pub fn push(&mut self, cmd: UserCmd) -> i32 {
        let seq = self.netchan.outgoing_sequence;
        self.cmds[seq as usize & CMD_MASK] = cmd;
        self.netchan.outgoing_sequence += 1;
        seq
    }

    /// Records the server's acknowledgement. Older acks are ignored.
    pub fn acknowledge(&mut self, seq: i32) {
        if seq > self.netchan.incoming_acknowledged {
            self.netchan.incoming_acknowledged = seq.min(self.netchan.outgoing_sequence - 1);
        }
    }

    pub fn get(&self, seq: i32) -> &UserCmd {
        &self.cmds[seq as usize & CMD_MASK]
    }

    /// True when unacknowledged commands have already been overwritten.
    pub fn is_stale(&self) -> bool {
        self.netchan.outgoing_sequence - self.netchan.incoming_acknowledged >= CMD_BACKUP as i32
    }

    /// Sequences sent but not yet acknowledged, oldest first.
    pub fn unacknowledged(&self) -> std::ops::Range<i32> {
        self.netchan.incoming_acknowledged + 1..self.netchan.outgoing_sequence
    }
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================
// Predicted origins
// ============================================================

/// Origin each command was predicted to reach, in network units.
#[derive(Debug, Clone)]
pub struct PredictionHistory {
    origins: Box<[[i16; 3]]>,
}

impl PredictionHistory {
    pub fn new() -> Self {
        Self {
            origins: vec![[0; 3]; CMD_BACKUP].into_boxed_slice(),
        }
    }

    pub fn record(&mut self, seq: i32, origin: [i16; 3]) {
        self.origins[seq as usize & CMD_MASK] = origin;
    }

    pub fn get(&self, seq: i32) -> [i16; 3] {
        self.origins[seq as usize & CMD_MASK]
    }
}

impl Default for PredictionHistory {
    fn default() -> Self {
        Self::new()
    }
}
