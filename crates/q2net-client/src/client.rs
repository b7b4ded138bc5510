// client.rs — client state shared by the parser, the entity merge and prediction

use q2net_common::q_shared::{
    EntityState, PlayerState, Vec3, MAX_CONFIGSTRINGS, MAX_EDICTS, MAX_ITEMS,
};

use crate::cl_ring::{CommandBuffer, EntityRing, FrameHistory, PredictionHistory};
use crate::cl_smooth::PredictionError;

// ============================================================
// Frames
// ============================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub valid: bool,               // cleared if delta parsing was invalid
    pub serverframe: i32,
    pub servertime: i32,           // server time the message is valid for (in msec)
    pub deltaframe: i32,
    pub areabits: Vec<u8>,         // portalarea visibility bits
    pub playerstate: PlayerState,
    pub num_entities: usize,
    pub parse_entities: usize,     // non-masked index into the entity ring
}

// ============================================================
// Client entities
// ============================================================

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CEntity {
    pub baseline: EntityState,     // delta from this if not from a previous frame
    pub current: EntityState,
    pub prev: EntityState,         // will always be valid, but might just be a copy of current
    pub serverframe: i32,          // if not current, this ent isn't in the frame
    pub trailcount: i32,           // for diminishing grenade trails
    pub lerp_origin: Vec3,         // for trails (variable hz)
}

// ============================================================
// Level state, wiped completely at every server map change
// ============================================================

#[derive(Debug)]
pub struct ClientState {
    pub frame: Frame,              // received from server
    pub frames: FrameHistory,
    pub ring: EntityRing,
    pub entities: Vec<CEntity>,

    pub cmds: CommandBuffer,       // each message will send several old cmds
    pub predicted_origins: PredictionHistory, // for debug comparing against server

    pub predicted_step: f32,       // for stair up smoothing
    pub predicted_step_time: i32,

    pub predicted_origin: Vec3,    // generated by predict_movement
    pub predicted_angles: Vec3,
    pub prediction_error: PredictionError,

    pub surpresscount: i32,        // number of messages rate supressed
    pub time: i32,                 // this is the time value that the client
                                   // is rendering at. always <= cls.realtime
    pub viewangles: Vec3,          // from input, added to delta_angles

    pub layout: String,            // general 2D overlay
    pub inventory: [i32; MAX_ITEMS],

    // server state information
    pub attractloop: bool,         // running the attract loop, any key will menu
    pub servercount: i32,          // server identification for prespawns
    pub gamedir: String,
    pub playernum: i32,

    pub configstrings: Vec<String>,
}

impl ClientState {
    pub fn new() -> Self {
        Self {
            frame: Frame::default(),
            frames: FrameHistory::new(),
            ring: EntityRing::new(),
            entities: vec![CEntity::default(); MAX_EDICTS],
            cmds: CommandBuffer::new(),
            predicted_origins: PredictionHistory::new(),
            predicted_step: 0.0,
            predicted_step_time: 0,
            predicted_origin: [0.0; 3],
            predicted_angles: [0.0; 3],
            prediction_error: PredictionError::default(),
            surpresscount: 0,
            time: 0,
            viewangles: [0.0; 3],
            layout: String::new(),
            inventory: [0; MAX_ITEMS],
            attractloop: false,
            servercount: 0,
            gamedir: String::new(),
            playernum: 0,
            configstrings: vec![String::new(); MAX_CONFIGSTRINGS],
        }
    }

    /// Wipes all level state, baselines included. The channel sequence
    /// numbers survive since they belong to the connection, not the level.
    pub fn clear(&mut self) {
        let netchan = self.cmds.netchan();
        *self = Self::new();
        self.cmds.resume(netchan);
    }

    /// Entity states of `frame`, in ascending entity number.
    pub fn frame_entities<'a>(&'a self, frame: &Frame) -> impl Iterator<Item = &'a EntityState> + 'a {
        let start = frame.parse_entities;
        (start..start + frame.num_entities).map(move |i| self.ring.get(i))
    }
}

impl Default for ClientState {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================
// Connection state
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(i32)]
pub enum ConnState {
    #[default]
    Uninitialized = 0,
    Disconnected = 1,  // not talking to a server
    Connecting = 2,    // sending request packets to the server
    Connected = 3,     // channel established, waiting for svc_serverdata
    Active = 4,        // game views should be displayed
}

impl ConnState {
    pub fn can_transition(self, to: ConnState) -> bool {
        use ConnState::*;
        matches!(
            (self, to),
            (Uninitialized, Disconnected)
                | (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connected, Active)
                // serverdata on a level change
                | (Connected, Connected)
                | (Active, Connected)
                // reconnect
                | (Connected, Connecting)
                | (Active, Connecting)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Active, Disconnected)
        )
    }

    /// Moves to `to` if the step is allowed. Returns whether it happened.
    pub fn transition(&mut self, to: ConnState) -> bool {
        if !self.can_transition(to) {
            log::debug!("refusing connection state change {:?} -> {:?}", self, to);
            return false;
        }
        log::debug!("connection state {:?} -> {:?}", self, to);
        *self = to;
        true
    }

    /// Frame, entity and player-state data is only meaningful from here on.
    pub fn accepts_frames(self) -> bool {
        self >= ConnState::Connected
    }
}

// ============================================================
// Persistent through server connections
// ============================================================

#[derive(Debug, Default)]
pub struct ClientStatic {
    pub state: ConnState,

    pub realtime: i32,             // always increasing, no clamping, etc
    pub frametime: f32,            // seconds since last frame

    pub connect_time: i32,         // for connection retransmits
    pub server_protocol: i32,      // in case we are doing some kind of version hack

    pub demoplayback: bool,

    // file transfer from server
    pub downloading: bool,
    pub downloadpercent: i32,

    /// String commands waiting for the next outgoing reliable message.
    pub reliable: Vec<String>,
}

impl ClientStatic {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conn_state_forward_path() {
        let mut state = ConnState::default();
        assert!(state.transition(ConnState::Disconnected));
        assert!(state.transition(ConnState::Connecting));
        assert!(state.transition(ConnState::Connected));
        assert!(state.transition(ConnState::Active));
        assert_eq!(state, ConnState::Active);
    }

    #[test]
    fn test_conn_state_rejects_skips_and_backsteps() {
        let mut state = ConnState::Disconnected;
        assert!(!state.transition(ConnState::Active), "cannot skip the handshake");
        assert!(!state.transition(ConnState::Connected));
        assert_eq!(state, ConnState::Disconnected);

        let mut state = ConnState::Connecting;
        assert!(!state.transition(ConnState::Active));
        assert!(!state.transition(ConnState::Uninitialized));
        assert_eq!(state, ConnState::Connecting);
    }

    #[test]
    fn test_conn_state_level_change_and_drop() {
        let mut state = ConnState::Active;
        assert!(state.transition(ConnState::Connected), "serverdata re-enters connected");
        assert!(state.transition(ConnState::Active));
        assert!(state.transition(ConnState::Connecting), "reconnect");
        assert!(state.transition(ConnState::Disconnected));
        assert!(!state.transition(ConnState::Disconnected));
    }

    #[test]
    fn test_accepts_frames() {
        assert!(!ConnState::Connecting.accepts_frames());
        assert!(ConnState::Connected.accepts_frames());
        assert!(ConnState::Active.accepts_frames());
    }

    #[test]
    fn test_clear_keeps_channel_sequence() {
        let mut cl = ClientState::new();
        cl.cmds.push(Default::default());
        cl.cmds.push(Default::default());
        cl.cmds.acknowledge(2);
        cl.entities[5].baseline.origin = [1.0, 2.0, 3.0];
        cl.configstrings[0] = "q2dm1".to_string();
        let before = cl.cmds.netchan();

        cl.clear();
        assert_eq!(cl.cmds.netchan(), before);
        assert_eq!(cl.entities[5].baseline, EntityState::default());
        assert!(cl.configstrings[0].is_empty());
    }
}
