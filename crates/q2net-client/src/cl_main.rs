// cl_main.rs -- client driver: owns the state and routes packets, commands and frames

use q2net_common::cvar::{CvarContext, CvarFlags};
use q2net_common::pmove::CollisionOracle;
use q2net_common::q_shared::{UserCmd, Vec3};

use crate::cl_parse::{parse_server_message, ClientCallbacks, ParseError};
use crate::cl_pred::predict_movement;
use crate::cl_smooth;
use crate::client::{ClientState, ClientStatic, ConnState};

/// Everything the network layer of a client keeps between packets.
#[derive(Debug)]
pub struct Client {
    pub cl: ClientState,
    pub cls: ClientStatic,
    pub cvars: CvarContext,
}

impl Client {
    pub fn new() -> Self {
        let mut cvars = CvarContext::new();
        cvars.get("cl_predict", "1", CvarFlags::empty());
        cvars.get("cl_showmiss", "0", CvarFlags::empty());
        cvars.get("cl_shownet", "0", CvarFlags::empty());
        cvars.get("paused", "0", CvarFlags::empty());
        cvars.get("cl_smoothing_ms", "100", CvarFlags::ARCHIVE);
        cvars.get("developer", "0", CvarFlags::empty());
        // mirrors the server's game directory
        cvars.get("game", "", CvarFlags::NOSET);

        let mut cls = ClientStatic::new();
        cls.state.transition(ConnState::Disconnected);

        Self {
            cl: ClientState::new(),
            cls,
            cvars,
        }
    }

    /// Starts talking to a server. Returns false if already connected.
    pub fn connect(&mut self) -> bool {
        if !self.cls.state.transition(ConnState::Connecting) {
            return false;
        }
        self.cls.demoplayback = false;
        self.cls.connect_time = -99999; // retransmit immediately
        true
    }

    /// Same as `connect`, but the packets will come from a recording.
    pub fn start_demo(&mut self) -> bool {
        if !self.cls.state.transition(ConnState::Connecting) {
            return false;
        }
        self.cls.demoplayback = true;
        true
    }

    /// Parses one server message. A fatal error drops the connection
    /// before it is handed back.
    pub fn read_packet(
        &mut self,
        data: &[u8],
        callbacks: &mut dyn ClientCallbacks,
    ) -> Result<(), ParseError> {
        let result = parse_server_message(&mut self.cl, &mut self.cls, &self.cvars, data, callbacks);
        match &result {
            Ok(()) => self.sync_game_dir(),
            Err(err) => {
                log::error!("{}", err);
                self.disconnect();
            }
        }
        result
    }

    fn sync_game_dir(&mut self) {
        if !self.cls.state.accepts_frames() || self.cvars.string("game") == self.cl.gamedir {
            return;
        }
        log::info!("game directory is now \"{}\"", self.cl.gamedir);
        self.cvars.force_set("game", &self.cl.gamedir);
    }

    /// Goes back to the disconnected state, dropping all level state.
    pub fn disconnect(&mut self) {
        if self.cls.state == ConnState::Disconnected {
            return;
        }
        self.cl.clear();
        self.cls.state.transition(ConnState::Disconnected);
        self.cls.reliable.clear();
        self.cls.downloading = false;
        self.cls.demoplayback = false;
    }

    /// Queues a movement command and returns the sequence it was sent with.
    pub fn send_cmd(&mut self, cmd: UserCmd) -> i32 {
        self.cl.cmds.push(cmd)
    }

    /// Records which outgoing sequence the server has seen.
    pub fn acknowledge(&mut self, sequence: i32) {
        self.cl.cmds.acknowledge(sequence);
    }

    /// Advances the clocks by `msec` and re-runs prediction.
    pub fn frame<O: CollisionOracle>(&mut self, msec: i32, oracle: &O) {
        let msec = msec.max(0);
        self.cls.realtime += msec;
        self.cls.frametime = msec as f32 * 0.001;
        self.cl.time = self.cl.time.wrapping_add(msec);

        if self.cvars.take_modified("cl_predict") {
            // restart from the server's position rather than a stale guess
            let origin = self.cl.frame.playerstate.pmove.origin;
            self.cl.predicted_origin = origin.map(|c| c as f32 * 0.125);
            self.cl.prediction_error.clear();
        }

        predict_movement(&mut self.cl, &self.cls, &self.cvars, oracle);
    }

    /// Where the view should be drawn from this frame.
    pub fn view_origin(&self) -> Vec3 {
        cl_smooth::view_origin(
            &self.cl.predicted_origin,
            &self.cl.prediction_error,
            self.cl.predicted_step,
            self.cl.predicted_step_time,
            self.cls.realtime,
            self.cvars.value("cl_smoothing_ms") as i32,
        )
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cl_parse::NullCallbacks;
    use q2net_common::msg::MsgWriter;
    use q2net_common::q_shared::Trace;
    use q2net_common::qcommon::{SvcOps, PROTOCOL_VERSION};

    struct OpenAir;

    impl CollisionOracle for OpenAir {
        fn trace(&self, _start: &Vec3, _mins: &Vec3, _maxs: &Vec3, end: &Vec3) -> Trace {
            Trace::clear(*end)
        }

        fn point_contents(&self, _point: &Vec3) -> i32 {
            0
        }
    }

    fn server_data(w: &mut MsgWriter) {
        server_data_in(w, "");
    }

    fn server_data_in(w: &mut MsgWriter, gamedir: &str) {
        w.write_byte(SvcOps::ServerData as i32);
        w.write_long(PROTOCOL_VERSION);
        w.write_long(1);
        w.write_byte(0);
        w.write_string(gamedir);
        w.write_short(0);
        w.write_string("q2dm1");
    }

    fn empty_frame(w: &mut MsgWriter, serverframe: i32, deltaframe: i32, origin_x: i32) {
        w.write_byte(SvcOps::Frame as i32);
        w.write_long(serverframe);
        w.write_long(deltaframe);
        w.write_byte(0);
        w.write_byte(0);
        w.write_byte(SvcOps::PlayerInfo as i32);
        w.write_short(0x0002); // origin
        w.write_short(origin_x);
        w.write_short(0);
        w.write_short(0);
        w.write_long(0);
        w.write_byte(SvcOps::PacketEntities as i32);
        w.write_short(0);
    }

    #[test]
    fn test_new_client_is_disconnected_with_defaults() {
        let client = Client::new();
        assert_eq!(client.cls.state, ConnState::Disconnected);
        assert_eq!(client.cvars.value("cl_predict"), 1.0);
        assert_eq!(client.cvars.value("cl_smoothing_ms"), 100.0);
        assert_eq!(client.cvars.value("paused"), 0.0);
    }

    #[test]
    fn test_session_reaches_active() {
        let mut client = Client::new();
        assert!(client.start_demo());
        assert!(client.cls.demoplayback);

        let mut w = MsgWriter::new();
        server_data(&mut w);
        empty_frame(&mut w, 1, -1, 80);
        client.read_packet(w.as_slice(), &mut NullCallbacks).unwrap();

        assert_eq!(client.cls.state, ConnState::Active);
        assert!(client.cl.frame.valid);
        assert_eq!(client.cl.frame.playerstate.pmove.origin[0], 80);
    }

    #[test]
    fn test_connect_only_from_disconnected() {
        let mut client = Client::new();
        assert!(client.connect());
        assert!(!client.connect());
        assert_eq!(client.cls.connect_time, -99999);
    }

    #[test]
    fn test_fatal_error_disconnects() {
        let mut client = Client::new();
        client.connect();
        let mut w = MsgWriter::new();
        server_data(&mut w);
        w.write_byte(0xee);

        let err = client.read_packet(w.as_slice(), &mut NullCallbacks);
        assert_eq!(err, Err(ParseError::BadOpcode(0xee)));
        assert_eq!(client.cls.state, ConnState::Disconnected);
        assert_eq!(client.cl.servercount, 0, "level state was dropped");
    }

    #[test]
    fn test_disconnect_keeps_command_numbering() {
        let mut client = Client::new();
        client.connect();
        assert_eq!(client.send_cmd(UserCmd::default()), 1);
        assert_eq!(client.send_cmd(UserCmd::default()), 2);
        client.acknowledge(1);

        client.disconnect();
        assert_eq!(client.cls.state, ConnState::Disconnected);
        assert_eq!(client.cl.cmds.netchan().outgoing_sequence, 3);
        assert_eq!(client.cl.cmds.netchan().incoming_acknowledged, 1);

        client.disconnect();
        assert_eq!(client.cls.state, ConnState::Disconnected);
    }

    #[test]
    fn test_frame_advances_clocks_and_predicts() {
        let mut client = Client::new();
        client.connect();
        let mut w = MsgWriter::new();
        server_data(&mut w);
        empty_frame(&mut w, 1, -1, 0);
        client.read_packet(w.as_slice(), &mut NullCallbacks).unwrap();

        let cmd = UserCmd {
            msec: 50,
            forwardmove: 200,
            ..Default::default()
        };
        client.send_cmd(cmd);
        client.send_cmd(cmd);

        client.frame(16, &OpenAir);
        assert_eq!(client.cls.realtime, 16);
        assert!((client.cls.frametime - 0.016).abs() < 1e-6);
        assert!(client.cl.predicted_origin[0] > 0.0, "walked forward");
        assert_eq!(client.view_origin(), client.cl.predicted_origin);
    }

    #[test]
    fn test_server_game_dir_is_mirrored() {
        let mut client = Client::new();
        client.connect();
        client.cvars.set("game", "mine");
        assert_eq!(client.cvars.string("game"), "", "only the server sets it");

        let mut w = MsgWriter::new();
        server_data_in(&mut w, "ctf");
        client.read_packet(w.as_slice(), &mut NullCallbacks).unwrap();
        assert_eq!(client.cvars.string("game"), "ctf");
    }

    #[test]
    fn test_toggling_prediction_restarts_from_server_origin() {
        let mut client = Client::new();
        client.connect();
        let mut w = MsgWriter::new();
        server_data(&mut w);
        empty_frame(&mut w, 1, -1, 160);
        client.read_packet(w.as_slice(), &mut NullCallbacks).unwrap();
        client.frame(16, &OpenAir);

        client.cl.prediction_error.set([4.0, 0.0, 0.0], client.cls.realtime);
        client.cl.predicted_origin = [50.0, 0.0, 0.0];
        client.frame(16, &OpenAir);
        assert!(!client.cl.prediction_error.is_zero(), "untouched while cl_predict is steady");

        client.cvars.set("cl_predict", "0");
        client.frame(16, &OpenAir);
        assert!(client.cl.prediction_error.is_zero());
        assert_eq!(client.cl.predicted_origin, [20.0, 0.0, 0.0]);
    }
}
