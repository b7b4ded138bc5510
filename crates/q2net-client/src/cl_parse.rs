// cl_parse.rs -- parse a message received from the server

use thiserror::Error;

use q2net_common::cvar::CvarContext;
use q2net_common::msg::MsgReader;
use q2net_common::q_shared::{EntityState, Vec3, MAX_CONFIGSTRINGS, MAX_EDICTS, MAX_ITEMS};
use q2net_common::qcommon::{
    SoundFlags, SvcOps, DEFAULT_SOUND_PACKET_ATTENUATION, DEFAULT_SOUND_PACKET_VOLUME,
    PROTOCOL_VERSION,
};

use crate::cl_ents::{parse_delta, parse_entity_bits, parse_frame};
use crate::cl_tent::{parse_temp_entity, TempEntity};
use crate::client::{ClientState, ClientStatic, ConnState, Frame};

// ============================================================
// Errors
// ============================================================

/// Conditions that leave the message stream unusable. Every one of these
/// drops the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("illegible server message: opcode {0}")]
    BadOpcode(i32),
    #[error("bad server message: read past end of message ({0})")]
    BadRead(&'static str),
    #[error("{0} outside of a frame")]
    OutOfPlaceFrameData(&'static str),
    #[error("frame: expected {expected}, got opcode {got}")]
    FrameSequence { expected: &'static str, got: i32 },
    #[error("bad entity number {0}")]
    BadEntityNumber(i32),
    #[error("configstring {0} > MAX_CONFIGSTRINGS")]
    BadConfigString(i32),
    #[error("server returned version {got}, not {expected}")]
    ProtocolMismatch { got: i32, expected: i32 },
    #[error("server disconnected")]
    ServerDisconnected,
    #[error("{what} received while {state:?}")]
    IllegalState { what: &'static str, state: ConnState },
    #[error("bad temp entity type {0}")]
    BadTempEntity(i32),
}

// ============================================================
// Collaborators
// ============================================================

/// A positioned or entity-attached sound start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoundEvent {
    pub sound_index: i32,
    pub volume: f32,
    pub attenuation: f32,
    /// seconds from the start of the frame
    pub time_offset: f32,
    pub entity: i32,
    pub channel: i32,
    /// None means "at the entity's origin"
    pub origin: Option<Vec3>,
}

/// Everything the parser hands off to the rest of the client. Every method
/// has a do-nothing default so a collaborator implements only what it needs.
pub trait ClientCallbacks {
    fn print(&mut self, _level: i32, _text: &str) {}
    fn center_print(&mut self, _text: &str) {}
    fn stuff_text(&mut self, _text: &str) {}
    fn layout(&mut self, _layout: &str) {}
    fn inventory(&mut self, _inventory: &[i32]) {}
    fn start_sound(&mut self, _sound: &SoundEvent) {}
    fn muzzle_flash(&mut self, _entity: i32, _weapon: i32) {}
    fn muzzle_flash2(&mut self, _entity: i32, _flash: i32) {}
    fn temp_entity(&mut self, _te: &TempEntity) {}
    fn configstring_changed(&mut self, _index: usize, _old: &str, _new: &str) {}
    fn play_cinematic(&mut self, _name: &str) {}
    fn download_chunk(&mut self, _data: &[u8], _percent: i32) {}
    fn download_finished(&mut self) {}
    fn download_missing(&mut self) {}
    fn entity_event(&mut self, _ent: &EntityState) {}
    /// Called for every frame once it is stored, valid or not.
    fn frame_parsed(&mut self, _frame: &Frame) {}
}

/// A collaborator that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCallbacks;

impl ClientCallbacks for NullCallbacks {}

// ============================================================
// Message dispatch
// ============================================================

pub fn parse_server_message(
    cl: &mut ClientState,
    cls: &mut ClientStatic,
    cvars: &CvarContext,
    data: &[u8],
    callbacks: &mut dyn ClientCallbacks,
) -> Result<(), ParseError> {
    let mut msg = MsgReader::new(data);
    let shownet = cvars.value("cl_shownet") as i32;

    if shownet == 1 {
        log::trace!("{} ", msg.len());
    } else if shownet >= 2 {
        log::trace!("------------------");
    }

    loop {
        if msg.overflowed() {
            return Err(ParseError::BadRead("server message"));
        }

        let cmd = msg.read_byte();
        if cmd == -1 {
            break;
        }

        let op = SvcOps::from_byte(cmd);
        if shownet >= 2 {
            match op {
                Some(op) => log::trace!("{:3}:{}", msg.readcount() - 1, op.name()),
                None => log::trace!("{:3}:BAD CMD {}", msg.readcount() - 1, cmd),
            }
        }

        match op.ok_or(ParseError::BadOpcode(cmd))? {
            SvcOps::Bad => return Err(ParseError::BadOpcode(cmd)),
            SvcOps::Nop => {}

            SvcOps::Disconnect => return Err(ParseError::ServerDisconnected),

            SvcOps::Reconnect => {
                log::info!("Server disconnected, reconnecting");
                cls.downloading = false;
                cls.state.transition(ConnState::Connecting);
                cls.connect_time = -99999; // resend immediately
            }

            SvcOps::Print => {
                let level = msg.read_byte();
                let text = msg.read_string();
                log::info!("{}", text.trim_end());
                callbacks.print(level, &text);
            }

            SvcOps::CenterPrint => callbacks.center_print(&msg.read_string()),

            SvcOps::StuffText => {
                let text = msg.read_string();
                if developer(cvars) {
                    log::debug!("stufftext: {}", text);
                }
                callbacks.stuff_text(&text);
            }

            SvcOps::ServerData => parse_server_data(cl, cls, cvars, &mut msg, callbacks)?,
            SvcOps::ConfigString => parse_config_string(cl, &mut msg, callbacks)?,
            SvcOps::Sound => parse_start_sound(&mut msg, callbacks)?,

            SvcOps::SpawnBaseline => {
                require_frames(cls, "spawnbaseline")?;
                parse_baseline(cl, &mut msg)?;
            }

            SvcOps::TempEntity => {
                let te = parse_temp_entity(&mut msg)?;
                callbacks.temp_entity(&te);
            }

            SvcOps::MuzzleFlash => {
                let entity = msg.read_short();
                let weapon = msg.read_byte();
                check_entity_number(entity)?;
                callbacks.muzzle_flash(entity, weapon);
            }

            SvcOps::MuzzleFlash2 => {
                let entity = msg.read_short();
                let flash = msg.read_byte();
                check_entity_number(entity)?;
                callbacks.muzzle_flash2(entity, flash);
            }

            SvcOps::Download => parse_download(cls, &mut msg, callbacks),

            SvcOps::Frame => {
                require_frames(cls, "frame")?;
                parse_frame(cl, cls, cvars, &mut msg, callbacks)?;
            }

            SvcOps::Inventory => {
                for slot in cl.inventory.iter_mut().take(MAX_ITEMS) {
                    *slot = msg.read_short();
                }
                callbacks.inventory(&cl.inventory);
            }

            SvcOps::Layout => {
                cl.layout = msg.read_string();
                callbacks.layout(&cl.layout);
            }

            SvcOps::PlayerInfo | SvcOps::PacketEntities | SvcOps::DeltaPacketEntities => {
                return Err(ParseError::OutOfPlaceFrameData(op_name(cmd)));
            }
        }
    }

    Ok(())
}

fn op_name(cmd: i32) -> &'static str {
    SvcOps::from_byte(cmd).map_or("svc_bad", SvcOps::name)
}

/// Developer diagnostics are only logged while `developer` is set.
pub(crate) fn developer(cvars: &CvarContext) -> bool {
    cvars.value("developer") != 0.0
}

fn require_frames(cls: &ClientStatic, what: &'static str) -> Result<(), ParseError> {
    if cls.state.accepts_frames() {
        Ok(())
    } else {
        Err(ParseError::IllegalState {
            what,
            state: cls.state,
        })
    }
}

pub(crate) fn check_entity_number(number: i32) -> Result<(), ParseError> {
    if number < 1 || number as usize >= MAX_EDICTS {
        return Err(ParseError::BadEntityNumber(number));
    }
    Ok(())
}

// ============================================================
// Server info
// ============================================================

fn parse_server_data(
    cl: &mut ClientState,
    cls: &mut ClientStatic,
    cvars: &CvarContext,
    msg: &mut MsgReader<'_>,
    callbacks: &mut dyn ClientCallbacks,
) -> Result<(), ParseError> {
    if developer(cvars) {
        log::debug!("Serverdata packet received.");
    }

    if !cls.state.can_transition(ConnState::Connected) {
        return Err(ParseError::IllegalState {
            what: "serverdata",
            state: cls.state,
        });
    }

    // wipe the level state
    cl.clear();
    cls.state.transition(ConnState::Connected);

    // parse protocol version number
    let version = msg.read_long();
    cls.server_protocol = version;
    if version != PROTOCOL_VERSION {
        return Err(ParseError::ProtocolMismatch {
            got: version,
            expected: PROTOCOL_VERSION,
        });
    }

    cl.servercount = msg.read_long();
    cl.attractloop = msg.read_byte() != 0;
    cl.gamedir = msg.read_string();
    cl.playernum = msg.read_short();
    let levelname = msg.read_string();

    if msg.overflowed() {
        return Err(ParseError::BadRead("serverdata"));
    }

    if cl.playernum == -1 {
        // playing a cinematic or showing a pic, not a level
        callbacks.play_cinematic(&levelname);
    } else {
        log::info!("{}", levelname);
    }
    Ok(())
}

fn parse_config_string(
    cl: &mut ClientState,
    msg: &mut MsgReader<'_>,
    callbacks: &mut dyn ClientCallbacks,
) -> Result<(), ParseError> {
    let i = msg.read_short();
    if i < 0 || i as usize >= MAX_CONFIGSTRINGS {
        return Err(ParseError::BadConfigString(i));
    }
    let i = i as usize;
    let s = msg.read_string();

    let old = std::mem::replace(&mut cl.configstrings[i], s);
    callbacks.configstring_changed(i, &old, &cl.configstrings[i]);
    Ok(())
}

fn parse_baseline(cl: &mut ClientState, msg: &mut MsgReader<'_>) -> Result<(), ParseError> {
    let (newnum, bits) = parse_entity_bits(msg);
    check_entity_number(newnum)?;
    let baseline = parse_delta(&EntityState::default(), newnum, bits, msg);
    if msg.overflowed() {
        return Err(ParseError::BadRead("spawnbaseline"));
    }
    cl.entities[newnum as usize].baseline = baseline;
    Ok(())
}

// ============================================================
// Sounds and downloads
// ============================================================

fn parse_start_sound(
    msg: &mut MsgReader<'_>,
    callbacks: &mut dyn ClientCallbacks,
) -> Result<(), ParseError> {
    let flags = SoundFlags::from_bits_retain(msg.read_byte() as u8);
    let sound_index = msg.read_byte();

    let volume = if flags.contains(SoundFlags::VOLUME) {
        msg.read_byte() as f32 / 255.0
    } else {
        DEFAULT_SOUND_PACKET_VOLUME
    };
    let attenuation = if flags.contains(SoundFlags::ATTENUATION) {
        msg.read_byte() as f32 / 64.0
    } else {
        DEFAULT_SOUND_PACKET_ATTENUATION
    };
    let time_offset = if flags.contains(SoundFlags::OFFSET) {
        msg.read_byte() as f32 / 1000.0
    } else {
        0.0
    };

    // entity relative
    let (entity, channel) = if flags.contains(SoundFlags::ENT) {
        let channel = msg.read_short();
        let entity = channel >> 3;
        if entity as usize > MAX_EDICTS {
            return Err(ParseError::BadEntityNumber(entity));
        }
        (entity, channel & 7)
    } else {
        (0, 0)
    };

    // positioned in space
    let origin = flags.contains(SoundFlags::POS).then(|| msg.read_pos());

    if msg.overflowed() {
        return Err(ParseError::BadRead("sound"));
    }

    callbacks.start_sound(&SoundEvent {
        sound_index,
        volume,
        attenuation,
        time_offset,
        entity,
        channel,
        origin,
    });
    Ok(())
}

/// A download fragment. The collaborator owns the file; this only keeps the
/// transfer moving.
fn parse_download(
    cls: &mut ClientStatic,
    msg: &mut MsgReader<'_>,
    callbacks: &mut dyn ClientCallbacks,
) {
    let size = msg.read_short();
    let percent = msg.read_byte();

    if size == -1 {
        log::info!("Server does not have this file.");
        cls.downloading = false;
        cls.downloadpercent = 0;
        callbacks.download_missing();
        return;
    }

    let data = msg.read_data(size.max(0) as usize);
    cls.downloading = true;
    callbacks.download_chunk(data, percent);

    if percent != 100 {
        // request next block
        cls.downloadpercent = percent;
        cls.reliable.push("nextdl".to_string());
    } else {
        cls.downloading = false;
        cls.downloadpercent = 0;
        callbacks.download_finished();
    }
}
